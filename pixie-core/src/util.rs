use anyhow::{anyhow, bail, Result};
use image::imageops::FilterType;
use image::{DynamicImage, ImageBuffer, Rgb};
use tch::{Kind, Tensor};

/// Converts an RGB image into a `(1, 3, height, width)` float tensor scaled
/// to `[-1, 1]`, resizing so both sides are multiples of 32 as the VAE and
/// UNet strides require.
pub(crate) fn image_to_tensor(image: &DynamicImage) -> Result<Tensor> {
    let width = i64::from(image.width()) - i64::from(image.width()) % 32;
    let height = i64::from(image.height()) - i64::from(image.height()) % 32;
    if width == 0 || height == 0 {
        bail!("image is too small to edit: {}x{}", image.width(), image.height());
    }
    let pixels = image
        .resize_exact(width as u32, height as u32, FilterType::Lanczos3)
        .to_rgb8()
        .into_raw();
    let tensor = Tensor::from_slice(&pixels)
        .view((height, width, 3))
        .permute([2, 0, 1])
        .unsqueeze(0)
        .to_kind(Kind::Float);
    Ok(tensor / 255. * 2. - 1.)
}

/// Converts a `(3, height, width)` byte tensor back into an RGB image.
pub(crate) fn tensor_to_image(tensor: &Tensor) -> Result<DynamicImage> {
    let (channels, height, width) = tensor.size3()?;
    if channels != 3 {
        bail!("expected an RGB tensor, got {channels} channels");
    }
    let pixels = Vec::<u8>::try_from(&tensor.permute([1, 2, 0]).contiguous().view(-1))?;
    let buffer: ImageBuffer<Rgb<u8>, Vec<u8>> =
        ImageBuffer::from_raw(width as u32, height as u32, pixels)
            .ok_or_else(|| anyhow!("pixel buffer does not match {width}x{height}"))?;
    Ok(DynamicImage::ImageRgb8(buffer))
}
