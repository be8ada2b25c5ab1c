//! Turns a request's image source into a decoded RGB image.

use std::io::Cursor;

use exif::{In, Reader, Tag};
use image::DynamicImage;

use crate::EditError;

/// Decodes uploaded bytes into an RGB image.
pub fn from_bytes(bytes: &[u8]) -> Result<DynamicImage, EditError> {
    let image = image::load_from_memory(bytes).map_err(|_| EditError::InvalidImage)?;
    Ok(DynamicImage::ImageRgb8(image.to_rgb8()))
}

/// Fetches an image over HTTP, straightens it per its EXIF orientation and
/// converts it to RGB.
pub async fn from_url(url: &str) -> Result<DynamicImage, EditError> {
    let response = reqwest::get(url).await.map_err(|error| {
        tracing::warn!(url, %error, "image download failed");
        EditError::Download(url.to_string())
    })?;
    if !response.status().is_success() {
        tracing::warn!(url, status = %response.status(), "image download failed");
        return Err(EditError::Download(url.to_string()));
    }
    let bytes = response.bytes().await.map_err(|error| {
        tracing::warn!(url, %error, "image download failed");
        EditError::Download(url.to_string())
    })?;
    let image = image::load_from_memory(&bytes).map_err(|_| EditError::InvalidImage)?;
    let image = apply_orientation(image, exif_orientation(&bytes));
    Ok(DynamicImage::ImageRgb8(image.to_rgb8()))
}

/// Reads the EXIF orientation tag, defaulting to 1 (upright) when the bytes
/// carry no EXIF data.
fn exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    match Reader::new().read_from_container(&mut cursor) {
        Ok(data) => data
            .get_field(Tag::Orientation, In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .unwrap_or(1),
        Err(_) => 1,
    }
}

/// Undoes the camera rotation recorded in the EXIF orientation value.
fn apply_orientation(image: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}
