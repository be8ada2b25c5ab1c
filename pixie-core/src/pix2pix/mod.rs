use anyhow::{Context, Result};
use diffusers::models::unet_2d::UNet2DConditionModel;
use diffusers::models::vae::AutoEncoderKL;
use diffusers::pipelines::stable_diffusion::StableDiffusionConfig;
use diffusers::schedulers::euler_ancestral_discrete::EulerAncestralDiscreteScheduler;
use diffusers::transformers::clip;
use diffusers::utils::DeviceSetup;
use image::DynamicImage;
use std::path::Path;
use tch::nn::Module;
use tch::{Device, Kind, Tensor};

use crate::{
    image_to_tensor, tensor_to_image, EditError, EditOptions, Editor, Loader, WeightSource,
};

const LATENT_SCALE: f64 = 0.18215;
/// InstructPix2Pix concatenates the conditioning image latents onto the noise
/// latents, so its UNet takes eight input channels instead of four.
const UNET_IN_CHANNELS: i64 = 8;

/// The InstructPix2Pix pipeline: CLIP text encoder, VAE and an eight-channel
/// UNet, each pinned to its own device.
pub struct Pix2PixModel {
    tokenizer: clip::Tokenizer,
    text_model: clip::ClipTextTransformer,
    vae: AutoEncoderKL,
    unet: UNet2DConditionModel,
    clip_device: Device,
    vae_device: Device,
    unet_device: Device,
}

impl Editor for Pix2PixModel {
    fn edit(
        &mut self,
        image: &DynamicImage,
        instruction: &str,
        options: &EditOptions,
    ) -> Result<DynamicImage, EditError> {
        if image.width() < 32 || image.height() < 32 {
            return Err(EditError::Validation(format!(
                "Image must be at least 32x32 pixels, got {}x{}.",
                image.width(),
                image.height()
            )));
        }
        self.run(image, instruction, options).map_err(EditError::Inference)
    }
}

impl Pix2PixModel {
    fn run(
        &self,
        image: &DynamicImage,
        instruction: &str,
        options: &EditOptions,
    ) -> Result<DynamicImage> {
        let no_grad_guard = tch::no_grad_guard();
        if let Some(seed) = options.seed {
            tch::manual_seed(seed);
        }

        let text_embeddings = self.encode_instruction(instruction)?;

        // --- Encode the input image into conditioning latents ---
        let init_image = image_to_tensor(image)?.to(self.vae_device);
        let (_, _, height, width) = init_image.size4()?;
        let image_latents = self.vae.encode(&init_image).sample().to(self.unet_device);
        // The conditioning latents stay unscaled; the third batch entry is
        // zeroed for the fully unconditioned pass.
        let image_latents = Tensor::cat(
            &[&image_latents, &image_latents, &image_latents.zeros_like()],
            0,
        );

        // --- Denoise ---
        let scheduler = EulerAncestralDiscreteScheduler::new(options.steps, Default::default());
        let mut latents = Tensor::randn(
            [1, 4, height / 8, width / 8],
            (Kind::Float, self.unet_device),
        );
        latents *= scheduler.init_noise_sigma();

        for (timestep_index, &timestep) in scheduler.timesteps().iter().enumerate() {
            tracing::debug!(step = timestep_index + 1, steps = options.steps, "denoising");
            let latent_model_input = Tensor::cat(&[&latents, &latents, &latents], 0);
            let latent_model_input = scheduler.scale_model_input(latent_model_input, timestep);
            let latent_model_input = Tensor::cat(&[&latent_model_input, &image_latents], 1);
            let noise_pred = self.unet.forward(&latent_model_input, timestep, &text_embeddings);
            let noise_pred = noise_pred.chunk(3, 0);
            let (cond, image_cond, uncond) = (&noise_pred[0], &noise_pred[1], &noise_pred[2]);
            let noise_pred = uncond
                + (cond - image_cond) * options.text_guidance_scale
                + (image_cond - uncond) * options.image_guidance_scale;
            latents = scheduler.step(&noise_pred, timestep, &latents);
        }

        // --- Decode the edited latents ---
        let latents = latents.to(self.vae_device);
        let image = self.vae.decode(&(&latents / LATENT_SCALE));
        let image = (image / 2. + 0.5).clamp(0., 1.).to_device(Device::Cpu);
        let image = (image * 255.).to_kind(Kind::Uint8).squeeze_dim(0);
        drop(no_grad_guard);
        tensor_to_image(&image)
    }

    /// Builds the three-batch text conditioning: instruction, then the empty
    /// prompt twice. The order matches the guidance arithmetic in `run`.
    fn encode_instruction(&self, instruction: &str) -> Result<Tensor> {
        let tokens = self.tokenize(instruction)?;
        let uncond_tokens = self.tokenize("")?;
        let text_embeddings = self.text_model.forward(&tokens);
        let uncond_embeddings = self.text_model.forward(&uncond_tokens);
        let embeddings = Tensor::cat(
            &[&text_embeddings, &uncond_embeddings, &uncond_embeddings],
            0,
        );
        Ok(embeddings.to(self.unet_device))
    }

    fn tokenize(&self, text: &str) -> Result<Tensor> {
        let tokens: Vec<i64> =
            self.tokenizer.encode(text)?.into_iter().map(|token| token as i64).collect();
        Ok(Tensor::from_slice(&tokens).view((1, -1)).to(self.clip_device))
    }
}

pub struct Pix2PixLoader;

impl Loader for Pix2PixLoader {
    type Model = Pix2PixModel;

    async fn load(source: WeightSource, devices: DeviceSetup) -> Result<Self::Model> {
        let weights = source.resolve().await?;
        let sd_config = StableDiffusionConfig::v1_5(None, None, None);

        let clip_device = devices.get("clip");
        let vae_device = devices.get("vae");
        let unet_device = devices.get("unet");

        tracing::info!(file = %weights.vocab.display(), "loading the tokenizer");
        let tokenizer = clip::Tokenizer::create(&weights.vocab, &sd_config.clip)
            .context("failed to load the tokenizer")?;

        tracing::info!(file = %weights.clip.display(), "building the CLIP transformer");
        let text_model = sd_config
            .build_clip_transformer(weight_str(&weights.clip)?, clip_device)
            .context("failed to build the CLIP transformer")?;

        tracing::info!(file = %weights.vae.display(), "building the autoencoder");
        let vae = sd_config
            .build_vae(weight_str(&weights.vae)?, vae_device)
            .context("failed to build the autoencoder")?;

        tracing::info!(file = %weights.unet.display(), "building the unet");
        let unet = sd_config
            .build_unet(weight_str(&weights.unet)?, unet_device, UNET_IN_CHANNELS)
            .context("failed to build the unet")?;

        Ok(Pix2PixModel {
            tokenizer,
            text_model,
            vae,
            unet,
            clip_device,
            vae_device,
            unet_device,
        })
    }
}

fn weight_str(path: &Path) -> Result<&str> {
    path.to_str()
        .with_context(|| format!("weight path {path:?} is not valid unicode"))
}
