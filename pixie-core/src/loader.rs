use std::future::Future;
use std::path::PathBuf;

use anyhow::{Context, Result};
use diffusers::utils::DeviceSetup;
use hf_hub::api::tokio::{Api, ApiRepo};

use crate::Editor;

const UNET_FILE: &str = "unet/diffusion_pytorch_model.safetensors";
const VAE_FILE: &str = "vae/diffusion_pytorch_model.safetensors";
const CLIP_FILE: &str = "text_encoder/model.safetensors";
const VOCAB_FILE: &str = "tokenizer/merges.txt";

/// Where the pretrained weights come from: a hub repository, with optional
/// local overrides per component.
#[derive(Debug, Clone)]
pub struct WeightSource {
    repo_id: String,
    unet: Option<PathBuf>,
    vae: Option<PathBuf>,
    clip: Option<PathBuf>,
    vocab: Option<PathBuf>,
}

impl WeightSource {
    pub fn repo(repo_id: impl Into<String>) -> Self {
        Self { repo_id: repo_id.into(), unet: None, vae: None, clip: None, vocab: None }
    }

    /// Local UNet weights, either the safetensors file itself or the
    /// directory containing it.
    pub fn with_unet(mut self, path: impl Into<PathBuf>) -> Self {
        self.unet = Some(path.into());
        self
    }

    pub fn with_vae(mut self, path: impl Into<PathBuf>) -> Self {
        self.vae = Some(path.into());
        self
    }

    pub fn with_clip(mut self, path: impl Into<PathBuf>) -> Self {
        self.clip = Some(path.into());
        self
    }

    pub fn with_vocab(mut self, path: impl Into<PathBuf>) -> Self {
        self.vocab = Some(path.into());
        self
    }

    /// Resolves every component to a local file, fetching whatever is not
    /// overridden from the hub.
    pub async fn resolve(self) -> Result<WeightFiles> {
        let api = Api::new().context("failed to initialize the hub client")?;
        let repo = api.model(self.repo_id.clone());
        let unet = match self.unet {
            Some(path) => local_file(path, UNET_FILE),
            None => fetch(&repo, &self.repo_id, UNET_FILE).await?,
        };
        let vae = match self.vae {
            Some(path) => local_file(path, VAE_FILE),
            None => fetch(&repo, &self.repo_id, VAE_FILE).await?,
        };
        let clip = match self.clip {
            Some(path) => local_file(path, CLIP_FILE),
            None => fetch(&repo, &self.repo_id, CLIP_FILE).await?,
        };
        let vocab = match self.vocab {
            Some(path) => local_file(path, VOCAB_FILE),
            None => fetch(&repo, &self.repo_id, VOCAB_FILE).await?,
        };
        Ok(WeightFiles { unet, vae, clip, vocab })
    }
}

async fn fetch(repo: &ApiRepo, repo_id: &str, file: &str) -> Result<PathBuf> {
    tracing::info!(repo = repo_id, file, "fetching weights");
    repo.get(file).await.with_context(|| format!("failed to fetch {file}"))
}

/// A directory override points at the component's standard file inside it.
fn local_file(path: PathBuf, hub_file: &str) -> PathBuf {
    if path.is_dir() {
        match std::path::Path::new(hub_file).file_name() {
            Some(name) => path.join(name),
            None => path,
        }
    } else {
        path
    }
}

/// Local paths for every component of the pipeline.
#[derive(Debug, Clone)]
pub struct WeightFiles {
    pub unet: PathBuf,
    pub vae: PathBuf,
    pub clip: PathBuf,
    pub vocab: PathBuf,
}

pub trait Loader {
    type Model: Editor;

    fn load(
        source: WeightSource,
        devices: DeviceSetup,
    ) -> impl Future<Output = Result<Self::Model>>
    where
        Self: Sized;
}
