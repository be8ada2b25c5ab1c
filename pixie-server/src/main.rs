use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use axum::http::HeaderValue;
use clap::Parser;
use dotenvy::dotenv;
use pixie_core::{DeviceSetup, EditOptions, EditService, Loader, Pix2PixLoader, WeightSource};
use pixie_server::{build_router, AppState};
use tokio::net::TcpListener;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

// Define command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Pixie image editing server")]
struct Args {
    /// Host address to bind the server to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind the server to
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Hub repository to pull the pipeline weights from
    #[arg(long, default_value = "timbrooks/instruct-pix2pix")]
    model: String,

    /// Local UNet weights overriding the hub copy; either the safetensors
    /// file or the directory containing it
    #[arg(long, env = "unet_path")]
    unet_path: Option<PathBuf>,

    /// Local VAE weights overriding the hub copy
    #[arg(long)]
    vae_path: Option<PathBuf>,

    /// Local CLIP text encoder weights overriding the hub copy
    #[arg(long)]
    clip_path: Option<PathBuf>,

    /// Local CLIP vocabulary file overriding the hub copy
    #[arg(long)]
    vocab_path: Option<PathBuf>,

    /// Directory edited images are written to
    #[arg(long, default_value = "temp")]
    output_dir: PathBuf,

    /// Origin allowed to call the API from a browser
    #[arg(long, default_value = "http://localhost:4200")]
    front_origin: String,

    /// Components to run on CPU: 'all', or any of 'clip', 'vae', 'unet'
    #[arg(long)]
    cpu: Vec<String>,

    /// Denoising steps per edit
    #[arg(long, default_value_t = 20)]
    steps: usize,

    /// How closely the edit sticks to the input image
    #[arg(long, default_value_t = 1.5)]
    image_guidance_scale: f64,

    /// How strongly the edit follows the instruction
    #[arg(long, default_value_t = 7.0)]
    guidance_scale: f64,

    /// Seed for reproducible edits
    #[arg(long)]
    seed: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,pixie_server=debug,pixie_core=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut source = WeightSource::repo(args.model.clone());
    if let Some(path) = args.unet_path {
        source = source.with_unet(path);
    }
    if let Some(path) = args.vae_path {
        source = source.with_vae(path);
    }
    if let Some(path) = args.clip_path {
        source = source.with_clip(path);
    }
    if let Some(path) = args.vocab_path {
        source = source.with_vocab(path);
    }

    tracing::info!(model = %args.model, "loading the InstructPix2Pix pipeline");
    let model = Pix2PixLoader::load(source, DeviceSetup::new(args.cpu)).await?;

    let options = EditOptions {
        steps: args.steps,
        image_guidance_scale: args.image_guidance_scale,
        text_guidance_scale: args.guidance_scale,
        seed: args.seed,
    };
    let service = EditService::new(Arc::new(Mutex::new(model)), options, args.output_dir);

    let front_origin: HeaderValue = args.front_origin.parse()?;
    let app = build_router(AppState(Arc::new(service)), front_origin);

    let bind_address = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&bind_address).await?;
    tracing::info!("started server on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
