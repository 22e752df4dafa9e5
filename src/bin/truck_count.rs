//! truck_count - offline truck counting for one image, video or RTSP frame
//!
//! Runs the same pipeline as the HTTP service without touching the history.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use truck_counter::config::ServerConfig;
use truck_counter::detect::load_backend;
use truck_counter::{MediaKind, MediaPipeline, TruckDetector};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Image (png/jpg/jpeg) or video (mp4) to process.
    input: Option<PathBuf>,
    /// Grab a single frame from this RTSP URL instead of reading a file.
    #[arg(long, conflicts_with = "input")]
    rtsp: Option<String>,
    /// Config file (.toml or .json).
    #[arg(long, env = "TRUCK_CONFIG")]
    config: Option<PathBuf>,
    /// Directory for annotated output, defaults to the configured upload dir.
    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = ServerConfig::load_from(args.config.as_deref())?;
    let out_dir = args.out.unwrap_or_else(|| config.upload_dir.clone());

    let detector = TruckDetector::new(
        load_backend(&config.model),
        config.model.class_filter()?,
        config.model.confidence,
    );
    let mut pipeline = MediaPipeline::new(detector, out_dir, config.limits);

    let outcome = match (args.input, args.rtsp) {
        (_, Some(url)) => pipeline.process_rtsp(&url),
        (Some(path), None) => {
            let name = path.to_string_lossy().to_string();
            match MediaKind::from_filename(&name) {
                Some(MediaKind::Image) => pipeline.process_image(&path),
                Some(MediaKind::Video) => pipeline.process_video(&path),
                None => return Err(anyhow!("unsupported file type: {}", path.display())),
            }
        }
        (None, None) => return Err(anyhow!("pass an input file or --rtsp <url>")),
    };

    println!("trucks: {}", outcome.count);
    println!(
        "output: {}",
        outcome
            .output_path
            .as_deref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!("status: {}", outcome.status.as_str());
    Ok(())
}
