//! truck_api - HTTP service for the truck counter
//!
//! This daemon:
//! 1. Loads configuration (file + environment)
//! 2. Loads the detector model once
//! 3. Serves the upload / RTSP / history / report API until Ctrl-C

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;

use truck_counter::api::ApiServer;
use truck_counter::config::ServerConfig;
use truck_counter::detect::load_backend;
use truck_counter::TruckDetector;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (.toml or .json).
    #[arg(long, env = "TRUCK_CONFIG")]
    config: Option<PathBuf>,
    /// Listen address, overrides the config file and TRUCK_API_ADDR.
    #[arg(long)]
    addr: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = ServerConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.api_addr = addr;
    }

    let backend = load_backend(&config.model);
    let detector = TruckDetector::new(
        backend,
        config.model.class_filter()?,
        config.model.confidence,
    );
    if !detector.is_available() {
        log::warn!("no detector loaded; every request will report model_unavailable");
    }

    let api_handle = ApiServer::new(config.clone(), detector).spawn()?;
    log::info!("truck_api running on http://{}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("truck_api waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
