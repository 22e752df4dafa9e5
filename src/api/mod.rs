//! HTTP surface.
//!
//! One server thread accepts connections on a non-blocking listener and
//! handles each request to completion before accepting the next, so the
//! history store and the detector are never used concurrently. Stopping the
//! server also cancels any video that is being processed.

mod handlers;
mod http;

use anyhow::{anyhow, Result};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::{BackendKind, ServerConfig};
use crate::detect::TruckDetector;
use crate::history::open_history_store;
use crate::media::MediaPipeline;
use handlers::{AppState, ARTIFACT_ROUTE};
use http::{read_request, write_response, HttpRequest, ReadOutcome, Response};

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ServerConfig,
    detector: TruckDetector,
}

impl ApiServer {
    pub fn new(cfg: ServerConfig, detector: TruckDetector) -> Self {
        Self { cfg, detector }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.api_addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let history = open_history_store(&self.cfg.history)?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let pipeline = MediaPipeline::new(self.detector, &self.cfg.upload_dir, self.cfg.limits)
            .with_cancel_flag(shutdown.clone());
        let state = AppState {
            pipeline,
            history,
            upload_dir: self.cfg.upload_dir.clone(),
            report_path: self.cfg.report_path.clone(),
            accept_stub_streams: self.cfg.model.backend == BackendKind::Scripted,
        };
        let max_body = self.cfg.limits.max_upload_bytes;

        log::info!(
            "truck api listening on {} (uploads in {}, detector: {})",
            addr,
            self.cfg.upload_dir.display(),
            state.pipeline.detector().backend_name().unwrap_or("none")
        );

        let shutdown_thread = shutdown.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, state, max_body, shutdown_thread) {
                log::error!("truck api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    mut state: AppState,
    max_body: usize,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, &mut state, max_body) {
                    log::warn!("truck api request failed: {:#}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, state: &mut AppState, max_body: usize) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = match read_request(&mut stream, max_body)? {
        ReadOutcome::Request(request) => request,
        ReadOutcome::TooLarge(len) => {
            log::warn!("request body of {} bytes exceeds limit of {}", len, max_body);
            return write_response(&mut stream, &Response::error(413, "payload too large"));
        }
    };

    let response = match route(state, &request) {
        Ok(response) => response,
        Err(err) => {
            log::error!("{} {} failed: {:#}", request.method, request.path, err);
            Response::error(500, "internal_error")
        }
    };
    if response.status >= 400 {
        log::debug!("{} {} -> {}", request.method, request.path, response.status);
    }
    write_response(&mut stream, &response)
}

fn route(state: &mut AppState, request: &HttpRequest) -> Result<Response> {
    let method = request.method.as_str();
    let path = request.path.as_str();

    let artifact_prefix = format!("/{}/", ARTIFACT_ROUTE);
    let expected = match path {
        "/" | "/history" | "/download_report" | "/health" | "/static/js/script.js" => "GET",
        "/upload" | "/process_rtsp" => "POST",
        _ if path.starts_with(&artifact_prefix) => "GET",
        _ => return Ok(Response::error(404, "not_found")),
    };
    if method != expected {
        return Ok(Response::error(405, "method_not_allowed"));
    }

    match path {
        "/" => Ok(handlers::index()),
        "/static/js/script.js" => Ok(handlers::script()),
        "/health" => Ok(handlers::health(state)),
        "/history" => handlers::history(state),
        "/download_report" => handlers::download_report(state),
        "/upload" => handlers::upload(state, request),
        "/process_rtsp" => handlers::process_rtsp(state, request),
        _ => handlers::artifact(state, &path[artifact_prefix.len()..]),
    }
}
