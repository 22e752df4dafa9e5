//! Route handlers.

use anyhow::{Context, Result};
use serde_json::json;
use std::path::{Component, Path, PathBuf};

use super::http::{HttpRequest, Response};
use crate::history::{HistoryRecord, HistoryStore};
use crate::ingest::STUB_SCHEME;
use crate::media::{MediaPipeline, Outcome};
use crate::{report, sanitize_filename, MediaKind, RTSP_SOURCE_LABEL};

/// URL prefix under which stored artifacts are served.
pub(crate) const ARTIFACT_ROUTE: &str = "static/uploads";

const INDEX_HTML: &str = include_str!("../../static/index.html");
const SCRIPT_JS: &str = include_str!("../../static/js/script.js");
const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Everything a request may touch. Owned by the server thread.
pub(crate) struct AppState {
    pub pipeline: MediaPipeline,
    pub history: Box<dyn HistoryStore>,
    pub upload_dir: PathBuf,
    pub report_path: PathBuf,
    /// Whether `stub://` stream URLs are accepted (scripted model only).
    pub accept_stub_streams: bool,
}

pub(crate) fn index() -> Response {
    Response::bytes("text/html; charset=utf-8", INDEX_HTML.as_bytes().to_vec())
}

pub(crate) fn script() -> Response {
    Response::bytes(
        "application/javascript; charset=utf-8",
        SCRIPT_JS.as_bytes().to_vec(),
    )
}

pub(crate) fn health(state: &AppState) -> Response {
    Response::json(
        200,
        &json!({
            "status": "ok",
            "model_loaded": state.pipeline.detector().is_available(),
        }),
    )
}

pub(crate) fn upload(state: &mut AppState, request: &HttpRequest) -> Result<Response> {
    let parts = match request.multipart() {
        Ok(parts) => parts,
        Err(err) => {
            log::warn!("upload rejected: {:#}", err);
            return Ok(Response::error(400, "malformed multipart body"));
        }
    };
    let Some(part) = parts.into_iter().find(|part| part.name == "file") else {
        log::warn!("upload rejected: no file part");
        return Ok(Response::error(400, "no file uploaded"));
    };
    let raw_name = part.filename.unwrap_or_default();
    if raw_name.trim().is_empty() {
        log::warn!("upload rejected: empty filename");
        return Ok(Response::error(400, "no file selected"));
    }
    let Some(kind) = MediaKind::from_filename(&raw_name) else {
        log::warn!("upload rejected: unsupported file type '{}'", raw_name);
        return Ok(Response::error(400, "unsupported file type"));
    };

    let stored_name = stored_upload_name(&raw_name, kind);
    std::fs::create_dir_all(&state.upload_dir)
        .with_context(|| format!("failed to create {}", state.upload_dir.display()))?;
    let file_path = state.upload_dir.join(&stored_name);
    std::fs::write(&file_path, &part.data)
        .with_context(|| format!("failed to save upload {}", file_path.display()))?;
    log::info!("saved upload {} ({} bytes)", file_path.display(), part.data.len());

    let outcome = match kind {
        MediaKind::Image => state.pipeline.process_image(&file_path),
        MediaKind::Video => state.pipeline.process_video(&file_path),
    };
    record_outcome(state, &stored_name, outcome)
}

pub(crate) fn process_rtsp(state: &mut AppState, request: &HttpRequest) -> Result<Response> {
    let url = match request.form_field("rtsp_url") {
        Ok(url) => url.unwrap_or_default(),
        Err(err) => {
            log::warn!("rtsp request rejected: {:#}", err);
            return Ok(Response::error(400, "malformed form body"));
        }
    };
    let url = url.trim();
    if url.starts_with(STUB_SCHEME) && !state.accept_stub_streams {
        log::warn!("rtsp request rejected: synthetic stream url");
        return Ok(Response::error(400, "unsupported stream url"));
    }
    let outcome = state.pipeline.process_rtsp(url);
    record_outcome(state, RTSP_SOURCE_LABEL, outcome)
}

pub(crate) fn history(state: &mut AppState) -> Result<Response> {
    let records = state.history.read_all()?;
    Ok(Response::json(200, &serde_json::to_value(records)?))
}

pub(crate) fn download_report(state: &mut AppState) -> Result<Response> {
    match report::generate(state.history.as_mut(), &state.report_path)? {
        Some(path) => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("failed to read report {}", path.display()))?;
            Ok(Response::bytes(XLSX_CONTENT_TYPE, bytes).as_attachment("report.xlsx"))
        }
        None => {
            log::warn!("report requested with empty history");
            Ok(Response::error(400, "report not available"))
        }
    }
}

/// Serve a file stored in the upload dir. `name` is the path after the route prefix.
pub(crate) fn artifact(state: &AppState, name: &str) -> Result<Response> {
    let Some(path) = resolve_artifact(&state.upload_dir, name) else {
        return Ok(Response::error(404, "not_found"));
    };
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Response::error(404, "not_found"))
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()))
        }
    };
    Ok(Response::bytes(content_type_for(&path), bytes))
}

fn record_outcome(state: &mut AppState, source_label: &str, outcome: Outcome) -> Result<Response> {
    let public_path = outcome
        .output_path
        .as_deref()
        .and_then(Path::file_name)
        .map(|name| PathBuf::from(ARTIFACT_ROUTE).join(name));
    let record = HistoryRecord::new(source_label, outcome.count, public_path.as_deref());
    state
        .history
        .append(&record)
        .context("failed to append history record")?;

    Ok(Response::json(
        200,
        &json!({
            "count": outcome.count,
            "output_path": record.output_path,
            "history": record,
            "status": outcome.status,
        }),
    ))
}

/// Flat on-disk name for an upload whose extension was already accepted.
///
/// Falls back to `upload.<ext>` when sanitizing leaves no usable stem or
/// strips the extension.
fn stored_upload_name(raw_name: &str, kind: MediaKind) -> String {
    let sanitized = sanitize_filename(raw_name);
    let keeps_stem = sanitized
        .rsplit_once('.')
        .is_some_and(|(stem, _)| !stem.is_empty());
    if keeps_stem && MediaKind::from_filename(&sanitized) == Some(kind) {
        return sanitized;
    }
    let ext = raw_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    format!("upload.{}", ext)
}

fn resolve_artifact(root: &Path, name: &str) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }
    let relative = Path::new(name);
    let only_normal = relative
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    if !only_normal {
        return None;
    }
    Some(root.join(relative))
}

fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "mp4" => "video/mp4",
        "xlsx" => XLSX_CONTENT_TYPE,
        _ => "application/octet-stream",
    }
}
