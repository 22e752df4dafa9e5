//! Truck counter
//!
//! A small service that counts trucks in uploaded images, uploaded videos and
//! single frames grabbed from RTSP cameras, keeps a history of every
//! processing event, and exports that history as a spreadsheet.
//!
//! # Module Structure
//!
//! - `detect`: detector backends and the counting adapter (class filter + threshold)
//! - `frame`: decoded RGB frames handed to detectors
//! - `ingest`: forward-only frame sources (video files, RTSP streams, stub sources)
//! - `media`: image / video / RTSP-snapshot processors
//! - `history`: append-only history stores (JSON file, SQLite)
//! - `report`: spreadsheet export of the history
//! - `api`: HTTP surface
//! - `config`: file + environment configuration

use serde::Serialize;
use std::sync::OnceLock;

pub mod api;
pub mod config;
pub mod detect;
pub mod frame;
pub mod history;
pub mod ingest;
pub mod media;
pub mod report;

pub use detect::{ClassFilter, Detection, DetectorBackend, ScriptedBackend, TruckDetector};
pub use frame::Frame;
pub use history::{HistoryRecord, HistoryStore, JsonHistoryStore, SqliteHistoryStore};
pub use ingest::{file::FileConfig, FileSource};
pub use ingest::{rtsp::RtspConfig, RtspSource};
pub use media::{MediaPipeline, Outcome};

/// Source label recorded for RTSP snapshots.
pub const RTSP_SOURCE_LABEL: &str = "RTSP_STREAM";

/// Timestamp layout used by history records.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// How a processing request ended.
///
/// A count of zero with `Ok` means nothing was detected. `ArtifactFailed`
/// keeps a full count. Every other status means detection could not run
/// (fully or partially) and the count is only what was gathered before the
/// failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Ok,
    /// No detector backend is loaded.
    ModelUnavailable,
    /// The backend returned an error for a frame.
    DetectorFailed,
    /// Input media could not be decoded.
    DecodeFailed,
    /// Video file or stream could not be opened.
    SourceUnavailable,
    /// Processing hit its wall-clock budget.
    TimedOut,
    /// Processing was interrupted by shutdown.
    Cancelled,
    /// Trucks were counted but the annotated artifact could not be written.
    /// The count stands.
    ArtifactFailed,
}

impl ProcessStatus {
    pub fn is_ok(self) -> bool {
        self == ProcessStatus::Ok
    }

    /// Whether the accompanying count is a full result.
    pub fn keeps_count(self) -> bool {
        matches!(self, ProcessStatus::Ok | ProcessStatus::ArtifactFailed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessStatus::Ok => "ok",
            ProcessStatus::ModelUnavailable => "model_unavailable",
            ProcessStatus::DetectorFailed => "detector_failed",
            ProcessStatus::DecodeFailed => "decode_failed",
            ProcessStatus::SourceUnavailable => "source_unavailable",
            ProcessStatus::TimedOut => "timed_out",
            ProcessStatus::Cancelled => "cancelled",
            ProcessStatus::ArtifactFailed => "artifact_failed",
        }
    }
}

/// Kind of media accepted by the upload endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Classify a filename by extension. Only png, jpg, jpeg and mp4 are accepted.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let (_, ext) = filename.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "png" | "jpg" | "jpeg" => Some(MediaKind::Image),
            "mp4" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

/// Reduce an uploaded filename to a flat name safe to join onto the upload dir.
///
/// Path separators become underscores, anything outside `[A-Za-z0-9_.-]` is
/// dropped and leading dots/underscores are stripped. Returns an empty string
/// when nothing usable is left.
pub fn sanitize_filename(filename: &str) -> String {
    static UNSAFE_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = UNSAFE_RE.get_or_init(|| regex::Regex::new(r"[^A-Za-z0-9_.-]").unwrap());

    let flattened = filename
        .replace(['/', '\\'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_");
    re.replace_all(&flattened, "")
        .trim_matches(|c| c == '.' || c == '_')
        .to_string()
}

/// Current local time in the history timestamp layout.
pub fn now_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}
