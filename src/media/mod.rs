//! Media processors.
//!
//! Each processor decodes its input, runs the counting adapter and writes an
//! annotated artifact when something was counted:
//! - still images: one frame, artifact `result_<basename>`
//! - videos: every frame counted independently, result is the truncated mean,
//!   no artifact
//! - RTSP: exactly one frame grabbed per request, artifact
//!   `rtsp_frame_<hex>.jpg`
//!
//! Failures never surface as errors; they yield a zero (or partial) count
//! with a non-`Ok` [`ProcessStatus`].

mod image_file;
mod rtsp;
mod video;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::Limits;
use crate::detect::TruckDetector;
use crate::ProcessStatus;

pub use video::average_count;

/// Result of processing one input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub count: u32,
    /// Annotated artifact, when one was written.
    pub output_path: Option<PathBuf>,
    pub status: ProcessStatus,
}

impl Outcome {
    fn failed(status: ProcessStatus) -> Self {
        Self {
            count: 0,
            output_path: None,
            status,
        }
    }

    /// Trucks were counted; `output_path` is `None` when the artifact was lost.
    fn counted(count: u32, output_path: Option<PathBuf>) -> Self {
        let status = if output_path.is_some() {
            ProcessStatus::Ok
        } else {
            ProcessStatus::ArtifactFailed
        };
        Self {
            count,
            output_path,
            status,
        }
    }
}

/// Owns the detector and the artifact directory; processes one input at a time.
pub struct MediaPipeline {
    detector: TruckDetector,
    output_dir: PathBuf,
    limits: Limits,
    cancel: Arc<AtomicBool>,
}

impl MediaPipeline {
    pub fn new(detector: TruckDetector, output_dir: impl Into<PathBuf>, limits: Limits) -> Self {
        Self {
            detector,
            output_dir: output_dir.into(),
            limits,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an external cancellation flag (set on shutdown).
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn detector(&self) -> &TruckDetector {
        &self.detector
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn save_artifact(&self, annotated: &image::RgbImage, file_name: &str) -> Option<PathBuf> {
        let path = self.output_dir.join(file_name);
        if let Err(err) = std::fs::create_dir_all(&self.output_dir) {
            log::error!(
                "failed to create artifact dir {}: {}",
                self.output_dir.display(),
                err
            );
            return None;
        }
        match annotated.save(&path) {
            Ok(()) => Some(path),
            Err(err) => {
                log::error!("failed to write artifact {}: {}", path.display(), err);
                None
            }
        }
    }
}
