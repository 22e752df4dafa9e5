use image::RgbImage;

use crate::detect::annotate::annotate_detections;
use crate::detect::backend::{ClassFilter, DetectorBackend};
use crate::detect::result::Detection;
use crate::frame::Frame;
use crate::ProcessStatus;

/// Default minimum confidence for a counted detection.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.005;

/// Result of counting one frame.
#[derive(Debug)]
pub struct FrameOutcome {
    pub count: u32,
    /// Present when at least one detection was counted and annotation was
    /// requested, unless annotation failed (`ArtifactFailed`).
    pub annotated: Option<RgbImage>,
    pub status: ProcessStatus,
}

impl FrameOutcome {
    fn failed(status: ProcessStatus) -> Self {
        Self {
            count: 0,
            annotated: None,
            status,
        }
    }
}

/// Counting adapter around an optional detector backend.
///
/// A missing backend (model failed to load) or a backend error yields a zero
/// count with a non-`Ok` status; neither is propagated as an error.
pub struct TruckDetector {
    backend: Option<Box<dyn DetectorBackend>>,
    classes: ClassFilter,
    confidence_threshold: f32,
}

impl TruckDetector {
    pub fn new(
        backend: Option<Box<dyn DetectorBackend>>,
        classes: ClassFilter,
        confidence_threshold: f32,
    ) -> Self {
        Self {
            backend,
            classes,
            confidence_threshold,
        }
    }

    /// Adapter with no model loaded.
    pub fn unavailable() -> Self {
        Self::new(None, ClassFilter::default(), DEFAULT_CONFIDENCE_THRESHOLD)
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        self.backend.as_ref().map(|backend| backend.name())
    }

    pub fn classes(&self) -> &ClassFilter {
        &self.classes
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Count matching detections and draw them onto a copy of the frame.
    pub fn detect(&mut self, frame: &Frame) -> FrameOutcome {
        self.run(frame, true)
    }

    /// Count matching detections without producing an annotated frame.
    pub fn count(&mut self, frame: &Frame) -> FrameOutcome {
        self.run(frame, false)
    }

    fn run(&mut self, frame: &Frame, annotate: bool) -> FrameOutcome {
        let Some(backend) = self.backend.as_mut() else {
            log::error!("detector model is not loaded; frame {} not processed", frame.index);
            return FrameOutcome::failed(ProcessStatus::ModelUnavailable);
        };

        let detections = match backend.detect(frame, &self.classes, self.confidence_threshold) {
            Ok(detections) => detections,
            Err(err) => {
                log::error!(
                    "detector '{}' failed on frame {}: {:#}",
                    backend.name(),
                    frame.index,
                    err
                );
                return FrameOutcome::failed(ProcessStatus::DetectorFailed);
            }
        };

        let counted: Vec<Detection> = detections
            .into_iter()
            .filter(|det| {
                self.classes.contains(det.class_id) && det.confidence >= self.confidence_threshold
            })
            .collect();
        let count = u32::try_from(counted.len()).unwrap_or(u32::MAX);
        log::debug!(
            "frame {}: {} detections, classes {:?}",
            frame.index,
            count,
            counted.iter().map(|det| det.class_id).collect::<Vec<_>>()
        );

        if counted.is_empty() || !annotate {
            return FrameOutcome {
                count,
                annotated: None,
                status: ProcessStatus::Ok,
            };
        }

        match annotate_detections(frame, &counted) {
            Ok(image) => FrameOutcome {
                count,
                annotated: Some(image),
                status: ProcessStatus::Ok,
            },
            Err(err) => {
                log::error!("failed to annotate frame {}: {:#}", frame.index, err);
                FrameOutcome {
                    count,
                    annotated: None,
                    status: ProcessStatus::ArtifactFailed,
                }
            }
        }
    }
}
