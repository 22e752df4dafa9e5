use std::path::Path;

use super::{MediaPipeline, Outcome};
use crate::frame::Frame;
use crate::ProcessStatus;

impl MediaPipeline {
    /// Count trucks in a still image.
    ///
    /// When anything is counted the annotated image is written as
    /// `result_<basename>` in the artifact directory.
    pub fn process_image(&mut self, path: &Path) -> Outcome {
        if !self.detector.is_available() {
            log::error!("detector model is not loaded; {} not processed", path.display());
            return Outcome::failed(ProcessStatus::ModelUnavailable);
        }

        let frame = match Frame::open(path) {
            Ok(frame) => frame,
            Err(err) => {
                log::error!("failed to load image {}: {:#}", path.display(), err);
                return Outcome::failed(ProcessStatus::DecodeFailed);
            }
        };

        let result = self.detector.detect(&frame);
        if !result.status.keeps_count() {
            return Outcome::failed(result.status);
        }
        let Some(annotated) = result.annotated else {
            if result.status.is_ok() {
                log::warn!("no trucks detected in image {}", path.display());
            }
            return Outcome {
                count: result.count,
                output_path: None,
                status: result.status,
            };
        };

        let basename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.jpg".to_string());
        let output_path = self.save_artifact(&annotated, &format!("result_{}", basename));
        log::info!(
            "processed image {}: {} trucks",
            path.display(),
            result.count
        );
        Outcome::counted(result.count, output_path)
    }
}
