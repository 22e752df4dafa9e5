use std::path::Path;
use std::time::Instant;

use super::{MediaPipeline, Outcome};
use crate::ingest::file::{FileConfig, FileSource};
use crate::ProcessStatus;

/// Integer-truncated arithmetic mean; zero for an empty slice.
pub fn average_count(counts: &[u32]) -> u32 {
    if counts.is_empty() {
        return 0;
    }
    let total: u64 = counts.iter().map(|&count| u64::from(count)).sum();
    (total / counts.len() as u64) as u32
}

impl MediaPipeline {
    /// Average truck count over every frame of a video.
    ///
    /// Frames are independent detection events (no tracking). Reading stops
    /// at end of file, on a read error, when the wall-clock budget is spent or
    /// when the cancel flag is raised; the mean covers the frames read so far.
    /// No annotated video is produced.
    pub fn process_video(&mut self, path: &Path) -> Outcome {
        if !self.detector.is_available() {
            log::error!("detector model is not loaded; {} not processed", path.display());
            return Outcome::failed(ProcessStatus::ModelUnavailable);
        }

        let config = FileConfig {
            path: path.to_string_lossy().into_owned(),
        };
        let mut source = match FileSource::new(config).and_then(|mut source| {
            source.connect()?;
            Ok(source)
        }) {
            Ok(source) => source,
            Err(err) => {
                log::error!("failed to open video {}: {:#}", path.display(), err);
                return Outcome::failed(ProcessStatus::SourceUnavailable);
            }
        };

        let started = Instant::now();
        let mut counts = Vec::new();
        let mut status = ProcessStatus::Ok;
        loop {
            if self.cancelled() {
                log::warn!("video {} cancelled after {} frames", path.display(), counts.len());
                status = ProcessStatus::Cancelled;
                break;
            }
            if started.elapsed() > self.limits.media_deadline {
                log::warn!(
                    "video {} exceeded its {:?} budget after {} frames",
                    path.display(),
                    self.limits.media_deadline,
                    counts.len()
                );
                status = ProcessStatus::TimedOut;
                break;
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => {
                    log::warn!(
                        "read failure in video {} after {} frames: {:#}",
                        path.display(),
                        counts.len(),
                        err
                    );
                    break;
                }
            };

            let result = self.detector.count(&frame);
            if !result.status.is_ok() {
                status = result.status;
                break;
            }
            log::debug!(
                "frame {} of video {}: {} trucks",
                frame.index,
                path.display(),
                result.count
            );
            counts.push(result.count);
        }

        if counts.is_empty() && status.is_ok() {
            log::error!("no readable frames in video {}", path.display());
            status = ProcessStatus::DecodeFailed;
        }

        let average = average_count(&counts);
        log::info!(
            "processed video {}: average {} trucks over {} frames",
            path.display(),
            average,
            source.stats().frames_captured
        );
        Outcome {
            count: average,
            output_path: None,
            status,
        }
    }
}
