//! Local video file source.
//!
//! `FileSource` reads frames from a local video file (no network access).
//! `stub://` paths produce synthetic clips; anything else needs the
//! `ingest-file-ffmpeg` feature.

use anyhow::{anyhow, Result};

#[cfg(feature = "ingest-file-ffmpeg")]
use super::ffmpeg::FfmpegSource;
use super::synthetic::SyntheticSource;
use super::STUB_SCHEME;
use crate::frame::Frame;

/// Frames in a synthetic clip when the stub path does not say otherwise.
const DEFAULT_STUB_FRAMES: u64 = 10;

/// Configuration for a local file source.
#[derive(Clone, Debug, Default)]
pub struct FileConfig {
    /// Local file path (e.g., "static/uploads/clip.mp4").
    pub path: String,
}

/// Local file frame source.
pub struct FileSource {
    config: FileConfig,
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegSource),
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes)"
            ));
        }
        if config.path.starts_with(STUB_SCHEME) {
            let source = SyntheticSource::parse(&config.path, Some(DEFAULT_STUB_FRAMES))?;
            Ok(Self {
                config,
                backend: FileBackend::Synthetic(source),
            })
        } else {
            #[cfg(feature = "ingest-file-ffmpeg")]
            {
                let source = FfmpegSource::open(&config.path, None)?;
                Ok(Self {
                    config,
                    backend: FileBackend::Ffmpeg(source),
                })
            }
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            {
                Err(anyhow!(
                    "video decoding of {} requires the ingest-file-ffmpeg feature",
                    config.path
                ))
            }
        }
    }

    /// Prepare the source for reading.
    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(_) => {
                log::info!("FileSource: reading {} (ffmpeg)", self.config.path);
                Ok(())
            }
        }
    }

    /// Next decoded frame, `Ok(None)` at end of file.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    /// Get frame statistics.
    pub fn stats(&self) -> FileStats {
        let frames_captured = match &self.backend {
            FileBackend::Synthetic(source) => source.frames_captured(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.frames_captured(),
        };
        FileStats {
            frames_captured,
            path: self.config.path.clone(),
        }
    }
}

/// Statistics for a file source.
#[derive(Clone, Debug)]
pub struct FileStats {
    pub frames_captured: u64,
    pub path: String,
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with(STUB_SCHEME) {
        return true;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_urls_and_empty_paths() {
        assert!(FileSource::new(FileConfig {
            path: "rtsp://camera/stream".to_string()
        })
        .is_err());
        assert!(FileSource::new(FileConfig {
            path: "  ".to_string()
        })
        .is_err());
    }

    #[test]
    fn stub_file_reads_default_clip() -> Result<()> {
        let mut source = FileSource::new(FileConfig {
            path: "stub://clip".to_string(),
        })?;
        source.connect()?;
        let mut frames = 0;
        while source.next_frame()?.is_some() {
            frames += 1;
        }
        assert_eq!(frames, DEFAULT_STUB_FRAMES);
        assert_eq!(source.stats().frames_captured, DEFAULT_STUB_FRAMES);
        Ok(())
    }
}
