//! RTSP frame source.
//!
//! This module provides `RtspSource` for grabbing frames from IP cameras.
//! Real streams are decoded with FFmpeg (feature `rtsp-ffmpeg`); `stub://`
//! URLs produce synthetic frames. Opening and reading honour the configured
//! timeout; there is no reconnect policy.

use anyhow::Result;
#[cfg(not(feature = "rtsp-ffmpeg"))]
use anyhow::anyhow;
use std::time::Duration;

#[cfg(feature = "rtsp-ffmpeg")]
use super::ffmpeg::FfmpegSource;
use super::synthetic::SyntheticSource;
use super::STUB_SCHEME;
use crate::frame::Frame;

/// Configuration for an RTSP source.
#[derive(Clone, Debug)]
pub struct RtspConfig {
    /// RTSP URL (e.g., "rtsp://192.168.1.100:554/stream")
    pub url: String,
    /// Socket timeout for opening the stream and reading packets.
    pub timeout: Duration,
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            url: "rtsp://localhost:554/stream".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// RTSP frame source.
pub struct RtspSource {
    config: RtspConfig,
    backend: RtspBackend,
}

enum RtspBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "rtsp-ffmpeg")]
    Ffmpeg(Option<FfmpegSource>),
}

impl RtspSource {
    pub fn new(config: RtspConfig) -> Result<Self> {
        if config.url.trim().is_empty() {
            anyhow::bail!("RTSP URL is empty");
        }
        if config.url.starts_with(STUB_SCHEME) {
            let source = SyntheticSource::parse(&config.url, None)?;
            Ok(Self {
                config,
                backend: RtspBackend::Synthetic(source),
            })
        } else {
            #[cfg(feature = "rtsp-ffmpeg")]
            {
                Ok(Self {
                    config,
                    backend: RtspBackend::Ffmpeg(None),
                })
            }
            #[cfg(not(feature = "rtsp-ffmpeg"))]
            {
                Err(anyhow!(
                    "RTSP decoding of {} requires the rtsp-ffmpeg feature",
                    config.url
                ))
            }
        }
    }

    /// Connect to the stream.
    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "rtsp-ffmpeg")]
            RtspBackend::Ffmpeg(slot) => {
                *slot = Some(FfmpegSource::open(&self.config.url, Some(self.config.timeout))?);
                log::info!("RtspSource: connected to {}", self.config.url);
                Ok(())
            }
        }
    }

    /// Capture the next frame; `Ok(None)` when the stream ended.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "rtsp-ffmpeg")]
            RtspBackend::Ffmpeg(slot) => match slot {
                Some(source) => source.next_frame(),
                None => anyhow::bail!("RTSP stream {} is not connected", self.config.url),
            },
        }
    }

    /// Get frame statistics.
    pub fn stats(&self) -> RtspStats {
        let frames_captured = match &self.backend {
            RtspBackend::Synthetic(source) => source.frames_captured(),
            #[cfg(feature = "rtsp-ffmpeg")]
            RtspBackend::Ffmpeg(slot) => slot
                .as_ref()
                .map(|source| source.frames_captured())
                .unwrap_or(0),
        };
        RtspStats {
            frames_captured,
            url: self.config.url.clone(),
        }
    }
}

/// Statistics for an RTSP source.
#[derive(Clone, Debug)]
pub struct RtspStats {
    pub frames_captured: u64,
    pub url: String,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config(url: &str) -> RtspConfig {
        RtspConfig {
            url: url.to_string(),
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn rtsp_source_produces_frames() -> Result<()> {
        let mut source = RtspSource::new(stub_config("stub://gate?width=32&height=16"))?;
        source.connect()?;

        let frame = source.next_frame()?.expect("frame");
        assert_eq!(frame.width, 32);
        assert_eq!(frame.height, 16);
        assert_eq!(source.stats().frames_captured, 1);

        Ok(())
    }

    #[test]
    fn rtsp_source_rejects_empty_url() {
        assert!(RtspSource::new(stub_config("")).is_err());
    }

    #[test]
    fn unreachable_stream_fails_to_connect() -> Result<()> {
        let mut source = RtspSource::new(stub_config("stub://gate?unreachable=1"))?;
        assert!(source.connect().is_err());
        Ok(())
    }
}
