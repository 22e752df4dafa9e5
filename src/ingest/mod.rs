//! Frame sources.
//!
//! This module provides forward-only sources of decoded frames:
//! - Local video files (`FileSource`, FFmpeg with feature `ingest-file-ffmpeg`)
//! - RTSP streams (`RtspSource`, FFmpeg with feature `rtsp-ffmpeg`)
//! - Synthetic `stub://` sources for tests and demos (always available)
//!
//! Sources are finite and not restartable: `next_frame` yields frames until
//! it returns `Ok(None)` (end of media) or an error (read failure). Network
//! opens and reads are bounded by the configured stream timeout.

#[cfg(any(feature = "ingest-file-ffmpeg", feature = "rtsp-ffmpeg"))]
pub(crate) mod ffmpeg;
pub mod file;
pub mod rtsp;
mod synthetic;

pub use file::FileSource;
pub use rtsp::RtspSource;

/// URL scheme of synthetic sources.
pub const STUB_SCHEME: &str = "stub://";
