//! Synthetic `stub://` frame source.
//!
//! Parameters are passed as query pairs:
//! `stub://name?frames=5&width=64&height=48&fail_after=3&unreachable=1`.

use anyhow::{anyhow, bail, Context, Result};

use crate::frame::Frame;

const DEFAULT_WIDTH: u32 = 64;
const DEFAULT_HEIGHT: u32 = 48;
/// Largest accepted stub width or height.
const MAX_DIMENSION: u32 = 4096;

pub(crate) struct SyntheticSource {
    location: String,
    /// `None` means endless.
    frames: Option<u64>,
    width: u32,
    height: u32,
    fail_after: Option<u64>,
    unreachable: bool,
    connected: bool,
    frame_count: u64,
}

impl SyntheticSource {
    pub(crate) fn parse(location: &str, default_frames: Option<u64>) -> Result<Self> {
        let url = url::Url::parse(location)
            .with_context(|| format!("invalid stub location '{}'", location))?;
        if url.scheme() != "stub" {
            bail!("'{}' is not a stub:// location", location);
        }

        let mut source = Self {
            location: location.to_string(),
            frames: default_frames,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fail_after: None,
            unreachable: false,
            connected: false,
            frame_count: 0,
        };
        for (key, value) in url.query_pairs() {
            let invalid = || anyhow!("invalid stub parameter {}={}", key, value);
            match key.as_ref() {
                "frames" => source.frames = Some(value.parse().map_err(|_| invalid())?),
                "width" => source.width = value.parse().map_err(|_| invalid())?,
                "height" => source.height = value.parse().map_err(|_| invalid())?,
                "fail_after" => source.fail_after = Some(value.parse().map_err(|_| invalid())?),
                "unreachable" => source.unreachable = matches!(value.as_ref(), "1" | "true"),
                _ => return Err(anyhow!("unknown stub parameter '{}'", key)),
            }
        }
        if source.width == 0 || source.height == 0 {
            bail!("stub frame size must be non-zero");
        }
        if source.width > MAX_DIMENSION || source.height > MAX_DIMENSION {
            bail!(
                "stub frame size {}x{} exceeds {}x{}",
                source.width,
                source.height,
                MAX_DIMENSION,
                MAX_DIMENSION
            );
        }
        Ok(source)
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        if self.unreachable {
            bail!("stub source {} is unreachable", self.location);
        }
        self.connected = true;
        log::info!("connected to {} (synthetic)", self.location);
        Ok(())
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            bail!("stub source {} is not connected", self.location);
        }
        if self.fail_after.is_some_and(|limit| self.frame_count >= limit) {
            bail!(
                "synthetic read failure after {} frames from {}",
                self.frame_count,
                self.location
            );
        }
        if self.frames.is_some_and(|total| self.frame_count >= total) {
            return Ok(None);
        }

        let pixels = self.generate_pixels()?;
        let frame = Frame::from_rgb(pixels, self.width, self.height, self.frame_count)?;
        self.frame_count += 1;
        Ok(Some(frame))
    }

    pub(crate) fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    /// Gradient that shifts with the frame index, plus a little noise.
    fn generate_pixels(&self) -> Result<Vec<u8>> {
        let pixel_count = (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("stub frame size overflows"))?;
        let noise: u8 = rand::random::<u8>() % 4;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count) % 256) as u8 ^ noise;
        }
        Ok(pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_parameters() {
        let source = SyntheticSource::parse("stub://cam?frames=3&width=8&height=4", None).unwrap();
        assert_eq!(source.frames, Some(3));
        assert_eq!((source.width, source.height), (8, 4));
        assert!(SyntheticSource::parse("stub://cam?bogus=1", None).is_err());
        assert!(SyntheticSource::parse("stub://cam?width=0", None).is_err());
        assert!(SyntheticSource::parse("stub://cam?width=70000&height=70000", None).is_err());
        assert!(SyntheticSource::parse("stub://cam?width=4097", None).is_err());
        assert!(SyntheticSource::parse("stub://cam?width=4096&height=1", None).is_ok());
        assert!(SyntheticSource::parse("rtsp://cam", None).is_err());
    }

    #[test]
    fn yields_finite_sequence() {
        let mut source = SyntheticSource::parse("stub://clip?frames=2", None).unwrap();
        source.connect().unwrap();
        assert_eq!(source.next_frame().unwrap().unwrap().index, 0);
        assert_eq!(source.next_frame().unwrap().unwrap().index, 1);
        assert!(source.next_frame().unwrap().is_none());
        assert_eq!(source.frames_captured(), 2);
    }

    #[test]
    fn unreachable_and_failing_sources() {
        let mut offline = SyntheticSource::parse("stub://cam?unreachable=1", None).unwrap();
        assert!(offline.connect().is_err());

        let mut flaky = SyntheticSource::parse("stub://cam?fail_after=1", None).unwrap();
        flaky.connect().unwrap();
        assert!(flaky.next_frame().unwrap().is_some());
        assert!(flaky.next_frame().is_err());
    }
}
