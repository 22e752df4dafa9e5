//! Decoded frames.
//!
//! Every media source (still image, video file, RTSP stream) is reduced to a
//! `Frame`: a packed RGB24 raster plus its dimensions and its position in the
//! source. Detector backends read frames; the annotation step turns a frame
//! back into an `image::RgbImage`.

use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, RgbImage};
use std::path::Path;

/// Packed RGB24 frame.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Zero-based position in the source (always 0 for still images).
    pub index: u64,
}

impl Frame {
    /// Wrap packed RGB bytes. The buffer length must be exactly `width * height * 3`.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32, index: u64) -> Result<Self> {
        let expected_len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected_len {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected_len,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            index,
        })
    }

    pub fn from_image(image: DynamicImage, index: u64) -> Self {
        let rgb = image.into_rgb8();
        let (width, height) = rgb.dimensions();
        Self {
            data: rgb.into_raw(),
            width,
            height,
            index,
        }
    }

    /// Decode a still image from disk (format guessed from content).
    pub fn open(path: &Path) -> Result<Self> {
        let image = image::ImageReader::open(path)
            .with_context(|| format!("failed to open image {}", path.display()))?
            .with_guessed_format()
            .with_context(|| format!("failed to read image header {}", path.display()))?
            .decode()
            .with_context(|| format!("failed to decode image {}", path.display()))?;
        Ok(Self::from_image(image, 0))
    }

    /// Read-only pixel slice, row-major RGB.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb_rejects_short_buffers() {
        assert!(Frame::from_rgb(vec![0u8; 11], 2, 2, 0).is_err());
        let frame = Frame::from_rgb(vec![0u8; 12], 2, 2, 3).unwrap();
        assert_eq!(frame.index, 3);
        assert_eq!(frame.pixels().len(), 12);
    }

    #[test]
    fn open_decodes_png_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dot.png");
        RgbImage::from_pixel(4, 3, image::Rgb([10, 20, 30]))
            .save(&path)
            .unwrap();

        let frame = Frame::open(&path).unwrap();
        assert_eq!((frame.width, frame.height), (4, 3));
        assert_eq!(&frame.pixels()[..3], &[10, 20, 30]);
        assert_eq!(frame.to_rgb_image().unwrap().dimensions(), (4, 3));
    }

    #[test]
    fn open_fails_on_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not an image").unwrap();
        assert!(Frame::open(&path).is_err());
    }
}
