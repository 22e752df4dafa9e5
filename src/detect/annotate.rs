use anyhow::Result;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::detect::result::Detection;
use crate::frame::Frame;

const BOX_COLOR: Rgb<u8> = Rgb([255, 56, 56]);
const BOX_THICKNESS: i32 = 3;
/// Height of the confidence bar drawn on top of each box.
const TAG_HEIGHT: u32 = 6;

/// Draw a box around every detection on a copy of the frame.
///
/// Boxes are clipped to the image. A bar along the top edge of each box is
/// filled proportionally to the detection confidence.
pub fn annotate_detections(frame: &Frame, detections: &[Detection]) -> Result<RgbImage> {
    let mut canvas = frame.to_rgb_image()?;
    let (img_w, img_h) = canvas.dimensions();

    for det in detections {
        let Some((x, y, w, h)) = clip_box(det, img_w, img_h) else {
            continue;
        };
        for inset in 0..BOX_THICKNESS {
            let inner_w = w as i32 - 2 * inset;
            let inner_h = h as i32 - 2 * inset;
            if inner_w <= 0 || inner_h <= 0 {
                break;
            }
            let rect = Rect::at(x + inset, y + inset).of_size(inner_w as u32, inner_h as u32);
            draw_hollow_rect_mut(&mut canvas, rect, BOX_COLOR);
        }

        let tag_w = ((w as f32) * det.confidence.clamp(0.0, 1.0)).round() as u32;
        let tag_h = TAG_HEIGHT.min(h);
        if tag_w > 0 && tag_h > 0 {
            draw_filled_rect_mut(&mut canvas, Rect::at(x, y).of_size(tag_w, tag_h), BOX_COLOR);
        }
    }
    Ok(canvas)
}

fn clip_box(det: &Detection, img_w: u32, img_h: u32) -> Option<(i32, i32, u32, u32)> {
    let left = det.x.max(0.0);
    let top = det.y.max(0.0);
    let right = (det.x + det.width).min(img_w as f32);
    let bottom = (det.y + det.height).min(img_h as f32);
    if right - left < 1.0 || bottom - top < 1.0 {
        return None;
    }
    Some((
        left as i32,
        top as i32,
        (right - left) as u32,
        (bottom - top) as u32,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn black_frame(width: u32, height: u32) -> Frame {
        Frame::from_rgb(vec![0u8; (width * height * 3) as usize], width, height, 0).unwrap()
    }

    #[test]
    fn draws_box_edges_inside_image() {
        let frame = black_frame(40, 30);
        let det = Detection {
            x: 5.0,
            y: 5.0,
            width: 20.0,
            height: 15.0,
            class_id: 17,
            confidence: 0.5,
        };
        let img = annotate_detections(&frame, &[det]).unwrap();
        assert_eq!(*img.get_pixel(5, 12), BOX_COLOR);
        assert_eq!(*img.get_pixel(15, 12), Rgb([0, 0, 0]));
        assert_eq!(*img.get_pixel(0, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn skips_boxes_outside_image() {
        let frame = black_frame(10, 10);
        let det = Detection {
            x: 50.0,
            y: 50.0,
            width: 5.0,
            height: 5.0,
            class_id: 17,
            confidence: 0.9,
        };
        let img = annotate_detections(&frame, &[det]).unwrap();
        assert!(img.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }
}
