#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::{ClassFilter, DetectorBackend};
use crate::detect::result::{non_max_suppression, Detection};
use crate::frame::Frame;

const CXYWH_OFFSET: usize = 4;
const MAX_DETECTIONS: usize = 300;

/// Tract-based backend for YOLO-family ONNX detectors.
///
/// Expects a single output of shape `[1, 4 + classes, anchors]` where the
/// first four rows are centre-x, centre-y, width, height in model input
/// pixels and the remaining rows are per-class scores.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            iou_threshold: 0.7,
        })
    }

    /// Override the default NMS IoU threshold.
    pub fn with_iou_threshold(mut self, threshold: f32) -> Self {
        self.iou_threshold = threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let rgb = frame.to_rgb_image()?;
        let resized = if rgb.dimensions() == (self.width, self.height) {
            rgb
        } else {
            imageops::resize(&rgb, self.width, self.height, FilterType::Triangle)
        };

        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        Ok(input.into_tensor())
    }

    fn decode(
        &self,
        outputs: TVec<TValue>,
        frame: &Frame,
        classes: &ClassFilter,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let preds = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = preds.shape();
        if shape.len() != 3 || shape[0] != 1 || shape[1] <= CXYWH_OFFSET {
            return Err(anyhow!("unexpected detector output shape {:?}", shape));
        }
        let rows = shape[1];
        let anchors = shape[2];

        let scale_x = frame.width as f32 / self.width as f32;
        let scale_y = frame.height as f32 / self.height as f32;

        let mut candidates = Vec::new();
        for anchor in 0..anchors {
            let (class_id, confidence) = (CXYWH_OFFSET..rows)
                .map(|row| (row - CXYWH_OFFSET, preds[[0, row, anchor]]))
                .fold((0usize, f32::NEG_INFINITY), |best, item| {
                    if item.1 > best.1 {
                        item
                    } else {
                        best
                    }
                });
            let class_id = class_id as u32;
            if confidence < confidence_threshold || !classes.contains(class_id) {
                continue;
            }

            let cx = preds[[0, 0, anchor]] * scale_x;
            let cy = preds[[0, 1, anchor]] * scale_y;
            let w = preds[[0, 2, anchor]] * scale_x;
            let h = preds[[0, 3, anchor]] * scale_y;
            candidates.push(Detection {
                x: (cx - w / 2.0).clamp(0.0, frame.width as f32),
                y: (cy - h / 2.0).clamp(0.0, frame.height as f32),
                width: w,
                height: h,
                class_id,
                confidence,
            });
        }

        Ok(non_max_suppression(
            candidates,
            self.iou_threshold,
            MAX_DETECTIONS,
        ))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(
        &mut self,
        frame: &Frame,
        classes: &ClassFilter,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame, classes, confidence_threshold)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::from_rgb(
            vec![0u8; (self.width * self.height * 3) as usize],
            self.width,
            self.height,
            0,
        )?;
        let input = self.build_input(&blank)?;
        self.model
            .run(tvec!(input.into()))
            .context("ONNX warm-up inference failed")?;
        Ok(())
    }
}
