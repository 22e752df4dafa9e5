use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::detect::backend::{ClassFilter, DetectorBackend};
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Backend that replays a fixed script of detections, one entry per call,
/// wrapping around at the end. Used for tests and model-less demos.
pub struct ScriptedBackend {
    script: Vec<Vec<Detection>>,
    cursor: usize,
    calls: Arc<AtomicUsize>,
    fail: bool,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Vec<Detection>>) -> Self {
        Self {
            script,
            cursor: 0,
            calls: Arc::new(AtomicUsize::new(0)),
            fail: false,
        }
    }

    /// Script where call `i` returns `counts[i]` confident truck boxes.
    pub fn with_counts(counts: &[usize]) -> Self {
        let script = counts
            .iter()
            .map(|&count| {
                (0..count)
                    .map(|i| Detection {
                        x: 2.0 + (i % 8) as f32 * 12.0,
                        y: 2.0 + (i / 8) as f32 * 12.0,
                        width: 10.0,
                        height: 10.0,
                        class_id: ClassFilter::TRUCK,
                        confidence: 0.9,
                    })
                    .collect()
            })
            .collect();
        Self::new(script)
    }

    /// Backend whose every call errors.
    pub fn failing() -> Self {
        let mut backend = Self::new(Vec::new());
        backend.fail = true;
        backend
    }

    /// Shared call counter; clone it before handing the backend off.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(
        &mut self,
        _frame: &Frame,
        _classes: &ClassFilter,
        _confidence_threshold: f32,
    ) -> Result<Vec<Detection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("scripted failure"));
        }
        if self.script.is_empty() {
            return Ok(Vec::new());
        }
        let detections = self.script[self.cursor % self.script.len()].clone();
        self.cursor += 1;
        Ok(detections)
    }
}
