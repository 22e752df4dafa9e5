use anyhow::{anyhow, Result};
use std::collections::BTreeSet;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Set of model class ids that are counted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassFilter {
    classes: BTreeSet<u32>,
}

impl ClassFilter {
    /// Class id of "truck" in the deployed model.
    pub const TRUCK: u32 = 17;

    pub fn new<I: IntoIterator<Item = u32>>(classes: I) -> Result<Self> {
        let classes: BTreeSet<u32> = classes.into_iter().collect();
        if classes.is_empty() {
            return Err(anyhow!("class filter must name at least one class"));
        }
        Ok(Self { classes })
    }

    pub fn single(class_id: u32) -> Self {
        Self {
            classes: BTreeSet::from([class_id]),
        }
    }

    pub fn trucks() -> Self {
        Self::single(Self::TRUCK)
    }

    pub fn contains(&self, class_id: u32) -> bool {
        self.classes.contains(&class_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.classes.iter().copied()
    }
}

impl Default for ClassFilter {
    fn default() -> Self {
        Self::trucks()
    }
}

/// Detector backend trait.
///
/// A backend is the opaque detection capability: given a frame it returns
/// regions with class ids and confidences. Backends are expected to honour
/// the class filter and threshold, but callers must not rely on it; the
/// counting adapter filters again.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(
        &mut self,
        frame: &Frame,
        classes: &ClassFilter,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
