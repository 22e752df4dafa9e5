pub mod scripted;

#[cfg(feature = "backend-tract")]
pub mod tract;

use anyhow::Result;

use crate::config::{BackendKind, ModelSettings};
use crate::detect::backend::DetectorBackend;

pub use scripted::ScriptedBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

/// Build the configured backend.
///
/// Returns `None` when the model cannot be loaded; the service keeps running
/// and reports every request as `model_unavailable`.
pub fn load_backend(settings: &ModelSettings) -> Option<Box<dyn DetectorBackend>> {
    let loaded: Result<Box<dyn DetectorBackend>> = match settings.backend {
        BackendKind::Scripted => Ok(Box::new(ScriptedBackend::with_counts(
            &settings.scripted_counts,
        ))),
        BackendKind::Tract => load_tract(settings),
    };

    match loaded {
        Ok(mut backend) => {
            if let Err(err) = backend.warm_up() {
                log::warn!("detector '{}' warm-up failed: {:#}", backend.name(), err);
            }
            log::info!(
                "detector '{}' loaded from {}",
                backend.name(),
                settings.path.display()
            );
            Some(backend)
        }
        Err(err) => {
            log::error!(
                "failed to load detector model {}: {:#}; detection disabled",
                settings.path.display(),
                err
            );
            None
        }
    }
}

#[cfg(feature = "backend-tract")]
fn load_tract(settings: &ModelSettings) -> Result<Box<dyn DetectorBackend>> {
    let backend = TractBackend::new(&settings.path, settings.input_width, settings.input_height)?
        .with_iou_threshold(settings.iou_threshold);
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn load_tract(_settings: &ModelSettings) -> Result<Box<dyn DetectorBackend>> {
    anyhow::bail!("ONNX inference requires the backend-tract feature")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_backend_loads_without_model_file() {
        let settings = ModelSettings {
            backend: BackendKind::Scripted,
            scripted_counts: vec![2],
            ..ModelSettings::default()
        };
        let backend = load_backend(&settings).expect("scripted backend");
        assert_eq!(backend.name(), "scripted");
    }

    #[test]
    fn missing_model_file_disables_detection() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ModelSettings {
            backend: BackendKind::Tract,
            path: dir.path().join("absent.onnx"),
            ..ModelSettings::default()
        };
        assert!(load_backend(&settings).is_none());
    }
}
