mod adapter;
mod annotate;
mod backend;
mod backends;
mod result;

pub use adapter::{FrameOutcome, TruckDetector};
pub use annotate::annotate_detections;
pub use backend::{ClassFilter, DetectorBackend};
pub use backends::{load_backend, ScriptedBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{non_max_suppression, Detection};
