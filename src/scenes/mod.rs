//! Scenes: data model, reconciliation, activation and the engine tying them
//! together

pub mod activation;
pub mod engine;
pub mod hash;
pub mod model;
pub mod reconcile;

pub use activation::{ActivationDriver, ActivationReport, ActivationTimings, SweepOutcome};
pub use engine::{
    ActivationSummary, CaptureRequest, LightControlRequest, SceneDiagnosis, SceneEngine,
    SceneUpdate,
};
pub use hash::entities_hash;
pub use model::{
    EntityConfig, IssueKind, LightAttributes, SceneConfiguration, SceneIssue, SceneMode, Snapshot,
};
pub use reconcile::{reconcile, LiveDevices, ResolutionSource, ResolvedScene};
