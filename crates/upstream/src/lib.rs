//! Narrow clients for the external collaborators the pipeline reads from:
//! the Asset service (read-only hydration and search) and the Automation
//! service (plan dispatch and status polling).

pub mod assets;
pub mod automation;

pub use assets::AssetClient;
pub use automation::{AutomationClient, ExecutionState, ExecutionStatusReport, StepObservation};
