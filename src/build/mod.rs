//! Build orchestration, results and history

mod orchestrator;
pub mod record;
pub(crate) mod result;
mod retry;

pub use orchestrator::{BuildEvent, CancelToken, Orchestrator};
pub use record::BuildHistory;
pub use result::{BuildResult, BuildState, BuildStatus, FailedStep, StepRecord, Transition};
pub use retry::RetryPolicy;
