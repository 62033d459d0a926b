//! Build state machine and results

use crate::binder::ImageManifest;
use crate::error::{ErrorKind, SandkitError};
use crate::executor::StepOutcome;
use crate::plan::Step;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Orchestrator state. Step indices are 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BuildState {
    Pending,
    Resolving,
    Preparing,
    Executing { step: usize },
    Retrying { step: usize, attempt: u32 },
    Binding,
    Succeeded,
    Failed { step: Option<usize> },
    Cancelled,
}

impl BuildState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed { .. } | Self::Cancelled)
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Resolving => write!(f, "resolving"),
            Self::Preparing => write!(f, "preparing"),
            Self::Executing { step } => write!(f, "executing({})", step),
            Self::Retrying { step, attempt } => write!(f, "retrying({}, attempt {})", step, attempt),
            Self::Binding => write!(f, "binding"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed { step: Some(step) } => write!(f, "failed({})", step),
            Self::Failed { step: None } => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One entry of the state history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    #[serde(flatten)]
    pub state: BuildState,
    pub at: DateTime<Utc>,
}

/// Terminal build status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A step that completed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub id: String,
    pub description: String,
    /// Attempts used, the successful one included
    pub attempts: u32,
    pub outcome: StepOutcome,
}

/// Where and why a build stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedStep {
    /// Unset when the build failed outside any step
    pub index: Option<usize>,
    pub step_id: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
    pub attempts: u32,
}

/// Outcome of one build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildResult {
    pub build_id: Uuid,
    pub image_name: String,
    pub status: BuildStatus,
    pub succeeded_steps: Vec<StepRecord>,
    pub failed_step: Option<FailedStep>,
    pub final_env: BTreeMap<String, String>,
    pub final_entrypoint: Vec<String>,
    pub image: Option<ImageManifest>,
    pub transitions: Vec<Transition>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BuildResult {
    pub fn is_success(&self) -> bool {
        self.status == BuildStatus::Succeeded
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// Steps that needed more than one attempt
    pub fn retried_steps(&self) -> impl Iterator<Item = &StepRecord> {
        self.succeeded_steps.iter().filter(|s| s.attempts > 1)
    }

    /// Short id for display
    pub fn short_id(&self) -> String {
        self.build_id.to_string()[..8].to_string()
    }
}

/// Accumulates a build's history. Only the orchestrator holds one.
pub(crate) struct BuildRecorder {
    build_id: Uuid,
    image_name: String,
    state: BuildState,
    succeeded: Vec<StepRecord>,
    transitions: Vec<Transition>,
    started_at: DateTime<Utc>,
}

impl BuildRecorder {
    pub(crate) fn new(image_name: &str) -> Self {
        let started_at = Utc::now();
        Self {
            build_id: Uuid::new_v4(),
            image_name: image_name.to_string(),
            state: BuildState::Pending,
            succeeded: Vec::new(),
            transitions: vec![Transition {
                state: BuildState::Pending,
                at: started_at,
            }],
            started_at,
        }
    }

    pub(crate) fn build_id(&self) -> Uuid {
        self.build_id
    }

    pub(crate) fn state(&self) -> BuildState {
        self.state
    }

    pub(crate) fn succeeded_steps(&self) -> &[StepRecord] {
        &self.succeeded
    }

    pub(crate) fn transition(&mut self, state: BuildState) {
        debug!("[{}] {} -> {}", self.image_name, self.state, state);
        self.state = state;
        self.transitions.push(Transition {
            state,
            at: Utc::now(),
        });
    }

    pub(crate) fn step_succeeded(&mut self, step: &Step, attempts: u32, outcome: StepOutcome) {
        info!(
            "[{}] step {} {} after {} attempt(s)",
            self.image_name, step.id, outcome, attempts
        );
        self.succeeded.push(StepRecord {
            index: step.index,
            id: step.id.clone(),
            description: step.description.clone(),
            attempts,
            outcome,
        });
    }

    pub(crate) fn succeed(mut self, manifest: ImageManifest) -> BuildResult {
        self.transition(BuildState::Succeeded);
        info!("[{}] build succeeded: {}", self.image_name, manifest.tag);
        let final_env = manifest.env.clone();
        let final_entrypoint = manifest.entrypoint.clone();
        self.finish(BuildStatus::Succeeded, None, final_env, final_entrypoint, Some(manifest))
    }

    /// Fail the build. A cancellation error ends it `Cancelled` instead.
    pub(crate) fn fail(self, step: Option<&Step>, err: &SandkitError, attempts: u32) -> BuildResult {
        if matches!(err, SandkitError::Cancelled) {
            return self.cancel();
        }

        let mut this = self;
        let index = step.map(|s| s.index);
        this.transition(BuildState::Failed { step: index });
        warn!("[{}] build failed: {}", this.image_name, err);

        let failed = FailedStep {
            index,
            step_id: step.map(|s| s.id.clone()),
            kind: err.kind(),
            message: err.to_string(),
            attempts,
        };
        this.finish(BuildStatus::Failed, Some(failed), BTreeMap::new(), Vec::new(), None)
    }

    pub(crate) fn cancel(mut self) -> BuildResult {
        self.transition(BuildState::Cancelled);
        warn!("[{}] build cancelled", self.image_name);
        self.finish(BuildStatus::Cancelled, None, BTreeMap::new(), Vec::new(), None)
    }

    fn finish(
        self,
        status: BuildStatus,
        failed_step: Option<FailedStep>,
        final_env: BTreeMap<String, String>,
        final_entrypoint: Vec<String>,
        image: Option<ImageManifest>,
    ) -> BuildResult {
        BuildResult {
            build_id: self.build_id,
            image_name: self.image_name,
            status,
            succeeded_steps: self.succeeded,
            failed_step,
            final_env,
            final_entrypoint,
            image,
            transitions: self.transitions,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}
