//! Container runtime abstraction
//!
//! Provides a trait for the container operations a build needs, so the
//! orchestrator can drive podman, docker, or a test double.

use crate::error::SandkitResult;
use crate::orchestration::container::{ContainerConfig, ExecOutput, ExecRequest};
use async_trait::async_trait;

/// Abstract container runtime interface
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check if the runtime is available on this system
    async fn is_available(&self) -> SandkitResult<bool>;

    /// Check if an image exists locally
    async fn image_exists(&self, image: &str) -> SandkitResult<bool>;

    /// Pull an image
    async fn pull(&self, image: &str) -> SandkitResult<()>;

    /// Start a detached build container and return its ID
    async fn create(&self, config: &ContainerConfig) -> SandkitResult<String>;

    /// Run a command in a container, streaming each output line to `on_output`.
    ///
    /// A non-zero exit is reported through [`ExecOutput::exit_code`], not as an error.
    async fn exec(
        &self,
        container_id: &str,
        request: &ExecRequest,
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> SandkitResult<ExecOutput>;

    /// Commit a container to an image with `--change` instructions, returning the image ID
    async fn commit(&self, container_id: &str, tag: &str, changes: &[String]) -> SandkitResult<String>;

    /// Remove a container, ignoring one that is already gone
    async fn remove(&self, container_id: &str) -> SandkitResult<()>;

    /// Get the human-readable runtime name for display
    fn runtime_name(&self) -> &'static str;
}
