//! Runtime factory
//!
//! Creates the container runtime selected by `runtime.engine`.

use crate::config::schema::RuntimeConfig;
use crate::error::SandkitResult;
use crate::orchestration::cli_runtime::{CliRuntime, Engine};
use crate::orchestration::runtime::ContainerRuntime;
use std::sync::Arc;

/// Create the configured container runtime
pub fn create_runtime(config: &RuntimeConfig) -> SandkitResult<Arc<dyn ContainerRuntime>> {
    let engine = Engine::parse(&config.engine)?;
    Ok(Arc::new(CliRuntime::new(engine)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_runtime_default_is_podman() {
        let runtime = create_runtime(&RuntimeConfig::default()).unwrap();
        assert_eq!(runtime.runtime_name(), "Podman");
    }

    #[test]
    fn create_runtime_rejects_unknown_engine() {
        let config = RuntimeConfig {
            engine: "containerd".to_string(),
            ..RuntimeConfig::default()
        };
        assert!(create_runtime(&config).is_err());
    }
}
