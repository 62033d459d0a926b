//! Podman/Docker CLI container runtime
//!
//! Implements the ContainerRuntime trait by invoking the engine binary
//! directly. Both engines accept the same flags for everything used here.

use crate::error::{SandkitError, SandkitResult};
use crate::orchestration::container::{ContainerConfig, ExecOutput, ExecRequest};
use crate::orchestration::runtime::ContainerRuntime;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Container engine binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Podman,
    Docker,
}

impl Engine {
    pub fn parse(name: &str) -> SandkitResult<Self> {
        match name {
            "podman" => Ok(Self::Podman),
            "docker" => Ok(Self::Docker),
            other => Err(SandkitError::RuntimeNotFound(format!(
                "unsupported engine '{}'",
                other
            ))),
        }
    }

    pub fn binary(&self) -> &'static str {
        match self {
            Self::Podman => "podman",
            Self::Docker => "docker",
        }
    }
}

/// Container runtime driving the podman or docker CLI
pub struct CliRuntime {
    engine: Engine,
}

impl CliRuntime {
    /// Create a runtime for an engine
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    /// Execute an engine command and return the output
    async fn run_cli(&self, args: &[&str]) -> SandkitResult<std::process::Output> {
        let binary = self.engine.binary();
        debug!("Executing: {} {:?}", binary, args);

        Command::new(binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| SandkitError::command_spawn(format!("{} {:?}", binary, args), e))
    }

    fn failure(&self, command: &str, output: &std::process::Output) -> SandkitError {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        SandkitError::CommandFailure {
            command: format!("{} {}", self.engine.binary(), command),
            code: output.status.code().unwrap_or(-1),
            output: super::build_error_output(&stdout, &stderr),
        }
    }
}

/// Arguments for `run -d` starting a build container
fn create_args(config: &ContainerConfig) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        config.name.clone(),
    ];

    for (k, v) in &config.labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", k, v));
    }

    for mount in &config.mounts {
        args.push("-v".to_string());
        args.push(mount.clone());
    }

    // Keep-alive process, independent of the base image's own entrypoint
    if let Some((entrypoint, rest)) = config.command.split_first() {
        args.push("--entrypoint".to_string());
        args.push(entrypoint.clone());
        args.push(config.image.clone());
        args.extend(rest.iter().cloned());
    } else {
        args.push(config.image.clone());
    }

    args
}

/// Arguments for `exec` running one request
fn exec_args(container_id: &str, request: &ExecRequest) -> Vec<String> {
    let mut args = vec!["exec".to_string()];

    if let Some(workdir) = &request.workdir {
        args.push("-w".to_string());
        args.push(workdir.clone());
    }

    for (k, v) in &request.env {
        args.push("-e".to_string());
        args.push(format!("{}={}", k, v));
    }

    args.push(container_id.to_string());
    args.extend(request.argv.iter().cloned());
    args
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    async fn is_available(&self) -> SandkitResult<bool> {
        let status = Command::new(self.engine.binary())
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        Ok(status.map(|s| s.success()).unwrap_or(false))
    }

    async fn image_exists(&self, image: &str) -> SandkitResult<bool> {
        let output = self.run_cli(&["image", "inspect", image]).await?;
        Ok(output.status.success())
    }

    async fn pull(&self, image: &str) -> SandkitResult<()> {
        info!("Pulling image: {}", image);

        let output = self.run_cli(&["pull", image]).await?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(SandkitError::ImagePull {
                image: image.to_string(),
                reason: stderr.trim().to_string(),
            })
        }
    }

    async fn create(&self, config: &ContainerConfig) -> SandkitResult<String> {
        let args = create_args(config);
        let args_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run_cli(&args_refs).await?;

        if output.status.success() {
            let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
            info!(
                "Build container started: {}",
                &container_id[..12.min(container_id.len())]
            );
            Ok(container_id)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(SandkitError::ContainerStart(stderr.trim().to_string()))
        }
    }

    async fn exec(
        &self,
        container_id: &str,
        request: &ExecRequest,
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> SandkitResult<ExecOutput> {
        let binary = self.engine.binary();
        let args = exec_args(container_id, request);
        debug!("Executing in container: {} {:?}", binary, request.argv);

        let mut child = Command::new(binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SandkitError::command_spawn(format!("{} exec", binary), e))?;

        let lines = super::stream_child_output(&mut child, on_output).await;

        let status = child
            .wait()
            .await
            .map_err(|e| SandkitError::command_spawn(format!("{} exec", binary), e))?;

        Ok(ExecOutput {
            exit_code: status.code().unwrap_or(-1),
            lines,
        })
    }

    async fn commit(&self, container_id: &str, tag: &str, changes: &[String]) -> SandkitResult<String> {
        let mut args = vec!["commit".to_string()];
        for change in changes {
            args.push("--change".to_string());
            args.push(change.clone());
        }
        args.push(container_id.to_string());
        args.push(tag.to_string());

        let args_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run_cli(&args_refs).await?;

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            // Podman prints progress before the ID, docker only the ID
            let image_id = stdout.lines().last().unwrap_or_default().trim().to_string();
            info!("Committed {} ({})", tag, &image_id[..image_id.len().min(19)]);
            Ok(image_id)
        } else {
            let err = self.failure("commit", &output);
            Err(SandkitError::ImageCommit {
                tag: tag.to_string(),
                reason: err.to_string(),
            })
        }
    }

    async fn remove(&self, container_id: &str) -> SandkitResult<()> {
        debug!("Removing container: {}", container_id);

        let output = self.run_cli(&["rm", "-f", container_id]).await?;

        if output.status.success() {
            Ok(())
        } else {
            // Ignore error if container doesn't exist
            let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
            if stderr.contains("no such container") {
                Ok(())
            } else {
                Err(self.failure("rm", &output))
            }
        }
    }

    fn runtime_name(&self) -> &'static str {
        match self.engine {
            Engine::Podman => "Podman",
            Engine::Docker => "Docker",
        }
    }
}
