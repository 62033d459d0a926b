//! Build container types
//!
//! Data structures passed to container runtimes. The execution logic lives in
//! the runtime implementations.

use std::collections::BTreeMap;

/// PATH used when the base image does not report one
pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Label marking containers created by sandkit
pub const BUILD_LABEL: &str = "io.sandkit.build";

/// Configuration for a new build container
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Image to start from
    pub image: String,
    /// Container name
    pub name: String,
    /// Bind mounts (host:container format)
    pub mounts: Vec<String>,
    /// Labels attached to the container
    pub labels: BTreeMap<String, String>,
    /// Keep-alive command; the first element becomes the entrypoint
    pub command: Vec<String>,
}

/// A command to run inside a build container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecRequest {
    pub argv: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub workdir: Option<String>,
}

impl ExecRequest {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            ..Self::default()
        }
    }

    /// Run `script` through `sh -c`
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new(vec!["sh".to_string(), "-c".to_string(), script.into()])
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Human-readable command line for logs and errors
    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

/// Result of a command run in a build container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    /// Combined stdout and stderr lines, in arrival order
    pub lines: Vec<String>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout(&self) -> String {
        self.lines.join("\n")
    }
}

/// A running build container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContainer {
    /// Container ID
    pub id: String,
    /// PATH reported by the base image
    pub base_path: String,
}

impl BuildContainer {
    /// PATH for a step: earlier tools' bin dirs ahead of the base PATH
    pub fn path_with(&self, bin_dirs: &[String]) -> String {
        bin_dirs
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.base_path.as_str()))
            .collect::<Vec<_>>()
            .join(":")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_request() {
        let request = ExecRequest::shell("apt-get update");
        assert_eq!(request.argv, vec!["sh", "-c", "apt-get update"]);
        assert_eq!(request.display(), "sh -c apt-get update");
        assert!(request.workdir.is_none());
    }

    #[test]
    fn path_prepends_bin_dirs() {
        let container = BuildContainer {
            id: "abc".to_string(),
            base_path: "/usr/bin:/bin".to_string(),
        };
        assert_eq!(container.path_with(&[]), "/usr/bin:/bin");
        assert_eq!(
            container.path_with(&["/opt/java/jdk-21/bin".to_string(), "/opt/maven/bin".to_string()]),
            "/opt/java/jdk-21/bin:/opt/maven/bin:/usr/bin:/bin"
        );
    }

    #[test]
    fn exec_output_success() {
        let output = ExecOutput {
            exit_code: 0,
            lines: vec!["a".to_string(), "b".to_string()],
        };
        assert!(output.success());
        assert_eq!(output.stdout(), "a\nb");
        assert!(!ExecOutput {
            exit_code: 100,
            lines: vec![]
        }
        .success());
    }
}
