//! Container runtime plumbing
//!
//! Build containers are driven through the [`ContainerRuntime`] trait; the
//! shipped implementation shells out to podman or docker.

mod cli_runtime;
pub mod container;
mod factory;
mod runtime;

pub use cli_runtime::{CliRuntime, Engine};
pub use container::{BuildContainer, ContainerConfig, ExecOutput, ExecRequest, DEFAULT_PATH};
pub use factory::create_runtime;
pub use runtime::ContainerRuntime;

use tokio::io::{AsyncBufReadExt, BufReader};

/// Max number of output lines to include in command error messages.
const ERROR_TAIL_LINES: usize = 50;

/// Extract the useful tail of command output for error diagnostics.
///
/// Combines stdout and stderr, then returns the last `ERROR_TAIL_LINES`
/// lines so error messages are actionable without being overwhelming.
pub(crate) fn build_error_output(stdout: &str, stderr: &str) -> String {
    let lines: Vec<&str> = stdout.lines().chain(stderr.lines()).collect();
    let total = lines.len();
    let tail: Vec<&str> = if total > ERROR_TAIL_LINES {
        lines[total - ERROR_TAIL_LINES..].to_vec()
    } else {
        lines
    };
    tail.join("\n")
}

/// Stream stdout+stderr from a child process, calling `on_output` for each line.
///
/// Returns all collected output lines for error reporting. Streams that were
/// not piped are treated as already closed.
pub(crate) async fn stream_child_output(
    child: &mut tokio::process::Child,
    on_output: &(dyn Fn(String) + Send + Sync),
) -> Vec<String> {
    let mut stderr_reader = child.stderr.take().map(|s| BufReader::new(s).lines());
    let mut stdout_reader = child.stdout.take().map(|s| BufReader::new(s).lines());

    let mut all_output = Vec::new();
    let mut stderr_done = stderr_reader.is_none();
    let mut stdout_done = stdout_reader.is_none();

    while !stderr_done || !stdout_done {
        tokio::select! {
            line = async { stderr_reader.as_mut()?.next_line().await.ok().flatten() }, if !stderr_done => {
                match line {
                    Some(line) => {
                        on_output(line.clone());
                        all_output.push(line);
                    }
                    None => stderr_done = true,
                }
            }
            line = async { stdout_reader.as_mut()?.next_line().await.ok().flatten() }, if !stdout_done => {
                match line {
                    Some(line) => {
                        on_output(line.clone());
                        all_output.push(line);
                    }
                    None => stdout_done = true,
                }
            }
        }
    }

    all_output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_output_keeps_tail() {
        let stdout: String = (0..60).map(|i| format!("line {}\n", i)).collect();
        let tail = build_error_output(&stdout, "E: boom");
        let lines: Vec<&str> = tail.lines().collect();
        assert_eq!(lines.len(), ERROR_TAIL_LINES);
        assert_eq!(lines.last(), Some(&"E: boom"));
        assert_eq!(lines[0], "line 11");
    }

    #[test]
    fn error_output_short() {
        assert_eq!(build_error_output("a", "b"), "a\nb");
    }
}
