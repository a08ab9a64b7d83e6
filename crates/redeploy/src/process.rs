//! Child process helpers shared by the git and container engine wrappers.

use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::runlog::RunLog;

/// Captured result of a finished command.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Stderr and stdout combined for error messages.
    pub fn error_text(&self) -> String {
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();

        match (stderr.is_empty(), stdout.is_empty()) {
            (true, true) => format!(
                "Command failed with exit code {}",
                self.status.code().unwrap_or(-1)
            ),
            (true, false) => stdout.to_string(),
            (false, true) => stderr.to_string(),
            (false, false) => format!("{}\n{}", stderr, stdout),
        }
    }
}

/// Runs a command to completion and captures its output.
pub async fn run_captured(cmd: &mut Command) -> std::io::Result<CommandOutput> {
    let output = cmd.stdin(Stdio::null()).output().await?;

    Ok(CommandOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Runs a command, mirroring every stdout/stderr line into the run log
/// as it arrives.
pub async fn run_logged(
    cmd: &mut Command,
    log: &RunLog,
    prefix: &str,
) -> std::io::Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn()?;

    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();

    let stdout_task = async {
        let mut collected = Vec::new();
        if let Some(stdout) = stdout_pipe {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log.line(format!("{}{}", prefix, line));
                collected.push(line);
            }
        }
        collected
    };

    let stderr_task = async {
        let mut collected = Vec::new();
        if let Some(stderr) = stderr_pipe {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log.line(format!("{}{}", prefix, line));
                collected.push(line);
            }
        }
        collected
    };

    let (stdout_lines, stderr_lines) = tokio::join!(stdout_task, stderr_task);
    let status = child.wait().await?;

    Ok(CommandOutput {
        status,
        stdout: stdout_lines.join("\n"),
        stderr: stderr_lines.join("\n"),
    })
}

/// Renders a command line for the build log.
pub fn describe(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_captured_collects_output() {
        let output = run_captured(Command::new("sh").args(["-c", "echo out; echo err >&2"]))
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_run_logged_reports_failure() {
        let log = RunLog::process();
        let output = run_logged(
            Command::new("sh").args(["-c", "echo boom >&2; exit 3"]),
            &log,
            "  ",
        )
        .await
        .unwrap();
        assert!(!output.success());
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.error_text(), "boom");
    }

    #[test]
    fn test_describe() {
        let args = vec!["build".to_string(), "-t".to_string(), "app:1".to_string()];
        assert_eq!(describe("docker", &args), "docker build -t app:1");
    }
}
