//! `docker` command line implementation of [`ContainerEngine`].

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::Command;

use super::{BuildRequest, ContainerEngine, EngineError, LocalImage, Result, ScriptRequest};
use crate::process::{describe, run_captured, run_logged, CommandOutput};
use crate::runlog::RunLog;

/// Mount point of the deploy worktree inside script containers.
const SCRIPT_WORKDIR: &str = "/work";

#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            program: "docker".to_string(),
        }
    }
}

impl DockerCli {
    pub fn new() -> Self {
        Self::default()
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        cmd
    }

    async fn captured(&self, args: Vec<String>) -> Result<CommandOutput> {
        run_captured(&mut self.command(&args))
            .await
            .map_err(|source| self.spawn_error(source))
    }

    async fn logged(&self, mut cmd: Command, args: &[String], log: &RunLog) -> Result<()> {
        let line = describe(&self.program, args);
        log.line(format!("- {}", line));

        let output = run_logged(&mut cmd, log, "  ")
            .await
            .map_err(|source| self.spawn_error(source))?;

        if output.success() {
            Ok(())
        } else {
            Err(EngineError::CommandFailed {
                command: line,
                message: format!(
                    "exit code {}",
                    output.status.code().unwrap_or(-1)
                ),
            })
        }
    }

    fn spawn_error(&self, source: std::io::Error) -> EngineError {
        EngineError::Spawn {
            program: self.program.clone(),
            source,
        }
    }
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn image_exists(&self, reference: &str) -> Result<bool> {
        let output = self
            .captured(strings(&["image", "inspect", "--format", "{{.Id}}", reference]))
            .await?;

        if output.success() {
            return Ok(true);
        }
        if output.stderr.to_lowercase().contains("no such image") {
            return Ok(false);
        }
        Err(EngineError::CommandFailed {
            command: format!("{} image inspect {}", self.program, reference),
            message: output.error_text(),
        })
    }

    async fn build(&self, request: &BuildRequest, log: &RunLog) -> Result<()> {
        let args = build_args(request);
        let mut cmd = self.command(&args);
        cmd.current_dir(&request.context);
        self.logged(cmd, &args, log).await
    }

    async fn save(&self, reference: &str, path: &Path, log: &RunLog) -> Result<()> {
        let args = vec![
            "save".to_string(),
            "-o".to_string(),
            path.to_string_lossy().into_owned(),
            reference.to_string(),
        ];
        let cmd = self.command(&args);
        self.logged(cmd, &args, log).await
    }

    async fn list_images(&self, repository: &str) -> Result<Vec<LocalImage>> {
        let command = format!("{} image ls {}", self.program, repository);
        let output = self
            .captured(strings(&[
                "image",
                "ls",
                "--format",
                "{{.Repository}}:{{.Tag}} {{.ID}}",
                repository,
            ]))
            .await?;
        if !output.success() {
            return Err(EngineError::CommandFailed {
                command,
                message: output.error_text(),
            });
        }

        let listed = parse_image_list(&output.stdout);
        if listed.is_empty() {
            return Ok(Vec::new());
        }

        let mut args = strings(&["image", "inspect", "--format", "{{.Created}}"]);
        args.extend(listed.iter().map(|(reference, _)| reference.clone()));
        let output = self.captured(args).await?;
        if !output.success() {
            return Err(EngineError::CommandFailed {
                command: format!("{} image inspect", self.program),
                message: output.error_text(),
            });
        }

        let created: Vec<&str> = output.stdout.lines().map(str::trim).collect();
        if created.len() != listed.len() {
            return Err(EngineError::UnexpectedOutput {
                command,
                message: format!(
                    "{} images listed, {} creation times",
                    listed.len(),
                    created.len()
                ),
            });
        }

        listed
            .into_iter()
            .zip(created)
            .map(|((reference, id), created)| -> Result<LocalImage> {
                let created = parse_created(created).ok_or_else(|| EngineError::UnexpectedOutput {
                    command: command.clone(),
                    message: format!("bad creation time {:?} for {}", created, reference),
                })?;
                Ok(LocalImage {
                    reference,
                    id,
                    created,
                })
            })
            .collect()
    }

    async fn remove_image(&self, reference: &str) -> Result<()> {
        let output = self.captured(strings(&["image", "rm", reference])).await?;
        if output.success() {
            Ok(())
        } else {
            Err(EngineError::CommandFailed {
                command: format!("{} image rm {}", self.program, reference),
                message: output.error_text(),
            })
        }
    }

    async fn run_script(&self, request: &ScriptRequest, log: &RunLog) -> Result<()> {
        let workdir = request
            .workdir
            .canonicalize()
            .map_err(|source| EngineError::InvalidPath {
                path: request.workdir.clone(),
                source,
            })?;

        let args = script_args(request, &workdir.to_string_lossy());
        let cmd = self.command(&args);
        self.logged(cmd, &args, log).await
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// `docker build` arguments, in the order build arguments were given.
pub(crate) fn build_args(request: &BuildRequest) -> Vec<String> {
    let mut args = vec![
        "build".to_string(),
        "-t".to_string(),
        request.image.clone(),
        ".".to_string(),
        "--network=host".to_string(),
    ];

    if let Some(sock) = &request.ssh_agent {
        args.push(format!("--ssh=default={}", sock));
    }

    args.extend(
        request
            .build_args
            .iter()
            .map(|arg| format!("--build-arg={}", arg)),
    );
    args
}

pub(crate) fn script_args(request: &ScriptRequest, host_dir: &str) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--rm".to_string(),
        "-v".to_string(),
        format!("{}:{}", host_dir, SCRIPT_WORKDIR),
        "-w".to_string(),
        SCRIPT_WORKDIR.to_string(),
    ];

    for (key, value) in &request.env {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }

    args.extend([
        "--entrypoint".to_string(),
        "/bin/sh".to_string(),
        request.image.clone(),
        "-c".to_string(),
        request.script.clone(),
    ]);
    args
}

/// Parses `docker image ls --format '{{.Repository}}:{{.Tag}} {{.ID}}'`,
/// skipping untagged entries.
pub(crate) fn parse_image_list(text: &str) -> Vec<(String, String)> {
    text.lines()
        .filter_map(|line| {
            let (reference, id) = line.trim().rsplit_once(' ')?;
            if reference.ends_with(":<none>") || reference.starts_with("<none>") {
                return None;
            }
            Some((reference.to_string(), id.to_string()))
        })
        .collect()
}

pub(crate) fn parse_created(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_build_args_order() {
        let request = BuildRequest {
            context: PathBuf::from("/work/app/builds/team/app/src"),
            image: "registry.local/team/app:abc1234".to_string(),
            build_args: vec![
                "GIT_TAG=abc1234".to_string(),
                "IMAGE_TAG=abc1234".to_string(),
                "NPM_TOKEN=x".to_string(),
            ],
            ssh_agent: Some("/run/ssh.sock".to_string()),
        };

        assert_eq!(
            build_args(&request),
            vec![
                "build",
                "-t",
                "registry.local/team/app:abc1234",
                ".",
                "--network=host",
                "--ssh=default=/run/ssh.sock",
                "--build-arg=GIT_TAG=abc1234",
                "--build-arg=IMAGE_TAG=abc1234",
                "--build-arg=NPM_TOKEN=x",
            ]
        );
    }

    #[test]
    fn test_script_args_pass_env_into_container() {
        let request = ScriptRequest {
            workdir: PathBuf::from("deploy"),
            image: "alpine:3.18".to_string(),
            script: "echo $IMAGE_TAG > tag".to_string(),
            env: vec![("IMAGE_TAG".to_string(), "abc1234".to_string())],
        };

        assert_eq!(
            script_args(&request, "/srv/work/app/deploy"),
            vec![
                "run",
                "--rm",
                "-v",
                "/srv/work/app/deploy:/work",
                "-w",
                "/work",
                "-e",
                "IMAGE_TAG=abc1234",
                "--entrypoint",
                "/bin/sh",
                "alpine:3.18",
                "-c",
                "echo $IMAGE_TAG > tag",
            ]
        );
    }

    #[test]
    fn test_parse_image_list() {
        let text = "registry.local/app:v2 sha256:bbb\nregistry.local/app:<none> sha256:ccc\nregistry.local/app:v1 sha256:aaa\n";
        assert_eq!(
            parse_image_list(text),
            vec![
                ("registry.local/app:v2".to_string(), "sha256:bbb".to_string()),
                ("registry.local/app:v1".to_string(), "sha256:aaa".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_created() {
        let created = parse_created("2024-05-01T12:30:00.123456789Z").unwrap();
        assert_eq!(created.to_rfc3339(), "2024-05-01T12:30:00.123456789+00:00");
        assert!(parse_created("yesterday").is_none());
    }
}
