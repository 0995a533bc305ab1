//! Isolated execution environments.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::debug;

/// Access mode of a bind mount.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MountAccess {
    ReadOnly,
    ReadWrite,
}

impl MountAccess {
    pub fn flag(&self) -> &'static str {
        match self {
            MountAccess::ReadOnly => "ro",
            MountAccess::ReadWrite => "rw",
        }
    }
}

/// A host directory bound into the container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: PathBuf,
    pub access: MountAccess,
}

impl Mount {
    pub fn read_only(host: impl Into<PathBuf>, container: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            access: MountAccess::ReadOnly,
        }
    }

    pub fn read_write(host: impl Into<PathBuf>, container: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            access: MountAccess::ReadWrite,
        }
    }

    /// `host:container:ro|rw`, the `-v` argument form.
    pub fn volume_arg(&self) -> String {
        format!(
            "{}:{}:{}",
            self.host.display(),
            self.container.display(),
            self.access.flag()
        )
    }
}

/// Everything needed to launch one container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerSpec {
    /// Label used in logs (the submission id).
    pub name: String,
    pub image: String,
    pub mounts: Vec<Mount>,
    pub workdir: PathBuf,
    /// Command run on start (first element is the executable).
    pub command: Vec<String>,
}

/// How a container run ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerExit {
    /// Exit code (-1 if killed by a signal).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl ContainerExit {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Backend that runs a container to completion.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Launch the container and block until it exits.
    async fn run(&self, spec: &ContainerSpec) -> anyhow::Result<ContainerExit>;
}

/// Docker-compatible CLI runtime (`docker`, `podman`).
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    program: String,
    extra_args: Vec<String>,
}

impl DockerRuntime {
    pub fn new(program: impl Into<String>, extra_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            extra_args,
        }
    }

    /// Arguments after the program name.
    pub fn args(&self, spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec!["run".to_string(), "--rm".to_string()];
        args.extend(self.extra_args.iter().cloned());
        for mount in &spec.mounts {
            args.push("-v".to_string());
            args.push(mount.volume_arg());
        }
        args.push("-w".to_string());
        args.push(spec.workdir.display().to_string());
        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());
        args
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn run(&self, spec: &ContainerSpec) -> anyhow::Result<ContainerExit> {
        if spec.command.is_empty() {
            anyhow::bail!("Container {} has empty command", spec.name);
        }

        let start = Instant::now();
        let args = self.args(spec);
        debug!(container = %spec.name, program = %self.program, ?args, "Launching container");

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to launch {}: {}", self.program, e))?
            .wait_with_output()
            .await?;

        Ok(ContainerExit {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            name: "G1".to_string(),
            image: "autograde-python:latest".to_string(),
            mounts: vec![
                Mount::read_write("/data/out/G1", "/submission"),
                Mount::read_only("/data/tests", "/tests"),
                Mount::read_only("/data/lib", "/grader"),
            ],
            workdir: PathBuf::from("/submission"),
            command: vec!["/grader/bin/autograde".to_string(), "bootstrap".to_string()],
        }
    }

    #[test]
    fn test_volume_arg() {
        assert_eq!(
            Mount::read_only("/data/tests", "/tests").volume_arg(),
            "/data/tests:/tests:ro"
        );
        assert_eq!(
            Mount::read_write("/data/out/G1", "/submission").volume_arg(),
            "/data/out/G1:/submission:rw"
        );
    }

    #[test]
    fn test_docker_args_layout() {
        let runtime = DockerRuntime::new("docker", vec!["--network=none".to_string()]);
        let args = runtime.args(&spec());
        assert_eq!(
            args,
            vec![
                "run",
                "--rm",
                "--network=none",
                "-v",
                "/data/out/G1:/submission:rw",
                "-v",
                "/data/tests:/tests:ro",
                "-v",
                "/data/lib:/grader:ro",
                "-w",
                "/submission",
                "autograde-python:latest",
                "/grader/bin/autograde",
                "bootstrap",
            ]
        );
    }

    #[tokio::test]
    async fn test_docker_runtime_reports_exit_code() {
        // `true`/`false` ignore their arguments and stand in for the runtime.
        let ok = DockerRuntime::new("true", vec![]).run(&spec()).await.expect("run failed");
        assert!(ok.success());

        let failed = DockerRuntime::new("false", vec![]).run(&spec()).await.expect("run failed");
        assert_ne!(failed.exit_code, 0);
        assert!(!failed.success());
    }

    #[tokio::test]
    async fn test_docker_runtime_missing_program() {
        let runtime = DockerRuntime::new("definitely-not-a-container-runtime", vec![]);
        let err = runtime.run(&spec()).await.unwrap_err();
        assert!(err.to_string().contains("Failed to launch"));
    }
}
