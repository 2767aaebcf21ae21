//! Podman container runtime
//!
//! Implements the ContainerRuntime trait by shelling out to `podman`.
//! Containers idle on `sleep infinity` and scripts run through `podman exec`.

use super::runtime::{ContainerConfig, ContainerRuntime, ProcessOutput};
use crate::error::{HangarError, HangarResult};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Label put on everything this runtime creates
const MANAGED_LABEL: &str = "io.hangar.managed=true";

/// Container runtime using the local `podman` binary
pub struct PodmanRuntime;

impl PodmanRuntime {
    pub fn new() -> Self {
        Self
    }

    /// Check if Podman is installed
    async fn podman_installed() -> bool {
        Command::new("podman")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Execute a Podman command and return the output
    async fn exec(&self, args: &[&str]) -> HangarResult<std::process::Output> {
        debug!("Executing: podman {:?}", args);

        Command::new("podman")
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| HangarError::command_failed(format!("podman {:?}", args), e))
    }

    /// Execute a Podman command with `input` on stdin.
    ///
    /// The child is killed if `abort` fires before it exits.
    async fn exec_with_stdin(
        &self,
        args: &[&str],
        input: &[u8],
        abort: Option<&CancellationToken>,
    ) -> HangarResult<std::process::Output> {
        debug!("Executing with stdin: podman {:?}", args);

        let mut child = Command::new("podman")
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HangarError::command_failed(format!("podman {:?}", args), e))?;

        if let Some(mut stdin) = child.stdin.take() {
            let input = input.to_vec();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&input).await {
                    debug!("Process closed stdin early: {}", e);
                }
            });
        }

        let output = child.wait_with_output();
        let output = match abort {
            Some(token) => {
                tokio::select! {
                    output = output => output,
                    _ = token.cancelled() => {
                        warn!("Aborting: podman {:?}", args);
                        return Err(HangarError::Aborted);
                    }
                }
            }
            None => output.await,
        };
        output.map_err(|e| HangarError::command_failed(format!("podman {:?}", args), e))
    }

    /// Pull an image unless it is already present
    async fn ensure_image(&self, image: &str) -> HangarResult<()> {
        let exists = self.exec(&["image", "exists", image]).await?;
        if exists.status.success() {
            return Ok(());
        }

        info!("Pulling image: {}", image);
        let output = self.exec(&["pull", image]).await?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(HangarError::command_exec(format!("podman pull {image}"), stderr))
        }
    }

    fn check(output: &std::process::Output, command: &str) -> HangarResult<()> {
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(HangarError::command_exec(command, stderr))
        }
    }
}

impl Default for PodmanRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Arguments for `podman create`
fn create_args(config: &ContainerConfig) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "--name".to_string(),
        config.handle.clone(),
        "--label".to_string(),
        MANAGED_LABEL.to_string(),
    ];

    if config.privileged {
        args.push("--privileged".to_string());
    }

    for (k, v) in &config.env {
        args.push("-e".to_string());
        args.push(format!("{}={}", k, v));
    }

    for mount in &config.mounts {
        args.push("-v".to_string());
        args.push(format!("{}:{}", mount.volume, mount.path));
    }

    args.push("--entrypoint".to_string());
    args.push("sleep".to_string());
    args.push(config.image.clone());
    args.push("infinity".to_string());
    args
}

/// Arguments for `podman exec`
fn exec_args(handle: &str, path: &str, script_args: &[String]) -> Vec<String> {
    let mut args = vec![
        "exec".to_string(),
        "-i".to_string(),
        handle.to_string(),
        path.to_string(),
    ];
    args.extend(script_args.iter().cloned());
    args
}

fn is_missing(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("no such container") || stderr.contains("no such volume")
}

#[async_trait]
impl ContainerRuntime for PodmanRuntime {
    async fn is_available(&self) -> HangarResult<bool> {
        Ok(Self::podman_installed().await)
    }

    async fn ensure_ready(&self) -> HangarResult<()> {
        if !self.is_available().await? {
            return Err(HangarError::PodmanNotFound);
        }
        Ok(())
    }

    async fn create_volume(&self, handle: &str, parent: Option<&str>) -> HangarResult<()> {
        debug!("Creating volume: {}", handle);

        let output = self
            .exec(&["volume", "create", "--label", MANAGED_LABEL, handle])
            .await?;
        Self::check(&output, "podman volume create")?;

        if let Some(parent) = parent {
            let export = self.exec(&["volume", "export", parent]).await?;
            Self::check(&export, "podman volume export")?;

            let import = self
                .exec_with_stdin(&["volume", "import", handle, "-"], &export.stdout, None)
                .await?;
            Self::check(&import, "podman volume import")?;
        }
        Ok(())
    }

    async fn destroy_volume(&self, handle: &str) -> HangarResult<()> {
        debug!("Removing volume: {}", handle);

        let output = self.exec(&["volume", "rm", "-f", handle]).await?;
        if output.status.success() {
            return Ok(());
        }

        // Ignore error if the volume doesn't exist
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_missing(&stderr) {
            Ok(())
        } else {
            Err(HangarError::command_exec("podman volume rm", stderr))
        }
    }

    async fn create_container(&self, config: &ContainerConfig) -> HangarResult<()> {
        self.ensure_image(&config.image).await?;

        let args = create_args(config);
        debug!("Creating container: podman {:?}", args);

        let args_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.exec(&args_refs).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HangarError::ContainerStart(stderr.to_string()));
        }

        let output = self.exec(&["start", &config.handle]).await?;
        if output.status.success() {
            info!("Container started: {}", config.handle);
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(HangarError::ContainerStart(stderr.to_string()))
        }
    }

    async fn run(
        &self,
        handle: &str,
        path: &str,
        args: &[String],
        stdin: &[u8],
        abort: &CancellationToken,
    ) -> HangarResult<ProcessOutput> {
        let args = exec_args(handle, path, args);
        let args_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.exec_with_stdin(&args_refs, stdin, Some(abort)).await?;

        Ok(ProcessOutput {
            exit_status: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn destroy_container(&self, handle: &str) -> HangarResult<()> {
        debug!("Removing container: {}", handle);

        let output = self.exec(&["rm", "-f", handle]).await?;
        if output.status.success() {
            return Ok(());
        }

        // Ignore error if container doesn't exist
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_missing(&stderr) {
            Ok(())
        } else {
            Err(HangarError::command_exec("podman rm", stderr))
        }
    }

    fn runtime_name(&self) -> &'static str {
        "Podman"
    }
}
