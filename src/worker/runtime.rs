//! Container runtime abstraction
//!
//! The store tracks what should exist; a runtime makes it exist on the
//! worker. Handles are shared: a row's handle names the runtime object.

use crate::error::HangarResult;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// A volume mounted into a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountConfig {
    /// Handle of the runtime volume
    pub volume: String,
    /// Path inside the container
    pub path: String,
}

/// Everything needed to create a container
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerConfig {
    pub handle: String,
    pub image: String,
    pub privileged: bool,
    pub env: Vec<(String, String)>,
    pub mounts: Vec<MountConfig>,
}

/// What a process run inside a container produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_status: i32,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Abstract container runtime interface
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check if the runtime is available on this system
    async fn is_available(&self) -> HangarResult<bool>;

    /// Fail with a helpful error if the runtime cannot be used
    async fn ensure_ready(&self) -> HangarResult<()>;

    /// Create a volume, copying the contents of `parent` when given
    async fn create_volume(&self, handle: &str, parent: Option<&str>) -> HangarResult<()>;

    /// Remove a volume. Missing volumes are not an error.
    async fn destroy_volume(&self, handle: &str) -> HangarResult<()>;

    /// Create and start a long-lived container
    async fn create_container(&self, config: &ContainerConfig) -> HangarResult<()>;

    /// Run `path` inside the container, feeding `stdin`.
    ///
    /// Cancelling `abort` kills the process and yields `Aborted`.
    async fn run(
        &self,
        handle: &str,
        path: &str,
        args: &[String],
        stdin: &[u8],
        abort: &CancellationToken,
    ) -> HangarResult<ProcessOutput>;

    /// Remove a container. Missing containers are not an error.
    async fn destroy_container(&self, handle: &str) -> HangarResult<()>;

    /// Get the human-readable runtime name for display
    fn runtime_name(&self) -> &'static str;
}
