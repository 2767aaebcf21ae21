//! Resource script protocol
//!
//! Scripts read a JSON request on stdin and print a JSON response on
//! stdout. A non-zero exit is the resource's own failure and is reported
//! as `ScriptFailed` with whatever it wrote to stderr.

use super::types::{MetadataField, Params, Source, Version};
use crate::error::{HangarError, HangarResult};
use crate::worker::Container;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const CHECK_SCRIPT: &str = "/opt/resource/check";
pub const IN_SCRIPT: &str = "/opt/resource/in";

/// Where step inputs and outputs are mounted inside a container
pub fn resources_dir(suffix: &str) -> String {
    format!("/tmp/build/{suffix}")
}

/// Result of a successful get
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FetchedVersion {
    pub version: Version,
    #[serde(default)]
    pub metadata: Vec<MetadataField>,
}

#[derive(Serialize)]
struct CheckRequest<'a> {
    source: &'a Source,
    version: Option<&'a Version>,
}

#[derive(Serialize)]
struct InRequest<'a> {
    source: &'a Source,
    params: &'a Params,
    version: &'a Version,
}

/// Operations a resource type supports
#[async_trait]
pub trait Resource: Send + Sync {
    /// Versions newer than `from`, oldest first
    async fn check(
        &self,
        source: &Source,
        from: Option<&Version>,
        abort: &CancellationToken,
    ) -> HangarResult<Vec<Version>>;

    /// Fetch `version` into the volume mounted at `mount_path`
    async fn get(
        &self,
        mount_path: &str,
        source: &Source,
        params: &Params,
        version: &Version,
        abort: &CancellationToken,
    ) -> HangarResult<FetchedVersion>;
}

/// Runs the scripts in a container
pub struct ScriptResource {
    container: Arc<dyn Container>,
}

impl ScriptResource {
    pub fn new(container: Arc<dyn Container>) -> Self {
        Self { container }
    }

    async fn run<Req, Resp>(
        &self,
        path: &str,
        args: &[String],
        request: &Req,
        abort: &CancellationToken,
    ) -> HangarResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let stdin = serde_json::to_vec(request)?;
        debug!(container = self.container.handle(), script = path, "running resource script");

        let output = self.container.run_script(path, args, &stdin, abort).await?;
        if !output.success() {
            return Err(HangarError::ScriptFailed {
                path: path.to_string(),
                exit_status: output.exit_status,
                stderr: output.stderr,
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            HangarError::InvalidData(format!("{path} printed malformed output: {e}"))
        })
    }
}

#[async_trait]
impl Resource for ScriptResource {
    async fn check(
        &self,
        source: &Source,
        from: Option<&Version>,
        abort: &CancellationToken,
    ) -> HangarResult<Vec<Version>> {
        let request = CheckRequest {
            source,
            version: from,
        };
        self.run(CHECK_SCRIPT, &[], &request, abort).await
    }

    async fn get(
        &self,
        mount_path: &str,
        source: &Source,
        params: &Params,
        version: &Version,
        abort: &CancellationToken,
    ) -> HangarResult<FetchedVersion> {
        let request = InRequest {
            source,
            params,
            version,
        };
        self.run(IN_SCRIPT, &[mount_path.to_string()], &request, abort)
            .await
    }
}
