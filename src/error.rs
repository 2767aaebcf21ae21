//! Error types for Hangar
//!
//! All modules use `HangarResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Hangar operations
pub type HangarResult<T> = Result<T, HangarError>;

/// All errors that can occur in Hangar
#[derive(Error, Debug)]
pub enum HangarError {
    // Identity errors
    #[error("base resource type not found: {0}")]
    BaseResourceTypeNotFound(String),

    #[error("resource type '{0}' has no version yet")]
    ResourceTypeVersionNotFound(String),

    // Pipeline lookups
    #[error("pipeline '{0}' not found")]
    PipelineNotFound(String),

    #[error("resource '{0}' not found")]
    ResourceNotFound(String),

    #[error("resource type '{0}' not found")]
    ResourceTypeNotFound(String),

    #[error("job '{0}' not found")]
    JobNotFound(String),

    #[error("build {0} not found")]
    BuildNotFound(i64),

    #[error("volume not found: {0}")]
    VolumeNotFound(String),

    // Scheduling errors
    #[error("failed to acquire lock")]
    FailedToAcquireLock,

    #[error("invalid check interval '{value}': {reason}")]
    InvalidCheckInterval { value: String, reason: String },

    #[error("scan cancelled")]
    Cancelled,

    // Script errors
    #[error("script {path} failed with exit status {exit_status}: {stderr}")]
    ScriptFailed {
        path: String,
        exit_status: i32,
        stderr: String,
    },

    #[error("script aborted")]
    Aborted,

    #[error("interrupted")]
    Interrupted,

    // Store errors
    #[error("conflicting concurrent write: {0}")]
    Conflict(String),

    #[error("row is still referenced: {0}")]
    IntegrityConflict(String),

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("unknown {entity} state: {value}")]
    UnknownState { entity: &'static str, value: String },

    #[error("invalid owner columns: {0}")]
    InvalidOwner(String),

    #[error("invalid stored data: {0}")]
    InvalidData(String),

    // Environment errors
    #[error("Podman not found. Install podman or set worker.runtime in the config")]
    PodmanNotFound,

    #[error("Container failed to start: {0}")]
    ContainerStart(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("{0}")]
    User(String),
}

impl From<sqlx::Error> for HangarError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return Self::Conflict(db_err.message().to_string());
            }
            if db_err.is_foreign_key_violation() {
                return Self::IntegrityConflict(db_err.message().to_string());
            }
            // SQLITE_BUSY, SQLITE_LOCKED and SQLITE_BUSY_SNAPSHOT
            if matches!(db_err.code().as_deref(), Some("5" | "6" | "517")) {
                return Self::Conflict(db_err.message().to_string());
            }
        }
        Self::Database(err)
    }
}

impl HangarError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// A concurrent writer got there first; the operation can be retried
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::IntegrityConflict(_))
    }

    /// Failure reported by the resource's own script rather than by us
    pub fn is_script_failure(&self) -> bool {
        matches!(self, Self::ScriptFailed { .. })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::PodmanNotFound => Some("Install podman: https://podman.io/docs/installation"),
            Self::BaseResourceTypeNotFound(_) => {
                Some("Register the type under [[worker.base_resource_types]] in the config")
            }
            Self::PipelineNotFound(_) => Some("Run: hangar pipeline set <name> <file>"),
            Self::FailedToAcquireLock => Some("Another process is checking this resource"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = HangarError::ResourceNotFound("some-resource".to_string());
        assert_eq!(err.to_string(), "resource 'some-resource' not found");
    }

    #[test]
    fn error_hint() {
        let err = HangarError::PipelineNotFound("main".to_string());
        assert_eq!(err.hint(), Some("Run: hangar pipeline set <name> <file>"));
        assert_eq!(HangarError::Interrupted.hint(), None);
    }

    #[test]
    fn error_transient() {
        assert!(HangarError::Conflict("unique".to_string()).is_transient());
        assert!(HangarError::IntegrityConflict("fk".to_string()).is_transient());
        assert!(!HangarError::FailedToAcquireLock.is_transient());
    }

    #[test]
    fn script_failure_classification() {
        let err = HangarError::ScriptFailed {
            path: "/opt/resource/check".to_string(),
            exit_status: 1,
            stderr: "boom".to_string(),
        };
        assert!(err.is_script_failure());
        assert!(err.to_string().contains("exit status 1"));
        assert!(!HangarError::Interrupted.is_script_failure());
    }
}
