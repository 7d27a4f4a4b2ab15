use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::lifecycle::LifecycleState;

/// Failure raised while assembling a graph from configuration.
///
/// Every variant is returned after all stages created so far have been
/// unwound; a failed build leaves nothing running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("{what} count {requested} exceeds limit {limit}")]
    CapacityExceeded {
        what: &'static str,
        requested: usize,
        limit: usize,
    },

    #[error("no enabled sources configured")]
    NoSources,

    #[error("failed to create stage '{stage}': {reason}")]
    StageCreateFailed { stage: String, reason: String },

    #[error("parallel split output requested but no sink is marked link_to_split")]
    MissingSplitTarget,

    #[error("export sink '{sink}' configured but no analytics stage is enabled")]
    ExportWithoutAnalytics { sink: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Failure of a lifecycle request. Requests that fail change nothing,
/// except [`StartTimeout`](Self::StartTimeout): the workers keep coming up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("cannot {action} while {from}")]
    IllegalTransition {
        from: LifecycleState,
        action: &'static str,
    },

    #[error("transition {from} -> {to} still in flight, retry later")]
    Busy {
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("failed to spawn worker for branch '{branch}': {reason}")]
    Spawn { branch: String, reason: String },

    #[error("branches not all paused after {waited:?}, currently {state}")]
    StartTimeout {
        state: LifecycleState,
        waited: Duration,
    },
}

/// Coarse classification carried by [`StageError`]; the event monitor keys
/// its fault handling off this code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageErrorCode {
    /// Upstream and downstream could not agree on a media format.
    NotNegotiated,
    /// Buffer pool could not be activated (typically camera capture).
    BufferPoolActivationFailed,
    /// Input resource (file, URI, device) could not be opened.
    ResourceNotFound,
    /// Reading from an open resource failed (network drop, I/O error).
    ResourceRead,
    /// Stream-level failure (decode error, malformed data).
    Stream,
    /// Anything else.
    Internal,
}

impl StageErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageErrorCode::NotNegotiated => "not-negotiated",
            StageErrorCode::BufferPoolActivationFailed => "buffer-pool-activation-failed",
            StageErrorCode::ResourceNotFound => "resource-not-found",
            StageErrorCode::ResourceRead => "resource-read",
            StageErrorCode::Stream => "stream",
            StageErrorCode::Internal => "internal",
        }
    }

    /// Negotiation and buffer-pool failures on local capture devices usually
    /// mean the requested format is unsupported by the device.
    pub fn is_capture_format_problem(&self) -> bool {
        matches!(
            self,
            StageErrorCode::NotNegotiated | StageErrorCode::BufferPoolActivationFailed
        )
    }
}

impl std::fmt::Display for StageErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a [`Stage`](crate::core::stages::Stage) and carried in
/// [`GraphEvent::Error`](crate::core::events::GraphEvent::Error).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {detail}")]
pub struct StageError {
    pub code: StageErrorCode,
    pub detail: String,
}

impl StageError {
    pub fn new(code: StageErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(StageErrorCode::Internal, detail)
    }
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("Hook error: {0}")]
    Hook(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_display_includes_code_and_detail() {
        let err = StageError::new(StageErrorCode::ResourceRead, "connection reset");
        assert_eq!(err.to_string(), "resource-read: connection reset");
    }

    #[test]
    fn test_capture_format_codes() {
        assert!(StageErrorCode::NotNegotiated.is_capture_format_problem());
        assert!(StageErrorCode::BufferPoolActivationFailed.is_capture_format_problem());
        assert!(!StageErrorCode::ResourceRead.is_capture_format_problem());
        assert!(!StageErrorCode::Internal.is_capture_format_problem());
    }

    #[test]
    fn test_stream_error_from_build_error() {
        let err: StreamError = BuildError::NoSources.into();
        assert!(matches!(err, StreamError::Build(BuildError::NoSources)));
        assert_eq!(err.to_string(), "no enabled sources configured");
    }

    #[test]
    fn test_lifecycle_error_messages() {
        let err = LifecycleError::Busy {
            from: LifecycleState::Running,
            to: LifecycleState::Paused,
        };
        assert!(err.to_string().contains("Running -> Paused"));

        let err = LifecycleError::IllegalTransition {
            from: LifecycleState::Ready,
            action: "run",
        };
        assert_eq!(err.to_string(), "cannot run while Ready");
    }
}
