//! Error types for the disk CSI node agent
//!
//! Provides structured error types for the lifecycle engines, the device
//! locator, the node info provider and the production adapters. Every
//! variant maps onto one of the status classes the orchestrator understands.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the node agent
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Request Errors
    // =========================================================================
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("An operation with the given Volume ID {volume_id} already exists")]
    OperationInProgress { volume_id: String },

    #[error("Not found: {0}")]
    NotFound(String),

    // =========================================================================
    // Device Errors
    // =========================================================================
    #[error("Device for slot {slot} not found within {timeout:?}")]
    DeviceNotFound { slot: u32, timeout: Duration },

    #[error("Device lookup failed for slot {slot}: {reason}")]
    DeviceLookup { slot: u32, reason: String },

    // =========================================================================
    // Mount / Filesystem Errors
    // =========================================================================
    #[error("Mount failed at {target}: {reason}")]
    MountFailed { target: String, reason: String },

    #[error("Unmount failed at {target}: {reason}")]
    UnmountFailed { target: String, reason: String },

    #[error("Could not resize volume {volume_id} ({device}): {reason}")]
    ResizeFailed {
        volume_id: String,
        device: String,
        reason: String,
    },

    #[error("Resize requested for {requested_gib}GiB, but after resizing volume size was {actual_gib}GiB")]
    ResizeIncomplete { requested_gib: u64, actual_gib: u64 },

    #[error("Performance optimization failed for {device}: {reason}")]
    PerfOptimization { device: String, reason: String },

    #[error("Command failed: {command} - {reason}")]
    Command { command: String, reason: String },

    // =========================================================================
    // Node Info Errors
    // =========================================================================
    #[error("Node info resolution failed: {0}")]
    NodeInfo(String),

    #[error("Cloud provider error: {0}")]
    CloudProvider(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Metadata service error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Status class reported to the caller for an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed or missing request fields, never retried internally
    InvalidArgument,
    /// Another lifecycle operation holds the volume lock
    Aborted,
    /// Missing path or device
    NotFound,
    /// Mount, format, resize, device or resolution failure
    Internal,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::InvalidArgument => write!(f, "invalid_argument"),
            ErrorCode::Aborted => write!(f, "aborted"),
            ErrorCode::NotFound => write!(f, "not_found"),
            ErrorCode::Internal => write!(f, "internal"),
        }
    }
}

impl Error {
    /// Classify this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Error::OperationInProgress { .. } => ErrorCode::Aborted,
            Error::NotFound(_) => ErrorCode::NotFound,
            _ => ErrorCode::Internal,
        }
    }

    /// Check if the caller may retry this error
    pub fn is_retryable(&self) -> bool {
        !matches!(self.code(), ErrorCode::InvalidArgument)
    }

    /// Check if this error is lock contention
    pub fn is_contention(&self) -> bool {
        matches!(self, Error::OperationInProgress { .. })
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}

/// Result type alias for the node agent
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = Error::OperationInProgress {
            volume_id: "vol-1".into(),
        };
        assert_eq!(err.code(), ErrorCode::Aborted);
        assert!(err.is_contention());
        assert_eq!(
            err.to_string(),
            "An operation with the given Volume ID vol-1 already exists"
        );

        let err = Error::invalid("Volume ID not provided");
        assert_eq!(err.code(), ErrorCode::InvalidArgument);

        let err = Error::NotFound("/var/lib/kubelet/pods/x".into());
        assert_eq!(err.code(), ErrorCode::NotFound);

        let err = Error::DeviceNotFound {
            slot: 3,
            timeout: Duration::from_secs(120),
        };
        assert_eq!(err.code(), ErrorCode::Internal);
    }

    #[test]
    fn test_error_retryable() {
        let contention = Error::OperationInProgress {
            volume_id: "vol-1".into(),
        };
        assert!(contention.is_retryable());

        let validation = Error::invalid("Staging target not provided");
        assert!(!validation.is_retryable());

        let io: Error = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert!(io.is_retryable());
        assert_eq!(io.code(), ErrorCode::Internal);
    }

    #[test]
    fn test_resize_incomplete_display() {
        let err = Error::ResizeIncomplete {
            requested_gib: 5,
            actual_gib: 4,
        };
        assert_eq!(
            err.to_string(),
            "Resize requested for 5GiB, but after resizing volume size was 4GiB"
        );
    }
}
