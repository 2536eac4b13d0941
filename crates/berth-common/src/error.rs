//! Unified error types for the berth workspace.
//!
//! Every engine operation returns either a success value or exactly one of
//! the variants below. [`BerthError::kind`] exposes a flat discriminant for
//! callers that only care about the category.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{ContainerId, ContainerState};

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum BerthError {
    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// The operation is not valid from the container's current state.
    #[error("cannot {operation} container {id} while it is {state}")]
    InvalidState {
        /// Container the operation targeted.
        id: ContainerId,
        /// State the container was in.
        state: ContainerState,
        /// Rejected operation.
        operation: &'static str,
    },

    /// A malformed port, name or image request.
    #[error("invalid spec: {message}")]
    InvalidSpec {
        /// Description of the problem.
        message: String,
    },

    /// Another live container already uses this name.
    #[error("container name already in use: {name}")]
    DuplicateName {
        /// Conflicting name.
        name: String,
    },

    /// The host port is reserved by another container.
    #[error("host port {port} is already bound by container {owner}")]
    AlreadyBound {
        /// Conflicting host port.
        port: u16,
        /// Current owner of the port.
        owner: ContainerId,
    },

    /// The isolation provider failed to start the workload.
    #[error("launch failed: {message}")]
    Launch {
        /// Provider-supplied detail, surfaced verbatim.
        message: String,
    },

    /// Graceful termination did not finish before the deadline.
    #[error("process {pid} did not exit within {timeout_ms}ms of the graceful signal")]
    TerminationTimeout {
        /// Process that ignored the graceful signal.
        pid: u32,
        /// Deadline that expired.
        timeout_ms: u64,
    },

    /// The persistence layer is unavailable; the caller should retry.
    #[error("state store unavailable: {message}")]
    StoreIo {
        /// Description of the failure.
        message: String,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

/// Flat discriminant of [`BerthError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`BerthError::NotFound`].
    NotFound,
    /// See [`BerthError::InvalidState`].
    InvalidState,
    /// See [`BerthError::InvalidSpec`].
    InvalidSpec,
    /// See [`BerthError::DuplicateName`].
    DuplicateName,
    /// See [`BerthError::AlreadyBound`].
    AlreadyBound,
    /// See [`BerthError::Launch`].
    Launch,
    /// See [`BerthError::TerminationTimeout`].
    TerminationTimeout,
    /// See [`BerthError::StoreIo`].
    StoreIo,
    /// See [`BerthError::Io`].
    Io,
    /// See [`BerthError::Config`].
    Config,
    /// See [`BerthError::Serialization`].
    Serialization,
}

impl BerthError {
    /// Returns the category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::InvalidSpec { .. } => ErrorKind::InvalidSpec,
            Self::DuplicateName { .. } => ErrorKind::DuplicateName,
            Self::AlreadyBound { .. } => ErrorKind::AlreadyBound,
            Self::Launch { .. } => ErrorKind::Launch,
            Self::TerminationTimeout { .. } => ErrorKind::TerminationTimeout,
            Self::StoreIo { .. } => ErrorKind::StoreIo,
            Self::Io { .. } => ErrorKind::Io,
            Self::Config { .. } => ErrorKind::Config,
            Self::Serialization { .. } => ErrorKind::Serialization,
        }
    }

    /// Shorthand for a missing container.
    #[must_use]
    pub fn container_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "container",
            id: id.into(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, BerthError>;
