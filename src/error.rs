//! Error types for collection runs and device sessions.
//!
//! [`ConfigError`] is the only error that aborts a run. Every [`ConnectError`]
//! is absorbed by the collector and turned into a per-host diagnostic.

use thiserror::Error;
use tokio::sync::mpsc::error::SendError;

/// Errors raised while building the run configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A range specification could not be parsed as a network.
    #[error("invalid range '{spec}': {reason}")]
    InvalidRange { spec: String, reason: String },

    /// A setting has a value outside of what the collector accepts.
    #[error("invalid setting {name}: {reason}")]
    InvalidSetting { name: String, reason: String },
}

/// Errors that can occur while opening or driving a device session.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The TCP connection was not established within the connect timeout.
    #[error("connect timeout after {0:?}")]
    ConnectTimeout(std::time::Duration),

    /// Login did not complete within the authentication timeout.
    ///
    /// Covers the protocol handshake, credential exchange and the wait for
    /// the first prompt.
    #[error("authentication timeout: {0}")]
    AuthTimeout(String),

    /// The device rejected the supplied credentials.
    #[error("authentication failed for user {0}")]
    AuthenticationFailed(String),

    /// The channel was disconnected while waiting for a prompt.
    ///
    /// This typically happens when the remote device closes the connection
    /// unexpectedly during login or command execution.
    #[error("channel disconnect on wait prompt")]
    ChannelDisconnectError,

    /// Command execution timed out.
    ///
    /// The error contains the partial output received before the timeout.
    #[error("exec command timeout: {0}")]
    ExecTimeout(String),

    /// Privilege elevation did not reach a privileged prompt.
    #[error("enable failed: {0}")]
    ElevationFailed(String),

    /// No built-in driver template exists for the requested device type.
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// Unexpected internal error.
    #[error("internal error: {0}")]
    InternalServerError(String),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    RusshError(#[from] russh::Error),

    /// Socket level failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to send data through the channel.
    #[error("Failed to send data: {0}")]
    SendDataError(#[from] SendError<String>),
}
