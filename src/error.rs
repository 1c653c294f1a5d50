//! Error types for router sessions and virtual-server management.
//!
//! This module defines all errors that can occur while talking to the router
//! shell, parsing its output, and converging port-forwarding rules.

use std::io;

use thiserror::Error;

use crate::session::AuthState;

/// Errors that can occur during session establishment and rule management.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The TCP connection to the router could not be established.
    #[error("dial failed: {0}")]
    ConnectFailed(#[source] io::Error),

    /// An I/O failure on an established session.
    ///
    /// This covers read deadlines and the remote side closing the stream.
    /// The error carries whatever output was captured before the failure.
    #[error("session transport error: {source} - output so far: {output:?}")]
    Transport {
        #[source]
        source: io::Error,
        output: String,
    },

    /// The expected prompt never appeared within the retry budget.
    ///
    /// The error contains the text received while waiting.
    #[error("prompt {prompt:?} not found - output was: {output:?}")]
    PromptTimeout { prompt: String, output: String },

    /// The device answered but its response flagged an error.
    ///
    /// The session remains usable after this error.
    #[error("command {command:?} failed: {output}")]
    Command { command: String, output: String },

    /// No virtual server matched the requested identity.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// A command was issued before the session finished authenticating.
    #[error("session is not ready (state: {0:?})")]
    NotReady(AuthState),

    /// A rule value cannot be expressed on the device command line.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Internal bookkeeping failure (recorder lock or encoding).
    #[error("internal error: {0}")]
    InternalServerError(String),

    /// A replayed session has no recorded output for a command.
    #[error("replay mismatch: {0}")]
    ReplayMismatchError(String),
}

impl ConnectError {
    /// Returns true when the error only reports a missing rule.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConnectError::NotFound(_))
    }

    pub(crate) fn transport(source: io::Error, output: impl Into<String>) -> Self {
        ConnectError::Transport {
            source,
            output: output.into(),
        }
    }
}
