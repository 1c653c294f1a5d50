//! Router shell sessions and command execution.
//!
//! This module provides the telnet transport, the prompt-wait engine, the
//! login sequence, and command execution against the router's line-oriented
//! administration shell. A [`Session`] owns exactly one connection and every
//! operation takes `&mut self`, so commands on one session are strictly
//! sequential.
//!
//! # Main Components
//!
//! - [`Transport`] / [`TelnetTransport`] - Byte stream to the router
//! - [`Session`] - Prompt waits, authentication, and command execution
//! - [`CommandChannel`] - Seam shared by live sessions and replayed recordings
//! - [`SessionRecorder`] / [`SessionReplayer`] - JSONL session recording and offline replay

use std::future::Future;

use log::{debug, trace};
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::{ConnectOptions, WaitPolicy};
use crate::error::ConnectError;

pub use recording::{
    NormalizeOptions, ReplayContext, SessionEvent, SessionRecordEntry, SessionRecordLevel,
    SessionRecorder, SessionReplayer,
};
pub use transport::{TelnetTransport, Transport};

/// Markers the router prints when a command was rejected.
///
/// Only a line that starts with a marker counts, so rule data such as a
/// server named `Failed-over-ssh` is not mistaken for a rejection.
static ERROR_MARKERS: Lazy<Regex> =
    Lazy::new(|| match Regex::new(r"(?m)^\s*(?:ERROR|Failed)") {
        Ok(re) => re,
        Err(err) => panic!("invalid ERROR_MARKERS regex: {err}"),
    });

/// Progress of the login sequence on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    Disconnected,
    AwaitingLogin,
    AwaitingPassword,
    AwaitingCommandPrompt,
    Ready,
}

/// Result of waiting for a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptWait {
    /// Whether the trimmed accumulated text ended with the prompt.
    pub found: bool,
    /// Everything read while waiting.
    pub output: String,
    /// Number of reads performed.
    pub reads: usize,
}

/// The output of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    /// False when the response carries an error marker.
    pub success: bool,
    /// Response text without the command echo and the trailing prompt.
    pub content: String,
    /// Raw captured text.
    pub all: String,
    /// Prompt line that terminated the response.
    pub prompt: Option<String>,
}

impl Output {
    /// Splits a captured response into content and prompt.
    pub fn from_response(command: &str, all: &str, command_prompt: &str) -> Self {
        let mut lines: Vec<&str> = all.lines().map(|l| l.trim_end_matches('\r')).collect();

        while lines.last().is_some_and(|l| l.trim().is_empty()) {
            lines.pop();
        }
        let prompt = match lines.last() {
            Some(last) if last.trim().ends_with(command_prompt.trim()) => {
                let prompt = last.trim().to_string();
                lines.pop();
                Some(prompt)
            }
            _ => None,
        };

        let echo = command.trim();
        if let Some(first) = lines.first()
            && !echo.is_empty()
            && first.trim().ends_with(echo)
        {
            lines.remove(0);
        }

        let content = lines.join("\n").trim().to_string();
        Output {
            success: !ERROR_MARKERS.is_match(&content),
            content,
            all: all.to_string(),
            prompt,
        }
    }
}

/// Something that executes router commands one at a time.
///
/// Implemented by live [`Session`]s and by [`SessionReplayer`] for offline use.
pub trait CommandChannel: Send {
    /// Prompt text that terminates every command response.
    fn command_prompt(&self) -> &str;

    /// Sends one command line and captures its response.
    fn execute(
        &mut self,
        command: &str,
    ) -> impl Future<Output = Result<Output, ConnectError>> + Send;

    /// Ends the conversation with the router.
    fn close(&mut self) -> impl Future<Output = Result<(), ConnectError>> + Send;
}

/// An authenticated (or authenticating) router shell session.
pub struct Session<T = TelnetTransport> {
    transport: T,
    options: ConnectOptions,
    policy: WaitPolicy,
    state: AuthState,
    closed: bool,
    /// Last command prompt line seen.
    prompt: String,
    /// Optional session recorder bound to this connection.
    recorder: Option<SessionRecorder>,
}

mod client;
mod recording;
mod transport;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_strips_echo_and_prompt() {
        let all = "nat/virtual-servers/show\r\nServer Name: web\r\n/cli> ";
        let output = Output::from_response("nat/virtual-servers/show", all, "/cli>");

        assert!(output.success);
        assert_eq!(output.content, "Server Name: web");
        assert_eq!(output.prompt.as_deref(), Some("/cli>"));
        assert_eq!(output.all, all);
    }

    #[test]
    fn output_flags_error_markers() {
        let output = Output::from_response(
            "nat/virtual-servers/remove --ext-port-start=80",
            "nat/virtual-servers/remove --ext-port-start=80\nFailed to delete Entry\n/cli>",
            "/cli>",
        );

        assert!(!output.success);
        assert_eq!(output.content, "Failed to delete Entry");
    }

    #[test]
    fn marker_inside_rule_data_is_not_an_error() {
        let response = "nat/virtual-servers/show\n\
                        ------------------------\n\
                        Server Name: Failed-over-ssh\n\
                        Description: ERROR relay\n\
                        /cli>";
        let output = Output::from_response("nat/virtual-servers/show", response, "/cli>");

        assert!(output.success);
        assert!(output.content.contains("Server Name: Failed-over-ssh"));
    }

    #[test]
    fn output_without_prompt_keeps_all_lines() {
        let output = Output::from_response("show", "ERROR: unknown command", "/cli>");

        assert!(!output.success);
        assert_eq!(output.prompt, None);
        assert_eq!(output.content, "ERROR: unknown command");
    }
}
