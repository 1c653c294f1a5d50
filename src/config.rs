//! Connection configuration with per-field defaults.
//!
//! Callers describe only what differs from the router defaults in a
//! [`ConnectOverrides`] value; [`ConnectOptions::new`] fills in everything
//! that was left unset. Empty strings and a zero port count as unset.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default telnet port.
pub const DEFAULT_PORT: u16 = 23;

/// Default prompt printed when the router asks for a username.
pub const DEFAULT_LOGIN_PROMPT: &str = "Login:";

/// Default prompt printed when the router asks for a password.
pub const DEFAULT_PASSWORD_PROMPT: &str = "Password:";

/// Default prompt terminating every command response.
pub const DEFAULT_COMMAND_PROMPT: &str = "/cli>";

/// Number of reads a prompt wait attempts before giving up.
pub const PROMPT_WAIT_ATTEMPTS: usize = 5;

/// Deadline for a single read from the session.
pub const READ_DEADLINE: Duration = Duration::from_secs(5);

/// Pause between two unsuccessful reads.
pub const RETRY_PAUSE: Duration = Duration::from_millis(500);

/// Address family used when dialing the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    /// Any resolved address.
    #[default]
    Tcp,
    /// IPv4 addresses only.
    Tcp4,
    /// IPv6 addresses only.
    Tcp6,
}

impl NetworkType {
    /// Returns true if the resolved address may be dialed with this network type.
    pub fn accepts(&self, addr: &SocketAddr) -> bool {
        match self {
            NetworkType::Tcp => true,
            NetworkType::Tcp4 => addr.is_ipv4(),
            NetworkType::Tcp6 => addr.is_ipv6(),
        }
    }
}

/// Optional overrides for [`ConnectOptions`].
///
/// Every field left as `None` (or empty) takes the router default.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectOverrides {
    pub port: Option<u16>,
    pub network_type: Option<NetworkType>,
    pub login_prompt: Option<String>,
    pub password_prompt: Option<String>,
    pub command_prompt: Option<String>,
    pub username: Option<String>,
    #[schemars(skip)]
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

/// Effective, immutable connection configuration for one session.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    host: String,
    port: u16,
    network_type: NetworkType,
    login_prompt: String,
    password_prompt: String,
    command_prompt: String,
    username: Option<String>,
    password: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl ConnectOptions {
    /// Builds the configuration for `host`, applying defaults field by field.
    pub fn new(host: impl Into<String>, overrides: ConnectOverrides) -> Self {
        Self {
            host: host.into(),
            port: overrides.port.filter(|p| *p != 0).unwrap_or(DEFAULT_PORT),
            network_type: overrides.network_type.unwrap_or_default(),
            login_prompt: non_empty(overrides.login_prompt)
                .unwrap_or_else(|| DEFAULT_LOGIN_PROMPT.to_string()),
            password_prompt: non_empty(overrides.password_prompt)
                .unwrap_or_else(|| DEFAULT_PASSWORD_PROMPT.to_string()),
            command_prompt: non_empty(overrides.command_prompt)
                .unwrap_or_else(|| DEFAULT_COMMAND_PROMPT.to_string()),
            username: non_empty(overrides.username),
            password: non_empty(overrides.password),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn network_type(&self) -> NetworkType {
        self.network_type
    }

    pub fn login_prompt(&self) -> &str {
        &self.login_prompt
    }

    pub fn password_prompt(&self) -> &str {
        &self.password_prompt
    }

    pub fn command_prompt(&self) -> &str {
        &self.command_prompt
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Username and password, only when both are configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(password)) => Some((user, password)),
            _ => None,
        }
    }

    /// `host:port` suitable for resolution; IPv6 literals are bracketed.
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Address used in logs and recordings.
    pub fn device_addr(&self) -> String {
        match self.username.as_deref() {
            Some(user) => format!("{user}@{}", self.address()),
            None => self.address(),
        }
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("network_type", &self.network_type)
            .field("login_prompt", &self.login_prompt)
            .field("password_prompt", &self.password_prompt)
            .field("command_prompt", &self.command_prompt)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Bounds of a single prompt wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Reads attempted before the wait gives up.
    pub attempts: usize,
    /// Deadline applied to each read.
    pub read_deadline: Duration,
    /// Pause between unsuccessful reads.
    pub retry_pause: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            attempts: PROMPT_WAIT_ATTEMPTS,
            read_deadline: READ_DEADLINE,
            retry_pause: RETRY_PAUSE,
        }
    }
}

impl WaitPolicy {
    /// Worst-case latency of one wait.
    pub fn worst_case(&self) -> Duration {
        let reads = self.read_deadline * self.attempts as u32;
        let pauses = self.retry_pause * self.attempts.saturating_sub(1) as u32;
        reads + pauses
    }
}
