//! NAT virtual-server (port-forwarding) rules on the router.
//!
//! Rules are managed through three shell commands: `show` lists them as
//! dashed-separated `field: value` blocks, `create` adds one, and `remove`
//! deletes one by its port/protocol/address tuple. Rules are identified by
//! their server name everywhere in this crate; the tuple is only used to build
//! the `remove` command once the named rule has been resolved.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ConnectError;

pub use client::{CliVirtualServers, VirtualServers};
pub use parser::parse_virtual_servers;

pub const SHOW_COMMAND: &str = "nat/virtual-servers/show";
pub const CREATE_COMMAND: &str = "nat/virtual-servers/create";
pub const REMOVE_COMMAND: &str = "nat/virtual-servers/remove";

/// Transport protocol a rule forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Protocol {
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "UDP")]
    Udp,
    #[serde(rename = "TCP/UDP")]
    TcpUdp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::TcpUdp => "TCP/UDP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ConnectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TCP" => Ok(Protocol::Tcp),
            "UDP" => Ok(Protocol::Udp),
            "TCP/UDP" | "TCPUDP" | "BOTH" => Ok(Protocol::TcpUdp),
            other => Err(ConnectError::InvalidInput(format!(
                "unknown protocol '{other}'"
            ))),
        }
    }
}

/// A virtual server as reported by the router.
///
/// Values are kept verbatim; firmware output is not guaranteed stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServer {
    pub server_name: String,
    pub external_port_start: String,
    pub external_port_end: String,
    pub protocol: String,
    pub internal_port_start: String,
    pub internal_port_end: String,
    pub server_ip_address: String,
    pub wan_interface: String,
    pub origin: String,
}

/// Returns `end` unless it is empty, in which case the range is a single port.
fn effective_end<'a>(start: &'a str, end: &'a str) -> &'a str {
    if end.trim().is_empty() { start } else { end }
}

/// The end-port flag value, or `None` when it would repeat the start.
fn end_flag(start: &str, end: &str) -> Option<String> {
    let end = end.trim();
    if end.is_empty() || end == start.trim() {
        None
    } else {
        Some(end.to_string())
    }
}

impl VirtualServer {
    /// External range end, defaulting to the start when the router left it blank.
    pub fn effective_external_port_end(&self) -> &str {
        effective_end(&self.external_port_start, &self.external_port_end)
    }

    /// Internal range end, defaulting to the start when the router left it blank.
    pub fn effective_internal_port_end(&self) -> &str {
        effective_end(&self.internal_port_start, &self.internal_port_end)
    }

    /// Builds the `remove` command for this rule.
    pub fn remove_command(&self) -> Result<String, ConnectError> {
        let mut command = format!(
            "{REMOVE_COMMAND} --ext-port-start={} --int-port-start={} --protocol={} --server-ip={}",
            flag_value("ext-port-start", &self.external_port_start)?,
            flag_value("int-port-start", &self.internal_port_start)?,
            flag_value("protocol", &self.protocol)?,
            flag_value("server-ip", &self.server_ip_address)?,
        );
        if let Some(end) = end_flag(&self.external_port_start, &self.external_port_end) {
            command.push_str(&format!(" --ext-port-end={}", flag_value("ext-port-end", &end)?));
        }
        if let Some(end) = end_flag(&self.internal_port_start, &self.internal_port_end) {
            command.push_str(&format!(" --int-port-end={}", flag_value("int-port-end", &end)?));
        }
        Ok(command)
    }
}

/// Rejects values the command line cannot carry unquoted.
fn flag_value<'a>(flag: &str, value: &'a str) -> Result<&'a str, ConnectError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ConnectError::InvalidInput(format!("--{flag} must not be empty")));
    }
    if value.chars().any(|c| c.is_whitespace() || c == '"' || c == '\'') {
        return Err(ConnectError::InvalidInput(format!(
            "--{flag} value {value:?} contains whitespace or quotes"
        )));
    }
    Ok(value)
}

/// Everything needed to create a virtual server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateInput {
    pub server_name: String,
    pub external_port_start: u16,
    #[serde(default)]
    pub external_port_end: Option<u16>,
    pub internal_port_start: u16,
    #[serde(default)]
    pub internal_port_end: Option<u16>,
    pub protocol: Protocol,
    pub server_ip_address: Ipv4Addr,
    pub wan_interface: String,
}

impl CreateInput {
    pub fn effective_external_port_end(&self) -> u16 {
        self.external_port_end.unwrap_or(self.external_port_start)
    }

    pub fn effective_internal_port_end(&self) -> u16 {
        self.internal_port_end.unwrap_or(self.internal_port_start)
    }

    /// Checks the port ranges are well formed.
    pub fn validate(&self) -> Result<(), ConnectError> {
        if self.external_port_start == 0 || self.internal_port_start == 0 {
            return Err(ConnectError::InvalidInput(
                "port 0 cannot be forwarded".to_string(),
            ));
        }
        if self.effective_external_port_end() < self.external_port_start {
            return Err(ConnectError::InvalidInput(format!(
                "external port end {} is below start {}",
                self.effective_external_port_end(),
                self.external_port_start
            )));
        }
        if self.effective_internal_port_end() < self.internal_port_start {
            return Err(ConnectError::InvalidInput(format!(
                "internal port end {} is below start {}",
                self.effective_internal_port_end(),
                self.internal_port_start
            )));
        }
        Ok(())
    }

    /// Builds the `create` command.
    ///
    /// End ports are only passed when they differ from the start.
    pub fn create_command(&self) -> Result<String, ConnectError> {
        self.validate()?;
        let mut command = format!(
            "{CREATE_COMMAND} --ext-port-start={} --int-port-start={} --protocol={} --server-ip={} --server-name={} --wan-intf={}",
            self.external_port_start,
            self.internal_port_start,
            self.protocol,
            self.server_ip_address,
            flag_value("server-name", &self.server_name)?,
            flag_value("wan-intf", &self.wan_interface)?,
        );
        if self.effective_external_port_end() != self.external_port_start {
            command.push_str(&format!(
                " --ext-port-end={}",
                self.effective_external_port_end()
            ));
        }
        if self.effective_internal_port_end() != self.internal_port_start {
            command.push_str(&format!(
                " --int-port-end={}",
                self.effective_internal_port_end()
            ));
        }
        Ok(command)
    }

    /// The rule the router is expected to report after creation.
    pub fn to_virtual_server(&self) -> VirtualServer {
        VirtualServer {
            server_name: self.server_name.clone(),
            external_port_start: self.external_port_start.to_string(),
            external_port_end: self.effective_external_port_end().to_string(),
            protocol: self.protocol.to_string(),
            internal_port_start: self.internal_port_start.to_string(),
            internal_port_end: self.effective_internal_port_end().to_string(),
            server_ip_address: self.server_ip_address.to_string(),
            wan_interface: self.wan_interface.clone(),
            origin: String::new(),
        }
    }

    /// Names of the fields in which `current` differs from this input.
    ///
    /// The name is the identity and is not compared. Blank end ports on the
    /// router side count as equal to their start.
    pub fn differences(&self, current: &VirtualServer) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if current.external_port_start.trim() != self.external_port_start.to_string() {
            changed.push("externalPortStart");
        }
        if current.effective_external_port_end().trim()
            != self.effective_external_port_end().to_string()
        {
            changed.push("externalPortEnd");
        }
        if current.internal_port_start.trim() != self.internal_port_start.to_string() {
            changed.push("internalPortStart");
        }
        if current.effective_internal_port_end().trim()
            != self.effective_internal_port_end().to_string()
        {
            changed.push("internalPortEnd");
        }
        if current.protocol.parse::<Protocol>().ok() != Some(self.protocol) {
            changed.push("protocol");
        }
        if current.server_ip_address.trim() != self.server_ip_address.to_string() {
            changed.push("serverIP");
        }
        if current.wan_interface.trim() != self.wan_interface {
            changed.push("interface");
        }
        changed
    }
}

/// Identifies the rule to read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ReadInput {
    pub name: String,
}

/// Identifies the rule to delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DeleteInput {
    pub name: String,
}

impl ReadInput {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn matches(&self, rule: &VirtualServer) -> bool {
        rule.server_name.trim() == self.name.trim()
    }
}

impl DeleteInput {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl From<&DeleteInput> for ReadInput {
    fn from(input: &DeleteInput) -> Self {
        ReadInput::new(input.name.clone())
    }
}

mod client;
mod parser;
