use once_cell::sync::Lazy;
use regex::Regex;

use super::*;

/// A line made only of dashes separates two records.
static SEPARATOR_LINE: Lazy<Regex> = Lazy::new(|| match Regex::new(r"^\s*-{3,}\s*$") {
    Ok(re) => re,
    Err(err) => panic!("invalid SEPARATOR_LINE regex: {err}"),
});

/// Parses the response of the `show` command into rules, in device order.
///
/// A separator line opens a record; the next one closes it and opens a new
/// one. `field: value` lines inside a record are mapped onto the known
/// fields, anything else is ignored. Parsing stops at the first line that
/// contains `command_prompt`; a record left open at that point is dropped.
pub fn parse_virtual_servers(text: &str, command_prompt: &str) -> Vec<VirtualServer> {
    let prompt = command_prompt.trim();
    let mut servers = Vec::new();
    let mut server = VirtualServer::default();
    let mut inside = false;

    for line in text.lines() {
        if !prompt.is_empty() && line.contains(prompt) {
            break;
        }
        if SEPARATOR_LINE.is_match(line) {
            if inside {
                servers.push(std::mem::take(&mut server));
            } else {
                inside = true;
            }
            continue;
        }
        if !inside {
            continue;
        }

        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let field = name
            .trim_matches(|c: char| c == ':' || c.is_whitespace())
            .replace(' ', "");
        let value = value
            .trim_matches(|c: char| c == ':' || c.is_whitespace())
            .to_string();
        apply_field(&mut server, &field, value);
    }

    servers
}

fn apply_field(server: &mut VirtualServer, field: &str, value: String) {
    match field {
        "ExternalPortStart" => server.external_port_start = value,
        "ExternalPortEnd" => server.external_port_end = value,
        "InternalPortStart" => server.internal_port_start = value,
        "InternalPortEnd" => server.internal_port_end = value,
        "Protocol" => server.protocol = value,
        "ServerIPAddress" => server.server_ip_address = value,
        "ServerName" => server.server_name = value,
        "WANInterface" => server.wan_interface = value,
        "Origin" => server.origin = value,
        _ => {}
    }
}
