use rportfwd::nat::{SHOW_COMMAND, parse_virtual_servers};
use rportfwd::session::{NormalizeOptions, SessionEvent, SessionRecorder};
use std::error::Error;
use std::fs;

const COMMAND_PROMPT: &str = "/cli>";

fn print_usage() {
    eprintln!(
        "Usage: cargo run --example normalize_fixture -- <recording.jsonl> [--out <fixture.jsonl>] [--keep-raw] [--drop-auth-states]"
    );
}

struct Args {
    input: String,
    out: Option<String>,
    options: NormalizeOptions,
}

fn parse_args() -> Result<Args, Box<dyn Error>> {
    let mut input = None;
    let mut out = None;
    let mut options = NormalizeOptions::default();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--out" => out = Some(args.next().ok_or("--out needs a path")?),
            "--keep-raw" => options.keep_raw_chunks = true,
            "--drop-auth-states" => options.keep_auth_states = false,
            flag if flag.starts_with("--") => return Err(format!("unknown flag '{flag}'").into()),
            path if input.is_none() => input = Some(path.to_string()),
            extra => return Err(format!("unexpected argument '{extra}'").into()),
        }
    }

    Ok(Args {
        input: input.ok_or("missing recording path")?,
        out,
        options,
    })
}

/// Prints what a recorded port-forward session did on the router.
fn summarize(normalized: &str) -> Result<(), Box<dyn Error>> {
    for entry in SessionRecorder::from_jsonl(normalized)?.entries()? {
        match entry.event {
            SessionEvent::ConnectionEstablished {
                device_addr,
                prompt_after,
            } => println!("[{}] connected to {device_addr} at {prompt_after:?}", entry.ts_ms),
            SessionEvent::CommandOutput {
                command,
                success,
                content,
                ..
            } => {
                let status = if success { "ok" } else { "rejected" };
                println!("[{}] {status} {command}", entry.ts_ms);
                if command == SHOW_COMMAND {
                    for rule in parse_virtual_servers(&content, COMMAND_PROMPT) {
                        println!(
                            "    {} {} {}-{} -> {}:{}-{} via {}",
                            rule.server_name,
                            rule.protocol,
                            rule.external_port_start,
                            rule.effective_external_port_end(),
                            rule.server_ip_address,
                            rule.internal_port_start,
                            rule.effective_internal_port_end(),
                            rule.wan_interface
                        );
                    }
                } else if !success {
                    println!("    {content}");
                }
            }
            SessionEvent::ConnectionClosed { reason, .. } => {
                println!("[{}] closed ({reason})", entry.ts_ms)
            }
            SessionEvent::AuthStateChanged { .. } | SessionEvent::RawChunk { .. } => {}
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = match parse_args() {
        Ok(args) => args,
        Err(err) => {
            print_usage();
            return Err(err);
        }
    };

    let recording = fs::read_to_string(&args.input)
        .map_err(|err| format!("failed to read '{}': {err}", args.input))?;
    let normalized = SessionRecorder::normalize_jsonl(&recording, args.options)?;

    summarize(&normalized)?;

    if let Some(out) = args.out {
        fs::write(&out, &normalized).map_err(|err| format!("failed to write '{out}': {err}"))?;
        println!("fixture written to {out}");
    }
    Ok(())
}
