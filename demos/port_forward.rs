use rportfwd::config::{ConnectOptions, ConnectOverrides};
use rportfwd::nat::{CliVirtualServers, Protocol, SHOW_COMMAND, VirtualServers};
use rportfwd::reconcile::{
    PortForward, PortForwardRuleSpec, ReconcileOutcome, Reconciler, TelnetConnector,
};
use rportfwd::session::Session;
use std::error::Error;
use std::net::Ipv4Addr;
use std::time::Duration;

fn print_usage() {
    eprintln!("Usage: cargo run --example port_forward -- <list|apply|delete> [--dry-run]");
    eprintln!("Environment: ROUTER_HOST, ROUTER_USERNAME, ROUTER_PASSWORD");
}

fn connect_options() -> ConnectOptions {
    let host = std::env::var("ROUTER_HOST").unwrap_or_else(|_| "192.168.1.254".to_string());
    ConnectOptions::new(
        host,
        ConnectOverrides {
            username: std::env::var("ROUTER_USERNAME").ok(),
            password: std::env::var("ROUTER_PASSWORD").ok(),
            ..Default::default()
        },
    )
}

fn sample_record() -> PortForward {
    PortForward::new(
        "default",
        "nats",
        PortForwardRuleSpec {
            external_port_start: 4222,
            external_port_end: None,
            internal_port_start: 4222,
            internal_port_end: None,
            protocol: Protocol::Tcp,
            server_ip: Ipv4Addr::new(192, 168, 1, 2),
            interface: "veip0.1".to_string(),
        },
    )
}

fn print_outcome(record: &PortForward, outcome: &ReconcileOutcome) {
    println!(
        "rule={} action={:?} persist={} remove={} requeue={:?} pending_cleanup={}",
        record.rule_name(),
        outcome.action,
        outcome.persist,
        outcome.remove,
        outcome.requeue,
        record.status.pending_cleanup
    );
    for condition in &record.status.conditions {
        println!(
            "  condition type={} status={} reason={} message={}",
            condition.condition_type, condition.status, condition.reason, condition.message
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let dry_run = args.iter().any(|arg| arg == "--dry-run");
    let Some(action) = args.iter().find(|arg| !arg.starts_with("--")) else {
        print_usage();
        return Err("missing action".into());
    };

    let options = connect_options();
    let mut record = sample_record();

    match action.as_str() {
        "list" => {
            if dry_run {
                println!("dry-run {} on {}", SHOW_COMMAND, options.device_addr());
                return Ok(());
            }
            let mut client = CliVirtualServers::new(Session::connect(options).await?);
            for rule in client.list().await? {
                println!(
                    "{} {} {}-{} -> {}:{}-{} via {} ({})",
                    rule.server_name,
                    rule.protocol,
                    rule.external_port_start,
                    rule.effective_external_port_end(),
                    rule.server_ip_address,
                    rule.internal_port_start,
                    rule.effective_internal_port_end(),
                    rule.wan_interface,
                    rule.origin
                );
            }
            client.close().await?;
        }
        "apply" => {
            if dry_run {
                println!("dry-run {}", record.to_create_input().create_command()?);
                return Ok(());
            }
            let reconciler = Reconciler::new(TelnetConnector::new(options));
            loop {
                let outcome = reconciler.reconcile(&mut record).await;
                print_outcome(&record, &outcome);
                if let Some(err) = outcome.error {
                    return Err(err.into());
                }
                if outcome.requeue != Some(Duration::ZERO) {
                    break;
                }
            }
        }
        "delete" => {
            if dry_run {
                let rule = record.to_create_input().to_virtual_server();
                println!("dry-run {}", rule.remove_command()?);
                return Ok(());
            }
            record.status.pending_cleanup = true;
            record.deletion_requested = true;
            let reconciler = Reconciler::new(TelnetConnector::new(options));
            let outcome = reconciler.reconcile(&mut record).await;
            print_outcome(&record, &outcome);
            if let Some(err) = outcome.error {
                return Err(err.into());
            }
        }
        _ => {
            print_usage();
            return Err(format!("unknown action '{action}'").into());
        }
    }
    Ok(())
}
