//! # rportfwd - Router Port-Forwarding over Telnet
//!
//! `rportfwd` manages NAT port-forwarding ("virtual server") rules on consumer
//! routers that only expose a line-oriented administration shell over telnet.
//! It logs in, waits for prompts with a bounded retry budget, runs the
//! router's `nat/virtual-servers/*` commands and parses their text output into
//! structured records. On top of that it offers a declarative reconciler that
//! keeps a desired rule converged on the router.
//!
//! ## Features
//!
//! - **Telnet Transport**: Minimal telnet codec that refuses every option negotiation
//! - **Prompt Waiting**: Fixed retry budget with a per-read deadline
//! - **Resource Client**: Idempotent create/read/list/delete of virtual servers
//! - **Reconciliation**: Plan-then-apply convergence with a cleanup marker for deletions
//! - **Recording**: JSONL session recording and offline replay for fixtures
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rportfwd::config::{ConnectOptions, ConnectOverrides};
//! use rportfwd::nat::{CliVirtualServers, VirtualServers};
//! use rportfwd::session::Session;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = ConnectOptions::new(
//!         "192.168.1.254",
//!         ConnectOverrides {
//!             username: Some("admin".to_string()),
//!             password: Some("secret".to_string()),
//!             ..Default::default()
//!         },
//!     );
//!
//!     let session = Session::connect(options).await?;
//!     let mut client = CliVirtualServers::new(session);
//!     for rule in client.list().await? {
//!         println!("{} -> {}", rule.server_name, rule.server_ip_address);
//!     }
//!     client.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`session::Session`] - Telnet session, login sequence and command execution
//! - [`nat::VirtualServers`] - Virtual-server resource client
//! - [`reconcile::Reconciler`] - Desired-state convergence of [`reconcile::PortForward`] records
//! - [`error::ConnectError`] - Error types for sessions and rule management
//! - [`config`] - Connection defaults and overrides

pub mod config;
pub mod error;
pub mod nat;
pub mod reconcile;
pub mod session;
pub mod telnet;
