//! Convergence of desired port-forwarding records onto the router.
//!
//! A [`PortForward`] record describes one rule the router should carry. The
//! [`Reconciler`] reads the router's current rule of the same name, decides
//! with [`plan`] whether to create, recreate or leave it, and reports the
//! outcome on the record's conditions. Records carry a `pending_cleanup`
//! marker that is set before the first device mutation and only cleared once
//! the rule is known to be gone from the router, so a rule is never orphaned
//! when the record is deleted halfway through a pass.
//!
//! The reconciler never persists anything itself: it mutates the record in
//! place and returns a [`ReconcileOutcome`] telling the caller whether to
//! persist it, drop it, and when to call again.

use std::future::Future;
use std::net::Ipv4Addr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::ConnectOptions;
use crate::error::ConnectError;
use crate::nat::{
    CliVirtualServers, CreateInput, DeleteInput, Protocol, REMOVE_COMMAND, ReadInput,
    VirtualServer, VirtualServers,
};
use crate::session::{Session, SessionRecorder};

pub const READY_CONDITION: &str = "Ready";
pub const READY_REASON: &str = "PortForwardReady";
pub const FAILED_REASON: &str = "ReconcileFailed";

/// Upper bound on remove commands sent for one name during cleanup.
const MAX_REMOVALS: usize = 8;

/// Desired forwarding rule. End ports left unset (or 0) equal their start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PortForwardRuleSpec {
    pub external_port_start: u16,
    #[serde(default)]
    pub external_port_end: Option<u16>,
    pub internal_port_start: u16,
    #[serde(default)]
    pub internal_port_end: Option<u16>,
    pub protocol: Protocol,
    #[serde(rename = "serverIP")]
    pub server_ip: Ipv4Addr,
    pub interface: String,
}

/// Service the rule forwards to. Informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ServiceRef {
    pub name: String,
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PortForwardSpec {
    pub rule: PortForwardRuleSpec,
    #[serde(rename = "for", default, skip_serializing_if = "Option::is_none")]
    pub for_service: Option<ServiceRef>,
}

/// One observed condition on a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: bool,
    pub reason: String,
    pub message: String,
    pub observed_generation: i64,
    /// Unix time in milliseconds of the last status flip.
    pub last_transition_ms: u64,
}

impl Condition {
    pub fn new(
        condition_type: impl Into<String>,
        status: bool,
        reason: impl Into<String>,
        message: impl Into<String>,
        observed_generation: i64,
    ) -> Self {
        Self {
            condition_type: condition_type.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            observed_generation,
            last_transition_ms: now_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PortForwardStatus {
    /// Set while the router may still carry a rule for this record.
    #[serde(default)]
    pub pending_cleanup: bool,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl PortForwardStatus {
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Replaces the condition of the same type, keeping its transition time
    /// unless the status flipped.
    pub fn set_condition(&mut self, condition: Condition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition.condition_type)
        {
            Some(existing) => {
                let last_transition_ms = if existing.status == condition.status {
                    existing.last_transition_ms
                } else {
                    condition.last_transition_ms
                };
                *existing = Condition {
                    last_transition_ms,
                    ..condition
                };
            }
            None => self.conditions.push(condition),
        }
    }
}

/// Desired-state record for one port-forwarding rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PortForward {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub generation: i64,
    /// The owner asked for the record to go away.
    #[serde(default)]
    pub deletion_requested: bool,
    pub spec: PortForwardSpec,
    #[serde(default)]
    pub status: PortForwardStatus,
}

impl PortForward {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        rule: PortForwardRuleSpec,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            generation: 1,
            deletion_requested: false,
            spec: PortForwardSpec {
                rule,
                for_service: None,
            },
            status: PortForwardStatus::default(),
        }
    }

    /// Server name of the router rule owned by this record.
    pub fn rule_name(&self) -> String {
        format!("{}-{}", self.namespace, self.name)
    }

    pub fn to_create_input(&self) -> CreateInput {
        let rule = &self.spec.rule;
        CreateInput {
            server_name: self.rule_name(),
            external_port_start: rule.external_port_start,
            external_port_end: rule.external_port_end.filter(|port| *port != 0),
            internal_port_start: rule.internal_port_start,
            internal_port_end: rule.internal_port_end.filter(|port| *port != 0),
            protocol: rule.protocol,
            server_ip_address: rule.server_ip,
            wan_interface: rule.interface.clone(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status
            .condition(READY_CONDITION)
            .is_some_and(|c| c.status)
    }
}

/// What a pass has to do on the router for one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// No rule with that name exists.
    Create,
    /// The rule exists but differs in the listed fields.
    Recreate { changed: Vec<&'static str> },
    Unchanged,
}

/// Decides how to bring `current` to `desired`.
pub fn plan(desired: &CreateInput, current: Option<&VirtualServer>) -> Plan {
    let Some(current) = current else {
        return Plan::Create;
    };
    let changed = desired.differences(current);
    if changed.is_empty() {
        Plan::Unchanged
    } else {
        Plan::Recreate { changed }
    }
}

/// Opens a virtual-server client for one reconcile pass.
pub trait Connector: Send + Sync {
    type Client: VirtualServers;

    fn connect(&self) -> impl Future<Output = Result<Self::Client, ConnectError>> + Send;
}

/// Connector dialing the router over telnet.
#[derive(Debug, Clone)]
pub struct TelnetConnector {
    options: ConnectOptions,
    recorder: Option<SessionRecorder>,
}

impl TelnetConnector {
    pub fn new(options: ConnectOptions) -> Self {
        Self {
            options,
            recorder: None,
        }
    }

    /// Records every session opened through this connector.
    pub fn with_recorder(mut self, recorder: SessionRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }
}

impl Connector for TelnetConnector {
    type Client = CliVirtualServers<Session>;

    async fn connect(&self) -> Result<Self::Client, ConnectError> {
        let session =
            Session::connect_with_recorder(self.options.clone(), self.recorder.clone()).await?;
        Ok(CliVirtualServers::new(session))
    }
}

/// Reconciler timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerOptions {
    /// Delay before the periodic drift check after a successful pass.
    pub success_requeue: Duration,
    /// Delay before retrying a failed pass.
    pub error_requeue: Duration,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            success_requeue: Duration::from_secs(60 * 60),
            error_requeue: Duration::from_secs(30),
        }
    }
}

/// What a pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Set the cleanup marker; no device call was made.
    AddedFinalizer,
    Created,
    Recreated { changed: Vec<&'static str> },
    Unchanged,
    /// Removed the rule from the router and cleared the marker.
    Deleted,
    /// The rule was already gone; cleared the marker.
    ReleasedFinalizer,
    /// Nothing was owed to the router.
    Released,
    Failed,
}

/// Result of one pass, to be applied by the caller.
#[derive(Debug)]
pub struct ReconcileOutcome {
    pub action: ReconcileAction,
    /// When to run the next pass, if at all.
    pub requeue: Option<Duration>,
    /// The record was modified and should be written back.
    pub persist: bool,
    /// The record may be dropped.
    pub remove: bool,
    pub error: Option<ConnectError>,
}

impl ReconcileOutcome {
    fn done(action: ReconcileAction, requeue: Option<Duration>) -> Self {
        Self {
            action,
            requeue,
            persist: true,
            remove: false,
            error: None,
        }
    }
}

/// Drives [`PortForward`] records to convergence through a [`Connector`].
pub struct Reconciler<K> {
    connector: K,
    options: ReconcilerOptions,
}

impl<K: Connector> Reconciler<K> {
    pub fn new(connector: K) -> Self {
        Self::with_options(connector, ReconcilerOptions::default())
    }

    pub fn with_options(connector: K, options: ReconcilerOptions) -> Self {
        Self { connector, options }
    }

    pub fn connector(&self) -> &K {
        &self.connector
    }

    /// Runs one pass for `record`.
    ///
    /// Failures are reported on the record's `Ready` condition and in
    /// [`ReconcileOutcome::error`] together with a delayed requeue.
    pub async fn reconcile(&self, record: &mut PortForward) -> ReconcileOutcome {
        if record.deletion_requested {
            return self.finalize(record).await;
        }

        if !record.status.pending_cleanup {
            debug!("adding cleanup marker to {}", record.rule_name());
            record.status.pending_cleanup = true;
            return ReconcileOutcome::done(ReconcileAction::AddedFinalizer, Some(Duration::ZERO));
        }

        match self.converge(record).await {
            Ok(action) => {
                debug!("{} is ready ({:?})", record.rule_name(), action);
                record.status.set_condition(Condition::new(
                    READY_CONDITION,
                    true,
                    READY_REASON,
                    "the port forward configuration is updated in the router",
                    record.generation,
                ));
                ReconcileOutcome::done(action, Some(self.options.success_requeue))
            }
            Err(err) => self.failed(record, err),
        }
    }

    async fn converge(&self, record: &PortForward) -> Result<ReconcileAction, ConnectError> {
        let desired = record.to_create_input();
        desired.validate()?;

        let mut client = self.connector.connect().await?;
        let result = apply(&mut client, &desired).await;
        close(&mut client).await;
        result
    }

    async fn finalize(&self, record: &mut PortForward) -> ReconcileOutcome {
        if !record.status.pending_cleanup {
            debug!("{} owes no cleanup", record.rule_name());
            return ReconcileOutcome {
                action: ReconcileAction::Released,
                requeue: None,
                persist: false,
                remove: true,
                error: None,
            };
        }

        match self.cleanup(&record.rule_name()).await {
            Ok(action) => {
                record.status.pending_cleanup = false;
                ReconcileOutcome {
                    remove: true,
                    ..ReconcileOutcome::done(action, None)
                }
            }
            Err(err) => self.failed(record, err),
        }
    }

    async fn cleanup(&self, name: &str) -> Result<ReconcileAction, ConnectError> {
        let mut client = self.connector.connect().await?;
        let result = remove(&mut client, name).await;
        close(&mut client).await;
        result
    }

    fn failed(&self, record: &mut PortForward, err: ConnectError) -> ReconcileOutcome {
        warn!("reconciling {} failed: {}", record.rule_name(), err);
        record.status.set_condition(Condition::new(
            READY_CONDITION,
            false,
            FAILED_REASON,
            err.to_string(),
            record.generation,
        ));
        ReconcileOutcome {
            error: Some(err),
            ..ReconcileOutcome::done(ReconcileAction::Failed, Some(self.options.error_requeue))
        }
    }
}

async fn apply<C: VirtualServers>(
    client: &mut C,
    desired: &CreateInput,
) -> Result<ReconcileAction, ConnectError> {
    let current = match client.read(&ReadInput::new(&desired.server_name)).await {
        Ok(rule) => Some(rule),
        Err(ConnectError::NotFound(_)) => None,
        Err(err) => return Err(err),
    };

    match plan(desired, current.as_ref()) {
        Plan::Unchanged => Ok(ReconcileAction::Unchanged),
        Plan::Create => {
            info!("creating port forward {} on the router", desired.server_name);
            client.create(desired).await?;
            Ok(ReconcileAction::Created)
        }
        Plan::Recreate { changed } => {
            info!(
                "recreating port forward {} ({} changed)",
                desired.server_name,
                changed.join(", ")
            );
            client.delete(&DeleteInput::new(&desired.server_name)).await?;
            client.create(desired).await?;
            Ok(ReconcileAction::Recreated { changed })
        }
    }
}

/// Deletes rules named `name` until a read no longer finds one.
///
/// The router removes one entry per command, and nothing stops it from
/// holding several rules with the same name.
async fn remove<C: VirtualServers>(
    client: &mut C,
    name: &str,
) -> Result<ReconcileAction, ConnectError> {
    let mut deleted = 0;
    while deleted < MAX_REMOVALS {
        match client.read(&ReadInput::new(name)).await {
            Ok(_) => {
                info!("deleting port forward {} from the router", name);
                client.delete(&DeleteInput::new(name)).await?;
                deleted += 1;
            }
            Err(ConnectError::NotFound(_)) if deleted > 0 => {
                return Ok(ReconcileAction::Deleted);
            }
            Err(ConnectError::NotFound(_)) => {
                debug!("port forward {} already absent from the router", name);
                return Ok(ReconcileAction::ReleasedFinalizer);
            }
            Err(err) => return Err(err),
        }
    }
    Err(ConnectError::Command {
        command: REMOVE_COMMAND.to_string(),
        output: format!("{name} still present after {deleted} removals"),
    })
}

async fn close<C: VirtualServers>(client: &mut C) {
    if let Err(err) = client.close().await {
        debug!("closing router session failed: {}", err);
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Default)]
    struct RouterState {
        rules: Vec<VirtualServer>,
        calls: Vec<String>,
        fail_delete: bool,
        sticky: bool,
        unreachable: bool,
    }

    /// In-memory router shared between a test and the clients it hands out.
    #[derive(Clone, Default)]
    struct FakeRouter(Arc<Mutex<RouterState>>);

    impl FakeRouter {
        fn with_rules(rules: Vec<VirtualServer>) -> Self {
            let router = Self::default();
            router.state().rules = rules;
            router
        }

        fn state(&self) -> std::sync::MutexGuard<'_, RouterState> {
            self.0.lock().expect("router state lock")
        }

        fn calls(&self) -> Vec<String> {
            self.state().calls.clone()
        }

        fn take_calls(&self) -> Vec<String> {
            std::mem::take(&mut self.state().calls)
        }

        fn rules(&self) -> Vec<VirtualServer> {
            self.state().rules.clone()
        }
    }

    struct FakeClient(FakeRouter);

    impl VirtualServers for FakeClient {
        async fn list(&mut self) -> Result<Vec<VirtualServer>, ConnectError> {
            let mut state = self.0.state();
            state.calls.push("list".to_string());
            Ok(state.rules.clone())
        }

        async fn create(&mut self, input: &CreateInput) -> Result<(), ConnectError> {
            let mut state = self.0.state();
            state.calls.push(format!("create {}", input.server_name));
            state.rules.push(input.to_virtual_server());
            Ok(())
        }

        async fn delete(&mut self, input: &DeleteInput) -> Result<(), ConnectError> {
            let mut state = self.0.state();
            state.calls.push(format!("delete {}", input.name));
            if state.fail_delete {
                return Err(ConnectError::Command {
                    command: "nat/virtual-servers/remove".to_string(),
                    output: "Failed to delete Entry".to_string(),
                });
            }
            if state.sticky {
                return Ok(());
            }
            if let Some(pos) = state.rules.iter().position(|r| r.server_name == input.name) {
                state.rules.remove(pos);
            }
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ConnectError> {
            self.0.state().calls.push("close".to_string());
            Ok(())
        }
    }

    impl Connector for FakeRouter {
        type Client = FakeClient;

        async fn connect(&self) -> Result<FakeClient, ConnectError> {
            if self.state().unreachable {
                return Err(ConnectError::ConnectFailed(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )));
            }
            Ok(FakeClient(self.clone()))
        }
    }

    fn nats_rule() -> PortForwardRuleSpec {
        PortForwardRuleSpec {
            external_port_start: 4222,
            external_port_end: None,
            internal_port_start: 4222,
            internal_port_end: Some(0),
            protocol: Protocol::Tcp,
            server_ip: Ipv4Addr::new(192, 168, 1, 2),
            interface: "veip0.1".to_string(),
        }
    }

    fn guarded_record() -> PortForward {
        let mut record = PortForward::new("default", "nats", nats_rule());
        record.status.pending_cleanup = true;
        record
    }

    #[test]
    fn rule_name_joins_namespace_and_name() {
        let record = guarded_record();
        assert_eq!(record.rule_name(), "default-nats");

        let input = record.to_create_input();
        assert_eq!(input.server_name, "default-nats");
        assert_eq!(input.internal_port_end, None);
        assert_eq!(input.effective_internal_port_end(), 4222);
    }

    #[test]
    fn plan_compares_every_field_but_the_name() {
        let desired = guarded_record().to_create_input();
        let mut current = desired.to_virtual_server();

        assert_eq!(plan(&desired, None), Plan::Create);
        assert_eq!(plan(&desired, Some(&current)), Plan::Unchanged);

        current.server_ip_address = "192.168.1.3".to_string();
        current.external_port_end = "4223".to_string();
        assert_eq!(
            plan(&desired, Some(&current)),
            Plan::Recreate {
                changed: vec!["externalPortEnd", "serverIP"]
            }
        );
    }

    #[test]
    fn set_condition_keeps_transition_time_without_flip() {
        let mut status = PortForwardStatus::default();
        let mut first = Condition::new(READY_CONDITION, true, READY_REASON, "ok", 1);
        first.last_transition_ms = 10;
        status.set_condition(first);

        let mut same = Condition::new(READY_CONDITION, true, READY_REASON, "still ok", 2);
        same.last_transition_ms = 20;
        status.set_condition(same);
        let ready = status.condition(READY_CONDITION).expect("ready");
        assert_eq!(ready.last_transition_ms, 10);
        assert_eq!(ready.message, "still ok");
        assert_eq!(ready.observed_generation, 2);

        let mut flipped = Condition::new(READY_CONDITION, false, FAILED_REASON, "boom", 2);
        flipped.last_transition_ms = 30;
        status.set_condition(flipped);
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].last_transition_ms, 30);
    }

    #[tokio::test]
    async fn first_pass_only_sets_cleanup_marker() {
        let router = FakeRouter::default();
        let reconciler = Reconciler::new(router.clone());
        let mut record = PortForward::new("default", "nats", nats_rule());

        let outcome = reconciler.reconcile(&mut record).await;

        assert_eq!(outcome.action, ReconcileAction::AddedFinalizer);
        assert!(outcome.persist);
        assert_eq!(outcome.requeue, Some(Duration::ZERO));
        assert!(record.status.pending_cleanup);
        assert!(router.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_rule_is_created_and_reported_ready() {
        let router = FakeRouter::default();
        let reconciler = Reconciler::new(router.clone());
        let mut record = guarded_record();

        let outcome = reconciler.reconcile(&mut record).await;

        assert_eq!(outcome.action, ReconcileAction::Created);
        assert_eq!(outcome.requeue, Some(Duration::from_secs(3600)));
        assert!(outcome.error.is_none());
        assert!(record.is_ready());
        assert_eq!(
            record.status.condition(READY_CONDITION).map(|c| c.reason.as_str()),
            Some(READY_REASON)
        );
        assert_eq!(router.calls(), vec!["list", "create default-nats", "close"]);
    }

    #[tokio::test]
    async fn second_pass_is_idempotent() {
        let router = FakeRouter::default();
        let reconciler = Reconciler::new(router.clone());
        let mut record = guarded_record();

        reconciler.reconcile(&mut record).await;
        router.take_calls();
        let outcome = reconciler.reconcile(&mut record).await;

        assert_eq!(outcome.action, ReconcileAction::Unchanged);
        assert_eq!(router.calls(), vec!["list", "close"]);
        assert_eq!(router.rules().len(), 1);
    }

    #[tokio::test]
    async fn interface_drift_deletes_then_creates() {
        let record = guarded_record();
        let mut drifted = record.to_create_input().to_virtual_server();
        drifted.wan_interface = "ppp0.1".to_string();
        let router = FakeRouter::with_rules(vec![drifted]);
        let reconciler = Reconciler::new(router.clone());
        let mut record = record;

        let outcome = reconciler.reconcile(&mut record).await;

        assert_eq!(
            outcome.action,
            ReconcileAction::Recreated {
                changed: vec!["interface"]
            }
        );
        assert_eq!(
            router.calls(),
            vec!["list", "delete default-nats", "create default-nats", "close"]
        );
        assert_eq!(
            router.rules(),
            vec![record.to_create_input().to_virtual_server()]
        );
    }

    #[tokio::test]
    async fn deletion_removes_rule_then_releases_record() {
        let record = guarded_record();
        let router = FakeRouter::with_rules(vec![record.to_create_input().to_virtual_server()]);
        let reconciler = Reconciler::new(router.clone());
        let mut record = record;
        record.deletion_requested = true;

        let outcome = reconciler.reconcile(&mut record).await;

        assert_eq!(outcome.action, ReconcileAction::Deleted);
        assert!(outcome.remove);
        assert!(outcome.persist);
        assert!(!record.status.pending_cleanup);
        assert!(router.rules().is_empty());
    }

    #[tokio::test]
    async fn deletion_removes_every_rule_sharing_the_name() {
        let record = guarded_record();
        let first = record.to_create_input().to_virtual_server();
        let mut second = first.clone();
        second.external_port_start = "4223".to_string();
        second.external_port_end = "4223".to_string();
        let router = FakeRouter::with_rules(vec![first, second]);
        let reconciler = Reconciler::new(router.clone());
        let mut record = record;
        record.deletion_requested = true;

        let outcome = reconciler.reconcile(&mut record).await;

        assert_eq!(outcome.action, ReconcileAction::Deleted);
        assert!(outcome.remove);
        assert!(!record.status.pending_cleanup);
        assert!(router.rules().is_empty());
        assert_eq!(
            router.calls(),
            vec![
                "list",
                "delete default-nats",
                "list",
                "delete default-nats",
                "list",
                "close"
            ]
        );
    }

    #[tokio::test]
    async fn deletion_gives_up_when_rule_keeps_coming_back() {
        let record = guarded_record();
        let router = FakeRouter::with_rules(vec![record.to_create_input().to_virtual_server()]);
        router.state().sticky = true;
        let reconciler = Reconciler::new(router.clone());
        let mut record = record;
        record.deletion_requested = true;

        let outcome = reconciler.reconcile(&mut record).await;

        assert_eq!(outcome.action, ReconcileAction::Failed);
        assert!(!outcome.remove);
        assert!(record.status.pending_cleanup);
        assert!(matches!(outcome.error, Some(ConnectError::Command { .. })));
        let deletes = router.calls().iter().filter(|c| c.starts_with("delete")).count();
        assert_eq!(deletes, MAX_REMOVALS);
    }

    #[tokio::test]
    async fn deletion_of_absent_rule_only_reads() {
        let router = FakeRouter::default();
        let reconciler = Reconciler::new(router.clone());
        let mut record = guarded_record();
        record.deletion_requested = true;

        let outcome = reconciler.reconcile(&mut record).await;

        assert_eq!(outcome.action, ReconcileAction::ReleasedFinalizer);
        assert!(outcome.remove);
        assert!(!record.status.pending_cleanup);
        assert_eq!(router.calls(), vec!["list", "close"]);
    }

    #[tokio::test]
    async fn deletion_without_marker_skips_router() {
        let router = FakeRouter::default();
        let reconciler = Reconciler::new(router.clone());
        let mut record = PortForward::new("default", "nats", nats_rule());
        record.deletion_requested = true;

        let outcome = reconciler.reconcile(&mut record).await;

        assert_eq!(outcome.action, ReconcileAction::Released);
        assert!(outcome.remove);
        assert!(!outcome.persist);
        assert!(router.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_delete_keeps_cleanup_marker() {
        let record = guarded_record();
        let router = FakeRouter::with_rules(vec![record.to_create_input().to_virtual_server()]);
        router.state().fail_delete = true;
        let reconciler = Reconciler::new(router.clone());
        let mut record = record;
        record.deletion_requested = true;

        let outcome = reconciler.reconcile(&mut record).await;

        assert_eq!(outcome.action, ReconcileAction::Failed);
        assert!(!outcome.remove);
        assert_eq!(outcome.requeue, Some(Duration::from_secs(30)));
        assert!(matches!(outcome.error, Some(ConnectError::Command { .. })));
        assert!(record.status.pending_cleanup);
        assert!(!record.is_ready());
        assert_eq!(router.rules().len(), 1);
        assert_eq!(router.calls().last().map(String::as_str), Some("close"));
    }

    #[tokio::test]
    async fn unreachable_router_marks_record_not_ready() {
        let router = FakeRouter::default();
        router.state().unreachable = true;
        let reconciler = Reconciler::with_options(
            router.clone(),
            ReconcilerOptions {
                success_requeue: Duration::from_secs(600),
                error_requeue: Duration::from_secs(5),
            },
        );
        let mut record = guarded_record();

        let outcome = reconciler.reconcile(&mut record).await;

        assert_eq!(outcome.action, ReconcileAction::Failed);
        assert_eq!(outcome.requeue, Some(Duration::from_secs(5)));
        let ready = record.status.condition(READY_CONDITION).expect("ready");
        assert!(!ready.status);
        assert_eq!(ready.reason, FAILED_REASON);
        assert!(ready.message.contains("connection refused"));
    }

    #[tokio::test]
    async fn invalid_rule_fails_before_connecting() {
        let router = FakeRouter::default();
        let reconciler = Reconciler::new(router.clone());
        let mut record = guarded_record();
        record.spec.rule.external_port_start = 0;

        let outcome = reconciler.reconcile(&mut record).await;

        assert!(matches!(outcome.error, Some(ConnectError::InvalidInput(_))));
        assert!(router.calls().is_empty());
    }

    #[test]
    fn record_deserializes_from_json() {
        let record: PortForward = serde_json::from_str(
            r#"{
                "name": "nats",
                "namespace": "default",
                "spec": {
                    "for": {"name": "nats", "port": 4222},
                    "rule": {
                        "externalPortStart": 4222,
                        "internalPortStart": 4222,
                        "protocol": "TCP",
                        "serverIP": "192.168.1.2",
                        "interface": "veip0.1"
                    }
                }
            }"#,
        )
        .expect("record");

        assert_eq!(record.spec.rule, {
            let mut rule = nats_rule();
            rule.internal_port_end = None;
            rule
        });
        assert_eq!(
            record.spec.for_service.as_ref().map(|s| s.name.as_str()),
            Some("nats")
        );
        assert!(!record.status.pending_cleanup);
        assert!(record.status.conditions.is_empty());
    }
}
