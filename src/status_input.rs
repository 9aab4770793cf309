//! Raw, pre-interpretation cluster status input.
//!
//! These types mirror what a membership/CRM layer and local resource
//! managers report before the unpacker turns them into
//! [`crate::node::Node`]/[`crate::resource::Resource`] state. Nothing here
//! interprets anything; interpretation belongs to `unpack`.

use crate::time::EffectiveTime;
use std::collections::BTreeMap;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum CcmState {
    Member,
    NotMember,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum CrmdState {
    Online,
    Offline,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum JoinPhase {
    Member,
    Down,
    Pending,
    Banned,
    Nack,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ExpectedPhase {
    Member,
    Down,
}

/// One node's raw membership block, as reported by the cluster layer.
#[derive(Clone, Debug)]
pub struct NodeStatus {
    pub id: String,
    pub in_ccm: CcmState,
    pub crmd: CrmdState,
    pub join: JoinPhase,
    pub expected: ExpectedPhase,
    pub shutdown_requested: bool,
    pub terminate_requested: bool,
    pub transient_attributes: BTreeMap<String, String>,
    /// Set when this node is itself the resource backing a remote/guest
    /// connection, keyed by the connection resource's id.
    pub connection_rsc: Option<String>,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ExecutionStatus {
    Pending,
    Done,
    Cancelled,
    TimedOut,
    NotSupported,
    Error,
    /// Connection failure to the executor itself -- distinct from `Error`,
    /// which is an agent-reported failure.
    NotConnected,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ExitStatus {
    Ok,
    Error,
    InvalidParam,
    Unimplemented,
    InsufficientPriv,
    NotInstalled,
    NotConfigured,
    NotRunning,
    RunningPromoted,
    FailedPromoted,
    DegradedPromoted,
    Degraded,
    Unknown(i32),
}

/// A single line of a resource's recorded operation history
/// a resource agent reports for one completed or pending action.
#[derive(Clone, Debug)]
pub struct HistoryEntry {
    pub resource: String,
    pub node: String,
    pub call_id: i64,
    pub task: String,
    pub interval_ms: u64,
    pub execution_status: ExecutionStatus,
    pub exit_status: ExitStatus,
    pub expected_exit_status: Option<ExitStatus>,
    pub exit_reason: Option<String>,
    pub last_change: EffectiveTime,
    /// `(transition-number, action-number)` from the transition key that
    /// produced this entry; `None` for entries predating transition-key
    /// tracking; older history entries predate the key and carry `None`.
    pub transition_key: Option<(u64, u64)>,
    pub op_digest_matches: Option<bool>,
    /// Populated only for `migrate_to`/`migrate_from` entries.
    pub migrate_source: Option<String>,
    pub migrate_target: Option<String>,
}

impl HistoryEntry {
    pub fn is_recurring(&self) -> bool {
        self.interval_ms > 0
    }

    pub fn is_probe(&self) -> bool {
        self.interval_ms == 0 && self.task == "monitor"
    }

    pub fn is_migrate_to(&self) -> bool {
        self.task == "migrate_to"
    }

    pub fn is_migrate_from(&self) -> bool {
        self.task == "migrate_from"
    }
}

/// The raw per-resource status block: its lifecycle meta-attributes as last
/// reported, plus the full history.
#[derive(Clone, Debug)]
pub struct ResourceStatus {
    pub id: String,
    pub managed: bool,
    pub history: Vec<HistoryEntry>,
    /// Present if the cluster layer has a recorded shutdown lock for this
    /// resource.
    pub lock_node: Option<String>,
    pub lock_time: Option<EffectiveTime>,
}

#[derive(Clone, Debug, Default)]
pub struct StatusInput {
    pub nodes: Vec<NodeStatus>,
    pub resources: Vec<ResourceStatus>,
}
