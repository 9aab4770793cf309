//! The `Node` entity.

use crate::arena::{NodeId, ResourceId};
use crate::score::Score;
use crate::time::EffectiveTime;
use std::collections::{BTreeMap, BTreeSet};

/// A node is one of {cluster member, remote, guest, observer}.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum NodeKind {
    Cluster,
    Remote,
    Guest,
    /// The deprecated "ping" node type, retained
    /// for configurations that still declare one; it never runs resources
    /// and never participates in placement.
    Observer,
}

/// Node membership/process-group bookkeeping consumed by online
/// determination.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum JoinState {
    Member,
    Down,
    Pending,
    Banned,
    Nack,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ExpectedState {
    Member,
    Down,
}

/// A host (or logical remote/guest node) that may run resources.
#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,

    pub online: bool,
    pub unclean: bool,
    pub shutdown: bool,
    pub pending: bool,
    pub standby: bool,
    pub maintenance: bool,
    /// Set by the `node-health-strategy` adjustment
    /// (`migrate-on-red`/`only-green`) when this node's summed health
    /// attributes fall below the configured threshold.
    pub health_banned: bool,

    /// Current placement score for the resource under consideration; reset
    /// and recomputed per-resource during colocation scoring.
    pub weight: Score,

    pub attrs: BTreeMap<String, String>,
    pub utilization: BTreeMap<String, i64>,
    pub running_rsc: BTreeSet<ResourceId>,

    /// Membership bookkeeping.
    pub when_member: EffectiveTime,
    pub when_online: EffectiveTime,
    pub join: JoinState,
    pub expected: ExpectedState,
    pub shutdown_requested: bool,
    pub terminate_requested: bool,

    /// Populated only for remote/guest nodes.
    pub connection_rsc: Option<ResourceId>,
    pub was_fenced: bool,
    pub requires_reset: bool,

    /// Aggregate health attribute reading used by the node-health-strategy
    /// adjustment.
    pub health_score: Score,

    /// Why this node was fenced, if it was. Populated by online
    /// determination (table) for diagnostic purposes.
    pub fence_reason: Option<&'static str>,
}

impl Node {
    pub fn new(id: NodeId, name: impl Into<String>, kind: NodeKind) -> Node {
        Node {
            id,
            name: name.into(),
            kind,
            online: false,
            unclean: false,
            shutdown: false,
            pending: false,
            standby: false,
            maintenance: false,
            health_banned: false,
            weight: Score::ZERO,
            attrs: BTreeMap::new(),
            utilization: BTreeMap::new(),
            running_rsc: BTreeSet::new(),
            when_member: EffectiveTime::NOT_SET,
            when_online: EffectiveTime::NOT_SET,
            join: JoinState::Down,
            expected: ExpectedState::Member,
            shutdown_requested: false,
            terminate_requested: false,
            connection_rsc: None,
            was_fenced: false,
            requires_reset: false,
            health_score: Score::ZERO,
            fence_reason: None,
        }
    }

    pub fn is_remote_or_guest(&self) -> bool {
        matches!(self.kind, NodeKind::Remote | NodeKind::Guest)
    }

    /// Whether this node is eligible to run resources at all: online,
    /// not unclean, not in standby, not under maintenance.
    pub fn is_eligible_for_placement(&self) -> bool {
        self.online && !self.unclean && !self.standby && !self.maintenance && !self.health_banned
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// The default colocation attribute used when a constraint doesn't
    /// specify one.
    pub fn unique_name(&self) -> &str {
        self.attrs
            .get("#uname")
            .map(String::as_str)
            .unwrap_or(&self.name)
    }

    pub fn fence(&mut self, reason: &'static str) {
        self.unclean = true;
        self.online = false;
        self.fence_reason = Some(reason);
        tracing::info!(node = %self.name, %reason, "scheduling node for fencing");
    }

    pub fn mark_standby_pending(&mut self) {
        self.standby = true;
        self.pending = true;
        self.online = false;
    }
}
