//! The `Resource` entity and its role type.

use crate::arena::{ActionId, ColocationId, NodeId, ResourceId};
use crate::score::Score;
use crate::time::EffectiveTime;
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};

/// A resource's lifecycle role: `Stopped < Unpromoted < Started < Promoted`.
///
/// A closed, ordered sum type rather than a stringly-typed role name
/// or an enum-coded integer with implicit ordering.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub enum Role {
    #[default]
    Unknown,
    Stopped,
    Unpromoted,
    Started,
    Promoted,
}

impl Role {
    /// Explicit ordinal used for comparisons rather than relying on enum
    /// declaration order (which happens to agree here, but an explicit
    /// function documents the invariant instead of leaving it implicit).
    fn ordinal(self) -> u8 {
        match self {
            Role::Unknown => 0,
            Role::Stopped => 1,
            Role::Unpromoted => 2,
            Role::Started => 3,
            Role::Promoted => 4,
        }
    }

    pub fn is_active(self) -> bool {
        !matches!(self, Role::Unknown | Role::Stopped)
    }
}

impl PartialOrd for Role {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Role {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ordinal().cmp(&other.ordinal())
    }
}

/// A role filter on a colocation/ordering constraint: either a specific
/// role or "any".
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum RoleFilter {
    Any,
    Specific(Role),
}

impl RoleFilter {
    pub fn matches(self, role: Role) -> bool {
        match self {
            RoleFilter::Any => true,
            RoleFilter::Specific(r) => r == role,
        }
    }
}

/// A resource is polymorphic over {Primitive, Group, Clone, Bundle}.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ResourceVariant {
    Primitive,
    Group,
    Clone { promotable: bool },
    Bundle,
}

impl ResourceVariant {
    /// Ordering used by colocation-list sorting.
    fn rank(self) -> u8 {
        match self {
            ResourceVariant::Primitive => 0,
            ResourceVariant::Group => 1,
            ResourceVariant::Clone { promotable: false } => 2,
            ResourceVariant::Clone { promotable: true } => 3,
            ResourceVariant::Bundle => 4,
        }
    }

    pub fn variant_rank(self) -> u8 {
        self.rank()
    }

    pub fn is_promotable_clone(self) -> bool {
        matches!(self, ResourceVariant::Clone { promotable: true })
    }
}

crate::flag_set! {
    /// Every named resource flag gets its own constant rather than a loose
    /// collection of booleans.
    pub struct ResourceFlags: u32 {
        MANAGED            = 1 << 0,
        UNIQUE             = 1 << 1,
        PROMOTABLE         = 1 << 2,
        CRITICAL           = 1 << 3,
        FAILED             = 1 << 4,
        STOP_IF_FAILED     = 1 << 5,
        BLOCKED            = 1 << 6,
        PROVISIONAL        = 1 << 7,
        IGNORE_FAILURE     = 1 << 8,
        REMOVED            = 1 << 9,
        REMOVED_FILLER     = 1 << 10,
        NEEDS_FENCING      = 1 << 11,
        UPDATING_NODES     = 1 << 12,
        MERGING            = 1 << 13,
        START_PENDING      = 1 << 14,
        MAINTENANCE        = 1 << 15,
        IS_REMOTE_NODE     = 1 << 16,
        MIGRATABLE         = 1 << 17,
    }
}

impl Default for ResourceFlags {
    fn default() -> Self {
        ResourceFlags::MANAGED.union(ResourceFlags::UNIQUE)
    }
}

/// Failure-handling severity, least to most invasive. Declaration order
/// *is* severity order here, tested explicitly below rather than left
/// implicit.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default)]
pub enum OnFail {
    #[default]
    Ignore,
    Demote,
    Restart,
    RestartContainer,
    ResetRemote,
    Stop,
    Ban,
    FenceNode,
    StandbyNode,
    Block,
}

impl OnFail {
    pub fn max(self, other: OnFail) -> OnFail {
        std::cmp::max(self, other)
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct FailureRecord {
    pub node: NodeId,
    pub task: String,
    pub on_fail: OnFail,
}

/// A resource.
#[derive(Clone, Debug)]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,
    pub variant: ResourceVariant,
    pub priority: Score,
    pub stickiness: Score,
    pub role: Role,
    pub next_role: Role,

    pub allowed_nodes: BTreeMap<NodeId, Score>,
    pub running_on: SmallVec<[NodeId; 2]>,

    pub flags: ResourceFlags,

    pub parent: Option<ResourceId>,
    pub children: Vec<ResourceId>,

    pub container: Option<ResourceId>,
    pub fillers: Vec<ResourceId>,

    /// Colocations where this resource is the dependent, sorted by
    /// primary priority/variant/id.
    pub this_with_colocations: Vec<ColocationId>,
    /// Colocations where this resource is the primary, sorted by
    /// dependent priority/variant/id.
    pub with_this_colocations: Vec<ColocationId>,

    pub actions: Vec<ActionId>,

    pub pending_task: Option<String>,
    pub pending_node: Option<NodeId>,

    pub partial_migration_source: Option<NodeId>,
    pub partial_migration_target: Option<NodeId>,
    pub dangling_migrations: BTreeSet<NodeId>,

    pub failure_timeout: Option<i64>,
    pub remote_reconnect_ms: Option<i64>,
    pub lock_node: Option<NodeId>,
    pub lock_time: Option<EffectiveTime>,

    pub fail_count: BTreeMap<NodeId, u32>,
    pub failures: Vec<FailureRecord>,

    pub utilization: BTreeMap<String, i64>,

    /// Templates for recurring operations; `(name, interval_ms)`.
    pub operation_templates: Vec<OperationTemplate>,
}

#[derive(Clone, Debug)]
pub struct OperationTemplate {
    pub name: String,
    pub interval_ms: u64,
    pub role: Option<Role>,
    pub timeout_ms: Option<u64>,
}

impl OperationTemplate {
    /// `start`/`stop`/`promote`/`demote`/`reload-agent`/`migrate_to`/
    /// `migrate_from` are lifecycle actions, never recurring, regardless of
    /// any configured interval.
    pub fn is_recurring_candidate(&self) -> bool {
        self.interval_ms > 0
            && !matches!(
                self.name.as_str(),
                "start" | "stop" | "promote" | "demote" | "reload-agent" | "migrate_to" | "migrate_from"
            )
    }

    pub fn is_probe(&self) -> bool {
        self.interval_ms == 0 && self.name == "monitor"
    }
}

impl Resource {
    pub fn new(id: ResourceId, name: impl Into<String>, variant: ResourceVariant) -> Resource {
        Resource {
            id,
            name: name.into(),
            variant,
            priority: Score::ZERO,
            stickiness: Score::ZERO,
            role: Role::Unknown,
            next_role: Role::Unknown,
            allowed_nodes: BTreeMap::new(),
            running_on: SmallVec::new(),
            flags: ResourceFlags::default(),
            parent: None,
            children: Vec::new(),
            container: None,
            fillers: Vec::new(),
            this_with_colocations: Vec::new(),
            with_this_colocations: Vec::new(),
            actions: Vec::new(),
            pending_task: None,
            pending_node: None,
            partial_migration_source: None,
            partial_migration_target: None,
            dangling_migrations: BTreeSet::new(),
            failure_timeout: None,
            remote_reconnect_ms: None,
            lock_node: None,
            lock_time: None,
            fail_count: BTreeMap::new(),
            failures: Vec::new(),
            utilization: BTreeMap::new(),
            operation_templates: Vec::new(),
        }
    }

    /// Whether this resource has neither a recorded running location nor a
    /// node chosen for it so far this pass. Checks `assigned_node` (running
    /// location falling back to `pending_node`), not `running_on` alone, so
    /// a resource placed earlier in this same pass already counts as
    /// assigned to a later colocation's "primary still unassigned" check.
    pub fn is_unassigned(&self) -> bool {
        self.flags.contains(ResourceFlags::PROVISIONAL) || self.assigned_node().is_none()
    }

    pub fn is_multiply_active(&self) -> bool {
        self.running_on.len() > 1
    }

    pub fn ban_from(&mut self, node: NodeId, reason: &str) {
        tracing::info!(resource = %self.name, node = ?node, %reason, "banning resource from node");
        self.allowed_nodes.insert(node, Score::NEG_INFINITY);
    }

    pub fn ban_from_all(&mut self, reason: &str) {
        tracing::info!(resource = %self.name, %reason, "banning resource from all nodes");
        for score in self.allowed_nodes.values_mut() {
            *score = Score::NEG_INFINITY;
        }
    }

    pub fn effective_fail_count(&self, node: NodeId) -> u32 {
        self.fail_count.get(&node).copied().unwrap_or(0)
    }

    pub fn record_failure(&mut self, node: NodeId, task: impl Into<String>, on_fail: OnFail) {
        *self.fail_count.entry(node).or_insert(0) += 1;
        self.failures.push(FailureRecord {
            node,
            task: task.into(),
            on_fail,
        });
    }

    pub fn assigned_node(&self) -> Option<NodeId> {
        self.running_on.first().copied().or(self.pending_node)
    }
}

/// Sort key for colocation lists:
/// 1. non-null beats null, higher priority first
/// 2. higher-variant resource first
/// 3. between clones, promotable before non-promotable
/// 4. tie-break on lexicographic resource id
///
/// `variant_rank` already encodes (2) and (3) together since promotable
/// clones rank above non-promotable clones.
pub fn colocation_sort_key(priority: Score, variant: ResourceVariant, id: &str) -> impl Ord + '_ {
    (std::cmp::Reverse(priority), std::cmp::Reverse(variant.rank()), id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_ordering_is_stopped_unpromoted_started_promoted() {
        assert!(Role::Stopped < Role::Unpromoted);
        assert!(Role::Unpromoted < Role::Started);
        assert!(Role::Started < Role::Promoted);
    }

    #[test]
    fn on_fail_severity_order_is_least_to_most_invasive() {
        let ordered = [
            OnFail::Ignore,
            OnFail::Demote,
            OnFail::Restart,
            OnFail::RestartContainer,
            OnFail::ResetRemote,
            OnFail::Stop,
            OnFail::Ban,
            OnFail::FenceNode,
            OnFail::StandbyNode,
            OnFail::Block,
        ];
        for window in ordered.windows(2) {
            assert!(window[0] < window[1], "{:?} should be < {:?}", window[0], window[1]);
        }
    }

    #[test]
    fn on_fail_max_is_idempotent() {
        let a = OnFail::Restart;
        let b = OnFail::Ban;
        assert_eq!(a.max(b), b.max(a));
        assert_eq!(a.max(b).max(a), a.max(b));
    }

    #[test]
    fn variant_rank_orders_bundle_over_clone_over_group_over_primitive() {
        assert!(ResourceVariant::Bundle.rank() > ResourceVariant::Clone { promotable: true }.rank());
        assert!(
            ResourceVariant::Clone { promotable: true }.rank()
                > ResourceVariant::Clone { promotable: false }.rank()
        );
        assert!(ResourceVariant::Clone { promotable: false }.rank() > ResourceVariant::Group.rank());
        assert!(ResourceVariant::Group.rank() > ResourceVariant::Primitive.rank());
    }

    #[test]
    fn recurring_candidate_excludes_lifecycle_tasks() {
        let start = OperationTemplate {
            name: "start".into(),
            interval_ms: 1000,
            role: None,
            timeout_ms: None,
        };
        assert!(!start.is_recurring_candidate());

        let monitor = OperationTemplate {
            name: "monitor".into(),
            interval_ms: 10000,
            role: None,
            timeout_ms: None,
        };
        assert!(monitor.is_recurring_candidate());
    }
}
