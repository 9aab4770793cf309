//! Actions, ordering relations, and the transition graph they form
//! that make up the scheduler's output.

use crate::arena::{Arena, ActionId, NodeId, OrderingId, ResourceId};
use std::collections::BTreeMap;

crate::flag_set! {
    pub struct ActionFlags: u8 {
        PSEUDO      = 1 << 0,
        RUNNABLE    = 1 << 1,
        OPTIONAL    = 1 << 2,
        MIGRATABLE  = 1 << 3,
        RESCHEDULE  = 1 << 4,
    }
}

impl Default for ActionFlags {
    fn default() -> Self {
        ActionFlags::RUNNABLE
    }
}

crate::flag_set! {
    /// A typed edge between two actions, drawn from: `first_implies_then`,
    /// `then_implies_first`, `unrunnable_first_blocks`,
    /// `first_implies_then_graphed`, `then_implies_first_graphed`,
    /// `anti_colocation`, `ordered`, `intermediate_stop`.
    #[derive(Default)]
    pub struct OrderingFlags: u16 {
        FIRST_IMPLIES_THEN          = 1 << 0,
        THEN_IMPLIES_FIRST          = 1 << 1,
        UNRUNNABLE_FIRST_BLOCKS     = 1 << 2,
        FIRST_IMPLIES_THEN_GRAPHED  = 1 << 3,
        THEN_IMPLIES_FIRST_GRAPHED  = 1 << 4,
        ANTI_COLOCATION             = 1 << 5,
        ORDERED                     = 1 << 6,
        INTERMEDIATE_STOP           = 1 << 7,
    }
}

/// Common combinations named so call sites read like named ordering
/// constants rather than repeating bit math.
impl OrderingFlags {
    pub const MANDATORY: OrderingFlags =
        OrderingFlags::FIRST_IMPLIES_THEN.union(OrderingFlags::UNRUNNABLE_FIRST_BLOCKS);
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Task {
    Start,
    Stop,
    Promote,
    Demote,
    Monitor,
    Cancel,
    Fence,
    Migrate,
    MigrateTo,
    MigrateFrom,
    Notify,
    ReloadAgent,
    ClearFailcount,
    Custom(&'static str),
}

impl Task {
    pub fn as_str(self) -> &'static str {
        match self {
            Task::Start => "start",
            Task::Stop => "stop",
            Task::Promote => "promote",
            Task::Demote => "demote",
            Task::Monitor => "monitor",
            Task::Cancel => "cancel",
            Task::Fence => "fence",
            Task::Migrate => "migrate",
            Task::MigrateTo => "migrate_to",
            Task::MigrateFrom => "migrate_from",
            Task::Notify => "notify",
            Task::ReloadAgent => "reload-agent",
            Task::ClearFailcount => "clear_failcount",
            Task::Custom(s) => s,
        }
    }
}

/// An action node in the transition graph.
#[derive(Clone, Debug)]
pub struct Action {
    pub id: ActionId,
    pub task: Task,
    pub interval_ms: u64,
    pub rsc: Option<ResourceId>,
    pub node: Option<NodeId>,
    pub meta: BTreeMap<String, String>,
    pub flags: ActionFlags,
    pub reason: String,
}

impl Action {
    /// `uuid` is `"<rsc-id>_<task>_<interval-ms>"`. Fence/pseudo
    /// actions without a resource fall back to the node name.
    pub fn uuid(&self, rsc_name: Option<&str>) -> String {
        let subject = rsc_name.unwrap_or("fence");
        format!("{subject}_{}_{}", self.task.as_str(), self.interval_ms)
    }

    pub fn is_pseudo(&self) -> bool {
        self.flags.contains(ActionFlags::PSEUDO)
    }

    pub fn is_runnable(&self) -> bool {
        self.flags.contains(ActionFlags::RUNNABLE)
    }

    pub fn is_optional(&self) -> bool {
        self.flags.contains(ActionFlags::OPTIONAL)
    }

    pub fn set_reason(&mut self, reason: impl Into<String>) {
        self.reason = reason.into();
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Ordering {
    pub id: OrderingId,
    pub first: ActionId,
    pub then: ActionId,
    pub flags: OrderingFlags,
}

/// The output DAG: a directed
/// acyclic multigraph over actions, with typed edges.
#[derive(Default)]
pub struct TransitionGraph {
    pub actions: Arena<Action, ActionId>,
    pub orderings: Arena<Ordering, OrderingId>,
    /// Adjacency from an action to orderings where it is the `first` side,
    /// maintained alongside `orderings` for fast propagation during
    /// runnability/optionality resolution.
    outgoing: BTreeMap<ActionId, Vec<OrderingId>>,
    incoming: BTreeMap<ActionId, Vec<OrderingId>>,
}

impl TransitionGraph {
    pub fn new() -> TransitionGraph {
        TransitionGraph::default()
    }

    pub fn add_action(&mut self, build: impl FnOnce(ActionId) -> Action) -> ActionId {
        self.actions.insert_with(build)
    }

    pub fn add_ordering(&mut self, first: ActionId, then: ActionId, flags: OrderingFlags) -> OrderingId {
        let id = self.orderings.insert_with(|id| Ordering { id, first, then, flags });
        self.outgoing.entry(first).or_default().push(id);
        self.incoming.entry(then).or_default().push(id);
        id
    }

    pub fn orderings_from(&self, action: ActionId) -> &[OrderingId] {
        self.outgoing.get(&action).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn orderings_into(&self, action: ActionId) -> &[OrderingId] {
        self.incoming.get(&action).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Deterministic, sorted-by-uuid iteration over all actions: every
    /// output action UUID must be identical across runs over the same
    /// inputs, so storage order never leaks into the result.
    pub fn actions_sorted(&self, rsc_name_of: impl Fn(ActionId) -> Option<String>) -> Vec<ActionId> {
        let mut ids: Vec<(String, ActionId)> = self
            .actions
            .iter()
            .map(|(id, a)| (a.uuid(rsc_name_of(id).as_deref()), id))
            .collect();
        ids.sort();
        ids.into_iter().map(|(_, id)| id).collect()
    }
}

