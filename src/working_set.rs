//! The working set: the root container for one scheduling pass
//! over which status unpacking, colocation scoring, and group
//! orchestration all run.
//!
//! Created once per pass, mutated only by unpacking and scheduling logic,
//! and discarded whole once the transition graph is extracted. Nothing here
//! survives across passes -- a fresh `WorkingSet` is the cheapest way to
//! guarantee a panic mid-pass can never leak partial state to the next one.

use crate::action::TransitionGraph;
use crate::arena::{Arena, ColocationId, NodeId, ResourceId};
use crate::colocation::{Colocation, TicketConstraint, TicketState};
use crate::config::{ClusterConfig, NoQuorumPolicy, PlacementStrategy};
use crate::error::{Diagnostics, SchedulingError};
use crate::node::Node;
use crate::resource::Resource;
use crate::time::EffectiveTime;
use std::collections::{BTreeMap, BTreeSet};

/// Per-pass reentrancy guard: a visited set keyed by resource index, rather
/// than mutable bits on the resource itself.
#[derive(Default)]
pub struct VisitedSet {
    merging: BTreeSet<ResourceId>,
    updating_nodes: BTreeSet<ResourceId>,
    assigning: BTreeSet<ResourceId>,
}

impl VisitedSet {
    /// Enter the `merging` traversal for `rsc`; returns `false` (and logs)
    /// if already entered, breaking a dependency cycle instead of recursing
    /// forever.
    pub fn enter_merging(&mut self, rsc: ResourceId) -> bool {
        if !self.merging.insert(rsc) {
            tracing::debug!(?rsc, traversal = "merging", "breaking dependency loop");
            return false;
        }
        true
    }

    pub fn leave_merging(&mut self, rsc: ResourceId) {
        self.merging.remove(&rsc);
    }

    pub fn enter_updating_nodes(&mut self, rsc: ResourceId) -> bool {
        if !self.updating_nodes.insert(rsc) {
            tracing::debug!(?rsc, traversal = "updating_nodes", "breaking dependency loop");
            return false;
        }
        true
    }

    pub fn leave_updating_nodes(&mut self, rsc: ResourceId) {
        self.updating_nodes.remove(&rsc);
    }

    pub fn enter_assigning(&mut self, rsc: ResourceId) -> bool {
        if !self.assigning.insert(rsc) {
            tracing::debug!(?rsc, traversal = "assigning", "breaking dependency loop");
            return false;
        }
        true
    }

    pub fn leave_assigning(&mut self, rsc: ResourceId) {
        self.assigning.remove(&rsc);
    }
}

/// A pending stop obligation accumulated during unpacking: a bundle
/// connection whose container must be stopped even though the connection
/// didn't fail on the same node.
#[derive(Copy, Clone, Debug)]
pub struct StopNeeded {
    pub container: ResourceId,
    pub node: NodeId,
    pub reason: &'static str,
}

pub struct WorkingSet {
    pub nodes: Arena<Node, NodeId>,
    pub resources: Arena<Resource, ResourceId>,
    pub colocations: Arena<Colocation, ColocationId>,
    pub ticket_constraints: Vec<TicketConstraint>,
    pub ticket_states: BTreeMap<String, TicketState>,
    pub graph: TransitionGraph,

    /// Running total of per-node utilization consumed by resources placed
    /// so far this pass, keyed the same way as `Node::utilization`. Only
    /// consulted when `placement-strategy` is not `default`.
    pub utilization_consumed: BTreeMap<NodeId, BTreeMap<String, i64>>,

    pub stop_needed: Vec<StopNeeded>,
    /// Forced stops accumulated by migration reconstruction: a dangling
    /// migration's source node, which a resource never stopped on after
    /// relocating, must be stopped before the resource is started anywhere
    /// again.
    pub dangling_migration_stops: Vec<(ResourceId, NodeId)>,
    pub visited: VisitedSet,

    pub config: ClusterConfig,
    pub effective_time: EffectiveTime,
    pub dc_node: Option<NodeId>,
    pub shutdown_lock_horizon: EffectiveTime,

    /// Earliest time the pass must be rerun to pick up state that only
    /// changes with the passage of time: a pending failure-timeout expiry,
    /// or the periodic `cluster-recheck-interval` sweep. `None` means
    /// nothing time-based is currently pending.
    pub next_recheck: Option<EffectiveTime>,

    pub diagnostics: Diagnostics,

    name_index: BTreeMap<String, ResourceId>,
    node_name_index: BTreeMap<String, NodeId>,
}

impl WorkingSet {
    pub fn new(config: ClusterConfig, effective_time: EffectiveTime) -> WorkingSet {
        let shutdown_lock_horizon = if config.shutdown_lock {
            effective_time.add_seconds(-config.shutdown_lock_limit.seconds())
        } else {
            EffectiveTime::NOT_SET
        };
        let next_recheck = if config.cluster_recheck_interval.is_disabled() {
            None
        } else {
            Some(effective_time.add_seconds(config.cluster_recheck_interval.seconds()))
        };
        WorkingSet {
            nodes: Arena::new(),
            resources: Arena::new(),
            colocations: Arena::new(),
            ticket_constraints: Vec::new(),
            ticket_states: BTreeMap::new(),
            graph: TransitionGraph::new(),
            utilization_consumed: BTreeMap::new(),
            stop_needed: Vec::new(),
            dangling_migration_stops: Vec::new(),
            visited: VisitedSet::default(),
            config,
            effective_time,
            dc_node: None,
            shutdown_lock_horizon,
            next_recheck,
            diagnostics: Diagnostics::default(),
            name_index: BTreeMap::new(),
            node_name_index: BTreeMap::new(),
        }
    }

    pub fn insert_node(&mut self, build: impl FnOnce(NodeId) -> Node) -> NodeId {
        let id = self.nodes.insert_with(build);
        let name = self.nodes.get(id).unwrap().unique_name().to_string();
        self.node_name_index.insert(name, id);
        id
    }

    pub fn insert_resource(&mut self, build: impl FnOnce(ResourceId) -> Resource) -> ResourceId {
        let id = self.resources.insert_with(build);
        let name = self.resources.get(id).unwrap().name.clone();
        self.name_index.insert(name, id);
        id
    }

    pub fn resource_by_name(&self, name: &str) -> Option<ResourceId> {
        self.name_index.get(name).copied()
    }

    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        self.node_name_index.get(name).copied()
    }

    pub fn resource(&self, id: ResourceId) -> Result<&Resource, SchedulingError> {
        self.resources.get(id).ok_or(SchedulingError::UnknownResource(id))
    }

    pub fn resource_mut(&mut self, id: ResourceId) -> Result<&mut Resource, SchedulingError> {
        self.resources.get_mut(id).ok_or(SchedulingError::UnknownResource(id))
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, SchedulingError> {
        self.nodes.get(id).ok_or(SchedulingError::UnknownNode(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, SchedulingError> {
        self.nodes.get_mut(id).ok_or(SchedulingError::UnknownNode(id))
    }

    /// Deterministic resource iteration order: lexicographic by id, never
    /// arena insertion order.
    pub fn resource_ids_sorted(&self) -> Vec<ResourceId> {
        let mut names: Vec<(&str, ResourceId)> = self
            .resources
            .iter()
            .map(|(id, r)| (r.name.as_str(), id))
            .collect();
        names.sort();
        names.into_iter().map(|(_, id)| id).collect()
    }

    pub fn node_ids_sorted(&self) -> Vec<NodeId> {
        let mut names: Vec<(&str, NodeId)> = self
            .nodes
            .iter()
            .map(|(id, n)| (n.name.as_str(), id))
            .collect();
        names.sort();
        names.into_iter().map(|(_, id)| id).collect()
    }

    pub fn is_quorate(&self, have_quorum: bool) -> bool {
        have_quorum || self.config.no_quorum_policy == NoQuorumPolicy::Ignore
    }

    pub fn effective_placement_strategy(&self) -> PlacementStrategy {
        self.config.placement_strategy
    }

    pub fn record_stop_needed(&mut self, container: ResourceId, node: NodeId, reason: &'static str) {
        self.stop_needed.push(StopNeeded { container, node, reason });
    }

    /// Folds `candidate` into `next_recheck`, keeping whichever is sooner.
    pub fn record_recheck_at(&mut self, candidate: EffectiveTime) {
        self.next_recheck = Some(match self.next_recheck {
            Some(existing) => existing.min(candidate),
            None => candidate,
        });
    }
}
