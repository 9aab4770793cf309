//! Node placement: turns each resource's `allowed_nodes`
//! table into a final node assignment, honoring colocation pulls,
//! stickiness, node eligibility, and shutdown locks.
//!
//! Runs after [`crate::build::build_working_set`] and
//! [`crate::unpack::unpack_status`] have populated the working set, and
//! before the transition graph is assembled: its only job is to decide
//! *where*, not to generate actions.

use crate::arena::{NodeId, ResourceId};
use crate::colocation_engine::{self, NodeScore};
use crate::resource::{ResourceFlags, ResourceVariant, Role};
use crate::score::Score;
use crate::working_set::WorkingSet;
use std::cmp::Reverse;
use std::collections::BTreeMap;

/// Group, clone, and bundle resources are aggregates: the builder always
/// expresses their children as `ResourceVariant::Primitive`, so only those
/// are ever assigned a node directly here. Composite `running_on`/role
/// bookkeeping is derived from their children elsewhere (`group`,
/// transition assembly).
fn is_placeable(variant: ResourceVariant) -> bool {
    matches!(variant, ResourceVariant::Primitive)
}

/// Placement order: higher `priority` first, then higher-ranked variant,
/// then lexicographic name. Primitives of composite resources (group
/// members, clone instances, bundle fillers) inherit their parent's
/// priority, so this naturally processes "more important" resources first,
/// giving their colocation pulls and stickiness first claim on a node.
fn placement_order(ws: &WorkingSet) -> Vec<ResourceId> {
    let mut items: Vec<(Reverse<Score>, Reverse<u8>, String, ResourceId)> = ws
        .resources
        .iter()
        .map(|(id, r)| {
            (
                Reverse(r.priority),
                Reverse(r.variant.variant_rank()),
                r.name.clone(),
                id,
            )
        })
        .collect();
    items.sort();
    items.into_iter().map(|t| t.3).collect()
}

/// Runs placement over every resource in the working set, in priority
/// order. Idempotent: re-running against an already-placed working set
/// recomputes the same assignment from the same inputs.
pub fn place_all(ws: &mut WorkingSet) {
    apply_ticket_constraints(ws);
    for rsc_id in placement_order(ws) {
        place_resource(ws, rsc_id);
    }
}

/// Ticket constraints behave like a location preference that is only in
/// effect while the named ticket is granted; an
/// ungranted, non-demoting ticket bans its dependent from every node,
/// while `loss-policy=demote` only caps a promotable dependent below
/// `Promoted` and leaves it otherwise placeable.
fn apply_ticket_constraints(ws: &mut WorkingSet) {
    for tc in ws.ticket_constraints.clone() {
        let granted = ws.ticket_states.get(&tc.ticket).map(|s| s.granted).unwrap_or(false);
        let Ok(resource) = ws.resource_mut(tc.dependent) else { continue };
        if granted {
            for score in resource.allowed_nodes.values_mut() {
                *score = score.add(tc.score);
            }
            continue;
        }
        if tc.loss_policy_demote {
            if resource.next_role > Role::Unpromoted {
                resource.next_role = Role::Unpromoted;
            }
            if resource.role > Role::Unpromoted {
                tracing::info!(resource = %resource.name, ticket = %tc.ticket, "ticket revoked, demoting");
            }
        } else {
            tracing::info!(resource = %resource.name, ticket = %tc.ticket, "ticket revoked, stopping");
            resource.allowed_nodes.clear();
            resource.next_role = Role::Stopped;
        }
    }
}

/// Merges the indirect pull of `rsc_id`'s dependents into its own
/// `allowed_nodes` table before it is scored, so that a primary's
/// placement can account for what its dependents want
/// (colocated_node_scores).
fn merge_dependent_pulls(ws: &mut WorkingSet, rsc_id: ResourceId) {
    let mut contributions: BTreeMap<NodeId, NodeScore> = BTreeMap::new();
    colocation_engine::colocated_node_scores(ws, rsc_id, false, &mut contributions);
    let Ok(resource) = ws.resource_mut(rsc_id) else { return };
    for (node_id, node_score) in contributions {
        let entry = resource.allowed_nodes.entry(node_id).or_insert(Score::ZERO);
        *entry = entry.add(node_score.resolve());
    }
}

/// Computes and assigns the target node for one resource, or leaves it
/// unplaced (forcing `next_role = Stopped`) if no eligible node remains.
fn place_resource(ws: &mut WorkingSet, rsc_id: ResourceId) {
    let Ok(resource) = ws.resource(rsc_id) else { return };
    if !is_placeable(resource.variant) {
        return;
    }
    if !resource.flags.contains(ResourceFlags::MANAGED) || resource.flags.contains(ResourceFlags::BLOCKED) {
        // Unmanaged and blocked resources are left exactly where they are.
        return;
    }
    if resource.next_role == Role::Stopped {
        // Already destined to stop; no candidate node is needed.
        return;
    }

    merge_dependent_pulls(ws, rsc_id);
    colocation_engine::apply_all_for_resource(ws, rsc_id);

    let Ok(resource) = ws.resource(rsc_id) else { return };
    let current_node = resource.running_on.first().copied();
    let stickiness = resource.stickiness;
    let lock_node = resource.lock_node;
    let lock_time = resource.lock_time;
    let allowed = resource.allowed_nodes.clone();

    let locked_to = shutdown_lock_target(ws, lock_node, lock_time);

    let mut candidates: Vec<(Score, String, NodeId)> = Vec::new();
    for (node_id, base) in allowed {
        if let Some(lock) = locked_to {
            if node_id != lock {
                // A resource under shutdown lock may not be placed
                // anywhere except its locked node.
                continue;
            }
        }
        if base.is_negative_infinity() {
            continue;
        }
        let Ok(node) = ws.node(node_id) else { continue };
        if !node.is_eligible_for_placement() {
            continue;
        }
        if !has_capacity(ws, node_id, rsc_id) {
            continue;
        }
        let mut total = base.add(node.weight);
        if Some(node_id) == current_node {
            total = total.add(stickiness);
        }
        candidates.push((total, node.name.clone(), node_id));
    }
    // Highest score wins; ties broken by strategy-specific utilization
    // preference, then lexicographic node name so the choice is
    // reproducible across runs over the same inputs.
    let strategy = ws.effective_placement_strategy();
    candidates.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then_with(|| utilization_tiebreak(ws, strategy, a.2, b.2))
            .then_with(|| a.1.cmp(&b.1))
    });

    match candidates.first() {
        Some(&(_, _, node_id)) => {
            if let Ok(resource) = ws.resource_mut(rsc_id) {
                resource.pending_node = Some(node_id);
                if resource.next_role == Role::Unknown {
                    resource.next_role = Role::Started;
                }
            }
            record_utilization_consumed(ws, rsc_id, node_id);
        }
        None => {
            if let Ok(resource) = ws.resource_mut(rsc_id) {
                tracing::info!(resource = %resource.name, "no eligible node for placement, stopping");
                resource.pending_node = None;
                resource.next_role = Role::Stopped;
            }
        }
    }
}

/// Whether `node_id` has enough spare capacity, across every utilization
/// attribute `rsc_id` declares, to host it. Ignored entirely under
/// `placement-strategy=default`, which never consults utilization at all.
fn has_capacity(ws: &WorkingSet, node_id: NodeId, rsc_id: ResourceId) -> bool {
    use crate::config::PlacementStrategy;
    if ws.effective_placement_strategy() == PlacementStrategy::Default {
        return true;
    }
    let Ok(resource) = ws.resource(rsc_id) else { return true };
    if resource.utilization.is_empty() {
        return true;
    }
    let Ok(node) = ws.node(node_id) else { return true };
    let consumed = ws.utilization_consumed.get(&node_id);
    for (key, required) in &resource.utilization {
        let capacity = node.utilization.get(key).copied().unwrap_or(0);
        let used = consumed.and_then(|c| c.get(key)).copied().unwrap_or(0);
        if used.saturating_add(*required) > capacity {
            return false;
        }
    }
    true
}

/// Records `rsc_id`'s utilization as consumed on `node_id` once it is
/// placed there, so later resources in this same pass see an accurate
/// remaining capacity.
fn record_utilization_consumed(ws: &mut WorkingSet, rsc_id: ResourceId, node_id: NodeId) {
    let Ok(resource) = ws.resource(rsc_id) else { return };
    if resource.utilization.is_empty() {
        return;
    }
    let utilization = resource.utilization.clone();
    let entry = ws.utilization_consumed.entry(node_id).or_default();
    for (key, amount) in utilization {
        *entry.entry(key).or_insert(0) += amount;
    }
}

/// Strategy-specific preference between two equally-scored candidate
/// nodes: `balanced` favors the less-loaded node, `minimal` favors
/// consolidating onto a node that already hosts something, and
/// `utilization`/`default` express no preference here (capacity itself
/// was already enforced by `has_capacity`).
fn utilization_tiebreak(ws: &WorkingSet, strategy: crate::config::PlacementStrategy, a: NodeId, b: NodeId) -> std::cmp::Ordering {
    use crate::config::PlacementStrategy;
    match strategy {
        PlacementStrategy::Balanced => load_fraction(ws, a).cmp(&load_fraction(ws, b)),
        PlacementStrategy::Minimal => is_idle(ws, a).cmp(&is_idle(ws, b)),
        PlacementStrategy::Utilization | PlacementStrategy::Default => std::cmp::Ordering::Equal,
    }
}

fn load_fraction(ws: &WorkingSet, node_id: NodeId) -> u64 {
    let Some(consumed) = ws.utilization_consumed.get(&node_id) else { return 0 };
    let Ok(node) = ws.node(node_id) else { return 0 };
    // Scaled sum of consumed/capacity ratios (x1000) across every tracked
    // attribute, so higher means more loaded regardless of units.
    consumed
        .iter()
        .map(|(key, used)| {
            let capacity = node.utilization.get(key).copied().unwrap_or(0).max(1);
            (*used as u64).saturating_mul(1000) / capacity as u64
        })
        .sum()
}

fn is_idle(ws: &WorkingSet, node_id: NodeId) -> bool {
    ws.utilization_consumed.get(&node_id).map(|c| c.is_empty()).unwrap_or(true)
}

/// Resolves a resource's shutdown lock, if any, to the node it is still
/// pinned to. A lock older than `shutdown_lock_horizon` has expired and no
/// longer constrains placement.
fn shutdown_lock_target(ws: &WorkingSet, lock_node: Option<NodeId>, lock_time: Option<crate::time::EffectiveTime>) -> Option<NodeId> {
    if !ws.config.shutdown_lock {
        return None;
    }
    let lock_node = lock_node?;
    let lock_time = lock_time?;
    if lock_time < ws.shutdown_lock_horizon {
        return None;
    }
    Some(lock_node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;
    use crate::node::{Node, NodeKind};
    use crate::resource::Resource;
    use crate::time::EffectiveTime;

    fn empty_ws() -> WorkingSet {
        WorkingSet::new(ClusterConfig::default(), EffectiveTime::from_epoch_seconds(1000))
    }

    #[test]
    fn places_on_highest_scoring_eligible_node() {
        let mut ws = empty_ws();
        let a = ws.insert_node(|id| {
            let mut n = Node::new(id, "a", NodeKind::Cluster);
            n.online = true;
            n
        });
        let b = ws.insert_node(|id| {
            let mut n = Node::new(id, "b", NodeKind::Cluster);
            n.online = true;
            n
        });
        let rsc = ws.insert_resource(|id| {
            let mut r = Resource::new(id, "rsc1", ResourceVariant::Primitive);
            r.allowed_nodes.insert(a, Score::new(100));
            r.allowed_nodes.insert(b, Score::new(200));
            r
        });
        place_all(&mut ws);
        let resource = ws.resource(rsc).unwrap();
        assert_eq!(resource.pending_node, Some(b));
        assert_eq!(resource.next_role, Role::Started);
    }

    #[test]
    fn ineligible_node_is_skipped() {
        let mut ws = empty_ws();
        let a = ws.insert_node(|id| {
            let mut n = Node::new(id, "a", NodeKind::Cluster);
            n.online = false;
            n
        });
        let b = ws.insert_node(|id| {
            let mut n = Node::new(id, "b", NodeKind::Cluster);
            n.online = true;
            n
        });
        let rsc = ws.insert_resource(|id| {
            let mut r = Resource::new(id, "rsc1", ResourceVariant::Primitive);
            r.allowed_nodes.insert(a, Score::new(1000));
            r.allowed_nodes.insert(b, Score::new(1));
            r
        });
        place_all(&mut ws);
        let resource = ws.resource(rsc).unwrap();
        assert_eq!(resource.pending_node, Some(b));
    }

    #[test]
    fn banned_everywhere_stops() {
        let mut ws = empty_ws();
        let a = ws.insert_node(|id| {
            let mut n = Node::new(id, "a", NodeKind::Cluster);
            n.online = true;
            n
        });
        let rsc = ws.insert_resource(|id| {
            let mut r = Resource::new(id, "rsc1", ResourceVariant::Primitive);
            r.allowed_nodes.insert(a, Score::NEG_INFINITY);
            r
        });
        place_all(&mut ws);
        let resource = ws.resource(rsc).unwrap();
        assert_eq!(resource.pending_node, None);
        assert_eq!(resource.next_role, Role::Stopped);
    }

    #[test]
    fn stickiness_keeps_resource_in_place_on_a_tie() {
        let mut ws = empty_ws();
        let a = ws.insert_node(|id| {
            let mut n = Node::new(id, "a", NodeKind::Cluster);
            n.online = true;
            n
        });
        let b = ws.insert_node(|id| {
            let mut n = Node::new(id, "b", NodeKind::Cluster);
            n.online = true;
            n
        });
        let rsc = ws.insert_resource(|id| {
            let mut r = Resource::new(id, "rsc1", ResourceVariant::Primitive);
            r.stickiness = Score::new(50);
            r.running_on.push(a);
            r.allowed_nodes.insert(a, Score::new(100));
            r.allowed_nodes.insert(b, Score::new(120));
            r
        });
        place_all(&mut ws);
        let resource = ws.resource(rsc).unwrap();
        // a: 100 + 50 stickiness = 150 beats b: 120.
        assert_eq!(resource.pending_node, Some(a));
    }

    #[test]
    fn unmanaged_resource_is_left_untouched() {
        let mut ws = empty_ws();
        let a = ws.insert_node(|id| {
            let mut n = Node::new(id, "a", NodeKind::Cluster);
            n.online = true;
            n
        });
        let rsc = ws.insert_resource(|id| {
            let mut r = Resource::new(id, "rsc1", ResourceVariant::Primitive);
            r.flags.remove(ResourceFlags::MANAGED);
            r.allowed_nodes.insert(a, Score::new(100));
            r
        });
        place_all(&mut ws);
        let resource = ws.resource(rsc).unwrap();
        assert_eq!(resource.pending_node, None);
    }
}
