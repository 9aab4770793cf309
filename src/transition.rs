//! Transition graph assembly: turns each resource's role
//! decision (set by [`crate::placement`]) into start/stop/promote/demote
//! actions, wires group/clone/bundle pseudo-actions around their children,
//! materializes recurring monitors, and applies explicit ordering
//! constraints from the configuration.

use crate::action::{Action, ActionFlags, OrderingFlags, Task};
use crate::arena::{ActionId, NodeId, ResourceId};
use crate::config::OrderingConfig;
use crate::group;
use crate::recurring;
use crate::resource::{ResourceFlags, ResourceVariant, Role};
use crate::working_set::WorkingSet;
use std::collections::BTreeMap;

fn add_action(ws: &mut WorkingSet, rsc_id: ResourceId, task: Task, node: Option<NodeId>) -> ActionId {
    let action_id = ws.graph.add_action(|id| Action {
        id,
        task,
        interval_ms: 0,
        rsc: Some(rsc_id),
        node,
        meta: BTreeMap::new(),
        flags: ActionFlags::RUNNABLE,
        reason: String::new(),
    });
    if let Ok(resource) = ws.resource_mut(rsc_id) {
        resource.actions.push(action_id);
    }
    action_id
}

/// Generates the lifecycle actions implied by the diff between a resource's
/// observed `role` and its decided `next_role`: stop before a move or full
/// stop, start for a fresh or relocated resource, promote once started,
/// demote before stopping or unpromoting.
fn lifecycle_actions_for_primitive(ws: &mut WorkingSet, rsc_id: ResourceId) -> BTreeMap<Task, ActionId> {
    let Ok(resource) = ws.resource(rsc_id) else {
        return BTreeMap::new();
    };
    if !resource.flags.contains(ResourceFlags::MANAGED) || resource.flags.contains(ResourceFlags::BLOCKED) {
        return BTreeMap::new();
    }
    let role = resource.role;
    let next_role = resource.next_role;
    let current_node = resource.running_on.first().copied();
    let assigned_node = resource.assigned_node();
    let moving = matches!((current_node, assigned_node), (Some(a), Some(b)) if a != b);

    let mut actions: BTreeMap<Task, ActionId> = BTreeMap::new();

    let demote_first = role == Role::Promoted && (next_role != Role::Promoted || moving);
    if demote_first {
        if let Some(node) = current_node {
            actions.insert(Task::Demote, add_action(ws, rsc_id, Task::Demote, Some(node)));
        }
    }

    let needs_stop = role.is_active() && (next_role == Role::Stopped || moving);
    if needs_stop {
        if let Some(node) = current_node {
            let stop = add_action(ws, rsc_id, Task::Stop, Some(node));
            if let Some(&demote) = actions.get(&Task::Demote) {
                ws.graph.add_ordering(demote, stop, OrderingFlags::MANDATORY);
            }
            actions.insert(Task::Stop, stop);
        }
    }

    let needs_start = next_role.is_active() && (!role.is_active() || moving);
    if needs_start {
        if let Some(node) = assigned_node {
            let start = add_action(ws, rsc_id, Task::Start, Some(node));
            if let Some(&stop) = actions.get(&Task::Stop) {
                ws.graph.add_ordering(stop, start, OrderingFlags::MANDATORY);
            }
            actions.insert(Task::Start, start);
        }
    }

    if next_role == Role::Promoted && role != Role::Promoted && !moving {
        if let Some(node) = assigned_node {
            let promote = add_action(ws, rsc_id, Task::Promote, Some(node));
            if let Some(&start) = actions.get(&Task::Start) {
                ws.graph.add_ordering(start, promote, OrderingFlags::MANDATORY);
            }
            actions.insert(Task::Promote, promote);
        }
    }

    recurring::materialize(ws, rsc_id, &actions);
    actions
}

/// Creates pseudo start/stop (and promote/demote, for promotable clones)
/// actions for a group/clone/bundle and orders every child's own lifecycle
/// actions through them. Generalized across every composite variant, since
/// `group::create_group_pseudo_actions` operates on any resource id.
fn wire_composite(ws: &mut WorkingSet, rsc_id: ResourceId, lifecycle: &BTreeMap<ResourceId, BTreeMap<Task, ActionId>>) {
    let Ok(resource) = ws.resource(rsc_id) else { return };
    let promotable = resource.flags.contains(ResourceFlags::PROMOTABLE);
    let is_group = resource.variant == ResourceVariant::Group;
    let children = resource.children.clone();

    let pseudo = group::create_group_pseudo_actions(ws, rsc_id, promotable);

    let mut ordered_pairs: Vec<(ActionId, ActionId)> = Vec::new();
    let mut starts: Vec<ActionId> = Vec::new();
    let mut stops: Vec<ActionId> = Vec::new();
    let mut promotes: Vec<ActionId> = Vec::new();
    let mut demotes: Vec<ActionId> = Vec::new();
    for &member in &children {
        let Some(member_actions) = lifecycle.get(&member) else { continue };
        let start = member_actions.get(&Task::Start).copied();
        let stop = member_actions.get(&Task::Stop).copied();
        let promote = member_actions.get(&Task::Promote).copied();
        let demote = member_actions.get(&Task::Demote).copied();
        group::order_member_through_group(ws, &pseudo, start, stop, promote, demote);
        starts.extend(start);
        stops.extend(stop);
        promotes.extend(promote);
        demotes.extend(demote);
        if let (Some(start), Some(stop)) = (start, stop) {
            ordered_pairs.push((start, stop));
        }
    }

    if is_group {
        // Ordering relations between consecutive members when the group is
        // ordered: only between members that both have a start and a stop
        // action this pass.
        for window in ordered_pairs.windows(2) {
            let (prev_start, prev_stop) = window[0];
            let (this_start, this_stop) = window[1];
            group::order_consecutive_members(ws, prev_start, prev_stop, this_start, this_stop, false);
        }
        let stop_chain: Vec<ActionId> = ordered_pairs.iter().map(|&(_, stop)| stop).collect();
        group::enforce_shutdown_stop_order(ws, &stop_chain);
    }

    // Reconcile each pseudo-action's optional/runnable flags against the
    // member actions it stands in for, now that every member is ordered.
    group::propagate_pseudo_action_flags(ws, pseudo.start, &starts, false);
    group::propagate_pseudo_action_flags(ws, pseudo.stop, &stops, true);
    if let Some(promote) = pseudo.promote {
        group::propagate_pseudo_action_flags(ws, promote, &promotes, false);
    }
    if let Some(demote) = pseudo.demote {
        group::propagate_pseudo_action_flags(ws, demote, &demotes, true);
    }
}

/// Parses the configured action-name spelling used by explicit ordering
/// constraints into a [`Task`]. Names outside this set (custom agent
/// actions) aren't supported as ordering endpoints and resolve to `None`.
fn parse_task_name(name: &str) -> Option<Task> {
    Some(match name {
        "start" => Task::Start,
        "stop" => Task::Stop,
        "promote" => Task::Promote,
        "demote" => Task::Demote,
        "monitor" => Task::Monitor,
        "migrate_to" | "migrate-to" => Task::MigrateTo,
        "migrate_from" | "migrate-from" => Task::MigrateFrom,
        "notify" => Task::Notify,
        "reload-agent" | "reload_agent" => Task::ReloadAgent,
        _ => return None,
    })
}

fn find_action(ws: &WorkingSet, rsc_id: ResourceId, task: Task) -> Option<ActionId> {
    let resource = ws.resource(rsc_id).ok()?;
    resource
        .actions
        .iter()
        .copied()
        .find(|&id| ws.graph.actions.get(id).map(|a| a.task == task && a.interval_ms == 0).unwrap_or(false))
}

/// Generates an implicit start/stop ordering for every mandatory colocation
/// whose dependent actually landed on its primary's node this pass: the
/// primary starts before the dependent, and the dependent stops before the
/// primary. Sibling pairs within the same group are skipped, since
/// `group::order_consecutive_members` already orders those through the
/// group's own member sequencing.
fn apply_colocation_orderings(ws: &mut WorkingSet) {
    let colocation_ids: Vec<_> = ws.colocations.iter().map(|(id, _)| id).collect();
    for id in colocation_ids {
        let Some(colocation) = ws.colocations.get(id) else { continue };
        if !colocation.is_mandatory() || colocation.is_anti_colocation() {
            continue;
        }
        let (primary, dependent) = (colocation.primary, colocation.dependent);

        let Ok(primary_rsc) = ws.resource(primary) else { continue };
        let Ok(dependent_rsc) = ws.resource(dependent) else { continue };
        if primary_rsc.parent.is_some() && primary_rsc.parent == dependent_rsc.parent {
            continue;
        }
        let same_node = matches!(
            (primary_rsc.assigned_node(), dependent_rsc.assigned_node()),
            (Some(a), Some(b)) if a == b
        );
        if !same_node {
            continue;
        }

        if let (Some(primary_start), Some(dependent_start)) =
            (find_action(ws, primary, Task::Start), find_action(ws, dependent, Task::Start))
        {
            ws.graph.add_ordering(primary_start, dependent_start, OrderingFlags::MANDATORY);
        }
        if let (Some(primary_stop), Some(dependent_stop)) =
            (find_action(ws, primary, Task::Stop), find_action(ws, dependent, Task::Stop))
        {
            ws.graph.add_ordering(dependent_stop, primary_stop, OrderingFlags::MANDATORY);
        }
    }
}

/// Applies every explicit [`OrderingConfig`] constraint, looking up each
/// side's action among the actions already generated for its resource.
/// A reference to a resource or action that doesn't exist this pass is
/// skipped with a warning rather than aborting.
pub fn apply_explicit_orderings(ws: &mut WorkingSet, orderings: &[OrderingConfig]) {
    for ordering in orderings {
        let Some(first_rsc) = ws.resource_by_name(&ordering.first) else {
            tracing::warn!(id = %ordering.id, missing = %ordering.first, "ordering references unknown resource");
            continue;
        };
        let Some(then_rsc) = ws.resource_by_name(&ordering.then) else {
            tracing::warn!(id = %ordering.id, missing = %ordering.then, "ordering references unknown resource");
            continue;
        };
        let (Some(first_task), Some(then_task)) =
            (parse_task_name(&ordering.first_action), parse_task_name(&ordering.then_action))
        else {
            tracing::warn!(id = %ordering.id, "ordering references an unsupported action name");
            continue;
        };
        let (Some(first_action), Some(then_action)) =
            (find_action(ws, first_rsc, first_task), find_action(ws, then_rsc, then_task))
        else {
            tracing::debug!(id = %ordering.id, "ordering has no matching action this pass, skipping");
            continue;
        };
        let flags = if ordering.mandatory {
            OrderingFlags::MANDATORY
        } else {
            OrderingFlags::ORDERED
        };
        ws.graph.add_ordering(first_action, then_action, flags);
    }
}

/// Assembles the full transition graph from a working set that has already
/// been built, had status unpacked into it, and placed
/// (run after [`crate::placement::place_all`]).
pub fn assemble(ws: &mut WorkingSet, orderings: &[OrderingConfig]) {
    let mut lifecycle: BTreeMap<ResourceId, BTreeMap<Task, ActionId>> = BTreeMap::new();
    for rsc_id in ws.resource_ids_sorted() {
        let Ok(resource) = ws.resource(rsc_id) else { continue };
        if resource.variant != ResourceVariant::Primitive {
            continue;
        }
        let actions = lifecycle_actions_for_primitive(ws, rsc_id);
        lifecycle.insert(rsc_id, actions);
    }

    // Dangling migrations: the source node's forced stop is
    // not part of the role/next_role diff above, since the resource's role
    // already reads `Started` on its new node -- it is ordered before any
    // further start this same resource gets this pass.
    let dangling_stops = std::mem::take(&mut ws.dangling_migration_stops);
    for (rsc_id, node_id) in dangling_stops {
        let stop = add_action(ws, rsc_id, Task::Stop, Some(node_id));
        if let Some(&start) = lifecycle.get(&rsc_id).and_then(|m| m.get(&Task::Start)) {
            ws.graph.add_ordering(stop, start, OrderingFlags::MANDATORY);
        }
    }

    for rsc_id in ws.resource_ids_sorted() {
        let Ok(resource) = ws.resource(rsc_id) else { continue };
        if resource.variant == ResourceVariant::Primitive {
            continue;
        }
        wire_composite(ws, rsc_id, &lifecycle);
    }
    apply_colocation_orderings(ws);
    apply_explicit_orderings(ws, orderings);
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
    fn fresh_resource_gets_a_start_action() {
        let mut ws = empty_ws();
        let node = ws.insert_node(|id| {
            let mut n = Node::new(id, "a", NodeKind::Cluster);
            n.online = true;
            n
        });
        let rsc = ws.insert_resource(|id| {
            let mut r = Resource::new(id, "rsc1", ResourceVariant::Primitive);
            r.next_role = Role::Started;
            r.pending_node = Some(node);
            r
        });
        let actions = lifecycle_actions_for_primitive(&mut ws, rsc);
        assert!(actions.contains_key(&Task::Start));
        assert!(!actions.contains_key(&Task::Stop));
    }

    #[test]
    fn moving_resource_stops_then_starts() {
        let mut ws = empty_ws();
        let a = ws.insert_node(|id| Node::new(id, "a", NodeKind::Cluster));
        let b = ws.insert_node(|id| Node::new(id, "b", NodeKind::Cluster));
        let rsc = ws.insert_resource(|id| {
            let mut r = Resource::new(id, "rsc1", ResourceVariant::Primitive);
            r.role = Role::Started;
            r.next_role = Role::Started;
            r.running_on.push(a);
            r.pending_node = Some(b);
            r
        });
        let actions = lifecycle_actions_for_primitive(&mut ws, rsc);
        let stop = actions[&Task::Stop];
        let start = actions[&Task::Start];
        let orderings: Vec<_> = ws.graph.orderings.iter().collect();
        assert!(orderings.iter().any(|(_, o)| o.first == stop && o.then == start));
    }

    #[test]
    fn stopping_resource_gets_only_a_stop_action() {
        let mut ws = empty_ws();
        let a = ws.insert_node(|id| Node::new(id, "a", NodeKind::Cluster));
        let rsc = ws.insert_resource(|id| {
            let mut r = Resource::new(id, "rsc1", ResourceVariant::Primitive);
            r.role = Role::Started;
            r.next_role = Role::Stopped;
            r.running_on.push(a);
            r
        });
        let actions = lifecycle_actions_for_primitive(&mut ws, rsc);
        assert!(actions.contains_key(&Task::Stop));
        assert!(!actions.contains_key(&Task::Start));
    }
}
