//! The group orchestrator: implicit intra-group ordering and
//! colocation, group pseudo-actions, and member start/stop/promote/demote
//! coordination.

use crate::action::{ActionFlags, OrderingFlags, Task};
use crate::arena::{ActionId, ResourceId};
use crate::resource::RoleFilter;
use crate::score::Score;
use crate::working_set::WorkingSet;

/// A group's configuration-level flags.
#[derive(Copy, Clone, Debug)]
pub struct GroupFlags {
    pub ordered: bool,
    pub colocated: bool,
}

impl Default for GroupFlags {
    fn default() -> Self {
        GroupFlags { ordered: true, colocated: true }
    }
}

/// Gives every non-first member a mandatory colocation with its
/// predecessor, with the group's `critical` flag propagated as influence.
pub fn implicit_colocations(ws: &mut WorkingSet, members: &[ResourceId], flags: GroupFlags) {
    if !flags.colocated {
        return;
    }
    for window in members.windows(2) {
        let (prev, this) = (window[0], window[1]);
        let critical = ws.resource(this).map(|r| r.flags.contains(crate::resource::ResourceFlags::CRITICAL)).unwrap_or(false);
        let colocation_id = ws.colocations.insert_with(|id| crate::colocation::Colocation {
            id,
            score: Score::INFINITY,
            dependent: this,
            primary: prev,
            dependent_role: RoleFilter::Any,
            primary_role: RoleFilter::Any,
            node_attribute: crate::colocation::Colocation::DEFAULT_ATTRIBUTE.to_string(),
            influence: critical,
        });
        if let Ok(resource) = ws.resource_mut(this) {
            resource.this_with_colocations.push(colocation_id);
        }
        if let Ok(resource) = ws.resource_mut(prev) {
            resource.with_this_colocations.push(colocation_id);
        }
    }
}

fn find_or_create_action(
    ws: &mut WorkingSet,
    rsc: ResourceId,
    task: Task,
    pseudo: bool,
) -> ActionId {
    if let Ok(resource) = ws.resource(rsc) {
        for &action_id in &resource.actions {
            if let Some(action) = ws.graph.actions.get(action_id) {
                if action.task == task && action.interval_ms == 0 {
                    return action_id;
                }
            }
        }
    }
    let node = ws.resource(rsc).ok().and_then(|r| r.assigned_node());
    let flags = if pseudo {
        ActionFlags::PSEUDO.union(ActionFlags::RUNNABLE)
    } else {
        ActionFlags::RUNNABLE
    };
    let action_id = ws.graph.add_action(|id| crate::action::Action {
        id,
        task,
        interval_ms: 0,
        rsc: Some(rsc),
        node,
        meta: Default::default(),
        flags,
        reason: String::new(),
    });
    if let Ok(resource) = ws.resource_mut(rsc) {
        resource.actions.push(action_id);
    }
    action_id
}

/// One pseudo start/running/stop/stopped action per group (plus
/// promote/demote for promotable groups), used purely as ordering points.
pub struct GroupPseudoActions {
    pub start: ActionId,
    pub running: ActionId,
    pub stop: ActionId,
    pub stopped: ActionId,
    pub promote: Option<ActionId>,
    pub promoted: Option<ActionId>,
    pub demote: Option<ActionId>,
    pub demoted: Option<ActionId>,
}

pub fn create_group_pseudo_actions(ws: &mut WorkingSet, group: ResourceId, promotable: bool) -> GroupPseudoActions {
    let start = find_or_create_action(ws, group, Task::Start, true);
    let running = find_or_create_action(ws, group, Task::Custom("running"), true);
    let stop = find_or_create_action(ws, group, Task::Stop, true);
    let stopped = find_or_create_action(ws, group, Task::Custom("stopped"), true);
    let (promote, promoted, demote, demoted) = if promotable {
        (
            Some(find_or_create_action(ws, group, Task::Promote, true)),
            Some(find_or_create_action(ws, group, Task::Custom("promoted"), true)),
            Some(find_or_create_action(ws, group, Task::Demote, true)),
            Some(find_or_create_action(ws, group, Task::Custom("demoted"), true)),
        )
    } else {
        (None, None, None, None)
    };
    GroupPseudoActions { start, running, stop, stopped, promote, promoted, demote, demoted }
}

/// Orders `group.start -> member.start -> group.running` and the
/// stop/promote/demote analogues, for every member that actually has the
/// corresponding action this pass.
pub fn order_member_through_group(
    ws: &mut WorkingSet,
    pseudo: &GroupPseudoActions,
    member_start: Option<ActionId>,
    member_stop: Option<ActionId>,
    member_promote: Option<ActionId>,
    member_demote: Option<ActionId>,
) {
    if let Some(start) = member_start {
        ws.graph.add_ordering(pseudo.start, start, OrderingFlags::MANDATORY);
        ws.graph.add_ordering(start, pseudo.running, OrderingFlags::MANDATORY);
    }
    if let Some(stop) = member_stop {
        ws.graph.add_ordering(pseudo.stop, stop, OrderingFlags::MANDATORY);
        ws.graph.add_ordering(stop, pseudo.stopped, OrderingFlags::MANDATORY);
    }
    if let (Some(promote), Some(p_action), Some(p_done)) = (member_promote, pseudo.promote, pseudo.promoted) {
        ws.graph.add_ordering(p_action, promote, OrderingFlags::MANDATORY);
        ws.graph.add_ordering(promote, p_done, OrderingFlags::MANDATORY);
    }
    if let (Some(demote), Some(d_action), Some(d_done)) = (member_demote, pseudo.demote, pseudo.demoted) {
        ws.graph.add_ordering(d_action, demote, OrderingFlags::MANDATORY);
        ws.graph.add_ordering(demote, d_done, OrderingFlags::MANDATORY);
    }
}

/// Ordering relations between consecutive members when the group is
/// `ordered`.
pub fn order_consecutive_members(
    ws: &mut WorkingSet,
    prev_start: ActionId,
    prev_stop: ActionId,
    this_start: ActionId,
    this_stop: ActionId,
    this_active_prev_inactive: bool,
) {
    ws.graph.add_ordering(
        prev_start,
        this_start,
        OrderingFlags::THEN_IMPLIES_FIRST.union(OrderingFlags::UNRUNNABLE_FIRST_BLOCKS),
    );
    ws.graph.add_ordering(
        this_stop,
        prev_stop,
        OrderingFlags::ORDERED.union(OrderingFlags::INTERMEDIATE_STOP),
    );
    if this_active_prev_inactive {
        // Lets an out-of-order restart happen: this member's stop clears
        // the way for the previous member's start.
        ws.graph.add_ordering(this_stop, prev_start, OrderingFlags::ORDERED);
    }
}

/// For partially-active groups on shutdown: ensures later members stop
/// before earlier members. Equivalent to applying
/// `order_consecutive_members`'s stop edge across the whole member list,
/// independent of whether the group is nominally `ordered`.
pub fn enforce_shutdown_stop_order(ws: &mut WorkingSet, members_stop_actions: &[ActionId]) {
    for window in members_stop_actions.windows(2) {
        let (prev_stop, this_stop) = (window[0], window[1]);
        ws.graph.add_ordering(this_stop, prev_stop, OrderingFlags::ORDERED);
    }
}

/// Group pseudo-actions inherit optional/runnable from their members: the
/// group action becomes mandatory if any member's is, unrunnable if any
/// member's is -- except that stop and demote pseudo-actions remain
/// runnable as long as any member will perform them.
pub fn propagate_pseudo_action_flags(
    ws: &mut WorkingSet,
    pseudo_action: ActionId,
    member_actions: &[ActionId],
    is_stop_or_demote: bool,
) {
    let mut any_mandatory = false;
    let mut any_unrunnable = false;
    let mut any_runnable = false;
    for &member_action in member_actions {
        if let Some(action) = ws.graph.actions.get(member_action) {
            if !action.is_optional() {
                any_mandatory = true;
            }
            if !action.is_runnable() {
                any_unrunnable = true;
            } else {
                any_runnable = true;
            }
        }
    }
    if let Some(action) = ws.graph.actions.get_mut(pseudo_action) {
        if any_mandatory {
            action.flags.remove(ActionFlags::OPTIONAL);
        }
        if is_stop_or_demote {
            action.flags.set(ActionFlags::RUNNABLE, any_runnable);
        } else if any_unrunnable {
            action.flags.remove(ActionFlags::RUNNABLE);
        }
    }
}
