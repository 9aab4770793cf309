//! The recurring-action planner: emits recurring monitor
//! actions and cancellations consistent with the resource's current/next
//! role.

use crate::action::{Action, ActionFlags, OrderingFlags, Task};
use crate::arena::ActionId;
use crate::resource::{OperationTemplate, Resource, ResourceVariant, Role};
use crate::working_set::WorkingSet;
use std::collections::BTreeMap;

/// The planner's output for one (resource, template) pair.
#[derive(Debug)]
pub enum RecurringPlan {
    /// A monitor is needed on `node`.
    Monitor { node: crate::arena::NodeId },
    /// An existing recurring monitor on `node` must be cancelled.
    Cancel { node: crate::arena::NodeId },
}

/// Role-filter dispatch. `assigned_node` is where the
/// resource's real actions will run; `all_candidate_nodes` is the full set
/// of nodes the resource could plausibly run on (used for stopped-role
/// monitors, which must run everywhere the resource is *not* active).
pub fn plan_for_template(
    resource: &Resource,
    template: &OperationTemplate,
    assigned_node: Option<crate::arena::NodeId>,
    all_candidate_nodes: &[crate::arena::NodeId],
) -> Vec<RecurringPlan> {
    if !template.is_recurring_candidate() {
        return Vec::new();
    }

    let mut plans = Vec::new();
    match template.role {
        Some(Role::Stopped) => {
            // Only anonymous clones that are unique may carry stopped-role
            // monitors; primitives and unique clone instances qualify.
            let eligible = !matches!(resource.variant, ResourceVariant::Clone { .. })
                || resource.flags.contains(crate::resource::ResourceFlags::UNIQUE);
            if !eligible {
                return Vec::new();
            }
            for &node in all_candidate_nodes {
                if Some(node) == assigned_node {
                    plans.push(RecurringPlan::Cancel { node });
                } else {
                    plans.push(RecurringPlan::Monitor { node });
                }
            }
        }
        Some(role) if role == resource.next_role => {
            if let Some(node) = assigned_node {
                plans.push(RecurringPlan::Monitor { node });
            }
        }
        None if resource.next_role.is_active() => {
            if let Some(node) = assigned_node {
                plans.push(RecurringPlan::Monitor { node });
            }
        }
        Some(_) => {
            // Configured role differs from next_role: cancel on the
            // current node, ordered before the upcoming transition.
            if let Some(node) = resource.assigned_node() {
                plans.push(RecurringPlan::Cancel { node });
            }
        }
        None => {}
    }
    plans
}

/// Deduplicates `(name, interval)` template pairs, keeping the first
/// occurrence.
pub fn dedup_templates(templates: &[OperationTemplate]) -> Vec<&OperationTemplate> {
    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::new();
    for template in templates {
        if seen.insert((template.name.clone(), template.interval_ms)) {
            out.push(template);
        }
    }
    out
}

/// Materializes the recurring-monitor actions/cancellations for one
/// resource into the transition graph, wiring the ordering edges:
/// `start -> monitor`, `reload-agent -> monitor`, and (if applicable)
/// `promote -> monitor` or `demote -> monitor`.
pub fn materialize(
    ws: &mut WorkingSet,
    resource_id: crate::arena::ResourceId,
    lifecycle_actions: &BTreeMap<Task, ActionId>,
) {
    let Ok(resource) = ws.resource(resource_id) else { return };
    let templates: Vec<OperationTemplate> = resource.operation_templates.clone();
    let deduped: Vec<OperationTemplate> = dedup_templates(&templates).into_iter().cloned().collect();
    let assigned_node = resource.assigned_node();
    let candidate_nodes: Vec<_> = resource.allowed_nodes.keys().copied().collect();
    let resource_name = resource.name.clone();
    let start_runnable = lifecycle_actions
        .get(&Task::Start)
        .and_then(|id| ws.graph.actions.get(*id))
        .map(|a| a.is_runnable())
        .unwrap_or(true);
    let offline_nodes: std::collections::BTreeSet<_> = candidate_nodes
        .iter()
        .copied()
        .filter(|&n| ws.node(n).map(|node| !node.is_eligible_for_placement()).unwrap_or(true))
        .collect();

    for template in &deduped {
        let plans = {
            let Ok(resource) = ws.resource(resource_id) else { continue };
            plan_for_template(resource, template, assigned_node, &candidate_nodes)
        };
        for plan in plans {
            match plan {
                RecurringPlan::Monitor { node } => {
                    let mut flags = ActionFlags::RUNNABLE;
                    if !start_runnable || offline_nodes.contains(&node) {
                        flags.remove(ActionFlags::RUNNABLE);
                    }
                    let interval_ms = template.interval_ms;
                    let expects_promoted = template.role == Some(Role::Promoted);
                    let action_id = ws.graph.add_action(|id| Action {
                        id,
                        task: Task::Monitor,
                        interval_ms,
                        rsc: Some(resource_id),
                        node: Some(node),
                        meta: {
                            let mut m = BTreeMap::new();
                            if expects_promoted {
                                m.insert("expected-result".to_string(), "promoted".to_string());
                            }
                            m
                        },
                        flags,
                        reason: String::new(),
                    });
                    if let Ok(resource) = ws.resource_mut(resource_id) {
                        resource.actions.push(action_id);
                    }
                    order_after_lifecycle(ws, action_id, lifecycle_actions, template.role);
                }
                RecurringPlan::Cancel { node } => {
                    let interval_ms = template.interval_ms;
                    tracing::debug!(
                        resource = %resource_name,
                        node = ?node,
                        interval_ms,
                        "cancelling recurring monitor"
                    );
                    let cancel_id = ws.graph.add_action(|id| Action {
                        id,
                        task: Task::Cancel,
                        interval_ms,
                        rsc: Some(resource_id),
                        node: Some(node),
                        meta: BTreeMap::new(),
                        flags: ActionFlags::RUNNABLE,
                        reason: String::new(),
                    });
                    if let Ok(resource) = ws.resource_mut(resource_id) {
                        resource.actions.push(cancel_id);
                    }
                    order_cancel_before_next_transition(ws, cancel_id, lifecycle_actions);
                }
            }
        }
    }
}

fn order_after_lifecycle(
    ws: &mut WorkingSet,
    monitor_action: ActionId,
    lifecycle_actions: &BTreeMap<Task, ActionId>,
    template_role: Option<Role>,
) {
    if let Some(&start) = lifecycle_actions.get(&Task::Start) {
        ws.graph.add_ordering(start, monitor_action, OrderingFlags::MANDATORY);
    }
    if let Some(&reload) = lifecycle_actions.get(&Task::ReloadAgent) {
        ws.graph.add_ordering(reload, monitor_action, OrderingFlags::MANDATORY);
    }
    match template_role {
        Some(Role::Promoted) => {
            if let Some(&promote) = lifecycle_actions.get(&Task::Promote) {
                ws.graph.add_ordering(promote, monitor_action, OrderingFlags::MANDATORY);
            }
        }
        Some(Role::Unpromoted) => {
            if let Some(&demote) = lifecycle_actions.get(&Task::Demote) {
                ws.graph.add_ordering(demote, monitor_action, OrderingFlags::MANDATORY);
            }
        }
        _ => {}
    }
}

/// Orders a cancelled recurring monitor before whichever of demote/stop/
/// promote/start the resource is about to undergo, so the cancellation
/// always lands before the next role transition rather than racing it.
fn order_cancel_before_next_transition(
    ws: &mut WorkingSet,
    cancel_action: ActionId,
    lifecycle_actions: &BTreeMap<Task, ActionId>,
) {
    for task in [Task::Demote, Task::Stop, Task::Promote, Task::Start] {
        if let Some(&next) = lifecycle_actions.get(&task) {
            ws.graph.add_ordering(cancel_action, next, OrderingFlags::MANDATORY);
        }
    }
}
