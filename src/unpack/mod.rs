//! The status unpacker: drives per-node state reconstruction
//! as a bounded multi-pass fixed-point loop over node histories.

pub mod failure;
pub mod history_entry;
pub mod migration;
pub mod online;

use crate::action::{Action, ActionFlags, Task};
use crate::arena::{NodeId, ResourceId};
use crate::node::{Node, NodeKind};
use crate::resource::{OnFail, Role};
use crate::status_input::{HistoryEntry, NodeStatus, ResourceStatus, StatusInput};
use crate::time::EffectiveTime;
use crate::working_set::WorkingSet;
use std::collections::{BTreeMap, BTreeSet};

/// Migration reconstruction: classifies every `migrate_to`
/// entry found anywhere in a resource's history (grouped by the node it ran
/// on) against its matching `migrate_from`/source `stop`, and applies the
/// result to the resource's role/`running_on` before the generic fixed-point
/// loop below ever looks at a plain `start`/`stop` entry for the same
/// resource. Runs once per resource, across all of its nodes at once, since
/// the source and target halves of one migration live on different nodes'
/// histories.
fn reconstruct_migrations(ws: &mut WorkingSet, status: &StatusInput) {
    for rsc_status in &status.resources {
        let Some(rsc_id) = ws.resource_by_name(&rsc_status.id) else {
            continue;
        };
        let mut by_node: BTreeMap<&str, Vec<&HistoryEntry>> = BTreeMap::new();
        for entry in &rsc_status.history {
            by_node.entry(entry.node.as_str()).or_default().push(entry);
        }
        let source_nodes: Vec<&str> = by_node.keys().copied().collect();
        for source_name in source_nodes {
            let entries = &by_node[source_name];
            let Some(migrate_to) = entries
                .iter()
                .copied()
                .filter(|e| e.is_migrate_to())
                .max_by_key(|e| e.call_id)
            else {
                continue;
            };
            let Some(target_name) = migrate_to.migrate_target.clone() else {
                continue;
            };
            let target_entries = by_node.get(target_name.as_str()).cloned().unwrap_or_default();
            let migrate_from = target_entries
                .iter()
                .copied()
                .filter(|e| e.is_migrate_from())
                .max_by_key(|e| e.call_id);
            let source_stop = entries
                .iter()
                .copied()
                .filter(|e| e.task == "stop")
                .max_by_key(|e| e.call_id);
            let newer_source_state = entries.iter().any(|e| e.call_id > migrate_to.call_id);
            let newer_target_state = target_entries
                .iter()
                .any(|e| e.call_id > migrate_from.map(|f| f.call_id).unwrap_or(i64::MIN));

            let Some(source_node_id) = ws.node_by_name(source_name) else { continue };
            let Some(target_node_id) = ws.node_by_name(&target_name) else { continue };

            let outcome = migration::classify(
                Some(migrate_to),
                migrate_from,
                source_stop,
                newer_source_state,
                newer_target_state,
            );
            use migration::MigrationClass;
            match outcome.class {
                MigrationClass::Complete => {
                    if let Ok(r) = ws.resource_mut(rsc_id) {
                        r.role = Role::Started;
                        r.next_role = Role::Started;
                        r.running_on.retain(|&n| n != source_node_id);
                        if !r.running_on.contains(&target_node_id) {
                            r.running_on.push(target_node_id);
                        }
                    }
                }
                MigrationClass::Dangling => {
                    if let Ok(r) = ws.resource_mut(rsc_id) {
                        r.role = Role::Started;
                        r.next_role = Role::Started;
                        if !r.running_on.contains(&target_node_id) {
                            r.running_on.push(target_node_id);
                        }
                        r.dangling_migrations.insert(source_node_id);
                    }
                    ws.dangling_migration_stops.push((rsc_id, source_node_id));
                    tracing::info!(
                        resource = %rsc_status.id,
                        source = %source_name,
                        target = %target_name,
                        "reconstructed dangling migration, forcing source stop"
                    );
                }
                MigrationClass::Partial | MigrationClass::Aborted => {
                    if outcome.source_still_active {
                        if let Ok(r) = ws.resource_mut(rsc_id) {
                            r.role = Role::Started;
                            r.next_role = Role::Started;
                            if !r.running_on.contains(&source_node_id) {
                                r.running_on.push(source_node_id);
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Schedules a fail-count clear when an expired entry's old fail count was
/// nonzero. A `clear_failcount` op actually writes to the cluster's
/// attribute store, so unlike a group/clone ordering point it is real
/// work, not a pseudo-action -- it just has no resource-agent effect.
fn schedule_fail_count_clear(ws: &mut WorkingSet, rsc_id: ResourceId, node_id: NodeId) {
    let already_scheduled = ws
        .resource(rsc_id)
        .ok()
        .map(|r| {
            r.actions.iter().any(|&id| {
                ws.graph
                    .actions
                    .get(id)
                    .map(|a| a.task == Task::ClearFailcount && a.node == Some(node_id))
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false);
    if already_scheduled {
        return;
    }
    let action_id = ws.graph.add_action(|id| Action {
        id,
        task: Task::ClearFailcount,
        interval_ms: 0,
        rsc: Some(rsc_id),
        node: Some(node_id),
        meta: Default::default(),
        flags: ActionFlags::RUNNABLE,
        reason: "operation history expired".to_string(),
    });
    if let Ok(resource) = ws.resource_mut(rsc_id) {
        resource.actions.push(action_id);
    }
}

/// step 1-3: determine which nodes are eligible to have their
/// history unpacked in this iteration.
fn node_eligible(ws: &WorkingSet, node_id: NodeId, unpacked: &BTreeSet<NodeId>) -> bool {
    if unpacked.contains(&node_id) {
        return false;
    }
    let Ok(node) = ws.node(node_id) else { return false };
    match node.kind {
        NodeKind::Cluster => true,
        NodeKind::Remote => {
            let Some(conn) = node.connection_rsc.and_then(|r| ws.resource(r).ok()) else {
                return false;
            };
            conn.next_role == Role::Started || ws.config.shutdown_lock
        }
        NodeKind::Guest | NodeKind::Observer => {
            let Some(conn) = node.connection_rsc.and_then(|r| ws.resource(r).ok()) else {
                return false;
            };
            if conn.next_role != Role::Started {
                return false;
            }
            conn.container
                .and_then(|c| ws.resource(c).ok())
                .map(|c| c.next_role == Role::Started)
                .unwrap_or(false)
        }
    }
}

/// A numeric-parse failure on `in_ccm` means "never seen" (-1); the legacy
/// boolean spelling `true` means "member, timestamp unknown, use effective
/// time" and `false` means 0.
pub fn parse_when_member(raw: &str, effective_time: EffectiveTime) -> EffectiveTime {
    match raw {
        "true" => effective_time,
        "false" => EffectiveTime::NOT_SET,
        other => other
            .parse::<i64>()
            .map(EffectiveTime::from_epoch_seconds)
            .unwrap_or(EffectiveTime::NEVER_SEEN),
    }
}

pub fn parse_when_online(raw: &str) -> EffectiveTime {
    match raw {
        "online" => EffectiveTime::from_epoch_seconds(1),
        "offline" => EffectiveTime::NOT_SET,
        other => other
            .parse::<i64>()
            .map(EffectiveTime::from_epoch_seconds)
            .unwrap_or(EffectiveTime::NOT_SET),
    }
}

/// Unpacks node membership/online status for every node (step
/// 1), then runs the fixed-point loop over resource histories (step 2),
/// a final unseen-fencing sweep (step 3), guest/remote role propagation
/// (step 4), and flushes accumulated stop-needed obligations (step 5).
pub fn unpack_status(ws: &mut WorkingSet, status: &StatusInput) {
    unpack_node_states(ws, &status.nodes);
    reconstruct_migrations(ws, status);
    apply_shutdown_locks(ws, status);

    let mut unpacked: BTreeSet<NodeId> = BTreeSet::new();
    let all_node_ids = ws.node_ids_sorted();
    loop {
        let mut progressed = false;
        for &node_id in &all_node_ids {
            if unpacked.contains(&node_id) {
                continue;
            }
            if !node_eligible(ws, node_id, &unpacked) {
                continue;
            }
            if let Some(node_status) = status
                .nodes
                .iter()
                .find(|n| ws.node_by_name(&n.id) == Some(node_id))
            {
                unpack_resource_histories(ws, node_id, node_status, status);
            }
            unpacked.insert(node_id);
            progressed = true;
        }
        if !progressed {
            break;
        }
    }

    // Step 3: final sweep with fence-remaining for nodes still unseen.
    for &node_id in &all_node_ids {
        if unpacked.contains(&node_id) {
            if let Ok(node) = ws.node(node_id) {
                if node.kind == NodeKind::Cluster && node.when_member.is_never_seen() {
                    tracing::info!(node = %node.name, "fencing unseen node at final sweep");
                }
            }
            continue;
        }
        if let Ok(node) = ws.node_mut(node_id) {
            node.fence("never unpacked: no eligible path found");
        }
    }

    // Step 4: guest/remote nodes whose connection resource is headed to
    // stopped must themselves go to stopped.
    let node_ids = ws.node_ids_sorted();
    for node_id in node_ids {
        let connection = ws.node(node_id).ok().and_then(|n| n.connection_rsc);
        if let Some(conn_id) = connection {
            let conn_stopping = ws
                .resource(conn_id)
                .map(|r| r.next_role == Role::Stopped)
                .unwrap_or(false);
            if conn_stopping {
                if let Ok(node) = ws.node_mut(node_id) {
                    node.online = false;
                }
            }
        }
    }

    // Step 5: flush stop-needed obligations accumulated during unpacking.
    let stop_needed = std::mem::take(&mut ws.stop_needed);
    for obligation in stop_needed {
        if let Ok(container) = ws.resource_mut(obligation.container) {
            container.next_role = Role::Stopped;
            tracing::info!(
                resource = %container.name,
                node = ?obligation.node,
                reason = obligation.reason,
                "forcing container stop from deferred obligation"
            );
        }
    }
}

/// Reads recorded shutdown locks off the status input: a lock recorded before `shutdown_lock_horizon` has
/// expired and is dropped rather than carried forward.
fn apply_shutdown_locks(ws: &mut WorkingSet, status: &StatusInput) {
    if !ws.config.shutdown_lock {
        return;
    }
    for rsc_status in &status.resources {
        let Some(rsc_id) = ws.resource_by_name(&rsc_status.id) else {
            continue;
        };
        let Some(lock_node_name) = &rsc_status.lock_node else {
            continue;
        };
        let Some(lock_node_id) = ws.node_by_name(lock_node_name) else {
            continue;
        };
        let lock_time = rsc_status.lock_time.unwrap_or(ws.effective_time);
        if lock_time < ws.shutdown_lock_horizon {
            continue;
        }
        if let Ok(resource) = ws.resource_mut(rsc_id) {
            resource.lock_node = Some(lock_node_id);
            resource.lock_time = Some(lock_time);
        }
    }
}

fn unpack_node_states(ws: &mut WorkingSet, nodes: &[NodeStatus]) {
    for status in nodes {
        let Some(node_id) = ws.node_by_name(&status.id) else {
            continue;
        };
        let when_member = match status.in_ccm {
            crate::status_input::CcmState::Member => ws.effective_time,
            crate::status_input::CcmState::NotMember => EffectiveTime::NOT_SET,
        };
        let when_online = match status.crmd {
            crate::status_input::CrmdState::Online => ws.effective_time,
            crate::status_input::CrmdState::Offline => EffectiveTime::NOT_SET,
        };

        let kind = ws.node(node_id).map(|n| n.kind).unwrap_or(NodeKind::Cluster);
        if kind != NodeKind::Cluster {
            // Remote/guest online determination is deferred to when their
            // connection resource's role is known (handled by eligibility
            // gating in the main loop).
            if let Ok(node) = ws.node_mut(node_id) {
                node.when_member = when_member;
                node.when_online = when_online;
                node.shutdown_requested = status.shutdown_requested;
                node.terminate_requested = status.terminate_requested;
                apply_transient_node_flags(node, &status.transient_attributes);
            }
            continue;
        }

        let pending_timeout_exceeded = {
            let timeout = ws.config.node_pending_timeout.seconds();
            !ws.config.node_pending_timeout.is_disabled()
                && when_member.epoch_seconds() > 0
                && when_online.epoch_seconds() == 0
                && ws.effective_time.epoch_seconds() - when_member.epoch_seconds() >= timeout
        };

        let outcome = if ws.config.stonith_enabled {
            online::determine_online_fenced(status, when_member, when_online, pending_timeout_exceeded)
        } else {
            online::determine_online_unfenced(when_member, when_online)
        };

        if let Ok(node) = ws.node_mut(node_id) {
            node.when_member = when_member;
            node.when_online = when_online;
            node.shutdown_requested = status.shutdown_requested;
            node.terminate_requested = status.terminate_requested;
            for (k, v) in &status.transient_attributes {
                node.attrs.insert(k.clone(), v.clone());
            }
            online::apply_outcome(node, status, outcome);
            apply_transient_node_flags(node, &status.transient_attributes);
        }
    }
    if ws.config.maintenance_mode {
        for node_id in ws.node_ids_sorted() {
            if let Ok(node) = ws.node_mut(node_id) {
                node.maintenance = true;
            }
        }
    }
    apply_node_health(ws);
}

fn bool_like(v: &str) -> bool {
    matches!(v, "true" | "on" | "yes" | "1")
}

/// The "standby" and "maintenance" transient node attributes: read here
/// rather than inferred from configuration, since standby/maintenance are
/// runtime toggles (`crm_standby`/`crm_attribute -m`), not config-time
/// properties of the node.
fn apply_transient_node_flags(node: &mut Node, transient_attributes: &std::collections::BTreeMap<String, String>) {
    if let Some(v) = transient_attributes.get("standby") {
        node.standby = bool_like(v);
    }
    if let Some(v) = transient_attributes.get("maintenance") {
        node.maintenance = bool_like(v);
    }
}

///: each node's `#health-*`
/// transient attributes are summed against `node-health-base` and, per
/// `node-health-strategy`, either ignored, used to exclude "red" nodes from
/// placement, or folded into the node's placement weight as a penalty.
fn apply_node_health(ws: &mut WorkingSet) {
    use crate::config::NodeHealthStrategy;
    let strategy = ws.config.node_health_strategy;
    if strategy == NodeHealthStrategy::None {
        return;
    }
    let base = ws.config.node_health_base;
    let green = ws.config.node_health_green;
    let red = ws.config.node_health_red;
    for node_id in ws.node_ids_sorted() {
        let Ok(node) = ws.node_mut(node_id) else { continue };
        let sum: i64 = node
            .attrs
            .iter()
            .filter(|(k, _)| k.starts_with("#health"))
            .filter_map(|(_, v)| v.parse::<i64>().ok())
            .sum();
        let total = base.saturating_add(sum);
        node.health_score = crate::score::Score::new(total);
        match strategy {
            NodeHealthStrategy::None => {}
            NodeHealthStrategy::MigrateOnRed => {
                if total <= red {
                    node.health_banned = true;
                }
            }
            NodeHealthStrategy::OnlyGreen => {
                if total < green {
                    node.health_banned = true;
                }
            }
            NodeHealthStrategy::Progressive | NodeHealthStrategy::Custom => {
                node.weight = node.weight.add(node.health_score);
            }
        }
    }
}

fn unpack_resource_histories(
    ws: &mut WorkingSet,
    node_id: NodeId,
    node_status: &NodeStatus,
    status: &StatusInput,
) {
    let node_name = node_status.id.clone();
    for rsc_status in &status.resources {
        let Some(rsc_id) = ws.resource_by_name(&rsc_status.id) else {
            continue;
        };
        unpack_one_resource_on_node(ws, rsc_id, node_id, &node_name, rsc_status);
    }
}

fn unpack_one_resource_on_node(
    ws: &mut WorkingSet,
    rsc_id: ResourceId,
    node_id: NodeId,
    node_name: &str,
    rsc_status: &ResourceStatus,
) {
    let mut entries: Vec<_> = rsc_status
        .history
        .iter()
        .filter(|e| e.node == node_name)
        .filter(|e| history_entry::is_relevant(e))
        .collect();
    entries.sort_by_key(|e| e.call_id);

    let is_managed = rsc_status.managed;
    for entry in entries {
        let resource_name = rsc_status.id.clone();
        if let Err(err) = history_entry::validate(&resource_name, node_name, entry) {
            ws.diagnostics.push_history_entry_error(err);
            continue;
        }
        let configured_on_fail = ws
            .resource(rsc_id)
            .ok()
            .and_then(|r| r.failures.iter().map(|f| f.on_fail).max())
            .unwrap_or(OnFail::Restart);

        let interpretation = {
            let Ok(resource) = ws.resource_mut(rsc_id) else { continue };
            history_entry::interpret(resource, entry, configured_on_fail, is_managed)
        };

        // step 3: a failing entry whose age has crossed the
        // configured `failure-timeout` is confirmed expired once the
        // resource's fail count on this node (net of earlier expiries, since
        // entries are processed oldest-first) is already zero. An expired
        // failure contributes no fail-count/on-fail consequence of its own,
        // but schedules a fail-count clear if there was anything to clear.
        if interpretation.record_failure {
            let now_seconds = ws.effective_time.epoch_seconds();
            let failure_timeout = ws.resource(rsc_id).ok().and_then(|r| r.failure_timeout);
            let fail_count_before = ws.resource(rsc_id).ok().map(|r| r.effective_fail_count(node_id)).unwrap_or(0);
            let expired = history_entry::is_expired(entry, now_seconds, failure_timeout, fail_count_before == 0);
            if expired {
                if fail_count_before != 0 {
                    schedule_fail_count_clear(ws, rsc_id, node_id);
                }
                continue;
            }
            if let Some(timeout) = failure_timeout {
                // Not expired yet: the pass must be rerun no later than the
                // moment this entry's failure-timeout lapses.
                ws.record_recheck_at(entry.last_change.add_seconds(timeout));
            }
        }

        if let Some(role) = interpretation.new_role {
            if let Ok(resource) = ws.resource_mut(rsc_id) {
                resource.role = role;
                resource.next_role = role;
                if role.is_active() && !resource.running_on.contains(&node_id) {
                    resource.running_on.push(node_id);
                }
            }
            if let Ok(node) = ws.node_mut(node_id) {
                if role.is_active() {
                    node.running_rsc.insert(rsc_id);
                }
            }
        }

        if interpretation.mark_start_pending {
            if let Ok(resource) = ws.resource_mut(rsc_id) {
                resource.flags.insert(crate::resource::ResourceFlags::START_PENDING);
                resource.pending_task = interpretation.pending_task.clone();
                resource.pending_node = Some(node_id);
            }
        }

        if interpretation.clear_past_failure {
            if let Ok(resource) = ws.resource_mut(rsc_id) {
                resource.fail_count.remove(&node_id);
            }
        }

        if interpretation.record_failure {
            let on_fail = interpretation.on_fail_observed.unwrap_or(OnFail::Restart);
            if let Ok(resource) = ws.resource_mut(rsc_id) {
                resource.record_failure(node_id, entry.task.clone(), on_fail);
            }
            let fencing_available = ws.config.stonith_enabled;
            let task_is_role_sensitive = matches!(entry.task.as_str(), "monitor" | "promote" | "demote");
            let failed_task_was_stop = entry.task == "stop";
            let consequence =
                failure::consequence_for(on_fail, task_is_role_sensitive, failed_task_was_stop, fencing_available);
            let mut node_owned = ws.nodes.get(node_id).cloned();
            if let Ok(resource) = ws.resource_mut(rsc_id) {
                failure::apply_consequence(resource, node_id, node_owned.as_mut(), consequence);
            }
            if let Some(updated) = node_owned {
                if let Ok(node) = ws.node_mut(node_id) {
                    *node = updated;
                }
            }
            if consequence == failure::FailureConsequence::RestartContainer {
                let container = ws.resource(rsc_id).ok().and_then(|r| r.container);
                if let Some(container) = container {
                    ws.record_stop_needed(container, node_id, "on-fail=restart-container");
                }
            }
        }

        if interpretation.force_remote_connection_failed {
            if let Ok(resource) = ws.resource_mut(rsc_id) {
                resource.flags.insert(crate::resource::ResourceFlags::FAILED);
            }
        }

        if let Some(reason) = interpretation.ban_from_this_node {
            if let Ok(resource) = ws.resource_mut(rsc_id) {
                resource.ban_from(node_id, reason);
            }
        }
    }
}
