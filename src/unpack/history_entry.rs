//! Per-history-entry interpretation.
//!
//! Parses one recorded action result, remaps result codes, updates the
//! resource's role, and classifies migrations. This is the busiest part of
//! the unpacker.

use crate::action::Task;
use crate::error::HistoryEntryError;
use crate::node::Node;
use crate::resource::{OnFail, Resource, ResourceFlags, Role};
use crate::status_input::{ExecutionStatus, ExitStatus, HistoryEntry};

/// step 1: numeric/structural validation. Invalid records are
/// logged and skipped rather than causing the whole unpack to fail.
pub fn validate<'a>(
    resource_name: &str,
    node_name: &str,
    entry: &'a HistoryEntry,
) -> Result<&'a HistoryEntry, HistoryEntryError> {
    if entry.call_id < -1 {
        return Err(HistoryEntryError::InvalidCallId {
            resource: resource_name.to_string(),
            node: node_name.to_string(),
            call_id: entry.call_id.to_string(),
        });
    }
    if entry.task.is_empty() {
        return Err(HistoryEntryError::MissingField {
            resource: resource_name.to_string(),
            node: node_name.to_string(),
            field: "task",
        });
    }
    Ok(entry)
}

/// step 2: "filter irrelevant actions -- meta-data, notify;
/// they do not affect state."
pub fn is_relevant(entry: &HistoryEntry) -> bool {
    !matches!(entry.task.as_str(), "meta-data" | "notify")
}

/// step 4: degraded-variant collapse and masked-probe-failure
/// collapse.
pub fn remap_exit_status(entry: &HistoryEntry) -> ExitStatus {
    if is_masked_probe_failure(entry) {
        return ExitStatus::NotRunning;
    }
    match entry.exit_status {
        ExitStatus::RunningPromoted | ExitStatus::DegradedPromoted | ExitStatus::Degraded => ExitStatus::Ok,
        other => other,
    }
}

/// A masked probe failure: the call itself failed, but the failure
/// signature indicates "the resource is simply not running" rather than a
/// genuine fault (step 4).
fn is_masked_probe_failure(entry: &HistoryEntry) -> bool {
    entry.interval_ms == 0
        && entry.task == "monitor"
        && entry.execution_status == ExecutionStatus::Done
        && matches!(
            entry.exit_status,
            ExitStatus::NotRunning | ExitStatus::NotConfigured
        )
}

/// step 5: remap execution status to a downstream effect.
/// Only the effects this reimplementation's [`ExecutionStatus`] can
/// actually produce are modeled; `no-fence-device`/`no-secrets`
/// node-fatal escalation belongs to the fencing-driver boundary.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ExecutionEffect {
    Pending,
    DoneAsExpected,
    DoneUnexpected,
    Cancelled,
    TimedOut,
    NotInstalled,
    NotConnected,
    NotSupported,
}

pub fn remap_execution_status(entry: &HistoryEntry, expected_ok: bool) -> ExecutionEffect {
    match entry.execution_status {
        ExecutionStatus::Pending => ExecutionEffect::Pending,
        ExecutionStatus::Done => {
            if expected_ok {
                ExecutionEffect::DoneAsExpected
            } else {
                ExecutionEffect::DoneUnexpected
            }
        }
        ExecutionStatus::Cancelled => ExecutionEffect::Cancelled,
        ExecutionStatus::TimedOut => ExecutionEffect::TimedOut,
        ExecutionStatus::NotSupported => ExecutionEffect::NotSupported,
        ExecutionStatus::Error => {
            if entry.exit_status == ExitStatus::NotInstalled {
                ExecutionEffect::NotInstalled
            } else {
                ExecutionEffect::DoneUnexpected
            }
        }
        ExecutionStatus::NotConnected => ExecutionEffect::NotConnected,
    }
}

/// step 3: expiry. Returns whether the record is confirmed
/// expired (and therefore excluded from failure-policy consideration).
pub fn is_expired(
    entry: &HistoryEntry,
    now_seconds: i64,
    failure_timeout_seconds: Option<i64>,
    effective_fail_count_is_zero: bool,
) -> bool {
    if entry.execution_status == ExecutionStatus::NotInstalled {
        return false;
    }
    let Some(timeout) = failure_timeout_seconds else {
        return false;
    };
    if timeout <= 0 {
        return false;
    }
    let age = now_seconds - entry.last_change.epoch_seconds();
    if age < timeout {
        return false;
    }
    if entry.is_probe()
        && matches!(
            entry.exit_status,
            ExitStatus::Ok
                | ExitStatus::NotRunning
                | ExitStatus::RunningPromoted
                | ExitStatus::Degraded
                | ExitStatus::DegradedPromoted
        )
    {
        // "A probe that expired with a result in {ok, not-running,
        // running-promoted, degraded, degraded-promoted} is not considered
        // expired."
        return false;
    }
    effective_fail_count_is_zero
}

fn role_after_task(task: &str, current: Role) -> Option<Role> {
    match task {
        "start" => Some(Role::Started),
        "stop" => Some(Role::Stopped),
        "promote" => Some(Role::Promoted),
        "demote" => Some(Role::Unpromoted),
        "monitor" if current == Role::Stopped => Some(Role::Stopped),
        _ => None,
    }
}

/// The outcome of interpreting one history entry, applied by the caller
/// (the fixed-point loop in `unpack::mod`) against the working set. The
/// caller owns node lookups, so bans are expressed as requests rather than
/// applied directly here.
#[derive(Default)]
pub struct Interpretation {
    pub new_role: Option<Role>,
    pub mark_start_pending: bool,
    pub pending_task: Option<String>,
    pub clear_past_failure: bool,
    pub record_failure: bool,
    pub on_fail_observed: Option<OnFail>,
    pub force_remote_connection_failed: bool,
    pub ban_from_this_node: Option<&'static str>,
}

/// steps 5-8, minus migration reconstruction (handled
/// separately by `unpack::migration` once all of a resource's entries on
/// all nodes are visible).
pub fn interpret(
    resource: &mut Resource,
    entry: &HistoryEntry,
    configured_on_fail: OnFail,
    is_managed: bool,
) -> Interpretation {
    let mut out = Interpretation::default();
    let exit = remap_exit_status(entry);
    let expected_ok = entry
        .expected_exit_status
        .map(|e| e == exit)
        .unwrap_or(exit == ExitStatus::Ok);
    let effect = remap_execution_status(entry, expected_ok);

    match effect {
        ExecutionEffect::Pending => {
            out.mark_start_pending = true;
            out.pending_task = Some(entry.task.clone());
        }
        ExecutionEffect::DoneAsExpected => {
            out.new_role = role_after_task(&entry.task, resource.role);
            out.clear_past_failure = true;
        }
        ExecutionEffect::Cancelled => {}
        ExecutionEffect::NotSupported => {
            out.record_failure = true;
            out.on_fail_observed = Some(configured_on_fail);
        }
        ExecutionEffect::DoneUnexpected | ExecutionEffect::TimedOut => {
            out.record_failure = true;
            out.on_fail_observed = Some(configured_on_fail);
        }
        ExecutionEffect::NotInstalled => {
            resource.flags.insert(ResourceFlags::FAILED);
            let effective = if configured_on_fail == OnFail::Ignore {
                OnFail::Ban
            } else {
                configured_on_fail
            };
            out.ban_from_this_node = Some("hard-error");
            out.on_fail_observed = Some(effective);
            out.record_failure = true;
        }
        ExecutionEffect::NotConnected => {
            out.force_remote_connection_failed = is_managed;
            out.record_failure = true;
        }
    }
    out
}

pub fn task_from_str(task: &str) -> Task {
    match task {
        "start" => Task::Start,
        "stop" => Task::Stop,
        "promote" => Task::Promote,
        "demote" => Task::Demote,
        "monitor" => Task::Monitor,
        "migrate_to" => Task::MigrateTo,
        "migrate_from" => Task::MigrateFrom,
        "notify" => Task::Notify,
        "reload-agent" => Task::ReloadAgent,
        "clear_failcount" => Task::ClearFailcount,
        // Resource-agent actions outside the well-known set are rare and
        // bounded by the configuration's own operation templates, so
        // leaking the name once per distinct custom task is acceptable.
        other => Task::Custom(Box::leak(other.to_string().into_boxed_str())),
    }
}

/// Records a failed op in the working set's failure list unless the action
/// was expired and the node is neither shutting down nor failed
/// (step 8).
pub fn should_record_failure(expired: bool, node: &Node, resource_failed: bool) -> bool {
    if !expired {
        return true;
    }
    node.shutdown_requested || resource_failed
}
