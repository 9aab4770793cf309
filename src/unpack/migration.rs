//! Migration reconstruction.
//!
//! A successful live migration is three history entries: `migrate_to` on
//! the source, `migrate_from` on the target, `stop` on the source. This
//! module classifies what actually happened from whatever subset survived.

use crate::status_input::{ExecutionStatus, ExitStatus, HistoryEntry};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum MigrationClass {
    /// migrate_to ok, migrate_from ok, stop on source ok: active on target only.
    Complete,
    /// migrate_to ok, migrate_from ok, no stop, no newer source op: source
    /// must still be stopped.
    Dangling,
    /// migrate_to ok, migrate_from pending/missing, target has no newer
    /// state: still in flight.
    Partial,
    /// Either half failed, or migrate_from itself failed.
    Aborted,
}

pub struct MigrationOutcome {
    pub class: MigrationClass,
    /// Whether the resource should be considered active on the source after
    /// this classification (only meaningful for `Aborted`).
    pub source_still_active: bool,
}

fn entry_ok(entry: &HistoryEntry) -> bool {
    entry.execution_status == ExecutionStatus::Done && entry.exit_status == ExitStatus::Ok
}

fn entry_failed(entry: &HistoryEntry) -> bool {
    matches!(
        entry.execution_status,
        ExecutionStatus::Error | ExecutionStatus::TimedOut | ExecutionStatus::NotConnected
    ) || (entry.execution_status == ExecutionStatus::Done && entry.exit_status != ExitStatus::Ok)
}

/// Classifies a migration given the three candidate entries (any of which
/// may be absent) and whether a newer history entry exists for the
/// relevant node.
pub fn classify(
    migrate_to: Option<&HistoryEntry>,
    migrate_from: Option<&HistoryEntry>,
    source_stop: Option<&HistoryEntry>,
    newer_source_state: bool,
    newer_target_state: bool,
) -> MigrationOutcome {
    let to_ok = migrate_to.map(entry_ok).unwrap_or(false);
    let to_failed = migrate_to.map(entry_failed).unwrap_or(false);

    if to_failed {
        return MigrationOutcome {
            class: MigrationClass::Aborted,
            source_still_active: !newer_target_state,
        };
    }
    if !to_ok {
        // migrate_to missing entirely: nothing to reconstruct.
        return MigrationOutcome {
            class: MigrationClass::Aborted,
            source_still_active: true,
        };
    }

    let from_ok = migrate_from.map(entry_ok).unwrap_or(false);
    let from_failed = migrate_from.map(entry_failed).unwrap_or(false);

    if from_failed {
        return MigrationOutcome {
            class: MigrationClass::Aborted,
            source_still_active: !newer_target_state,
        };
    }

    if from_ok {
        let stop_ok = source_stop.map(entry_ok).unwrap_or(false);
        if stop_ok {
            return MigrationOutcome {
                class: MigrationClass::Complete,
                source_still_active: false,
            };
        }
        if !newer_source_state {
            return MigrationOutcome {
                class: MigrationClass::Dangling,
                source_still_active: false,
            };
        }
        // A newer source op superseded the would-be dangling stop; treat
        // as complete from this classifier's point of view.
        return MigrationOutcome {
            class: MigrationClass::Complete,
            source_still_active: false,
        };
    }

    // migrate_from pending or missing.
    if !newer_target_state {
        return MigrationOutcome {
            class: MigrationClass::Partial,
            source_still_active: false,
        };
    }
    MigrationOutcome {
        class: MigrationClass::Aborted,
        source_still_active: !newer_target_state,
    }
}

/// Orders two history entries by the "newer state" rule: by `call_id` when
/// on the same node, else by `when` (last_change); ties and negative
/// call_ids sort last.
pub fn is_newer(candidate: &HistoryEntry, reference: &HistoryEntry) -> bool {
    if candidate.node == reference.node {
        match (candidate.call_id, reference.call_id) {
            (c, r) if c < 0 || r < 0 => candidate.last_change > reference.last_change,
            (c, r) => c > r,
        }
    } else {
        candidate.last_change > reference.last_change
    }
}
