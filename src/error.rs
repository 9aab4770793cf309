//! Error kinds for the scheduler core.
//!
//! None of these are meant to abort a scheduling pass. Configuration errors
//! and bad history entries are collected and logged; the pass continues
//! with whatever remains. [`SchedulingError`] is the exception: it marks an
//! internal consistency failure (a dangling arena index) rather than a data
//! problem, and callers should treat it as a bug report.

use crate::arena::{ActionId, ColocationId, NodeId, ResourceId};

/// A single configuration element that failed validation and was skipped.
/// Parsing/validation continues past these.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown cluster option `{name}`")]
    UnknownClusterOption { name: String },

    #[error("cluster option `{name}` has invalid value `{value}`: {reason}")]
    InvalidClusterOptionValue {
        name: String,
        value: String,
        reason: String,
    },

    #[error("resource `{id}` is structurally invalid: {reason}")]
    InvalidResource { id: String, reason: String },

    #[error("constraint `{id}` references unknown resource `{missing}`")]
    DanglingConstraintReference { id: String, missing: String },

    #[error("node `{id}` is structurally invalid: {reason}")]
    InvalidNode { id: String, reason: String },
}

/// A single malformed history entry that was skipped.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HistoryEntryError {
    #[error("history entry for resource `{resource}` on node `{node}` has invalid call_id `{call_id}`")]
    InvalidCallId {
        resource: String,
        node: String,
        call_id: String,
    },

    #[error("history entry for resource `{resource}` on node `{node}` has unrecognized execution status `{status}`")]
    UnrecognizedExecutionStatus {
        resource: String,
        node: String,
        status: String,
    },

    #[error("history entry for resource `{resource}` on node `{node}` is missing required field `{field}`")]
    MissingField {
        resource: String,
        node: String,
        field: &'static str,
    },

    #[error("history entry for resource `{resource}` on node `{node}` has invalid interval `{interval}`")]
    InvalidInterval {
        resource: String,
        node: String,
        interval: String,
    },
}

/// Internal consistency failures: looking up an arena index that isn't
/// populated, or a reentrancy guard firing somewhere it shouldn't. These
/// indicate a bug in the core, not in the input data.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulingError {
    #[error("resource id {0:?} is not present in the working set")]
    UnknownResource(ResourceId),

    #[error("node id {0:?} is not present in the working set")]
    UnknownNode(NodeId),

    #[error("action id {0:?} is not present in the transition graph")]
    UnknownAction(ActionId),

    #[error("colocation id {0:?} is not present in the working set")]
    UnknownColocation(ColocationId),

    #[error("dependency loop detected while resolving {0:?} that the reentrancy guard failed to break")]
    UnbrokenDependencyLoop(ResourceId),
}

/// The accumulated, non-fatal problems observed during a scheduling pass.
/// Surfaced to the caller alongside the produced [`crate::action::TransitionGraph`].
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub config_errors: Vec<ConfigError>,
    pub history_entry_errors: Vec<HistoryEntryError>,
}

impl Diagnostics {
    pub fn is_empty(&self) -> bool {
        self.config_errors.is_empty() && self.history_entry_errors.is_empty()
    }

    pub fn push_config_error(&mut self, error: ConfigError) {
        tracing::warn!(%error, "skipping invalid configuration element");
        self.config_errors.push(error);
    }

    pub fn push_history_entry_error(&mut self, error: HistoryEntryError) {
        tracing::warn!(%error, "skipping malformed history entry");
        self.history_entry_errors.push(error);
    }
}
