//! Failure policy: maps a failed history entry's configured
//! `on_fail` to role transitions, bans, fence requests, and blocking.

use crate::arena::NodeId;
use crate::node::Node;
use crate::resource::{OnFail, Resource, ResourceFlags, Role};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum FailureConsequence {
    /// No role change (but the resource may still be marked failed by the
    /// caller if masked-probe logic already did so).
    Ignored,
    ForceUnpromoted,
    /// This node must stop; the resource may start elsewhere.
    RestartElsewhere,
    /// Stop the containing bundle/guest.
    RestartContainer,
    /// Mark the node for reset and fence it.
    ResetRemoteNode { fence_reason: &'static str },
    /// Ban from every node.
    StopEverywhere,
    /// Ban from this node only.
    BanHere,
    /// Node must be fenced.
    FenceNode { reason: &'static str },
    /// Node must go to standby.
    StandbyNode,
    /// Resource is permanently blocked pending operator action.
    Block,
}

/// Applies the on-fail severity order: when multiple failures are
/// processed for the same resource, the most severe observed value wins.
pub fn most_severe(current: OnFail, observed: OnFail) -> OnFail {
    current.max(observed)
}

/// Computes the consequence of a failure, given the resolved `on_fail`
/// policy, the task that failed, whether fencing is available, and whether
/// this is a monitor/promote/demote task (relevant to `demote`).
pub fn consequence_for(
    on_fail: OnFail,
    task_is_role_sensitive: bool,
    failed_task_was_stop: bool,
    fencing_available: bool,
) -> FailureConsequence {
    // A failed stop with no fencing available is always fatal to the
    // resource.
    if failed_task_was_stop && !fencing_available {
        return FailureConsequence::Block;
    }
    match on_fail {
        OnFail::Ignore => FailureConsequence::Ignored,
        OnFail::Demote => {
            if task_is_role_sensitive {
                FailureConsequence::ForceUnpromoted
            } else {
                FailureConsequence::Ignored
            }
        }
        OnFail::Restart => FailureConsequence::RestartElsewhere,
        OnFail::RestartContainer => FailureConsequence::RestartContainer,
        OnFail::ResetRemote => FailureConsequence::ResetRemoteNode {
            fence_reason: "remote connection failure",
        },
        OnFail::Stop => FailureConsequence::StopEverywhere,
        OnFail::Ban => FailureConsequence::BanHere,
        OnFail::FenceNode => FailureConsequence::FenceNode {
            reason: "on-fail=fence",
        },
        OnFail::StandbyNode => FailureConsequence::StandbyNode,
        OnFail::Block => FailureConsequence::Block,
    }
}

/// Applies a computed consequence to the resource/node pair.
pub fn apply_consequence(
    resource: &mut Resource,
    node_id: NodeId,
    node: Option<&mut Node>,
    consequence: FailureConsequence,
) {
    resource.flags.insert(ResourceFlags::FAILED);
    match consequence {
        FailureConsequence::Ignored => {}
        FailureConsequence::ForceUnpromoted => {
            resource.next_role = Role::Unpromoted;
        }
        FailureConsequence::RestartElsewhere => {
            resource.ban_from(node_id, "on-fail=restart");
        }
        // The caller pushes `resource.container` onto `ws.stop_needed`, since
        // that arena lives on the working set, not the resource.
        FailureConsequence::RestartContainer => {}
        FailureConsequence::ResetRemoteNode { fence_reason } => {
            if let Some(node) = node {
                node.requires_reset = true;
                node.fence(fence_reason);
            }
        }
        FailureConsequence::StopEverywhere => {
            resource.ban_from_all("on-fail=stop");
        }
        FailureConsequence::BanHere => {
            resource.ban_from(node_id, "on-fail=ban");
        }
        FailureConsequence::FenceNode { reason } => {
            if let Some(node) = node {
                node.fence(reason);
            }
        }
        FailureConsequence::StandbyNode => {
            if let Some(node) = node {
                node.mark_standby_pending();
            }
        }
        FailureConsequence::Block => {
            resource.flags.remove(ResourceFlags::MANAGED);
            resource.flags.insert(ResourceFlags::BLOCKED);
        }
    }
}
