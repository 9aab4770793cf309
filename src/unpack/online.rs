//! Online/fencing determination.

use crate::node::{JoinState, Node};
use crate::status_input::{ExpectedPhase, JoinPhase, NodeStatus};
use crate::time::EffectiveTime;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum OnlineOutcome {
    Online,
    /// Not online for placement purposes, but not treated as failed.
    StandbyPending,
    /// Not online, not unclean -- a node still joining.
    ComingUp,
    Fence(&'static str),
    /// Already fenced previously; no new fence op needed.
    AlreadyFenced,
}

fn map_join(phase: JoinPhase) -> JoinState {
    match phase {
        JoinPhase::Member => JoinState::Member,
        JoinPhase::Down => JoinState::Down,
        JoinPhase::Pending => JoinState::Pending,
        JoinPhase::Banned => JoinState::Banned,
        JoinPhase::Nack => JoinState::Nack,
    }
}

/// this module's online-determination table, for cluster nodes with
/// fencing enabled. Evaluated top-to-bottom; first matching row wins.
pub fn determine_online_fenced(
    status: &NodeStatus,
    when_member: EffectiveTime,
    when_online: EffectiveTime,
    pending_timeout_exceeded: bool,
) -> OnlineOutcome {
    if status.shutdown_requested {
        return if when_online.epoch_seconds() > 0 {
            OnlineOutcome::Online
        } else {
            // Not a fence: an orderly shutdown in progress.
            OnlineOutcome::StandbyPending
        };
    }
    if when_member.is_never_seen() {
        return OnlineOutcome::Fence("peer has not been seen");
    }
    if status.join == JoinPhase::Nack {
        return OnlineOutcome::Fence("failed membership criteria");
    }
    if status.terminate_requested {
        return if when_online.is_never_seen() {
            OnlineOutcome::AlreadyFenced
        } else {
            OnlineOutcome::Fence("requested")
        };
    }
    if status.expected == ExpectedPhase::Down {
        if when_member.epoch_seconds() > 0 || when_online.epoch_seconds() > 0 {
            return OnlineOutcome::StandbyPending;
        }
        if pending_timeout_exceeded {
            return OnlineOutcome::Fence("pending timed out");
        }
        return OnlineOutcome::ComingUp;
    }
    if when_member.epoch_seconds() <= 0 {
        return OnlineOutcome::Fence("no longer in cluster");
    }
    if when_online.epoch_seconds() <= 0 {
        return OnlineOutcome::Fence("process no longer available");
    }
    match status.join {
        JoinPhase::Member => OnlineOutcome::Online,
        JoinPhase::Pending | JoinPhase::Down => OnlineOutcome::StandbyPending,
        _ => OnlineOutcome::Fence("unknown state"),
    }
}

/// The gentler determination used when fencing is disabled: unexpected
/// disappearance produces offline, never unclean.
pub fn determine_online_unfenced(when_member: EffectiveTime, when_online: EffectiveTime) -> OnlineOutcome {
    if when_member.epoch_seconds() > 0 && when_online.epoch_seconds() > 0 {
        OnlineOutcome::Online
    } else {
        OnlineOutcome::ComingUp
    }
}

/// Applies an [`OnlineOutcome`] to a [`Node`], mirroring the side effects
/// the scheduler's caller would expect. Fencing is requested here, never
/// performed — the fencing-device drivers that would carry it out are an
/// external collaborator.
pub fn apply_outcome(node: &mut Node, status: &NodeStatus, outcome: OnlineOutcome) {
    node.join = map_join(status.join);
    match outcome {
        OnlineOutcome::Online => {
            node.online = true;
            node.unclean = false;
        }
        OnlineOutcome::StandbyPending => {
            node.online = false;
            node.unclean = false;
            node.pending = true;
        }
        OnlineOutcome::ComingUp => {
            node.online = false;
            node.unclean = false;
        }
        OnlineOutcome::Fence(reason) => {
            node.fence(reason);
        }
        OnlineOutcome::AlreadyFenced => {
            node.online = false;
            node.unclean = true;
        }
    }
}
