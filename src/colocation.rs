//! The `Colocation constraint` entity and its storage/sort order
//! used by the colocation engine.

use crate::arena::{ColocationId, ResourceId};
use crate::resource::RoleFilter;
use crate::score::Score;

#[derive(Clone, Debug)]
pub struct Colocation {
    pub id: ColocationId,
    pub score: Score,
    pub dependent: ResourceId,
    pub primary: ResourceId,
    pub dependent_role: RoleFilter,
    pub primary_role: RoleFilter,
    pub node_attribute: String,
    pub influence: bool,
}

impl Colocation {
    pub const DEFAULT_ATTRIBUTE: &'static str = "#uname";

    /// A score of 0 means "ignore" and must never enter the constraint
    /// set; call sites should check this before inserting into the
    /// working set.
    pub fn is_ignorable(&self) -> bool {
        self.score.is_ignorable()
    }

    pub fn is_mandatory(&self) -> bool {
        self.score.is_mandatory()
    }

    pub fn is_anti_colocation(&self) -> bool {
        self.score.value() < 0
    }
}

/// A ticket constraint: behaves like a location
/// constraint that only applies while the named ticket is granted.
#[derive(Clone, Debug)]
pub struct TicketConstraint {
    pub ticket: String,
    pub dependent: ResourceId,
    pub score: Score,
    /// If true, losing the ticket demotes rather than stops a promotable
    /// resource (mirrors the `loss-policy=demote` option of ticket
    /// constraints).
    pub loss_policy_demote: bool,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct TicketState {
    pub granted: bool,
    pub standby: bool,
}
