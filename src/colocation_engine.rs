//! The colocation engine: stores colocations, propagates
//! node scores through allowed-node tables with cycle protection, and
//! selects roles.

use crate::arena::{ColocationId, NodeId, ResourceId};
use crate::colocation::Colocation;
use crate::resource::{ResourceFlags, Role, RoleFilter};
use crate::score::Score;
use crate::working_set::WorkingSet;

/// A marker for "this node is unusable", kept as an explicit tagged variant
/// instead of reusing the integer score space for a sentinel value.
/// `Unusable` stands in for a node
/// that an `only_positive` traversal must exclude without permanently
/// banning it (the caller maps it back to a non-negative score at the end).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum NodeScore {
    Real(Score),
    Unusable,
}

impl NodeScore {
    pub fn resolve(self) -> Score {
        match self {
            NodeScore::Real(s) => s,
            NodeScore::Unusable => Score::ZERO,
        }
    }
}

/// Rebuilds `this_with_colocations`/`with_this_colocations` on every
/// resource from the colocation arena, in the sort order /// defines. Call after all colocations for a pass have been inserted.
pub fn rebuild_storage(ws: &mut WorkingSet) {
    let mut this_with: std::collections::BTreeMap<ResourceId, Vec<ColocationId>> = Default::default();
    let mut with_this: std::collections::BTreeMap<ResourceId, Vec<ColocationId>> = Default::default();

    for (id, colocation) in ws.colocations.iter() {
        if colocation.is_ignorable() {
            continue;
        }
        this_with.entry(colocation.dependent).or_default().push(id);
        with_this.entry(colocation.primary).or_default().push(id);
    }

    for (rsc_id, mut list) in this_with {
        sort_by_primary_priority(ws, &mut list);
        if let Ok(resource) = ws.resource_mut(rsc_id) {
            resource.this_with_colocations = list;
        }
    }
    for (rsc_id, mut list) in with_this {
        sort_by_dependent_priority(ws, &mut list);
        if let Ok(resource) = ws.resource_mut(rsc_id) {
            resource.with_this_colocations = list;
        }
    }
}

fn sort_by_primary_priority(ws: &WorkingSet, list: &mut [ColocationId]) {
    list.sort_by_cached_key(|&cid| {
        let colocation = ws.colocations.get(cid).expect("colocation id from storage pass");
        let primary = ws.resources.get(colocation.primary);
        let (priority, variant, name) = primary
            .map(|r| (r.priority, r.variant, r.name.clone()))
            .unwrap_or((Score::ZERO, crate::resource::ResourceVariant::Primitive, String::new()));
        sort_tuple(priority, variant, name)
    });
}

fn sort_by_dependent_priority(ws: &WorkingSet, list: &mut [ColocationId]) {
    list.sort_by_cached_key(|&cid| {
        let colocation = ws.colocations.get(cid).expect("colocation id from storage pass");
        let dependent = ws.resources.get(colocation.dependent);
        let (priority, variant, name) = dependent
            .map(|r| (r.priority, r.variant, r.name.clone()))
            .unwrap_or((Score::ZERO, crate::resource::ResourceVariant::Primitive, String::new()));
        sort_tuple(priority, variant, name)
    });
}

/// Mirrors [`colocation_sort_key`]'s ordering but returns an owned key,
/// since the borrowed form can't outlive the per-element closure in
/// `sort_by_cached_key`.
fn sort_tuple(
    priority: Score,
    variant: crate::resource::ResourceVariant,
    name: String,
) -> (std::cmp::Reverse<Score>, std::cmp::Reverse<u8>, String) {
    (std::cmp::Reverse(priority), std::cmp::Reverse(variant.variant_rank()), name)
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ApplicationPhase {
    PrimaryUnassigned,
    RoleSelection,
    DependentAlreadyAssigned,
    RoleFilterMismatch,
    Location,
}

/// Determines which phase of placement a colocation currently falls into,
/// so its effect can be applied (or deferred) accordingly.
pub fn classify_phase(ws: &WorkingSet, colocation: &Colocation) -> ApplicationPhase {
    let Ok(primary) = ws.resource(colocation.primary) else {
        return ApplicationPhase::Location;
    };
    let Ok(dependent) = ws.resource(colocation.dependent) else {
        return ApplicationPhase::Location;
    };

    if primary.is_unassigned() {
        return ApplicationPhase::PrimaryUnassigned;
    }
    if !colocation.dependent_role.matches(dependent.next_role) || !colocation.primary_role.matches(primary.next_role)
    {
        return ApplicationPhase::RoleFilterMismatch;
    }
    if dependent.variant.is_promotable_clone() && !dependent.is_unassigned() {
        return ApplicationPhase::RoleSelection;
    }
    if !dependent.is_unassigned() {
        return ApplicationPhase::DependentAlreadyAssigned;
    }
    ApplicationPhase::Location
}

/// Propagates a colocation's score into the dependent's allowed-node
/// table, keyed by whether each candidate node shares the primary's node's
/// value for the colocation attribute.
pub fn apply_location(ws: &mut WorkingSet, colocation_id: ColocationId) {
    let Some(colocation) = ws.colocations.get(colocation_id).cloned() else { return };
    let Ok(primary) = ws.resource(colocation.primary) else { return };
    let Some(primary_node_id) = primary.assigned_node() else { return };
    let Ok(primary_node) = ws.node(primary_node_id) else { return };
    let attribute = if colocation.node_attribute.is_empty() {
        Colocation::DEFAULT_ATTRIBUTE
    } else {
        &colocation.node_attribute
    };
    let primary_value = primary_node.attr(attribute).map(str::to_owned);

    let Ok(dependent) = ws.resource(colocation.dependent) else { return };
    let candidate_nodes: Vec<NodeId> = dependent.allowed_nodes.keys().copied().collect();
    let mandatory = colocation.is_mandatory();

    let mut rolled_back_candidates = Vec::new();
    let mut any_non_negative = false;

    for node_id in candidate_nodes {
        let Ok(node) = ws.node(node_id) else { continue };
        let matches = node.attr(attribute).map(str::to_owned) == primary_value && primary_value.is_some();
        let Ok(dependent_mut) = ws.resource_mut(colocation.dependent) else { continue };
        let current = *dependent_mut.allowed_nodes.get(&node_id).unwrap_or(&Score::ZERO);
        let updated = if matches {
            if mandatory {
                current
            } else {
                current.add(colocation.score)
            }
        } else if mandatory {
            Score::NEG_INFINITY
        } else {
            current
        };
        rolled_back_candidates.push((node_id, current));
        dependent_mut.allowed_nodes.insert(node_id, updated);
        if updated.value() >= 0 {
            any_non_negative = true;
        }
    }

    if !mandatory && !any_non_negative {
        // "If, after applying, no node has a non-negative weight
        // and the colocation is optional, roll back."
        if let Ok(dependent_mut) = ws.resource_mut(colocation.dependent) {
            for (node_id, previous) in rolled_back_candidates {
                dependent_mut.allowed_nodes.insert(node_id, previous);
            }
        }
    }
}

/// Applies a role-sensitive colocation between two already-placed
/// resources as a priority adjustment rather than a location pull.
pub fn apply_role_only(ws: &mut WorkingSet, colocation_id: ColocationId) {
    let Some(colocation) = ws.colocations.get(colocation_id).cloned() else { return };
    let (Some(primary_node), Some(dependent_node), attribute) = (
        ws.resource(colocation.primary).ok().and_then(|r| r.assigned_node()),
        ws.resource(colocation.dependent).ok().and_then(|r| r.assigned_node()),
        if colocation.node_attribute.is_empty() {
            Colocation::DEFAULT_ATTRIBUTE.to_string()
        } else {
            colocation.node_attribute.clone()
        },
    ) else {
        return;
    };

    let primary_value = ws.node(primary_node).ok().and_then(|n| n.attr(&attribute).map(str::to_owned));
    let dependent_value = ws.node(dependent_node).ok().and_then(|n| n.attr(&attribute).map(str::to_owned));
    let matches = primary_value.is_some() && primary_value == dependent_value;

    let Ok(dependent) = ws.resource_mut(colocation.dependent) else { return };
    if matches {
        let signed = if colocation.dependent_role == RoleFilter::Specific(Role::Unpromoted) {
            colocation.score.negate()
        } else {
            colocation.score
        };
        dependent.priority = dependent.priority.add(signed);
    } else if colocation.is_mandatory() && colocation.dependent_role == RoleFilter::Specific(Role::Promoted) {
        dependent.priority = Score::NEG_INFINITY;
    }
}

/// Walks the colocation graph outward from `start`, attenuating scores by
/// `score / INFINITY` at each hop, writing the accumulated contribution per
/// candidate node into `out`. Cycle protection is the working set's
/// `updating_nodes` visited set.
pub fn colocated_node_scores(
    ws: &mut WorkingSet,
    start: ResourceId,
    only_positive: bool,
    out: &mut std::collections::BTreeMap<NodeId, NodeScore>,
) {
    if !ws.visited.enter_updating_nodes(start) {
        return;
    }

    let Ok(resource) = ws.resource(start) else {
        ws.visited.leave_updating_nodes(start);
        return;
    };
    let with_this = resource.with_this_colocations.clone();
    let single_allowed_node = resource.allowed_nodes.len() == 1;

    for colocation_id in with_this {
        let Some(colocation) = ws.colocations.get(colocation_id).cloned() else { continue };
        if colocation.is_anti_colocation() && !single_allowed_node {
            // "Anti-colocation edges only propagate negative
            // preferences when the dependent is restricted to a single
            // allowed node."
            continue;
        }
        let attenuation = attenuate(colocation.score);
        colocated_node_scores(ws, colocation.dependent, only_positive, out);

        let Ok(dependent) = ws.resource(colocation.dependent) else { continue };
        for (&node_id, &node_score) in &dependent.allowed_nodes {
            let contribution = node_score.scale(attenuation);
            let entry = out.entry(node_id).or_insert(NodeScore::Real(Score::ZERO));
            *entry = match entry {
                NodeScore::Unusable => NodeScore::Unusable,
                NodeScore::Real(current) => {
                    let combined = current.add(contribution);
                    if only_positive && combined.value() < 0 {
                        NodeScore::Unusable
                    } else {
                        NodeScore::Real(combined)
                    }
                }
            };
        }
    }

    ws.visited.leave_updating_nodes(start);
}

fn attenuate(score: Score) -> f64 {
    if score.is_infinite() {
        1.0
    } else {
        score.value() as f64 / Score::INFINITY.value() as f64
    }
}

/// Applies every stored colocation against `resource`, dispatching on
/// [`ApplicationPhase`].
pub fn apply_all_for_resource(ws: &mut WorkingSet, resource_id: ResourceId) {
    let Ok(resource) = ws.resource(resource_id) else { return };
    let this_with = resource.this_with_colocations.clone();
    for colocation_id in this_with {
        let Some(colocation) = ws.colocations.get(colocation_id).cloned() else { continue };
        match classify_phase(ws, &colocation) {
            ApplicationPhase::PrimaryUnassigned
            | ApplicationPhase::DependentAlreadyAssigned
            | ApplicationPhase::RoleFilterMismatch => {}
            ApplicationPhase::RoleSelection => apply_role_only(ws, colocation_id),
            ApplicationPhase::Location => apply_location(ws, colocation_id),
        }
    }

    // ResourceFlags::UPDATING_NODES/MERGING bookkeeping is handled via
    // `ws.visited`, not these flags; the flags remain on `Resource` only for
    // compatibility with callers inspecting state.
    if let Ok(resource) = ws.resource_mut(resource_id) {
        let _ = resource.flags.contains(ResourceFlags::UPDATING_NODES);
    }
}
