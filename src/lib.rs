//! # cluster-scheduler
//!
//! A deterministic cluster resource scheduler: given a declarative
//! [`Configuration`], an observed [`StatusInput`], and an injected
//! [`EffectiveTime`], [`schedule`] produces a [`TransitionGraph`] of
//! start/stop/promote/demote/monitor actions and the ordering relations
//! between them.
//!
//! The scheduling pass itself is a pure function of its three inputs: no
//! wall-clock reads, no I/O, no hidden state carried between calls. Every
//! [`WorkingSet`] is built fresh and discarded whole once its
//! [`TransitionGraph`] has been extracted.
//!
//! ## Pipeline
//!
//! 1. [`build::build_working_set`] turns the configuration into nodes,
//!    resources, and colocations.
//! 2. [`build::mark_orphans_from_status`] and [`unpack::unpack_status`]
//!    layer the observed status on top: node membership, online/fencing
//!    determination, operation history interpretation, failure policy.
//! 3. [`placement::place_all`] picks a target node for every resource,
//!    folding in colocation pulls, stickiness, and shutdown locks.
//! 4. [`transition::assemble`] turns the resulting role/node decisions into
//!    the output [`TransitionGraph`].

pub mod action;
pub mod arena;
pub mod build;
pub mod colocation;
pub mod colocation_engine;
pub mod config;
pub mod error;
#[macro_use]
mod flags;
pub mod group;
pub mod node;
pub mod placement;
pub mod recurring;
pub mod resource;
pub mod score;
pub mod status_input;
pub mod time;
pub mod transition;
pub mod unpack;
pub mod working_set;

pub use action::{Action, OrderingFlags, Task, TransitionGraph};
pub use config::Configuration;
pub use error::{ConfigError, Diagnostics, HistoryEntryError, SchedulingError};
pub use node::Node;
pub use resource::Resource;
pub use score::Score;
pub use status_input::StatusInput;
pub use time::EffectiveTime;
pub use working_set::WorkingSet;

/// Unifies the two kinds of non-fatal problem a pass can surface, so
/// callers who just want "what got skipped" don't have to track two
/// separate vectors.
#[derive(Debug, Clone, derive_more::Display, derive_more::From, derive_more::Error)]
pub enum Warning {
    #[display("{_0}")]
    Config(ConfigError),
    #[display("{_0}")]
    HistoryEntry(HistoryEntryError),
}

/// The output of one scheduling pass: the transition graph plus every
/// problem encountered along the way. Nothing in `warnings` stopped the
/// pass; each offending configuration element or history entry was
/// skipped and scheduling continued with whatever remained.
pub struct ScheduleResult {
    pub working_set: WorkingSet,
    pub warnings: Vec<Warning>,
}

impl ScheduleResult {
    pub fn graph(&self) -> &TransitionGraph {
        &self.working_set.graph
    }
}

/// Runs one complete scheduling pass: `(Configuration, StatusInput,
/// EffectiveTime) -> TransitionGraph`.
///
/// This is the single entry point the rest of the crate exists to support.
/// It never panics on malformed input and never blocks; every
/// configuration or history problem is collected into
/// [`ScheduleResult::warnings`] rather than aborting the pass.
pub fn schedule(config: &Configuration, status: &StatusInput, effective_time: EffectiveTime) -> ScheduleResult {
    let (mut working_set, config_errors) = build::build_working_set(config, effective_time);
    build::mark_orphans_from_status(&mut working_set, status, config);

    unpack::unpack_status(&mut working_set, status);
    placement::place_all(&mut working_set);
    transition::assemble(&mut working_set, &config.constraints.orderings);

    let mut warnings: Vec<Warning> = config_errors.into_iter().map(Warning::from).collect();
    warnings.extend(working_set.diagnostics.config_errors.iter().cloned().map(Warning::from));
    warnings.extend(
        working_set
            .diagnostics
            .history_entry_errors
            .iter()
            .cloned()
            .map(Warning::from),
    );

    ScheduleResult { working_set, warnings }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NodeConfig, NodeConfigKind, ResourceConfig, ResourceKind};

    fn minimal_config() -> Configuration {
        Configuration {
            nodes: vec![NodeConfig {
                id: "node1".into(),
                name: "node1".into(),
                kind: NodeConfigKind::Member,
                score: Score::ZERO,
                attributes: Default::default(),
                utilization: Default::default(),
            }],
            resources: vec![ResourceConfig {
                id: "rsc1".into(),
                kind: ResourceKind::Primitive,
                meta_attributes: Default::default(),
                instance_attributes: Default::default(),
                utilization: Default::default(),
                operations: Vec::new(),
                children: Vec::new(),
                clone_max: None,
                clone_node_max: None,
                promotable: false,
                promoted_max: None,
                promoted_node_max: None,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn schedules_a_single_resource_onto_its_only_node() {
        let config = minimal_config();
        let node_status = status_input::NodeStatus {
            id: "node1".into(),
            in_ccm: status_input::CcmState::Member,
            crmd: status_input::CrmdState::Online,
            join: status_input::JoinPhase::Member,
            expected: status_input::ExpectedPhase::Member,
            shutdown_requested: false,
            terminate_requested: false,
            transient_attributes: Default::default(),
            connection_rsc: None,
        };
        let status = StatusInput {
            nodes: vec![node_status],
            resources: Vec::new(),
        };

        let result = schedule(&config, &status, EffectiveTime::from_epoch_seconds(1000));
        assert!(result.warnings.is_empty());
        let rsc_id = result.working_set.resource_by_name("rsc1").unwrap();
        let resource = result.working_set.resource(rsc_id).unwrap();
        assert!(resource.pending_node.is_some());

        let node_id = result.working_set.node_by_name("node1").unwrap();
        let start_exists = result
            .graph()
            .actions
            .iter()
            .any(|(_, a)| a.task == Task::Start && a.node == Some(node_id));
        assert!(start_exists);
    }

    #[test]
    fn determinism_same_inputs_same_action_uuids() {
        let config = minimal_config();
        let status = StatusInput::default();
        let first = schedule(&config, &status, EffectiveTime::from_epoch_seconds(2000));
        let second = schedule(&config, &status, EffectiveTime::from_epoch_seconds(2000));

        let names_of = |ws: &WorkingSet, id: arena::ActionId| {
            ws.graph
                .actions
                .get(id)
                .and_then(|a| a.rsc)
                .and_then(|r| ws.resource(r).ok())
                .map(|r| r.name.clone())
        };
        let mut first_uuids: Vec<String> = first
            .graph()
            .actions_sorted(|id| names_of(&first.working_set, id))
            .into_iter()
            .map(|id| {
                first
                    .graph()
                    .actions
                    .get(id)
                    .unwrap()
                    .uuid(names_of(&first.working_set, id).as_deref())
            })
            .collect();
        let mut second_uuids: Vec<String> = second
            .graph()
            .actions_sorted(|id| names_of(&second.working_set, id))
            .into_iter()
            .map(|id| {
                second
                    .graph()
                    .actions
                    .get(id)
                    .unwrap()
                    .uuid(names_of(&second.working_set, id).as_deref())
            })
            .collect();
        first_uuids.sort();
        second_uuids.sort();
        assert_eq!(first_uuids, second_uuids);
    }
}
