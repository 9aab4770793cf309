//! End-to-end scenarios exercising the full scheduling pass: configuration
//! and observed status in, transition graph out.

use cluster_scheduler::action::Task;
use cluster_scheduler::config::{
    ClusterConfig, ColocationConfig, Configuration, NodeConfig, NodeConfigKind, ResourceConfig,
    ResourceKind,
};
use cluster_scheduler::schedule;
use cluster_scheduler::score::Score;
use cluster_scheduler::status_input::{
    CcmState, CrmdState, ExecutionStatus, ExitStatus, ExpectedPhase, HistoryEntry, JoinPhase,
    NodeStatus, ResourceStatus, StatusInput,
};
use cluster_scheduler::time::EffectiveTime;

fn node_config(name: &str) -> NodeConfig {
    NodeConfig {
        id: name.into(),
        name: name.into(),
        kind: NodeConfigKind::Member,
        score: Score::ZERO,
        attributes: Default::default(),
        utilization: Default::default(),
    }
}

fn online_status(name: &str) -> NodeStatus {
    NodeStatus {
        id: name.into(),
        in_ccm: CcmState::Member,
        crmd: CrmdState::Online,
        join: JoinPhase::Member,
        expected: ExpectedPhase::Member,
        shutdown_requested: false,
        terminate_requested: false,
        transient_attributes: Default::default(),
        connection_rsc: None,
    }
}

fn primitive(id: &str) -> ResourceConfig {
    ResourceConfig {
        id: id.into(),
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
    }
}

fn find_action<'a>(
    result: &'a cluster_scheduler::ScheduleResult,
    rsc_name: &str,
    task: Task,
) -> Option<&'a cluster_scheduler::Action> {
    let rsc_id = result.working_set.resource_by_name(rsc_name)?;
    result
        .graph()
        .actions
        .iter()
        .map(|(_, a)| a)
        .find(|a| a.rsc == Some(rsc_id) && a.task == task)
}

fn ordered_before(
    result: &cluster_scheduler::ScheduleResult,
    first_name: &str,
    first_task: Task,
    then_name: &str,
    then_task: Task,
) -> bool {
    let first = find_action(result, first_name, first_task).expect("first action present");
    let then = find_action(result, then_name, then_task).expect("then action present");
    result
        .graph()
        .orderings_from(first.id)
        .iter()
        .filter_map(|&oid| result.graph().orderings.get(oid))
        .any(|o| o.then == then.id)
}

#[test]
fn simple_placement_picks_the_lexicographically_smaller_node() {
    let config = Configuration {
        nodes: vec![node_config("n1"), node_config("n2")],
        resources: vec![primitive("r1")],
        ..Default::default()
    };
    let status = StatusInput {
        nodes: vec![online_status("n1"), online_status("n2")],
        resources: Vec::new(),
    };

    let result = schedule(&config, &status, EffectiveTime::from_epoch_seconds(1000));
    assert!(result.warnings.is_empty());

    let n1 = result.working_set.node_by_name("n1").unwrap();
    let start = find_action(&result, "r1", Task::Start).expect("r1 start action");
    assert_eq!(start.node, Some(n1));
    assert!(result.graph().orderings_into(start.id).is_empty());
}

#[test]
fn mandatory_colocation_orders_dependent_after_primary() {
    let config = Configuration {
        nodes: vec![node_config("n1"), node_config("n2")],
        resources: vec![primitive("web"), primitive("ip")],
        constraints: cluster_scheduler::config::ConstraintsConfig {
            colocations: vec![ColocationConfig {
                id: "web-with-ip".into(),
                score: Score::INFINITY,
                dependent: "web".into(),
                primary: "ip".into(),
                dependent_role: None,
                primary_role: None,
                node_attribute: None,
                influence: true,
            }],
            ..Default::default()
        },
        ..Default::default()
    };
    let status = StatusInput {
        nodes: vec![online_status("n1"), online_status("n2")],
        resources: Vec::new(),
    };

    let result = schedule(&config, &status, EffectiveTime::from_epoch_seconds(1000));
    assert!(result.warnings.is_empty());

    let web = result.working_set.resource_by_name("web").unwrap();
    let ip = result.working_set.resource_by_name("ip").unwrap();
    let web_node = result.working_set.resource(web).unwrap().assigned_node();
    let ip_node = result.working_set.resource(ip).unwrap().assigned_node();
    assert!(web_node.is_some());
    assert_eq!(web_node, ip_node, "web must land on ip's node");

    assert!(ordered_before(&result, "ip", Task::Start, "web", Task::Start));
}

#[test]
fn anti_colocated_clone_instances_spread_across_nodes() {
    let config = Configuration {
        nodes: vec![node_config("n1"), node_config("n2")],
        resources: vec![ResourceConfig {
            id: "c".into(),
            kind: ResourceKind::Clone,
            children: vec!["c-instance".into()],
            clone_max: Some(2),
            ..primitive("c")
        }, primitive("c-instance")],
        constraints: cluster_scheduler::config::ConstraintsConfig {
            colocations: vec![ColocationConfig {
                id: "c-anti".into(),
                score: Score::NEG_INFINITY,
                dependent: "c".into(),
                primary: "c".into(),
                dependent_role: None,
                primary_role: None,
                node_attribute: None,
                influence: true,
            }],
            ..Default::default()
        },
        ..Default::default()
    };
    let status = StatusInput {
        nodes: vec![online_status("n1"), online_status("n2")],
        resources: Vec::new(),
    };

    let result = schedule(&config, &status, EffectiveTime::from_epoch_seconds(1000));
    assert!(result.warnings.is_empty());

    let clone_id = result.working_set.resource_by_name("c").unwrap();
    let instances = result.working_set.resource(clone_id).unwrap().children.clone();
    assert_eq!(instances.len(), 2);
    let nodes: Vec<_> = instances
        .iter()
        .filter_map(|&id| result.working_set.resource(id).unwrap().assigned_node())
        .collect();
    assert_eq!(nodes.len(), 2, "both instances must be placed");
    assert_ne!(nodes[0], nodes[1], "anti-colocated instances must land on distinct nodes");
}

#[test]
fn failed_start_with_start_failure_fatal_reschedules_elsewhere() {
    let config = Configuration {
        crm_config: ClusterConfig {
            start_failure_is_fatal: true,
            ..Default::default()
        },
        nodes: vec![node_config("n1"), node_config("n2")],
        resources: vec![primitive("r1")],
        ..Default::default()
    };
    let status = StatusInput {
        nodes: vec![online_status("n1"), online_status("n2")],
        resources: vec![ResourceStatus {
            id: "r1".into(),
            managed: true,
            history: vec![HistoryEntry {
                resource: "r1".into(),
                node: "n1".into(),
                call_id: 1,
                task: "start".into(),
                interval_ms: 0,
                execution_status: ExecutionStatus::Done,
                exit_status: ExitStatus::Error,
                expected_exit_status: None,
                exit_reason: Some("agent reported failure".into()),
                last_change: EffectiveTime::from_epoch_seconds(900),
                transition_key: Some((1, 1)),
                op_digest_matches: None,
                migrate_source: None,
                migrate_target: None,
            }],
            lock_node: None,
            lock_time: None,
        }],
    };

    let result = schedule(&config, &status, EffectiveTime::from_epoch_seconds(1000));

    let rsc_id = result.working_set.resource_by_name("r1").unwrap();
    let resource = result.working_set.resource(rsc_id).unwrap();
    let n1 = result.working_set.node_by_name("n1").unwrap();
    let n2 = result.working_set.node_by_name("n2").unwrap();
    assert_eq!(resource.allowed_nodes.get(&n1), Some(&Score::NEG_INFINITY));
    assert!(!resource.failures.is_empty(), "a failure record must be emitted for r1 on n1");

    let start = find_action(&result, "r1", Task::Start).expect("r1 start action");
    assert_eq!(start.node, Some(n2));
}

#[test]
fn dangling_migration_forces_a_stop_on_the_source() {
    let config = Configuration {
        nodes: vec![node_config("n1"), node_config("n2")],
        resources: vec![primitive("r1")],
        ..Default::default()
    };
    let status = StatusInput {
        nodes: vec![online_status("n1"), online_status("n2")],
        resources: vec![ResourceStatus {
            id: "r1".into(),
            managed: true,
            history: vec![
                HistoryEntry {
                    resource: "r1".into(),
                    node: "n1".into(),
                    call_id: 1,
                    task: "migrate_to".into(),
                    interval_ms: 0,
                    execution_status: ExecutionStatus::Done,
                    exit_status: ExitStatus::Ok,
                    expected_exit_status: None,
                    exit_reason: None,
                    last_change: EffectiveTime::from_epoch_seconds(900),
                    transition_key: Some((1, 1)),
                    op_digest_matches: None,
                    migrate_source: Some("n1".into()),
                    migrate_target: Some("n2".into()),
                },
                HistoryEntry {
                    resource: "r1".into(),
                    node: "n2".into(),
                    call_id: 1,
                    task: "migrate_from".into(),
                    interval_ms: 0,
                    execution_status: ExecutionStatus::Done,
                    exit_status: ExitStatus::Ok,
                    expected_exit_status: None,
                    exit_reason: None,
                    last_change: EffectiveTime::from_epoch_seconds(901),
                    transition_key: Some((1, 2)),
                    op_digest_matches: None,
                    migrate_source: Some("n1".into()),
                    migrate_target: Some("n2".into()),
                },
            ],
            lock_node: None,
            lock_time: None,
        }],
    };

    let result = schedule(&config, &status, EffectiveTime::from_epoch_seconds(1000));

    let rsc_id = result.working_set.resource_by_name("r1").unwrap();
    let resource = result.working_set.resource(rsc_id).unwrap();
    let n1 = result.working_set.node_by_name("n1").unwrap();
    let n2 = result.working_set.node_by_name("n2").unwrap();
    assert_eq!(resource.assigned_node(), Some(n2));
    assert!(resource.dangling_migrations.contains(&n1));

    let stop = find_action(&result, "r1", Task::Stop).expect("a stop action on the source node");
    assert_eq!(stop.node, Some(n1));
}

#[test]
fn ordered_colocated_group_chains_starts_forward_and_stops_backward() {
    let config = Configuration {
        nodes: vec![node_config("n1")],
        resources: vec![
            ResourceConfig {
                id: "g".into(),
                kind: ResourceKind::Group,
                children: vec!["a".into(), "b".into(), "c".into()],
                ..primitive("g")
            },
            primitive("a"),
            primitive("b"),
            primitive("c"),
        ],
        ..Default::default()
    };
    let status = StatusInput {
        nodes: vec![online_status("n1")],
        resources: Vec::new(),
    };

    let result = schedule(&config, &status, EffectiveTime::from_epoch_seconds(1000));
    assert!(result.warnings.is_empty());

    assert!(ordered_before(&result, "a", Task::Start, "b", Task::Start));
    assert!(ordered_before(&result, "b", Task::Start, "c", Task::Start));
    assert!(ordered_before(&result, "c", Task::Stop, "b", Task::Stop));
    assert!(ordered_before(&result, "b", Task::Stop, "a", Task::Stop));

    let b_colocations = &result.working_set.resource(result.working_set.resource_by_name("b").unwrap()).unwrap().this_with_colocations;
    let has_infinity_onto_a = b_colocations.iter().any(|&cid| {
        let c = result.working_set.colocations.get(cid).unwrap();
        c.score == Score::INFINITY
            && result.working_set.resources.get(c.primary).unwrap().name == "a"
    });
    assert!(has_infinity_onto_a, "b with a must be +INFINITY");

    let c_colocations = &result.working_set.resource(result.working_set.resource_by_name("c").unwrap()).unwrap().this_with_colocations;
    let has_infinity_onto_b = c_colocations.iter().any(|&cid| {
        let c = result.working_set.colocations.get(cid).unwrap();
        c.score == Score::INFINITY
            && result.working_set.resources.get(c.primary).unwrap().name == "b"
    });
    assert!(has_infinity_onto_b, "c with b must be +INFINITY");
}
