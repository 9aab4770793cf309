//! Benchmarks the full scheduling pass at a few cluster sizes.

use cluster_scheduler::config::{
    ColocationConfig, Configuration, NodeConfig, NodeConfigKind, ResourceConfig, ResourceKind,
};
use cluster_scheduler::schedule;
use cluster_scheduler::score::Score;
use cluster_scheduler::status_input::{CcmState, CrmdState, ExpectedPhase, JoinPhase, NodeStatus, StatusInput};
use cluster_scheduler::time::EffectiveTime;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn node_config(name: String) -> NodeConfig {
    NodeConfig {
        id: name.clone(),
        name,
        kind: NodeConfigKind::Member,
        score: Score::ZERO,
        attributes: Default::default(),
        utilization: Default::default(),
    }
}

fn node_status(name: String) -> NodeStatus {
    NodeStatus {
        id: name,
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

fn primitive(id: String) -> ResourceConfig {
    ResourceConfig {
        id,
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

/// `node_count` nodes, `node_count * 2` primitives, with every odd-numbered
/// primitive mandatorily colocated with its predecessor (a chain of
/// dependent pulls, the shape a real deployment's ip/service pairs take).
fn scaled_config(node_count: usize) -> (Configuration, StatusInput) {
    let nodes: Vec<NodeConfig> = (0..node_count).map(|i| node_config(format!("n{i}"))).collect();
    let node_statuses: Vec<NodeStatus> = (0..node_count).map(|i| node_status(format!("n{i}"))).collect();

    let resource_count = node_count * 2;
    let resources: Vec<ResourceConfig> = (0..resource_count).map(|i| primitive(format!("r{i}"))).collect();
    let colocations: Vec<ColocationConfig> = (1..resource_count)
        .step_by(2)
        .map(|i| ColocationConfig {
            id: format!("col{i}"),
            score: Score::INFINITY,
            dependent: format!("r{i}"),
            primary: format!("r{}", i - 1),
            dependent_role: None,
            primary_role: None,
            node_attribute: None,
            influence: true,
        })
        .collect();

    let config = Configuration {
        nodes,
        resources,
        constraints: cluster_scheduler::config::ConstraintsConfig {
            colocations,
            ..Default::default()
        },
        ..Default::default()
    };
    let status = StatusInput {
        nodes: node_statuses,
        resources: Vec::new(),
    };
    (config, status)
}

fn bench_schedule(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule");
    for &node_count in &[4usize, 16, 64] {
        let (config, status) = scaled_config(node_count);
        group.bench_with_input(BenchmarkId::from_parameter(node_count), &node_count, |b, _| {
            b.iter(|| {
                let result = schedule(
                    black_box(&config),
                    black_box(&status),
                    black_box(EffectiveTime::from_epoch_seconds(1_700_000_000)),
                );
                black_box(result.graph().actions.len());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_schedule);
criterion_main!(benches);
