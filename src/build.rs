//! Builds a [`WorkingSet`] from a [`Configuration`], before any status is
//! unpacked into it.
//!
//! This is the connective layer beneath the three hard-core subsystems
//! (status unpacking, colocation, group orchestration) — without it there
//! is nothing for the unpacker, colocation engine, or group orchestrator
//! to operate on. Every element that fails validation is skipped with a
//! collected [`ConfigError`] rather than aborting the pass.

use crate::arena::ResourceId;
use crate::colocation::Colocation;
use crate::config::{
    ColocationConfig, Configuration, NodeConfig, NodeConfigKind, ResourceConfig, ResourceKind,
};
use crate::error::ConfigError;
use crate::node::{Node, NodeKind};
use crate::resource::{OperationTemplate, Resource, ResourceFlags, ResourceVariant, Role, RoleFilter};
use crate::score::Score;
use crate::status_input::StatusInput;
use crate::time::EffectiveTime;
use crate::working_set::WorkingSet;
use ahash::AHashMap;
use std::collections::BTreeSet;

/// Parses the legacy and current target-role meta-attribute spellings.
/// "Master"/"Slave" are the deprecated promoted-role names noted as
/// retained for in-situ replacement targets.
fn parse_target_role(raw: Option<&str>) -> Role {
    match raw {
        Some("Stopped") => Role::Stopped,
        Some("Started") => Role::Started,
        Some("Master") | Some("Promoted") => Role::Promoted,
        Some("Slave") | Some("Unpromoted") => Role::Unpromoted,
        _ => Role::Started,
    }
}

fn bool_attr(attrs: &std::collections::BTreeMap<String, String>, key: &str, default: bool) -> bool {
    attrs
        .get(key)
        .map(|v| matches!(v.as_str(), "true" | "yes" | "1"))
        .unwrap_or(default)
}

/// Constructs nodes from the configuration's node list.
fn build_nodes(ws: &mut WorkingSet, nodes: &[NodeConfig], diagnostics: &mut Vec<ConfigError>) {
    for node_cfg in nodes {
        if node_cfg.name.is_empty() {
            diagnostics.push(ConfigError::InvalidNode {
                id: node_cfg.id.clone(),
                reason: "node name must not be empty".to_string(),
            });
            continue;
        }
        let kind = match node_cfg.kind {
            NodeConfigKind::Member => NodeKind::Cluster,
            NodeConfigKind::Remote => NodeKind::Remote,
            // The deprecated "ping" node type: retained, never placed on.
            NodeConfigKind::Ping => NodeKind::Observer,
        };
        ws.insert_node(|id| {
            let mut node = Node::new(id, node_cfg.name.clone(), kind);
            node.attrs = node_cfg.attributes.clone();
            node.attrs.entry("#uname".to_string()).or_insert_with(|| node_cfg.name.clone());
            node.utilization = node_cfg.utilization.clone();
            node.weight = node_cfg.score;
            node
        });
    }
}

struct ResourceBuildContext<'a> {
    config: &'a ResourceConfig,
}

fn operation_templates(cfg: &ResourceConfig) -> Vec<OperationTemplate> {
    cfg.operations
        .iter()
        .map(|op| OperationTemplate {
            name: op.name.clone(),
            interval_ms: (op.interval.seconds().max(0) as u64).saturating_mul(1000),
            role: op.role.as_deref().map(|r| parse_target_role(Some(r))),
            timeout_ms: op.timeout.map(|t| (t.seconds().max(0) as u64) * 1000),
        })
        .collect()
}

fn build_primitive(ws: &mut WorkingSet, ctx: &ResourceBuildContext, parent: Option<ResourceId>) -> ResourceId {
    let cfg = ctx.config;
    let id = ws.insert_resource(|id| {
        let mut resource = Resource::new(id, cfg.id.clone(), ResourceVariant::Primitive);
        resource.priority = cfg
            .meta_attributes
            .get("priority")
            .and_then(|v| v.parse::<Score>().ok())
            .unwrap_or(Score::ZERO);
        resource.stickiness = cfg
            .meta_attributes
            .get("resource-stickiness")
            .and_then(|v| v.parse::<Score>().ok())
            .unwrap_or(Score::ZERO);
        resource.next_role = parse_target_role(cfg.meta_attributes.get("target-role").map(String::as_str));
        resource.flags.set(
            ResourceFlags::MANAGED,
            bool_attr(&cfg.meta_attributes, "is-managed", true),
        );
        resource.flags.set(
            ResourceFlags::CRITICAL,
            bool_attr(&cfg.meta_attributes, "critical", false),
        );
        resource.flags.set(
            ResourceFlags::UNIQUE,
            bool_attr(&cfg.meta_attributes, "globally-unique", true),
        );
        resource.parent = parent;
        resource.failure_timeout = cfg
            .meta_attributes
            .get("failure-timeout")
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|s| *s > 0);
        resource.remote_reconnect_ms = cfg
            .meta_attributes
            .get("reconnect-interval")
            .and_then(|v| v.parse::<i64>().ok())
            .map(|s| s * 1000);
        resource.utilization = cfg.utilization.clone();
        resource.operation_templates = operation_templates(cfg);
        resource
    });
    id
}

fn build_composite(
    ws: &mut WorkingSet,
    cfg: &ResourceConfig,
    by_id: &AHashMap<String, ResourceConfig>,
    diagnostics: &mut Vec<ConfigError>,
) -> Option<ResourceId> {
    match cfg.kind {
        ResourceKind::Primitive => {
            let ctx = ResourceBuildContext { config: cfg };
            Some(build_primitive(ws, &ctx, None))
        }
        ResourceKind::Group => {
            let group_id = ws.insert_resource(|id| {
                let mut r = Resource::new(id, cfg.id.clone(), ResourceVariant::Group);
                r.priority = cfg
                    .meta_attributes
                    .get("priority")
                    .and_then(|v| v.parse::<Score>().ok())
                    .unwrap_or(Score::ZERO);
                r.next_role = parse_target_role(cfg.meta_attributes.get("target-role").map(String::as_str));
                r
            });
            let mut members = Vec::new();
            for child_id in &cfg.children {
                let Some(child_cfg) = by_id.get(child_id) else {
                    diagnostics.push(ConfigError::DanglingConstraintReference {
                        id: cfg.id.clone(),
                        missing: child_id.clone(),
                    });
                    continue;
                };
                let ctx = ResourceBuildContext { config: child_cfg };
                let member_id = build_primitive(ws, &ctx, Some(group_id));
                members.push(member_id);
            }
            if let Ok(group) = ws.resource_mut(group_id) {
                group.children = members.clone();
            }
            let group_flags = crate::group::GroupFlags {
                ordered: bool_attr(&cfg.meta_attributes, "ordered", true),
                colocated: bool_attr(&cfg.meta_attributes, "collocated", true),
            };
            crate::group::implicit_colocations(ws, &members, group_flags);
            Some(group_id)
        }
        ResourceKind::Clone => {
            let Some(template_id) = cfg.children.first() else {
                diagnostics.push(ConfigError::InvalidResource {
                    id: cfg.id.clone(),
                    reason: "clone has no child template".to_string(),
                });
                return None;
            };
            let Some(template) = by_id.get(template_id) else {
                diagnostics.push(ConfigError::DanglingConstraintReference {
                    id: cfg.id.clone(),
                    missing: template_id.clone(),
                });
                return None;
            };
            let promotable = cfg.promotable;
            let clone_max = cfg.clone_max.unwrap_or(ws.nodes.len().max(1) as u32);
            let clone_id = ws.insert_resource(|id| {
                let mut r = Resource::new(id, cfg.id.clone(), ResourceVariant::Clone { promotable });
                r.next_role = parse_target_role(cfg.meta_attributes.get("target-role").map(String::as_str));
                r.flags.set(ResourceFlags::PROMOTABLE, promotable);
                r
            });
            let unique = bool_attr(&template.meta_attributes, "globally-unique", true);
            let mut instances = Vec::new();
            for i in 0..clone_max {
                let instance_name = format!("{template_id}:{i}");
                let instance_id = ws.insert_resource(|id| {
                    let mut r = Resource::new(id, instance_name.clone(), ResourceVariant::Primitive);
                    r.priority = template
                        .meta_attributes
                        .get("priority")
                        .and_then(|v| v.parse::<Score>().ok())
                        .unwrap_or(Score::ZERO);
                    r.stickiness = template
                        .meta_attributes
                        .get("resource-stickiness")
                        .and_then(|v| v.parse::<Score>().ok())
                        .unwrap_or(Score::ZERO);
                    r.next_role = parse_target_role(template.meta_attributes.get("target-role").map(String::as_str));
                    r.flags.set(ResourceFlags::UNIQUE, unique);
                    r.parent = Some(clone_id);
                    r.operation_templates = operation_templates(template);
                    r
                });
                instances.push(instance_id);
            }
            if let Ok(clone) = ws.resource_mut(clone_id) {
                clone.children = instances;
            }
            Some(clone_id)
        }
        ResourceKind::Bundle => {
            // Minimal bundle model: one guest node + container resource per
            // replica, with the contained primitive (if any) restricted to
            // running inside its own replica's guest. Address-substitution
            // timing (REMOTE_CONTAINER_HACK) and image/network parameters
            // are out of scope for construction; see DESIGN.md.
            let replicas = cfg.clone_max.unwrap_or(1).max(1);
            let bundle_id = ws.insert_resource(|id| {
                let mut r = Resource::new(id, cfg.id.clone(), ResourceVariant::Bundle);
                r.next_role = parse_target_role(cfg.meta_attributes.get("target-role").map(String::as_str));
                r
            });
            let child_template = cfg.children.first().and_then(|cid| by_id.get(cid));
            let mut containers = Vec::new();
            for i in 0..replicas {
                let guest_name = format!("{}-{i}", cfg.id);
                let container_id = ws.insert_resource(|id| {
                    let mut r = Resource::new(id, format!("{}-docker-{i}", cfg.id), ResourceVariant::Primitive);
                    r.parent = Some(bundle_id);
                    r.flags.insert(ResourceFlags::IS_REMOTE_NODE);
                    r
                });
                if let Ok(container) = ws.resource_mut(container_id) {
                    container.container = Some(container_id);
                }
                let guest_node_id = ws.insert_node(|id| {
                    let mut node = Node::new(id, guest_name.clone(), NodeKind::Guest);
                    node.connection_rsc = Some(container_id);
                    node
                });
                if let Some(template) = child_template {
                    let ctx = ResourceBuildContext { config: template };
                    let instance_id = build_primitive(ws, &ctx, Some(bundle_id));
                    if let Ok(instance) = ws.resource_mut(instance_id) {
                        instance.container = Some(container_id);
                        instance.allowed_nodes.clear();
                        instance.allowed_nodes.insert(guest_node_id, Score::ZERO);
                    }
                    if let Ok(container) = ws.resource_mut(container_id) {
                        container.fillers.push(instance_id);
                    }
                }
                containers.push(container_id);
            }
            if let Ok(bundle) = ws.resource_mut(bundle_id) {
                bundle.children = containers;
            }
            Some(bundle_id)
        }
    }
}

fn build_colocation(ws: &mut WorkingSet, cfg: &ColocationConfig, diagnostics: &mut Vec<ConfigError>) {
    let score = cfg.score;
    if score.is_ignorable() {
        // A score of 0 means "ignore" and must never enter the constraint set.
        return;
    }
    let Some(dependent) = ws.resource_by_name(&cfg.dependent) else {
        diagnostics.push(ConfigError::DanglingConstraintReference {
            id: cfg.id.clone(),
            missing: cfg.dependent.clone(),
        });
        return;
    };
    let Some(primary) = ws.resource_by_name(&cfg.primary) else {
        diagnostics.push(ConfigError::DanglingConstraintReference {
            id: cfg.id.clone(),
            missing: cfg.primary.clone(),
        });
        return;
    };
    let role_filter = |raw: &Option<String>| match raw.as_deref() {
        None => RoleFilter::Any,
        Some(r) => RoleFilter::Specific(parse_target_role(Some(r))),
    };
    let node_attribute = cfg
        .node_attribute
        .clone()
        .unwrap_or_else(|| Colocation::DEFAULT_ATTRIBUTE.to_string());

    // A clone colocated with itself names no placeable
    // resource directly -- it expresses that every instance must avoid
    // every other instance, so it expands into one pairwise constraint per
    // distinct pair of instances instead of a single constraint on the
    // (unplaceable) clone id.
    if dependent == primary {
        let is_clone = ws
            .resource(dependent)
            .map(|r| matches!(r.variant, ResourceVariant::Clone { .. }))
            .unwrap_or(false);
        if is_clone {
            let instances = ws.resource(dependent).map(|r| r.children.clone()).unwrap_or_default();
            for &a in &instances {
                for &b in &instances {
                    if a == b {
                        continue;
                    }
                    insert_colocation_pair(
                        ws,
                        score,
                        a,
                        b,
                        role_filter(&cfg.dependent_role),
                        role_filter(&cfg.primary_role),
                        node_attribute.clone(),
                        cfg.influence,
                    );
                }
            }
            return;
        }
    }

    insert_colocation_pair(
        ws,
        score,
        dependent,
        primary,
        role_filter(&cfg.dependent_role),
        role_filter(&cfg.primary_role),
        node_attribute,
        cfg.influence,
    );
}

#[allow(clippy::too_many_arguments)]
fn insert_colocation_pair(
    ws: &mut WorkingSet,
    score: Score,
    dependent: ResourceId,
    primary: ResourceId,
    dependent_role: RoleFilter,
    primary_role: RoleFilter,
    node_attribute: String,
    influence: bool,
) {
    let colocation_id = ws.colocations.insert_with(|id| Colocation {
        id,
        score,
        dependent,
        primary,
        dependent_role,
        primary_role,
        node_attribute,
        influence,
    });
    if let Ok(r) = ws.resource_mut(dependent) {
        r.this_with_colocations.push(colocation_id);
    }
    if let Ok(r) = ws.resource_mut(primary) {
        r.with_this_colocations.push(colocation_id);
    }
}

/// Seeds every resource's `allowed_nodes` table: every currently eligible
/// node at score zero if the cluster is symmetric, otherwise empty (only
/// explicit location constraints grant permission).
fn seed_allowed_nodes(ws: &mut WorkingSet) {
    let symmetric = ws.config.symmetric_cluster;
    if !symmetric {
        // Asymmetric cluster: only explicit location constraints grant
        // permission, applied separately in `apply_location_constraints`.
        return;
    }
    let node_ids = ws.node_ids_sorted();
    let resource_ids = ws.resource_ids_sorted();
    for rsc_id in resource_ids {
        let Ok(resource) = ws.resource_mut(rsc_id) else { continue };
        if resource.variant != ResourceVariant::Primitive {
            continue;
        }
        if !resource.allowed_nodes.is_empty() {
            // Bundle fillers are already restricted to their own guest node.
            continue;
        }
        for &node_id in &node_ids {
            resource.allowed_nodes.entry(node_id).or_insert(Score::ZERO);
        }
    }
}

fn apply_location_constraints(ws: &mut WorkingSet, config: &Configuration, diagnostics: &mut Vec<ConfigError>) {
    for loc in &config.constraints.locations {
        let Some(rsc_id) = ws.resource_by_name(&loc.resource) else {
            diagnostics.push(ConfigError::DanglingConstraintReference {
                id: loc.id.clone(),
                missing: loc.resource.clone(),
            });
            continue;
        };
        let Some(node_name) = &loc.node else { continue };
        let Some(node_id) = ws.node_by_name(node_name) else {
            diagnostics.push(ConfigError::DanglingConstraintReference {
                id: loc.id.clone(),
                missing: node_name.clone(),
            });
            continue;
        };
        let score = loc.score.unwrap_or(Score::INFINITY);
        if score.is_ignorable() {
            continue;
        }
        if let Ok(resource) = ws.resource_mut(rsc_id) {
            let current = *resource.allowed_nodes.get(&node_id).unwrap_or(&Score::ZERO);
            resource.allowed_nodes.insert(node_id, current.add(score));
        }
    }
}

/// Marks resources present in `status` but absent from `config` as orphans.
fn mark_orphans(ws: &mut WorkingSet, status: &StatusInput, config: &Configuration) {
    let configured: BTreeSet<&str> = config.resources.iter().map(|r| r.id.as_str()).collect();
    for rsc_status in &status.resources {
        if configured.contains(rsc_status.id.as_str()) {
            continue;
        }
        if ws.resource_by_name(&rsc_status.id).is_some() {
            continue;
        }
        let stop_orphans = ws.config.stop_orphan_resources;
        let id = ws.insert_resource(|id| {
            let mut r = Resource::new(id, rsc_status.id.clone(), ResourceVariant::Primitive);
            r.flags.insert(ResourceFlags::REMOVED);
            r.flags.set(ResourceFlags::MANAGED, stop_orphans);
            r.next_role = if stop_orphans { Role::Stopped } else { Role::Unknown };
            r
        });
        if stop_orphans {
            if let Ok(r) = ws.resource_mut(id) {
                r.ban_from_all("orphan resource, stop-orphan-resources=true");
            }
        }
    }
}

/// Builds the working set from `config`, before any status unpacking runs.
/// Returns the set along with every configuration error encountered; each
/// offending element is skipped rather than aborting the build.
pub fn build_working_set(config: &Configuration, effective_time: EffectiveTime) -> (WorkingSet, Vec<ConfigError>) {
    let mut diagnostics = config.validate();
    let mut ws = WorkingSet::new(config.crm_config.clone(), effective_time);
    build_nodes(&mut ws, &config.nodes, &mut diagnostics);

    let by_id: AHashMap<String, ResourceConfig> = config
        .resources
        .iter()
        .map(|r| (r.id.clone(), r.clone()))
        .collect();

    // Only top-level resources are built directly; group/clone/bundle
    // builders construct their own children from `by_id`.
    let top_level: BTreeSet<&str> = {
        let mut nested = BTreeSet::new();
        for r in &config.resources {
            if matches!(r.kind, ResourceKind::Group | ResourceKind::Clone | ResourceKind::Bundle) {
                for child in &r.children {
                    nested.insert(child.as_str());
                }
            }
        }
        config
            .resources
            .iter()
            .map(|r| r.id.as_str())
            .filter(|id| !nested.contains(id))
            .collect()
    };

    for rsc_id in &top_level {
        let Some(cfg) = by_id.get(*rsc_id) else { continue };
        build_composite(&mut ws, cfg, &by_id, &mut diagnostics);
    }

    seed_allowed_nodes(&mut ws);
    apply_location_constraints(&mut ws, config, &mut diagnostics);

    for colocation in &config.constraints.colocations {
        build_colocation(&mut ws, colocation, &mut diagnostics);
    }
    crate::colocation_engine::rebuild_storage(&mut ws);

    for ticket in &config.constraints.tickets {
        let Some(rsc_id) = ws.resource_by_name(&ticket.resource) else {
            diagnostics.push(ConfigError::DanglingConstraintReference {
                id: ticket.id.clone(),
                missing: ticket.resource.clone(),
            });
            continue;
        };
        ws.ticket_constraints.push(crate::colocation::TicketConstraint {
            ticket: ticket.ticket.clone(),
            dependent: rsc_id,
            score: ticket.score,
            loss_policy_demote: ticket.loss_policy.as_deref() == Some("demote"),
        });
        ws.ticket_states
            .entry(ticket.ticket.clone())
            .or_insert(crate::colocation::TicketState { granted: true, standby: false });
    }

    apply_cluster_wide_overrides(&mut ws);

    (ws, diagnostics)
}

/// Applies the two whole-cluster override toggles:
/// `maintenance-mode` suspends management of every resource and node as a
/// unit (no stop/start/promote/demote is ever generated, only monitoring
/// continues undisturbed), while `stop-all-resources` leaves resources
/// managed but forces every one of them toward `Stopped`.
fn apply_cluster_wide_overrides(ws: &mut WorkingSet) {
    if ws.config.maintenance_mode {
        for rsc_id in ws.resource_ids_sorted() {
            if let Ok(r) = ws.resource_mut(rsc_id) {
                r.flags.remove(ResourceFlags::MANAGED);
            }
        }
        // Node-level maintenance is re-asserted in `unpack::unpack_node_states`
        // after transient attributes are applied, so a stale per-node
        // "maintenance" status attribute can never override the cluster-wide
        // toggle.
    }
    if ws.config.stop_all_resources {
        for rsc_id in ws.resource_ids_sorted() {
            if let Ok(r) = ws.resource_mut(rsc_id) {
                r.next_role = Role::Stopped;
            }
        }
    }
}

/// Marks history-only orphan resources. Split from [`build_working_set`]
/// since it needs the status input, which isn't available until after the
/// configuration-only construction above.
pub fn mark_orphans_from_status(ws: &mut WorkingSet, status: &StatusInput, config: &Configuration) {
    mark_orphans(ws, status, config);
}
