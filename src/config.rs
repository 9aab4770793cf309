//! The declarative cluster configuration.
//!
//! This is the fixed logical data model implementers target; the loader
//! that turns an on-disk format into this tree is explicitly out of scope
//! (Non-goals). Every type here is `serde::Deserialize` so any
//! front-end (XML, YAML, JSON, ...) can populate it.

use crate::error::ConfigError;
use crate::score::Score;
use crate::time::ConfiguredDuration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoQuorumPolicy {
    Stop,
    Freeze,
    Ignore,
    Demote,
    Suicide,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FenceReaction {
    Stop,
    Panic,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeHealthStrategy {
    None,
    MigrateOnRed,
    OnlyGreen,
    Progressive,
    Custom,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlacementStrategy {
    Default,
    Utilization,
    Minimal,
    Balanced,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StonithAction {
    Reboot,
    Off,
    /// Retained for backward compatibility with configurations that still
    /// set `stonith-action=poweroff`. Kept for in-situ replacement targets;
    /// a greenfield deployment should
    /// reject it at validation time (see `ClusterConfig::validate`).
    PoweroffDeprecated,
}

/// this module's cluster option enumeration, one typed field per option.
/// Each option is a typed field, parsed once, rather than a repeated
/// string lookup.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ClusterConfig {
    pub batch_limit: i32,
    pub cluster_delay: ConfiguredDuration,
    pub cluster_recheck_interval: ConfiguredDuration,
    pub concurrent_fencing: bool,
    pub dc_deadtime: ConfiguredDuration,
    pub election_timeout: ConfiguredDuration,
    pub shutdown_escalation: ConfiguredDuration,
    pub join_integration_timeout: ConfiguredDuration,
    pub join_finalization_timeout: ConfiguredDuration,
    pub enable_acl: bool,
    pub enable_startup_probes: bool,
    pub fence_reaction: FenceReaction,
    pub have_watchdog: bool,
    pub load_threshold_percent: u8,
    pub maintenance_mode: bool,
    pub stop_all_resources: bool,
    pub migration_limit: i32,
    pub no_quorum_policy: NoQuorumPolicy,
    pub node_action_limit: i32,
    pub node_health_base: i64,
    pub node_health_green: i64,
    pub node_health_yellow: i64,
    pub node_health_red: i64,
    pub cluster_ipc_limit: i32,
    pub node_health_strategy: NodeHealthStrategy,
    pub node_pending_timeout: ConfiguredDuration,
    pub pe_error_series_max: i32,
    pub pe_warn_series_max: i32,
    pub pe_input_series_max: i32,
    pub placement_strategy: PlacementStrategy,
    pub priority_fencing_delay: ConfiguredDuration,
    pub shutdown_lock: bool,
    pub shutdown_lock_limit: ConfiguredDuration,
    pub start_failure_is_fatal: bool,
    pub stonith_action: StonithAction,
    pub stonith_enabled: bool,
    pub stonith_max_attempts: u32,
    pub stonith_timeout: ConfiguredDuration,
    pub stonith_watchdog_timeout: ConfiguredDuration,
    pub startup_fencing: bool,
    pub symmetric_cluster: bool,
    pub stop_orphan_resources: bool,
    pub stop_orphan_actions: bool,
    pub transition_delay: ConfiguredDuration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            batch_limit: 0,
            cluster_delay: ConfiguredDuration::from_seconds(60),
            cluster_recheck_interval: ConfiguredDuration::from_seconds(15 * 60),
            concurrent_fencing: false,
            dc_deadtime: ConfiguredDuration::from_seconds(20),
            election_timeout: ConfiguredDuration::from_seconds(120),
            shutdown_escalation: ConfiguredDuration::from_seconds(20 * 60),
            join_integration_timeout: ConfiguredDuration::from_seconds(60),
            join_finalization_timeout: ConfiguredDuration::from_seconds(60),
            enable_acl: false,
            enable_startup_probes: true,
            fence_reaction: FenceReaction::Stop,
            have_watchdog: false,
            load_threshold_percent: 80,
            maintenance_mode: false,
            stop_all_resources: false,
            migration_limit: -1,
            no_quorum_policy: NoQuorumPolicy::Stop,
            node_action_limit: 0,
            node_health_base: 0,
            node_health_green: 0,
            node_health_yellow: 0,
            node_health_red: 0,
            cluster_ipc_limit: 0,
            node_health_strategy: NodeHealthStrategy::None,
            node_pending_timeout: ConfiguredDuration::ZERO,
            pe_error_series_max: -1,
            pe_warn_series_max: -1,
            pe_input_series_max: -1,
            placement_strategy: PlacementStrategy::Default,
            priority_fencing_delay: ConfiguredDuration::ZERO,
            shutdown_lock: false,
            shutdown_lock_limit: ConfiguredDuration::ZERO,
            start_failure_is_fatal: true,
            stonith_action: StonithAction::Reboot,
            stonith_enabled: false,
            stonith_max_attempts: 10,
            stonith_timeout: ConfiguredDuration::from_seconds(60),
            stonith_watchdog_timeout: ConfiguredDuration::ZERO,
            startup_fencing: true,
            symmetric_cluster: true,
            stop_orphan_resources: true,
            stop_orphan_actions: true,
            transition_delay: ConfiguredDuration::ZERO,
        }
    }
}

impl ClusterConfig {
    /// Validates cross-field and range constraints, returning one
    /// [`ConfigError`] per offending field rather than failing outright:
    /// the offending field is skipped and scheduling continues with
    /// whatever remains.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        if self.load_threshold_percent > 100 {
            errors.push(ConfigError::InvalidClusterOptionValue {
                name: "load-threshold".into(),
                value: self.load_threshold_percent.to_string(),
                reason: "must be a percentage in 0..=100".into(),
            });
        }
        if matches!(self.stonith_action, StonithAction::PoweroffDeprecated) {
            tracing::warn!(
                "stonith-action=poweroff-deprecated is retained only for in-situ compatibility"
            );
        }
        errors
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeConfigKind {
    Member,
    Remote,
    /// The deprecated "ping" node type, retained for in-situ compatibility.
    Ping,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NodeConfig {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeConfigKind,
    #[serde(default)]
    pub score: Score,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub utilization: BTreeMap<String, i64>,
}

impl serde::Serialize for Score {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Score {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<Score>().map_err(serde::de::Error::custom)
    }
}

impl serde::Serialize for ConfiguredDuration {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.seconds())
    }
}

impl<'de> serde::Deserialize<'de> for ConfiguredDuration {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Seconds(i64),
            Text(String),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Seconds(s) => Ok(ConfiguredDuration::from_seconds(s)),
            Repr::Text(s) => ConfiguredDuration::parse(&s).map_err(serde::de::Error::custom),
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Primitive,
    Group,
    Clone,
    Bundle,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OperationConfig {
    pub name: String,
    #[serde(default)]
    pub interval: ConfiguredDuration,
    #[serde(default)]
    pub timeout: Option<ConfiguredDuration>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default = "default_on_fail")]
    pub on_fail: Option<String>,
}

fn default_on_fail() -> Option<String> {
    None
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ResourceConfig {
    pub id: String,
    pub kind: ResourceKind,
    #[serde(default)]
    pub meta_attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub instance_attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub utilization: BTreeMap<String, i64>,
    #[serde(default)]
    pub operations: Vec<OperationConfig>,
    /// Group/clone/bundle members, in declared order (order matters for
    /// group implicit ordering/colocation).
    #[serde(default)]
    pub children: Vec<String>,
    /// For clones/bundles.
    #[serde(default)]
    pub clone_max: Option<u32>,
    #[serde(default)]
    pub clone_node_max: Option<u32>,
    #[serde(default)]
    pub promotable: bool,
    #[serde(default)]
    pub promoted_max: Option<u32>,
    #[serde(default)]
    pub promoted_node_max: Option<u32>,
}

impl ResourceConfig {
    /// Legacy promoted-role meta-attribute names `master-max`/
    /// `master-node-max` are read as fallbacks if the current names are
    /// absent.
    pub fn promoted_max_compat(&self) -> Option<u32> {
        self.promoted_max.or_else(|| {
            self.meta_attributes
                .get("master-max")
                .and_then(|v| v.parse().ok())
        })
    }

    pub fn promoted_node_max_compat(&self) -> Option<u32> {
        self.promoted_node_max.or_else(|| {
            self.meta_attributes
                .get("master-node-max")
                .and_then(|v| v.parse().ok())
        })
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ColocationConfig {
    pub id: String,
    pub score: Score,
    pub dependent: String,
    pub primary: String,
    #[serde(default)]
    pub dependent_role: Option<String>,
    #[serde(default)]
    pub primary_role: Option<String>,
    #[serde(default)]
    pub node_attribute: Option<String>,
    #[serde(default = "default_true")]
    pub influence: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OrderingConfig {
    pub id: String,
    pub first: String,
    pub first_action: String,
    pub then: String,
    pub then_action: String,
    #[serde(default = "default_true")]
    pub mandatory: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LocationConfig {
    pub id: String,
    pub resource: String,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub score: Option<Score>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TicketConfig {
    pub id: String,
    pub ticket: String,
    pub resource: String,
    #[serde(default = "Score::infinity_default")]
    pub score: Score,
    #[serde(default)]
    pub loss_policy: Option<String>,
}

impl Score {
    fn infinity_default() -> Score {
        Score::INFINITY
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ConstraintsConfig {
    #[serde(default)]
    pub colocations: Vec<ColocationConfig>,
    #[serde(default)]
    pub orderings: Vec<OrderingConfig>,
    #[serde(default)]
    pub locations: Vec<LocationConfig>,
    #[serde(default)]
    pub tickets: Vec<TicketConfig>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TagConfig {
    pub id: String,
    pub references: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Configuration {
    #[serde(default)]
    pub crm_config: ClusterConfig,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
    #[serde(default)]
    pub constraints: ConstraintsConfig,
    #[serde(default)]
    pub tags: Vec<TagConfig>,
}

impl Configuration {
    /// Runs every sub-validator and collects all resulting errors; never
    /// fails outright.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = self.crm_config.validate();
        let known_ids: std::collections::BTreeSet<&str> =
            self.resources.iter().map(|r| r.id.as_str()).collect();
        for colocation in &self.constraints.colocations {
            if !known_ids.contains(colocation.dependent.as_str()) {
                errors.push(ConfigError::DanglingConstraintReference {
                    id: colocation.id.clone(),
                    missing: colocation.dependent.clone(),
                });
            }
            if !known_ids.contains(colocation.primary.as_str()) {
                errors.push(ConfigError::DanglingConstraintReference {
                    id: colocation.id.clone(),
                    missing: colocation.primary.clone(),
                });
            }
        }
        errors
    }
}
