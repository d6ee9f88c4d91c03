//! Pipeline configuration: the declarative stage graph (spec §3.3, §4.2, C2).

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::envelope::ToolAccess;
use crate::types::{Error, Result};

/// Reserved routing targets that are not declared agent stages (spec §3.2).
pub const RESERVED_TARGETS: &[&str] = &["end", "clarification", "confirmation"];

/// How a multi-predecessor `requires` set is evaluated in parallel mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JoinStrategy {
    #[default]
    All,
    Any,
}

/// A single ordered routing rule: `outputs[stage][condition_key] == value -> target`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    pub condition_key: String,
    pub value: serde_json::Value,
    pub target: String,
}

/// Per-edge traversal cap (spec §3.3, §4.1.1 step 7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeLimit {
    pub from: String,
    pub to: String,
    pub max_count: u32,
}

/// One stage's configuration (spec §3.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    pub stage_order: i32,

    #[serde(default)]
    pub requires: HashSet<String>,

    #[serde(default)]
    pub after: HashSet<String>,

    #[serde(default)]
    pub join_strategy: JoinStrategy,

    #[serde(default)]
    pub has_llm: bool,

    #[serde(default)]
    pub has_tools: bool,

    #[serde(default)]
    pub has_policies: bool,

    #[serde(default = "default_tool_access")]
    pub tool_access: ToolAccess,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<HashSet<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_role: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub required_output_fields: Vec<String>,

    #[serde(default)]
    pub routing_rules: Vec<RoutingRule>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_next: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_next: Option<String>,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u32,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_tool_access() -> ToolAccess {
    ToolAccess::None
}

fn default_timeout_seconds() -> u32 {
    60
}

fn default_max_retries() -> u32 {
    2
}

/// The declarative pipeline definition (spec §3.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub agents: Vec<AgentConfig>,
    pub max_iterations: u32,
    pub max_llm_calls: u32,
    pub max_agent_hops: u32,

    #[serde(default)]
    pub edge_limits: Vec<EdgeLimit>,

    #[serde(default)]
    pub default_run_mode: RunMode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification_resume_stage: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_resume_stage: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Sequential,
    Parallel,
}

/// A validated pipeline: the config plus derived lookup structures, built
/// once at construction so the runtime never re-derives them per hop.
#[derive(Debug, Clone)]
pub struct ValidatedPipeline {
    pub config: PipelineConfig,
    /// Agent name -> config, for O(1) stage lookup.
    agents_by_name: HashMap<String, AgentConfig>,
    /// `(from,to)` -> `max_count`.
    edge_limit_by_pair: HashMap<(String, String), u32>,
    /// Stage names ordered by `stage_order`, used for loop-back detection.
    pub stage_order: Vec<String>,
}

impl ValidatedPipeline {
    /// Validate and compile a `PipelineConfig` (spec §4.2).
    pub fn build(mut config: PipelineConfig) -> Result<Self> {
        config.agents.sort_by_key(|a| a.stage_order);

        let mut agents_by_name = HashMap::new();
        for agent in &config.agents {
            if agents_by_name.insert(agent.name.clone(), agent.clone()).is_some() {
                return Err(Error::config_error(format!("duplicate agent name: {}", agent.name)));
            }
        }

        let is_valid_target = |target: &str| -> bool {
            RESERVED_TARGETS.contains(&target) || agents_by_name.contains_key(target)
        };

        for agent in &config.agents {
            if agent.has_llm && agent.model_role.as_deref().unwrap_or("").is_empty() {
                return Err(Error::config_error(format!(
                    "agent {} has_llm=true but model_role is empty",
                    agent.name
                )));
            }

            for rule in &agent.routing_rules {
                if !is_valid_target(&rule.target) {
                    return Err(Error::config_error(format!(
                        "agent {}: routing target {:?} is not a declared stage or reserved name",
                        agent.name, rule.target
                    )));
                }
            }
            if let Some(target) = &agent.default_next {
                if !is_valid_target(target) {
                    return Err(Error::config_error(format!(
                        "agent {}: default_next {:?} is not a declared stage or reserved name",
                        agent.name, target
                    )));
                }
            }
            if let Some(target) = &agent.error_next {
                if !is_valid_target(target) {
                    return Err(Error::config_error(format!(
                        "agent {}: error_next {:?} is not a declared stage or reserved name",
                        agent.name, target
                    )));
                }
            }

            for dep in agent.requires.iter().chain(agent.after.iter()) {
                if dep == &agent.name {
                    return Err(Error::config_error(format!(
                        "agent {}: requires/after cannot be self-referential",
                        agent.name
                    )));
                }
                if !agents_by_name.contains_key(dep) {
                    return Err(Error::config_error(format!(
                        "agent {}: requires/after references undeclared stage {:?}",
                        agent.name, dep
                    )));
                }
            }
        }

        let mut edge_limit_by_pair = HashMap::new();
        for edge in &config.edge_limits {
            if edge.max_count > 0 {
                edge_limit_by_pair.insert((edge.from.clone(), edge.to.clone()), edge.max_count);
            }
        }

        let stage_order = config.agents.iter().map(|a| a.name.clone()).collect();

        Ok(Self {
            config,
            agents_by_name,
            edge_limit_by_pair,
            stage_order,
        })
    }

    pub fn agent(&self, name: &str) -> Option<&AgentConfig> {
        self.agents_by_name.get(name)
    }

    pub fn edge_limit(&self, from: &str, to: &str) -> Option<u32> {
        self.edge_limit_by_pair.get(&(from.to_string(), to.to_string())).copied()
    }

    /// Agents whose dependency constraints are satisfied against
    /// `completed_stage_set` and not already active or completed
    /// (spec §4.2 ready-set computation).
    pub fn ready_set(
        &self,
        completed_stage_set: &HashSet<String>,
        active_stages: &HashSet<String>,
    ) -> Vec<&AgentConfig> {
        self.config
            .agents
            .iter()
            .filter(|agent| !completed_stage_set.contains(&agent.name) && !active_stages.contains(&agent.name))
            .filter(|agent| {
                if agent.requires.is_empty() {
                    true
                } else {
                    match agent.join_strategy {
                        JoinStrategy::All => agent.requires.iter().all(|r| completed_stage_set.contains(r)),
                        JoinStrategy::Any => agent.requires.iter().any(|r| completed_stage_set.contains(r)),
                    }
                }
            })
            .filter(|agent| {
                agent
                    .after
                    .iter()
                    .filter(|dep| self.agents_by_name.contains_key(dep.as_str()))
                    .all(|dep| completed_stage_set.contains(dep))
            })
            .collect()
    }
}
