//! Pipeline definitions and loading.
//!
//! Pipelines are defined in YAML: one build step, an ordered list of stages
//! (declaration order is execution order) and optional notification routing.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::{DeployableUnit, EventKind};

/// A complete pipeline definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Pipeline name (unique within the system)
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// The single artifact-producing step
    pub build: BuildStep,

    /// Stages in execution order
    #[serde(default)]
    pub stages: Vec<StageSpec>,

    /// Where lifecycle events are routed
    #[serde(default)]
    pub notifications: NotificationConfig,
}

impl Pipeline {
    /// Load a pipeline from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse a pipeline from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse pipeline YAML")
    }

    /// Validate the pipeline for structural completeness
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Pipeline name cannot be empty");
        }

        self.build.validate()?;

        let mut stage_names = HashSet::new();
        for (i, stage) in self.stages.iter().enumerate() {
            if stage.name.trim().is_empty() {
                anyhow::bail!("Stage {} has an empty name", i);
            }
            if !stage_names.insert(stage.name.as_str()) {
                anyhow::bail!("Duplicate stage name '{}'", stage.name);
            }
            stage.validate()?;
        }

        self.notifications.validate()
    }

    /// Get a stage by name
    pub fn get_stage(&self, name: &str) -> Option<&StageSpec> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Get the index of a stage by name
    pub fn stage_index(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }
}

/// Build step: ordered command groups producing one artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildStep {
    /// Primary output location handed to every stage
    pub output: String,

    /// Command groups, executed strictly in this order
    #[serde(default)]
    pub phases: Vec<PhaseCommands>,
}

impl BuildStep {
    fn validate(&self) -> Result<()> {
        if self.output.trim().is_empty() {
            anyhow::bail!("Build output location cannot be empty");
        }
        for group in &self.phases {
            if group.commands.iter().all(|c| c.trim().is_empty()) {
                anyhow::bail!("Build phase '{}' has no commands", group.phase);
            }
        }
        Ok(())
    }
}

/// Commands belonging to one build phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseCommands {
    pub phase: BuildPhase,
    pub commands: Vec<String>,
}

/// Logical build phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    Install,
    Test,
    Package,
    Synth,
}

impl BuildPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildPhase::Install => "install",
            BuildPhase::Test => "test",
            BuildPhase::Package => "package",
            BuildPhase::Synth => "synth",
        }
    }
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One promotion unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    /// Stage name (unique within pipeline)
    pub name: String,

    /// Target environment tag (e.g. "staging", "production")
    pub environment: String,

    /// Account/region the stage deploys into
    #[serde(default)]
    pub target: DeployTarget,

    /// Units applied in declared order
    #[serde(default)]
    pub units: Vec<DeployableUnit>,

    /// Gates and checks that must complete before units are applied
    #[serde(default)]
    pub pre: Vec<Action>,

    /// Scripts that run after every unit was applied
    #[serde(default)]
    pub post: Vec<Action>,
}

impl StageSpec {
    pub fn has_approval_gate(&self) -> bool {
        self.pre.iter().any(Action::is_approval)
    }

    /// Labels of the approval gates among the pre-actions
    pub fn approval_labels(&self) -> impl Iterator<Item = &str> {
        self.pre.iter().filter_map(|a| match a {
            Action::Approval { label, .. } => Some(label.as_str()),
            Action::Script { .. } => None,
        })
    }

    /// Scripted pre-actions, in declared order
    pub fn pre_scripts(&self) -> impl Iterator<Item = &Action> {
        self.pre.iter().filter(|a| !a.is_approval())
    }

    fn validate(&self) -> Result<()> {
        if self.environment.trim().is_empty() {
            anyhow::bail!("Stage '{}' has an empty environment", self.name);
        }

        let mut unit_names = HashSet::new();
        for unit in &self.units {
            if unit.name.trim().is_empty() {
                anyhow::bail!("Stage '{}' has a unit with an empty name", self.name);
            }
            if !unit_names.insert(unit.name.as_str()) {
                anyhow::bail!(
                    "Stage '{}' declares unit '{}' more than once",
                    self.name,
                    unit.name
                );
            }
        }

        let mut labels = HashSet::new();
        for label in self.approval_labels() {
            if label.trim().is_empty() {
                anyhow::bail!("Stage '{}' has an approval gate without a label", self.name);
            }
            if !labels.insert(label) {
                anyhow::bail!(
                    "Stage '{}' declares approval gate '{}' more than once",
                    self.name,
                    label
                );
            }
        }

        for action in &self.post {
            if action.is_approval() {
                anyhow::bail!(
                    "Stage '{}' has an approval gate as a post-action; gates are pre-actions only",
                    self.name
                );
            }
        }

        for action in self.pre.iter().chain(self.post.iter()) {
            if let Action::Script { name, commands, .. } = action {
                if name.trim().is_empty() {
                    anyhow::bail!("Stage '{}' has a script without a name", self.name);
                }
                if commands.iter().all(|c| c.trim().is_empty()) {
                    anyhow::bail!(
                        "Script '{}' in stage '{}' has no commands",
                        name,
                        self.name
                    );
                }
            }
        }

        Ok(())
    }
}

/// Account and region tags of a stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployTarget {
    pub account: Option<String>,
    pub region: Option<String>,
}

/// A pre- or post-action attached to a stage
///
/// ```yaml
/// pre:
///   - type: approval
///     label: ReleaseApproval
/// post:
///   - type: script
///     name: Tag Script
///     commands: ["./scripts/tag_repository.sh"]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Suspend the stage until a human approves
    Approval {
        label: String,
        #[serde(default)]
        instructions: Option<String>,
    },

    /// Run commands; any non-zero exit fails the stage
    Script {
        name: String,
        commands: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
}

impl Action {
    pub fn is_approval(&self) -> bool {
        matches!(self, Action::Approval { .. })
    }

    pub fn name(&self) -> &str {
        match self {
            Action::Approval { label, .. } => label,
            Action::Script { name, .. } => name,
        }
    }
}

/// Notification routing: chat channels and the topics feeding them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub channels: Vec<ChannelSpec>,

    #[serde(default)]
    pub topics: Vec<TopicSpec>,
}

impl NotificationConfig {
    fn validate(&self) -> Result<()> {
        let mut channel_names = HashSet::new();
        for channel in &self.channels {
            if !channel_names.insert(channel.name.as_str()) {
                anyhow::bail!("Duplicate notification channel '{}'", channel.name);
            }
        }

        let mut topic_names = HashSet::new();
        for topic in &self.topics {
            if !topic_names.insert(topic.name.as_str()) {
                anyhow::bail!("Duplicate notification topic '{}'", topic.name);
            }
            for channel in &topic.channels {
                if !channel_names.contains(channel.as_str()) {
                    anyhow::bail!(
                        "Topic '{}' references unknown channel '{}'",
                        topic.name,
                        channel
                    );
                }
            }
        }

        Ok(())
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelSpec> {
        self.channels.iter().find(|c| c.name == name)
    }
}

/// A downstream chat integration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub name: String,

    #[serde(flatten)]
    pub kind: ChannelKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelKind {
    /// Slack incoming webhook; the URL is read from `webhook_url_env`
    Slack { webhook_url_env: String },
}

/// A topic: an event filter fanning out to channels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSpec {
    pub name: String,

    /// Event kinds forwarded by this topic (empty = all)
    #[serde(default)]
    pub events: Vec<EventKind>,

    /// Channel names
    pub channels: Vec<String>,
}
