//! Agent runtime presets.
//!
//! A preset says how to launch an AI coding agent in autonomous mode and how
//! to resume one of its sessions. Four presets are built in; an `agents.json`
//! file can add more or override them by name.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const CURRENT_AGENT_REGISTRY_VERSION: u32 = 1;

/// The built-in agents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AgentPreset {
    Claude,
    Gemini,
    Codex,
    OpenCode,
}

impl AgentPreset {
    pub const ALL: [AgentPreset; 4] = [Self::Claude, Self::Gemini, Self::Codex, Self::OpenCode];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::Codex => "codex",
            Self::OpenCode => "opencode",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "claude" => Some(Self::Claude),
            "gemini" => Some(Self::Gemini),
            "codex" => Some(Self::Codex),
            "opencode" => Some(Self::OpenCode),
            _ => None,
        }
    }

    pub fn info(&self) -> AgentPresetInfo {
        match self {
            Self::Claude => AgentPresetInfo {
                name: "claude".to_string(),
                command: "claude".to_string(),
                args: vec!["--dangerously-skip-permissions".to_string()],
                session_id_env: Some("CLAUDE_SESSION_ID".to_string()),
                resume_flag: Some("--resume".to_string()),
                resume_style: ResumeStyle::Flag,
                non_interactive: None,
                autonomous_mode_env: BTreeMap::new(),
            },
            Self::Gemini => AgentPresetInfo {
                name: "gemini".to_string(),
                command: "gemini".to_string(),
                args: vec!["--approval-mode".to_string(), "yolo".to_string()],
                session_id_env: Some("GEMINI_SESSION_ID".to_string()),
                resume_flag: Some("--resume".to_string()),
                resume_style: ResumeStyle::Flag,
                non_interactive: Some(NonInteractive {
                    subcommand: None,
                    prompt_flag: Some("-p".to_string()),
                    output_flag: Some("--output-format json".to_string()),
                }),
                autonomous_mode_env: BTreeMap::new(),
            },
            // Codex reports its session through JSONL output, not the env.
            Self::Codex => AgentPresetInfo {
                name: "codex".to_string(),
                command: "codex".to_string(),
                args: vec!["--yolo".to_string()],
                session_id_env: None,
                resume_flag: Some("resume".to_string()),
                resume_style: ResumeStyle::Subcommand,
                non_interactive: Some(NonInteractive {
                    subcommand: Some("exec".to_string()),
                    prompt_flag: None,
                    output_flag: Some("--json".to_string()),
                }),
                autonomous_mode_env: BTreeMap::new(),
            },
            Self::OpenCode => AgentPresetInfo {
                name: "opencode".to_string(),
                command: "opencode".to_string(),
                args: Vec::new(),
                session_id_env: None,
                resume_flag: Some("--session".to_string()),
                resume_style: ResumeStyle::Flag,
                non_interactive: Some(NonInteractive {
                    subcommand: Some("run".to_string()),
                    prompt_flag: None,
                    output_flag: Some("--format json".to_string()),
                }),
                autonomous_mode_env: BTreeMap::from([(
                    "OPENCODE_PERMISSION".to_string(),
                    r#"{"*":"allow"}"#.to_string(),
                )]),
            },
        }
    }
}

/// Where the session id goes in a resume command.
///
/// - `Flag`: `<command> <args> <resume_flag> <id>`
/// - `Subcommand`: `<command> <resume_flag> <id> <args>`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResumeStyle {
    #[default]
    Flag,
    Subcommand,
}

/// How to run the agent for a single prompt without a TTY.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NonInteractive {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcommand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_flag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_flag: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentPresetInfo {
    #[serde(default)]
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Variable the agent exports its session id through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_flag: Option<String>,
    #[serde(default)]
    pub resume_style: ResumeStyle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_interactive: Option<NonInteractive>,
    /// Extra environment that puts the agent in autonomous mode.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub autonomous_mode_env: BTreeMap<String, String>,
}

/// Names of the built-in presets.
pub fn builtin_agent_names() -> Vec<&'static str> {
    AgentPreset::ALL.iter().map(AgentPreset::as_str).collect()
}

pub fn is_known_preset(name: &str) -> bool {
    AgentPreset::from_str(name).is_some()
}

/// Every known agent, built-ins first merged with user definitions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentRegistry {
    pub version: u32,
    #[serde(default)]
    pub agents: BTreeMap<String, AgentPresetInfo>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl AgentRegistry {
    pub fn builtin() -> Self {
        Self {
            version: CURRENT_AGENT_REGISTRY_VERSION,
            agents: AgentPreset::ALL
                .iter()
                .map(|p| (p.as_str().to_string(), p.info()))
                .collect(),
        }
    }

    /// Built-ins overlaid with the registry file at `path`, if it exists.
    pub fn load(path: &Path) -> Result<Self> {
        let mut registry = Self::builtin();
        if !path.exists() {
            return Ok(registry);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let user: AgentRegistry = serde_json::from_str(&data)
            .with_context(|| format!("Invalid agent registry {}", path.display()))?;
        if user.version > CURRENT_AGENT_REGISTRY_VERSION {
            anyhow::bail!(
                "Agent registry {} has version {}, newest supported is {}",
                path.display(),
                user.version,
                CURRENT_AGENT_REGISTRY_VERSION
            );
        }

        tracing::debug!(
            agents = user.agents.len(),
            "Loaded agent registry from {}",
            path.display()
        );
        registry.merge(user);
        Ok(registry)
    }

    /// User entries replace built-ins of the same name.
    pub fn merge(&mut self, other: AgentRegistry) {
        for (key, mut info) in other.agents {
            if info.name.is_empty() {
                info.name = key.clone();
            }
            self.agents.insert(key, info);
        }
    }

    pub fn get(&self, name: &str) -> Option<&AgentPresetInfo> {
        self.agents.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.agents.keys().map(String::as_str)
    }

    /// Shell command that resumes `session_id`, or `None` when the agent is
    /// unknown, cannot resume, or no session id was given.
    pub fn build_resume_command(&self, agent: &str, session_id: &str) -> Option<String> {
        if session_id.is_empty() {
            return None;
        }
        let info = self.get(agent)?;
        let flag = info.resume_flag.as_deref()?;

        let mut parts = vec![info.command.as_str()];
        match info.resume_style {
            ResumeStyle::Flag => {
                parts.extend(info.args.iter().map(String::as_str));
                parts.extend([flag, session_id]);
            }
            ResumeStyle::Subcommand => {
                parts.extend([flag, session_id]);
                parts.extend(info.args.iter().map(String::as_str));
            }
        }
        Some(parts.join(" "))
    }

    pub fn supports_session_resume(&self, agent: &str) -> bool {
        self.get(agent).is_some_and(|i| i.resume_flag.is_some())
    }

    pub fn session_id_env_var(&self, agent: &str) -> Option<&str> {
        self.get(agent)?.session_id_env.as_deref()
    }

    pub fn autonomous_mode_env(&self, agent: &str) -> Option<&BTreeMap<String, String>> {
        self.get(agent)
            .map(|i| &i.autonomous_mode_env)
            .filter(|env| !env.is_empty())
    }
}

/// Launch settings for one agent, possibly partial.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl RuntimeConfig {
    pub fn from_preset(preset: AgentPreset) -> Self {
        Self::default().merge_with_preset(preset)
    }

    /// Fill unset fields from `preset`. Set fields win.
    pub fn merge_with_preset(&self, preset: AgentPreset) -> Self {
        let info = preset.info();
        let mut env = info.autonomous_mode_env;
        env.extend(self.env.clone());

        Self {
            command: if self.command.is_empty() {
                info.command
            } else {
                self.command.clone()
            },
            args: if self.args.is_empty() {
                info.args
            } else {
                self.args.clone()
            },
            env,
        }
    }
}
