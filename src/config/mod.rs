//! Runtime configuration.
//!
//! Town settings come from the environment. Agent runtime presets are a
//! separate lookup table, see [`agents`].

pub mod agents;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::lifecycle::DEFAULT_GRACE;
use crate::molecule::WorkflowConfig;

pub const ENV_TOWN_ROOT: &str = "GT_TOWN_ROOT";
pub const ENV_NUKE_ACKNOWLEDGED: &str = "GT_NUKE_ACKNOWLEDGED";
pub const ENV_SHUTDOWN_GRACE_MS: &str = "GT_SHUTDOWN_GRACE_MS";
pub const ENV_AUTO_CONTINUE: &str = "GT_AUTO_CONTINUE";
pub const ENV_DB_PATH: &str = "GT_DB_PATH";

/// Settings for one `gt` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TownConfig {
    /// Explicit workspace root; otherwise discovered from the cwd.
    pub town_root: Option<PathBuf>,
    pub nuke_acknowledged: bool,
    /// Pause between interrupt and destroy.
    pub shutdown_grace: Duration,
    pub workflow: WorkflowConfig,
    pub db_path: Option<PathBuf>,
}

impl Default for TownConfig {
    fn default() -> Self {
        Self {
            town_root: None,
            nuke_acknowledged: false,
            shutdown_grace: DEFAULT_GRACE,
            workflow: WorkflowConfig::default(),
            db_path: None,
        }
    }
}

impl TownConfig {
    pub fn from_env() -> Self {
        Self::from_vars(&std::env::vars().collect())
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let get = |key: &str| vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        let shutdown_grace = match get(ENV_SHUTDOWN_GRACE_MS).map(|v| (v, v.parse::<u64>())) {
            Some((_, Ok(ms))) => Duration::from_millis(ms),
            Some((raw, Err(_))) => {
                tracing::warn!("Ignoring invalid {}={:?}", ENV_SHUTDOWN_GRACE_MS, raw);
                DEFAULT_GRACE
            }
            None => DEFAULT_GRACE,
        };

        Self {
            town_root: get(ENV_TOWN_ROOT).map(PathBuf::from),
            nuke_acknowledged: get(ENV_NUKE_ACKNOWLEDGED).is_some(),
            shutdown_grace,
            workflow: WorkflowConfig {
                auto_continue: get(ENV_AUTO_CONTINUE).is_some_and(is_truthy),
            },
            db_path: get(ENV_DB_PATH).map(PathBuf::from),
        }
    }

    /// Where the durable store lives for a town.
    pub fn database_path(&self, town_root: &Path) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| town_root.join(".gastown").join("town.db"))
    }
}

pub fn formulas_dir(town_root: &Path) -> PathBuf {
    town_root.join("formulas")
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
