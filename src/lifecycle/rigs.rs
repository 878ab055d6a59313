use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use super::RigRegistry;

#[derive(Debug, Deserialize)]
struct RigsFile {
    #[serde(default)]
    rigs: BTreeMap<String, serde_json::Value>,
}

/// Rigs registered in `<town>/mayor/rigs.json`.
#[derive(Debug, Clone)]
pub struct TownRigs {
    path: PathBuf,
}

impl TownRigs {
    pub fn new(town_root: &Path) -> Self {
        Self {
            path: town_root.join("mayor").join("rigs.json"),
        }
    }
}

impl RigRegistry for TownRigs {
    /// Rig names sorted. A town without a registry has no rigs.
    fn active_rigs(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            tracing::debug!("No rig registry at {}", self.path.display());
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let file: RigsFile = serde_json::from_str(&data)
            .with_context(|| format!("Invalid rig registry {}", self.path.display()))?;
        Ok(file.rigs.into_keys().collect())
    }
}
