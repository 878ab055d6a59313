//! Formula lookup.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};

use crate::models::Formula;

const FORMULA_SUFFIX: &str = ".formula.json";

/// The set of formulas available for cooking, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct FormulaLibrary {
    formulas: BTreeMap<String, Formula>,
}

impl FormulaLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.formula.json` file in `dir`. A missing directory yields
    /// an empty library.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut library = Self::new();
        if !dir.is_dir() {
            tracing::debug!("No formula directory at {}", dir.display());
            return Ok(library);
        }

        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read formula directory {}", dir.display()))?
        {
            let path = entry?.path();
            let is_formula = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(FORMULA_SUFFIX));
            if !is_formula {
                continue;
            }

            let data = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let formula: Formula = serde_json::from_str(&data)
                .with_context(|| format!("Invalid formula {}", path.display()))?;
            tracing::debug!("Loaded formula {} from {}", formula.name, path.display());
            library.insert(formula);
        }

        Ok(library)
    }

    /// Add or replace a formula.
    pub fn insert(&mut self, formula: Formula) {
        self.formulas.insert(formula.name.clone(), formula);
    }

    pub fn get(&self, name: &str) -> Option<&Formula> {
        self.formulas.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.formulas.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.formulas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formulas.is_empty()
    }
}
