use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A declarative workflow template.
///
/// Formulas are authored as `<name>.formula.json` files. Step text may carry
/// `{{var}}` placeholders which stay as named slots until a protomolecule is
/// instantiated.
///
/// ```json
/// {
///   "name": "shiny",
///   "version": 1,
///   "vars": { "feature": { "description": "What to build" } },
///   "steps": [
///     { "id": "design", "title": "Design {{feature}}" },
///     { "id": "implement", "title": "Implement {{feature}}" }
///   ],
///   "compose": [
///     { "kind": "expand", "target": "implement", "aspect": "review-gate" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Formula {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub description: Option<String>,
    /// Declared variables. Undeclared placeholders are still slots, just
    /// without a default.
    #[serde(default)]
    pub vars: BTreeMap<String, VarDef>,
    #[serde(default)]
    pub steps: Vec<StepDef>,
    /// Composition directives. `Extends` bases contribute their steps ahead
    /// of this formula's own; `Expand` directives are applied afterwards, in
    /// order.
    #[serde(default)]
    pub compose: Vec<Directive>,
}

fn default_version() -> u32 {
    1
}

/// One step definition inside a formula.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepDef {
    /// Formula-scoped step id. A step with the same id as one inherited from
    /// a base formula replaces it in place.
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VarDef {
    #[serde(default)]
    pub description: Option<String>,
    /// Value used when instantiation supplies no binding.
    #[serde(default)]
    pub default: Option<String>,
}

/// Composition directive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Directive {
    /// Inherit every step of `base` ahead of this formula's own steps.
    Extends { base: String },
    /// Splice the steps of the `aspect` formula in directly after `target`.
    Expand { target: String, aspect: String },
}
