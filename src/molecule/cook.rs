//! Formula compilation.
//!
//! Cooking walks the composition graph depth-first. `Extends` bases are
//! resolved first and contribute their steps ahead of the formula's own;
//! `Expand` directives then splice an aspect's steps in after a named target.
//! The walk carries the stack of formulas being resolved, so a formula that
//! reaches itself again through either directive fails instead of looping.

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;

use super::library::FormulaLibrary;
use crate::error::{Error, Result};
use crate::models::*;

/// Compile `name` into a protomolecule.
pub fn cook(library: &FormulaLibrary, name: &str) -> Result<Protomolecule> {
    let formula = library
        .get(name)
        .ok_or_else(|| Error::Template(format!("unknown formula '{}'", name)))?;

    let mut stack = Vec::new();
    let resolved = resolve(library, formula, &mut stack)?;

    let mut seen = HashSet::new();
    for step in &resolved.steps {
        if !seen.insert(step.ref_id.as_str()) {
            return Err(Error::Template(format!(
                "formula '{}' produces duplicate step id '{}'",
                name, step.ref_id
            )));
        }
    }

    let vars = slots(&resolved.steps, &resolved.vars);

    Ok(Protomolecule {
        id: Protomolecule::id_for(name, formula.version),
        formula: formula.name.clone(),
        version: formula.version,
        description: formula.description.clone(),
        steps: resolved.steps,
        vars,
        created_at: Utc::now(),
    })
}

struct Resolved {
    steps: Vec<ProtoStep>,
    vars: BTreeMap<String, VarDef>,
}

fn resolve(library: &FormulaLibrary, formula: &Formula, stack: &mut Vec<String>) -> Result<Resolved> {
    if stack.contains(&formula.name) {
        let mut cycle = stack.clone();
        cycle.push(formula.name.clone());
        return Err(Error::Template(format!(
            "cyclic composition: {}",
            cycle.join(" -> ")
        )));
    }
    stack.push(formula.name.clone());

    let mut steps: Vec<ProtoStep> = Vec::new();
    let mut vars: BTreeMap<String, VarDef> = BTreeMap::new();

    for directive in &formula.compose {
        if let Directive::Extends { base } = directive {
            let base_formula = library.get(base).ok_or_else(|| {
                Error::Template(format!(
                    "formula '{}' extends unknown base '{}'",
                    formula.name, base
                ))
            })?;
            let inherited = resolve(library, base_formula, stack)?;
            steps.extend(inherited.steps);
            vars.extend(inherited.vars);
        }
    }

    for def in &formula.steps {
        let step = ProtoStep {
            ref_id: def.id.clone(),
            title: def.title.clone(),
            description: def.description.clone(),
        };
        match steps.iter_mut().find(|s| s.ref_id == def.id) {
            Some(existing) => *existing = step,
            None => steps.push(step),
        }
    }
    vars.extend(formula.vars.clone());

    for directive in &formula.compose {
        if let Directive::Expand { target, aspect } = directive {
            let aspect_formula = library.get(aspect).ok_or_else(|| {
                Error::Template(format!(
                    "formula '{}' expands unknown aspect '{}'",
                    formula.name, aspect
                ))
            })?;
            let expansion = resolve(library, aspect_formula, stack)?;
            let at = steps
                .iter()
                .position(|s| s.ref_id == *target)
                .ok_or_else(|| {
                    Error::Template(format!(
                        "formula '{}' expands '{}' at unknown step '{}'",
                        formula.name, aspect, target
                    ))
                })?;

            let spliced = expansion.steps.into_iter().map(|s| ProtoStep {
                ref_id: format!("{}.{}", target, s.ref_id),
                ..s
            });
            steps.splice(at + 1..at + 1, spliced);

            for (name, def) in expansion.vars {
                vars.entry(name).or_insert(def);
            }
        }
    }

    stack.pop();
    Ok(Resolved { steps, vars })
}

/// Slots referenced by the steps, in order of first appearance.
fn slots(steps: &[ProtoStep], defs: &BTreeMap<String, VarDef>) -> Vec<VarSlot> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for step in steps {
        for name in placeholders(&step.title)
            .into_iter()
            .chain(placeholders(&step.description))
        {
            if seen.insert(name.clone()) {
                let def = defs.get(&name).cloned().unwrap_or_default();
                out.push(VarSlot {
                    name,
                    description: def.description,
                    default: def.default,
                });
            }
        }
    }
    out
}

/// Names of `{{name}}` placeholders in `text`, in order.
pub fn placeholders(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        let name = after[..end].trim();
        if is_slot_name(name) {
            names.push(name.to_string());
        }
        rest = &after[end + 2..];
    }
    names
}

/// Replace every bound `{{name}}` placeholder in `text`.
pub fn substitute(text: &str, values: &Bindings) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        out.push_str(&rest[..start]);
        let name = after[..end].trim();
        match values.get(name) {
            Some(value) if is_slot_name(name) => out.push_str(value),
            _ => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

fn is_slot_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}
