//! Rule loading: definitions in, one immutable load generation out.
//!
//! A [`RuleSet`] is what the engine swaps in atomically on (re)load. It keeps
//! the priority-ordered rule list and the id registry composite rules resolve
//! their nested ids against, so both always come from the same generation.

use super::{Rule, RuleDefinition, RuleKind};
use crate::error::RuleConfigError;
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Rule id to rule, scoped to one load generation
pub type RuleRegistry = HashMap<i64, Arc<Rule>>;

/// One load generation of rules
#[derive(Debug, Default, Clone)]
pub struct RuleSet {
    /// Ascending priority; ties keep load order
    rules: Vec<Arc<Rule>>,
    registry: RuleRegistry,
    generation: u64,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self::from_shared(rules.into_iter().map(Arc::new).collect())
    }

    pub fn from_shared(mut rules: Vec<Arc<Rule>>) -> Self {
        // sort_by_key is stable
        rules.sort_by_key(|rule| rule.priority);

        let mut registry = RuleRegistry::with_capacity(rules.len());
        for rule in &rules {
            registry.entry(rule.id).or_insert_with(|| rule.clone());
        }

        Self {
            rules,
            registry,
            generation: 0,
        }
    }

    pub(crate) fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// All rules, priority-ordered
    pub fn rules(&self) -> &[Arc<Rule>] {
        &self.rules
    }

    /// Enabled rules, priority-ordered
    pub fn active(&self) -> impl Iterator<Item = &Arc<Rule>> {
        self.rules.iter().filter(|rule| rule.is_enabled())
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn get(&self, rule_id: i64) -> Option<&Arc<Rule>> {
        self.registry.get(&rule_id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Result of building rules from definitions
#[derive(Debug, Default)]
pub struct LoadReport {
    pub rules: Vec<Rule>,
    /// Rejected definitions with the reason
    pub rejected: Vec<(i64, RuleConfigError)>,
}

/// Builds validated rules from definitions
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleLoader;

impl RuleLoader {
    pub fn new() -> Self {
        Self
    }

    /// Build every definition that validates.
    ///
    /// Invalid definitions, duplicate ids or names (first valid one wins) and
    /// composite rules on a reference cycle are rejected and logged; the rest
    /// load normally.
    pub fn load_definitions(&self, definitions: &[RuleDefinition]) -> LoadReport {
        let mut report = LoadReport::default();
        let mut seen_ids = HashSet::new();
        let mut seen_names = HashSet::new();

        for def in definitions {
            if seen_ids.contains(&def.id) {
                report.rejected.push((def.id, RuleConfigError::DuplicateId(def.id)));
                continue;
            }
            if seen_names.contains(&def.name) {
                report
                    .rejected
                    .push((def.id, RuleConfigError::DuplicateName(def.name.clone())));
                continue;
            }

            // Only a rule that builds claims its id and name
            match Rule::from_definition(def) {
                Ok(rule) => {
                    seen_ids.insert(def.id);
                    seen_names.insert(def.name.clone());
                    info!(rule = %rule, "Loaded rule");
                    report.rules.push(rule);
                }
                Err(e) => report.rejected.push((def.id, e)),
            }
        }

        let cyclic = composite_cycle_members(&report.rules);
        if !cyclic.is_empty() {
            report.rules.retain(|rule| !cyclic.contains(&rule.id));
            let mut ids: Vec<i64> = cyclic.into_iter().collect();
            ids.sort_unstable();
            report
                .rejected
                .extend(ids.into_iter().map(|id| (id, RuleConfigError::CompositeCycle(id))));
        }

        for (rule_id, reason) in &report.rejected {
            error!(rule_id = rule_id, error = %reason, "Rejected rule definition");
        }

        info!(
            loaded = report.rules.len(),
            rejected = report.rejected.len(),
            "Rule definitions processed"
        );

        report
    }

    /// Read a JSON array of rule definitions from a file
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<LoadReport> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rules file {}", path.display()))?;
        let definitions: Vec<RuleDefinition> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse rules file {}", path.display()))?;

        if definitions.is_empty() {
            warn!(path = %path.display(), "Rules file contains no definitions");
        }

        Ok(self.load_definitions(&definitions))
    }
}

/// Ids of composite rules that can reach themselves through nested references
fn composite_cycle_members(rules: &[Rule]) -> HashSet<i64> {
    let edges: HashMap<i64, &[i64]> = rules
        .iter()
        .filter_map(|rule| match &rule.kind {
            RuleKind::Composite(composite) => Some((rule.id, composite.rule_ids.as_slice())),
            _ => None,
        })
        .collect();

    edges
        .keys()
        .copied()
        .filter(|&start| {
            let mut stack: Vec<i64> = edges[&start].to_vec();
            let mut visited = HashSet::new();
            while let Some(id) = stack.pop() {
                if id == start {
                    return true;
                }
                if !visited.insert(id) {
                    continue;
                }
                if let Some(children) = edges.get(&id) {
                    stack.extend_from_slice(children);
                }
            }
            false
        })
        .collect()
}
