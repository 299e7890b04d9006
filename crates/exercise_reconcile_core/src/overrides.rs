use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::canonical_index::CanonicalIndex;
use crate::normalize::normalize_name;

const EMBEDDED_OVERRIDES: &str = include_str!("../../../config/default-overrides.toml");

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum OverrideAction {
    /// Resolve through the catalog name index using `target` instead of the entry name.
    RenameTo { target: String },
    /// No catalog equivalent exists; the entry is left alone and not reported unmatched.
    Skip,
    /// Trust the legacy numeric id in the entry's current media URL over its name.
    DeriveFromMedia,
}

impl OverrideAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RenameTo { .. } => "rename",
            Self::Skip => "skip",
            Self::DeriveFromMedia => "derive-from-media",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverrideRule {
    pub name: String,
    pub action: OverrideAction,
}

/// Hand-maintained exceptions keyed by normalized exercise name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideTable {
    rules: BTreeMap<String, OverrideRule>,
}

#[derive(Debug, Deserialize)]
struct OverrideFile {
    #[serde(default, rename = "rule")]
    rules: Vec<RawOverrideRule>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOverrideRule {
    name: String,
    action: String,
    target: Option<String>,
}

impl OverrideTable {
    pub fn from_rules(rules: impl IntoIterator<Item = OverrideRule>) -> Result<Self> {
        let mut table = Self::default();
        for rule in rules {
            table.insert(rule)?;
        }
        Ok(table)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let parsed: OverrideFile = toml::from_str(content).context("failed to parse override rules")?;
        let mut table = Self::default();
        for (position, raw) in parsed.rules.into_iter().enumerate() {
            let rule = raw
                .into_rule()
                .with_context(|| format!("invalid override rule #{}", position + 1))?;
            table.insert(rule)?;
        }
        Ok(table)
    }

    pub fn embedded_default() -> Result<Self> {
        Self::from_toml_str(EMBEDDED_OVERRIDES).context("embedded override table is invalid")
    }

    /// Load overrides from `path`, or the embedded table when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Self::embedded_default();
        };
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("failed to load {}", path.display()))
    }

    pub fn lookup(&self, normalized_name: &str) -> Option<&OverrideAction> {
        self.rules.get(normalized_name).map(|rule| &rule.action)
    }

    pub fn rules(&self) -> impl Iterator<Item = (&str, &OverrideRule)> {
        self.rules.iter().map(|(key, rule)| (key.as_str(), rule))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rename rules whose target is missing from the catalog name index.
    pub fn stale_rename_targets(&self, index: &CanonicalIndex) -> Vec<String> {
        self.rules
            .values()
            .filter_map(|rule| match &rule.action {
                OverrideAction::RenameTo { target } if index.by_name(target).is_none() => {
                    Some(format!("{} -> {target}", rule.name))
                }
                _ => None,
            })
            .collect()
    }

    fn insert(&mut self, rule: OverrideRule) -> Result<()> {
        let key = normalize_name(&rule.name);
        if key.is_empty() {
            bail!("override rule name cannot be empty: {:?}", rule.name);
        }
        if let OverrideAction::RenameTo { target } = &rule.action
            && normalize_name(target).is_empty()
        {
            bail!("override rule `{}` has an empty rename target", rule.name);
        }
        if let Some(existing) = self.rules.get(&key) {
            bail!(
                "override rules `{}` and `{}` both normalize to `{key}`",
                existing.name,
                rule.name
            );
        }
        self.rules.insert(key, rule);
        Ok(())
    }
}

impl RawOverrideRule {
    fn into_rule(self) -> Result<OverrideRule> {
        let action = match self.action.trim() {
            "rename" => {
                let Some(target) = self.target else {
                    bail!("`rename` rule `{}` requires a target", self.name);
                };
                OverrideAction::RenameTo { target }
            }
            "skip" | "derive-from-media" if self.target.is_some() => {
                bail!(
                    "`{}` rule `{}` does not take a target",
                    self.action.trim(),
                    self.name
                );
            }
            "skip" => OverrideAction::Skip,
            "derive-from-media" => OverrideAction::DeriveFromMedia,
            other => bail!("unknown override action `{other}` for `{}`", self.name),
        };
        Ok(OverrideRule {
            name: self.name,
            action,
        })
    }
}

pub fn embedded_overrides() -> &'static str {
    EMBEDDED_OVERRIDES
}
