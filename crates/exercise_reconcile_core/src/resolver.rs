use serde::Serialize;
use uuid::Uuid;

use crate::canonical_index::CanonicalIndex;
use crate::catalog::{CanonicalExerciseRecord, extract_legacy_numeric_id};
use crate::normalize::normalize_name;
use crate::overrides::{OverrideAction, OverrideTable};
use crate::template::TemplateExerciseReference;

/// The stage that decided a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchMethod {
    Id,
    Override,
    OverrideMedia,
    Name,
    DisplayName,
    MediaFallback,
    NoMatch,
}

impl MatchMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Override => "override",
            Self::OverrideMedia => "override-media",
            Self::Name => "name",
            Self::DisplayName => "display-name",
            Self::MediaFallback => "media-fallback",
            Self::NoMatch => "no-match",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<'a> {
    Matched {
        record: &'a CanonicalExerciseRecord,
        method: MatchMethod,
    },
    Skipped {
        method: MatchMethod,
    },
    Unmatched {
        method: MatchMethod,
    },
}

impl Resolution<'_> {
    pub fn method(&self) -> MatchMethod {
        match self {
            Self::Matched { method, .. } | Self::Skipped { method } | Self::Unmatched { method } => {
                *method
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Uuid,
    Override,
    ExactName,
    DisplayName,
    MediaFallback,
}

/// Stage order; the first stage that produces an outcome wins.
const RESOLUTION_PRECEDENCE: [Stage; 5] = [
    Stage::Uuid,
    Stage::Override,
    Stage::ExactName,
    Stage::DisplayName,
    Stage::MediaFallback,
];

/// Decides one [`Resolution`] per template reference. Holds only borrowed,
/// immutable lookups, so resolving is a pure function of its inputs.
pub struct MatchResolver<'a> {
    index: &'a CanonicalIndex,
    overrides: &'a OverrideTable,
}

impl<'a> MatchResolver<'a> {
    pub fn new(index: &'a CanonicalIndex, overrides: &'a OverrideTable) -> Self {
        Self { index, overrides }
    }

    pub fn resolve(&self, reference: &TemplateExerciseReference) -> Resolution<'a> {
        let normalized_name = normalize_name(&reference.current_name);
        RESOLUTION_PRECEDENCE
            .iter()
            .find_map(|stage| self.run_stage(*stage, reference, &normalized_name))
            .unwrap_or(Resolution::Unmatched {
                method: MatchMethod::NoMatch,
            })
    }

    fn run_stage(
        &self,
        stage: Stage,
        reference: &TemplateExerciseReference,
        normalized_name: &str,
    ) -> Option<Resolution<'a>> {
        match stage {
            Stage::Uuid => {
                let id = reference.current_id.trim();
                Uuid::parse_str(id).ok()?;
                self.index
                    .by_id(id)
                    .map(|record| matched(record, MatchMethod::Id))
            }
            Stage::Override => {
                if normalized_name.is_empty() {
                    return None;
                }
                let action = self.overrides.lookup(normalized_name)?;
                Some(self.apply_override(action, reference))
            }
            Stage::ExactName => {
                if normalized_name.is_empty() {
                    return None;
                }
                self.index
                    .by_name(normalized_name)
                    .map(|record| matched(record, MatchMethod::Name))
            }
            Stage::DisplayName => {
                if normalized_name.is_empty() {
                    return None;
                }
                self.index
                    .by_display_name(normalized_name)
                    .map(|record| matched(record, MatchMethod::DisplayName))
            }
            Stage::MediaFallback => self
                .lookup_media(reference)
                .map(|record| matched(record, MatchMethod::MediaFallback)),
        }
    }

    // An override always decides the outcome; a failed lookup is Unmatched, never
    // a fall-through to the automatic stages.
    fn apply_override(
        &self,
        action: &OverrideAction,
        reference: &TemplateExerciseReference,
    ) -> Resolution<'a> {
        match action {
            OverrideAction::Skip => Resolution::Skipped {
                method: MatchMethod::Override,
            },
            OverrideAction::RenameTo { target } => match self.index.by_name(target) {
                Some(record) => matched(record, MatchMethod::Override),
                None => Resolution::Unmatched {
                    method: MatchMethod::Override,
                },
            },
            OverrideAction::DeriveFromMedia => match self.lookup_media(reference) {
                Some(record) => matched(record, MatchMethod::OverrideMedia),
                None => Resolution::Unmatched {
                    method: MatchMethod::OverrideMedia,
                },
            },
        }
    }

    fn lookup_media(&self, reference: &TemplateExerciseReference) -> Option<&'a CanonicalExerciseRecord> {
        let legacy_id = reference
            .current_media_url
            .as_deref()
            .and_then(extract_legacy_numeric_id)?;
        self.index.by_legacy_numeric_id(legacy_id)
    }
}

fn matched(record: &CanonicalExerciseRecord, method: MatchMethod) -> Resolution<'_> {
    Resolution::Matched { record, method }
}
