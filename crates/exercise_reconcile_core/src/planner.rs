use serde::Serialize;

use crate::catalog::CanonicalExerciseRecord;
use crate::resolver::{MatchMethod, Resolution};
use crate::template::{FieldSlot, TemplateExerciseReference};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionField {
    Id,
    MediaUrl,
    ThumbnailUrl,
}

impl CorrectionField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::MediaUrl => "media_url",
            Self::ThumbnailUrl => "thumbnail_url",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field: CorrectionField,
    pub old: Option<String>,
    pub new: String,
    pub slot: FieldSlot,
}

/// Field-level edits for one matched reference. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correction {
    pub ordinal: usize,
    pub line: usize,
    pub method: MatchMethod,
    pub changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOutcome {
    AlreadyCorrect { method: MatchMethod },
    Corrected(Correction),
    Skipped { method: MatchMethod },
    Unmatched { method: MatchMethod },
}

pub fn plan_correction(reference: &TemplateExerciseReference, resolution: &Resolution<'_>) -> PlanOutcome {
    match resolution {
        Resolution::Skipped { method } => PlanOutcome::Skipped { method: *method },
        Resolution::Unmatched { method } => PlanOutcome::Unmatched { method: *method },
        Resolution::Matched { record, method } => {
            let changes = field_changes(reference, record);
            if changes.is_empty() {
                PlanOutcome::AlreadyCorrect { method: *method }
            } else {
                PlanOutcome::Corrected(Correction {
                    ordinal: reference.ordinal,
                    line: reference.line,
                    method: *method,
                    changes,
                })
            }
        }
    }
}

fn field_changes(reference: &TemplateExerciseReference, record: &CanonicalExerciseRecord) -> Vec<FieldChange> {
    let span = &reference.source_span;
    let mut changes = Vec::new();

    if reference.current_id != record.id {
        changes.push(FieldChange {
            field: CorrectionField::Id,
            old: Some(reference.current_id.clone()),
            new: record.id.clone(),
            slot: span.id.clone(),
        });
    }
    if let Some(change) = media_change(
        CorrectionField::MediaUrl,
        reference.current_media_url.as_deref(),
        record.media_url.as_deref(),
        &span.media_url,
    ) {
        changes.push(change);
    }
    if let Some(change) = media_change(
        CorrectionField::ThumbnailUrl,
        reference.current_thumbnail_url.as_deref(),
        record.thumbnail_url.as_deref(),
        &span.thumbnail_url,
    ) {
        changes.push(change);
    }

    changes
}

// An empty canonical value never overwrites the stored one, whatever it holds.
fn media_change(
    field: CorrectionField,
    current: Option<&str>,
    canonical: Option<&str>,
    slot: &FieldSlot,
) -> Option<FieldChange> {
    let canonical = canonical.filter(|value| !value.trim().is_empty())?;
    if current == Some(canonical) {
        return None;
    }
    Some(FieldChange {
        field,
        old: current.map(ToString::to_string),
        new: canonical.to_string(),
        slot: slot.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::{CorrectionField, PlanOutcome, plan_correction};
    use crate::catalog::CanonicalExerciseRecord;
    use crate::resolver::tests::{SQUAT_ID, reference};
    use crate::resolver::{MatchMethod, Resolution};

    fn squat(media: Option<&str>, thumb: Option<&str>) -> CanonicalExerciseRecord {
        CanonicalExerciseRecord::new(SQUAT_ID, "barbell full squat", None, media, thumb)
    }

    #[test]
    fn skipped_and_unmatched_produce_no_correction() {
        let input = reference("preset-40", "Ankle Circles", None);
        assert_eq!(
            plan_correction(&input, &Resolution::Skipped { method: MatchMethod::Override }),
            PlanOutcome::Skipped { method: MatchMethod::Override }
        );
        assert_eq!(
            plan_correction(&input, &Resolution::Unmatched { method: MatchMethod::NoMatch }),
            PlanOutcome::Unmatched { method: MatchMethod::NoMatch }
        );
    }

    #[test]
    fn matching_fields_are_already_correct() {
        let record = squat(Some("https://cdn.example.org/0100.mp4"), None);
        let mut input = reference(SQUAT_ID, "Squat", Some("https://cdn.example.org/0100.mp4"));
        input.current_thumbnail_url = Some("https://old.example.org/thumb.jpg".to_string());
        let outcome = plan_correction(
            &input,
            &Resolution::Matched {
                record: &record,
                method: MatchMethod::Id,
            },
        );
        assert_eq!(outcome, PlanOutcome::AlreadyCorrect { method: MatchMethod::Id });
    }

    #[test]
    fn changed_id_and_missing_media_are_corrected() {
        let record = CanonicalExerciseRecord::new(
            "X",
            "barbell glute bridge",
            None,
            Some("https://cdn.example.org/media/0042.mp4"),
            None,
        );
        let input = reference("preset-12", "Hip Thrust", None);
        let PlanOutcome::Corrected(correction) = plan_correction(
            &input,
            &Resolution::Matched {
                record: &record,
                method: MatchMethod::Override,
            },
        ) else {
            panic!("expected a correction");
        };

        assert_eq!(correction.method, MatchMethod::Override);
        let summary: Vec<_> = correction
            .changes
            .iter()
            .map(|change| (change.field, change.old.as_deref(), change.new.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (CorrectionField::Id, Some("preset-12"), "X"),
                (
                    CorrectionField::MediaUrl,
                    None,
                    "https://cdn.example.org/media/0042.mp4"
                ),
            ]
        );
    }

    #[test]
    fn empty_canonical_media_never_regresses_stored_media() {
        let record = squat(None, None);
        let mut input = reference(SQUAT_ID, "Squat", Some("https://old-cdn.example.org/0100.gif"));
        input.current_thumbnail_url = Some("https://old-cdn.example.org/0100.jpg".to_string());
        let outcome = plan_correction(
            &input,
            &Resolution::Matched {
                record: &record,
                method: MatchMethod::Id,
            },
        );
        assert_eq!(outcome, PlanOutcome::AlreadyCorrect { method: MatchMethod::Id });
    }

    #[test]
    fn differing_non_empty_media_is_overwritten() {
        let record = squat(
            Some("https://cdn.example.org/0100.mp4"),
            Some("https://cdn.example.org/0100.jpg"),
        );
        let mut input = reference(SQUAT_ID, "Squat", Some("https://old-cdn.example.org/0100.gif"));
        input.current_thumbnail_url = Some(String::new());
        let PlanOutcome::Corrected(correction) = plan_correction(
            &input,
            &Resolution::Matched {
                record: &record,
                method: MatchMethod::Id,
            },
        ) else {
            panic!("expected a correction");
        };
        let fields: Vec<_> = correction.changes.iter().map(|change| change.field).collect();
        assert_eq!(
            fields,
            vec![CorrectionField::MediaUrl, CorrectionField::ThumbnailUrl]
        );
        assert_eq!(correction.changes[1].old.as_deref(), Some(""));
    }
}
