use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use similar::TextDiff;
use tracing::{debug, info, warn};

use crate::canonical_index::{CanonicalIndex, IndexCollision};
use crate::catalog::{CatalogReadApi, DEFAULT_PAGE_SIZE, fetch_all_records};
use crate::overrides::OverrideTable;
use crate::patch::{apply_corrections, write_document_atomically};
use crate::planner::{Correction, CorrectionField, PlanOutcome, plan_correction};
use crate::resolver::{MatchMethod, MatchResolver};
use crate::template::{ParseIssue, TemplateExerciseReference, TemplateFieldKeys, parse_template_document};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Preview,
    Apply,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preview => "preview",
            Self::Apply => "apply",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub mode: RunMode,
    pub document_path: PathBuf,
    pub page_size: usize,
    pub keys: TemplateFieldKeys,
    pub include_diff: bool,
}

impl ReconcileOptions {
    pub fn new(mode: RunMode, document_path: PathBuf) -> Self {
        Self {
            mode,
            document_path,
            page_size: DEFAULT_PAGE_SIZE,
            keys: TemplateFieldKeys::default(),
            include_diff: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySummary {
    pub ordinal: usize,
    pub line: usize,
    pub id: String,
    pub name: String,
    pub method: MatchMethod,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChangeSummary {
    pub field: CorrectionField,
    pub old: Option<String>,
    pub new: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorrectedEntry {
    #[serde(flatten)]
    pub entry: EntrySummary,
    pub changes: Vec<FieldChangeSummary>,
}

/// Outcome of reconciling one document against an already-built index.
#[derive(Debug, Clone, Default)]
pub struct DocumentPlan {
    pub entries_parsed: usize,
    pub already_correct: Vec<EntrySummary>,
    pub corrected: Vec<CorrectedEntry>,
    pub skipped: Vec<EntrySummary>,
    pub unmatched: Vec<EntrySummary>,
    pub parse_warnings: Vec<ParseIssue>,
    pub corrections: Vec<Correction>,
    pub patched: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub mode: RunMode,
    pub document_path: String,
    pub canonical_records: usize,
    pub request_count: usize,
    pub entries_parsed: usize,
    pub already_correct: Vec<EntrySummary>,
    pub corrected: Vec<CorrectedEntry>,
    pub skipped: Vec<EntrySummary>,
    pub unmatched: Vec<EntrySummary>,
    pub parse_warnings: Vec<ParseIssue>,
    pub index_collisions: Vec<IndexCollision>,
    pub stale_overrides: Vec<String>,
    pub wrote_document: bool,
    pub document_hash_before: String,
    pub document_hash_after: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

impl RunReport {
    pub fn has_unmatched(&self) -> bool {
        !self.unmatched.is_empty()
    }
}

/// Resolve, plan and patch every entry of `source`. Pure: nothing is read or written.
pub fn reconcile_document(
    source: &str,
    index: &CanonicalIndex,
    overrides: &OverrideTable,
    keys: &TemplateFieldKeys,
) -> Result<DocumentPlan> {
    let parsed = parse_template_document(source, keys)?;
    let resolver = MatchResolver::new(index, overrides);

    let mut plan = DocumentPlan {
        entries_parsed: parsed.references.len(),
        parse_warnings: parsed.issues,
        ..DocumentPlan::default()
    };

    for reference in &parsed.references {
        let resolution = resolver.resolve(reference);
        debug!(
            line = reference.line,
            id = %reference.current_id,
            method = resolution.method().as_str(),
            "resolved entry"
        );
        match plan_correction(reference, &resolution) {
            PlanOutcome::AlreadyCorrect { method } => {
                plan.already_correct.push(summarize(reference, method));
            }
            PlanOutcome::Corrected(correction) => {
                plan.corrected.push(CorrectedEntry {
                    entry: summarize(reference, correction.method),
                    changes: correction
                        .changes
                        .iter()
                        .map(|change| FieldChangeSummary {
                            field: change.field,
                            old: change.old.clone(),
                            new: change.new.clone(),
                        })
                        .collect(),
                });
                plan.corrections.push(correction);
            }
            PlanOutcome::Skipped { method } => plan.skipped.push(summarize(reference, method)),
            PlanOutcome::Unmatched { method } => plan.unmatched.push(summarize(reference, method)),
        }
    }

    plan.patched = apply_corrections(source, &plan.corrections)?;
    Ok(plan)
}

/// Fetch the catalog, then reconcile the document at `options.document_path`.
///
/// The document is only read after the whole catalog has been fetched, so a
/// fetch failure never touches it. In apply mode the corrected text replaces
/// the document in one atomic write; nothing is written when no entry changed.
pub fn run_reconciliation<A: CatalogReadApi>(
    api: &mut A,
    overrides: &OverrideTable,
    options: &ReconcileOptions,
) -> Result<RunReport> {
    let records = fetch_all_records(api, options.page_size).context("catalog fetch failed")?;
    let canonical_records = records.len();
    let index = CanonicalIndex::build(records);
    for collision in index.collisions() {
        warn!(
            index = collision.index.as_str(),
            key = %collision.key,
            kept = %collision.kept_id,
            discarded = %collision.discarded_id,
            "canonical index collision"
        );
    }
    let stale_overrides = overrides.stale_rename_targets(&index);
    for stale in &stale_overrides {
        warn!(rule = %stale, "override rename target is not in the catalog");
    }

    let path = &options.document_path;
    let source =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let plan = reconcile_document(&source, &index, overrides, &options.keys)
        .with_context(|| format!("failed to reconcile {}", path.display()))?;
    for issue in &plan.parse_warnings {
        warn!(line = issue.line, "skipped entry: {}", issue.message);
    }

    let wrote_document = options.mode == RunMode::Apply && !plan.corrections.is_empty();
    if wrote_document {
        write_document_atomically(path, &plan.patched)?;
        info!(
            path = %path.display(),
            corrections = plan.corrections.len(),
            "wrote corrected document"
        );
    }

    let diff = (options.include_diff && plan.patched != source).then(|| {
        let label = path.display().to_string();
        TextDiff::from_lines(source.as_str(), plan.patched.as_str())
            .unified_diff()
            .context_radius(2)
            .header(&label, &label)
            .to_string()
    });

    Ok(RunReport {
        mode: options.mode,
        document_path: path.to_string_lossy().replace('\\', "/"),
        canonical_records,
        request_count: api.request_count(),
        entries_parsed: plan.entries_parsed,
        document_hash_before: compute_hash(&source),
        document_hash_after: compute_hash(&plan.patched),
        already_correct: plan.already_correct,
        corrected: plan.corrected,
        skipped: plan.skipped,
        unmatched: plan.unmatched,
        parse_warnings: plan.parse_warnings,
        index_collisions: index.collisions().to_vec(),
        stale_overrides,
        wrote_document,
        diff,
    })
}

fn summarize(reference: &TemplateExerciseReference, method: MatchMethod) -> EntrySummary {
    EntrySummary {
        ordinal: reference.ordinal,
        line: reference.line,
        id: reference.current_id.clone(),
        name: reference.current_name.clone(),
        method,
    }
}

fn compute_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut output = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{ReconcileOptions, RunMode, reconcile_document, run_reconciliation};
    use crate::canonical_index::CanonicalIndex;
    use crate::catalog::CanonicalExerciseRecord;
    use crate::catalog::tests::MockCatalog;
    use crate::overrides::{OverrideAction, OverrideRule, OverrideTable};
    use crate::planner::CorrectionField;
    use crate::resolver::MatchMethod;
    use crate::resolver::tests::SQUAT_ID;
    use crate::template::TemplateFieldKeys;

    const DOCUMENT: &str = r#"export const WORKOUT_TEMPLATES = [
  {
    title: "Lower Body",
    exercises: [
      { exerciseId: "preset-12", name: "Hip Thrust", mediaUrl: null, sets: 4 },
      {
        exerciseId: "0b9b6d1e-58d4-4a38-9b0e-8f4f1f3f2a11",
        name: "Barbell Full Squat",
        mediaUrl: "https://cdn.example.org/media/0100.mp4",
      },
      { exerciseId: "preset-40", name: "Ankle Circles" },
      { exerciseId: "preset-41", name: "Jumping Jacks", mediaUrl: null },
      { exerciseId: WARMUP_ID, name: "Arm Swings" },
    ],
  },
];
"#;

    fn catalog_records() -> Vec<CanonicalExerciseRecord> {
        vec![
            CanonicalExerciseRecord::new(
                SQUAT_ID,
                "barbell full squat",
                None,
                Some("https://cdn.example.org/media/0100.mp4"),
                None,
            ),
            CanonicalExerciseRecord::new(
                "X",
                "barbell glute bridge",
                None,
                Some("https://cdn.example.org/media/0042.mp4"),
                None,
            ),
            CanonicalExerciseRecord::new(
                "Y",
                "hip thrust",
                None,
                Some("https://cdn.example.org/media/0043.mp4"),
                None,
            ),
        ]
    }

    fn overrides() -> OverrideTable {
        OverrideTable::from_rules([
            OverrideRule {
                name: "Hip Thrust".to_string(),
                action: OverrideAction::RenameTo {
                    target: "barbell glute bridge".to_string(),
                },
            },
            OverrideRule {
                name: "Ankle Circles".to_string(),
                action: OverrideAction::Skip,
            },
            OverrideRule {
                name: "Face Pulls".to_string(),
                action: OverrideAction::RenameTo {
                    target: "cable rear delt row (with rope)".to_string(),
                },
            },
        ])
        .expect("override table")
    }

    fn write_document(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("templates.ts");
        fs::write(&path, content).expect("write document");
        (temp, path)
    }

    #[test]
    fn preview_reports_every_outcome_and_writes_nothing() {
        let (_temp, path) = write_document(DOCUMENT);
        let mut api = MockCatalog::with_records(catalog_records());
        let mut options = ReconcileOptions::new(RunMode::Preview, path.clone());
        options.include_diff = true;

        let report = run_reconciliation(&mut api, &overrides(), &options).expect("run");

        assert_eq!(report.canonical_records, 3);
        assert_eq!(report.request_count, 1);
        assert_eq!(report.entries_parsed, 4);
        assert!(!report.wrote_document);
        assert_eq!(fs::read_to_string(&path).expect("read"), DOCUMENT);
        assert_ne!(report.document_hash_before, report.document_hash_after);

        // Scenario A
        assert_eq!(report.corrected.len(), 1);
        let hip = &report.corrected[0];
        assert_eq!(hip.entry.method, MatchMethod::Override);
        let changes: Vec<_> = hip
            .changes
            .iter()
            .map(|change| (change.field, change.old.as_deref(), change.new.as_str()))
            .collect();
        assert_eq!(
            changes,
            vec![
                (CorrectionField::Id, Some("preset-12"), "X"),
                (
                    CorrectionField::MediaUrl,
                    None,
                    "https://cdn.example.org/media/0042.mp4"
                ),
            ]
        );

        // Scenario B
        assert_eq!(report.already_correct.len(), 1);
        assert_eq!(report.already_correct[0].id, SQUAT_ID);
        assert_eq!(report.already_correct[0].method, MatchMethod::Id);

        // Scenario C
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].name, "Ankle Circles");
        assert!(report.unmatched.iter().all(|entry| entry.name != "Ankle Circles"));

        assert_eq!(report.unmatched.len(), 1);
        assert_eq!(report.unmatched[0].name, "Jumping Jacks");
        assert_eq!(report.unmatched[0].method, MatchMethod::NoMatch);

        assert_eq!(report.parse_warnings.len(), 1);
        assert_eq!(report.parse_warnings[0].line, 13);

        assert_eq!(
            report.stale_overrides,
            vec!["Face Pulls -> cable rear delt row (with rope)".to_string()]
        );
        let diff = report.diff.as_deref().expect("diff");
        assert!(diff.contains("-      { exerciseId: \"preset-12\""));
        assert!(diff.contains("+      { exerciseId: \"X\""));
    }

    #[test]
    fn apply_rewrites_only_matched_fields_and_reaches_a_fixed_point() {
        let (_temp, path) = write_document(DOCUMENT);
        let options = ReconcileOptions::new(RunMode::Apply, path.clone());

        let mut api = MockCatalog::with_records(catalog_records());
        let first = run_reconciliation(&mut api, &overrides(), &options).expect("first apply");
        assert!(first.wrote_document);
        let corrected = fs::read_to_string(&path).expect("read");
        assert_eq!(
            corrected,
            DOCUMENT.replace(
                r#"{ exerciseId: "preset-12", name: "Hip Thrust", mediaUrl: null, sets: 4 }"#,
                r#"{ exerciseId: "X", name: "Hip Thrust", mediaUrl: "https://cdn.example.org/media/0042.mp4", sets: 4 }"#,
            )
        );
        assert_eq!(first.document_hash_after, super::compute_hash(&corrected));

        let mut api = MockCatalog::with_records(catalog_records());
        let second = run_reconciliation(&mut api, &overrides(), &options).expect("second apply");
        assert!(second.corrected.is_empty());
        assert!(!second.wrote_document);
        assert_eq!(second.document_hash_before, second.document_hash_after);
        assert_eq!(fs::read_to_string(&path).expect("read"), corrected);
        assert_eq!(second.already_correct.len(), 2);
    }

    #[test]
    fn fetch_failure_aborts_before_reading_the_document() {
        let temp = tempdir().expect("tempdir");
        let missing = temp.path().join("does-not-exist.ts");
        let mut api = MockCatalog::with_records(catalog_records());
        api.fail_at_offset = Some(0);
        let options = ReconcileOptions::new(RunMode::Apply, missing);

        let error = run_reconciliation(&mut api, &overrides(), &options).expect_err("must fail");
        let message = format!("{error:#}");
        assert!(message.contains("catalog fetch failed"));
        assert!(!message.contains("failed to read"));
    }

    #[test]
    fn structurally_broken_document_is_left_untouched() {
        let broken = "[{ exerciseId: \"preset-12\", name: \"Hip Thrust\" ";
        let (_temp, path) = write_document(broken);
        let mut api = MockCatalog::with_records(catalog_records());
        let options = ReconcileOptions::new(RunMode::Apply, path.clone());

        assert!(run_reconciliation(&mut api, &overrides(), &options).is_err());
        assert_eq!(fs::read_to_string(&path).expect("read"), broken);
    }

    #[test]
    fn never_regresses_stored_media_when_catalog_media_is_empty() {
        let source = r#"[{ exerciseId: "0b9b6d1e-58d4-4a38-9b0e-8f4f1f3f2a11", name: "Squat", mediaUrl: "https://old.example.org/0100.gif" }]"#;
        let index = CanonicalIndex::build(vec![CanonicalExerciseRecord::new(
            SQUAT_ID,
            "barbell full squat",
            None,
            None,
            None,
        )]);
        let plan = reconcile_document(
            source,
            &index,
            &OverrideTable::default(),
            &TemplateFieldKeys::default(),
        )
        .expect("reconcile");
        assert!(plan.corrections.is_empty());
        assert_eq!(plan.already_correct.len(), 1);
        assert_eq!(plan.patched, source);
    }

    #[test]
    fn index_collisions_are_reported() {
        let (_temp, path) = write_document("[]");
        let mut records = catalog_records();
        records.push(CanonicalExerciseRecord::new("W", "Hip Thrust", None, None, None));
        let mut api = MockCatalog::with_records(records);
        let options = ReconcileOptions::new(RunMode::Preview, path);

        let report = run_reconciliation(&mut api, &overrides(), &options).expect("run");
        assert_eq!(report.entries_parsed, 0);
        assert_eq!(report.index_collisions.len(), 1);
        assert_eq!(report.index_collisions[0].kept_id, "Y");
        assert_eq!(report.index_collisions[0].discarded_id, "W");
    }

    #[test]
    fn report_serializes_to_json() {
        let (_temp, path) = write_document(DOCUMENT);
        let mut api = MockCatalog::with_records(catalog_records());
        let options = ReconcileOptions::new(RunMode::Preview, path);
        let report = run_reconciliation(&mut api, &overrides(), &options).expect("run");

        let value = serde_json::to_value(&report).expect("json");
        assert_eq!(value["mode"], "preview");
        assert_eq!(value["corrected"][0]["method"], "override");
        assert_eq!(value["corrected"][0]["changes"][0]["field"], "id");
        assert_eq!(value["skipped"][0]["name"], "Ankle Circles");
        assert!(value.get("diff").is_none());
    }
}
