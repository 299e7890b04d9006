use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result, bail};

use crate::planner::Correction;
use crate::template::{FieldSlot, NULL_SENTINEL};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Edit {
    range: Range<usize>,
    expected: String,
    replacement: String,
    line: usize,
}

/// Produce the corrected document from `source` and every planned correction.
///
/// All edits are validated against `source` before any text is assembled: each
/// span must still hold the text seen at parse time and no two spans may
/// overlap. Text outside the spans is copied through unchanged.
pub fn apply_corrections(source: &str, corrections: &[Correction]) -> Result<String> {
    let mut edits = Vec::new();
    for correction in corrections {
        for change in &correction.changes {
            edits.push(edit_for(&change.slot, &change.new, correction.line));
        }
    }
    edits.sort_by_key(|edit| edit.range.start);

    let mut cursor = 0usize;
    for edit in &edits {
        if edit.range.start < cursor {
            bail!(
                "overlapping edits near line {}; refusing to patch the document",
                edit.line
            );
        }
        match source.get(edit.range.clone()) {
            Some(current) if current == edit.expected => {}
            _ => bail!(
                "document text at line {} no longer matches the parsed entry",
                edit.line
            ),
        }
        cursor = edit.range.end;
    }

    let mut output = String::with_capacity(source.len() + 64 * edits.len());
    let mut cursor = 0usize;
    for edit in &edits {
        output.push_str(&source[cursor..edit.range.start]);
        output.push_str(&edit.replacement);
        cursor = edit.range.end;
    }
    output.push_str(&source[cursor..]);
    Ok(output)
}

fn edit_for(slot: &FieldSlot, value: &str, line: usize) -> Edit {
    match slot {
        FieldSlot::Literal { range, raw, quote } => Edit {
            range: range.clone(),
            expected: raw.clone(),
            replacement: quote_value(value, *quote),
            line,
        },
        FieldSlot::Null { range, quote } => Edit {
            range: range.clone(),
            expected: NULL_SENTINEL.to_string(),
            replacement: quote_value(value, *quote),
            line,
        },
        FieldSlot::Absent {
            insert_at,
            key,
            key_quote,
            quote,
        } => {
            let key = match key_quote {
                Some(key_quote) => quote_value(key, *key_quote),
                None => key.clone(),
            };
            Edit {
                range: *insert_at..*insert_at,
                expected: String::new(),
                replacement: format!(", {key}: {}", quote_value(value, *quote)),
                line,
            }
        }
    }
}

pub fn quote_value(value: &str, quote: char) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push(quote);
    for ch in value.chars() {
        match ch {
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            '$' if quote == '`' => quoted.push_str("\\$"),
            _ if ch == quote => {
                quoted.push('\\');
                quoted.push(ch);
            }
            _ => quoted.push(ch),
        }
    }
    quoted.push(quote);
    quoted
}

/// Replace `path` with `content` in one step: write a sibling temp file, then
/// rename it over the original. On failure the original is untouched.
///
/// A symlinked document is replaced at its target, so the link survives. The
/// replacement keeps the original file's permissions.
pub fn write_document_atomically(path: &Path, content: &str) -> Result<()> {
    let target = match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_symlink() => fs::canonicalize(path)
            .with_context(|| format!("failed to resolve symlink {}", path.display()))?,
        _ => path.to_path_buf(),
    };
    let permissions = fs::metadata(&target).ok().map(|metadata| metadata.permissions());

    let parent = target
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let temp_path = temp_sibling(&target, parent);

    fs::write(&temp_path, content)
        .with_context(|| format!("failed to write {}", temp_path.display()))?;
    let replaced = match permissions {
        Some(permissions) => fs::set_permissions(&temp_path, permissions)
            .with_context(|| format!("failed to copy permissions to {}", temp_path.display())),
        None => Ok(()),
    }
    .and_then(|()| {
        fs::rename(&temp_path, &target)
            .with_context(|| format!("failed to replace {}", target.display()))
    });
    if replaced.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    replaced
}

fn temp_sibling(path: &Path, parent: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());
    parent.join(format!(".{file_name}.{}.tmp", process::id()))
}
