//! File-level ingestion: classifying incoming PDFs and renaming them into
//! the sequential `c##.pdf` / `e##.pdf` scheme.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info};

use crate::error::{CoreError, Result};
use crate::models::{Language, Record};
use crate::storage::RecordStore;

/// Guess the language partition from a filename. Any CJK codepoint in the
/// stem means Chinese; everything else is English.
pub fn detect_language(file_name: &str) -> Language {
    let has_cjk = file_name.chars().any(|c| {
        matches!(c,
            '\u{4e00}'..='\u{9fff}'
                | '\u{3400}'..='\u{4dbf}'
                | '\u{f900}'..='\u{faff}'
        )
    });
    if has_cjk {
        Language::Chinese
    } else {
        Language::English
    }
}

/// List PDF files in a directory, skipping anything already in the
/// `c##.pdf` / `e##.pdf` scheme. Sorted by name for stable ordering.
pub fn scan_pdfs(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(CoreError::ValidationError(format!(
            "not a directory: {}",
            dir.display()
        )));
    }
    let mut pdfs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("pdf")) {
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if is_sequential_name(&name) {
            debug!(%name, "skipping already-renamed file");
            continue;
        }
        pdfs.push(path);
    }
    pdfs.sort();
    Ok(pdfs)
}

/// Whether a filename already follows the sequential scheme.
pub fn is_sequential_name(name: &str) -> bool {
    let Some(rest) = name.strip_prefix(['c', 'e']) else {
        return false;
    };
    let Some(digits) = rest.strip_suffix(".pdf") else {
        return false;
    };
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// Move one PDF into its language folder under the next sequential name and
/// add a skeleton record for it. Metadata extraction happens separately.
pub fn ingest_file<S: RecordStore>(
    store: &mut S,
    dest_dir: &Path,
    source: &Path,
    language: Language,
) -> Result<Record> {
    let original_name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if original_name.is_empty() {
        return Err(CoreError::ValidationError(format!(
            "not a file path: {}",
            source.display()
        )));
    }

    let file_id = store.next_file_id(language);
    let dest = dest_dir.join(&file_id);
    if dest.exists() {
        return Err(CoreError::DuplicateRecord(file_id));
    }

    fs::create_dir_all(dest_dir)?;
    // rename() fails across filesystems; fall back to copy + remove
    if fs::rename(source, &dest).is_err() {
        fs::copy(source, &dest)?;
        fs::remove_file(source)?;
    }

    let mut record = Record::new(&file_id, language);
    record.original_name = original_name;
    store.insert(record.clone())?;
    info!(from = %record.original_name, to = %file_id, "ingested");
    Ok(record)
}

/// Re-register sequential files on disk that have no ledger entry, after a
/// lost or corrupted ledger. Returns the recovered file ids.
pub fn rebuild<S: RecordStore>(
    store: &mut S,
    chinese_dir: &Path,
    english_dir: &Path,
) -> Result<Vec<String>> {
    let mut recovered = Vec::new();
    for (dir, language) in [
        (chinese_dir, Language::Chinese),
        (english_dir, Language::English),
    ] {
        if !dir.is_dir() {
            continue;
        }
        let mut names: Vec<String> = fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|n| is_sequential_name(n) && n.starts_with(language.prefix()))
            .collect();
        names.sort();

        for name in names {
            if store.get(&name).is_some() {
                continue;
            }
            let mut record = Record::new(&name, language);
            record.original_name = name.clone();
            record.added_at = Utc::now();
            store.insert(record)?;
            recovered.push(name);
        }
    }
    Ok(recovered)
}
