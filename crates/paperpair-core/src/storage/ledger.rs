use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CoreError, Result};
use crate::models::{Language, Pairing, Record, RecordPatch};
use crate::storage::RecordStore;

/// On-disk shape of the ledger: two partitions, one per language.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LedgerDoc {
    #[serde(default)]
    chinese: Vec<Record>,
    #[serde(default)]
    english: Vec<Record>,
}

/// JSON-file-backed record store. The whole ledger is one file
/// (`records.json` under the library root) and is rewritten on every save.
#[derive(Debug)]
pub struct JsonLedger {
    path: PathBuf,
    doc: LedgerDoc,
}

impl JsonLedger {
    /// Open a ledger, creating an empty one if the file doesn't exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let doc = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            LedgerDoc::default()
        };
        Ok(Self { path, doc })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.doc.chinese.len() + self.doc.english.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc.chinese.is_empty() && self.doc.english.is_empty()
    }

    fn partition(&self, language: Language) -> &Vec<Record> {
        match language {
            Language::Chinese => &self.doc.chinese,
            Language::English => &self.doc.english,
        }
    }

    fn partition_mut(&mut self, language: Language) -> &mut Vec<Record> {
        match language {
            Language::Chinese => &mut self.doc.chinese,
            Language::English => &mut self.doc.english,
        }
    }

    fn get_mut(&mut self, file_id: &str) -> Option<&mut Record> {
        self.doc
            .chinese
            .iter_mut()
            .chain(self.doc.english.iter_mut())
            .find(|r| r.file_id == file_id)
    }

    /// Drop records whose PDF no longer exists in its language folder.
    /// Pairings pointing at a removed Chinese file are cleared too.
    /// Returns the removed file ids.
    pub fn prune_missing(&mut self, chinese_dir: &Path, english_dir: &Path) -> Vec<String> {
        let mut removed = Vec::new();
        for (part, dir) in [
            (&mut self.doc.chinese, chinese_dir),
            (&mut self.doc.english, english_dir),
        ] {
            part.retain(|r| {
                if dir.join(&r.file_id).exists() {
                    true
                } else {
                    removed.push(r.file_id.clone());
                    false
                }
            });
        }
        for record in &mut self.doc.english {
            if let Some(p) = &record.pairing {
                if removed.contains(&p.chinese_file) {
                    warn!(file = %record.file_id, "clearing pairing to pruned file");
                    record.pairing = None;
                }
            }
        }
        removed
    }
}

impl RecordStore for JsonLedger {
    fn records(&self, language: Language) -> &[Record] {
        self.partition(language)
    }

    fn get(&self, file_id: &str) -> Option<&Record> {
        self.doc
            .chinese
            .iter()
            .chain(self.doc.english.iter())
            .find(|r| r.file_id == file_id)
    }

    fn insert(&mut self, record: Record) -> Result<()> {
        if self.get(&record.file_id).is_some() {
            return Err(CoreError::DuplicateRecord(record.file_id));
        }
        self.partition_mut(record.language).push(record);
        Ok(())
    }

    fn update(&mut self, file_id: &str, patch: &RecordPatch) -> Result<()> {
        let record = self
            .get_mut(file_id)
            .ok_or_else(|| CoreError::RecordNotFound(file_id.to_string()))?;
        patch.apply(record);
        Ok(())
    }

    fn replace(&mut self, record: Record) -> Result<()> {
        let part = self.partition_mut(record.language);
        let slot = part
            .iter_mut()
            .find(|r| r.file_id == record.file_id)
            .ok_or_else(|| CoreError::RecordNotFound(record.file_id.clone()))?;
        *slot = record;
        Ok(())
    }

    fn remove(&mut self, file_id: &str) -> Result<Record> {
        for part in [&mut self.doc.chinese, &mut self.doc.english] {
            if let Some(pos) = part.iter().position(|r| r.file_id == file_id) {
                return Ok(part.remove(pos));
            }
        }
        Err(CoreError::RecordNotFound(file_id.to_string()))
    }

    fn set_pairing(
        &mut self,
        english_file: &str,
        chinese_file: &str,
        confidence: u8,
    ) -> Result<()> {
        if !self
            .doc
            .chinese
            .iter()
            .any(|r| r.file_id == chinese_file)
        {
            return Err(CoreError::RecordNotFound(chinese_file.to_string()));
        }
        let record = self
            .doc
            .english
            .iter_mut()
            .find(|r| r.file_id == english_file)
            .ok_or_else(|| CoreError::RecordNotFound(english_file.to_string()))?;
        record.pairing = Some(Pairing {
            chinese_file: chinese_file.to_string(),
            confidence,
        });
        Ok(())
    }

    fn clear_pairings(&mut self) -> usize {
        let mut cleared = 0;
        for record in &mut self.doc.english {
            if record.pairing.take().is_some() {
                cleared += 1;
            }
        }
        cleared
    }

    fn next_file_id(&self, language: Language) -> String {
        let prefix = language.prefix();
        let max = self
            .partition(language)
            .iter()
            .filter_map(|r| {
                r.file_id
                    .strip_prefix(prefix)?
                    .strip_suffix(".pdf")?
                    .parse::<u32>()
                    .ok()
            })
            .max()
            .unwrap_or(0);
        format!("{prefix}{:02}.pdf", max + 1)
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.doc)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}
