use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Language partition a paper belongs to. Determines the rename prefix
/// (`c01.pdf` / `e01.pdf`) and which side of a pairing a record can sit on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Chinese,
    English,
}

impl Language {
    /// Filename prefix used by the sequential rename scheme.
    pub fn prefix(self) -> char {
        match self {
            Language::Chinese => 'c',
            Language::English => 'e',
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Language::Chinese => "chinese",
            Language::English => "english",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// How a record's metadata was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    #[default]
    Heuristic,
    Llm,
    Manual,
}

/// Pairing information written back onto an English record once a match is
/// confirmed. Chinese records never carry a forward pointer; the ledger
/// stores pairings in one direction only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pairing {
    pub chinese_file: String,
    pub confidence: u8,
}

/// One PDF's bibliographic metadata as stored in the ledger.
///
/// `file_id` is the renamed filename (`c01.pdf`, `e07.pdf`) and is unique
/// within the record's language partition. Empty strings mean "unknown";
/// the matcher treats missing fields as contributing nothing, never as a
/// mismatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub file_id: String,
    pub original_name: String,
    pub language: Language,
    pub title: String,
    pub authors: String,
    pub journal: String,
    pub year: String,
    pub doi: String,
    #[serde(default)]
    pub keywords: String,
    pub added_at: DateTime<Utc>,
    #[serde(default)]
    pub extraction: ExtractionMethod,
    #[serde(default)]
    pub extraction_confidence: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairing: Option<Pairing>,
}

impl Record {
    pub fn new(file_id: impl Into<String>, language: Language) -> Self {
        Self {
            file_id: file_id.into(),
            original_name: String::new(),
            language,
            title: String::new(),
            authors: String::new(),
            journal: String::new(),
            year: String::new(),
            doi: String::new(),
            keywords: String::new(),
            added_at: Utc::now(),
            extraction: ExtractionMethod::default(),
            extraction_confidence: 0,
            pairing: None,
        }
    }

    /// Number of authors in the `;`-delimited author string.
    pub fn author_count(&self) -> usize {
        self.authors
            .split(';')
            .filter(|part| !part.trim().is_empty())
            .count()
    }
}

/// Partial update applied to a record via `fix` — `None` fields are left
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    pub title: Option<String>,
    pub authors: Option<String>,
    pub journal: Option<String>,
    pub year: Option<String>,
    pub doi: Option<String>,
    pub keywords: Option<String>,
}

impl RecordPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.authors.is_none()
            && self.journal.is_none()
            && self.year.is_none()
            && self.doi.is_none()
            && self.keywords.is_none()
    }

    pub fn apply(&self, record: &mut Record) {
        if let Some(title) = &self.title {
            record.title = title.clone();
        }
        if let Some(authors) = &self.authors {
            record.authors = authors.clone();
        }
        if let Some(journal) = &self.journal {
            record.journal = journal.clone();
        }
        if let Some(year) = &self.year {
            record.year = year.clone();
        }
        if let Some(doi) = &self.doi {
            record.doi = doi.clone();
        }
        if let Some(keywords) = &self.keywords {
            record.keywords = keywords.clone();
        }
        if !self.is_empty() {
            record.extraction = ExtractionMethod::Manual;
        }
    }
}
