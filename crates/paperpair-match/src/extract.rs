//! Bibliographic metadata extraction: regex heuristics over first-pages
//! text, with an optional LLM-assisted path that falls back to the
//! heuristics on any failure.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use paperpair_core::{ExtractionMethod, Record};

use crate::error::{MatchError, Result};
use crate::llm::JudgmentService;
use crate::prompts;
use crate::verdict::extract_json;

/// Confidence assigned to purely heuristic extraction.
const HEURISTIC_CONFIDENCE: u8 = 30;
/// Confidence assumed when the model omits one.
const DEFAULT_LLM_CONFIDENCE: u8 = 50;
const MAX_ABSTRACT_CHARS: usize = 200;

static DOI_LABELED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bdoi[\s:：]*\s*(10\.\d{4,}/[-._;()/:A-Za-z0-9]+)").unwrap()
});
static DOI_BARE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b10\.\d{4,}/[-._;()/:A-Za-z0-9]+").unwrap());
static DOI_EXACT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^10\.\d{4,}/[-._;()/:A-Za-z0-9]+$").unwrap());
static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:19|20)\d{2}").unwrap());
static YEAR_EXACT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:19|20)\d{2}$").unwrap());
static JOURNAL_CN: Lazy<Regex> = Lazy::new(|| Regex::new(r"《([^》]+)》").unwrap());
static JOURNAL_EN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b((?:international\s+|chinese\s+|european\s+)?journal\s+of\s+[a-z][a-z\s&]{3,60})").unwrap()
});
static KEYWORDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:keywords|关键词)[：:\s]+([^\n]+)").unwrap());

/// Opaque PDF text collaborator. The pipeline only needs text; how it is
/// pulled out of the file is this trait's business.
pub trait PdfTextSource {
    /// Text of the first `max_pages` pages.
    fn read_text(&self, path: &Path, max_pages: usize) -> Result<String>;
}

/// Default collaborator backed by `lopdf`.
#[derive(Debug, Default)]
pub struct LopdfSource;

impl PdfTextSource for LopdfSource {
    fn read_text(&self, path: &Path, max_pages: usize) -> Result<String> {
        let doc = lopdf::Document::load(path)
            .map_err(|e| MatchError::PdfExtraction(format!("{}: {e}", path.display())))?;
        let pages: Vec<u32> = doc.get_pages().keys().copied().take(max_pages).collect();
        if pages.is_empty() {
            return Err(MatchError::PdfExtraction(format!(
                "{}: no pages",
                path.display()
            )));
        }
        doc.extract_text(&pages)
            .map_err(|e| MatchError::PdfExtraction(format!("{}: {e}", path.display())))
    }
}

/// Fields pulled out of a paper's front matter. Empty strings mean "not
/// found".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractedMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub title_en: String,
    #[serde(default)]
    pub authors: String,
    #[serde(default)]
    pub journal: String,
    #[serde(default)]
    pub year: String,
    #[serde(default)]
    pub doi: String,
    #[serde(default)]
    pub keywords: String,
    #[serde(default, rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub confidence: f64,
}

impl ExtractedMetadata {
    /// Copy extracted fields onto a ledger record.
    pub fn apply_to(&self, record: &mut Record, method: ExtractionMethod, confidence: u8) {
        if !self.title.is_empty() {
            record.title = self.title.clone();
        }
        if !self.authors.is_empty() {
            record.authors = self.authors.clone();
        }
        if !self.journal.is_empty() {
            record.journal = self.journal.clone();
        }
        if !self.year.is_empty() {
            record.year = self.year.clone();
        }
        if !self.doi.is_empty() {
            record.doi = self.doi.clone();
        }
        if !self.keywords.is_empty() {
            record.keywords = self.keywords.clone();
        }
        record.extraction = method;
        record.extraction_confidence = confidence;
    }
}

/// Pattern-based extraction over raw text. Never fails; what isn't found
/// stays empty.
pub fn extract_heuristic(text: &str) -> ExtractedMetadata {
    let mut meta = ExtractedMetadata {
        confidence: HEURISTIC_CONFIDENCE as f64,
        ..Default::default()
    };

    if let Some(cap) = DOI_LABELED.captures(text) {
        meta.doi = cap[1].trim_end_matches(['.', ';', ',']).to_string();
    } else if let Some(m) = DOI_BARE.find(text) {
        meta.doi = m.as_str().trim_end_matches(['.', ';', ',']).to_string();
    }

    if let Some(year) = find_year(text) {
        meta.year = year;
    }

    if let Some(cap) = JOURNAL_CN.captures(text) {
        meta.journal = cap[1].trim().to_string();
    } else if let Some(cap) = JOURNAL_EN.captures(text) {
        meta.journal = cap[1].split_whitespace().collect::<Vec<_>>().join(" ");
    }

    if let Some(cap) = KEYWORDS.captures(text) {
        meta.keywords = cap[1].trim().to_string();
    }

    meta.title = guess_title(text);
    meta
}

/// First four-digit year not embedded in a longer number. A word-boundary
/// regex misses `2016年` since CJK ideographs count as word characters.
fn find_year(text: &str) -> Option<String> {
    for m in YEAR.find_iter(text) {
        let before_ok = text[..m.start()]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_ascii_digit());
        let after_ok = text[m.end()..]
            .chars()
            .next()
            .is_none_or(|c| !c.is_ascii_digit());
        if before_ok && after_ok {
            return Some(m.as_str().to_string());
        }
    }
    None
}

/// First plausible title line: within the first 10 lines, longer than 20
/// chars, not starting with a digit.
fn guess_title(text: &str) -> String {
    for line in text.lines().take(10) {
        let line = line.trim();
        if line.chars().count() > 20 && !line.starts_with(|c: char| c.is_ascii_digit()) {
            return line.to_string();
        }
    }
    String::new()
}

/// LLM-assisted extraction. The caller should fall back to
/// [`extract_heuristic`] on `Err`.
pub async fn extract_with_llm(
    service: &dyn JudgmentService,
    text: &str,
    max_chars: usize,
) -> Result<ExtractedMetadata> {
    let prompt = prompts::extract_prompt(text, max_chars);
    let reply = service.judge(&prompt).await?;
    let value = extract_json(&reply)
        .ok_or_else(|| MatchError::Parse("no JSON object in extraction reply".to_string()))?;
    let mut meta: ExtractedMetadata = serde_json::from_value(value)?;
    validate(&mut meta);
    Ok(meta)
}

/// Sanity-check model output: drop malformed years and DOIs, clamp the
/// confidence, bound the abstract.
fn validate(meta: &mut ExtractedMetadata) {
    meta.year = meta.year.trim().to_string();
    if !meta.year.is_empty() && !YEAR_EXACT.is_match(&meta.year) {
        warn!(year = %meta.year, "discarding implausible year");
        meta.year.clear();
    }

    meta.doi = meta.doi.trim().to_string();
    if !meta.doi.is_empty() && !DOI_EXACT.is_match(&meta.doi) {
        warn!(doi = %meta.doi, "discarding implausible DOI");
        meta.doi.clear();
    }

    if meta.confidence == 0.0 {
        meta.confidence = DEFAULT_LLM_CONFIDENCE as f64;
    }
    meta.confidence = meta.confidence.clamp(0.0, 100.0);

    meta.abstract_text = prompts::truncate_chars(&meta.abstract_text, MAX_ABSTRACT_CHARS).to_string();
}

/// Full extraction for one PDF: LLM path when enabled, heuristics as the
/// fallback and default.
pub async fn extract_metadata(
    service: Option<&dyn JudgmentService>,
    source: &dyn PdfTextSource,
    path: &Path,
    max_pages: usize,
    max_chars: usize,
) -> Result<(ExtractedMetadata, ExtractionMethod)> {
    let text = source.read_text(path, max_pages)?;

    if let Some(service) = service {
        match extract_with_llm(service, &text, max_chars).await {
            Ok(meta) => return Ok((meta, ExtractionMethod::Llm)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "LLM extraction failed, using heuristics");
            }
        }
    }
    Ok((extract_heuristic(&text), ExtractionMethod::Heuristic))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::error::Result as MatchResult;

    const ENGLISH_SAMPLE: &str = "\
Deep Residual Learning for Image Recognition in the Wild
Kaiming He, Xiangyu Zhang

International Journal of Computer Vision, 2016
doi: 10.1007/s11263-015-0816-y.
Keywords: residual learning; image recognition; deep networks
";

    const CHINESE_SAMPLE: &str = "\
基于深度残差网络的野外图像识别方法研究与系统实现
何凯明 张翔宇
《计算机学报》 2016年
关键词：残差学习；图像识别
";

    #[test]
    fn heuristics_extract_english_front_matter() {
        let meta = extract_heuristic(ENGLISH_SAMPLE);
        assert_eq!(
            meta.title,
            "Deep Residual Learning for Image Recognition in the Wild"
        );
        assert_eq!(meta.doi, "10.1007/s11263-015-0816-y");
        assert_eq!(meta.year, "2016");
        assert!(meta.journal.starts_with("Journal of Computer Vision")
            || meta.journal.starts_with("International Journal of Computer Vision"));
        assert_eq!(
            meta.keywords,
            "residual learning; image recognition; deep networks"
        );
        assert_eq!(meta.confidence, 30.0);
    }

    #[test]
    fn heuristics_extract_chinese_front_matter() {
        let meta = extract_heuristic(CHINESE_SAMPLE);
        assert_eq!(meta.journal, "计算机学报");
        assert_eq!(meta.year, "2016");
        assert_eq!(meta.keywords, "残差学习；图像识别");
        assert!(meta.title.contains("野外图像识别"));
    }

    #[test]
    fn year_detection_handles_cjk_neighbors_and_embedded_digits() {
        assert_eq!(find_year("发表于2016年").as_deref(), Some("2016"));
        assert_eq!(find_year("order 120161 code"), None);
        assert_eq!(find_year("no year here"), None);
    }

    #[test]
    fn title_guess_skips_short_and_digit_led_lines() {
        let text = "2016 conference\nshort line\nA Sufficiently Long Paper Title Line\nrest";
        assert_eq!(guess_title(text), "A Sufficiently Long Paper Title Line");
        assert_eq!(guess_title("only\nshort\nlines"), "");
    }

    struct FixedReply(String);

    #[async_trait]
    impl JudgmentService for FixedReply {
        async fn judge(&self, _prompt: &str) -> MatchResult<String> {
            Ok(self.0.clone())
        }
        async fn translate(&self, _t: &str) -> MatchResult<String> {
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn llm_extraction_validates_fields() {
        let reply = serde_json::json!({
            "title": "某论文",
            "authors": "张三;李四",
            "year": "20xx",
            "doi": "not-a-doi",
            "abstract": "段".repeat(500),
            "confidence": 250,
        })
        .to_string();
        let service = FixedReply(format!("```json\n{reply}\n```"));

        let meta = extract_with_llm(&service, "text", 8000).await.unwrap();
        assert_eq!(meta.year, "");
        assert_eq!(meta.doi, "");
        assert_eq!(meta.confidence, 100.0);
        assert_eq!(meta.abstract_text.chars().count(), 200);
        assert_eq!(meta.authors, "张三;李四");
    }

    #[tokio::test]
    async fn llm_extraction_defaults_missing_confidence() {
        let service = FixedReply(r#"{"title": "T", "year": "2021"}"#.to_string());
        let meta = extract_with_llm(&service, "text", 8000).await.unwrap();
        assert_eq!(meta.confidence, 50.0);
        assert_eq!(meta.year, "2021");
    }

    #[tokio::test]
    async fn unparseable_llm_reply_is_an_error() {
        let service = FixedReply("I could not find any metadata".to_string());
        assert!(extract_with_llm(&service, "text", 8000).await.is_err());
    }

    #[test]
    fn apply_to_record_sets_method_and_confidence() {
        let mut record = Record::new("e01.pdf", paperpair_core::Language::English);
        record.title = "old".to_string();
        let meta = ExtractedMetadata {
            title: "New Title".to_string(),
            year: "2019".to_string(),
            ..Default::default()
        };
        meta.apply_to(&mut record, ExtractionMethod::Llm, 72);
        assert_eq!(record.title, "New Title");
        assert_eq!(record.year, "2019");
        assert_eq!(record.extraction, ExtractionMethod::Llm);
        assert_eq!(record.extraction_confidence, 72);
    }
}
