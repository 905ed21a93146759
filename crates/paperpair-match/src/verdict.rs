//! Structured verdicts and the parser chain that digs them out of
//! free-text model responses.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Outcome of one semantic comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub is_same_paper: bool,
    /// Always within 0..=100.
    pub confidence: u8,
    #[serde(default)]
    pub evidence: BTreeMap<String, String>,
    #[serde(default)]
    pub conclusion: String,
}

impl Verdict {
    /// Conservative verdict used when the service failed or its response
    /// carried no parseable structure. Derived from the feature score
    /// alone, so only already-strong pairs survive the degradation.
    pub fn fallback(feature_score: f64) -> Self {
        let confidence = (feature_score.clamp(0.0, 1.0) * 100.0).round() as u8;
        Self {
            is_same_paper: feature_score > 0.5,
            confidence,
            evidence: BTreeMap::new(),
            conclusion: "fallback from feature score; model response unusable".to_string(),
        }
    }

    /// Negative verdict from the enhanced prescreen, no API call made.
    pub fn prescreen_reject(quick_score: f64) -> Self {
        Self {
            is_same_paper: false,
            confidence: (quick_score.clamp(0.0, 1.0) * 100.0).round() as u8,
            evidence: BTreeMap::new(),
            conclusion: "rejected by local prescreen".to_string(),
        }
    }
}

/// Raw shape the model is asked to produce. Tolerates a numeric confidence
/// outside 0..=100 and missing optional fields.
#[derive(Debug, Deserialize)]
struct RawVerdict {
    is_same_paper: bool,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    evidence: BTreeMap<String, String>,
    #[serde(default)]
    conclusion: String,
}

impl From<RawVerdict> for Verdict {
    fn from(raw: RawVerdict) -> Self {
        Self {
            is_same_paper: raw.is_same_paper,
            confidence: raw.confidence.clamp(0.0, 100.0).round() as u8,
            evidence: raw.evidence,
            conclusion: raw.conclusion,
        }
    }
}

/// Pull a JSON object out of a free-text response. Tries, in order: the
/// whole content, a ```json fenced block, the outermost brace span.
pub fn extract_json(content: &str) -> Option<serde_json::Value> {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return Some(value);
    }

    if let Some(block) = fenced_json_block(trimmed) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(block) {
            return Some(value);
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end > start {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&trimmed[start..=end]) {
            return Some(value);
        }
    }
    None
}

fn fenced_json_block(content: &str) -> Option<&str> {
    let after = content.split_once("```json").map(|(_, rest)| rest)?;
    let block = after.split_once("```").map(|(block, _)| block)?;
    Some(block.trim())
}

/// Parse a verdict from a model response, or `None` when no stage yields
/// a usable object.
pub fn parse_verdict(content: &str) -> Option<Verdict> {
    let value = extract_json(content)?;
    let raw: RawVerdict = serde_json::from_value(value).ok()?;
    Some(raw.into())
}
