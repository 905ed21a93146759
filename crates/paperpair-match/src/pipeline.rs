//! Pipeline driver and final aggregation: admit candidates, verify them,
//! keep affirmative verdicts, re-sort by confidence, and optionally write
//! pairings back onto the ledger.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info};

use paperpair_core::config::{MatchingConfig, RetryConfig};
use paperpair_core::{Record, RecordStore};

use crate::error::Result;
use crate::llm::JudgmentService;
use crate::score::filter_candidates;
use crate::verdict::Verdict;
use crate::verifier::SemanticVerifier;

/// One retained pair. The same record may appear in several outcomes; the
/// aggregator deliberately does not impose uniqueness.
#[derive(Debug, Clone, Serialize)]
pub struct MatchOutcome {
    pub chinese_file: String,
    pub english_file: String,
    pub feature_score: f64,
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translated_title: Option<String>,
}

/// Run the full semantic pipeline. Verifier calls are strictly sequential;
/// per-candidate failures degrade to fallback verdicts and the batch always
/// completes. `excerpts` maps file ids to first-page text for the enhanced
/// prompt; missing entries are fine.
pub async fn run_semantic(
    service: &dyn JudgmentService,
    retry: RetryConfig,
    matching: &MatchingConfig,
    chinese: &[Record],
    english: &[Record],
    excerpts: &HashMap<String, String>,
) -> Vec<MatchOutcome> {
    let candidates = filter_candidates(chinese, english, matching.admission_threshold);
    info!(
        candidates = candidates.len(),
        enhanced = matching.enhanced,
        "admitted candidates for verification"
    );

    let verifier = SemanticVerifier::new(service, retry);
    let mut outcomes = Vec::new();
    for candidate in candidates {
        let c = &chinese[candidate.chinese_idx];
        let e = &english[candidate.english_idx];

        let (verdict, translated) = if matching.enhanced {
            let empty = String::new();
            let c_excerpt = excerpts.get(&c.file_id).unwrap_or(&empty);
            let e_excerpt = excerpts.get(&e.file_id).unwrap_or(&empty);
            let (verdict, translated) = verifier
                .verify_enhanced(c, e, c_excerpt, e_excerpt, candidate.score)
                .await;
            (verdict, Some(translated))
        } else {
            (verifier.verify(c, e, candidate.score).await, None)
        };

        debug!(
            chinese = %c.file_id,
            english = %e.file_id,
            same = verdict.is_same_paper,
            confidence = verdict.confidence,
            "verified"
        );
        if verdict.is_same_paper {
            outcomes.push(MatchOutcome {
                chinese_file: c.file_id.clone(),
                english_file: e.file_id.clone(),
                feature_score: candidate.score,
                verdict,
                translated_title: translated,
            });
        }
    }

    sort_by_confidence(&mut outcomes);
    outcomes
}

/// Feature-only mode: no service calls; keep candidates at or above the
/// final threshold and synthesize a verdict from the raw score.
pub fn run_feature_only(
    matching: &MatchingConfig,
    chinese: &[Record],
    english: &[Record],
) -> Vec<MatchOutcome> {
    let candidates = filter_candidates(chinese, english, matching.admission_threshold);
    let mut outcomes = Vec::new();
    for candidate in candidates {
        if candidate.score < matching.final_threshold {
            continue;
        }
        let c = &chinese[candidate.chinese_idx];
        let e = &english[candidate.english_idx];
        let mut verdict = Verdict {
            is_same_paper: true,
            confidence: (candidate.score.clamp(0.0, 1.0) * 100.0).round() as u8,
            evidence: Default::default(),
            conclusion: "accepted on feature score alone".to_string(),
        };
        verdict
            .evidence
            .insert("feature_score".to_string(), format!("{:.3}", candidate.score));
        outcomes.push(MatchOutcome {
            chinese_file: c.file_id.clone(),
            english_file: e.file_id.clone(),
            feature_score: candidate.score,
            verdict,
            translated_title: None,
        });
    }

    sort_by_confidence(&mut outcomes);
    outcomes
}

fn sort_by_confidence(outcomes: &mut [MatchOutcome]) {
    outcomes.sort_by(|a, b| {
        b.verdict
            .confidence
            .cmp(&a.verdict.confidence)
            .then_with(|| {
                b.feature_score
                    .partial_cmp(&a.feature_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    });
}

/// Write pairings onto the English records. Outcomes are assumed sorted by
/// confidence; when several outcomes name the same English file only the
/// first (strongest) one is written. Returns how many pairings were set.
pub fn apply_outcomes<S: RecordStore>(store: &mut S, outcomes: &[MatchOutcome]) -> Result<usize> {
    let mut written: Vec<&str> = Vec::new();
    for outcome in outcomes {
        if written.contains(&outcome.english_file.as_str()) {
            continue;
        }
        store.set_pairing(
            &outcome.english_file,
            &outcome.chinese_file,
            outcome.verdict.confidence,
        )?;
        written.push(&outcome.english_file);
    }
    Ok(written.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use paperpair_core::storage::ledger::JsonLedger;
    use paperpair_core::Language;
    use tempfile::TempDir;

    use crate::error::Result as MatchResult;

    /// Service that always answers with the same canned response.
    struct CannedService(String);

    #[async_trait]
    impl JudgmentService for CannedService {
        async fn judge(&self, _prompt: &str) -> MatchResult<String> {
            Ok(self.0.clone())
        }
        async fn translate(&self, _t: &str) -> MatchResult<String> {
            Ok(String::new())
        }
    }

    fn retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 1,
            initial_delay_ms: 1,
            exponential: false,
        }
    }

    fn matching() -> MatchingConfig {
        MatchingConfig::default()
    }

    /// Pair with year+DOI agreement (score ≈ 0.885).
    fn strong_pair(n: u32) -> (Record, Record) {
        let mut c = Record::new(format!("c{n:02}.pdf"), Language::Chinese);
        c.title = "一二三四五六七八九十口口口口".to_string();
        c.authors = "Li Ming;Wang Hua".to_string();
        c.year = "2020".to_string();
        c.doi = format!("10.1000/x{n}");
        let mut e = Record::new(format!("e{n:02}.pdf"), Language::English);
        e.title = "abcdefghijklmnopqrstuvwxyz!".to_string();
        e.authors = "Li Ming;Wang Hua;Chen Lei".to_string();
        e.year = "2020".to_string();
        e.doi = format!("10.1000/x{n}");
        (c, e)
    }

    /// Pair that clears admission but not 0.5 (year + title ratio ≈ 0.32).
    fn weak_pair(n: u32) -> (Record, Record) {
        let mut c = Record::new(format!("c{n:02}.pdf"), Language::Chinese);
        c.title = "短标题短标".to_string();
        c.year = "1987".to_string();
        let mut e = Record::new(format!("e{n:02}.pdf"), Language::English);
        e.title = "a much longer title here".to_string();
        e.year = "1987".to_string();
        (c, e)
    }

    #[tokio::test]
    async fn unparseable_responses_keep_only_strong_pairs() {
        let (c1, e1) = strong_pair(1);
        let (c2, e2) = weak_pair(2);

        let service = CannedService("no structure here at all".to_string());
        let outcomes = run_semantic(
            &service,
            retry(),
            &matching(),
            &[c1, c2],
            &[e1, e2],
            &HashMap::new(),
        )
        .await;

        // the weak pair degrades to a negative fallback and is excluded;
        // the strong pair survives via the fallback
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].chinese_file, "c01.pdf");
        assert_eq!(outcomes[0].english_file, "e01.pdf");
    }

    #[tokio::test]
    async fn affirmative_verdicts_sorted_by_confidence() {
        let (c1, e1) = strong_pair(1);
        let (c2, e2) = strong_pair(2);

        let service =
            CannedService(r#"{"is_same_paper": true, "confidence": 88}"#.to_string());
        let outcomes = run_semantic(
            &service,
            retry(),
            &matching(),
            &[c1, c2],
            &[e1, e2],
            &HashMap::new(),
        )
        .await;

        // cross pairs have differing DOIs and fall below the verdicts of
        // the true pairs only in feature score, but all confidences are 88;
        // ordering must be stable and every confidence within bounds
        assert!(!outcomes.is_empty());
        for pair in outcomes.windows(2) {
            assert!(pair[0].verdict.confidence >= pair[1].verdict.confidence);
        }
        for outcome in &outcomes {
            assert!(outcome.verdict.confidence <= 100);
        }
    }

    #[tokio::test]
    async fn negative_verdicts_are_dropped() {
        let (c1, e1) = strong_pair(1);
        let service =
            CannedService(r#"{"is_same_paper": false, "confidence": 95}"#.to_string());
        let outcomes =
            run_semantic(&service, retry(), &matching(), &[c1], &[e1], &HashMap::new()).await;
        assert!(outcomes.is_empty());
    }

    #[test]
    fn feature_only_mode_applies_final_threshold() {
        let (c1, e1) = strong_pair(1);
        let (c2, e2) = weak_pair(2);

        let outcomes = run_feature_only(&matching(), &[c1, c2], &[e1, e2]);
        // weak pair (≈0.39) clears admission (0.3) but not final (0.6)
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].english_file, "e01.pdf");
        assert!(outcomes[0].verdict.is_same_paper);
        assert_eq!(
            outcomes[0].verdict.confidence,
            (outcomes[0].feature_score * 100.0).round() as u8
        );
        assert!(outcomes[0].verdict.evidence.contains_key("feature_score"));
    }

    #[test]
    fn apply_writes_strongest_pairing_per_english_record() {
        let dir = TempDir::new().unwrap();
        let mut ledger = JsonLedger::open(dir.path().join("records.json")).unwrap();
        ledger.insert(Record::new("c01.pdf", Language::Chinese)).unwrap();
        ledger.insert(Record::new("c02.pdf", Language::Chinese)).unwrap();
        ledger.insert(Record::new("e01.pdf", Language::English)).unwrap();

        let outcome = |chinese: &str, confidence: u8| MatchOutcome {
            chinese_file: chinese.to_string(),
            english_file: "e01.pdf".to_string(),
            feature_score: 0.7,
            verdict: Verdict {
                is_same_paper: true,
                confidence,
                evidence: Default::default(),
                conclusion: String::new(),
            },
            translated_title: None,
        };

        let written =
            apply_outcomes(&mut ledger, &[outcome("c01.pdf", 90), outcome("c02.pdf", 70)])
                .unwrap();
        assert_eq!(written, 1);
        let pairing = ledger.get("e01.pdf").unwrap().pairing.clone().unwrap();
        assert_eq!(pairing.chinese_file, "c01.pdf");
        assert_eq!(pairing.confidence, 90);
    }
}
