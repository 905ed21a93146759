//! Second pipeline stage: ask the judgment service whether an admitted
//! candidate pair really is the same paper.
//!
//! Service failures are absorbed here. A candidate whose call or parse
//! fails gets the conservative fallback verdict; the batch never aborts.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use paperpair_core::Record;
use paperpair_core::config::RetryConfig;

use crate::error::{MatchError, Result};
use crate::llm::JudgmentService;
use crate::prompts;
use crate::score::quick_score;
use crate::verdict::{Verdict, parse_verdict};

/// Quick-score floor below which the enhanced variant rejects a pair
/// without spending an API call.
const PRESCREEN_FLOOR: f64 = 0.3;

/// Longest single backoff pause.
const MAX_BACKOFF_SECS: u64 = 30;

pub struct SemanticVerifier<'a> {
    service: &'a dyn JudgmentService,
    retry: RetryConfig,
}

impl<'a> SemanticVerifier<'a> {
    pub fn new(service: &'a dyn JudgmentService, retry: RetryConfig) -> Self {
        Self { service, retry }
    }

    /// Standard verification from record metadata alone.
    pub async fn verify(&self, chinese: &Record, english: &Record, feature_score: f64) -> Verdict {
        let prompt = prompts::match_prompt(chinese, english);
        self.judge_with_fallback(&prompt, feature_score).await
    }

    /// Enhanced verification: translate the Chinese title, short-circuit on
    /// the local quick score, otherwise judge with excerpts attached.
    /// Returns the verdict and the translation (empty when it failed).
    pub async fn verify_enhanced(
        &self,
        chinese: &Record,
        english: &Record,
        chinese_excerpt: &str,
        english_excerpt: &str,
        feature_score: f64,
    ) -> (Verdict, String) {
        let translated = match self.service.translate(&chinese.title).await {
            Ok(title) => title,
            Err(e) => {
                warn!(file = %chinese.file_id, error = %e, "title translation failed");
                String::new()
            }
        };

        let quick = quick_score(&translated, chinese, english);
        if quick < PRESCREEN_FLOOR {
            debug!(
                chinese = %chinese.file_id,
                english = %english.file_id,
                quick,
                "prescreen reject"
            );
            return (Verdict::prescreen_reject(quick), translated);
        }

        let prompt = prompts::enhanced_match_prompt(
            chinese,
            english,
            &translated,
            chinese_excerpt,
            english_excerpt,
        );
        let verdict = self.judge_with_fallback(&prompt, feature_score).await;
        (verdict, translated)
    }

    async fn judge_with_fallback(&self, prompt: &str, feature_score: f64) -> Verdict {
        match self.judge_with_retry(prompt).await {
            Ok(content) => parse_verdict(&content).unwrap_or_else(|| {
                warn!("no parseable verdict in response, degrading to feature score");
                Verdict::fallback(feature_score)
            }),
            Err(e) => {
                warn!(error = %e, "judgment service failed, degrading to feature score");
                Verdict::fallback(feature_score)
            }
        }
    }

    async fn judge_with_retry(&self, prompt: &str) -> Result<String> {
        let attempts = self.retry.max_attempts.max(1);
        let mut last_err = None;
        for attempt in 0..attempts {
            match self.service.judge(prompt).await {
                Ok(content) => return Ok(content),
                Err(e) => {
                    if attempt + 1 < attempts {
                        let delay = self.backoff(attempt, &e);
                        debug!(attempt = attempt + 1, ?delay, error = %e, "retrying judgment call");
                        sleep(delay).await;
                    }
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| MatchError::Parse("no attempts made".to_string())))
    }

    fn backoff(&self, attempt: u32, error: &MatchError) -> Duration {
        if let MatchError::RateLimit(_, wait) = error {
            return Duration::from_secs((*wait).min(MAX_BACKOFF_SECS));
        }
        let base = self.retry.initial_delay_ms;
        let ms = if self.retry.exponential {
            base.saturating_mul(2u64.saturating_pow(attempt))
        } else {
            base
        };
        Duration::from_millis(ms).min(Duration::from_secs(MAX_BACKOFF_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use paperpair_core::Language;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyService {
        failures_before_success: u32,
        judge_calls: AtomicU32,
        response: String,
    }

    impl FlakyService {
        fn new(failures: u32, response: &str) -> Self {
            Self {
                failures_before_success: failures,
                judge_calls: AtomicU32::new(0),
                response: response.to_string(),
            }
        }
    }

    #[async_trait]
    impl JudgmentService for FlakyService {
        async fn judge(&self, _prompt: &str) -> Result<String> {
            let n = self.judge_calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures_before_success {
                Err(MatchError::ApiError("test".to_string(), "boom".to_string()))
            } else {
                Ok(self.response.clone())
            }
        }

        async fn translate(&self, _chinese_title: &str) -> Result<String> {
            Ok("translated title".to_string())
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1,
            exponential: true,
        }
    }

    fn pair() -> (Record, Record) {
        let mut c = Record::new("c01.pdf", Language::Chinese);
        c.title = "图神经网络".to_string();
        c.year = "2020".to_string();
        let mut e = Record::new("e01.pdf", Language::English);
        e.title = "Graph Neural Networks".to_string();
        e.year = "2020".to_string();
        (c, e)
    }

    #[tokio::test]
    async fn two_failures_then_success_uses_real_verdict() {
        let service = FlakyService::new(
            2,
            r#"{"is_same_paper": true, "confidence": 95, "conclusion": "same work"}"#,
        );
        let verifier = SemanticVerifier::new(&service, fast_retry());
        let (c, e) = pair();

        let verdict = verifier.verify(&c, &e, 0.4).await;
        assert!(verdict.is_same_paper);
        assert_eq!(verdict.confidence, 95);
        assert_eq!(verdict.conclusion, "same work");
        assert_eq!(service.judge_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_degrade_to_fallback() {
        let service = FlakyService::new(10, "never reached");
        let verifier = SemanticVerifier::new(&service, fast_retry());
        let (c, e) = pair();

        let verdict = verifier.verify(&c, &e, 0.8).await;
        assert!(verdict.is_same_paper); // feature score > 0.5
        assert_eq!(verdict.confidence, 80);
        assert_eq!(service.judge_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unparseable_response_falls_back_on_feature_score() {
        let service = FlakyService::new(0, "sorry, I cannot answer in JSON");
        let verifier = SemanticVerifier::new(&service, fast_retry());
        let (c, e) = pair();

        let low = verifier.verify(&c, &e, 0.35).await;
        assert!(!low.is_same_paper);

        let high = verifier.verify(&c, &e, 0.75).await;
        assert!(high.is_same_paper);
    }

    #[tokio::test]
    async fn enhanced_prescreen_skips_hopeless_pairs_without_judge_call() {
        struct NoOverlap;
        #[async_trait]
        impl JudgmentService for NoOverlap {
            async fn judge(&self, _prompt: &str) -> Result<String> {
                panic!("judge must not be called for prescreen rejects");
            }
            async fn translate(&self, _t: &str) -> Result<String> {
                Ok("completely unrelated words".to_string())
            }
        }

        let mut c = Record::new("c01.pdf", Language::Chinese);
        c.title = "某研究".to_string();
        c.authors = "Zhao Yi".to_string();
        c.year = "1999".to_string();
        let mut e = Record::new("e01.pdf", Language::English);
        e.title = "Quantum Chromodynamics on the Lattice".to_string();
        e.authors = "Smith J".to_string();
        e.year = "2015".to_string();

        let service = NoOverlap;
        let verifier = SemanticVerifier::new(&service, fast_retry());
        let (verdict, translated) = verifier.verify_enhanced(&c, &e, "", "", 0.4).await;
        assert!(!verdict.is_same_paper);
        assert_eq!(translated, "completely unrelated words");
    }

    #[tokio::test]
    async fn translation_failure_proceeds_with_empty_title() {
        struct NoTranslate;
        #[async_trait]
        impl JudgmentService for NoTranslate {
            async fn judge(&self, _prompt: &str) -> Result<String> {
                Ok(r#"{"is_same_paper": true, "confidence": 60}"#.to_string())
            }
            async fn translate(&self, _t: &str) -> Result<String> {
                Err(MatchError::Parse("no translation".to_string()))
            }
        }

        // strong author/year agreement keeps the quick score above the
        // floor even with an empty translation
        let mut c = Record::new("c01.pdf", Language::Chinese);
        c.authors = "Zhang San;Li Si".to_string();
        c.year = "2020".to_string();
        let mut e = Record::new("e01.pdf", Language::English);
        e.title = "Whatever".to_string();
        e.authors = "San Zhang; Si Li".to_string();
        e.year = "2020".to_string();

        let service = NoTranslate;
        let verifier = SemanticVerifier::new(&service, fast_retry());
        let (verdict, translated) = verifier.verify_enhanced(&c, &e, "", "", 0.4).await;
        assert!(translated.is_empty());
        assert!(verdict.is_same_paper);
        assert_eq!(verdict.confidence, 60);
    }
}
