//! paperpair-match — pairing pipeline for bilingual paper libraries.
//!
//! Two-stage design: a cheap local feature scorer admits candidate
//! (Chinese, English) pairs, then a language-model verifier judges each
//! admitted pair. Also hosts metadata extraction and the production
//! DeepSeek client with its response cache and usage accounting.

pub mod cache;
pub mod error;
pub mod extract;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod score;
pub mod stats;
pub mod verdict;
pub mod verifier;

pub use error::{MatchError, Result};
pub use extract::{ExtractedMetadata, LopdfSource, PdfTextSource};
pub use llm::{DeepSeekClient, JudgmentService};
pub use pipeline::{MatchOutcome, apply_outcomes, run_feature_only, run_semantic};
pub use score::{Candidate, feature_score, filter_candidates, quick_score};
pub use verdict::Verdict;
pub use verifier::SemanticVerifier;
