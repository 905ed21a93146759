//! Feature scoring and candidate admission.
//!
//! The first pipeline stage is purely local: every (Chinese, English) pair
//! gets a weighted similarity score from cheap record features, and only
//! pairs above the admission threshold are handed to the semantic verifier.

use paperpair_core::Record;

/// Weight of exact year agreement.
const W_YEAR: f64 = 0.3;
/// Weight of exact DOI agreement.
const W_DOI: f64 = 0.4;
/// Weight of the title length ratio.
const W_TITLE: f64 = 0.1;
/// Weight of the author count ratio.
const W_AUTHORS: f64 = 0.2;

/// A (Chinese, English) pair admitted for verification. Indices point into
/// the record slices the filter was called with.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub chinese_idx: usize,
    pub english_idx: usize,
    pub score: f64,
}

/// Weighted similarity of two records in `[0, 1]`.
///
/// A feature only contributes when present on both sides; absent features
/// drop their weight rather than redistributing it, so sparse records score
/// low instead of being inflated.
pub fn feature_score(chinese: &Record, english: &Record) -> f64 {
    let mut score = 0.0;

    let (year_a, year_b) = (chinese.year.trim(), english.year.trim());
    if !year_a.is_empty() && !year_b.is_empty() && year_a == year_b {
        score += W_YEAR;
    }

    let (doi_a, doi_b) = (chinese.doi.trim(), english.doi.trim());
    if !doi_a.is_empty() && !doi_b.is_empty() && doi_a.eq_ignore_ascii_case(doi_b) {
        score += W_DOI;
    }

    let (len_a, len_b) = (
        chinese.title.trim().chars().count(),
        english.title.trim().chars().count(),
    );
    if len_a > 0 && len_b > 0 {
        score += W_TITLE * (len_a.min(len_b) as f64 / len_a.max(len_b) as f64);
    }

    let (n_a, n_b) = (chinese.author_count(), english.author_count());
    if n_a > 0 && n_b > 0 {
        score += W_AUTHORS * (n_a.min(n_b) as f64 / n_a.max(n_b) as f64);
    }

    score
}

/// Full cross product of both partitions, keeping pairs strictly above the
/// admission threshold, sorted descending by score. Output order is the
/// order the verifier will see them in.
pub fn filter_candidates(
    chinese: &[Record],
    english: &[Record],
    admission_threshold: f64,
) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for (ci, c) in chinese.iter().enumerate() {
        for (ei, e) in english.iter().enumerate() {
            let score = feature_score(c, e);
            if score > admission_threshold {
                candidates.push(Candidate {
                    chinese_idx: ci,
                    english_idx: ei,
                    score,
                });
            }
        }
    }
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    candidates
}

// ─── Enhanced prescreen ────────────────────────────────────

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "the", "of", "on", "in", "for", "with", "to", "at", "by", "from", "based",
    "using", "study", "analysis", "research", "review",
];

fn normalize_title(title: &str) -> String {
    let cleaned: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn keywords_of(title: &str) -> Vec<String> {
    normalize_title(title)
        .split_whitespace()
        .filter(|w| w.len() > 1 && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

fn keyword_jaccard(a: &str, b: &str) -> f64 {
    let ka = keywords_of(a);
    let kb = keywords_of(b);
    if ka.is_empty() || kb.is_empty() {
        return 0.0;
    }
    let inter = ka.iter().filter(|w| kb.contains(*w)).count();
    let union = ka.len() + kb.len() - inter;
    inter as f64 / union as f64
}

fn surname_overlap(chinese_authors: &str, english_authors: &str) -> f64 {
    let surnames: Vec<String> = chinese_authors
        .split(';')
        .filter_map(|name| name.trim().split_whitespace().next())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect();
    if surnames.is_empty() || english_authors.trim().is_empty() {
        return 0.0;
    }
    let haystack = english_authors.to_lowercase();
    let found = surnames.iter().filter(|s| haystack.contains(s.as_str())).count();
    found as f64 / surnames.len() as f64
}

fn year_bonus(year_a: &str, year_b: &str) -> f64 {
    match (year_a.trim().parse::<i32>(), year_b.trim().parse::<i32>()) {
        (Ok(a), Ok(b)) if a == b => 0.2,
        (Ok(a), Ok(b)) if (a - b).abs() == 1 => 0.05,
        _ => 0.0,
    }
}

/// Cheap local estimate used by the enhanced matcher to skip hopeless pairs
/// before spending an API call. `translated_title` is the machine
/// translation of the Chinese title; empty when translation failed.
pub fn quick_score(translated_title: &str, chinese: &Record, english: &Record) -> f64 {
    let title_sim = if translated_title.trim().is_empty() {
        0.0
    } else {
        let jaccard = keyword_jaccard(translated_title, &english.title);
        let edit = strsim::normalized_levenshtein(
            &normalize_title(translated_title),
            &normalize_title(&english.title),
        );
        jaccard.max(edit)
    };

    0.5 * title_sim
        + 0.3 * surname_overlap(&chinese.authors, &english.authors)
        + year_bonus(&chinese.year, &english.year)
}
