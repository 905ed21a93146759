//! Prompt construction for the judgment service. All prompts demand a JSON
//! object so the verdict parser chain has something to find.

use paperpair_core::Record;

/// Truncate to a character budget without splitting a codepoint.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn record_block(label: &str, record: &Record) -> String {
    format!(
        "{label}:\n  title: {}\n  authors: {}\n  journal: {}\n  year: {}\n  doi: {}\n  keywords: {}",
        record.title, record.authors, record.journal, record.year, record.doi, record.keywords
    )
}

const VERDICT_SHAPE: &str = r#"Respond with a JSON object only:
{"is_same_paper": true|false, "confidence": 0-100, "evidence": {"<aspect>": "<finding>"}, "conclusion": "<one sentence>"}"#;

/// Standard comparison prompt: record metadata only.
pub fn match_prompt(chinese: &Record, english: &Record) -> String {
    format!(
        "You compare academic papers. Decide whether the following Chinese paper and \
English paper are the same work (the Chinese one may be a translation or the \
authors' own Chinese version).\n\n{}\n\n{}\n\n{VERDICT_SHAPE}",
        record_block("Chinese paper", chinese),
        record_block("English paper", english),
    )
}

/// Enhanced comparison prompt: adds a title translation and first-page
/// excerpts (truncated to 500 chars each).
pub fn enhanced_match_prompt(
    chinese: &Record,
    english: &Record,
    translated_title: &str,
    chinese_excerpt: &str,
    english_excerpt: &str,
) -> String {
    format!(
        "You compare academic papers. Decide whether the following Chinese paper and \
English paper are the same work.\n\n{}\n  machine-translated title: {}\n  first-page excerpt: {}\n\n\
{}\n  first-page excerpt: {}\n\n{VERDICT_SHAPE}",
        record_block("Chinese paper", chinese),
        translated_title,
        truncate_chars(chinese_excerpt, 500),
        record_block("English paper", english),
        truncate_chars(english_excerpt, 500),
    )
}

/// Title translation prompt; the reply is used verbatim.
pub fn translate_prompt(chinese_title: &str) -> String {
    format!(
        "Translate this Chinese academic paper title into English. \
Reply with the English title only, no quotes, no commentary.\n\n{chinese_title}"
    )
}

/// Metadata extraction prompt over raw first-pages text.
pub fn extract_prompt(text: &str, max_chars: usize) -> String {
    format!(
        "Extract bibliographic metadata from the beginning of this academic paper. \
Respond with a JSON object only:\n\
{{\"title\": \"\", \"title_en\": \"\", \"authors\": \"name1;name2\", \"journal\": \"\", \
\"year\": \"\", \"doi\": \"\", \"keywords\": \"kw1;kw2\", \"abstract\": \"\", \"confidence\": 0-100}}\n\
Use empty strings for anything not present in the text.\n\n---\n{}",
        truncate_chars(text, max_chars)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperpair_core::Language;

    #[test]
    fn match_prompt_embeds_both_records() {
        let mut c = Record::new("c01.pdf", Language::Chinese);
        c.title = "某个标题".to_string();
        c.doi = "10.1/c".to_string();
        let mut e = Record::new("e01.pdf", Language::English);
        e.title = "Some Title".to_string();
        e.authors = "A;B".to_string();

        let prompt = match_prompt(&c, &e);
        assert!(prompt.contains("某个标题"));
        assert!(prompt.contains("Some Title"));
        assert!(prompt.contains("10.1/c"));
        assert!(prompt.contains("is_same_paper"));
    }

    #[test]
    fn enhanced_prompt_truncates_excerpts() {
        let c = Record::new("c01.pdf", Language::Chinese);
        let e = Record::new("e01.pdf", Language::English);
        let long = "x".repeat(2000);
        let prompt = enhanced_match_prompt(&c, &e, "translated", &long, "");
        assert!(prompt.contains(&"x".repeat(500)));
        assert!(!prompt.contains(&"x".repeat(501)));
    }

    #[test]
    fn truncate_respects_multibyte_boundaries() {
        let text = "汉字标题测试";
        assert_eq!(truncate_chars(text, 3), "汉字标");
        assert_eq!(truncate_chars(text, 100), text);
    }
}
