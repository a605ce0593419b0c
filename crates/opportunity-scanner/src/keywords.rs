//! Question matching across venues.

use rust_decimal::Decimal;
use std::collections::HashSet;

const STOP_WORDS: &[&str] = &[
    "will", "be", "the", "in", "on", "at", "to", "for", "of", "and", "or", "a", "an", "is", "are",
    "was", "were", "have", "has", "had", "by",
];

/// Lower-cased significant words of a market question.
///
/// Punctuation is stripped from word edges; stop-words and words of two
/// characters or fewer are dropped.
pub fn key_terms(question: &str) -> HashSet<String> {
    question
        .to_lowercase()
        .split_whitespace()
        .map(|word| word.trim_matches(|c: char| matches!(c, '.' | ',' | '!' | '?' | ';' | ':')))
        .filter(|word| word.chars().count() > 2 && !STOP_WORDS.contains(word))
        .map(str::to_string)
        .collect()
}

/// Jaccard similarity of two key-term sets; zero when either is empty.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> Decimal {
    if a.is_empty() || b.is_empty() {
        return Decimal::ZERO;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    Decimal::from(intersection as u64) / Decimal::from(union as u64)
}

/// Jaccard similarity of two questions' key terms.
pub fn question_similarity(a: &str, b: &str) -> Decimal {
    jaccard(&key_terms(a), &key_terms(b))
}
