//! Tier tables and keyword bonuses shared by the strategies' confidence scores.
//!
//! Each signal adds points; the total is capped at 100.

use polymarket_core::config::{CategoryPoints, KeywordBonus, Tier};
use rust_decimal::Decimal;

/// Upper bound of every confidence score.
pub const MAX_CONFIDENCE: Decimal = Decimal::ONE_HUNDRED;

/// Points of the first tier whose threshold `value` reaches or exceeds.
pub fn points_at_least(tiers: &[Tier], value: Decimal) -> Decimal {
    tiers
        .iter()
        .find(|tier| value >= tier.threshold)
        .map(|tier| tier.points)
        .unwrap_or_default()
}

/// Points of the first tier whose threshold `value` does not exceed.
pub fn points_at_most(tiers: &[Tier], value: Decimal) -> Decimal {
    tiers
        .iter()
        .find(|tier| value <= tier.threshold)
        .map(|tier| tier.points)
        .unwrap_or_default()
}

fn contains_term(text: &str, term: &str) -> bool {
    text.contains(&term.to_lowercase())
}

fn bonus_matches(bonus: &KeywordBonus, question: &str, category: Option<&str>) -> bool {
    let any = !bonus.any_of.is_empty() && bonus.any_of.iter().any(|t| contains_term(question, t));
    let all = !bonus.all_of.is_empty() && bonus.all_of.iter().all(|t| contains_term(question, t));
    let in_category = match (&bonus.category_contains, category) {
        (Some(wanted), Some(category)) => contains_term(category, wanted),
        _ => false,
    };
    any || all || in_category
}

/// Points of the first bonus matching the question or category.
pub fn keyword_bonus(bonuses: &[KeywordBonus], question: &str, category: Option<&str>) -> Decimal {
    let question = question.to_lowercase();
    let category = category.map(str::to_lowercase);
    bonuses
        .iter()
        .find(|bonus| bonus_matches(bonus, &question, category.as_deref()))
        .map(|bonus| bonus.points)
        .unwrap_or_default()
}

/// Points of the first category entry the market's category contains.
pub fn category_points(entries: &[CategoryPoints], category: Option<&str>) -> Decimal {
    let Some(category) = category.map(str::to_lowercase) else {
        return Decimal::ZERO;
    };
    entries
        .iter()
        .find(|entry| entry.contains.iter().any(|term| contains_term(&category, term)))
        .map(|entry| entry.points)
        .unwrap_or_default()
}

/// True when the lower-cased `text` mentions any of `terms`.
pub fn mentions_any(text: &str, terms: &[String]) -> bool {
    let text = text.to_lowercase();
    terms.iter().any(|term| contains_term(&text, term))
}

/// Clamp a raw score into `[0, 100]`.
pub fn cap_confidence(score: Decimal) -> Decimal {
    score.clamp(Decimal::ZERO, MAX_CONFIDENCE)
}
