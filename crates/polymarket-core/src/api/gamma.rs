//! Gamma market metadata payloads.
//!
//! Gamma encodes the outcome lists as JSON strings inside the JSON object and
//! mixes numeric and string encodings for amounts, so parsing goes through a
//! wire struct before producing a [`Market`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::types::{Market, Token};
use crate::{Error, Result};

/// A number that may arrive either as a JSON number or a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum Amount {
    Number(f64),
    Text(String),
}

impl Amount {
    fn to_decimal(&self) -> Option<Decimal> {
        match self {
            Amount::Number(n) => Decimal::from_f64_retain(*n).map(|d| d.normalize()),
            Amount::Text(s) => s.trim().parse().ok(),
        }
    }
}

fn amount(value: &Option<Amount>) -> Decimal {
    value.as_ref().and_then(Amount::to_decimal).unwrap_or_default()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GammaMarket {
    id: String,
    question: String,
    #[serde(default)]
    condition_id: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    end_date: Option<String>,
    #[serde(default)]
    volume: Option<Amount>,
    #[serde(default, rename = "volume24hr")]
    volume_24h: Option<Amount>,
    #[serde(default)]
    liquidity: Option<Amount>,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    closed: bool,
    #[serde(default)]
    outcomes: Option<String>,
    #[serde(default)]
    outcome_prices: Option<String>,
    #[serde(default)]
    clob_token_ids: Option<String>,
}

/// Decode one of Gamma's stringified JSON arrays.
fn string_list(field: &str, raw: &Option<String>) -> Result<Vec<String>> {
    match raw.as_deref() {
        None | Some("") => Ok(Vec::new()),
        Some(s) => serde_json::from_str(s)
            .map_err(|e| Error::InvalidMarket(format!("{field}: {e}"))),
    }
}

impl TryFrom<GammaMarket> for Market {
    type Error = Error;

    fn try_from(m: GammaMarket) -> Result<Self> {
        let outcomes = string_list("outcomes", &m.outcomes)?;
        let token_ids = string_list("clobTokenIds", &m.clob_token_ids)?;
        let prices: Vec<Option<Decimal>> = string_list("outcomePrices", &m.outcome_prices)?
            .iter()
            .map(|p| p.parse().ok())
            .collect();

        if outcomes.len() != token_ids.len() {
            return Err(Error::InvalidMarket(format!(
                "market {} has {} outcomes but {} token ids",
                m.id,
                outcomes.len(),
                token_ids.len()
            )));
        }

        let end_date = match m.end_date.as_deref() {
            Some(s) => Some(
                s.parse::<DateTime<Utc>>()
                    .map_err(|e| Error::InvalidMarket(format!("endDate {s}: {e}")))?,
            ),
            None => None,
        };

        // A closed market settles with one outcome priced at 1.
        let winning_outcome = if m.closed {
            outcomes
                .iter()
                .zip(prices.iter())
                .find(|(_, price)| **price == Some(Decimal::ONE))
                .map(|(name, _)| name.clone())
        } else {
            None
        };

        let tokens = outcomes
            .into_iter()
            .zip(token_ids)
            .enumerate()
            .map(|(i, (outcome, token_id))| Token {
                token_id,
                market_id: m.id.clone(),
                outcome,
                best_bid: None,
                best_ask: None,
                mid_price: prices.get(i).copied().flatten(),
                volume_24h: Decimal::ZERO,
            })
            .collect();

        Ok(Market {
            id: m.id,
            condition_id: m.condition_id,
            question: m.question,
            description: m.description,
            category: m.category,
            tokens,
            volume: amount(&m.volume),
            volume_24h: amount(&m.volume_24h),
            liquidity: amount(&m.liquidity),
            end_date,
            active: m.active,
            closed: m.closed,
            resolved: winning_outcome.is_some(),
            winning_outcome,
        })
    }
}

/// Parse one market object from a Gamma response.
pub(crate) fn parse_market(value: serde_json::Value) -> Result<Market> {
    let wire: GammaMarket = serde_json::from_value(value)?;
    Market::try_from(wire)
}
