//! Scoring and risk assessment benchmarks.
//!
//! Run with: `cargo bench --bench scoring`

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

use opportunity_scanner::{cross_platform, endgame, intra_market};
use polymarket_core::config::{EndgameConfig, IntraMarketConfig};
use polymarket_core::db::InMemoryTradeStore;
use polymarket_core::providers::ExternalMarket;
use polymarket_core::types::{Market, OrderBook, PriceLevel, PriceQuote, Token};
use risk_manager::{MarketContext, RiskEngine, TradeRiskRequest};
use trading_engine::engine::rank_opportunities;
use trading_engine::PaperExchange;

const QUESTIONS: &[&str] = &[
    "Will the Fed cut interest rates in December?",
    "Will Bitcoin close above $100k on Friday?",
    "Will the Lakers win the championship?",
    "Will CPI inflation exceed 3% this month?",
    "Will the senate pass the budget bill?",
];

/// Binary market with quotes around a random favourite price.
fn generate_market(rng: &mut impl Rng, index: usize) -> (Market, HashMap<String, PriceQuote>) {
    let id = format!("market_{}", index);
    let yes_mid = Decimal::new(rng.gen_range(40..99), 2);
    let no_mid = Decimal::new(rng.gen_range(1..55), 2);
    let spread = Decimal::new(rng.gen_range(1..3), 2);

    let mut tokens = Vec::with_capacity(2);
    let mut quotes = HashMap::with_capacity(2);
    for (outcome, mid) in [("Yes", yes_mid), ("No", no_mid)] {
        let token_id = format!("{}_{}", id, outcome.to_lowercase());
        let half = spread / Decimal::TWO;
        let book = OrderBook {
            market_id: id.clone(),
            token_id: token_id.clone(),
            timestamp: Utc::now(),
            bids: vec![PriceLevel {
                price: mid - half,
                size: Decimal::new(rng.gen_range(50..1000), 0),
            }],
            asks: vec![PriceLevel {
                price: mid + half,
                size: Decimal::new(rng.gen_range(50..1000), 0),
            }],
        };
        if let Some(quote) = PriceQuote::from_book(outcome, &book) {
            quotes.insert(token_id.clone(), quote);
        }
        tokens.push(Token {
            token_id,
            market_id: id.clone(),
            outcome: outcome.to_string(),
            best_bid: None,
            best_ask: None,
            mid_price: Some(mid),
            volume_24h: Decimal::ZERO,
        });
    }

    let market = Market {
        id,
        condition_id: None,
        question: QUESTIONS[index % QUESTIONS.len()].to_string(),
        description: None,
        category: None,
        tokens,
        volume: Decimal::new(rng.gen_range(10_000..500_000), 0),
        volume_24h: Decimal::new(rng.gen_range(500..50_000), 0),
        liquidity: Decimal::ZERO,
        end_date: Some(Utc::now() + Duration::hours(rng.gen_range(2..48))),
        active: true,
        closed: false,
        resolved: false,
        winning_outcome: None,
    };
    (market, quotes)
}

fn generate_batch(count: usize) -> Vec<(Market, HashMap<String, PriceQuote>)> {
    let mut rng = rand::thread_rng();
    (0..count).map(|i| generate_market(&mut rng, i)).collect()
}

/// Benchmark endgame evaluation across market counts.
fn bench_endgame_scoring(c: &mut Criterion) {
    let mut group = c.benchmark_group("endgame_scoring");
    let config = EndgameConfig {
        min_probability: Decimal::new(40, 2),
        ..Default::default()
    };

    for count in [10, 100, 1000].iter() {
        let batch = generate_batch(*count);
        let now = Utc::now();

        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("evaluate", count), &batch, |b, batch| {
            b.iter(|| {
                let mut found: Vec<_> = batch
                    .iter()
                    .filter_map(|(market, quotes)| {
                        endgame::evaluate_market(&config, market, quotes, now)
                            .ok()
                            .flatten()
                    })
                    .collect();
                rank_opportunities(&mut found);
                black_box(found)
            })
        });
    }

    group.finish();
}

/// Benchmark intra-market basket detection.
fn bench_intra_market_scoring(c: &mut Criterion) {
    let mut group = c.benchmark_group("intra_market_scoring");
    let config = IntraMarketConfig::default();

    for count in [10, 100, 1000].iter() {
        let batch = generate_batch(*count);
        let now = Utc::now();

        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("evaluate", count), &batch, |b, batch| {
            b.iter(|| {
                batch
                    .iter()
                    .filter(|(market, quotes)| {
                        matches!(
                            intra_market::evaluate_market(&config, market, quotes, now),
                            Ok(Some(_))
                        )
                    })
                    .count()
            })
        });
    }

    group.finish();
}

/// Benchmark question matching against an external venue.
fn bench_market_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("market_matching");
    let threshold = Decimal::new(7, 1);

    for count in [10, 100, 500].iter() {
        let primary: Vec<Market> = generate_batch(*count).into_iter().map(|(m, _)| m).collect();
        let external: Vec<ExternalMarket> = primary
            .iter()
            .map(|market| ExternalMarket {
                id: format!("ext_{}", market.id),
                question: market.question.to_uppercase(),
                prices: HashMap::from([("Yes".to_string(), Decimal::new(50, 2))]),
                volume_24h: Decimal::new(5000, 0),
                category: None,
            })
            .collect();

        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(
            BenchmarkId::new("match", count),
            &(primary, external),
            |b, (primary, external)| {
                b.iter(|| black_box(cross_platform::match_markets(primary, external, threshold).len()))
            },
        );
    }

    group.finish();
}

/// Benchmark a full risk assessment against the in-memory store.
fn bench_risk_assessment(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let risk = RiskEngine::new(
        Default::default(),
        Arc::new(InMemoryTradeStore::new()),
        Arc::new(PaperExchange::new(Decimal::new(10_000, 0))),
    );
    let request = TradeRiskRequest {
        market_id: "market_1".to_string(),
        token_id: "market_1_yes".to_string(),
        trade_type: polymarket_core::types::TradeType::Endgame,
        size: Decimal::new(50, 0),
        price: Decimal::new(96, 2),
        probability: Decimal::new(96, 2),
        market: MarketContext {
            volume_24h: Decimal::new(5000, 0),
            hours_to_resolution: Some(Decimal::new(24, 0)),
        },
    };

    c.bench_function("risk_assessment", |b| {
        b.iter(|| black_box(runtime.block_on(risk.assess_trade_risk(&request))))
    });
}

criterion_group!(
    benches,
    bench_endgame_scoring,
    bench_intra_market_scoring,
    bench_market_matching,
    bench_risk_assessment,
);

criterion_main!(benches);
