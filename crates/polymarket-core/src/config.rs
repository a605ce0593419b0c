//! Configuration management for the endgame trading system.
//!
//! Values are layered: compiled defaults, then `config/default.toml`, then
//! `config/{BOT_ENV}.toml`, then `BOT__SECTION__KEY` environment variables.

use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// PostgreSQL persistence; the in-memory store is used when absent.
    pub database: Option<DatabaseConfig>,
    pub api: ApiConfig,
    pub risk: RiskConfig,
    pub engine: EngineConfig,
    pub endgame: EndgameConfig,
    pub cross_platform: CrossPlatformConfig,
    pub intra_market: IntraMarketConfig,
    pub paper: PaperConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Market metadata endpoint.
    pub gamma_url: String,
    /// Order book endpoint.
    pub clob_url: String,
    pub rate_limit_per_second: u32,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            gamma_url: "https://gamma-api.polymarket.com".to_string(),
            clob_url: "https://clob.polymarket.com".to_string(),
            rate_limit_per_second: 5,
            request_timeout_secs: 30,
            max_retries: 3,
        }
    }
}

/// Risk budget and thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Base share of portfolio value per trade before dynamic scaling.
    pub max_position_size_pct: Decimal,
    pub max_daily_loss_pct: Decimal,
    pub max_weekly_loss_pct: Decimal,
    /// Stop out a filled position when its probability falls below this.
    pub stop_loss_threshold: Decimal,
    pub min_probability: Decimal,
    pub max_exposure_per_market: Decimal,
    pub cooling_period_hours: i64,
    pub max_concurrent_trades: usize,
    /// 24h volume below this is flagged as illiquid.
    pub min_volume_24h: Decimal,
    pub black_swan_probability: Decimal,
    /// Stop out when unrealized loss exceeds this share of cost basis.
    pub max_unrealized_loss_pct: Decimal,
    pub daily_emergency_multiplier: Decimal,
    pub weekly_emergency_multiplier: Decimal,
    pub max_recent_failures: u64,
    pub failure_window_minutes: i64,
    pub performance_window_days: i64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_size_pct: Decimal::new(10, 2),   // 10%
            max_daily_loss_pct: Decimal::new(5, 2),       // 5%
            max_weekly_loss_pct: Decimal::new(15, 2),     // 15%
            stop_loss_threshold: Decimal::new(85, 2),     // 0.85
            min_probability: Decimal::new(90, 2),         // 0.90
            max_exposure_per_market: Decimal::new(20, 2), // 20%
            cooling_period_hours: 1,
            max_concurrent_trades: 3,
            min_volume_24h: Decimal::new(100, 0),
            black_swan_probability: Decimal::new(98, 2),
            max_unrealized_loss_pct: Decimal::new(50, 2),
            daily_emergency_multiplier: Decimal::new(2, 0),
            weekly_emergency_multiplier: Decimal::new(15, 1),
            max_recent_failures: 5,
            failure_window_minutes: 60,
            performance_window_days: 30,
        }
    }
}

/// Trading loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub heartbeat_interval_secs: u64,
    /// When set, orders get a synthetic id and never reach the exchange.
    pub dry_run: bool,
    pub max_opportunities_per_cycle: usize,
    pub status_log_interval_cycles: u64,
    /// Minimum viable trade in shares.
    pub min_trade_size: Decimal,
    /// Stop-loss orders are priced this far through the best bid/ask.
    pub stop_loss_price_offset: Decimal,
    pub max_consecutive_cycle_failures: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 60,
            dry_run: true,
            max_opportunities_per_cycle: 10,
            status_log_interval_cycles: 10,
            min_trade_size: Decimal::new(1, 2),
            stop_loss_price_offset: Decimal::new(1, 2), // 1%
            max_consecutive_cycle_failures: 5,
        }
    }
}

/// A scoring tier: inputs at or beyond `threshold` earn `points`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    pub threshold: Decimal,
    pub points: Decimal,
}

impl Tier {
    pub fn new(threshold: Decimal, points: i64) -> Self {
        Self {
            threshold,
            points: Decimal::from(points),
        }
    }
}

/// Bonus awarded when a market's question or category matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordBonus {
    /// Matches when the question contains any of these.
    #[serde(default)]
    pub any_of: Vec<String>,
    /// Matches when the question contains all of these.
    #[serde(default)]
    pub all_of: Vec<String>,
    /// Matches when the category contains this.
    #[serde(default)]
    pub category_contains: Option<String>,
    pub points: Decimal,
}

fn terms(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

fn volume_tiers() -> Vec<Tier> {
    vec![
        Tier::new(Decimal::new(10000, 0), 25),
        Tier::new(Decimal::new(5000, 0), 20),
        Tier::new(Decimal::new(1000, 0), 15),
        Tier::new(Decimal::new(500, 0), 10),
    ]
}

/// Endgame confidence weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndgameScoring {
    /// Probability at or above threshold.
    pub probability_tiers: Vec<Tier>,
    /// Hours to resolution at or below threshold.
    pub hours_tiers: Vec<Tier>,
    /// 24h volume at or above threshold.
    pub volume_tiers: Vec<Tier>,
    /// Evaluated in order; the first match applies.
    pub keyword_bonuses: Vec<KeywordBonus>,
}

impl Default for EndgameScoring {
    fn default() -> Self {
        Self {
            probability_tiers: vec![
                Tier::new(Decimal::new(99, 2), 30),
                Tier::new(Decimal::new(97, 2), 25),
                Tier::new(Decimal::new(95, 2), 20),
                Tier::new(Decimal::new(90, 2), 10),
            ],
            hours_tiers: vec![
                Tier::new(Decimal::new(6, 0), 25),
                Tier::new(Decimal::new(12, 0), 20),
                Tier::new(Decimal::new(24, 0), 15),
                Tier::new(Decimal::new(48, 0), 10),
            ],
            volume_tiers: volume_tiers(),
            keyword_bonuses: vec![
                KeywordBonus {
                    any_of: terms(&["unemployment", "gdp", "inflation", "fed rate"]),
                    all_of: vec![],
                    category_contains: None,
                    points: Decimal::new(15, 0),
                },
                KeywordBonus {
                    any_of: terms(&["super bowl", "world series", "championship"]),
                    all_of: vec![],
                    category_contains: None,
                    points: Decimal::new(10, 0),
                },
                KeywordBonus {
                    any_of: terms(&["temperature"]),
                    all_of: vec![],
                    category_contains: Some("weather".to_string()),
                    points: Decimal::new(12, 0),
                },
                KeywordBonus {
                    any_of: vec![],
                    all_of: terms(&["election", "uncontested"]),
                    category_contains: None,
                    points: Decimal::new(20, 0),
                },
            ],
        }
    }
}

/// Endgame strategy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndgameConfig {
    pub enabled: bool,
    pub min_probability: Decimal,
    pub max_hours_to_resolution: i64,
    pub min_volume_24h: Decimal,
    /// Maximum spread relative to mid-price, in basis points.
    pub max_spread_bps: u32,
    pub max_results: usize,
    pub market_scan_limit: usize,
    pub base_size: Decimal,
    pub max_suggested_size: Decimal,
    pub max_position_size: Decimal,
    /// Share of average hourly volume a position may take.
    pub hourly_volume_fraction: Decimal,
    pub time_boost_hours: Decimal,
    pub time_boost_multiplier: Decimal,
    /// Return % that maps to a 1x size multiplier.
    pub return_divisor_pct: Decimal,
    pub max_return_multiplier: Decimal,
    pub scoring: EndgameScoring,
}

impl Default for EndgameConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_probability: Decimal::new(95, 2),
            max_hours_to_resolution: 48,
            min_volume_24h: Decimal::new(1000, 0),
            max_spread_bps: 200,
            max_results: 5,
            market_scan_limit: 200,
            base_size: Decimal::new(50, 0),          // $50
            max_suggested_size: Decimal::new(200, 0), // $200
            max_position_size: Decimal::new(500, 0),  // $500
            hourly_volume_fraction: Decimal::new(10, 2),
            time_boost_hours: Decimal::new(12, 0),
            time_boost_multiplier: Decimal::new(2, 0),
            return_divisor_pct: Decimal::new(5, 0),
            max_return_multiplier: Decimal::new(2, 0),
            scoring: EndgameScoring::default(),
        }
    }
}

/// Category match for cross-platform confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryPoints {
    pub contains: Vec<String>,
    pub points: Decimal,
}

/// Cross-platform confidence weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossPlatformScoring {
    /// Absolute price difference at or above threshold.
    pub price_difference_tiers: Vec<Tier>,
    /// Smaller of the two venues' 24h volume at or above threshold.
    pub volume_tiers: Vec<Tier>,
    /// Evaluated in order; the first match applies.
    pub category_points: Vec<CategoryPoints>,
    pub objective_terms: Vec<String>,
    pub objective_points: Decimal,
    pub quantitative_terms: Vec<String>,
    pub quantitative_points: Decimal,
    pub default_clarity_points: Decimal,
}

impl Default for CrossPlatformScoring {
    fn default() -> Self {
        Self {
            price_difference_tiers: vec![
                Tier::new(Decimal::new(10, 2), 30),
                Tier::new(Decimal::new(5, 2), 20),
                Tier::new(Decimal::new(3, 2), 15),
                Tier::new(Decimal::new(1, 2), 10),
            ],
            volume_tiers: volume_tiers(),
            category_points: vec![
                CategoryPoints {
                    contains: terms(&["economics", "politics"]),
                    points: Decimal::new(20, 0),
                },
                CategoryPoints {
                    contains: terms(&["sports"]),
                    points: Decimal::new(15, 0),
                },
                CategoryPoints {
                    contains: terms(&["crypto"]),
                    points: Decimal::new(10, 0),
                },
            ],
            objective_terms: terms(&["unemployment", "gdp", "inflation", "election"]),
            objective_points: Decimal::new(20, 0),
            quantitative_terms: terms(&["price", "above", "below"]),
            quantitative_points: Decimal::new(15, 0),
            default_clarity_points: Decimal::new(10, 0),
        }
    }
}

/// Cross-platform strategy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossPlatformConfig {
    pub enabled: bool,
    /// The strategy only scans when an external venue is enabled too.
    pub external_enabled: bool,
    pub external_venue: String,
    /// JSON list of external markets for the static provider.
    pub external_markets_path: Option<String>,
    pub min_spread: Decimal,
    pub min_volume_24h: Decimal,
    pub similarity_threshold: Decimal,
    pub max_results: usize,
    pub market_scan_limit: usize,
    pub base_size: Decimal,
    pub max_suggested_size: Decimal,
    pub max_position_size: Decimal,
    pub max_size_multiplier: Decimal,
    pub profit_divisor_pct: Decimal,
    pub max_profit_multiplier: Decimal,
    pub scoring: CrossPlatformScoring,
}

impl Default for CrossPlatformConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            external_enabled: false,
            external_venue: "kalshi".to_string(),
            external_markets_path: None,
            min_spread: Decimal::new(5, 2),
            min_volume_24h: Decimal::new(1000, 0),
            similarity_threshold: Decimal::new(7, 1),
            max_results: 3,
            market_scan_limit: 100,
            base_size: Decimal::new(25, 0),          // $25
            max_suggested_size: Decimal::new(100, 0), // $100
            max_position_size: Decimal::new(150, 0),  // $150
            max_size_multiplier: Decimal::new(15, 1),
            profit_divisor_pct: Decimal::new(10, 0),
            max_profit_multiplier: Decimal::new(15, 1),
            scoring: CrossPlatformScoring::default(),
        }
    }
}

/// Intra-market strategy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntraMarketConfig {
    pub enabled: bool,
    /// Flag binary markets whose mid-prices sum below this.
    pub max_price_sum: Decimal,
    pub min_profit_margin: Decimal,
    pub min_volume_24h: Decimal,
    pub market_scan_limit: usize,
    pub base_size: Decimal,
    pub max_position_size: Decimal,
    /// Margin at or above threshold.
    pub margin_tiers: Vec<Tier>,
    pub volume_tiers: Vec<Tier>,
    pub base_confidence: Decimal,
}

impl Default for IntraMarketConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_price_sum: Decimal::new(98, 2),
            min_profit_margin: Decimal::new(2, 2),
            min_volume_24h: Decimal::ZERO,
            market_scan_limit: 100,
            base_size: Decimal::new(50, 0),
            max_position_size: Decimal::new(200, 0),
            margin_tiers: vec![
                Tier::new(Decimal::new(5, 2), 30),
                Tier::new(Decimal::new(3, 2), 20),
                Tier::new(Decimal::ZERO, 10),
            ],
            volume_tiers: volume_tiers(),
            base_confidence: Decimal::new(50, 0),
        }
    }
}

/// Simulated exchange used for paper trading.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    pub starting_balance: Decimal,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            starting_balance: Decimal::new(1000, 0),
        }
    }
}

impl Config {
    /// Load configuration from files and environment variables.
    #[allow(clippy::result_large_err)]
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let env_name = env::var("BOT_ENV").unwrap_or_else(|_| "development".to_string());
        let mut config: Config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{}", env_name)).required(false))
            .add_source(
                config::Environment::with_prefix("BOT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        if config.database.is_none() {
            if let Ok(url) = env::var("DATABASE_URL") {
                config.database = Some(DatabaseConfig {
                    url,
                    max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or_else(default_max_connections),
                });
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the risk budget meaningless.
    #[allow(clippy::result_large_err)]
    pub fn validate(&self) -> Result<()> {
        let percentages = [
            ("risk.max_position_size_pct", self.risk.max_position_size_pct),
            ("risk.max_daily_loss_pct", self.risk.max_daily_loss_pct),
            ("risk.max_weekly_loss_pct", self.risk.max_weekly_loss_pct),
            ("risk.max_exposure_per_market", self.risk.max_exposure_per_market),
        ];
        for (name, value) in percentages {
            if value <= Decimal::ZERO || value > Decimal::ONE {
                return Err(Error::Config {
                    message: format!("{} must be within (0, 1], got {}", name, value),
                });
            }
        }
        if self.engine.heartbeat_interval_secs == 0 {
            return Err(Error::Config {
                message: "engine.heartbeat_interval_secs must be positive".to_string(),
            });
        }
        if self.api.rate_limit_per_second == 0 {
            return Err(Error::Config {
                message: "api.rate_limit_per_second must be positive".to_string(),
            });
        }
        let offset = self.engine.stop_loss_price_offset;
        if offset < Decimal::ZERO || offset >= Decimal::ONE {
            return Err(Error::Config {
                message: format!("engine.stop_loss_price_offset must be within [0, 1), got {}", offset),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.engine.dry_run);
        assert_eq!(config.risk.max_concurrent_trades, 3);
        assert_eq!(config.endgame.scoring.keyword_bonuses.len(), 4);
    }

    #[test]
    fn test_rejects_out_of_range_percentages() {
        let mut config = Config::default();
        config.risk.max_daily_loss_pct = Decimal::new(15, 1);
        assert!(matches!(config.validate(), Err(Error::Config { .. })));

        let mut config = Config::default();
        config.risk.max_position_size_pct = Decimal::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_heartbeat() {
        let mut config = Config::default();
        config.engine.heartbeat_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(
                "[risk]\nmax_daily_loss_pct = \"0.03\"\n[engine]\ndry_run = false\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.risk.max_daily_loss_pct, Decimal::new(3, 2));
        assert_eq!(config.risk.max_weekly_loss_pct, Decimal::new(15, 2));
        assert!(!config.engine.dry_run);
        assert_eq!(config.engine.heartbeat_interval_secs, 60);
    }
}
