use chrono::{Datelike, Timelike, Utc};
use core_types::{PatternType, TradeMemory, WinningPattern};
use memory_store::MemoryStore;
use std::sync::RwLock;

/// Minimum return on a closed win for it to enter the working set.
const MIN_PNL_PERCENT: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recommendation {
    Favorable,
    Neutral,
    Unfavorable,
}

fn volume_bucket(ratio: f64) -> &'static str {
    if ratio > 1.5 {
        "high"
    } else if ratio < 0.7 {
        "low"
    } else {
        "normal"
    }
}

fn rsi_bucket(rsi: f64) -> &'static str {
    if rsi < 30.0 {
        "oversold"
    } else if rsi < 45.0 {
        "low"
    } else if rsi < 60.0 {
        "mid"
    } else if rsi < 70.0 {
        "high"
    } else {
        "overbought"
    }
}

fn to_winning_pattern(m: &TradeMemory, pattern_type: PatternType) -> WinningPattern {
    WinningPattern {
        symbol: m.symbol.clone(),
        sector: m.sector.clone(),
        entry_hour: m.created_at.hour(),
        entry_weekday: m.created_at.weekday().num_days_from_monday(),
        rsi_at_entry: m.rsi_value.unwrap_or(50.0),
        macd_bullish: matches!(m.market_trend.as_deref(), Some("BULLISH") | Some("STRONG_BULLISH")),
        volume_ratio: m.volume_ratio.unwrap_or(1.0),
        trend: m.market_trend.clone().unwrap_or_else(|| "NEUTRAL".to_string()),
        price_vs_sma20_pct: 0.0,
        vix_level: m.vix_level.unwrap_or(20.0),
        market_sentiment: m.market_sentiment.clone().unwrap_or_else(|| "NEUTRAL".to_string()),
        pattern_type,
        pnl_percent: m.pnl_percent.unwrap_or(0.0),
    }
}

fn classify_pattern_type(m: &TradeMemory) -> PatternType {
    use core_types::TradeAction;
    let rsi = m.rsi_value.unwrap_or(50.0);
    let volume_ratio = m.volume_ratio.unwrap_or(1.0);
    let pnl_percent = m.pnl_percent.unwrap_or(0.0);
    match m.decision {
        TradeAction::Buy => {
            if rsi < 35.0 {
                PatternType::DipBuy
            } else if volume_ratio > 1.5 && rsi > 55.0 {
                PatternType::Breakout
            } else if (45.0..=65.0).contains(&rsi) {
                PatternType::Momentum
            } else {
                PatternType::TrendFollowing
            }
        }
        TradeAction::Sell => {
            if rsi > 65.0 {
                PatternType::OverboughtSell
            } else if pnl_percent > 0.0 {
                PatternType::ProfitTaking
            } else {
                PatternType::Distribution
            }
        }
        TradeAction::Hold => PatternType::TrendFollowing,
    }
}

/// In-memory index of winning trade setups, refreshed periodically from the
/// memory store. Grouped by entry hour, sector, RSI bucket, and volume bucket
/// so a caller can ask "have setups like this one tended to work?"
pub struct WinningPatternsIndex {
    patterns: RwLock<Vec<WinningPattern>>,
}

impl WinningPatternsIndex {
    pub fn new() -> Self {
        WinningPatternsIndex {
            patterns: RwLock::new(Vec::new()),
        }
    }

    pub async fn refresh(&self, store: &MemoryStore) -> anyhow::Result<usize> {
        let memories = store.get_winning_memories(MIN_PNL_PERCENT).await?;
        let patterns: Vec<WinningPattern> = memories
            .iter()
            .map(|m| to_winning_pattern(m, classify_pattern_type(m)))
            .collect();
        let count = patterns.len();
        *self.patterns.write().unwrap() = patterns;
        tracing::info!(count, "winning patterns index refreshed");
        Ok(count)
    }

    /// Scores a prospective setup against historical winners. 50 is neutral;
    /// matching hour/sector/rsi-bucket/volume-bucket each nudge the score.
    pub fn get_pattern_recommendation(
        &self,
        symbol: &str,
        rsi: Option<f64>,
        hour: Option<u32>,
        volume_ratio: Option<f64>,
    ) -> (f64, Recommendation) {
        let patterns = self.patterns.read().unwrap();
        if patterns.is_empty() {
            return (50.0, Recommendation::Neutral);
        }

        let hour = hour.unwrap_or_else(|| Utc::now().hour());
        let rsi_bucket_target = rsi.map(rsi_bucket);
        let volume_bucket_target = volume_ratio.map(volume_bucket);

        let same_symbol: Vec<&WinningPattern> =
            patterns.iter().filter(|p| p.symbol == symbol).collect();
        let reference: Vec<&WinningPattern> = if same_symbol.len() >= 3 {
            same_symbol
        } else {
            patterns.iter().collect()
        };

        let mut score = 50.0;

        let hour_matches = reference.iter().filter(|p| p.entry_hour == hour).count();
        if hour_matches > 0 {
            score += 15.0;
        }

        if let Some(target) = rsi_bucket_target {
            let rsi_matches = reference
                .iter()
                .filter(|p| rsi_bucket(p.rsi_at_entry) == target)
                .count();
            if rsi_matches as f64 / reference.len() as f64 > 0.3 {
                score += 10.0;
            }
        }

        if let Some(target) = volume_bucket_target {
            let volume_matches = reference
                .iter()
                .filter(|p| volume_bucket(p.volume_ratio) == target)
                .count();
            if volume_matches as f64 / reference.len() as f64 > 0.3 {
                score += 15.0;
            } else if volume_matches == 0 {
                score -= 15.0;
            }
        }

        let avg_pnl: f64 =
            reference.iter().map(|p| p.pnl_percent).sum::<f64>() / reference.len() as f64;
        if avg_pnl > 0.05 {
            score += 10.0;
        } else if avg_pnl < 0.02 {
            score -= 10.0;
        }

        score = score.clamp(0.0, 100.0);

        let recommendation = if score >= 70.0 {
            Recommendation::Favorable
        } else if score >= 50.0 {
            Recommendation::Neutral
        } else {
            Recommendation::Unfavorable
        };

        (score, recommendation)
    }
}

impl Default for WinningPatternsIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use core_types::TradeAction;
    use memory_store::{MarketContext, SmartMoneyContext};
    use sqlx::any::{install_default_drivers, AnyPool};

    async fn seeded_store() -> MemoryStore {
        install_default_drivers();
        let pool = AnyPool::connect("sqlite::memory:").await.unwrap();
        let store = MemoryStore::new(pool);
        store.migrate().await.unwrap();

        for _ in 0..5 {
            let id = store
                .create_trade_memory(
                    "agent-1",
                    "AAPL",
                    TradeAction::Buy,
                    100.0,
                    10.0,
                    "dip buy",
                    80.0,
                    &MarketContext {
                        rsi_value: Some(25.0),
                        volume_ratio: Some(1.8),
                        market_trend: Some("BULLISH".to_string()),
                        ..Default::default()
                    },
                    &SmartMoneyContext::default(),
                )
                .await
                .unwrap();
            store.close_trade_memory(id, 130.0, None, None).await.unwrap();
        }

        store
    }

    #[tokio::test]
    async fn refresh_picks_up_winning_memories() {
        let store = seeded_store().await;
        let index = WinningPatternsIndex::new();
        let count = index.refresh(&store).await.unwrap();
        assert_eq!(count, 5);
    }

    #[tokio::test]
    async fn matching_setup_scores_favorably() {
        let store = seeded_store().await;
        let index = WinningPatternsIndex::new();
        index.refresh(&store).await.unwrap();

        let (score, recommendation) =
            index.get_pattern_recommendation("AAPL", Some(24.0), None, Some(1.9));
        assert!(score >= 70.0);
        assert_eq!(recommendation, Recommendation::Favorable);
    }

    #[test]
    fn empty_index_is_neutral() {
        let index = WinningPatternsIndex::new();
        let (score, recommendation) = index.get_pattern_recommendation("AAPL", None, None, None);
        assert_eq!(score, 50.0);
        assert_eq!(recommendation, Recommendation::Neutral);
    }
}
