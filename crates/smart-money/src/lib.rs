use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use core_types::{Bar, CoreError};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptionsSentiment {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionsSummary {
    pub put_call_volume_ratio: f64,
    pub put_call_oi_ratio: f64,
    pub unusual_activity_count: u32,
    pub implied_volatility: f64,
    pub sentiment: OptionsSentiment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DarkPoolLevel {
    High,
    Normal,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DarkPoolEstimate {
    pub volume_ratio_5d: f64,
    pub level: DarkPoolLevel,
    pub estimated_fraction: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsiderSummary {
    pub buys: u32,
    pub sells: u32,
    pub net_sentiment: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallSignal {
    StrongBullish,
    Bullish,
    Neutral,
    Bearish,
    StrongBearish,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartMoneySnapshot {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub vix: f64,
    pub fear_greed: f64,
    pub options: OptionsSummary,
    pub dark_pool: DarkPoolEstimate,
    pub insider: InsiderSummary,
    pub overall: OverallSignal,
    pub confidence_boost: i32,
}

/// Raw upstream inputs a smart-money aggregation needs. Implementations talk
/// to whatever options/dark-pool/insider/sentiment feeds are configured.
#[async_trait]
pub trait SmartMoneySource: Send + Sync {
    async fn options_summary(&self, symbol: &str) -> Result<OptionsSummary, CoreError>;
    async fn dark_pool_volume_ratio_5d(&self, symbol: &str) -> Result<f64, CoreError>;
    async fn insider_summary(&self, symbol: &str) -> Result<InsiderSummary, CoreError>;
    async fn fear_greed_index(&self) -> Result<f64, CoreError>;
    async fn benchmark_bars(&self) -> Result<Vec<Bar>, CoreError>;
}

struct CacheEntry {
    data: SmartMoneySnapshot,
    cached_at: DateTime<Utc>,
}

const CACHE_TTL: Duration = Duration::minutes(15);

pub struct SmartMoneyAggregator<S: SmartMoneySource> {
    source: S,
    cache: DashMap<String, CacheEntry>,
}

impl<S: SmartMoneySource> SmartMoneyAggregator<S> {
    pub fn new(source: S) -> Self {
        SmartMoneyAggregator {
            source,
            cache: DashMap::new(),
        }
    }

    /// Realized-volatility proxy for VIX: annualized stddev of the
    /// benchmark's daily returns, scaled by 100. Not a licensed CBOE feed.
    pub fn vix_proxy(bars: &[Bar]) -> f64 {
        if bars.len() < 2 {
            return 20.0;
        }
        let returns: Vec<f64> = bars
            .windows(2)
            .map(|w| (w[1].close - w[0].close) / w[0].close)
            .collect();
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance =
            returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
        let daily_stddev = variance.sqrt();
        (daily_stddev * (252.0_f64).sqrt() * 100.0).max(1.0)
    }

    pub async fn get_snapshot(&self, symbol: &str) -> Result<SmartMoneySnapshot, CoreError> {
        if let Some(entry) = self.cache.get(symbol) {
            if Utc::now() - entry.cached_at < CACHE_TTL {
                return Ok(entry.data.clone());
            }
        }

        let snapshot = self.compute(symbol).await?;
        self.cache.insert(
            symbol.to_string(),
            CacheEntry {
                data: snapshot.clone(),
                cached_at: Utc::now(),
            },
        );
        Ok(snapshot)
    }

    async fn compute(&self, symbol: &str) -> Result<SmartMoneySnapshot, CoreError> {
        let options = self.source.options_summary(symbol).await?;
        let dark_pool_ratio = self.source.dark_pool_volume_ratio_5d(symbol).await?;
        let insider = self.source.insider_summary(symbol).await?;
        let fear_greed = self.source.fear_greed_index().await?;
        let benchmark = self.source.benchmark_bars().await?;
        let vix = Self::vix_proxy(&benchmark);

        let dark_pool = classify_dark_pool(dark_pool_ratio);
        let (overall, confidence_boost) =
            score_overall(&options, &dark_pool, &insider, fear_greed);

        Ok(SmartMoneySnapshot {
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            vix,
            fear_greed,
            options,
            dark_pool,
            insider,
            overall,
            confidence_boost,
        })
    }
}

fn classify_dark_pool(ratio_5d: f64) -> DarkPoolEstimate {
    let (level, estimated_fraction) = if ratio_5d < 0.7 {
        (DarkPoolLevel::High, 0.50)
    } else if ratio_5d > 1.5 {
        (DarkPoolLevel::Low, 0.30)
    } else {
        (DarkPoolLevel::Normal, 0.40)
    };
    DarkPoolEstimate {
        volume_ratio_5d: ratio_5d,
        level,
        estimated_fraction,
    }
}

fn score_overall(
    options: &OptionsSummary,
    dark_pool: &DarkPoolEstimate,
    insider: &InsiderSummary,
    fear_greed: f64,
) -> (OverallSignal, i32) {
    let mut net = 0i32;

    net += match options.sentiment {
        OptionsSentiment::Bullish => 2,
        OptionsSentiment::Bearish => -2,
        OptionsSentiment::Neutral => 0,
    };

    net += match dark_pool.level {
        DarkPoolLevel::High => 1,
        DarkPoolLevel::Low => -1,
        DarkPoolLevel::Normal => 0,
    };

    net += if insider.net_sentiment > 0.0 {
        2
    } else if insider.net_sentiment < 0.0 {
        -2
    } else {
        0
    };

    net += if fear_greed < 30.0 {
        1
    } else if fear_greed > 70.0 {
        -1
    } else {
        0
    };

    if net >= 3 {
        (OverallSignal::StrongBullish, 10)
    } else if net >= 1 {
        (OverallSignal::Bullish, 5)
    } else if net <= -3 {
        (OverallSignal::StrongBearish, -10)
    } else if net <= -1 {
        (OverallSignal::Bearish, -5)
    } else {
        (OverallSignal::Neutral, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedSource {
        options: OptionsSummary,
        dark_pool_ratio: f64,
        insider: InsiderSummary,
        fear_greed: f64,
        calls: AtomicU32,
    }

    #[async_trait]
    impl SmartMoneySource for FixedSource {
        async fn options_summary(&self, _symbol: &str) -> Result<OptionsSummary, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.options.clone())
        }
        async fn dark_pool_volume_ratio_5d(&self, _symbol: &str) -> Result<f64, CoreError> {
            Ok(self.dark_pool_ratio)
        }
        async fn insider_summary(&self, _symbol: &str) -> Result<InsiderSummary, CoreError> {
            Ok(self.insider.clone())
        }
        async fn fear_greed_index(&self) -> Result<f64, CoreError> {
            Ok(self.fear_greed)
        }
        async fn benchmark_bars(&self) -> Result<Vec<Bar>, CoreError> {
            let start = Utc::now();
            Ok((0..30)
                .map(|i| Bar {
                    timestamp: start + ChronoDuration::days(i),
                    open: 400.0,
                    high: 401.0,
                    low: 399.0,
                    close: 400.0 + (i as f64 % 3.0),
                    volume: 1_000_000.0,
                    vwap: None,
                })
                .collect())
        }
    }

    fn bullish_source() -> FixedSource {
        FixedSource {
            options: OptionsSummary {
                put_call_volume_ratio: 0.6,
                put_call_oi_ratio: 0.6,
                unusual_activity_count: 5,
                implied_volatility: 0.3,
                sentiment: OptionsSentiment::Bullish,
            },
            dark_pool_ratio: 0.5,
            insider: InsiderSummary {
                buys: 4,
                sells: 0,
                net_sentiment: 1.0,
            },
            fear_greed: 20.0,
            calls: AtomicU32::new(0),
        }
    }

    #[tokio::test]
    async fn strongly_bullish_inputs_produce_strong_bullish_overall() {
        let aggregator = SmartMoneyAggregator::new(bullish_source());
        let snapshot = aggregator.get_snapshot("AAPL").await.unwrap();
        assert_eq!(snapshot.overall, OverallSignal::StrongBullish);
        assert_eq!(snapshot.confidence_boost, 10);
    }

    #[tokio::test]
    async fn snapshot_is_cached_within_ttl() {
        let aggregator = SmartMoneyAggregator::new(bullish_source());
        let _ = aggregator.get_snapshot("AAPL").await.unwrap();
        let _ = aggregator.get_snapshot("AAPL").await.unwrap();
        assert_eq!(aggregator.source.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dark_pool_classification_bands() {
        assert_eq!(classify_dark_pool(0.5).level, DarkPoolLevel::High);
        assert_eq!(classify_dark_pool(1.0).level, DarkPoolLevel::Normal);
        assert_eq!(classify_dark_pool(2.0).level, DarkPoolLevel::Low);
    }
}
