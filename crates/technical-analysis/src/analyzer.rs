use chrono::{DateTime, Utc};
use core_types::Bar;
use serde::{Deserialize, Serialize};

use crate::indicators::{macd, rsi, sma, support_resistance};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RsiSignal {
    Oversold,
    ApproachingOversold,
    Neutral,
    ApproachingOverbought,
    Overbought,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VolumeSignal {
    VeryHigh,
    High,
    Normal,
    Low,
    VeryLow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrendDirection {
    StrongBullish,
    Bullish,
    Neutral,
    Bearish,
    StrongBearish,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicalAnalysis {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub rsi: f64,
    pub rsi_signal: RsiSignal,
    pub macd_line: f64,
    pub macd_signal_line: f64,
    pub macd_histogram: f64,
    pub support_level: Option<f64>,
    pub resistance_level: Option<f64>,
    pub volume_ratio: f64,
    pub avg_volume_20d: f64,
    pub volume_signal: VolumeSignal,
    pub trend: TrendDirection,
    pub trend_strength: f64,
    pub bullish_score: f64,
}

fn classify_rsi(value: f64) -> RsiSignal {
    if value < 30.0 {
        RsiSignal::Oversold
    } else if value < 40.0 {
        RsiSignal::ApproachingOversold
    } else if value <= 60.0 {
        RsiSignal::Neutral
    } else if value < 70.0 {
        RsiSignal::ApproachingOverbought
    } else {
        RsiSignal::Overbought
    }
}

fn classify_volume(ratio: f64) -> VolumeSignal {
    if ratio > 2.0 {
        VolumeSignal::VeryHigh
    } else if ratio > 1.3 {
        VolumeSignal::High
    } else if ratio < 0.5 {
        VolumeSignal::VeryLow
    } else if ratio < 0.7 {
        VolumeSignal::Low
    } else {
        VolumeSignal::Normal
    }
}

fn volume_multiplier(signal: VolumeSignal) -> f64 {
    match signal {
        VolumeSignal::VeryHigh => 1.2,
        VolumeSignal::High => 1.1,
        VolumeSignal::Normal => 1.0,
        VolumeSignal::Low => 0.9,
        VolumeSignal::VeryLow => 0.8,
    }
}

fn classify_trend(strength: f64) -> TrendDirection {
    if strength >= 75.0 {
        TrendDirection::StrongBullish
    } else if strength >= 60.0 {
        TrendDirection::Bullish
    } else if strength <= 25.0 {
        TrendDirection::StrongBearish
    } else if strength <= 40.0 {
        TrendDirection::Bearish
    } else {
        TrendDirection::Neutral
    }
}

/// Price-trend sub-score: SMA(10) vs SMA(20), thresholded at +/-2%.
fn price_trend_score(closes: &[f64]) -> f64 {
    let sma_10 = sma(closes, 10);
    let sma_20 = sma(closes, 20);
    let (Some(&fast), Some(&slow)) = (sma_10.last(), sma_20.last()) else {
        return 50.0;
    };
    if slow == 0.0 {
        return 50.0;
    }
    let pct_diff = (fast - slow) / slow;
    (50.0 + (pct_diff / 0.02) * 50.0).clamp(0.0, 100.0)
}

/// RSI sub-score: U-shaped, oversold readings favor a bullish score.
fn rsi_trend_score(rsi_value: f64) -> f64 {
    let base = 100.0 - rsi_value;
    let boosted = if rsi_value < 30.0 {
        base * 1.1
    } else if rsi_value > 70.0 {
        base * 1.1
    } else {
        base
    };
    boosted.clamp(0.0, 100.0)
}

/// MACD sub-score: crossovers push the score toward the extremes.
fn macd_trend_score(macd_result: &crate::indicators::MacdResult) -> f64 {
    let hist = &macd_result.histogram;
    let Some(&last) = hist.last() else {
        return 50.0;
    };
    let magnitude = (last.abs().min(2.0) / 2.0) * 50.0;
    let mut score = if last > 0.0 {
        50.0 + magnitude
    } else if last < 0.0 {
        50.0 - magnitude
    } else {
        50.0
    };

    if hist.len() >= 2 {
        let prev = hist[hist.len() - 2];
        let crossed_up = prev <= 0.0 && last > 0.0;
        let crossed_down = prev >= 0.0 && last < 0.0;
        if crossed_up {
            score = (score + 20.0).min(100.0);
        } else if crossed_down {
            score = (score - 20.0).max(0.0);
        }
    }

    score
}

pub struct TechnicalAnalyzer;

impl Default for TechnicalAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl TechnicalAnalyzer {
    pub fn new() -> Self {
        TechnicalAnalyzer
    }

    /// Computes a full technical read on `bars`. Returns `None` when fewer
    /// than 30 bars are available rather than a partial result.
    pub fn analyze(&self, symbol: &str, bars: &[Bar]) -> Option<TechnicalAnalysis> {
        if bars.len() < 30 {
            return None;
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

        let rsi_values = rsi(&closes, 14);
        let last_rsi = if closes.len() < 15 {
            50.0
        } else {
            rsi_values.last().copied().unwrap_or(50.0)
        };

        let macd_result = macd(&closes, 12, 26, 9);
        let macd_line = macd_result.macd_line.last().copied().unwrap_or(0.0);
        let macd_signal_line = macd_result.signal_line.last().copied().unwrap_or(0.0);
        let macd_histogram = macd_result.histogram.last().copied().unwrap_or(0.0);

        let lookback = 20.min(bars.len().saturating_sub(1)).max(1);
        let sr = support_resistance(bars, lookback);

        let last_volume = *volumes.last().unwrap();
        let prior_end = volumes.len() - 1;
        let prior_start = prior_end.saturating_sub(20);
        let prior_window = &volumes[prior_start..prior_end];
        let avg_volume_20d = if prior_window.is_empty() {
            last_volume
        } else {
            prior_window.iter().sum::<f64>() / prior_window.len() as f64
        };
        let volume_ratio = if avg_volume_20d > 0.0 {
            last_volume / avg_volume_20d
        } else {
            1.0
        };
        let volume_signal = classify_volume(volume_ratio);

        let price_score = price_trend_score(&closes);
        let rsi_score = rsi_trend_score(last_rsi);
        let macd_score = macd_trend_score(&macd_result);
        let weighted = 0.3 * price_score + 0.3 * rsi_score + 0.4 * macd_score;
        let multiplier = volume_multiplier(volume_signal);
        let trend_strength = ((weighted - 50.0) * multiplier + 50.0).clamp(0.0, 100.0);

        Some(TechnicalAnalysis {
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            rsi: last_rsi,
            rsi_signal: classify_rsi(last_rsi),
            macd_line,
            macd_signal_line,
            macd_histogram,
            support_level: sr.support,
            resistance_level: sr.resistance,
            volume_ratio,
            avg_volume_20d,
            volume_signal,
            trend: classify_trend(trend_strength),
            trend_strength,
            bullish_score: trend_strength,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn make_bars(closes: &[f64], volume: f64) -> Vec<Bar> {
        let start = Utc::now();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                timestamp: start + Duration::days(i as i64),
                open: c,
                high: c * 1.01,
                low: c * 0.99,
                close: c,
                volume,
                vwap: None,
            })
            .collect()
    }

    #[test]
    fn fewer_than_30_bars_returns_none() {
        let bars = make_bars(&[100.0; 20], 1_000_000.0);
        assert!(TechnicalAnalyzer::new().analyze("TEST", &bars).is_none());
    }

    #[test]
    fn uptrend_yields_bullish_classification() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let bars = make_bars(&closes, 1_000_000.0);
        let analysis = TechnicalAnalyzer::new().analyze("TEST", &bars).unwrap();
        assert!(analysis.trend_strength > 50.0);
        assert!(matches!(
            analysis.trend,
            TrendDirection::Bullish | TrendDirection::StrongBullish
        ));
    }

    #[test]
    fn downtrend_yields_bearish_classification() {
        let closes: Vec<f64> = (0..40).map(|i| 200.0 - i as f64).collect();
        let bars = make_bars(&closes, 1_000_000.0);
        let analysis = TechnicalAnalyzer::new().analyze("TEST", &bars).unwrap();
        assert!(analysis.trend_strength < 50.0);
        assert!(matches!(
            analysis.trend,
            TrendDirection::Bearish | TrendDirection::StrongBearish
        ));
    }

    #[test]
    fn volume_ratio_is_last_bar_over_prior_window() {
        let mut bars = make_bars(&vec![100.0; 35], 1_000_000.0);
        bars.last_mut().unwrap().volume = 3_000_000.0;
        let analysis = TechnicalAnalyzer::new().analyze("TEST", &bars).unwrap();
        assert!((analysis.volume_ratio - 3.0).abs() < 1e-6);
        assert_eq!(analysis.volume_signal, VolumeSignal::VeryHigh);
    }
}
