use core_types::TradeAction;
use serde::{Deserialize, Serialize};
use smart_money::{OptionsSentiment, SmartMoneySnapshot};

/// Memory-derived inputs to the blend. Kept as plain fields rather than a
/// dependency on the memory store so the combiner stays pure and easy to
/// test; the caller assembles these from `memory-store` query results.
#[derive(Debug, Clone, Default)]
pub struct MemoryAggregates {
    pub symbol_win_rate: Option<f64>,
    pub confidence_bucket_win_rate: Option<f64>,
    pub recent_negative_lessons: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStrength {
    StrongBuy,
    StrongSell,
    Buy,
    Sell,
    WeakBuy,
    WeakSell,
    Neutral,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinedSignal {
    pub final_score: f64,
    pub final_confidence: f64,
    pub signal_strength: SignalStrength,
    pub sizing_multiplier: f64,
    pub should_proceed: bool,
    pub block_reason: Option<String>,
}

const AI_WEIGHT: f64 = 0.50;
const SM_WEIGHT: f64 = 0.30;
const MEM_WEIGHT: f64 = 0.20;

pub struct SignalCombiner;

impl SignalCombiner {
    pub fn new() -> Self {
        SignalCombiner
    }

    fn smart_money_subscore(decision: TradeAction, snapshot: &SmartMoneySnapshot) -> f64 {
        let mut score = 0.0;

        score += if snapshot.vix < 15.0 {
            0.3
        } else if snapshot.vix > 30.0 {
            -0.3
        } else {
            0.0
        };

        score += if snapshot.fear_greed < 20.0 {
            -0.2
        } else if snapshot.fear_greed > 80.0 {
            0.2
        } else {
            0.0
        };

        let put_call = snapshot.options.put_call_volume_ratio;
        score += if put_call < 0.7 {
            0.2
        } else if put_call > 1.3 {
            -0.2
        } else {
            0.0
        };

        let dp_ratio = snapshot.dark_pool.volume_ratio_5d;
        score += if dp_ratio < 0.45 {
            0.15
        } else if dp_ratio > 0.55 {
            -0.15
        } else {
            0.0
        };

        score += if snapshot.insider.net_sentiment > 0.5 {
            0.15
        } else if snapshot.insider.net_sentiment < -0.5 {
            -0.15
        } else {
            0.0
        };

        let score = score.clamp(-1.0, 1.0);

        if decision == TradeAction::Sell {
            -score
        } else {
            score
        }
    }

    fn memory_subscore(mem: &MemoryAggregates) -> f64 {
        let mut score = 0.0;

        if let Some(win_rate) = mem.symbol_win_rate {
            if win_rate > 0.7 {
                score += 0.3;
            } else if win_rate < 0.4 {
                score -= 0.3;
            }
        }

        if let Some(win_rate) = mem.confidence_bucket_win_rate {
            if win_rate > 0.65 {
                score += 0.2;
            } else if win_rate < 0.45 {
                score -= 0.2;
            }
        }

        if mem.recent_negative_lessons >= 2 {
            score -= 0.2;
        }

        score.clamp(-1.0, 1.0)
    }

    fn regime_guard(snapshot: Option<&SmartMoneySnapshot>, decision: TradeAction) -> (bool, Option<String>, bool) {
        let Some(snapshot) = snapshot else {
            return (true, None, false);
        };

        if decision == TradeAction::Buy && snapshot.vix > 40.0 {
            return (false, Some(format!("VIX {:.1} exceeds 40 - new buys blocked", snapshot.vix)), false);
        }

        if snapshot.fear_greed < 20.0 && snapshot.vix > 30.0 {
            return (
                false,
                Some(format!(
                    "extreme fear ({:.0}) combined with VIX {:.1} - trading blocked",
                    snapshot.fear_greed, snapshot.vix
                )),
                false,
            );
        }

        if snapshot.fear_greed > 80.0 {
            return (true, Some("extreme greed - proceed with caution".to_string()), true);
        }

        (true, None, false)
    }

    pub fn combine(
        &self,
        decision: TradeAction,
        ai_confidence: f64,
        smart_money: Option<&SmartMoneySnapshot>,
        memory: &MemoryAggregates,
    ) -> CombinedSignal {
        let (regime_ok, regime_note, _warns_only) = Self::regime_guard(smart_money, decision);

        let base = (ai_confidence / 100.0).clamp(0.0, 1.0);
        let sm_score = smart_money
            .map(|s| Self::smart_money_subscore(decision, s))
            .unwrap_or(0.0);
        let mem_score = Self::memory_subscore(memory);

        let final_score = AI_WEIGHT * base + SM_WEIGHT * (sm_score + 1.0) / 2.0 + MEM_WEIGHT * (mem_score + 1.0) / 2.0;
        let final_confidence = (final_score * 100.0).round();

        let signal_strength = if !regime_ok {
            SignalStrength::Blocked
        } else {
            classify_strength(decision, final_confidence)
        };

        let mut sizing_multiplier = 1.0;
        if final_confidence >= 90.0 {
            sizing_multiplier *= 1.3;
        } else if final_confidence >= 80.0 {
            sizing_multiplier *= 1.1;
        } else if final_confidence < 60.0 {
            sizing_multiplier *= 0.7;
        }

        if sm_score.abs() > 0.5 {
            sizing_multiplier *= if sm_score > 0.0 { 1.2 } else { 0.6 };
        }
        if mem_score.abs() > 0.5 {
            sizing_multiplier *= if mem_score > 0.0 { 1.1 } else { 0.8 };
        }
        sizing_multiplier = sizing_multiplier.clamp(0.5, 1.5);

        let should_proceed = regime_ok
            && final_confidence >= 50.0
            && !matches!(signal_strength, SignalStrength::Blocked | SignalStrength::Neutral);

        CombinedSignal {
            final_score,
            final_confidence,
            signal_strength,
            sizing_multiplier,
            should_proceed,
            block_reason: regime_note,
        }
    }
}

impl Default for SignalCombiner {
    fn default() -> Self {
        Self::new()
    }
}

fn classify_strength(decision: TradeAction, confidence: f64) -> SignalStrength {
    let is_buy = decision != TradeAction::Sell;
    if confidence >= 85.0 {
        if is_buy { SignalStrength::StrongBuy } else { SignalStrength::StrongSell }
    } else if confidence >= 65.0 {
        if is_buy { SignalStrength::Buy } else { SignalStrength::Sell }
    } else if confidence >= 50.0 {
        if is_buy { SignalStrength::WeakBuy } else { SignalStrength::WeakSell }
    } else {
        SignalStrength::Neutral
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use smart_money::{DarkPoolEstimate, DarkPoolLevel, InsiderSummary, OptionsSummary, OverallSignal};

    fn snapshot(vix: f64, fear_greed: f64) -> SmartMoneySnapshot {
        SmartMoneySnapshot {
            symbol: "AAPL".to_string(),
            timestamp: Utc::now(),
            vix,
            fear_greed,
            options: OptionsSummary {
                put_call_volume_ratio: 0.9,
                put_call_oi_ratio: 0.9,
                unusual_activity_count: 0,
                implied_volatility: 0.2,
                sentiment: OptionsSentiment::Neutral,
            },
            dark_pool: DarkPoolEstimate {
                volume_ratio_5d: 0.5,
                level: DarkPoolLevel::Normal,
                estimated_fraction: 0.4,
            },
            insider: InsiderSummary {
                buys: 0,
                sells: 0,
                net_sentiment: 0.0,
            },
            overall: OverallSignal::Neutral,
            confidence_boost: 0,
        }
    }

    #[test]
    fn extreme_vix_blocks_new_buys() {
        let combiner = SignalCombiner::new();
        let snap = snapshot(45.0, 50.0);
        let result = combiner.combine(TradeAction::Buy, 90.0, Some(&snap), &MemoryAggregates::default());
        assert_eq!(result.signal_strength, SignalStrength::Blocked);
        assert!(!result.should_proceed);
    }

    #[test]
    fn fear_and_high_vix_blocks_any_trade() {
        let combiner = SignalCombiner::new();
        let snap = snapshot(32.0, 15.0);
        let result = combiner.combine(TradeAction::Sell, 90.0, Some(&snap), &MemoryAggregates::default());
        assert_eq!(result.signal_strength, SignalStrength::Blocked);
    }

    #[test]
    fn high_confidence_clean_inputs_proceed() {
        let combiner = SignalCombiner::new();
        let snap = snapshot(18.0, 55.0);
        let mem = MemoryAggregates {
            symbol_win_rate: Some(0.75),
            confidence_bucket_win_rate: Some(0.7),
            recent_negative_lessons: 0,
        };
        let result = combiner.combine(TradeAction::Buy, 85.0, Some(&snap), &mem);
        assert!(result.should_proceed);
        assert!(result.sizing_multiplier > 1.0);
    }

    #[test]
    fn low_confidence_without_smart_money_is_neutral() {
        let combiner = SignalCombiner::new();
        let result = combiner.combine(TradeAction::Buy, 40.0, None, &MemoryAggregates::default());
        assert_eq!(result.signal_strength, SignalStrength::Neutral);
        assert!(!result.should_proceed);
    }
}
