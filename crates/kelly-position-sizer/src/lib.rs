use core_types::{AgentStatistics, RiskLevel};
use serde::{Deserialize, Serialize};

/// Inputs the Kelly Sizer needs beyond an agent's historical statistics.
/// Everything here is a plain value read once per call; the sizer performs
/// no I/O of its own.
#[derive(Debug, Clone)]
pub struct SizingContext<'a> {
    pub stats: Option<&'a AgentStatistics>,
    pub capital: f64,
    pub confidence: f64,
    pub risk_level: RiskLevel,
    pub vix: f64,
    pub consecutive_wins: u32,
    pub consecutive_losses: u32,
    /// `Some(true)` when the smart-money overall signal agrees with the
    /// decision direction, `Some(false)` when it opposes it, `None` when no
    /// smart-money snapshot was available for this tick.
    pub smart_money_aligned: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSizing {
    pub recommended_amount: f64,
    pub position_pct: f64,
    pub kelly_fraction: f64,
    pub adjusted_kelly: f64,
    pub confidence_factor: f64,
    pub risk_factor: f64,
    pub max_loss: f64,
    pub reasoning: String,
}

const MIN_POSITION_PCT: f64 = 0.01;
const MAX_POSITION_PCT: f64 = 0.10;

pub struct KellySizer;

impl KellySizer {
    pub fn new() -> Self {
        KellySizer
    }

    /// Raw Kelly fraction `f = w - (1-w)/r`, zero when the win/loss ratio
    /// implies no edge.
    fn raw_kelly(win_rate: f64, win_loss_ratio: f64) -> f64 {
        if win_loss_ratio <= 0.0 {
            return 0.0;
        }
        win_rate - (1.0 - win_rate) / win_loss_ratio
    }

    fn vix_dynamic_factor(vix: f64) -> f64 {
        if vix < 15.0 {
            1.5
        } else if vix > 30.0 {
            0.5
        } else {
            // Linear interpolation between (15, 1.5) and (30, 0.5).
            1.5 + (vix - 15.0) / (30.0 - 15.0) * (0.5 - 1.5)
        }
    }

    fn streak_factor(consecutive_wins: u32, consecutive_losses: u32) -> f64 {
        if consecutive_wins >= 5 {
            1.2
        } else if consecutive_losses >= 3 {
            0.6
        } else {
            1.0
        }
    }

    fn confidence_factor(confidence: f64) -> f64 {
        if confidence < 50.0 {
            0.3
        } else if confidence < 60.0 {
            0.5
        } else if confidence < 70.0 {
            0.7
        } else if confidence < 80.0 {
            0.85
        } else if confidence < 90.0 {
            1.0
        } else {
            1.1
        }
    }

    fn risk_factor(vix: f64, risk_level: RiskLevel, smart_money_aligned: Option<bool>) -> f64 {
        let mut factor = 1.0;

        if vix < 15.0 {
            factor *= 1.10;
        } else if vix > 35.0 {
            factor *= 0.5;
        } else if vix > 25.0 {
            factor *= 0.80;
        }

        factor *= match risk_level {
            RiskLevel::Low => 1.10,
            RiskLevel::High => 0.80,
            RiskLevel::Medium => 1.0,
        };

        match smart_money_aligned {
            Some(true) => factor *= 1.10,
            Some(false) => factor *= 0.90,
            None => {}
        }

        factor.clamp(0.4, 1.3)
    }

    pub fn size(&self, ctx: &SizingContext) -> PositionSizing {
        let default_stats = AgentStatistics::default();
        let stats = ctx.stats.unwrap_or(&default_stats);

        let kelly_fraction = Self::raw_kelly(stats.win_rate, stats.win_loss_ratio);

        let dynamic_multiplier = 0.5
            * Self::vix_dynamic_factor(ctx.vix)
            * Self::streak_factor(ctx.consecutive_wins, ctx.consecutive_losses);

        let confidence_factor = Self::confidence_factor(ctx.confidence);
        let risk_factor = Self::risk_factor(ctx.vix, ctx.risk_level, ctx.smart_money_aligned);

        let adjusted_kelly = kelly_fraction * dynamic_multiplier * confidence_factor * risk_factor;

        let position_pct = if kelly_fraction <= 0.0 {
            MIN_POSITION_PCT
        } else {
            adjusted_kelly.clamp(MIN_POSITION_PCT, MAX_POSITION_PCT)
        };

        let recommended_amount = ctx.capital * position_pct;
        let max_loss = recommended_amount * 0.05;

        let reasoning = format!(
            "raw kelly {:.3}, dynamic x{:.2}, confidence x{:.2}, risk x{:.2} -> {:.2}% of capital",
            kelly_fraction,
            dynamic_multiplier,
            confidence_factor,
            risk_factor,
            position_pct * 100.0
        );

        PositionSizing {
            recommended_amount,
            position_pct,
            kelly_fraction,
            adjusted_kelly,
            confidence_factor,
            risk_factor,
            max_loss,
            reasoning,
        }
    }

    /// Table of recommended dollar amounts at fixed confidence levels, used
    /// to give an agent's LLM prompt a concrete sense of scale.
    pub fn cheat_sheet(&self, ctx: &SizingContext) -> Vec<(u32, f64)> {
        [50u32, 60, 70, 80, 90, 95]
            .into_iter()
            .map(|confidence| {
                let mut probe = ctx.clone();
                probe.confidence = confidence as f64;
                (confidence, self.size(&probe).recommended_amount)
            })
            .collect()
    }
}

impl Default for KellySizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn base_stats() -> AgentStatistics {
        AgentStatistics {
            total_trades: 50,
            win_rate: 0.60,
            win_loss_ratio: 2.0,
            avg_win_pct: 4.0,
            avg_loss_pct: -2.0,
            kelly_fraction: 0.0,
        }
    }

    #[test]
    fn raw_kelly_matches_formula() {
        let f = KellySizer::raw_kelly(0.60, 2.0);
        assert_relative_eq!(f, 0.4, epsilon = 1e-9);
    }

    #[test]
    fn non_positive_ratio_yields_zero_edge() {
        assert_eq!(KellySizer::raw_kelly(0.6, 0.0), 0.0);
        assert_eq!(KellySizer::raw_kelly(0.6, -1.0), 0.0);
    }

    #[test]
    fn no_edge_floors_to_minimum() {
        let sizer = KellySizer::new();
        let stats = AgentStatistics {
            win_rate: 0.40,
            win_loss_ratio: 1.0,
            ..base_stats()
        };
        let ctx = SizingContext {
            stats: Some(&stats),
            capital: 10_000.0,
            confidence: 80.0,
            risk_level: RiskLevel::Medium,
            vix: 20.0,
            consecutive_wins: 0,
            consecutive_losses: 0,
            smart_money_aligned: None,
        };
        let sizing = sizer.size(&ctx);
        assert_relative_eq!(sizing.position_pct, MIN_POSITION_PCT, epsilon = 1e-9);
    }

    #[test]
    fn strong_edge_is_capped_at_max_position() {
        let sizer = KellySizer::new();
        let stats = AgentStatistics {
            win_rate: 0.75,
            win_loss_ratio: 3.0,
            ..base_stats()
        };
        let ctx = SizingContext {
            stats: Some(&stats),
            capital: 10_000.0,
            confidence: 95.0,
            risk_level: RiskLevel::Low,
            vix: 12.0,
            consecutive_wins: 6,
            consecutive_losses: 0,
            smart_money_aligned: Some(true),
        };
        let sizing = sizer.size(&ctx);
        assert_relative_eq!(sizing.position_pct, MAX_POSITION_PCT, epsilon = 1e-9);
        assert_relative_eq!(sizing.max_loss, sizing.recommended_amount * 0.05, epsilon = 1e-9);
    }

    #[test]
    fn missing_stats_uses_defaults() {
        let sizer = KellySizer::new();
        let ctx = SizingContext {
            stats: None,
            capital: 10_000.0,
            confidence: 70.0,
            risk_level: RiskLevel::Medium,
            vix: 22.0,
            consecutive_wins: 0,
            consecutive_losses: 0,
            smart_money_aligned: None,
        };
        let sizing = sizer.size(&ctx);
        assert_relative_eq!(sizing.kelly_fraction, KellySizer::raw_kelly(0.50, 1.5), epsilon = 1e-9);
    }

    #[test]
    fn cheat_sheet_is_monotone_in_confidence() {
        let sizer = KellySizer::new();
        let stats = base_stats();
        let ctx = SizingContext {
            stats: Some(&stats),
            capital: 10_000.0,
            confidence: 70.0,
            risk_level: RiskLevel::Medium,
            vix: 20.0,
            consecutive_wins: 0,
            consecutive_losses: 0,
            smart_money_aligned: None,
        };
        let sheet = sizer.cheat_sheet(&ctx);
        assert_eq!(sheet.len(), 6);
        for pair in sheet.windows(2) {
            assert!(pair[1].1 >= pair[0].1);
        }
    }
}
