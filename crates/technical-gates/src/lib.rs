use core_types::TradeAction;
use serde::{Deserialize, Serialize};
use technical_analysis::{RsiSignal, TechnicalAnalysis, TrendDirection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GateDecision {
    Allowed,
    Warning,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResult {
    pub decision: GateDecision,
    pub can_proceed: bool,
    pub reasons: Vec<&'static str>,
    pub messages: Vec<String>,
    pub risk_score: u32,
}

impl GateResult {
    fn allowed() -> Self {
        GateResult {
            decision: GateDecision::Allowed,
            can_proceed: true,
            reasons: Vec::new(),
            messages: Vec::new(),
            risk_score: 0,
        }
    }
}

struct Accumulator {
    risk_score: u32,
    blocked: bool,
    reasons: Vec<&'static str>,
    messages: Vec<String>,
}

impl Accumulator {
    fn new() -> Self {
        Accumulator {
            risk_score: 0,
            blocked: false,
            reasons: Vec::new(),
            messages: Vec::new(),
        }
    }

    fn add(&mut self, points: u32, reason: &'static str, message: impl Into<String>, blocks: bool) {
        self.risk_score += points;
        self.reasons.push(reason);
        self.messages.push(message.into());
        if blocks {
            self.blocked = true;
        }
    }

    fn force_blocked(&mut self, reason: &'static str, message: impl Into<String>) {
        self.risk_score = 100;
        self.blocked = true;
        self.reasons.push(reason);
        self.messages.push(message.into());
    }

    fn finish(self) -> GateResult {
        let risk_score = self.risk_score.min(100);
        let decision = if self.blocked {
            GateDecision::Blocked
        } else if risk_score > 30 {
            GateDecision::Warning
        } else {
            GateDecision::Allowed
        };
        GateResult {
            decision,
            can_proceed: !self.blocked,
            reasons: self.reasons,
            messages: self.messages,
            risk_score,
        }
    }
}

/// Evaluates a prospective BUY or SELL against the technical read, applying
/// the cumulative-risk veto rules. HOLD always passes.
pub fn evaluate_gate(action: TradeAction, ta: &TechnicalAnalysis) -> GateResult {
    match action {
        TradeAction::Hold => GateResult::allowed(),
        TradeAction::Buy => evaluate_buy(ta),
        TradeAction::Sell => evaluate_sell(ta),
    }
}

fn evaluate_buy(ta: &TechnicalAnalysis) -> GateResult {
    let mut acc = Accumulator::new();

    if ta.rsi > 75.0 {
        acc.add(50, "rsi_overbought", format!("RSI {:.1} is severely overbought", ta.rsi), true);
    } else if ta.rsi > 65.0 {
        acc.add(25, "rsi_elevated", format!("RSI {:.1} is elevated", ta.rsi), false);
    }

    let macd_bearish_cross = ta.macd_line < ta.macd_signal_line && ta.macd_line < 0.0;
    if macd_bearish_cross && ta.macd_line < -0.5 {
        acc.add(40, "macd_bearish_strong", "MACD deeply negative and below signal", true);
    } else if macd_bearish_cross {
        acc.add(20, "macd_bearish", "MACD negative and below signal", false);
    }

    if ta.macd_histogram < -0.5 {
        acc.add(15, "macd_histogram_negative", "MACD histogram strongly negative", false);
    }

    if ta.volume_ratio < 0.5 {
        acc.add(20, "volume_very_low", "volume well below average", false);
    } else if ta.volume_ratio < 0.8 {
        acc.add(10, "volume_low", "volume below average", false);
    }

    if matches!(ta.trend, TrendDirection::Bearish | TrendDirection::StrongBearish) {
        acc.add(15, "trend_bearish", "prevailing trend is bearish", false);
    }

    if ta.rsi > 70.0 && ta.macd_line < 0.0 {
        acc.force_blocked("rsi_macd_combo", "RSI overbought combined with negative MACD");
    }

    acc.finish()
}

fn evaluate_sell(ta: &TechnicalAnalysis) -> GateResult {
    let mut acc = Accumulator::new();

    if ta.rsi < 25.0 {
        acc.add(50, "rsi_oversold", format!("RSI {:.1} is severely oversold", ta.rsi), true);
    } else if ta.rsi < 35.0 {
        acc.add(25, "rsi_depressed", format!("RSI {:.1} is depressed", ta.rsi), false);
    }

    let macd_bullish_cross = ta.macd_line > ta.macd_signal_line && ta.macd_line > 0.0;
    if macd_bullish_cross && ta.macd_line > 0.5 {
        acc.add(40, "macd_bullish_strong", "MACD strongly positive and above signal", true);
    } else if macd_bullish_cross {
        acc.add(20, "macd_bullish", "MACD positive and above signal", false);
    }

    if ta.macd_histogram > 0.5 {
        acc.add(15, "macd_histogram_positive", "MACD histogram strongly positive", false);
    }

    if ta.volume_ratio < 0.5 {
        acc.add(20, "volume_very_low", "volume well below average", false);
    } else if ta.volume_ratio < 0.8 {
        acc.add(10, "volume_low", "volume below average", false);
    }

    if matches!(ta.trend, TrendDirection::Bullish | TrendDirection::StrongBullish) {
        acc.add(15, "trend_bullish", "prevailing trend is bullish", false);
    }

    if ta.rsi < 30.0 && ta.macd_line > 0.0 {
        acc.force_blocked("rsi_macd_combo", "RSI oversold combined with positive MACD");
    }

    acc.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn base_ta() -> TechnicalAnalysis {
        TechnicalAnalysis {
            symbol: "TEST".to_string(),
            timestamp: Utc::now(),
            rsi: 50.0,
            rsi_signal: RsiSignal::Neutral,
            macd_line: 0.1,
            macd_signal_line: 0.05,
            macd_histogram: 0.05,
            support_level: None,
            resistance_level: None,
            volume_ratio: 1.0,
            avg_volume_20d: 1_000_000.0,
            volume_signal: technical_analysis::VolumeSignal::Normal,
            trend: TrendDirection::Neutral,
            trend_strength: 50.0,
            bullish_score: 50.0,
        }
    }

    #[test]
    fn hold_is_always_allowed() {
        let ta = base_ta();
        let result = evaluate_gate(TradeAction::Hold, &ta);
        assert_eq!(result.decision, GateDecision::Allowed);
        assert_eq!(result.risk_score, 0);
    }

    #[test]
    fn buy_blocked_on_severe_overbought_rsi() {
        let mut ta = base_ta();
        ta.rsi = 80.0;
        let result = evaluate_gate(TradeAction::Buy, &ta);
        assert_eq!(result.decision, GateDecision::Blocked);
        assert!(!result.can_proceed);
    }

    #[test]
    fn buy_combo_forces_full_risk_score() {
        let mut ta = base_ta();
        ta.rsi = 72.0;
        ta.macd_line = -0.1;
        let result = evaluate_gate(TradeAction::Buy, &ta);
        assert_eq!(result.risk_score, 100);
        assert_eq!(result.decision, GateDecision::Blocked);
    }

    #[test]
    fn buy_moderate_warning_does_not_block() {
        let mut ta = base_ta();
        ta.rsi = 68.0;
        let result = evaluate_gate(TradeAction::Buy, &ta);
        assert_eq!(result.decision, GateDecision::Warning);
        assert!(result.can_proceed);
    }

    #[test]
    fn sell_blocked_on_severe_oversold_rsi() {
        let mut ta = base_ta();
        ta.rsi = 20.0;
        let result = evaluate_gate(TradeAction::Sell, &ta);
        assert_eq!(result.decision, GateDecision::Blocked);
    }
}
