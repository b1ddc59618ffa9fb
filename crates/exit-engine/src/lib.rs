use chrono::{DateTime, Utc};
use core_types::{ExitLevel, ExitReason, ExitSeverity, PositionAction, RiskLevel};
use dashmap::DashMap;
use smart_money::OverallSignal;

const TRAILING_ACTIVATION_PCT: f64 = 0.04;
const TRAILING_TRAIL_PCT: f64 = 0.015;
const TIME_EXIT_DAYS: i64 = 10;
const TIME_EXIT_PNL_BAND: f64 = 0.01;
const PARTIAL_TAKE_PROFIT_PCT: f64 = 0.06;

const BASE_STOP_LOSS_PCT: f64 = 0.03;
const BASE_TAKE_PROFIT_PCT: f64 = 0.06;

/// Per-tick input describing a held position the engine should evaluate for
/// a forced exit. `smart_signal` is the current global smart-money overall
/// signal, not a per-symbol one, matching how the orchestrator shares a
/// single snapshot across its tick.
#[derive(Debug, Clone)]
pub struct TickInput {
    pub agent_id: String,
    pub symbol: String,
    pub current_price: f64,
    pub quantity: f64,
    pub smart_signal: OverallSignal,
    pub holding_days: i64,
}

pub struct ExitEngine {
    levels: DashMap<(String, String), ExitLevel>,
    /// Enables the off-by-default +6% partial take-profit.
    pub partial_take_profit_enabled: bool,
}

fn adaptive_stop_loss_pct(vix: f64, confidence: f64, risk_level: RiskLevel) -> f64 {
    let mut pct = BASE_STOP_LOSS_PCT;
    if vix > 30.0 {
        pct *= 0.8;
    } else if vix < 15.0 {
        pct *= 1.1;
    }
    if confidence < 60.0 {
        pct *= 0.8;
    } else if confidence >= 85.0 {
        pct *= 1.1;
    }
    if risk_level == RiskLevel::High {
        pct *= 0.85;
    }
    pct.clamp(0.02, 0.06)
}

fn adaptive_take_profit_pct(vix: f64, confidence: f64, risk_level: RiskLevel, smart_signal: OverallSignal) -> f64 {
    let mut pct = BASE_TAKE_PROFIT_PCT;
    if vix > 30.0 {
        pct *= 0.8;
    } else if vix < 15.0 {
        pct *= 1.1;
    }
    if confidence < 60.0 {
        pct *= 0.8;
    } else if confidence >= 85.0 {
        pct *= 1.1;
    }
    if risk_level == RiskLevel::High {
        pct *= 0.85;
    }
    pct *= match smart_signal {
        OverallSignal::StrongBullish | OverallSignal::Bullish => 1.1,
        OverallSignal::StrongBearish | OverallSignal::Bearish => 0.9,
        OverallSignal::Neutral => 1.0,
    };
    pct.clamp(0.04, 0.15)
}

impl ExitEngine {
    pub fn new() -> Self {
        ExitEngine {
            levels: DashMap::new(),
            partial_take_profit_enabled: false,
        }
    }

    pub fn create_exit_levels(
        &self,
        agent_id: &str,
        symbol: &str,
        entry_price: f64,
        entry_time: DateTime<Utc>,
        confidence: f64,
        risk_level: RiskLevel,
        vix: f64,
        smart_signal: OverallSignal,
    ) -> ExitLevel {
        let stop_loss_pct = adaptive_stop_loss_pct(vix, confidence, risk_level);
        let take_profit_pct = adaptive_take_profit_pct(vix, confidence, risk_level, smart_signal);

        ExitLevel {
            agent_id: agent_id.to_string(),
            symbol: symbol.to_string(),
            entry_price,
            entry_time,
            stop_loss_price: entry_price * (1.0 - stop_loss_pct),
            stop_loss_pct,
            take_profit_price: entry_price * (1.0 + take_profit_pct),
            take_profit_pct,
            trailing_active: false,
            trailing_stop_price: None,
            highest_price_seen: entry_price,
            reasoning: format!(
                "SL {:.1}% / TP {:.1}% adaptive to VIX {:.1}, confidence {:.0}, risk {:?}",
                stop_loss_pct * 100.0,
                take_profit_pct * 100.0,
                vix,
                confidence,
                risk_level
            ),
        }
    }

    pub fn register(&self, level: ExitLevel) {
        self.levels.insert((level.agent_id.clone(), level.symbol.clone()), level);
    }

    pub fn remove(&self, agent_id: &str, symbol: &str) {
        self.levels.remove(&(agent_id.to_string(), symbol.to_string()));
    }

    pub fn get(&self, agent_id: &str, symbol: &str) -> Option<ExitLevel> {
        self.levels.get(&(agent_id.to_string(), symbol.to_string())).map(|l| l.clone())
    }

    /// Price at which the optional partial take-profit would trigger, selling
    /// half the position and rearming the trailing stop on the remainder.
    /// Not wired into `sweep` - it stays off unless the orchestrator opts in
    /// via `partial_take_profit_enabled` and drives it explicitly.
    pub fn partial_take_profit_price(&self, agent_id: &str, symbol: &str) -> Option<f64> {
        if !self.partial_take_profit_enabled {
            return None;
        }
        self.get(agent_id, symbol)
            .map(|level| level.entry_price * (1.0 + PARTIAL_TAKE_PROFIT_PCT))
    }

    /// Evaluates every registered exit level against this tick's inputs, in
    /// priority order (stop-loss, take-profit, trailing stop, time exit,
    /// signal exit), mutating trailing-stop bookkeeping as it goes.
    pub fn sweep(&self, inputs: &[TickInput]) -> Vec<PositionAction> {
        let mut actions = Vec::new();

        for input in inputs {
            let key = (input.agent_id.clone(), input.symbol.clone());
            let Some(mut level) = self.levels.get_mut(&key) else {
                continue;
            };

            let pnl_pct = (input.current_price - level.entry_price) / level.entry_price;

            if input.current_price <= level.stop_loss_price {
                actions.push(forced_exit(
                    &*level,
                    input,
                    ExitReason::StopLoss,
                    ExitSeverity::Critical,
                ));
                continue;
            }

            if input.current_price >= level.take_profit_price {
                actions.push(forced_exit(
                    &*level,
                    input,
                    ExitReason::TakeProfit,
                    ExitSeverity::High,
                ));
                continue;
            }

            if pnl_pct >= TRAILING_ACTIVATION_PCT {
                level.trailing_active = true;
            }
            if level.trailing_active {
                if input.current_price > level.highest_price_seen {
                    level.highest_price_seen = input.current_price;
                }
                let trailing_stop = level.highest_price_seen * (1.0 - TRAILING_TRAIL_PCT);
                level.trailing_stop_price = Some(trailing_stop);
                if input.current_price <= trailing_stop {
                    actions.push(forced_exit(
                        &*level,
                        input,
                        ExitReason::TrailingStop,
                        ExitSeverity::High,
                    ));
                    continue;
                }
            }

            if input.holding_days >= TIME_EXIT_DAYS && pnl_pct.abs() < TIME_EXIT_PNL_BAND {
                actions.push(forced_exit(&*level, input, ExitReason::TimeExit, ExitSeverity::Medium));
                continue;
            }

            if input.smart_signal == OverallSignal::StrongBearish && pnl_pct > 0.0 {
                actions.push(forced_exit(&*level, input, ExitReason::SignalExit, ExitSeverity::Medium));
                continue;
            }
        }

        actions
    }
}

fn forced_exit(level: &ExitLevel, input: &TickInput, reason: ExitReason, severity: ExitSeverity) -> PositionAction {
    let pnl = (input.current_price - level.entry_price) * input.quantity;
    PositionAction {
        reason,
        severity,
        symbol: input.symbol.clone(),
        agent_id: input.agent_id.clone(),
        price: input.current_price,
        quantity: input.quantity,
        pnl,
    }
}

impl Default for ExitEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn level(entry: f64) -> ExitLevel {
        ExitLevel {
            agent_id: "agent-1".to_string(),
            symbol: "AAPL".to_string(),
            entry_price: entry,
            entry_time: Utc::now(),
            stop_loss_price: entry * 0.97,
            stop_loss_pct: 0.03,
            take_profit_price: entry * 1.06,
            take_profit_pct: 0.06,
            trailing_active: false,
            trailing_stop_price: None,
            highest_price_seen: entry,
            reasoning: "test".to_string(),
        }
    }

    fn input(price: f64, holding_days: i64) -> TickInput {
        TickInput {
            agent_id: "agent-1".to_string(),
            symbol: "AAPL".to_string(),
            current_price: price,
            quantity: 10.0,
            smart_signal: OverallSignal::Neutral,
            holding_days,
        }
    }

    #[test]
    fn stop_loss_triggers_below_threshold() {
        let engine = ExitEngine::new();
        engine.register(level(100.0));
        let actions = engine.sweep(&[input(96.0, 1)]);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].reason, ExitReason::StopLoss);
        assert_eq!(actions[0].severity, ExitSeverity::Critical);
    }

    #[test]
    fn take_profit_triggers_above_threshold() {
        let engine = ExitEngine::new();
        engine.register(level(100.0));
        let actions = engine.sweep(&[input(107.0, 1)]);
        assert_eq!(actions[0].reason, ExitReason::TakeProfit);
    }

    #[test]
    fn trailing_stop_activates_and_triggers_on_pullback() {
        let engine = ExitEngine::new();
        engine.register(level(100.0));
        let none = engine.sweep(&[input(105.0, 1)]);
        assert!(none.is_empty());
        let stored = engine.get("agent-1", "AAPL").unwrap();
        assert!(stored.trailing_active);

        let actions = engine.sweep(&[input(103.0, 1)]);
        assert_eq!(actions[0].reason, ExitReason::TrailingStop);
    }

    #[test]
    fn stale_flat_position_times_out() {
        let engine = ExitEngine::new();
        engine.register(level(100.0));
        let actions = engine.sweep(&[input(100.3, 12)]);
        assert_eq!(actions[0].reason, ExitReason::TimeExit);
    }

    #[test]
    fn strong_bearish_signal_exits_winning_position() {
        let engine = ExitEngine::new();
        engine.register(level(100.0));
        let mut tick = input(102.0, 2);
        tick.smart_signal = OverallSignal::StrongBearish;
        let actions = engine.sweep(&[tick]);
        assert_eq!(actions[0].reason, ExitReason::SignalExit);
    }
}
