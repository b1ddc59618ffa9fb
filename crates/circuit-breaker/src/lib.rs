use chrono::{DateTime, Datelike, Duration, Utc};
use core_types::{BreakerState, BreakerStatus};
use dashmap::DashMap;

const DAILY_DRAWDOWN_LIMIT: f64 = 0.05;
const WEEKLY_DRAWDOWN_LIMIT: f64 = 0.10;
const MONTHLY_DRAWDOWN_LIMIT: f64 = 0.15;
const CONSECUTIVE_LOSS_LIMIT: u32 = 5;

const DAILY_PAUSE: Duration = Duration::hours(24);
const WEEKLY_PAUSE: Duration = Duration::days(7);
const CONSECUTIVE_PAUSE: Duration = Duration::hours(4);

pub struct CircuitBreaker {
    states: DashMap<String, BreakerState>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        CircuitBreaker {
            states: DashMap::new(),
        }
    }

    fn entry(&self, agent_id: &str, capital: f64) -> BreakerState {
        self.states
            .entry(agent_id.to_string())
            .or_insert_with(|| BreakerState::new(agent_id, capital, Utc::now()))
            .clone()
    }

    fn roll_buckets(state: &mut BreakerState, now: DateTime<Utc>, capital: f64) {
        if now.date_naive() != state.last_reset_daily.date_naive() {
            state.daily_start_capital = capital;
            state.daily_pnl = 0.0;
            state.daily_trades = 0;
            state.last_reset_daily = now;
            if state.status == BreakerStatus::PausedDaily {
                state.status = BreakerStatus::Active;
                state.pause_until = None;
                state.pause_reason = None;
            }
        }

        if now - state.last_reset_weekly >= WEEKLY_PAUSE {
            state.weekly_start_capital = capital;
            state.weekly_pnl = 0.0;
            state.last_reset_weekly = now;
            if state.status == BreakerStatus::PausedWeekly {
                state.status = BreakerStatus::Active;
                state.pause_until = None;
                state.pause_reason = None;
            }
        }

        if now.year() != state.last_reset_monthly.year() || now.month() != state.last_reset_monthly.month() {
            state.monthly_start_capital = capital;
            state.last_reset_monthly = now;
            // A review-required state is terminal and never auto-clears on a
            // calendar boundary; only `reset_agent` releases it.
        }
    }

    /// Resets daily/weekly buckets on calendar-date advance, then evaluates
    /// active pauses and drawdown thresholds. Returns whether trading is
    /// currently allowed and why not when it isn't.
    pub fn can_trade(&self, agent_id: &str, capital: f64) -> (bool, Option<String>) {
        let now = Utc::now();
        let mut state = self.entry(agent_id, capital);
        Self::roll_buckets(&mut state, now, capital);

        if state.status == BreakerStatus::ReviewRequired {
            let reason = state
                .pause_reason
                .clone()
                .unwrap_or_else(|| "monthly drawdown limit breached - review required".to_string());
            self.states.insert(agent_id.to_string(), state);
            return (false, Some(reason));
        }

        if let Some(pause_until) = state.pause_until {
            if now < pause_until {
                let reason = state
                    .pause_reason
                    .clone()
                    .unwrap_or_else(|| "agent paused".to_string());
                self.states.insert(agent_id.to_string(), state);
                return (false, Some(reason));
            }
            state.status = BreakerStatus::Active;
            state.pause_until = None;
            state.pause_reason = None;
        }

        let daily_drawdown = drawdown(state.daily_start_capital, capital);
        let weekly_drawdown = drawdown(state.weekly_start_capital, capital);
        let monthly_drawdown = drawdown(state.monthly_start_capital, capital);

        let result = if monthly_drawdown >= MONTHLY_DRAWDOWN_LIMIT {
            let reason = format!("monthly drawdown {:.1}% >= 15% - review required", monthly_drawdown * 100.0);
            state.status = BreakerStatus::ReviewRequired;
            state.pause_reason = Some(reason.clone());
            state.pause_until = None;
            (false, Some(reason))
        } else if weekly_drawdown >= WEEKLY_DRAWDOWN_LIMIT {
            let reason = format!("weekly drawdown {:.1}% >= 10% - paused 7 days", weekly_drawdown * 100.0);
            state.status = BreakerStatus::PausedWeekly;
            state.pause_until = Some(now + WEEKLY_PAUSE);
            state.pause_reason = Some(reason.clone());
            (false, Some(reason))
        } else if daily_drawdown >= DAILY_DRAWDOWN_LIMIT {
            let reason = format!("daily drawdown {:.1}% >= 5% - paused 24h", daily_drawdown * 100.0);
            state.status = BreakerStatus::PausedDaily;
            state.pause_until = Some(now + DAILY_PAUSE);
            state.pause_reason = Some(reason.clone());
            (false, Some(reason))
        } else if state.consecutive_losses >= CONSECUTIVE_LOSS_LIMIT {
            let reason = format!("{} consecutive losses - paused 4h", state.consecutive_losses);
            state.status = BreakerStatus::PausedConsecutive;
            state.pause_until = Some(now + CONSECUTIVE_PAUSE);
            state.pause_reason = Some(reason.clone());
            (false, Some(reason))
        } else {
            (true, None)
        };

        self.states.insert(agent_id.to_string(), state);
        result
    }

    /// Updates streak/drawdown bookkeeping after a trade closes. `capital` is
    /// the agent's capital after the trade's pnl has been applied.
    pub fn record_trade_result(&self, agent_id: &str, pnl: f64, capital: f64) {
        let now = Utc::now();
        let mut state = self.entry(agent_id, capital);
        Self::roll_buckets(&mut state, now, capital);

        state.daily_pnl += pnl;
        state.weekly_pnl += pnl;
        state.daily_trades += 1;

        if pnl > 0.0 {
            state.consecutive_wins += 1;
            state.consecutive_losses = 0;
        } else if pnl < 0.0 {
            state.consecutive_losses += 1;
            state.consecutive_wins = 0;
        }

        state.sizing_multiplier = if state.consecutive_wins >= 5 {
            1.2
        } else if state.consecutive_losses >= 3 {
            0.7
        } else {
            1.0
        };

        tracing::info!(
            agent_id,
            pnl,
            consecutive_wins = state.consecutive_wins,
            consecutive_losses = state.consecutive_losses,
            "circuit breaker recorded trade result"
        );

        self.states.insert(agent_id.to_string(), state);
    }

    pub fn get_sizing_multiplier(&self, agent_id: &str) -> f64 {
        self.states
            .get(agent_id)
            .map(|s| s.sizing_multiplier)
            .unwrap_or(1.0)
    }

    /// Clears a `REVIEW_REQUIRED` (or any other paused) state back to active.
    /// Requires an explicit operator action; never called automatically.
    pub fn reset_agent(&self, agent_id: &str, capital: f64) {
        let now = Utc::now();
        let mut state = BreakerState::new(agent_id, capital, now);
        state.last_reset_monthly = now;
        self.states.insert(agent_id.to_string(), state);
    }

    pub fn status(&self, agent_id: &str) -> Option<BreakerStatus> {
        self.states.get(agent_id).map(|s| s.status)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

fn drawdown(start_capital: f64, current_capital: f64) -> f64 {
    if start_capital <= 0.0 {
        return 0.0;
    }
    ((start_capital - current_capital) / start_capital).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_agent_can_trade() {
        let breaker = CircuitBreaker::new();
        let (allowed, reason) = breaker.can_trade("agent-1", 10_000.0);
        assert!(allowed);
        assert!(reason.is_none());
    }

    #[test]
    fn daily_drawdown_pauses_trading() {
        let breaker = CircuitBreaker::new();
        breaker.can_trade("agent-1", 10_000.0);
        let (allowed, reason) = breaker.can_trade("agent-1", 9_400.0);
        assert!(!allowed);
        assert!(reason.unwrap().contains("daily drawdown"));
    }

    #[test]
    fn five_consecutive_losses_pause_for_four_hours() {
        let breaker = CircuitBreaker::new();
        breaker.can_trade("agent-1", 10_000.0);
        for _ in 0..5 {
            breaker.record_trade_result("agent-1", -10.0, 9_950.0);
        }
        let (allowed, reason) = breaker.can_trade("agent-1", 9_950.0);
        assert!(!allowed);
        assert!(reason.unwrap().contains("consecutive losses"));
    }

    #[test]
    fn winning_streak_boosts_sizing_multiplier() {
        let breaker = CircuitBreaker::new();
        breaker.can_trade("agent-1", 10_000.0);
        for _ in 0..5 {
            breaker.record_trade_result("agent-1", 50.0, 10_250.0);
        }
        assert_eq!(breaker.get_sizing_multiplier("agent-1"), 1.2);
    }

    #[test]
    fn monthly_drawdown_requires_explicit_reset() {
        let breaker = CircuitBreaker::new();
        breaker.can_trade("agent-1", 10_000.0);
        let (allowed, reason) = breaker.can_trade("agent-1", 8_400.0);
        assert!(!allowed);
        assert!(reason.unwrap().contains("review required"));
        assert_eq!(breaker.status("agent-1"), Some(BreakerStatus::ReviewRequired));

        breaker.reset_agent("agent-1", 8_400.0);
        let (allowed_after_reset, _) = breaker.can_trade("agent-1", 8_400.0);
        assert!(allowed_after_reset);
    }
}
