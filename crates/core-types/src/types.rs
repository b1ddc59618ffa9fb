use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single OHLCV bar, oldest-first when collected into a slice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default)]
    pub vwap: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TradeAction::Buy => "BUY",
            TradeAction::Sell => "SELL",
            TradeAction::Hold => "HOLD",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// A structured decision as produced by an LLM call, before gate/sizing enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub decision: TradeAction,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub reasoning: String,
    pub confidence: f64,
    #[serde(default = "default_risk_level")]
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub target_price: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
}

fn default_risk_level() -> RiskLevel {
    RiskLevel::Medium
}

impl Decision {
    pub fn hold(reasoning: impl Into<String>) -> Self {
        Self {
            decision: TradeAction::Hold,
            symbol: String::new(),
            quantity: 0.0,
            reasoning: reasoning.into(),
            confidence: 0.0,
            risk_level: RiskLevel::Medium,
            target_price: None,
            stop_loss: None,
        }
    }

    /// Checks the structural invariants a non-HOLD decision must satisfy.
    pub fn validate(&self) -> Result<(), String> {
        if self.decision != TradeAction::Hold {
            if self.symbol.trim().is_empty() {
                return Err("symbol required for BUY/SELL decision".to_string());
            }
            if self.quantity <= 0.0 {
                return Err("quantity must be positive for BUY/SELL decision".to_string());
            }
        }
        Ok(())
    }
}

/// Enriched decision carrying the pipeline's diagnostics and final sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedDecision {
    #[serde(flatten)]
    pub base: Decision,
    pub kelly_amount: f64,
    pub sizing_multiplier: f64,
    pub combined_signal: String,
    pub earnings_size_adjustment: f64,
    pub technical_gates_warning: Option<String>,
    pub gate_reasons: Vec<String>,
}

/// One completed (or pending) order leg.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub decision: TradeAction,
    pub symbol: String,
    pub quantity: f64,
    pub price: f64,
    pub reasoning: String,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub executed: bool,
    pub order_id: Option<String>,
    pub pnl: f64,
}

/// An agent's current holding in one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: f64,
    pub avg_entry_price: f64,
}

/// A trading agent's full mutable state, owned by the orchestrator for the
/// duration of a tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub model_handle: String,
    pub personality: String,
    pub initial_capital: f64,
    pub current_capital: f64,
    pub total_fees: f64,
    pub trade_count: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub positions: HashMap<String, Position>,
    pub history: Vec<TradeRecord>,
    pub last_autocritique: Option<String>,
    pub autocritique_counter: u32,
}

impl Agent {
    pub fn new(id: impl Into<String>, name: impl Into<String>, model_handle: impl Into<String>, personality: impl Into<String>, initial_capital: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            model_handle: model_handle.into(),
            personality: personality.into(),
            initial_capital,
            current_capital: initial_capital,
            total_fees: 0.0,
            trade_count: 0,
            winning_trades: 0,
            losing_trades: 0,
            positions: HashMap::new(),
            history: Vec::new(),
            last_autocritique: None,
            autocritique_counter: 0,
        }
    }

    pub fn performance_pct(&self) -> f64 {
        if self.initial_capital <= 0.0 {
            return 0.0;
        }
        (self.current_capital - self.initial_capital) / self.initial_capital * 100.0
    }

    pub fn win_rate(&self) -> f64 {
        let total = self.winning_trades + self.losing_trades;
        if total == 0 {
            return 0.5;
        }
        self.winning_trades as f64 / total as f64
    }

    /// Deducts a confirmed fee. Never call this for a failed or cancelled order.
    pub fn apply_fee(&mut self, fee: f64) {
        self.current_capital -= fee;
        self.total_fees += fee;
    }

    /// Applies a filled BUY: weighted-average the entry price into the existing position.
    pub fn apply_buy_fill(&mut self, symbol: &str, quantity: f64, price: f64) {
        self.current_capital -= quantity * price;
        let entry = self
            .positions
            .entry(symbol.to_string())
            .or_insert(Position {
                symbol: symbol.to_string(),
                quantity: 0.0,
                avg_entry_price: price,
            });
        let new_qty = entry.quantity + quantity;
        entry.avg_entry_price = (entry.quantity * entry.avg_entry_price + quantity * price) / new_qty;
        entry.quantity = new_qty;
    }

    /// Applies a filled SELL: realizes P/L, increments win/loss counters, removes the
    /// position entirely once its quantity reaches zero.
    pub fn apply_sell_fill(&mut self, symbol: &str, quantity: f64, price: f64) -> f64 {
        self.current_capital += quantity * price;
        let mut realized = 0.0;
        if let Some(pos) = self.positions.get_mut(symbol) {
            realized = (price - pos.avg_entry_price) * quantity;
            pos.quantity -= quantity;
            if realized > 0.0 {
                self.winning_trades += 1;
            } else if realized < 0.0 {
                self.losing_trades += 1;
            }
            if pos.quantity <= 0.0 {
                self.positions.remove(symbol);
            }
        }
        realized
    }
}

/// Tri-state outcome of a TradeMemory: unknown until the position closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeOutcome {
    Unknown,
    Win,
    Loss,
}

/// A long-term learning record: the conditions under which a trade was opened
/// and (once closed) how it resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeMemory {
    pub id: i64,
    pub agent_id: String,
    pub symbol: String,
    pub sector: String,
    pub decision: TradeAction,
    pub entry_price: f64,
    pub quantity: f64,
    pub reasoning: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub exit_price: Option<f64>,
    pub pnl: Option<f64>,
    pub pnl_percent: Option<f64>,
    pub outcome: TradeOutcome,
    pub holding_duration_hours: Option<f64>,
    pub lesson_learned: Option<String>,
    pub market_sentiment: Option<String>,
    pub vix_level: Option<f64>,
    pub market_trend: Option<String>,
    pub rsi_value: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub dark_pool_ratio: Option<f64>,
    pub options_sentiment: Option<String>,
    pub insider_activity: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternType {
    DipBuy,
    Breakout,
    Momentum,
    TrendFollowing,
    OverboughtSell,
    Distribution,
    ProfitTaking,
}

/// A closed, meaningfully profitable trade's full setup snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WinningPattern {
    pub symbol: String,
    pub sector: String,
    pub entry_hour: u32,
    pub entry_weekday: u32,
    pub rsi_at_entry: f64,
    pub macd_bullish: bool,
    pub volume_ratio: f64,
    pub trend: String,
    pub price_vs_sma20_pct: f64,
    pub vix_level: f64,
    pub market_sentiment: String,
    pub pattern_type: PatternType,
    pub pnl_percent: f64,
}

/// Aggregate statistics over an agent's closed trades, used by the Kelly Sizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatistics {
    pub total_trades: u32,
    pub win_rate: f64,
    pub win_loss_ratio: f64,
    pub avg_win_pct: f64,
    pub avg_loss_pct: f64,
    pub kelly_fraction: f64,
}

impl Default for AgentStatistics {
    fn default() -> Self {
        Self {
            total_trades: 0,
            win_rate: 0.50,
            win_loss_ratio: 1.5,
            avg_win_pct: 0.0,
            avg_loss_pct: 0.0,
            kelly_fraction: 0.0,
        }
    }
}

impl AgentStatistics {
    /// Statistics computed from fewer than 10 closed trades are treated as
    /// low-confidence; callers should fall back to defaults.
    pub fn is_reliable(&self) -> bool {
        self.total_trades >= 10
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerStatus {
    Active,
    PausedDaily,
    PausedWeekly,
    PausedConsecutive,
    ReviewRequired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerState {
    pub agent_id: String,
    pub status: BreakerStatus,
    pub pause_until: Option<DateTime<Utc>>,
    pub pause_reason: Option<String>,
    pub daily_start_capital: f64,
    pub daily_pnl: f64,
    pub daily_trades: u32,
    pub weekly_start_capital: f64,
    pub weekly_pnl: f64,
    pub monthly_start_capital: f64,
    pub consecutive_wins: u32,
    pub consecutive_losses: u32,
    pub sizing_multiplier: f64,
    pub last_reset_daily: DateTime<Utc>,
    pub last_reset_weekly: DateTime<Utc>,
    pub last_reset_monthly: DateTime<Utc>,
}

impl BreakerState {
    pub fn new(agent_id: impl Into<String>, starting_capital: f64, now: DateTime<Utc>) -> Self {
        Self {
            agent_id: agent_id.into(),
            status: BreakerStatus::Active,
            pause_until: None,
            pause_reason: None,
            daily_start_capital: starting_capital,
            daily_pnl: 0.0,
            daily_trades: 0,
            weekly_start_capital: starting_capital,
            weekly_pnl: 0.0,
            monthly_start_capital: starting_capital,
            consecutive_wins: 0,
            consecutive_losses: 0,
            sizing_multiplier: 1.0,
            last_reset_daily: now,
            last_reset_weekly: now,
            last_reset_monthly: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
    TimeExit,
    SignalExit,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::TakeProfit => "TAKE_PROFIT",
            ExitReason::TrailingStop => "TRAILING_STOP",
            ExitReason::TimeExit => "TIME_EXIT",
            ExitReason::SignalExit => "SIGNAL_EXIT",
        };
        write!(f, "{s}")
    }
}

/// Per-(agent, symbol) exit management state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitLevel {
    pub agent_id: String,
    pub symbol: String,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub stop_loss_price: f64,
    pub stop_loss_pct: f64,
    pub take_profit_price: f64,
    pub take_profit_pct: f64,
    pub trailing_active: bool,
    pub trailing_stop_price: Option<f64>,
    pub highest_price_seen: f64,
    pub reasoning: String,
}

/// A forced exit produced by the Exit Engine sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionAction {
    pub reason: ExitReason,
    pub severity: ExitSeverity,
    pub symbol: String,
    pub agent_id: String,
    pub price: f64,
    pub quantity: f64,
    pub pnl: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitSeverity {
    Critical,
    High,
    Medium,
}
