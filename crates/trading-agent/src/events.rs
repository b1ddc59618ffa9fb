use chrono::{DateTime, Utc};
use core_types::{EnrichedDecision, PositionAction};
use serde::Serialize;
use tokio::sync::broadcast;

/// Per-agent decision/statistics payload carried by the `trading_cycle` event.
#[derive(Debug, Clone, Serialize)]
pub struct AgentCycleResult {
    pub agent_id: String,
    pub agent_name: String,
    pub decision: EnrichedDecision,
    pub current_capital: f64,
    pub performance_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    TradingCycle {
        timestamp: DateTime<Utc>,
        agents: Vec<AgentCycleResult>,
    },
    MarketClosed {
        timestamp: DateTime<Utc>,
    },
    MarketHoursBlocked {
        timestamp: DateTime<Utc>,
        reason: String,
    },
    AutoExit {
        timestamp: DateTime<Utc>,
        action: PositionAction,
    },
    TradingEnabled {
        timestamp: DateTime<Utc>,
    },
    TradingDisabled {
        timestamp: DateTime<Utc>,
    },
    Error {
        timestamp: DateTime<Utc>,
        component: String,
        message: String,
    },
}

/// Broadcasts typed events to whatever adapter is attached (WebSocket, etc.),
/// logging a structured line for every event regardless of whether a
/// subscriber is listening.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: Event) {
        match &event {
            Event::TradingCycle { agents, .. } => {
                tracing::info!(agent_count = agents.len(), "trading_cycle");
            }
            Event::MarketClosed { .. } => tracing::info!("market_closed"),
            Event::MarketHoursBlocked { reason, .. } => {
                tracing::info!(reason = %reason, "market_hours_blocked")
            }
            Event::AutoExit { action, .. } => tracing::info!(
                agent = %action.agent_id,
                symbol = %action.symbol,
                reason = %action.reason,
                pnl = action.pnl,
                "auto_exit"
            ),
            Event::TradingEnabled { .. } => tracing::info!("trading_enabled"),
            Event::TradingDisabled { .. } => tracing::info!("trading_disabled"),
            Event::Error { component, message, .. } => {
                tracing::warn!(component = %component, message = %message, "error")
            }
        }
        // No subscribers is not an error; the log line above is the durable record.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
