use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use core_types::{Agent, ExitReason, ExitSeverity, PositionAction};
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, Semaphore};

use broker_trait::BarTimeframe;
use broker_trait::BrokerClient;
use circuit_breaker::CircuitBreaker;
use exit_engine::{ExitEngine, TickInput};
use kelly_position_sizer::KellySizer;
use llm_client::LlmClient;
use market_clock::MarketClock;
use memory_store::MemoryStore;
use signal_combiner::SignalCombiner;
use smart_money::{OverallSignal, SmartMoneySnapshot};
use technical_analysis::{TechnicalAnalysis, TechnicalAnalyzer};
use winning_patterns::WinningPatternsIndex;

use crate::agent::{self, EarningsCalendarImpl, SmartMoneyAggregatorImpl, TickContext, TickOutcome};
use crate::config::{AgentConfig, AgentSpec};
use crate::consortium::{self, Ballot, ConsortiumMode};
use crate::events::{AgentCycleResult, Event, EventBus};

const MAX_MOVERS_ANALYZED: usize = 10;
const SNAPSHOT_INTERVAL_SECONDS: u64 = 60;
const MAX_CONCURRENT_AGENT_TICKS: usize = 4;

/// Current operator-facing trading state. Starts enabled; the operator can
/// toggle it off without restarting the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradingStatus {
    Enabled,
    Disabled,
}

/// A capital/performance snapshot taken independently of the trading cycle,
/// every `SNAPSHOT_INTERVAL_SECONDS`.
#[derive(Debug, Clone)]
pub struct PerformanceSnapshot {
    pub timestamp: chrono::DateTime<Utc>,
    pub agent_id: String,
    pub current_capital: f64,
    pub performance_pct: f64,
}

/// Owns every shared service and the live agent roster; runs the background
/// tick loop and exposes the control-surface methods an operator frontend
/// (or a future HTTP adapter) drives.
pub struct Orchestrator {
    config: AgentConfig,
    broker: Arc<dyn BrokerClient>,
    llm: LlmClient,
    memory: MemoryStore,
    earnings: EarningsCalendarImpl,
    smart_money: SmartMoneyAggregatorImpl,
    kelly: KellySizer,
    signal_combiner: SignalCombiner,
    circuit_breaker: CircuitBreaker,
    exit_engine: ExitEngine,
    market_clock: MarketClock,
    winning_patterns: Arc<WinningPatternsIndex>,
    events: EventBus,

    agents: DashMap<String, Agent>,
    last_errors: DashMap<String, Option<String>>,
    consortium_agent: Mutex<Agent>,
    status: RwLock<TradingStatus>,
    snapshots: RwLock<Vec<PerformanceSnapshot>>,
    tick_lock: Mutex<()>,
}

impl Orchestrator {
    pub fn new(
        config: AgentConfig,
        broker: Arc<dyn BrokerClient>,
        llm: LlmClient,
        memory: MemoryStore,
        earnings: EarningsCalendarImpl,
        smart_money: SmartMoneyAggregatorImpl,
        winning_patterns: Arc<WinningPatternsIndex>,
    ) -> Self {
        let agents = DashMap::new();
        let last_errors = DashMap::new();
        for spec in &config.agents {
            agents.insert(
                spec.id.clone(),
                Agent::new(spec.id.clone(), spec.name.clone(), spec.model_handle.clone(), spec.personality.clone(), config.initial_capital_per_agent),
            );
            last_errors.insert(spec.id.clone(), None);
        }
        let consortium_agent = Agent::new(
            "consortium".to_string(),
            "Consortium".to_string(),
            "consortium/weighted-vote".to_string(),
            "Performance-weighted aggregate of the independent trader agents.".to_string(),
            config.initial_capital_per_agent,
        );

        Self {
            config,
            broker,
            llm,
            memory,
            earnings,
            smart_money,
            kelly: KellySizer::new(),
            signal_combiner: SignalCombiner::new(),
            circuit_breaker: CircuitBreaker::new(),
            exit_engine: ExitEngine::new(),
            market_clock: MarketClock::new(),
            winning_patterns,
            events: EventBus::default(),
            agents,
            last_errors,
            consortium_agent: Mutex::new(consortium_agent),
            status: RwLock::new(TradingStatus::Enabled),
            snapshots: RwLock::new(Vec::new()),
            tick_lock: Mutex::new(()),
        }
    }

    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    // --- control surface -------------------------------------------------

    pub async fn set_trading_enabled(&self, enabled: bool) {
        let mut status = self.status.write().await;
        *status = if enabled { TradingStatus::Enabled } else { TradingStatus::Disabled };
        let timestamp = Utc::now();
        self.events.publish(if enabled {
            Event::TradingEnabled { timestamp }
        } else {
            Event::TradingDisabled { timestamp }
        });
    }

    pub async fn trading_status(&self) -> TradingStatus {
        *self.status.read().await
    }

    pub fn list_agents(&self) -> Vec<Agent> {
        self.agents.iter().map(|e| e.value().clone()).collect()
    }

    /// Agents ranked by `performance_pct`, best first.
    pub fn leaderboard(&self) -> Vec<Agent> {
        let mut all = self.list_agents();
        all.sort_by(|a, b| b.performance_pct().partial_cmp(&a.performance_pct()).unwrap_or(std::cmp::Ordering::Equal));
        all
    }

    pub fn recent_trades(&self, agent_id: &str, limit: usize) -> Vec<core_types::TradeRecord> {
        self.agents
            .get(agent_id)
            .map(|a| a.history.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn recent_autocritiques(&self) -> Vec<(String, String)> {
        self.agents
            .iter()
            .filter_map(|e| e.value().last_autocritique.clone().map(|c| (e.key().clone(), c)))
            .collect()
    }

    pub async fn performance_snapshots(&self, since: chrono::DateTime<Utc>) -> Vec<PerformanceSnapshot> {
        self.snapshots.read().await.iter().filter(|s| s.timestamp >= since).cloned().collect()
    }

    /// Runs one tick immediately, outside the usual interval schedule.
    pub async fn force_tick(&self) -> Result<()> {
        self.run_cycle().await
    }

    // --- background loop ---------------------------------------------------

    pub async fn run(self: Arc<Self>) {
        let cycle_interval = tokio::time::Duration::from_secs(self.config.trading_interval_minutes * 60);
        let mut cycle_ticker = tokio::time::interval(cycle_interval);
        let mut snapshot_ticker = tokio::time::interval(tokio::time::Duration::from_secs(SNAPSHOT_INTERVAL_SECONDS));

        loop {
            tokio::select! {
                _ = cycle_ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        tracing::error!(error = %e, "trading cycle failed");
                        self.events.publish(Event::Error {
                            timestamp: Utc::now(),
                            component: "orchestrator".to_string(),
                            message: e.to_string(),
                        });
                    }
                }
                _ = snapshot_ticker.tick() => {
                    self.take_snapshot().await;
                }
            }
        }
    }

    async fn take_snapshot(&self) {
        let timestamp = Utc::now();
        let mut entries: Vec<PerformanceSnapshot> = self
            .agents
            .iter()
            .map(|e| PerformanceSnapshot {
                timestamp,
                agent_id: e.key().clone(),
                current_capital: e.value().current_capital,
                performance_pct: e.value().performance_pct(),
            })
            .collect();
        {
            let consortium = self.consortium_agent.lock().await;
            entries.push(PerformanceSnapshot {
                timestamp,
                agent_id: consortium.id.clone(),
                current_capital: consortium.current_capital,
                performance_pct: consortium.performance_pct(),
            });
        }
        self.snapshots.write().await.extend(entries);
    }

    /// Runs the entire shared tick: market clock gate, forced exits,
    /// shared smart-money snapshot, per-symbol technical analysis, bounded
    /// per-agent ticks, and the consortium meta-agent.
    async fn run_cycle(&self) -> Result<()> {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            tracing::debug!("previous trading cycle still running, dropping this tick");
            return Ok(());
        };

        if *self.status.read().await == TradingStatus::Disabled {
            return Ok(());
        }

        let clock_state = self.market_clock.evaluate(Utc::now());
        if !clock_state.can_trade {
            if clock_state.window == market_clock::TradingWindow::MarketClosed {
                self.events.publish(Event::MarketClosed { timestamp: Utc::now() });
            } else {
                self.events.publish(Event::MarketHoursBlocked {
                    timestamp: Utc::now(),
                    reason: format!("{:?} / {:?}", clock_state.status, clock_state.window),
                });
            }
            return Ok(());
        }

        let movers = self.broker.get_movers(MAX_MOVERS_ANALYZED).await.unwrap_or_default();
        let movers_ta = self.analyze_movers(&movers).await;

        let benchmark_symbol = movers_ta.first().map(|t| t.symbol.clone()).unwrap_or_else(|| "SPY".to_string());
        let smart_snapshot = self.smart_money.get_snapshot(&benchmark_symbol).await?;

        self.sweep_exits(smart_snapshot.overall).await?;

        let specs: Vec<AgentSpec> = self.config.agents.clone();
        let semaphore = Semaphore::new(MAX_CONCURRENT_AGENT_TICKS);
        let mut ballots = Vec::with_capacity(specs.len());
        let mut cycle_results = Vec::with_capacity(specs.len());

        // Each tick borrows `self` for the duration of its future and is
        // polled concurrently (not spawned onto separate tasks), so the
        // borrow checker can verify the shared references stay valid.
        let tick_futures = specs.iter().map(|spec| {
            let movers_ta = &movers_ta;
            let smart_snapshot = &smart_snapshot;
            let semaphore = &semaphore;
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore not closed");
                let mut agent = self
                    .agents
                    .get(&spec.id)
                    .map(|e| e.value().clone())
                    .expect("agent configured for every spec");
                let mut last_error = self.last_errors.get(&spec.id).map(|e| e.value().clone()).unwrap_or(None);
                let ctx = self.tick_context(movers_ta, smart_snapshot);
                let result = agent::run_tick(&mut agent, spec, &ctx, &mut last_error).await;
                (spec.id.clone(), agent, last_error, result)
            }
        });

        for (agent_id, agent, last_error, result) in futures_util::future::join_all(tick_futures).await {
            self.last_errors.insert(agent_id.clone(), last_error);
            match result {
                Ok(TickOutcome { decision, .. }) => {
                    let performance_pct = agent.performance_pct();
                    ballots.push(Ballot {
                        agent_id: agent_id.clone(),
                        decision: decision.base.clone(),
                        performance_pct,
                    });
                    cycle_results.push(AgentCycleResult {
                        agent_id: agent_id.clone(),
                        agent_name: agent.name.clone(),
                        decision,
                        current_capital: agent.current_capital,
                        performance_pct,
                    });
                    self.agents.insert(agent_id, agent);
                }
                Err(e) => {
                    tracing::warn!(agent = %agent_id, error = %e, "agent tick failed");
                }
            }
        }

        self.run_consortium(&ballots, &movers_ta, &smart_snapshot, &mut cycle_results).await?;

        self.events.publish(Event::TradingCycle {
            timestamp: Utc::now(),
            agents: cycle_results,
        });

        Ok(())
    }

    async fn run_consortium(
        &self,
        ballots: &[Ballot],
        movers_ta: &[TechnicalAnalysis],
        smart_snapshot: &SmartMoneySnapshot,
        cycle_results: &mut Vec<AgentCycleResult>,
    ) -> Result<()> {
        if ballots.is_empty() {
            return Ok(());
        }
        let mut consortium = self.consortium_agent.lock().await;
        let ctx = self.tick_context(movers_ta, smart_snapshot);
        let outcome = consortium::run_consortium_tick(&mut consortium, ballots, ConsortiumMode::default(), &ctx).await?;
        cycle_results.push(AgentCycleResult {
            agent_id: consortium.id.clone(),
            agent_name: consortium.name.clone(),
            decision: outcome.decision,
            current_capital: consortium.current_capital,
            performance_pct: consortium.performance_pct(),
        });
        Ok(())
    }

    fn tick_context<'a>(&'a self, movers_ta: &'a [TechnicalAnalysis], smart_snapshot: &'a SmartMoneySnapshot) -> TickContext<'a> {
        TickContext {
            broker: self.broker.as_ref(),
            llm: &self.llm,
            memory: &self.memory,
            earnings: &self.earnings,
            kelly: &self.kelly,
            signal_combiner: &self.signal_combiner,
            circuit_breaker: &self.circuit_breaker,
            exit_engine: &self.exit_engine,
            winning_patterns: self.winning_patterns.as_ref(),
            whitelist_policy: self.config.whitelist_policy,
            max_position_percent: self.config.max_position_percent,
            simulated_fee_per_trade: self.config.simulated_fee_per_trade,
            movers_ta,
            smart_snapshot,
        }
    }

    async fn analyze_movers(&self, movers: &broker_trait::Movers) -> Vec<TechnicalAnalysis> {
        let mut symbols: Vec<String> = movers
            .gainers
            .iter()
            .chain(movers.losers.iter())
            .chain(movers.high_volume.iter())
            .map(|m| m.symbol.clone())
            .collect();
        symbols.sort();
        symbols.dedup();
        symbols.truncate(MAX_MOVERS_ANALYZED);

        let analyzer = TechnicalAnalyzer::new();
        let mut out = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            match self.broker.get_market_data(&symbol, BarTimeframe::OneDay, 60).await {
                Ok(bars) => {
                    if let Some(ta) = analyzer.analyze(&symbol, &bars) {
                        out.push(ta);
                    }
                }
                Err(e) => tracing::warn!(symbol, error = %e, "failed to fetch bars for mover analysis"),
            }
        }
        out
    }

    /// Sweeps every registered exit level against current quotes and forces
    /// closing SELL orders for whatever the exit engine flags.
    async fn sweep_exits(&self, smart_signal: OverallSignal) -> Result<()> {
        let mut inputs = Vec::new();
        let mut positions_by_agent: HashMap<(String, String), f64> = HashMap::new();
        for entry in self.agents.iter() {
            for (symbol, position) in &entry.value().positions {
                positions_by_agent.insert((entry.key().clone(), symbol.clone()), position.quantity);
            }
        }

        for ((agent_id, symbol), quantity) in &positions_by_agent {
            let Some(level) = self.exit_engine.get(agent_id, symbol) else { continue };
            let quote = match self.broker.get_latest_quote(symbol).await {
                Ok(q) => q,
                Err(e) => {
                    tracing::warn!(symbol, error = %e, "skipping exit sweep for symbol, no quote");
                    continue;
                }
            };
            let holding_days = (Utc::now() - level.entry_time).num_days();
            inputs.push(TickInput {
                agent_id: agent_id.clone(),
                symbol: symbol.clone(),
                current_price: quote.bid_price,
                quantity: *quantity,
                smart_signal,
                holding_days,
            });
        }

        let actions = self.exit_engine.sweep(&inputs);
        for action in actions {
            self.force_exit(action).await?;
        }
        Ok(())
    }

    async fn force_exit(&self, action: PositionAction) -> Result<()> {
        let Some(mut agent) = self.agents.get(&action.agent_id).map(|e| e.value().clone()) else {
            return Ok(());
        };

        use rust_decimal::prelude::*;

        let side = broker_trait::BrokerOrderSide::Sell;
        let qty = Decimal::from_f64(action.quantity).unwrap_or_default();
        let order = self
            .broker
            .submit_order(broker_trait::OrderSpec::market(&action.symbol, qty, side))
            .await?;

        let fill_price = order
            .filled_avg_price_decimal()
            .and_then(|d| d.to_f64())
            .unwrap_or(action.price);

        agent.trade_count += 1;
        agent.apply_fee(self.config.simulated_fee_per_trade);
        let realized = agent.apply_sell_fill(&action.symbol, action.quantity, fill_price);
        let lesson = forced_exit_lesson(&action.reason, &action.severity, realized);
        self.memory
            .close_latest_open_for_symbol(&action.agent_id, &action.symbol, fill_price, Some(realized), Some(&lesson))
            .await?;
        self.exit_engine.remove(&action.agent_id, &action.symbol);
        self.circuit_breaker.record_trade_result(&action.agent_id, realized, agent.current_capital);

        self.agents.insert(action.agent_id.clone(), agent);
        self.events.publish(Event::AutoExit { timestamp: Utc::now(), action });
        Ok(())
    }
}

fn forced_exit_lesson(reason: &ExitReason, severity: &ExitSeverity, realized: f64) -> String {
    format!("forced exit ({reason:?}, {severity:?}): realized pnl {realized:.2}")
}
