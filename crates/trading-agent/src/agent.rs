use anyhow::{anyhow, Result};
use chrono::{Timelike, Utc};
use core_types::{
    Agent, AgentStatistics, CoreError, Decision, EnrichedDecision, RiskLevel, TradeAction,
};
use earnings_calendar::EarningsCalendar;
use kelly_position_sizer::{KellySizer, SizingContext};
use memory_store::{MarketContext, MemoryStore, PerformanceCriterion, SimilarTradesFilter, SmartMoneyContext};
use rust_decimal::prelude::*;
use signal_combiner::{MemoryAggregates, SignalCombiner};
use smart_money::SmartMoneySnapshot;
use technical_analysis::{TechnicalAnalysis, TechnicalAnalyzer};
use technical_gates::GateDecision;
use winning_patterns::WinningPatternsIndex;

use broker_trait::{BarTimeframe, BrokerClient, BrokerOrderSide, OrderSpec};
use circuit_breaker::CircuitBreaker;
use exit_engine::ExitEngine;
use llm_client::LlmClient;

use crate::config::AgentSpec;
use crate::sources::{AlpacaSmartMoneySource, NoopEarningsSource};
use crate::whitelist::{self, WhitelistOutcome, WhitelistPolicy};

pub type EarningsCalendarImpl = EarningsCalendar<NoopEarningsSource>;
pub type SmartMoneyAggregatorImpl = smart_money::SmartMoneyAggregator<AlpacaSmartMoneySource>;

/// Fires an autocritique call every 5 completed decisions.
const AUTOCRITIQUE_EVERY: u32 = 5;

/// Shared, read-only handles every agent tick needs. Owned by the
/// orchestrator and borrowed for the duration of a tick; nothing here is
/// agent-specific except what's passed in separately.
pub struct TickContext<'a> {
    pub broker: &'a dyn BrokerClient,
    pub llm: &'a LlmClient,
    pub memory: &'a MemoryStore,
    pub earnings: &'a EarningsCalendarImpl,
    pub kelly: &'a KellySizer,
    pub signal_combiner: &'a SignalCombiner,
    pub circuit_breaker: &'a CircuitBreaker,
    pub exit_engine: &'a ExitEngine,
    pub winning_patterns: &'a WinningPatternsIndex,
    pub whitelist_policy: WhitelistPolicy,
    pub max_position_percent: f64,
    pub simulated_fee_per_trade: f64,
    /// Technical analyses for the session's top movers, keyed by symbol.
    /// A symbol the agent picks outside this set is analyzed on demand.
    pub movers_ta: &'a [TechnicalAnalysis],
    pub smart_snapshot: &'a SmartMoneySnapshot,
}

/// Outcome of one solo-agent tick, always produced even when no order was
/// placed (HOLD, a blocked gate, or a rejected whitelist symbol).
pub struct TickOutcome {
    pub decision: EnrichedDecision,
    pub order_id: Option<String>,
}

pub async fn run_tick(agent: &mut Agent, spec: &AgentSpec, ctx: &TickContext<'_>, last_error: &mut Option<String>) -> Result<TickOutcome> {
    maybe_autocritique(agent, ctx).await;

    let context_block = assemble_context(agent, ctx).await?;
    let raw = call_llm_with_retry(agent, spec, ctx, &context_block, last_error).await?;

    let mut decision: Decision = match serde_json::from_value(raw) {
        Ok(d) => d,
        Err(e) => {
            *last_error = Some(format!("could not parse a decision from the model's response: {e}"));
            Decision::hold("model response was not a well-formed decision")
        }
    };

    if let Err(reason) = decision.validate() {
        *last_error = Some(reason.clone());
        decision = Decision::hold(reason);
    }

    if decision.decision == TradeAction::Hold {
        agent.autocritique_counter += 1;
        return Ok(TickOutcome {
            decision: enriched_hold(decision),
            order_id: None,
        });
    }

    match whitelist::enforce(&decision.symbol, ctx.whitelist_policy) {
        WhitelistOutcome::Rejected { reason } => {
            agent.autocritique_counter += 1;
            return Ok(TickOutcome {
                decision: blocked(decision, reason),
                order_id: None,
            });
        }
        WhitelistOutcome::Substituted { original, substitute } => {
            tracing::info!(agent = %agent.id, original, substitute, "whitelist substitution");
            decision.symbol = substitute;
        }
        WhitelistOutcome::Allowed(_) => {}
    }

    let outcome = execute_trade_decision(agent, decision, ctx).await?;
    agent.autocritique_counter += 1;
    Ok(outcome)
}

pub(crate) async fn execute_trade_decision(agent: &mut Agent, decision: Decision, ctx: &TickContext<'_>) -> Result<TickOutcome> {
    let symbol = decision.symbol.clone();
    let today = Utc::now().date_naive();

    let earnings_info = ctx.earnings.check_earnings(&symbol, today).await;
    if decision.decision == TradeAction::Buy && earnings_info.should_avoid_buy {
        return Ok(TickOutcome {
            decision: blocked(decision, earnings_info.message.clone()),
            order_id: None,
        });
    }

    let ta = resolve_technical_analysis(&symbol, ctx).await?;
    let Some(ta) = ta else {
        return Ok(TickOutcome {
            decision: blocked(decision, format!("not enough history to analyze {symbol}")),
            order_id: None,
        });
    };

    let gate_result = technical_gates::evaluate_gate(decision.decision, &ta);
    let gate_reasons: Vec<String> = gate_result.reasons.iter().map(|s| s.to_string()).collect();
    if gate_result.decision == GateDecision::Blocked {
        return Ok(TickOutcome {
            decision: blocked_with_gates(decision, gate_result.messages.join("; "), gate_reasons),
            order_id: None,
        });
    }

    let mem_agg = build_memory_aggregates(agent, &symbol, decision.confidence, ctx).await?;
    let combined = ctx.signal_combiner.combine(decision.decision, decision.confidence, Some(ctx.smart_snapshot), &mem_agg);
    if !combined.should_proceed {
        let reason = combined.block_reason.clone().unwrap_or_else(|| "signal combiner blocked the trade".to_string());
        return Ok(TickOutcome {
            decision: blocked_with_gates(decision, reason, gate_reasons.clone()),
            order_id: None,
        });
    }

    let (can_trade, cb_reason) = ctx.circuit_breaker.can_trade(&agent.id, agent.current_capital);
    if !can_trade {
        let reason = cb_reason.unwrap_or_else(|| "circuit breaker active".to_string());
        return Ok(TickOutcome {
            decision: blocked_with_gates(decision, reason, gate_reasons.clone()),
            order_id: None,
        });
    }

    let current_price = current_price_for(&symbol, decision.decision, ctx).await?;

    let similar = ctx
        .memory
        .get_similar_trades(&agent.id, SimilarTradesFilter::Symbol(&symbol), 30)
        .await
        .unwrap_or_default();
    let stats = compute_agent_statistics(&similar);
    let (consecutive_wins, consecutive_losses) = compute_streaks(&similar);

    let sizing_ctx = SizingContext {
        stats: Some(&stats),
        capital: agent.current_capital,
        confidence: decision.confidence,
        risk_level: decision.risk_level,
        vix: ctx.smart_snapshot.vix,
        consecutive_wins,
        consecutive_losses,
        smart_money_aligned: Some(smart_money_agrees(decision.decision, ctx.smart_snapshot)),
    };
    let sizing = ctx.kelly.size(&sizing_ctx);

    let cb_multiplier = ctx.circuit_breaker.get_sizing_multiplier(&agent.id);
    let mut kelly_amount = sizing.recommended_amount * combined.sizing_multiplier * earnings_info.position_size_multiplier * cb_multiplier;
    let max_amount = agent.current_capital * (ctx.max_position_percent / 100.0);
    kelly_amount = kelly_amount.min(max_amount).max(0.0);

    let quantity = (kelly_amount / current_price).floor();
    if quantity < 1.0 {
        return Ok(TickOutcome {
            decision: blocked_with_gates(decision, "sized position is below one share".to_string(), gate_reasons.clone()),
            order_id: None,
        });
    }

    if decision.decision == TradeAction::Sell && !agent.positions.contains_key(&symbol) {
        return Ok(TickOutcome {
            decision: blocked_with_gates(decision, format!("no open {symbol} position to sell"), gate_reasons.clone()),
            order_id: None,
        });
    }

    let order = submit_with_limit_then_market(&symbol, decision.decision, quantity, ctx).await?;

    let fill_price = order
        .filled_avg_price_decimal()
        .and_then(|d| d.to_f64())
        .unwrap_or(current_price);
    let fill_qty = order
        .filled_quantity_decimal()
        .and_then(|d| d.to_f64())
        .unwrap_or(quantity);

    apply_fill(agent, &decision, &symbol, fill_qty, fill_price, &ta, ctx).await?;

    let enriched = EnrichedDecision {
        base: decision,
        kelly_amount,
        sizing_multiplier: combined.sizing_multiplier,
        combined_signal: format!("{:?}", combined.signal_strength),
        earnings_size_adjustment: earnings_info.position_size_multiplier,
        technical_gates_warning: (gate_result.decision == GateDecision::Warning).then(|| gate_result.messages.join("; ")),
        gate_reasons: gate_reasons.clone(),
    };

    Ok(TickOutcome {
        decision: enriched,
        order_id: Some(order.id),
    })
}

async fn apply_fill(
    agent: &mut Agent,
    decision: &Decision,
    symbol: &str,
    quantity: f64,
    price: f64,
    ta: &TechnicalAnalysis,
    ctx: &TickContext<'_>,
) -> Result<()> {
    agent.trade_count += 1;
    agent.apply_fee(ctx.simulated_fee_per_trade);

    let market = MarketContext {
        market_sentiment: Some(format!("{:?}", ctx.smart_snapshot.overall)),
        vix_level: Some(ctx.smart_snapshot.vix),
        market_trend: Some(format!("{:?}", ta.trend)),
        rsi_value: Some(ta.rsi),
        volume_ratio: Some(ta.volume_ratio),
    };
    let smart_money_ctx = SmartMoneyContext {
        dark_pool_ratio: Some(ctx.smart_snapshot.dark_pool.volume_ratio_5d),
        options_sentiment: Some(format!("{:?}", ctx.smart_snapshot.options.sentiment)),
        insider_activity: Some(format!("{:+.2}", ctx.smart_snapshot.insider.net_sentiment)),
    };

    match decision.decision {
        TradeAction::Buy => {
            agent.apply_buy_fill(symbol, quantity, price);
            ctx.memory
                .create_trade_memory(&agent.id, symbol, TradeAction::Buy, price, quantity, &decision.reasoning, decision.confidence, &market, &smart_money_ctx)
                .await?;
            let level = ctx.exit_engine.create_exit_levels(
                &agent.id,
                symbol,
                price,
                Utc::now(),
                decision.confidence,
                decision.risk_level,
                ctx.smart_snapshot.vix,
                ctx.smart_snapshot.overall,
            );
            ctx.exit_engine.register(level);
            ctx.circuit_breaker.record_trade_result(&agent.id, 0.0, agent.current_capital);
        }
        TradeAction::Sell => {
            let realized = agent.apply_sell_fill(symbol, quantity, price);
            let lesson = if realized > 0.0 {
                format!("{symbol}: closed for a gain of {:.2}", realized)
            } else {
                format!("{symbol}: closed for a loss of {:.2}", realized)
            };
            ctx.memory
                .close_latest_open_for_symbol(&agent.id, symbol, price, Some(realized), Some(&lesson))
                .await?;
            ctx.exit_engine.remove(&agent.id, symbol);
            ctx.circuit_breaker.record_trade_result(&agent.id, realized, agent.current_capital);
        }
        TradeAction::Hold => {}
    }

    Ok(())
}

async fn resolve_technical_analysis(symbol: &str, ctx: &TickContext<'_>) -> Result<Option<TechnicalAnalysis>> {
    if let Some(existing) = ctx.movers_ta.iter().find(|ta| ta.symbol == symbol) {
        return Ok(Some(existing.clone()));
    }
    let bars = ctx.broker.get_market_data(symbol, BarTimeframe::OneDay, 60).await?;
    Ok(TechnicalAnalyzer::new().analyze(symbol, &bars))
}

async fn current_price_for(symbol: &str, action: TradeAction, ctx: &TickContext<'_>) -> Result<f64> {
    let quote = ctx.broker.get_latest_quote(symbol).await?;
    Ok(match action {
        TradeAction::Sell => quote.bid_price,
        _ => quote.ask_price,
    })
}

/// Tries a marketable LIMIT order first (bid*1.001 for a BUY, ask*0.999 for a
/// SELL) so the agent doesn't cross the spread blindly; falls back to MARKET
/// if a quote isn't available.
async fn submit_with_limit_then_market(
    symbol: &str,
    action: TradeAction,
    quantity: f64,
    ctx: &TickContext<'_>,
) -> Result<broker_trait::BrokerOrder> {
    let side = match action {
        TradeAction::Buy => BrokerOrderSide::Buy,
        TradeAction::Sell => BrokerOrderSide::Sell,
        TradeAction::Hold => return Err(anyhow!("cannot submit an order for a HOLD decision")),
    };
    let qty = Decimal::from_f64(quantity).ok_or_else(|| anyhow!("invalid order quantity {quantity}"))?;

    match ctx.broker.get_latest_quote(symbol).await {
        Ok(quote) => {
            let limit_price = match side {
                BrokerOrderSide::Buy => quote.bid_price * 1.001,
                BrokerOrderSide::Sell => quote.ask_price * 0.999,
            };
            let Some(limit_price) = Decimal::from_f64(limit_price) else {
                return ctx.broker.submit_order(OrderSpec::market(symbol, qty, side)).await;
            };
            ctx.broker
                .submit_order(OrderSpec::limit(symbol, qty, side, limit_price))
                .await
        }
        Err(e) => {
            tracing::warn!(symbol, error = %e, "no quote available, falling back to a market order");
            ctx.broker.submit_order(OrderSpec::market(symbol, qty, side)).await
        }
    }
}

async fn build_memory_aggregates(agent: &Agent, symbol: &str, confidence: f64, ctx: &TickContext<'_>) -> Result<MemoryAggregates> {
    let symbol_trades = ctx
        .memory
        .get_similar_trades(&agent.id, SimilarTradesFilter::Symbol(symbol), 20)
        .await
        .unwrap_or_default();
    let symbol_win_rate = win_rate_of(&symbol_trades);

    let by_confidence = ctx
        .memory
        .get_agent_performance_by_criteria(&agent.id, PerformanceCriterion::ConfidenceBucket)
        .await
        .unwrap_or_default();
    let bucket = confidence_bucket_label(confidence);
    let confidence_bucket_win_rate = by_confidence.iter().find(|b| b.key == bucket).map(|b| b.win_rate);

    let recent_negative_lessons = symbol_trades
        .iter()
        .filter(|m| m.outcome == core_types::TradeOutcome::Loss)
        .count() as u32;

    Ok(MemoryAggregates {
        symbol_win_rate,
        confidence_bucket_win_rate,
        recent_negative_lessons,
    })
}

fn win_rate_of(memories: &[core_types::TradeMemory]) -> Option<f64> {
    if memories.is_empty() {
        return None;
    }
    let wins = memories.iter().filter(|m| m.outcome == core_types::TradeOutcome::Win).count();
    Some(wins as f64 / memories.len() as f64)
}

fn confidence_bucket_label(confidence: f64) -> &'static str {
    if confidence < 60.0 {
        "50-60"
    } else if confidence < 70.0 {
        "60-70"
    } else if confidence < 80.0 {
        "70-80"
    } else if confidence < 90.0 {
        "80-90"
    } else {
        "90-100"
    }
}

fn smart_money_agrees(action: TradeAction, snapshot: &SmartMoneySnapshot) -> bool {
    use smart_money::OverallSignal::*;
    match action {
        TradeAction::Buy => matches!(snapshot.overall, StrongBullish | Bullish),
        TradeAction::Sell => matches!(snapshot.overall, StrongBearish | Bearish),
        TradeAction::Hold => false,
    }
}

fn compute_agent_statistics(memories_desc: &[core_types::TradeMemory]) -> AgentStatistics {
    if memories_desc.is_empty() {
        return AgentStatistics::default();
    }
    let total = memories_desc.len() as u32;
    let wins: Vec<f64> = memories_desc
        .iter()
        .filter(|m| m.outcome == core_types::TradeOutcome::Win)
        .filter_map(|m| m.pnl_percent)
        .collect();
    let losses: Vec<f64> = memories_desc
        .iter()
        .filter(|m| m.outcome == core_types::TradeOutcome::Loss)
        .filter_map(|m| m.pnl_percent)
        .collect();

    let win_rate = wins.len() as f64 / total as f64;
    let avg_win_pct = if wins.is_empty() { 0.0 } else { wins.iter().sum::<f64>() / wins.len() as f64 };
    let avg_loss_pct = if losses.is_empty() { 0.0 } else { losses.iter().sum::<f64>() / losses.len() as f64 };
    let win_loss_ratio = if avg_loss_pct != 0.0 { (avg_win_pct / avg_loss_pct.abs()).max(0.01) } else { 1.5 };

    AgentStatistics {
        total_trades: total,
        win_rate,
        win_loss_ratio,
        avg_win_pct,
        avg_loss_pct,
        kelly_fraction: 0.0,
    }
}

/// Counts the consecutive wins or losses at the head of a descending-by-date
/// trade list, the input the Kelly sizer's streak adjustment expects.
fn compute_streaks(memories_desc: &[core_types::TradeMemory]) -> (u32, u32) {
    let mut sorted = memories_desc.to_vec();
    sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut wins = 0u32;
    let mut losses = 0u32;
    for m in &sorted {
        match m.outcome {
            core_types::TradeOutcome::Win if losses == 0 => wins += 1,
            core_types::TradeOutcome::Loss if wins == 0 => losses += 1,
            _ => break,
        }
    }
    (wins, losses)
}

async fn maybe_autocritique(agent: &mut Agent, ctx: &TickContext<'_>) {
    if agent.trade_count == 0 || agent.autocritique_counter % AUTOCRITIQUE_EVERY != 0 {
        return;
    }
    let recent: Vec<String> = agent
        .history
        .iter()
        .rev()
        .take(5)
        .map(|t| format!("{} {} x{:.0} @ {:.2} (pnl {:.2})", t.decision, t.symbol, t.quantity, t.price, t.pnl))
        .collect();
    let summary = if recent.is_empty() { "no trades yet".to_string() } else { recent.join("\n") };

    match ctx
        .llm
        .generate_autocritique(&agent.model_handle, &agent.name, &summary, agent.total_fees, agent.performance_pct())
        .await
    {
        Ok(critique) => agent.last_autocritique = Some(critique),
        Err(e) => tracing::warn!(agent = %agent.id, error = %e, "autocritique call failed"),
    }
}

async fn assemble_context(agent: &Agent, ctx: &TickContext<'_>) -> Result<String> {
    let sentiment = format!("{:?}", ctx.smart_snapshot.overall);
    let memory_context = ctx.memory.get_pre_decision_context(&agent.id, &sentiment).await.unwrap_or_default();

    let stats = AgentStatistics {
        total_trades: agent.winning_trades as u32 + agent.losing_trades as u32,
        win_rate: agent.win_rate(),
        win_loss_ratio: 1.5,
        avg_win_pct: 0.0,
        avg_loss_pct: 0.0,
        kelly_fraction: 0.0,
    };
    let cheat_sheet = ctx.kelly.cheat_sheet(&SizingContext {
        stats: Some(&stats),
        capital: agent.current_capital,
        confidence: 70.0,
        risk_level: RiskLevel::Medium,
        vix: ctx.smart_snapshot.vix,
        consecutive_wins: 0,
        consecutive_losses: 0,
        smart_money_aligned: None,
    });
    let cheat_sheet_line = cheat_sheet
        .iter()
        .map(|(confidence, amount)| format!("{confidence}%={amount:.0}"))
        .collect::<Vec<_>>()
        .join(", ");

    let hour = Utc::now().hour();
    let movers_block = ctx
        .movers_ta
        .iter()
        .take(10)
        .map(|ta| {
            let (score, recommendation) = ctx.winning_patterns.get_pattern_recommendation(
                &ta.symbol,
                Some(ta.rsi),
                Some(hour),
                Some(ta.volume_ratio),
            );
            format!(
                "{}: rsi={:.1} ({:?}), trend={:?}, volume_ratio={:.2}, macd_hist={:.3}, winning_pattern_score={score:.0} ({recommendation:?})",
                ta.symbol, ta.rsi, ta.rsi_signal, ta.trend, ta.volume_ratio, ta.macd_histogram
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    Ok(format!(
        "Capital: {:.2} ({:+.2}% since inception). Market regime: {sentiment} (VIX {:.1}, fear/greed {:.0}).\n\
         Position sizing reference (confidence -> dollar amount): {cheat_sheet_line}.\n\
         Top movers (with winning-pattern score, 50=neutral):\n{movers_block}\n\
         Historical performance:\n{memory_context}",
        agent.current_capital,
        agent.performance_pct(),
        ctx.smart_snapshot.vix,
        ctx.smart_snapshot.fear_greed,
    ))
}

async fn call_llm_with_retry(
    agent: &Agent,
    spec: &AgentSpec,
    ctx: &TickContext<'_>,
    context_block: &str,
    last_error: &mut Option<String>,
) -> Result<serde_json::Value> {
    let system_prompt = format!(
        "You are {}, an autonomous equities trading agent. Personality: {}\n\
         Respond with a single JSON object only: {{\"decision\": \"BUY\"|\"SELL\"|\"HOLD\", \"symbol\": string, \
         \"quantity\": number, \"reasoning\": string, \"confidence\": number (0-100), \"risk_level\": \"LOW\"|\"MEDIUM\"|\"HIGH\", \
         \"target_price\": number or null, \"stop_loss\": number or null}}.",
        spec.name, spec.personality
    );

    let mut user_content = context_block.to_string();
    if let Some(err) = last_error.take() {
        user_content = format!("Your previous decision could not be used: {err}\nTry again.\n\n{user_content}");
    }

    let attempt = ctx.llm.generate_response(&spec.model_handle, &system_prompt, &user_content, 0.4, 700).await;
    let response = match attempt {
        Ok(r) => r,
        Err(e) if matches!(e, llm_client::LlmError::Timeout(_) | llm_client::LlmError::RequestFailed(_) | llm_client::LlmError::ApiError { .. }) => {
            tracing::warn!(agent = %agent.id, error = %e, "llm call failed, retrying once");
            ctx.llm.generate_response(&spec.model_handle, &system_prompt, &user_content, 0.4, 700).await?
        }
        Err(e) => return Err(e.into()),
    };

    llm_client::extract_json_object(&response.content).map_err(|e| anyhow!(CoreError::ParseError(e.to_string())))
}

pub(crate) fn enriched_hold(decision: Decision) -> EnrichedDecision {
    EnrichedDecision {
        base: decision,
        kelly_amount: 0.0,
        sizing_multiplier: 1.0,
        combined_signal: "NEUTRAL".to_string(),
        earnings_size_adjustment: 1.0,
        technical_gates_warning: None,
        gate_reasons: Vec::new(),
    }
}

fn blocked(decision: Decision, reason: String) -> EnrichedDecision {
    blocked_with_gates(decision, reason, Vec::new())
}

fn blocked_with_gates(decision: Decision, reason: String, mut gate_reasons: Vec<String>) -> EnrichedDecision {
    gate_reasons.push(reason.clone());
    EnrichedDecision {
        base: Decision::hold(reason),
        kelly_amount: 0.0,
        sizing_multiplier: 1.0,
        combined_signal: "BLOCKED".to_string(),
        earnings_size_adjustment: 1.0,
        technical_gates_warning: None,
        gate_reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use core_types::{TradeMemory, TradeOutcome};
    use smart_money::{DarkPoolEstimate, DarkPoolLevel, InsiderSummary, OptionsSentiment, OptionsSummary, OverallSignal};

    fn memory(outcome: TradeOutcome, pnl_percent: Option<f64>, days_ago: i64) -> TradeMemory {
        TradeMemory {
            id: 0,
            agent_id: "agent-1".to_string(),
            symbol: "AAPL".to_string(),
            sector: "Technology".to_string(),
            decision: TradeAction::Buy,
            entry_price: 100.0,
            quantity: 10.0,
            reasoning: "test".to_string(),
            confidence: 70.0,
            created_at: Utc::now() - Duration::days(days_ago),
            closed_at: None,
            exit_price: None,
            pnl: None,
            pnl_percent,
            outcome,
            holding_duration_hours: None,
            lesson_learned: None,
            market_sentiment: None,
            vix_level: None,
            market_trend: None,
            rsi_value: None,
            volume_ratio: None,
            dark_pool_ratio: None,
            options_sentiment: None,
            insider_activity: None,
        }
    }

    fn snapshot(overall: OverallSignal) -> SmartMoneySnapshot {
        SmartMoneySnapshot {
            symbol: "SPY".to_string(),
            timestamp: Utc::now(),
            vix: 18.0,
            fear_greed: 50.0,
            options: OptionsSummary {
                put_call_volume_ratio: 1.0,
                put_call_oi_ratio: 1.0,
                unusual_activity_count: 0,
                implied_volatility: 0.2,
                sentiment: OptionsSentiment::Neutral,
            },
            dark_pool: DarkPoolEstimate { volume_ratio_5d: 0.5, level: DarkPoolLevel::Normal, estimated_fraction: 0.4 },
            insider: InsiderSummary { buys: 0, sells: 0, net_sentiment: 0.0 },
            overall,
            confidence_boost: 0,
        }
    }

    #[test]
    fn confidence_bucket_label_matches_memory_store_buckets() {
        assert_eq!(confidence_bucket_label(55.0), "50-60");
        assert_eq!(confidence_bucket_label(65.0), "60-70");
        assert_eq!(confidence_bucket_label(75.0), "70-80");
        assert_eq!(confidence_bucket_label(85.0), "80-90");
        assert_eq!(confidence_bucket_label(95.0), "90-100");
    }

    #[test]
    fn smart_money_agrees_checks_direction() {
        assert!(smart_money_agrees(TradeAction::Buy, &snapshot(OverallSignal::Bullish)));
        assert!(!smart_money_agrees(TradeAction::Buy, &snapshot(OverallSignal::Bearish)));
        assert!(smart_money_agrees(TradeAction::Sell, &snapshot(OverallSignal::StrongBearish)));
        assert!(!smart_money_agrees(TradeAction::Hold, &snapshot(OverallSignal::Bullish)));
    }

    #[test]
    fn compute_agent_statistics_from_mixed_history() {
        let memories = vec![
            memory(TradeOutcome::Win, Some(0.08), 1),
            memory(TradeOutcome::Win, Some(0.04), 2),
            memory(TradeOutcome::Loss, Some(-0.03), 3),
        ];
        let stats = compute_agent_statistics(&memories);
        assert_eq!(stats.total_trades, 3);
        assert!((stats.win_rate - (2.0 / 3.0)).abs() < 1e-9);
        assert!(stats.avg_win_pct > 0.0);
        assert!(stats.avg_loss_pct < 0.0);
    }

    #[test]
    fn compute_agent_statistics_empty_uses_default() {
        let stats = compute_agent_statistics(&[]);
        let default = AgentStatistics::default();
        assert_eq!(stats.total_trades, default.total_trades);
        assert_eq!(stats.win_rate, default.win_rate);
    }

    #[test]
    fn compute_streaks_counts_from_most_recent() {
        let memories = vec![
            memory(TradeOutcome::Win, Some(0.05), 1),
            memory(TradeOutcome::Win, Some(0.03), 2),
            memory(TradeOutcome::Loss, Some(-0.02), 3),
        ];
        let (wins, losses) = compute_streaks(&memories);
        assert_eq!(wins, 2);
        assert_eq!(losses, 0);
    }

    #[test]
    fn compute_streaks_stops_at_the_opposite_outcome() {
        let memories = vec![
            memory(TradeOutcome::Loss, Some(-0.01), 1),
            memory(TradeOutcome::Win, Some(0.02), 2),
        ];
        let (wins, losses) = compute_streaks(&memories);
        assert_eq!(wins, 0);
        assert_eq!(losses, 1);
    }

    #[test]
    fn enriched_hold_carries_zero_sizing() {
        let enriched = enriched_hold(Decision::hold("nothing to do"));
        assert_eq!(enriched.kelly_amount, 0.0);
        assert_eq!(enriched.combined_signal, "NEUTRAL");
    }

    #[test]
    fn blocked_with_gates_appends_the_block_reason() {
        let decision = Decision {
            decision: TradeAction::Buy,
            symbol: "AAPL".to_string(),
            quantity: 5.0,
            reasoning: "breakout".to_string(),
            confidence: 80.0,
            risk_level: RiskLevel::Medium,
            target_price: None,
            stop_loss: None,
        };
        let enriched = blocked_with_gates(decision, "rsi overbought".to_string(), vec!["rsi_overbought".to_string()]);
        assert_eq!(enriched.combined_signal, "BLOCKED");
        assert_eq!(enriched.gate_reasons, vec!["rsi_overbought".to_string(), "rsi overbought".to_string()]);
        assert_eq!(enriched.base.decision, TradeAction::Hold);
    }
}
