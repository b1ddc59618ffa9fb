mod sector;

pub use sector::sector_for;

use anyhow::Result;
use chrono::{DateTime, Utc};
use core_types::{PatternType, TradeAction, TradeMemory, TradeOutcome};
use sqlx::{AnyPool, FromRow};

/// Which grouping to aggregate agent performance over.
#[derive(Debug, Clone)]
pub enum PerformanceCriterion {
    Sector,
    ConfidenceBucket,
    MarketSentiment,
    VixLevel,
}

#[derive(Debug, Clone)]
pub struct PerformanceBucket {
    pub key: String,
    pub total: u32,
    pub wins: u32,
    pub losses: u32,
    pub win_rate: f64,
    pub avg_pnl: f64,
    pub total_pnl: f64,
}

/// What a similar-trades lookup should be filtered by.
pub enum SimilarTradesFilter<'a> {
    Symbol(&'a str),
    Sector(&'a str),
    Sentiment(&'a str),
}

#[derive(Debug, FromRow)]
struct TradeMemoryRow {
    id: i64,
    agent_id: String,
    symbol: String,
    sector: String,
    decision: String,
    entry_price: f64,
    quantity: f64,
    reasoning: String,
    confidence: f64,
    created_at: String,
    closed_at: Option<String>,
    exit_price: Option<f64>,
    pnl: Option<f64>,
    pnl_percent: Option<f64>,
    outcome: String,
    holding_duration_hours: Option<f64>,
    lesson_learned: Option<String>,
    market_sentiment: Option<String>,
    vix_level: Option<f64>,
    market_trend: Option<String>,
    rsi_value: Option<f64>,
    volume_ratio: Option<f64>,
    dark_pool_ratio: Option<f64>,
    options_sentiment: Option<String>,
    insider_activity: Option<String>,
}

fn parse_dt(s: &str) -> DateTime<Utc> {
    s.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now())
}

fn parse_action(s: &str) -> TradeAction {
    match s {
        "BUY" => TradeAction::Buy,
        "SELL" => TradeAction::Sell,
        _ => TradeAction::Hold,
    }
}

fn parse_outcome(s: &str) -> TradeOutcome {
    match s {
        "win" => TradeOutcome::Win,
        "loss" => TradeOutcome::Loss,
        _ => TradeOutcome::Unknown,
    }
}

fn outcome_str(o: TradeOutcome) -> &'static str {
    match o {
        TradeOutcome::Win => "win",
        TradeOutcome::Loss => "loss",
        TradeOutcome::Unknown => "unknown",
    }
}

impl TradeMemoryRow {
    fn into_memory(self) -> TradeMemory {
        TradeMemory {
            id: self.id,
            agent_id: self.agent_id,
            symbol: self.symbol,
            sector: self.sector,
            decision: parse_action(&self.decision),
            entry_price: self.entry_price,
            quantity: self.quantity,
            reasoning: self.reasoning,
            confidence: self.confidence,
            created_at: parse_dt(&self.created_at),
            closed_at: self.closed_at.as_deref().map(parse_dt),
            exit_price: self.exit_price,
            pnl: self.pnl,
            pnl_percent: self.pnl_percent,
            outcome: parse_outcome(&self.outcome),
            holding_duration_hours: self.holding_duration_hours,
            lesson_learned: self.lesson_learned,
            market_sentiment: self.market_sentiment,
            vix_level: self.vix_level,
            market_trend: self.market_trend,
            rsi_value: self.rsi_value,
            volume_ratio: self.volume_ratio,
            dark_pool_ratio: self.dark_pool_ratio,
            options_sentiment: self.options_sentiment,
            insider_activity: self.insider_activity,
        }
    }
}

/// Market-context fields captured at entry, used to enrich a trade memory
/// and later to drive winning-pattern classification.
#[derive(Debug, Clone, Default)]
pub struct MarketContext {
    pub market_sentiment: Option<String>,
    pub vix_level: Option<f64>,
    pub market_trend: Option<String>,
    pub rsi_value: Option<f64>,
    pub volume_ratio: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct SmartMoneyContext {
    pub dark_pool_ratio: Option<f64>,
    pub options_sentiment: Option<String>,
    pub insider_activity: Option<String>,
}

pub struct MemoryStore {
    pool: AnyPool,
}

fn classify_pattern_type(decision: TradeAction, rsi: f64, volume_ratio: f64, pnl_percent: f64) -> PatternType {
    match decision {
        TradeAction::Buy => {
            if rsi < 35.0 {
                PatternType::DipBuy
            } else if volume_ratio > 1.5 && rsi > 55.0 {
                PatternType::Breakout
            } else if (45.0..=65.0).contains(&rsi) {
                PatternType::Momentum
            } else {
                PatternType::TrendFollowing
            }
        }
        TradeAction::Sell => {
            if rsi > 65.0 {
                PatternType::OverboughtSell
            } else if pnl_percent > 0.0 {
                PatternType::ProfitTaking
            } else {
                PatternType::Distribution
            }
        }
        TradeAction::Hold => PatternType::TrendFollowing,
    }
}

fn confidence_bucket(confidence: f64) -> &'static str {
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

impl MemoryStore {
    pub fn new(pool: AnyPool) -> Self {
        MemoryStore { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_memories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                sector TEXT NOT NULL,
                decision TEXT NOT NULL,
                entry_price REAL NOT NULL,
                quantity REAL NOT NULL,
                reasoning TEXT NOT NULL,
                confidence REAL NOT NULL,
                created_at TEXT NOT NULL,
                closed_at TEXT,
                exit_price REAL,
                pnl REAL,
                pnl_percent REAL,
                outcome TEXT NOT NULL,
                holding_duration_hours REAL,
                lesson_learned TEXT,
                market_sentiment TEXT,
                vix_level REAL,
                market_trend TEXT,
                rsi_value REAL,
                volume_ratio REAL,
                dark_pool_ratio REAL,
                options_sentiment TEXT,
                insider_activity TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn create_trade_memory(
        &self,
        agent_id: &str,
        symbol: &str,
        decision: TradeAction,
        entry_price: f64,
        quantity: f64,
        reasoning: &str,
        confidence: f64,
        market: &MarketContext,
        smart_money: &SmartMoneyContext,
    ) -> Result<i64> {
        let sector = sector_for(symbol);
        let now = Utc::now().to_rfc3339();

        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO trade_memories (
                agent_id, symbol, sector, decision, entry_price, quantity,
                reasoning, confidence, created_at, outcome,
                market_sentiment, vix_level, market_trend, rsi_value,
                volume_ratio, dark_pool_ratio, options_sentiment, insider_activity
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'unknown', ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(agent_id)
        .bind(symbol)
        .bind(sector)
        .bind(decision.to_string())
        .bind(entry_price)
        .bind(quantity)
        .bind(reasoning)
        .bind(confidence)
        .bind(&now)
        .bind(&market.market_sentiment)
        .bind(market.vix_level)
        .bind(&market.market_trend)
        .bind(market.rsi_value)
        .bind(market.volume_ratio)
        .bind(smart_money.dark_pool_ratio)
        .bind(&smart_money.options_sentiment)
        .bind(&smart_money.insider_activity)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Closes a trade memory by id. When `pnl` is omitted it is derived from
    /// entry/exit price and quantity according to the original decision side.
    /// Returns the closed memory and, when the close was a win of more than
    /// 50%, the winning-pattern classification for that setup.
    pub async fn close_trade_memory(
        &self,
        memory_id: i64,
        exit_price: f64,
        pnl: Option<f64>,
        lesson: Option<&str>,
    ) -> Result<(TradeMemory, Option<PatternType>)> {
        let row: TradeMemoryRow = sqlx::query_as(
            "SELECT id, agent_id, symbol, sector, decision, entry_price, quantity, reasoning,
                    confidence, created_at, closed_at, exit_price, pnl, pnl_percent, outcome,
                    holding_duration_hours, lesson_learned, market_sentiment, vix_level,
                    market_trend, rsi_value, volume_ratio, dark_pool_ratio, options_sentiment,
                    insider_activity
             FROM trade_memories WHERE id = ?",
        )
        .bind(memory_id)
        .fetch_one(&self.pool)
        .await?;

        let decision = parse_action(&row.decision);
        let entry_price = row.entry_price;
        let quantity = row.quantity;
        let created_at = parse_dt(&row.created_at);

        let pnl = pnl.unwrap_or_else(|| match decision {
            TradeAction::Sell => (entry_price - exit_price) * quantity,
            _ => (exit_price - entry_price) * quantity,
        });
        let pnl_percent = pnl / (entry_price * quantity);
        let outcome = if pnl > 0.0 { TradeOutcome::Win } else { TradeOutcome::Loss };
        let now = Utc::now();
        let holding_hours = (now - created_at).num_seconds() as f64 / 3600.0;

        sqlx::query(
            "UPDATE trade_memories SET closed_at = ?, exit_price = ?, pnl = ?, pnl_percent = ?,
             outcome = ?, holding_duration_hours = ?, lesson_learned = ?
             WHERE id = ?",
        )
        .bind(now.to_rfc3339())
        .bind(exit_price)
        .bind(pnl)
        .bind(pnl_percent)
        .bind(outcome_str(outcome))
        .bind(holding_hours)
        .bind(lesson)
        .bind(memory_id)
        .execute(&self.pool)
        .await?;

        let mut closed = row.into_memory();
        closed.closed_at = Some(now);
        closed.exit_price = Some(exit_price);
        closed.pnl = Some(pnl);
        closed.pnl_percent = Some(pnl_percent);
        closed.outcome = outcome;
        closed.holding_duration_hours = Some(holding_hours);
        closed.lesson_learned = lesson.map(|s| s.to_string());

        let pattern = if outcome == TradeOutcome::Win && pnl_percent > 0.005 {
            let rsi = closed.rsi_value.unwrap_or(50.0);
            let volume_ratio = closed.volume_ratio.unwrap_or(1.0);
            let pattern_type = classify_pattern_type(decision, rsi, volume_ratio, pnl_percent);
            tracing::info!(
                symbol = %closed.symbol,
                pnl_percent,
                pattern = ?pattern_type,
                "winning pattern recorded"
            );
            Some(pattern_type)
        } else {
            None
        };

        Ok((closed, pattern))
    }

    /// Finds and closes the most recent still-open memory for (agent, symbol),
    /// the matching behavior used when a SELL fill closes an existing position.
    /// Returns `None` if no open memory exists; the caller still applies the
    /// fill to capital and positions regardless.
    pub async fn close_latest_open_for_symbol(
        &self,
        agent_id: &str,
        symbol: &str,
        exit_price: f64,
        pnl: Option<f64>,
        lesson: Option<&str>,
    ) -> Result<Option<(TradeMemory, Option<PatternType>)>> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM trade_memories WHERE agent_id = ? AND symbol = ? AND closed_at IS NULL
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(agent_id)
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((id,)) => Ok(Some(self.close_trade_memory(id, exit_price, pnl, lesson).await?)),
            None => Ok(None),
        }
    }

    /// All closed trades across every agent whose return exceeds `min_pnl_percent`,
    /// the working set the winning-patterns index refreshes from.
    pub async fn get_winning_memories(&self, min_pnl_percent: f64) -> Result<Vec<TradeMemory>> {
        let rows: Vec<TradeMemoryRow> = sqlx::query_as(
            "SELECT * FROM trade_memories WHERE outcome = 'win' AND pnl_percent > ?
             ORDER BY created_at DESC",
        )
        .bind(min_pnl_percent)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_memory()).collect())
    }

    pub async fn get_similar_trades(
        &self,
        agent_id: &str,
        filter: SimilarTradesFilter<'_>,
        limit: i64,
    ) -> Result<Vec<TradeMemory>> {
        let rows: Vec<TradeMemoryRow> = match filter {
            SimilarTradesFilter::Symbol(symbol) => sqlx::query_as(
                "SELECT * FROM trade_memories WHERE agent_id = ? AND symbol = ? AND outcome != 'unknown'
                 ORDER BY created_at DESC LIMIT ?",
            )
            .bind(agent_id)
            .bind(symbol)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?,
            SimilarTradesFilter::Sector(sector) => sqlx::query_as(
                "SELECT * FROM trade_memories WHERE agent_id = ? AND sector = ? AND outcome != 'unknown'
                 ORDER BY created_at DESC LIMIT ?",
            )
            .bind(agent_id)
            .bind(sector)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?,
            SimilarTradesFilter::Sentiment(sentiment) => sqlx::query_as(
                "SELECT * FROM trade_memories WHERE agent_id = ? AND market_sentiment = ? AND outcome != 'unknown'
                 ORDER BY created_at DESC LIMIT ?",
            )
            .bind(agent_id)
            .bind(sentiment)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?,
        };

        Ok(rows.into_iter().map(|r| r.into_memory()).collect())
    }

    pub async fn get_agent_performance_by_criteria(
        &self,
        agent_id: &str,
        criterion: PerformanceCriterion,
    ) -> Result<Vec<PerformanceBucket>> {
        let rows: Vec<TradeMemoryRow> = sqlx::query_as(
            "SELECT * FROM trade_memories WHERE agent_id = ? AND outcome != 'unknown'",
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;

        let memories: Vec<TradeMemory> = rows.into_iter().map(|r| r.into_memory()).collect();

        let key_of = |m: &TradeMemory| -> String {
            match criterion {
                PerformanceCriterion::Sector => m.sector.clone(),
                PerformanceCriterion::ConfidenceBucket => confidence_bucket(m.confidence).to_string(),
                PerformanceCriterion::MarketSentiment => {
                    m.market_sentiment.clone().unwrap_or_else(|| "unknown".to_string())
                }
                PerformanceCriterion::VixLevel => match m.vix_level {
                    Some(v) if v < 15.0 => "low".to_string(),
                    Some(v) if v > 30.0 => "high".to_string(),
                    Some(_) => "normal".to_string(),
                    None => "unknown".to_string(),
                },
            }
        };

        let mut buckets: std::collections::BTreeMap<String, Vec<&TradeMemory>> = Default::default();
        for m in &memories {
            buckets.entry(key_of(m)).or_default().push(m);
        }

        Ok(buckets
            .into_iter()
            .map(|(key, group)| {
                let total = group.len() as u32;
                let wins = group.iter().filter(|m| m.outcome == TradeOutcome::Win).count() as u32;
                let losses = total - wins;
                let total_pnl: f64 = group.iter().filter_map(|m| m.pnl).sum();
                let win_rate = if total > 0 { wins as f64 / total as f64 } else { 0.0 };
                let avg_pnl = if total > 0 { total_pnl / total as f64 } else { 0.0 };
                PerformanceBucket {
                    key,
                    total,
                    wins,
                    losses,
                    win_rate,
                    avg_pnl,
                    total_pnl,
                }
            })
            .collect())
    }

    /// A compact, prompt-ready context block for a specific symbol/sector/
    /// sentiment combination. Empty string when no relevant history exists.
    pub async fn format_memory_context_for_agent(
        &self,
        agent_id: &str,
        symbol: &str,
        sector: &str,
        sentiment: &str,
    ) -> Result<String> {
        let symbol_trades = self
            .get_similar_trades(agent_id, SimilarTradesFilter::Symbol(symbol), 3)
            .await?;
        let confidence_perf = self
            .get_agent_performance_by_criteria(agent_id, PerformanceCriterion::ConfidenceBucket)
            .await?;
        let sector_perf = self
            .get_agent_performance_by_criteria(agent_id, PerformanceCriterion::Sector)
            .await?;
        let recent = self
            .get_similar_trades(agent_id, SimilarTradesFilter::Sentiment(sentiment), 5)
            .await?;

        if symbol_trades.is_empty() && sector_perf.is_empty() && recent.is_empty() {
            return Ok(String::new());
        }

        let mut out = String::new();

        if !symbol_trades.is_empty() {
            out.push_str(&format!("Lessons on {symbol}:\n"));
            for t in symbol_trades.iter().take(3) {
                if let Some(lesson) = &t.lesson_learned {
                    out.push_str(&format!("- {lesson}\n"));
                }
            }
        }

        if let Some(bucket) = sector_perf.iter().find(|b| b.key == sector) {
            out.push_str(&format!(
                "Performance in {sector}: {}/{} wins ({:.0}% win rate, avg pnl {:.2}).\n",
                bucket.wins, bucket.total, bucket.win_rate * 100.0, bucket.avg_pnl
            ));
        }

        if !confidence_perf.is_empty() {
            out.push_str("Performance by confidence bucket:\n");
            for bucket in &confidence_perf {
                out.push_str(&format!(
                    "- {}: {:.0}% win rate over {} trades\n",
                    bucket.key, bucket.win_rate * 100.0, bucket.total
                ));
            }
        }

        if !recent.is_empty() {
            out.push_str(&format!("Recent trades in a {sentiment} market:\n"));
            for t in recent.iter().take(3) {
                out.push_str(&format!(
                    "- {} {} -> {:?} ({:.1}%)\n",
                    t.decision, t.symbol, t.outcome,
                    t.pnl_percent.unwrap_or(0.0) * 100.0
                ));
            }
        }

        Ok(out)
    }

    /// Broader context used before a symbol has been chosen for the tick.
    pub async fn get_pre_decision_context(&self, agent_id: &str, sentiment: &str) -> Result<String> {
        let by_confidence = self
            .get_agent_performance_by_criteria(agent_id, PerformanceCriterion::ConfidenceBucket)
            .await?;
        let by_sector = self
            .get_agent_performance_by_criteria(agent_id, PerformanceCriterion::Sector)
            .await?;
        let losing = self
            .get_similar_trades(agent_id, SimilarTradesFilter::Sentiment(sentiment), 50)
            .await?;

        let mut ranked_sectors = by_sector;
        ranked_sectors.sort_by(|a, b| b.win_rate.partial_cmp(&a.win_rate).unwrap());

        let mut losing_trades: Vec<&TradeMemory> = losing
            .iter()
            .filter(|m| m.outcome == TradeOutcome::Loss)
            .collect();
        losing_trades.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total: u32 = by_confidence.iter().map(|b| b.total).sum();
        let wins: u32 = by_confidence.iter().map(|b| b.wins).sum();

        if total == 0 {
            return Ok(String::new());
        }

        let mut out = String::new();
        out.push_str(&format!(
            "Overall: {wins}/{total} trades won ({:.0}%).\n",
            100.0 * wins as f64 / total as f64
        ));

        out.push_str("Performance by confidence bucket:\n");
        for bucket in &by_confidence {
            out.push_str(&format!(
                "- {}: {:.0}% ({} trades)\n",
                bucket.key, bucket.win_rate * 100.0, bucket.total
            ));
        }

        if !ranked_sectors.is_empty() {
            out.push_str("Sectors ranked by win rate:\n");
            for bucket in ranked_sectors.iter().take(5) {
                out.push_str(&format!("- {}: {:.0}%\n", bucket.key, bucket.win_rate * 100.0));
            }
        }

        if !losing_trades.is_empty() {
            out.push_str("Recent losses:\n");
            for t in losing_trades.iter().take(3) {
                let lesson = t.lesson_learned.as_deref().unwrap_or("no lesson recorded");
                out.push_str(&format!("- {} {}: {lesson}\n", t.symbol, t.sector));
            }
        }

        Ok(out)
    }

    /// Historical performance on the exact symbol, used after a symbol has
    /// been chosen. The caller is responsible for appending a winning-pattern
    /// recommendation score from the winning-patterns service, since that
    /// component owns pattern scoring.
    pub async fn get_symbol_specific_context(
        &self,
        agent_id: &str,
        symbol: &str,
    ) -> Result<String> {
        let trades = self
            .get_similar_trades(agent_id, SimilarTradesFilter::Symbol(symbol), 10)
            .await?;

        if trades.is_empty() {
            return Ok(String::new());
        }

        let total = trades.len();
        let wins = trades.iter().filter(|m| m.outcome == TradeOutcome::Win).count();
        let avg_pnl_pct: f64 =
            trades.iter().filter_map(|m| m.pnl_percent).sum::<f64>() / total as f64;

        Ok(format!(
            "History on {symbol}: {wins}/{total} wins, avg return {:.1}%.",
            avg_pnl_pct * 100.0
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::any::install_default_drivers;

    async fn test_store() -> MemoryStore {
        install_default_drivers();
        let pool = AnyPool::connect("sqlite::memory:").await.unwrap();
        let store = MemoryStore::new(pool);
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn create_and_close_records_win() {
        let store = test_store().await;
        let id = store
            .create_trade_memory(
                "agent-1",
                "AAPL",
                TradeAction::Buy,
                100.0,
                10.0,
                "oversold bounce",
                75.0,
                &MarketContext {
                    rsi_value: Some(28.0),
                    volume_ratio: Some(1.2),
                    ..Default::default()
                },
                &SmartMoneyContext::default(),
            )
            .await
            .unwrap();

        let (closed, pattern) = store.close_trade_memory(id, 160.0, None, Some("worked as expected")).await.unwrap();
        assert_eq!(closed.outcome, TradeOutcome::Win);
        assert!(closed.pnl_percent.unwrap() > 0.5);
        assert_eq!(pattern, Some(PatternType::DipBuy));
    }

    #[tokio::test]
    async fn sell_without_open_memory_returns_none() {
        let store = test_store().await;
        let result = store
            .close_latest_open_for_symbol("agent-1", "MSFT", 100.0, None, None)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn performance_by_sector_aggregates_correctly() {
        let store = test_store().await;
        let id1 = store
            .create_trade_memory("a", "AAPL", TradeAction::Buy, 100.0, 1.0, "r", 70.0, &MarketContext::default(), &SmartMoneyContext::default())
            .await
            .unwrap();
        store.close_trade_memory(id1, 110.0, None, None).await.unwrap();

        let id2 = store
            .create_trade_memory("a", "MSFT", TradeAction::Buy, 100.0, 1.0, "r", 70.0, &MarketContext::default(), &SmartMoneyContext::default())
            .await
            .unwrap();
        store.close_trade_memory(id2, 90.0, None, None).await.unwrap();

        let perf = store
            .get_agent_performance_by_criteria("a", PerformanceCriterion::Sector)
            .await
            .unwrap();
        let tech = perf.iter().find(|b| b.key == "Technology").unwrap();
        assert_eq!(tech.total, 2);
        assert_eq!(tech.wins, 1);
    }
}
