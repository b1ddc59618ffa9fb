use async_trait::async_trait;
use chrono::NaiveDate;
use core_types::CoreError;
use earnings_calendar::EarningsSource;
use smart_money::{InsiderSummary, OptionsSentiment, OptionsSummary, SmartMoneySource};
use std::sync::Arc;

use alpaca_broker::AlpacaClient;
use broker_trait::{BarTimeframe, BrokerClient};
use core_types::Bar;

/// Earnings source with no upstream calendar feed configured: always reports
/// no known earnings date. `check_earnings` therefore always returns
/// `EarningsRisk::None`, which is the conservative default when the
/// component has nothing to go on (recover-locally-as-neutral per the
/// ExternalUnavailable policy).
pub struct NoopEarningsSource;

#[async_trait]
impl EarningsSource for NoopEarningsSource {
    async fn next_earnings_date(&self, _symbol: &str) -> Result<Option<NaiveDate>, CoreError> {
        Ok(None)
    }

    async fn last_earnings_date(&self, _symbol: &str) -> Result<Option<NaiveDate>, CoreError> {
        Ok(None)
    }
}

/// Smart-money source backed by Alpaca for the realized-vol VIX proxy's
/// benchmark bars; options flow, dark-pool, and insider feeds are not wired
/// to a real provider, so they report neutral readings rather than failing
/// the whole snapshot.
pub struct AlpacaSmartMoneySource {
    broker: Arc<AlpacaClient>,
}

impl AlpacaSmartMoneySource {
    pub fn new(broker: Arc<AlpacaClient>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl SmartMoneySource for AlpacaSmartMoneySource {
    async fn options_summary(&self, _symbol: &str) -> Result<OptionsSummary, CoreError> {
        Ok(OptionsSummary {
            put_call_volume_ratio: 1.0,
            put_call_oi_ratio: 1.0,
            unusual_activity_count: 0,
            implied_volatility: 0.25,
            sentiment: OptionsSentiment::Neutral,
        })
    }

    async fn dark_pool_volume_ratio_5d(&self, _symbol: &str) -> Result<f64, CoreError> {
        Ok(0.50)
    }

    async fn insider_summary(&self, _symbol: &str) -> Result<InsiderSummary, CoreError> {
        Ok(InsiderSummary { buys: 0, sells: 0, net_sentiment: 0.0 })
    }

    async fn fear_greed_index(&self) -> Result<f64, CoreError> {
        Ok(50.0)
    }

    async fn benchmark_bars(&self) -> Result<Vec<Bar>, CoreError> {
        self.broker
            .get_market_data("SPY", BarTimeframe::OneDay, 30)
            .await
            .map_err(|e| CoreError::ExternalUnavailable(e.to_string()))
    }
}
