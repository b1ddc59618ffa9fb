use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;

use crate::whitelist::WhitelistPolicy;

/// One configured trader agent: a personality wired to an OpenRouter model handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub id: String,
    pub name: String,
    pub model_handle: String,
    pub personality: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub trading_interval_minutes: u64,
    pub initial_capital_per_agent: f64,
    pub simulated_fee_per_trade: f64,
    pub max_position_percent: f64,
    pub paper_trading: bool,

    pub agents: Vec<AgentSpec>,
    pub whitelist_policy: WhitelistPolicy,

    pub alpaca_api_key: String,
    pub alpaca_secret_key: String,
    pub alpaca_base_url: String,

    pub openrouter_api_key: Option<String>,
    pub news_api_key: Option<String>,
    pub smart_money_api_key: Option<String>,

    pub database_url: String,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        let agents = default_agents();

        Ok(Self {
            trading_interval_minutes: env_or("TRADING_INTERVAL_MINUTES", "5").parse()?,
            initial_capital_per_agent: env_or("INITIAL_CAPITAL_PER_AGENT", "10000").parse()?,
            simulated_fee_per_trade: env_or("SIMULATED_FEE_PER_TRADE", "1.0").parse()?,
            max_position_percent: env_or("MAX_POSITION_PERCENT", "2.0").parse()?,
            paper_trading: env_or("PAPER_TRADING", "true").parse()?,

            agents,
            whitelist_policy: if env_or("WHITELIST_ALLOW_SUBSTITUTION", "false")
                .eq_ignore_ascii_case("true")
            {
                WhitelistPolicy::SubstituteSectorLeader
            } else {
                WhitelistPolicy::Reject
            },

            alpaca_api_key: env::var("ALPACA_API_KEY").context("ALPACA_API_KEY not set")?,
            alpaca_secret_key: env::var("ALPACA_SECRET_KEY")
                .context("ALPACA_SECRET_KEY not set")?,
            alpaca_base_url: env_or("ALPACA_BASE_URL", "https://paper-api.alpaca.markets"),

            openrouter_api_key: env::var("OPENROUTER_API_KEY").ok(),
            news_api_key: env::var("NEWS_API_KEY").ok(),
            smart_money_api_key: env::var("SMART_MONEY_API_KEY").ok(),

            database_url: env_or("DATABASE_URL", "sqlite:consortium.db"),
        })
    }
}

/// Default consortium of agents. Mirrors the "several independent trader
/// personalities" shape; model handles are per-agent strings understood by
/// the unified OpenRouter transport.
fn default_agents() -> Vec<AgentSpec> {
    vec![
        AgentSpec {
            id: "grok".to_string(),
            name: "Grok".to_string(),
            model_handle: env_or("AGENT_GROK_MODEL", "x-ai/grok-2-latest"),
            personality: "Aggressive momentum trader, favors high-conviction breakouts."
                .to_string(),
        },
        AgentSpec {
            id: "deepseek".to_string(),
            name: "DeepSeek".to_string(),
            model_handle: env_or("AGENT_DEEPSEEK_MODEL", "deepseek/deepseek-chat"),
            personality: "Quantitative and risk-averse, prefers mean-reversion setups."
                .to_string(),
        },
        AgentSpec {
            id: "gpt4o".to_string(),
            name: "GPT-4o".to_string(),
            model_handle: env_or("AGENT_GPT4O_MODEL", "openai/gpt-4o"),
            personality: "Balanced generalist, weighs technicals and smart-money signals evenly."
                .to_string(),
        },
    ]
}
