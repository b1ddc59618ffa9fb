use rand::seq::SliceRandom;

/// Extra popular ETFs not already classified by `memory_store::sector_for`.
const EXTRA_ETFS: &[&str] = &[
    "VTI", "VOO", "ARKK", "XLK", "XLF", "XLE", "XLY", "XLV", "GLD", "SLV", "TQQQ", "SQQQ",
];

/// Heuristic sector leaders offered back when substitution is enabled.
const SECTOR_LEADERS: &[&str] = &["AAPL", "MSFT", "NVDA", "GOOGL", "AMZN"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhitelistPolicy {
    /// Reject a ticker outside the allow-set with a reason. Default.
    Reject,
    /// Silently substitute a heuristic sector leader. Opt-in only.
    SubstituteSectorLeader,
}

impl Default for WhitelistPolicy {
    fn default() -> Self {
        WhitelistPolicy::Reject
    }
}

pub fn is_whitelisted(symbol: &str) -> bool {
    memory_store::sector_for(symbol) != "Unknown" || EXTRA_ETFS.contains(&symbol)
}

/// Outcome of running a proposed symbol through the whitelist.
pub enum WhitelistOutcome {
    Allowed(String),
    Rejected { reason: String },
    Substituted { original: String, substitute: String },
}

pub fn enforce(symbol: &str, policy: WhitelistPolicy) -> WhitelistOutcome {
    if is_whitelisted(symbol) {
        return WhitelistOutcome::Allowed(symbol.to_string());
    }
    match policy {
        WhitelistPolicy::Reject => WhitelistOutcome::Rejected {
            reason: format!("{symbol} is not on the trading whitelist"),
        },
        WhitelistPolicy::SubstituteSectorLeader => {
            let substitute = SECTOR_LEADERS
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or("AAPL")
                .to_string();
            WhitelistOutcome::Substituted { original: symbol.to_string(), substitute }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tickers_pass() {
        assert!(is_whitelisted("AAPL"));
        assert!(is_whitelisted("SPY"));
        assert!(is_whitelisted("ARKK"));
    }

    #[test]
    fn unknown_ticker_rejected_by_default() {
        match enforce("ZZZZ", WhitelistPolicy::Reject) {
            WhitelistOutcome::Rejected { .. } => {}
            _ => panic!("expected rejection"),
        }
    }

    #[test]
    fn unknown_ticker_substituted_when_opted_in() {
        match enforce("ZZZZ", WhitelistPolicy::SubstituteSectorLeader) {
            WhitelistOutcome::Substituted { original, substitute } => {
                assert_eq!(original, "ZZZZ");
                assert!(is_whitelisted(&substitute));
            }
            _ => panic!("expected substitution"),
        }
    }
}
