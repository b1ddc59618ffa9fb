use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use core_types::CoreError;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EarningsRisk {
    High,
    Medium,
    Low,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarningsInfo {
    pub earnings_date: Option<NaiveDate>,
    pub days_until: Option<i64>,
    pub risk: EarningsRisk,
    pub should_avoid_buy: bool,
    pub position_size_multiplier: f64,
    pub message: String,
}

/// Provides the next (or most recent) confirmed earnings date for a symbol.
/// Implementations talk to whatever upstream calendar feed is configured.
#[async_trait]
pub trait EarningsSource: Send + Sync {
    async fn next_earnings_date(&self, symbol: &str) -> Result<Option<NaiveDate>, CoreError>;
    async fn last_earnings_date(&self, symbol: &str) -> Result<Option<NaiveDate>, CoreError>;
}

struct CacheEntry {
    data: EarningsInfo,
    cached_at: DateTime<Utc>,
}

const CACHE_TTL: Duration = Duration::hours(6);

pub struct EarningsCalendar<S: EarningsSource> {
    source: S,
    cache: DashMap<String, CacheEntry>,
}

impl<S: EarningsSource> EarningsCalendar<S> {
    pub fn new(source: S) -> Self {
        EarningsCalendar {
            source,
            cache: DashMap::new(),
        }
    }

    pub async fn check_earnings(&self, symbol: &str, today: NaiveDate) -> EarningsInfo {
        if let Some(entry) = self.cache.get(symbol) {
            if Utc::now() - entry.cached_at < CACHE_TTL {
                return entry.data.clone();
            }
        }

        match self.fetch(symbol, today).await {
            Ok(info) => {
                self.cache.insert(
                    symbol.to_string(),
                    CacheEntry {
                        data: info.clone(),
                        cached_at: Utc::now(),
                    },
                );
                info
            }
            Err(err) => {
                tracing::warn!(symbol, error = %err, "earnings refresh failed, serving stale entry");
                if let Some(entry) = self.cache.get(symbol) {
                    entry.data.clone()
                } else {
                    no_earnings_known()
                }
            }
        }
    }

    async fn fetch(&self, symbol: &str, today: NaiveDate) -> Result<EarningsInfo, CoreError> {
        if let Some(upcoming) = self.source.next_earnings_date(symbol).await? {
            let days_until = (upcoming - today).num_days();
            if days_until >= 0 {
                return Ok(classify_upcoming(upcoming, days_until));
            }
        }

        if let Some(past) = self.source.last_earnings_date(symbol).await? {
            let days_since = (today - past).num_days();
            if (0..=2).contains(&days_since) {
                return Ok(EarningsInfo {
                    earnings_date: Some(past),
                    days_until: Some(-days_since),
                    risk: EarningsRisk::Medium,
                    should_avoid_buy: false,
                    position_size_multiplier: 0.75,
                    message: "recent earnings volatility".to_string(),
                });
            }
        }

        Ok(no_earnings_known())
    }
}

fn classify_upcoming(date: NaiveDate, days_until: i64) -> EarningsInfo {
    let (risk, avoid, multiplier) = if days_until <= 3 {
        (EarningsRisk::High, true, 0.0)
    } else if days_until <= 7 {
        (EarningsRisk::Medium, false, 0.5)
    } else if days_until <= 14 {
        (EarningsRisk::Low, false, 0.75)
    } else {
        (EarningsRisk::None, false, 1.0)
    };

    let message = match risk {
        EarningsRisk::High => format!("earnings in {days_until} days, avoid new positions"),
        EarningsRisk::Medium => format!("earnings in {days_until} days, reduce size"),
        EarningsRisk::Low => format!("earnings in {days_until} days"),
        EarningsRisk::None => "no near-term earnings risk".to_string(),
    };

    EarningsInfo {
        earnings_date: Some(date),
        days_until: Some(days_until),
        risk,
        should_avoid_buy: avoid,
        position_size_multiplier: multiplier,
        message,
    }
}

fn no_earnings_known() -> EarningsInfo {
    EarningsInfo {
        earnings_date: None,
        days_until: None,
        risk: EarningsRisk::None,
        should_avoid_buy: false,
        position_size_multiplier: 1.0,
        message: "no earnings date on file".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FixedSource {
        next: Option<NaiveDate>,
        last: Option<NaiveDate>,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl EarningsSource for FixedSource {
        async fn next_earnings_date(&self, _symbol: &str) -> Result<Option<NaiveDate>, CoreError> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.next)
        }
        async fn last_earnings_date(&self, _symbol: &str) -> Result<Option<NaiveDate>, CoreError> {
            Ok(self.last)
        }
    }

    #[tokio::test]
    async fn imminent_earnings_blocks_buys() {
        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let source = FixedSource {
            next: Some(today + Duration::days(2)),
            last: None,
            calls: Mutex::new(0),
        };
        let calendar = EarningsCalendar::new(source);
        let info = calendar.check_earnings("AAPL", today).await;
        assert_eq!(info.risk, EarningsRisk::High);
        assert!(info.should_avoid_buy);
        assert_eq!(info.position_size_multiplier, 0.0);
    }

    #[tokio::test]
    async fn distant_earnings_is_unrestricted() {
        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let source = FixedSource {
            next: Some(today + Duration::days(30)),
            last: None,
            calls: Mutex::new(0),
        };
        let calendar = EarningsCalendar::new(source);
        let info = calendar.check_earnings("AAPL", today).await;
        assert_eq!(info.risk, EarningsRisk::None);
        assert_eq!(info.position_size_multiplier, 1.0);
    }

    #[tokio::test]
    async fn cache_hit_skips_source_refetch() {
        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let source = FixedSource {
            next: Some(today + Duration::days(30)),
            last: None,
            calls: Mutex::new(0),
        };
        let calendar = EarningsCalendar::new(source);
        let _ = calendar.check_earnings("AAPL", today).await;
        let _ = calendar.check_earnings("AAPL", today).await;
        assert_eq!(*calendar.source.calls.lock().unwrap(), 1);
    }
}
