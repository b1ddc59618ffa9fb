use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::US::Eastern;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockStatus {
    Open,
    ClosedWeekend,
    ClosedHoliday,
    ClosedBefore,
    ClosedAfter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingWindow {
    Optimal,
    Acceptable,
    AvoidOpening,
    AvoidClosing,
    MarketClosed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockState {
    pub is_open: bool,
    pub status: ClockStatus,
    pub window: TradingWindow,
    pub can_trade: bool,
    pub minutes_since_open: i64,
    pub minutes_until_close: i64,
    pub next_open: Option<DateTime<Utc>>,
}

const OPEN_HOUR: u32 = 9;
const OPEN_MINUTE: u32 = 30;
const CLOSE_HOUR: u32 = 16;
const CLOSE_MINUTE: u32 = 0;
const OPENING_AVOID_MINUTES: i64 = 30;
const CLOSING_AVOID_MINUTES: i64 = 15;
const OPTIMAL_START_HOUR: u32 = 10;
const OPTIMAL_END_HOUR: u32 = 15;

/// Classifies instants against the US equity exchange session.
pub struct MarketClock;

impl Default for MarketClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MarketClock {
    pub fn new() -> Self {
        MarketClock
    }

    pub fn evaluate(&self, at: DateTime<Utc>) -> ClockState {
        let local = at.with_timezone(&Eastern);
        let today = local.date_naive();

        if local.weekday() == Weekday::Sat || local.weekday() == Weekday::Sun {
            return ClockState {
                is_open: false,
                status: ClockStatus::ClosedWeekend,
                window: TradingWindow::MarketClosed,
                can_trade: false,
                minutes_since_open: 0,
                minutes_until_close: 0,
                next_open: Some(self.next_open_after(at)),
            };
        }

        if is_holiday(today) {
            return ClockState {
                is_open: false,
                status: ClockStatus::ClosedHoliday,
                window: TradingWindow::MarketClosed,
                can_trade: false,
                minutes_since_open: 0,
                minutes_until_close: 0,
                next_open: Some(self.next_open_after(at)),
            };
        }

        let open_time = NaiveTime::from_hms_opt(OPEN_HOUR, OPEN_MINUTE, 0).unwrap();
        let close_time = NaiveTime::from_hms_opt(CLOSE_HOUR, CLOSE_MINUTE, 0).unwrap();
        let local_time = local.time();

        if local_time < open_time {
            return ClockState {
                is_open: false,
                status: ClockStatus::ClosedBefore,
                window: TradingWindow::MarketClosed,
                can_trade: false,
                minutes_since_open: 0,
                minutes_until_close: 0,
                next_open: Some(self.next_open_after(at)),
            };
        }
        if local_time >= close_time {
            return ClockState {
                is_open: false,
                status: ClockStatus::ClosedAfter,
                window: TradingWindow::MarketClosed,
                can_trade: false,
                minutes_since_open: 0,
                minutes_until_close: 0,
                next_open: Some(self.next_open_after(at)),
            };
        }

        let minutes_since_open = (local_time - open_time).num_minutes();
        let minutes_until_close = (close_time - local_time).num_minutes();

        let window = if minutes_since_open < OPENING_AVOID_MINUTES {
            TradingWindow::AvoidOpening
        } else if minutes_until_close < CLOSING_AVOID_MINUTES {
            TradingWindow::AvoidClosing
        } else if local_time.hour() >= OPTIMAL_START_HOUR && local_time.hour() <= OPTIMAL_END_HOUR {
            TradingWindow::Optimal
        } else {
            TradingWindow::Acceptable
        };

        let can_trade = matches!(window, TradingWindow::Optimal | TradingWindow::Acceptable);

        ClockState {
            is_open: true,
            status: ClockStatus::Open,
            window,
            can_trade,
            minutes_since_open,
            minutes_until_close,
            next_open: None,
        }
    }

    fn next_open_after(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let mut candidate = at.with_timezone(&Eastern).date_naive();
        let open_time = NaiveTime::from_hms_opt(OPEN_HOUR, OPEN_MINUTE, 0).unwrap();
        // If we're already before today's open and today is a trading day, today qualifies.
        let today_open = Eastern
            .from_local_datetime(&candidate.and_time(open_time))
            .single();
        if let Some(today_open) = today_open {
            if at < today_open.with_timezone(&Utc)
                && candidate.weekday() != Weekday::Sat
                && candidate.weekday() != Weekday::Sun
                && !is_holiday(candidate)
            {
                return today_open.with_timezone(&Utc);
            }
        }
        loop {
            candidate += Duration::days(1);
            if candidate.weekday() != Weekday::Sat
                && candidate.weekday() != Weekday::Sun
                && !is_holiday(candidate)
            {
                if let Some(dt) = Eastern
                    .from_local_datetime(&candidate.and_time(open_time))
                    .single()
                {
                    return dt.with_timezone(&Utc);
                }
            }
        }
    }
}

/// Nth weekday-of-month helper (1-indexed occurrence), e.g. 3rd Monday of January.
fn nth_weekday(year: i32, month: u32, weekday: Weekday, nth: u32) -> NaiveDate {
    let first = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
    let offset = (7 + weekday.num_days_from_monday() as i64 - first.weekday().num_days_from_monday() as i64) % 7;
    first + Duration::days(offset + 7 * (nth as i64 - 1))
}

fn last_weekday(year: i32, month: u32, weekday: Weekday) -> NaiveDate {
    let next_month_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1).unwrap()
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1).unwrap()
    };
    let mut d = next_month_first - Duration::days(1);
    while d.weekday() != weekday {
        d -= Duration::days(1);
    }
    d
}

/// A fixed NYSE-style holiday set, computed per-year. Good Friday (a movable
/// feast tied to the Easter computus) is intentionally omitted rather than
/// approximated.
fn is_holiday(date: NaiveDate) -> bool {
    let year = date.year();
    let fixed: [NaiveDate; 8] = [
        NaiveDate::from_ymd_opt(year, 1, 1).unwrap(),
        nth_weekday(year, 1, Weekday::Mon, 3),
        nth_weekday(year, 2, Weekday::Mon, 3),
        last_weekday(year, 5, Weekday::Mon),
        NaiveDate::from_ymd_opt(year, 6, 19).unwrap(),
        NaiveDate::from_ymd_opt(year, 7, 4).unwrap(),
        nth_weekday(year, 9, Weekday::Mon, 1),
        nth_weekday(year, 11, Weekday::Thu, 4),
    ];
    if fixed.contains(&date) {
        return true;
    }
    date == NaiveDate::from_ymd_opt(year, 12, 25).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn et(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Eastern
            .with_ymd_and_hms(year, month, day, hour, minute, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn optimal_midday_weekday() {
        let clock = MarketClock::new();
        // 2026-07-29 is a Wednesday.
        let state = clock.evaluate(et(2026, 7, 29, 11, 0));
        assert!(state.is_open);
        assert!(state.can_trade);
        assert!(matches!(state.window, TradingWindow::Optimal));
    }

    #[test]
    fn avoid_opening_window_blocks_trading() {
        let clock = MarketClock::new();
        let state = clock.evaluate(et(2026, 7, 29, 9, 45));
        assert!(state.is_open);
        assert!(!state.can_trade);
        assert!(matches!(state.window, TradingWindow::AvoidOpening));
    }

    #[test]
    fn avoid_closing_window_blocks_trading() {
        let clock = MarketClock::new();
        let state = clock.evaluate(et(2026, 7, 29, 15, 50));
        assert!(!state.can_trade);
        assert!(matches!(state.window, TradingWindow::AvoidClosing));
    }

    #[test]
    fn weekend_is_closed() {
        let clock = MarketClock::new();
        // 2026-08-01 is a Saturday.
        let state = clock.evaluate(et(2026, 8, 1, 11, 0));
        assert!(!state.is_open);
        assert_eq!(state.status, ClockStatus::ClosedWeekend);
        assert!(state.next_open.is_some());
    }

    #[test]
    fn independence_day_is_a_holiday() {
        let clock = MarketClock::new();
        let state = clock.evaluate(et(2026, 7, 4, 11, 0));
        assert_eq!(state.status, ClockStatus::ClosedHoliday);
    }

    #[test]
    fn before_open_is_closed() {
        let clock = MarketClock::new();
        let state = clock.evaluate(et(2026, 7, 29, 8, 0));
        assert_eq!(state.status, ClockStatus::ClosedBefore);
    }
}
