//! Market hours calendar.
//!
//! Single source of truth for whether an exchange is open and, from that,
//! how fresh cached data must be and how often the polling fallback should
//! fetch. Centralizing the policy here keeps TTLs consistent across every
//! call site.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, FixedOffset, NaiveTime, Utc, Weekday};
use once_cell::sync::Lazy;
use std::time::Duration;

use crate::domain::entities::exchange::Exchange;

/// IST, the timezone all supported exchanges trade in.
static IST: Lazy<FixedOffset> =
    Lazy::new(|| FixedOffset::east_opt(5 * 3600 + 1800).expect("IST offset is valid"));

fn ist() -> FixedOffset {
    *IST
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketState {
    PreOpen,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy)]
struct Session {
    pre_open: Option<NaiveTime>,
    open: NaiveTime,
    close: NaiveTime,
}

fn session_for(exchange: Exchange) -> Session {
    match exchange {
        Exchange::Nse | Exchange::Bse | Exchange::Nfo => Session {
            pre_open: NaiveTime::from_hms_opt(9, 0, 0),
            open: NaiveTime::from_hms_opt(9, 15, 0).expect("valid time"),
            close: NaiveTime::from_hms_opt(15, 30, 0).expect("valid time"),
        },
        Exchange::Mcx => Session {
            pre_open: None,
            open: NaiveTime::from_hms_opt(9, 0, 0).expect("valid time"),
            close: NaiveTime::from_hms_opt(23, 30, 0).expect("valid time"),
        },
    }
}

fn is_trading_day(weekday: Weekday) -> bool {
    !matches!(weekday, Weekday::Sat | Weekday::Sun)
}

/// Data sourcing policy derived from market state.
#[derive(Debug, Clone, Copy)]
pub struct SourcingPolicy {
    /// How long a cached quote stays fresh.
    pub cache_ttl: Duration,
    /// How often the REST fallback should poll.
    pub poll_interval: Duration,
    /// Whether push data should be trusted as the primary source.
    pub prefer_push: bool,
}

/// Market-hours clock with policy derivation.
#[derive(Debug, Clone)]
pub struct MarketHours {
    open_ttl: Duration,
    closed_poll_interval: Duration,
    max_closed_ttl: Duration,
}

impl Default for MarketHours {
    fn default() -> Self {
        MarketHours {
            open_ttl: Duration::from_secs(5),
            closed_poll_interval: Duration::from_secs(60),
            max_closed_ttl: Duration::from_secs(3600),
        }
    }
}

impl MarketHours {
    pub fn new(open_ttl: Duration, closed_poll_interval: Duration, max_closed_ttl: Duration) -> Self {
        MarketHours {
            open_ttl,
            closed_poll_interval,
            max_closed_ttl,
        }
    }

    pub fn state(&self, exchange: Exchange, now: DateTime<Utc>) -> MarketState {
        let local = now.with_timezone(&ist());
        if !is_trading_day(local.weekday()) {
            return MarketState::Closed;
        }
        let session = session_for(exchange);
        let time = local.time();
        if time >= session.open && time < session.close {
            return MarketState::Open;
        }
        if let Some(pre_open) = session.pre_open {
            if time >= pre_open && time < session.open {
                return MarketState::PreOpen;
            }
        }
        MarketState::Closed
    }

    pub fn is_open(&self, exchange: Exchange, now: DateTime<Utc>) -> bool {
        self.state(exchange, now) == MarketState::Open
    }

    /// Time of the next session open, skipping weekends.
    pub fn next_open(&self, exchange: Exchange, now: DateTime<Utc>) -> DateTime<Utc> {
        let session = session_for(exchange);
        let mut local = now.with_timezone(&ist());
        for _ in 0..8 {
            if is_trading_day(local.weekday()) && local.time() < session.open {
                let open = local.date_naive().and_time(session.open);
                if let Some(open) = open.and_local_timezone(ist()).single() {
                    return open.with_timezone(&Utc);
                }
            }
            local = (local + ChronoDuration::days(1))
                .date_naive()
                .and_time(NaiveTime::MIN)
                .and_local_timezone(ist())
                .single()
                .unwrap_or(local + ChronoDuration::days(1));
        }
        // Unreachable in practice; fall back to a day ahead
        now + ChronoDuration::days(1)
    }

    /// The sourcing policy for an exchange at a moment in time.
    ///
    /// Open: short TTL, push preferred. Closed: poll slowly and keep cached
    /// values until the next open, capped.
    pub fn policy(&self, exchange: Exchange, now: DateTime<Utc>) -> SourcingPolicy {
        match self.state(exchange, now) {
            MarketState::Open | MarketState::PreOpen => SourcingPolicy {
                cache_ttl: self.open_ttl,
                poll_interval: self.open_ttl.max(Duration::from_secs(1)),
                prefer_push: true,
            },
            MarketState::Closed => {
                let until_open = (self.next_open(exchange, now) - now)
                    .to_std()
                    .unwrap_or(self.max_closed_ttl);
                SourcingPolicy {
                    cache_ttl: until_open.min(self.max_closed_ttl),
                    poll_interval: self.closed_poll_interval,
                    prefer_push: false,
                }
            }
        }
    }
}
