// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Market-hours aware polling interval.

use crate::config::CoordinatorSettings;
use crate::models::account::SCHEDULE_ANY;
use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Timezone used when the configured one has no known market.
pub const DEFAULT_MARKET_TIMEZONE: &str = "America/New_York";

/// Regular trading session per exchange timezone (local open, local close).
const MARKETS: &[(&str, (u32, u32), (u32, u32))] = &[
    ("America/New_York", (9, 30), (16, 0)),
    ("America/Chicago", (8, 30), (15, 0)),
    ("America/Toronto", (9, 30), (16, 0)),
    ("Europe/London", (8, 0), (16, 30)),
    ("Europe/Amsterdam", (9, 0), (17, 30)),
    ("Europe/Paris", (9, 0), (17, 30)),
    ("Europe/Berlin", (9, 0), (17, 30)),
    ("Europe/Zurich", (9, 0), (17, 30)),
    ("Europe/Copenhagen", (9, 0), (17, 0)),
    ("Europe/Stockholm", (9, 0), (17, 30)),
    ("Asia/Tokyo", (9, 0), (15, 0)),
    ("Asia/Hong_Kong", (9, 30), (16, 0)),
    ("Asia/Singapore", (9, 0), (17, 0)),
    ("Australia/Sydney", (10, 0), (16, 0)),
];

#[derive(Debug, Clone)]
struct MarketHours {
    name: &'static str,
    tz: Tz,
    open: NaiveTime,
    close: NaiveTime,
}

impl MarketHours {
    fn lookup(name: &str) -> Option<Self> {
        let &(name, open, close) = MARKETS.iter().find(|(n, _, _)| *n == name)?;
        Some(Self {
            name,
            tz: name.parse().ok()?,
            open: NaiveTime::from_hms_opt(open.0, open.1, 0)?,
            close: NaiveTime::from_hms_opt(close.0, close.1, 0)?,
        })
    }

    fn is_open(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.tz);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let t = local.time();
        self.open <= t && t <= self.close
    }
}

/// Per-account polling schedule.
#[derive(Debug)]
pub struct Schedule {
    market: Option<MarketHours>,
    interval_market: Duration,
    interval_after_hours: Duration,
    interval_fixed: Duration,
    /// Last interval handed out, in ms; 0 before the first call
    last_interval_ms: AtomicU64,
}

impl Schedule {
    /// Build from the account's timezone setting (`any` or an IANA name).
    pub fn from_setting(timezone: &str, settings: &CoordinatorSettings) -> Self {
        let market = if timezone.eq_ignore_ascii_case(SCHEDULE_ANY) {
            None
        } else {
            match MarketHours::lookup(timezone) {
                Some(m) => Some(m),
                None => {
                    tracing::warn!(
                        timezone,
                        fallback = DEFAULT_MARKET_TIMEZONE,
                        "Unknown market timezone, using fallback"
                    );
                    MarketHours::lookup(DEFAULT_MARKET_TIMEZONE)
                }
            }
        };

        Self {
            market,
            interval_market: settings.interval_market_hours,
            interval_after_hours: settings.interval_after_hours,
            interval_fixed: settings.interval_fixed,
            last_interval_ms: AtomicU64::new(0),
        }
    }

    pub fn is_market_open(&self, now: DateTime<Utc>) -> bool {
        self.market.as_ref().is_some_and(|m| m.is_open(now))
    }

    /// Interval until the next cycle. Changes are logged once.
    pub fn update_interval(&self, now: DateTime<Utc>) -> Duration {
        let interval = self.current_interval(now);
        let ms = interval.as_millis() as u64;
        let previous = self.last_interval_ms.swap(ms, Ordering::Relaxed);
        if previous != ms {
            tracing::info!(
                interval_secs = interval.as_secs(),
                status = self.market_status(now),
                "Update interval changed"
            );
        }
        interval
    }

    /// Interval currently in effect without logging.
    pub fn current_interval(&self, now: DateTime<Utc>) -> Duration {
        match &self.market {
            None => self.interval_fixed,
            Some(m) if m.is_open(now) => self.interval_market,
            Some(_) => self.interval_after_hours,
        }
    }

    pub fn market_status(&self, now: DateTime<Utc>) -> &'static str {
        match &self.market {
            None => "Fixed Schedule",
            Some(m) if m.is_open(now) => "Market Open",
            Some(_) => "After Hours",
        }
    }

    /// Effective timezone, after any fallback.
    pub fn timezone(&self) -> &str {
        self.market.as_ref().map(|m| m.name).unwrap_or(SCHEDULE_ANY)
    }
}
