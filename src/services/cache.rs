// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Last-known-good store for slow-changing performance data.

use crate::models::PerformanceData;
use chrono::{DateTime, Duration, Utc};

/// A cached performance batch and when it was fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub data: PerformanceData,
    pub last_updated: DateTime<Utc>,
}

/// Performance cache.
///
/// Replaced wholesale on a successful fetch and never cleared on failure.
#[derive(Debug, Clone)]
pub struct PerformanceCache {
    interval: Duration,
    entry: Option<CacheEntry>,
}

impl PerformanceCache {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            entry: None,
        }
    }

    /// True when never populated or at least one interval old.
    pub fn is_update_due(&self, now: DateTime<Utc>) -> bool {
        match &self.entry {
            None => true,
            Some(entry) => now - entry.last_updated >= self.interval,
        }
    }

    pub fn get(&self) -> Option<&CacheEntry> {
        self.entry.as_ref()
    }

    /// Replace the entry and its timestamp together.
    pub fn update(&mut self, data: PerformanceData, now: DateTime<Utc>) {
        self.entry = Some(CacheEntry {
            data,
            last_updated: now,
        });
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.entry.as_ref().map(|e| e.last_updated)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
