// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Client-side quota for the Saxo OpenAPI.
//!
//! A rolling window shared by every account in the process, plus a hold
//! period set from the server's `Retry-After` header.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Shared rate limiter handle.
pub type SharedRateLimiter = Arc<RateLimiter>;

pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    state: Mutex<LimiterState>,
}

#[derive(Default)]
struct LimiterState {
    requests: VecDeque<Instant>,
    hold_until: Option<Instant>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            state: Mutex::new(LimiterState::default()),
        }
    }

    pub fn shared(max_requests: usize, window: Duration) -> SharedRateLimiter {
        Arc::new(Self::new(max_requests, window))
    }

    /// Wait until one more request fits in the quota, then record it.
    ///
    /// Waiters queue on the lock, so they are released in arrival order.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;

        if let Some(until) = state.hold_until.take() {
            if until > Instant::now() {
                tracing::debug!(
                    wait_ms = (until - Instant::now()).as_millis() as u64,
                    "Server rate limit active, waiting"
                );
                tokio::time::sleep_until(until).await;
            }
        }

        let now = Instant::now();
        state.prune(now, self.window);

        if state.requests.len() >= self.max_requests {
            if let Some(oldest) = state.requests.front().copied() {
                let ready_at = oldest + self.window;
                tracing::debug!(
                    wait_ms = ready_at.saturating_duration_since(now).as_millis() as u64,
                    "Client rate limit reached, waiting"
                );
                tokio::time::sleep_until(ready_at).await;
                state.prune(Instant::now(), self.window);
            }
        }

        state.requests.push_back(Instant::now());
    }

    /// Block new requests for `duration` (from a 429 `Retry-After`).
    pub async fn hold_for(&self, duration: Duration) {
        let until = Instant::now() + duration;
        let mut state = self.state.lock().await;
        state.hold_until = Some(match state.hold_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
    }

    /// Requests recorded in the current window.
    pub async fn in_window(&self) -> usize {
        let mut state = self.state.lock().await;
        state.prune(Instant::now(), self.window);
        state.requests.len()
    }
}

impl LimiterState {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(front) = self.requests.front() {
            if now.saturating_duration_since(*front) >= window {
                self.requests.pop_front();
            } else {
                break;
            }
        }
    }
}
