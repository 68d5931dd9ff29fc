// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - polling, auth and scheduling.

pub mod cache;
pub mod coordinator;
pub mod oauth;
pub mod projection;
pub mod rate_limit;
pub mod registry;
pub mod saxo;
pub mod schedule;
pub mod scheduler;
pub mod sealing;

pub use cache::PerformanceCache;
pub use coordinator::{CoordinatorParts, HostSignal, UpdateCoordinator};
pub use oauth::{TokenManager, TokenProvider};
pub use projection::{Entity, StickyPolicy};
pub use rate_limit::RateLimiter;
pub use registry::Registry;
pub use saxo::{ApiFactory, PortfolioApi, SaxoClient, SaxoClientFactory, StartupPhase};
pub use schedule::Schedule;
pub use scheduler::SchedulerHandle;
pub use sealing::TokenSealer;
