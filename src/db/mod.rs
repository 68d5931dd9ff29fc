// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Storage layer (account records and sealed tokens).

pub mod store;

pub use store::{AccountStore, StoreEvent};
