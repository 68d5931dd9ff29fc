// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-account polling task.

use crate::services::coordinator::UpdateCoordinator;
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

/// Controls one account's polling task.
pub struct SchedulerHandle {
    notify: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Start polling. The first wait is one full interval; the host runs the
    /// initial cycle itself.
    pub fn spawn(coordinator: Arc<UpdateCoordinator>) -> Self {
        let notify = Arc::new(Notify::new());
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(run(coordinator, notify.clone(), rx));
        Self {
            notify,
            shutdown,
            task,
        }
    }

    /// Run a cycle now. A request made during a cycle runs right after it.
    pub fn trigger(&self) {
        self.notify.notify_one();
    }

    /// Stop after any in-flight cycle finishes.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Scheduler task ended abnormally");
        }
    }
}

async fn run(
    coordinator: Arc<UpdateCoordinator>,
    notify: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) {
    let key = coordinator.key().to_string();
    tracing::debug!(account = %key, "Scheduler started");

    loop {
        let interval = coordinator.next_interval();
        let manual = tokio::select! {
            _ = tokio::time::sleep(interval) => false,
            _ = notify.notified() => true,
            _ = shutdown.changed() => break,
        };

        if manual {
            tracing::info!(account = %key, "Manual refresh requested");
        }
        // Outcome is logged and published by the coordinator
        let _ = coordinator.refresh().await;

        if *shutdown.borrow() {
            break;
        }
    }

    tracing::debug!(account = %key, "Scheduler stopped");
}
