//! Background drain scheduler.
//!
//! Drives queue draining from three triggers: a fixed-interval tick, the
//! immediate drain requests issued after enqueue/retry, and the external
//! connectivity-restored / app-foregrounded signals. Each trigger only
//! requests a drain; the engine's single-flight guard decides whether one
//! actually runs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::engine::SyncEngine;

/// Timer + signal loop that drains an engine's queue.
pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    tick_interval: Duration,
}

impl SyncScheduler {
    pub fn new(engine: Arc<SyncEngine>, tick_interval: Duration) -> Self {
        Self {
            engine,
            tick_interval,
        }
    }

    /// Spawn the scheduler on the current runtime.
    pub fn spawn(self) -> SchedulerHandle {
        let shutdown = Arc::new(Notify::new());
        let engine = self.engine.clone();
        let stop = shutdown.clone();
        let tick_interval = self.tick_interval;

        let join = tokio::spawn(async move {
            tracing::info!("sync scheduler started");

            // A drain requested before this task started (an enqueue racing
            // with spawn) is folded into the startup pass; the stored permit
            // must not fire the select arm again afterwards.
            let _ = tokio::time::timeout(Duration::ZERO, engine.drain_requested()).await;

            // Hydration may have left eligible work behind; drain it before
            // the first tick.
            if engine.has_eligible().await {
                drain(&engine).await;
            }

            let mut tick = tokio::time::interval(tick_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tick.tick().await; // consume the immediate first tick

            loop {
                tokio::select! {
                    _ = stop.notified() => {
                        tracing::info!("sync scheduler shutting down");
                        break;
                    }
                    _ = tick.tick() => {
                        if engine.has_eligible().await {
                            drain(&engine).await;
                        }
                    }
                    _ = engine.drain_requested() => {
                        drain(&engine).await;
                    }
                }
            }

            tracing::info!("sync scheduler stopped");
        });

        SchedulerHandle {
            engine: self.engine,
            shutdown,
            join,
        }
    }
}

async fn drain(engine: &SyncEngine) {
    if let Err(e) = engine.process_queue().await {
        tracing::error!(error = %e, "drain pass failed");
    }
}

/// Control handle for a running scheduler.
pub struct SchedulerHandle {
    engine: Arc<SyncEngine>,
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Ask for an immediate drain.
    pub fn request_drain(&self) {
        self.engine.request_drain();
    }

    /// Signal from the network monitor: connectivity is back.
    pub fn on_connectivity_restored(&self) {
        tracing::info!("connectivity restored; requesting drain");
        self.engine.request_drain();
    }

    /// Signal from the lifecycle monitor: the app returned to the
    /// foreground. Requests a drain only when work is outstanding.
    pub async fn on_app_foregrounded(&self) {
        if self.engine.has_eligible().await {
            tracing::info!("app foregrounded with outstanding work; requesting drain");
            self.engine.request_drain();
        }
    }

    /// Request graceful shutdown and wait for the loop to stop.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        let _ = self.join.await;
    }
}
