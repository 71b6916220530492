//! Heartbeat reaper
//!
//! A single long-lived task that moves stale devices offline and
//! sweeps expired command-ack deadlines. It is the only component
//! allowed to offline a device for staleness; close-driven offlining
//! flows through the session-ended hook instead.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::registry::{DeviceRegistry, OfflineReason};
use crate::router::CommandRouter;
use crate::sessions::SessionManager;

pub struct HeartbeatReaper {
    registry: Arc<DeviceRegistry>,
    sessions: Arc<SessionManager>,
    router: Arc<CommandRouter>,
    interval: Duration,
    timeout: Duration,
}

impl HeartbeatReaper {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        sessions: Arc<SessionManager>,
        router: Arc<CommandRouter>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            sessions,
            router,
            interval,
            timeout,
        }
    }

    /// Spawn the reaper loop. Returns a shutdown sender; sending
    /// `true` stops the task after its current tick.
    pub fn start(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let reaper = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(reaper.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        reaper.run_once().await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("heartbeat reaper shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }

    /// One reaper pass: offline stale devices, then expire pending acks.
    pub async fn run_once(&self) {
        let stale = self.registry.stale_devices(self.timeout);
        for device_id in stale {
            tracing::warn!(device_id = %device_id, "heartbeat timed out");
            self.registry
                .mark_offline(&device_id, OfflineReason::Timeout)
                .await;
            self.sessions.close(&device_id, "timeout");
        }

        self.router.sweep_expired().await;
    }
}
