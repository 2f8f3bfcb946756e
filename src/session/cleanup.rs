//! Background sweep of expired sessions and drained rate windows
//!
//! Reads already treat expired sessions as absent, so the sweep only reclaims memory. It runs
//! on its own task and never sits on the request path.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::store::{FailoverBackend, StoreBackend};

pub struct SessionSweeper {
    backend: Arc<FailoverBackend>,
    ttl: Duration,
    rate_window: Duration,
    every: Duration,
}

impl SessionSweeper {
    pub fn new(
        backend: Arc<FailoverBackend>,
        ttl: Duration,
        rate_window: Duration,
        every: Duration,
    ) -> Self {
        Self {
            backend,
            ttl,
            rate_window,
            every,
        }
    }

    /// Runs one pass and returns the number of sessions dropped
    pub async fn sweep_once(&self) -> usize {
        match self
            .backend
            .purge_expired(Utc::now(), self.ttl, self.rate_window)
            .await
        {
            Ok(purged) => {
                if purged > 0 {
                    info!(purged = purged, "Expired sessions swept");
                } else {
                    debug!("Session sweep found nothing to purge");
                }
                purged
            }
            Err(e) => {
                warn!(error = %e, "Session sweep failed");
                0
            }
        }
    }

    /// Spawns the periodic sweep
    ///
    /// Returns the task handle and a sender; sending `()` (or dropping the sender) stops it.
    pub fn start(self) -> (JoinHandle<()>, mpsc::Sender<()>) {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let handle = tokio::spawn(async move {
            let mut ticker = interval(self.every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; nothing can have expired yet.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep_once().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Session sweeper received shutdown signal");
                        break;
                    }
                }
            }
        });

        (handle, shutdown_tx)
    }
}
