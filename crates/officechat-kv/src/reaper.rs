use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::ReaperConfig;
use crate::metrics::ReaperMetrics;
use crate::{ExpirySweeper, KvError};

/// Periodically purges keys whose sentinel expiry has passed.
///
/// The sentinel hash is rewritten with read-modify-write, so exactly one
/// reaper should run per store.
pub struct ExpiryReaper {
    sweeper: Arc<dyn ExpirySweeper>,
    metrics: Arc<ReaperMetrics>,
    cfg: ReaperConfig,
}

impl ExpiryReaper {
    pub fn new(sweeper: Arc<dyn ExpirySweeper>, cfg: ReaperConfig) -> Self {
        Self {
            sweeper,
            metrics: Arc::new(ReaperMetrics::new()),
            cfg,
        }
    }

    pub fn metrics(&self) -> Arc<ReaperMetrics> {
        self.metrics.clone()
    }

    pub async fn sweep_once(&self) -> Result<usize, KvError> {
        self.metrics.inc_cycle();
        match self.sweeper.delete_expire_keys().await {
            Ok(n) => {
                self.metrics.inc_reaped(n as u64);
                if n > 0 {
                    debug!("Expire job removed {} key(s)", n);
                }
                Ok(n)
            }
            Err(e) => {
                self.metrics.inc_failure();
                Err(e)
            }
        }
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        if !self.cfg.enabled {
            info!("Expire job disabled");
            return;
        }
        info!("Expire job started, interval {:?}", self.cfg.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.cfg.interval) => {}
            }
            // A failed cycle leaves the sentinel untouched; the next one retries.
            if let Err(e) = self.sweep_once().await {
                error!("Expire job sweep failed: {}", e);
            }
        }

        info!("Expire job stopped");
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}
