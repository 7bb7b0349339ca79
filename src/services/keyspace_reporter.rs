use crate::cache::ReplicaSet;
use crate::config::ReporterConfig;
use crate::error::AppError;
use crate::lifecycle::Service;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Periodically counts the keys matching a pattern across the primary's
/// nodes. Has no stop operation; it ends when its token is cancelled.
pub struct KeyspaceReporter {
    cache: Arc<ReplicaSet>,
    config: ReporterConfig,
}

impl KeyspaceReporter {
    pub fn new(cache: Arc<ReplicaSet>, config: ReporterConfig) -> Self {
        Self { cache, config }
    }

    /// Run one scan and log its result. Returns the number of keys found.
    pub async fn report(&self, cancel: &CancellationToken) -> usize {
        let outcome = self.cache.scan_all_keys(&self.config.pattern, cancel).await;
        let found = outcome.keys.len();

        match &outcome.error {
            None => info!("{} keys match {}", found, self.config.pattern),
            Some(e) => warn!(
                "{} keys match {} (partial: {})",
                found, self.config.pattern, e
            ),
        }
        found
    }
}

#[async_trait]
impl Service for KeyspaceReporter {
    fn name(&self) -> &str {
        "keyspace-reporter"
    }

    async fn up(&self, shutdown: CancellationToken) -> Result<(), AppError> {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.report(&shutdown).await;
                }
                _ = shutdown.cancelled() => return Ok(()),
            }
        }
    }
}
