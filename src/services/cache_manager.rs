use crate::cache::{Command, ReplicaSet};
use crate::error::AppError;
use crate::lifecycle::{Service, StoppableService};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Owns the replica set's connections: checks them on start, closes them
/// on stop.
pub struct CacheManager {
    cache: Arc<ReplicaSet>,
}

impl CacheManager {
    pub fn new(cache: Arc<ReplicaSet>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Service for CacheManager {
    fn name(&self) -> &str {
        "cache-manager"
    }

    async fn up(&self, shutdown: CancellationToken) -> Result<(), AppError> {
        let mut healthy = 0;
        for backend in self.cache.backends() {
            match backend.execute(&Command::ping(), &shutdown).await {
                Ok(_) => {
                    healthy += 1;
                    info!("Backend {} answered PING", backend.name());
                }
                Err(e) => warn!("Backend {} failed PING: {}", backend.name(), e),
            }
        }
        info!("{} of {} backends answered PING", healthy, self.cache.len());
        Ok(())
    }
}

#[async_trait]
impl StoppableService for CacheManager {
    async fn down(&self) -> Result<(), AppError> {
        self.cache.close().await;
        info!("Cache connections closed");
        Ok(())
    }
}
