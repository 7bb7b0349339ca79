use crate::cache::command::{CacheableCommand, Command};
use crate::cache::redis::RedisBackend;
use crate::cache::scan::{scan_nodes, ScanOutcome, ScanPage};
use crate::cache::traits::{Backend, BatchReplies, CacheError};
use crate::config::BackendConfig;
use crate::metrics::MetricsSink;
use crate::protocol::RespValue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Page size hint passed to `SCAN`/`HSCAN`.
pub const SCAN_COUNT: u64 = 1000;

/// An ordered, fixed list of backends presented as one logical cache.
///
/// Index 0 is the primary: it answers reads first and its topology is the
/// one enumerated by [`ReplicaSet::scan_all_keys`].
pub struct ReplicaSet {
    backends: Vec<Arc<dyn Backend>>,
    metrics: Option<Arc<dyn MetricsSink>>,
    cache_ttl: Duration,
}

impl std::fmt::Debug for ReplicaSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.backends.iter().map(|b| b.name()).collect();
        f.debug_struct("ReplicaSet")
            .field("backends", &names)
            .field("cache_ttl", &self.cache_ttl)
            .finish()
    }
}

impl ReplicaSet {
    pub fn new(backends: Vec<Arc<dyn Backend>>) -> Result<Self, CacheError> {
        if backends.is_empty() {
            return Err(CacheError::EmptyReplicaSet);
        }
        Ok(Self {
            backends,
            metrics: None,
            cache_ttl: Duration::ZERO,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// TTL attached by the `cached_*` convenience reads.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Connect every descriptor in order. The first failure aborts
    /// construction and closes the backends already connected.
    pub async fn connect(
        configs: &[BackendConfig],
        default_client_name: &str,
        metrics: Option<Arc<dyn MetricsSink>>,
    ) -> Result<Self, CacheError> {
        if configs.is_empty() {
            return Err(CacheError::EmptyReplicaSet);
        }

        let mut backends: Vec<Arc<dyn Backend>> = Vec::with_capacity(configs.len());
        for (index, config) in configs.iter().enumerate() {
            match RedisBackend::connect(config, default_client_name).await {
                Ok(backend) => backends.push(Arc::new(backend)),
                Err(e) => {
                    for backend in &backends {
                        backend.close().await;
                    }
                    return Err(CacheError::Replica {
                        index,
                        name: config.name.clone(),
                        source: Box::new(e),
                    });
                }
            }
        }
        info!("Connected replica set of {} backends", backends.len());

        let mut set = Self::new(backends)?.with_cache_ttl(configs[0].ttl);
        set.metrics = metrics;
        Ok(set)
    }

    pub fn primary(&self) -> &Arc<dyn Backend> {
        &self.backends[0]
    }

    pub fn backends(&self) -> &[Arc<dyn Backend>] {
        &self.backends
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    pub(crate) fn record(&self, start: Instant, operation: &str, success: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record(start, operation, success);
        }
    }

    fn replica_error(&self, index: usize, source: CacheError) -> CacheError {
        if source.is_cancelled() {
            return source;
        }
        CacheError::Replica {
            index,
            name: self.backends[index].name().to_string(),
            source: Box::new(source),
        }
    }

    /// Run a command on the primary only.
    pub async fn execute(
        &self,
        command: &Command,
        cancel: &CancellationToken,
    ) -> Result<RespValue, CacheError> {
        let start = Instant::now();
        let result = self.primary().execute(command, cancel).await;
        self.record(start, &command.metric_name(), result.is_ok());
        result
    }

    /// Apply `command` to every backend in list order.
    ///
    /// Stops at the first backend returning an error other than a redirect
    /// notice. Backends already written are left as they are. Returns one
    /// reply per backend that accepted the command.
    pub async fn write_all(
        &self,
        command: &Command,
        cancel: &CancellationToken,
    ) -> Result<Vec<RespValue>, CacheError> {
        let operation = command.metric_name();
        let mut replies = Vec::with_capacity(self.backends.len());

        for (index, backend) in self.backends.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }

            let start = Instant::now();
            let result = backend.execute(command, cancel).await;
            self.record(start, &operation, result.is_ok());

            match result {
                Ok(reply) => replies.push(reply),
                Err(e) if e.is_redirect() => {
                    warn!(
                        "Tolerating redirect from {} (replica {}): {}",
                        backend.name(),
                        index,
                        e
                    );
                }
                Err(e) => return Err(self.replica_error(index, e)),
            }
        }
        Ok(replies)
    }

    /// Try backends in list order and return the first success.
    ///
    /// A null reply is a success. When every backend fails the last error is
    /// returned. Cancellation ends the fallback.
    pub async fn read_first(
        &self,
        command: &Command,
        cancel: &CancellationToken,
    ) -> Result<RespValue, CacheError> {
        let operation = command.metric_name();
        let mut last_error = CacheError::EmptyReplicaSet;

        for backend in &self.backends {
            if cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }

            let start = Instant::now();
            let result = backend.execute(command, cancel).await;
            self.record(start, &operation, result.is_ok());

            match result {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    debug!("Read from {} failed, trying next: {}", backend.name(), e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    /// Run a batch on every backend, last replica first and primary last.
    ///
    /// Non-primary backends receive generically re-encoded commands. Redirect
    /// notices inside a batch are tolerated; any other per-command error
    /// aborts the sweep.
    pub async fn exec_all(
        &self,
        commands: &[Command],
        cancel: &CancellationToken,
    ) -> Result<(), CacheError> {
        for (index, backend) in self.backends.iter().enumerate().rev() {
            if cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }

            let start = Instant::now();
            let result = if index == 0 {
                backend.execute_batch(commands, cancel).await
            } else {
                let generic: Vec<Command> = commands.iter().map(Command::to_generic).collect();
                backend.execute_batch(&generic, cancel).await
            };
            self.record(start, "redis_do_multi", result.is_ok());

            let replies = result.map_err(|e| self.replica_error(index, e))?;
            for (position, reply) in replies.into_iter().enumerate() {
                match reply {
                    Ok(_) => {}
                    Err(e) if e.is_redirect() => {
                        warn!(
                            "Tolerating redirect for batch command {} on {}: {}",
                            position,
                            backend.name(),
                            e
                        );
                    }
                    Err(e) => return Err(self.replica_error(index, e)),
                }
            }
        }
        Ok(())
    }

    /// Pipelined batch on the primary, one result per command.
    pub async fn execute_batch(
        &self,
        commands: &[Command],
        cancel: &CancellationToken,
    ) -> Result<BatchReplies, CacheError> {
        let start = Instant::now();
        let result = self.primary().execute_batch(commands, cancel).await;
        self.record(start, "redis_do_multi", result.is_ok());
        result
    }

    /// One `SCAN` page, read with fallback.
    pub async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: u64,
        cancel: &CancellationToken,
    ) -> Result<ScanPage, CacheError> {
        let reply = self
            .read_first(&Command::scan(cursor, pattern, count), cancel)
            .await?;
        ScanPage::from_reply(reply)
    }

    /// Enumerate every key matching `pattern` across the primary's nodes.
    ///
    /// Keys from nodes that finished are returned even when other nodes
    /// failed; their failures are joined into the outcome's error.
    pub async fn scan_all_keys(&self, pattern: &str, cancel: &CancellationToken) -> ScanOutcome {
        let start = Instant::now();
        let outcome = scan_nodes(self.primary().nodes(), pattern, SCAN_COUNT, cancel).await;
        self.record(start, "redis_scan_all", outcome.is_complete());
        outcome
    }

    /// Every field and value of the hash at `key`, as the flat
    /// `field, value, ...` sequence returned by `HSCAN`.
    pub async fn scan_all_fields(
        &self,
        key: &str,
        pattern: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, CacheError> {
        let start = Instant::now();
        let result = self.collect_fields(key, pattern, cancel).await;
        self.record(start, "redis_scan_all_fields", result.is_ok());
        result
    }

    // A cursor is only meaningful on the server that issued it, so a failed
    // walk restarts from cursor 0 on the next backend.
    async fn collect_fields(
        &self,
        key: &str,
        pattern: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, CacheError> {
        let mut last_error = CacheError::EmptyReplicaSet;
        for backend in &self.backends {
            if cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }
            match hscan_backend(backend.as_ref(), key, pattern, cancel).await {
                Ok(fields) => return Ok(fields),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    debug!("Field scan on {} failed, trying next: {}", backend.name(), e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    /// Cached read with fallback across backends.
    pub async fn exec_cached(
        &self,
        command: &CacheableCommand,
        cancel: &CancellationToken,
    ) -> Result<RespValue, CacheError> {
        let mut last_error = CacheError::EmptyReplicaSet;
        for backend in &self.backends {
            let start = Instant::now();
            let result = backend.execute_cached(command, cancel).await;
            self.record(start, "redis_docache", result.is_ok());
            match result {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }

    /// Batch of cached reads, falling back to the next backend when a whole
    /// batch fails to transmit.
    pub async fn exec_cached_batch(
        &self,
        commands: &[CacheableCommand],
        cancel: &CancellationToken,
    ) -> Result<BatchReplies, CacheError> {
        let mut last_error = CacheError::EmptyReplicaSet;
        for backend in &self.backends {
            let start = Instant::now();
            let result = backend.execute_cached_batch(commands, cancel).await;
            self.record(start, "redis_domulticache", result.is_ok());
            match result {
                Ok(replies) => return Ok(replies),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }

    pub async fn close(&self) {
        for backend in &self.backends {
            backend.close().await;
        }
    }
}

async fn hscan_backend(
    backend: &dyn Backend,
    key: &str,
    pattern: &str,
    cancel: &CancellationToken,
) -> Result<Vec<String>, CacheError> {
    let mut fields = Vec::new();
    let mut cursor = 0;
    loop {
        let reply = backend
            .execute(&Command::hscan(key, cursor, pattern, SCAN_COUNT), cancel)
            .await?;
        let page = ScanPage::from_reply(reply)?;
        fields.extend(page.elements);
        if page.cursor == 0 {
            return Ok(fields);
        }
        cursor = page.cursor;
    }
}
