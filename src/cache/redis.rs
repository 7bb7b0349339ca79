use crate::cache::command::{CacheableCommand, Command};
use crate::cache::connection::DialOptions;
use crate::cache::local_cache::ClientCache;
use crate::cache::node::NodeClient;
use crate::cache::topology::{slot_for_key, ClusterTopology};
use crate::cache::traits::{Backend, BatchReplies, CacheError, Node};
use crate::config::BackendConfig;
use crate::protocol::RespValue;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Backend speaking RESP to a standalone, sentinel-managed or cluster
/// deployment.
pub struct RedisBackend {
    name: String,
    options: Arc<DialOptions>,
    nodes: Vec<Arc<NodeClient>>,
    // Slot owner per cluster slot, `None` for a standalone deployment.
    slots: Option<Vec<Option<usize>>>,
    redirects: DashMap<String, Arc<NodeClient>>,
    cache: Option<ClientCache>,
}

fn dial_options(config: &BackendConfig, default_client_name: &str) -> DialOptions {
    DialOptions {
        username: config.username.clone(),
        password: config.password.clone(),
        client_name: config
            .client_name
            .clone()
            .unwrap_or_else(|| default_client_name.to_string()),
        dial_timeout: config.dial_timeout,
        read_timeout: config.read_timeout,
        disable_retry: config.disable_retry,
        always_pipelining: config.always_pipelining,
        pipeline_multiplex: config.pipeline_multiplex.max(1),
    }
}

impl RedisBackend {
    /// Connect to the deployment described by `config` and discover its
    /// topology.
    pub async fn connect(
        config: &BackendConfig,
        default_client_name: &str,
    ) -> Result<Self, CacheError> {
        let options = Arc::new(dial_options(config, default_client_name));

        let seeds = match &config.sentinel_primary {
            Some(primary) => vec![resolve_primary(&config.hosts, primary, &options).await?],
            None => config.hosts.clone(),
        };

        let mut last_error = None;
        for seed in &seeds {
            match NodeClient::connect(seed, options.clone()).await {
                Ok(node) => {
                    let standalone = config.force_single_client || config.sentinel_primary.is_some();
                    return Self::discover(config, options, Arc::new(node), standalone).await;
                }
                Err(e) => {
                    warn!("Backend {}: seed {} unreachable: {}", config.name, seed, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            CacheError::Connection(format!("backend {} has no hosts", config.name))
        }))
    }

    async fn discover(
        config: &BackendConfig,
        options: Arc<DialOptions>,
        seed: Arc<NodeClient>,
        standalone: bool,
    ) -> Result<Self, CacheError> {
        let mut backend = Self {
            name: config.name.clone(),
            options: options.clone(),
            nodes: vec![seed.clone()],
            slots: None,
            redirects: DashMap::new(),
            cache: (!config.disable_cache).then(ClientCache::new),
        };
        if standalone {
            info!("Backend {}: standalone at {}", backend.name, seed.address());
            return Ok(backend);
        }

        let cancel = CancellationToken::new();
        let text = match seed.execute(&Command::cluster_nodes(), &cancel).await {
            Ok(reply) => reply
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| CacheError::Protocol("unexpected CLUSTER NODES reply".to_string()))?,
            Err(CacheError::Server(message)) => {
                debug!("Backend {}: no cluster support ({})", backend.name, message);
                info!("Backend {}: standalone at {}", backend.name, seed.address());
                return Ok(backend);
            }
            Err(e) => return Err(e),
        };

        let routes = ClusterTopology::parse(&text)?.routes(config.replica_only);
        let mut nodes = Vec::with_capacity(routes.addresses.len());
        for address in &routes.addresses {
            if address == seed.address() {
                nodes.push(seed.clone());
            } else {
                nodes.push(Arc::new(NodeClient::connect(address, options.clone()).await?));
            }
        }
        if !nodes.iter().any(|n| Arc::ptr_eq(n, &seed)) {
            seed.close().await;
        }

        info!("Backend {}: cluster with {} nodes", backend.name, nodes.len());
        backend.nodes = nodes;
        backend.slots = Some(routes.slots);
        Ok(backend)
    }

    // Keyless commands and unowned slots go to the first node.
    fn route_index(&self, command: &Command) -> usize {
        match (&self.slots, command.routing_key()) {
            (Some(slots), Some(key)) => slots[slot_for_key(key.as_bytes()) as usize].unwrap_or(0),
            _ => 0,
        }
    }

    fn route(&self, command: &Command) -> &Arc<NodeClient> {
        &self.nodes[self.route_index(command)]
    }

    async fn redirect_target(&self, address: &str) -> Result<Arc<NodeClient>, CacheError> {
        if let Some(node) = self.nodes.iter().find(|n| n.address() == address) {
            return Ok(node.clone());
        }
        if let Some(node) = self.redirects.get(address) {
            return Ok(node.clone());
        }

        let node = Arc::new(NodeClient::connect(address, self.options.clone()).await?);
        self.redirects.insert(address.to_string(), node.clone());
        Ok(node)
    }

    fn invalidate(&self, command: &Command) {
        if let (Some(cache), Some(key)) = (&self.cache, command.routing_key()) {
            if command.is_mutating() {
                cache.invalidate_key(key);
            }
        }
    }

    async fn send_group(
        &self,
        node: &NodeClient,
        commands: &[&Command],
        cancel: &CancellationToken,
    ) -> Result<Vec<RespValue>, CacheError> {
        if self.options.always_pipelining {
            return node.pipeline(commands, cancel).await;
        }
        let mut replies = Vec::with_capacity(commands.len());
        for command in commands {
            replies.extend(node.pipeline(&[*command], cancel).await?);
        }
        Ok(replies)
    }
}

async fn resolve_primary(
    sentinels: &[String],
    primary: &str,
    options: &Arc<DialOptions>,
) -> Result<String, CacheError> {
    let cancel = CancellationToken::new();
    let mut last_error = None;

    for sentinel in sentinels {
        let attempt = async {
            let node = NodeClient::connect(sentinel, options.clone()).await?;
            let reply = node
                .execute(&Command::sentinel_primary_addr(primary), &cancel)
                .await;
            node.close().await;

            let parts = reply?
                .into_elements()
                .ok_or_else(|| CacheError::Protocol("unexpected sentinel reply".to_string()))?;
            match parts.as_slice() {
                [host, port] => match (host.as_str(), port.as_str()) {
                    (Some(host), Some(port)) => Ok(format!("{}:{}", host, port)),
                    _ => Err(CacheError::Protocol("unexpected sentinel reply".to_string())),
                },
                _ => Err(CacheError::Connection(format!(
                    "sentinel {} does not know primary {}",
                    sentinel, primary
                ))),
            }
        };

        match attempt.await {
            Ok(address) => {
                info!("Sentinel {} reports primary {} at {}", sentinel, primary, address);
                return Ok(address);
            }
            Err(e) => {
                warn!("Sentinel {} failed: {}", sentinel, e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| CacheError::Connection("no sentinel hosts configured".to_string())))
}

#[async_trait]
impl Backend for RedisBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        command: &Command,
        cancel: &CancellationToken,
    ) -> Result<RespValue, CacheError> {
        let result = match self.route(command).execute(command, cancel).await {
            Err(CacheError::Redirect { address, .. }) if !self.options.disable_retry => {
                debug!("Backend {}: following redirect to {}", self.name, address);
                self.redirect_target(&address)
                    .await?
                    .execute(command, cancel)
                    .await
            }
            other => other,
        };

        if result.is_ok() {
            self.invalidate(command);
        }
        result
    }

    async fn execute_batch(
        &self,
        commands: &[Command],
        cancel: &CancellationToken,
    ) -> Result<BatchReplies, CacheError> {
        let mut groups: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (i, command) in commands.iter().enumerate() {
            groups[self.route_index(command)].push(i);
        }

        let mut replies: Vec<Option<RespValue>> = vec![None; commands.len()];
        for (node, positions) in self.nodes.iter().zip(&groups) {
            if positions.is_empty() {
                continue;
            }
            let group: Vec<&Command> = positions.iter().map(|&i| &commands[i]).collect();
            let group_replies = self.send_group(node, &group, cancel).await?;
            for (&i, reply) in positions.iter().zip(group_replies) {
                replies[i] = Some(reply);
            }
        }

        Ok(commands
            .iter()
            .zip(replies)
            .map(|(command, reply)| {
                let reply = reply.ok_or_else(|| CacheError::Protocol("missing reply".to_string()))?;
                let result = CacheError::check_reply(reply);
                if result.is_ok() {
                    self.invalidate(command);
                }
                result
            })
            .collect())
    }

    async fn execute_cached(
        &self,
        command: &CacheableCommand,
        cancel: &CancellationToken,
    ) -> Result<RespValue, CacheError> {
        let cache = match &self.cache {
            Some(cache) => cache,
            None => return self.execute(&command.command, cancel).await,
        };

        let cache_key = command.command.cache_key();
        if let Some(reply) = cache.get(&cache_key) {
            return Ok(reply);
        }

        let reply = self.execute(&command.command, cancel).await?;
        cache.insert(
            cache_key,
            command.command.routing_key(),
            reply.clone(),
            command.ttl,
        );
        Ok(reply)
    }

    async fn execute_cached_batch(
        &self,
        commands: &[CacheableCommand],
        cancel: &CancellationToken,
    ) -> Result<BatchReplies, CacheError> {
        let cache = match &self.cache {
            Some(cache) => cache,
            None => {
                let plain: Vec<Command> = commands.iter().map(|c| c.command.clone()).collect();
                return self.execute_batch(&plain, cancel).await;
            }
        };

        let mut results: Vec<Option<Result<RespValue, CacheError>>> = commands
            .iter()
            .map(|c| cache.get(&c.command.cache_key()).map(Ok))
            .collect();

        let misses: Vec<usize> = (0..commands.len()).filter(|&i| results[i].is_none()).collect();
        if !misses.is_empty() {
            let plain: Vec<Command> = misses.iter().map(|&i| commands[i].command.clone()).collect();
            let fetched = self.execute_batch(&plain, cancel).await?;
            for (&i, result) in misses.iter().zip(fetched) {
                if let Ok(reply) = &result {
                    let command = &commands[i];
                    cache.insert(
                        command.command.cache_key(),
                        command.command.routing_key(),
                        reply.clone(),
                        command.ttl,
                    );
                }
                results[i] = Some(result);
            }
        }

        Ok(results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(CacheError::Protocol("missing reply".to_string()))))
            .collect())
    }

    fn nodes(&self) -> Vec<Arc<dyn Node>> {
        self.nodes
            .iter()
            .map(|n| n.clone() as Arc<dyn Node>)
            .collect()
    }

    async fn close(&self) {
        for node in &self.nodes {
            node.close().await;
        }
        let redirected: Vec<Arc<NodeClient>> =
            self.redirects.iter().map(|e| e.value().clone()).collect();
        self.redirects.clear();
        for node in redirected {
            node.close().await;
        }
        if let Some(cache) = &self.cache {
            cache.clear();
        }
        info!("Backend {} closed", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RespParser;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    // Standalone server over a shared map. Rejects CLUSTER and counts GETs.
    async fn fake_server() -> (String, Arc<Mutex<usize>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let data: Arc<Mutex<HashMap<String, String>>> = Arc::default();
        let gets: Arc<Mutex<usize>> = Arc::default();
        let gets_out = gets.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let data = data.clone();
                let gets = gets.clone();
                tokio::spawn(async move {
                    let mut parser = RespParser::new();
                    let mut buf = [0u8; 1024];
                    loop {
                        let n = match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => n,
                        };
                        parser.add_data(&buf[..n]);
                        while let Ok(Some(request)) = parser.parse() {
                            let parts: Vec<String> = request
                                .into_elements()
                                .unwrap_or_default()
                                .iter()
                                .filter_map(|p| p.as_str().map(str::to_string))
                                .collect();
                            let reply = match parts[0].as_str() {
                                "GET" => {
                                    *gets.lock().unwrap() += 1;
                                    match data.lock().unwrap().get(&parts[1]) {
                                        Some(v) => RespValue::BulkString(Some(v.clone())),
                                        None => RespValue::BulkString(None),
                                    }
                                }
                                "SET" => {
                                    data.lock().unwrap().insert(parts[1].clone(), parts[2].clone());
                                    RespValue::SimpleString("OK".to_string())
                                }
                                "CLIENT" => RespValue::SimpleString("OK".to_string()),
                                "DEL" => {
                                    let removed = data.lock().unwrap().remove(&parts[1]);
                                    RespValue::Integer(removed.is_some() as i64)
                                }
                                _ => RespValue::Error(
                                    "ERR This instance has cluster support disabled".to_string(),
                                ),
                            };
                            if socket.write_all(&reply.to_bytes()).await.is_err() {
                                return;
                            }
                        }
                    }
                });
            }
        });

        (address, gets_out)
    }

    fn config(address: &str) -> BackendConfig {
        BackendConfig {
            name: "primary".to_string(),
            hosts: vec![address.to_string()],
            ..BackendConfig::default()
        }
    }

    #[tokio::test]
    async fn test_standalone_discovery_and_commands() {
        let (address, _) = fake_server().await;
        let backend = RedisBackend::connect(&config(&address), "test").await.unwrap();
        let cancel = CancellationToken::new();

        assert_eq!(backend.nodes().len(), 1);
        backend
            .execute(&Command::set("k", "v", None), &cancel)
            .await
            .unwrap();
        let reply = backend.execute(&Command::get("k"), &cancel).await.unwrap();
        assert_eq!(reply.as_str(), Some("v"));

        let missing = backend.execute(&Command::get("nope"), &cancel).await.unwrap();
        assert!(missing.is_null());
    }

    #[tokio::test]
    async fn test_batch_keeps_input_order() {
        let (address, _) = fake_server().await;
        let backend = RedisBackend::connect(&config(&address), "test").await.unwrap();
        let cancel = CancellationToken::new();

        let replies = backend
            .execute_batch(
                &[
                    Command::set("a", "1", None),
                    Command::get("a"),
                    Command::generic(vec!["BOGUS".into()], false),
                ],
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(replies.len(), 3);
        assert!(replies[0].is_ok());
        assert_eq!(replies[1].as_ref().unwrap().as_str(), Some("1"));
        assert!(replies[2].is_err());
    }

    #[tokio::test]
    async fn test_cached_reads_and_invalidation() {
        let (address, gets) = fake_server().await;
        let backend = RedisBackend::connect(&config(&address), "test").await.unwrap();
        let cancel = CancellationToken::new();
        let ttl = std::time::Duration::from_secs(60);

        backend.execute(&Command::set("k", "v1", None), &cancel).await.unwrap();
        for _ in 0..3 {
            let reply = backend
                .execute_cached(&Command::get("k").cacheable(ttl), &cancel)
                .await
                .unwrap();
            assert_eq!(reply.as_str(), Some("v1"));
        }
        assert_eq!(*gets.lock().unwrap(), 1);

        backend.execute(&Command::set("k", "v2", None), &cancel).await.unwrap();
        let reply = backend
            .execute_cached(&Command::get("k").cacheable(ttl), &cancel)
            .await
            .unwrap();
        assert_eq!(reply.as_str(), Some("v2"));
        assert_eq!(*gets.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_hosts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        assert!(RedisBackend::connect(&config(&address), "test").await.is_err());
        assert!(RedisBackend::connect(&BackendConfig::default(), "test").await.is_err());
    }
}
