//! Cursor-driven keyspace enumeration.

use crate::cache::command::Command;
use crate::cache::traits::{CacheError, Node};
use crate::protocol::RespValue;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One page of a `SCAN`-family reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPage {
    pub cursor: u64,
    pub elements: Vec<String>,
}

impl ScanPage {
    /// Parse `[cursor, [element, ...]]`.
    pub fn from_reply(reply: RespValue) -> Result<Self, CacheError> {
        let invalid = || CacheError::Protocol("malformed scan reply".to_string());

        let mut parts = reply.into_elements().ok_or_else(invalid)?.into_iter();
        let cursor = parts
            .next()
            .and_then(|c| c.as_integer())
            .ok_or_else(invalid)?;
        let elements = parts
            .next()
            .and_then(RespValue::into_elements)
            .ok_or_else(invalid)?
            .into_iter()
            .filter_map(|e| e.as_str().map(str::to_string))
            .collect();

        Ok(Self {
            cursor: cursor as u64,
            elements,
        })
    }
}

/// Keys discovered by a fan-out scan together with the joined failure of
/// the nodes that did not finish.
#[derive(Debug)]
pub struct ScanOutcome {
    pub keys: HashSet<String>,
    pub error: Option<CacheError>,
}

impl ScanOutcome {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    /// Discard the partial key set when any node failed.
    pub fn into_result(self) -> Result<HashSet<String>, CacheError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.keys),
        }
    }
}

/// Walk one node's keyspace from cursor 0 until the cursor wraps back to 0,
/// adding every page to `keys`.
pub async fn scan_node(
    node: &dyn Node,
    pattern: &str,
    count: u64,
    keys: &Mutex<HashSet<String>>,
    cancel: &CancellationToken,
) -> Result<(), CacheError> {
    let mut cursor = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        let reply = node
            .execute(&Command::scan(cursor, pattern, count), cancel)
            .await?;
        let page = ScanPage::from_reply(reply)?;
        keys.lock().await.extend(page.elements);

        if page.cursor == 0 {
            return Ok(());
        }
        cursor = page.cursor;
    }
}

/// Scan every node concurrently and wait for all of them, merging keys into
/// one deduplicated set.
pub async fn scan_nodes(
    nodes: Vec<Arc<dyn Node>>,
    pattern: &str,
    count: u64,
    cancel: &CancellationToken,
) -> ScanOutcome {
    let keys = Arc::new(Mutex::new(HashSet::new()));
    let mut tasks = JoinSet::new();

    for node in nodes {
        let keys = keys.clone();
        let pattern = pattern.to_string();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let result = scan_node(node.as_ref(), &pattern, count, &keys, &cancel).await;
            result.map_err(|e| CacheError::Node {
                address: node.address().to_string(),
                source: Box::new(e),
            })
        });
    }

    let mut errors = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Node scan failed: {}", e);
                errors.push(e);
            }
            Err(e) => errors.push(CacheError::Task(e.to_string())),
        }
    }

    let keys = std::mem::take(&mut *keys.lock().await);
    ScanOutcome {
        keys,
        error: CacheError::join(errors),
    }
}
