use crate::cache::command::{CacheableCommand, Command};
use crate::protocol::{RespValue, REDIRECT_MARKER};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Per-command outcomes of a pipelined batch, in submission order.
pub type BatchReplies = Vec<Result<RespValue, CacheError>>;

/// One logical connection to one instance (standalone, sentinel-managed or
/// cluster) of the key-value store.
///
/// Implementations must be safe for concurrent use by many callers. A "not
/// found" answer is a successful null reply, never an error.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Name from the backend descriptor, used in logs and errors.
    fn name(&self) -> &str;

    /// Execute a single command, honouring the cancellation token.
    async fn execute(
        &self,
        command: &Command,
        cancel: &CancellationToken,
    ) -> Result<RespValue, CacheError>;

    /// Execute an ordered batch in as few round trips as possible.
    ///
    /// The outer error is a transport failure; individual server errors
    /// (redirect notices included) are reported per command.
    async fn execute_batch(
        &self,
        commands: &[Command],
        cancel: &CancellationToken,
    ) -> Result<BatchReplies, CacheError>;

    /// Execute a read through the client-side cache. Backends without a
    /// cache simply execute the command.
    async fn execute_cached(
        &self,
        command: &CacheableCommand,
        cancel: &CancellationToken,
    ) -> Result<RespValue, CacheError> {
        self.execute(&command.command, cancel).await
    }

    /// Batched variant of [`Backend::execute_cached`].
    async fn execute_cached_batch(
        &self,
        commands: &[CacheableCommand],
        cancel: &CancellationToken,
    ) -> Result<BatchReplies, CacheError> {
        let plain: Vec<Command> = commands.iter().map(|c| c.command.clone()).collect();
        self.execute_batch(&plain, cancel).await
    }

    /// Storage nodes making up this backend's topology. A standalone
    /// instance has exactly one.
    fn nodes(&self) -> Vec<Arc<dyn Node>>;

    /// Drop every live connection.
    async fn close(&self);
}

/// A single storage node inside a backend's topology.
#[async_trait]
pub trait Node: Send + Sync {
    fn address(&self) -> &str;

    async fn execute(
        &self,
        command: &Command,
        cancel: &CancellationToken,
    ) -> Result<RespValue, CacheError>;
}

/// Errors surfaced by the cache layer.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("{0}")]
    Server(String),
    /// The key's slot now lives on another node of that backend's cluster.
    #[error("MOVED {slot} {address}")]
    Redirect { slot: u16, address: String },
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("operation cancelled")]
    Cancelled,
    #[error("replica {index} ({name}) failed: {source}")]
    Replica {
        index: usize,
        name: String,
        #[source]
        source: Box<CacheError>,
    },
    #[error("node {address} failed: {source}")]
    Node {
        address: String,
        #[source]
        source: Box<CacheError>,
    },
    #[error("{}", join_messages(.0))]
    Joined(Vec<CacheError>),
    #[error("replica set needs at least one backend")]
    EmptyReplicaSet,
    #[error("background task failed: {0}")]
    Task(String),
}

fn join_messages(errors: &[CacheError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl CacheError {
    /// Classify a server error reply, recognising redirect notices.
    pub fn from_server_message(message: String) -> Self {
        if let Some(rest) = message.strip_prefix(REDIRECT_MARKER) {
            let mut parts = rest.split_whitespace();
            if let (Some(slot), Some(address)) = (parts.next(), parts.next()) {
                if let Ok(slot) = slot.parse() {
                    return CacheError::Redirect {
                        slot,
                        address: address.to_string(),
                    };
                }
            }
        }
        CacheError::Server(message)
    }

    /// Turn an error reply into an error, pass every other reply through.
    pub fn check_reply(reply: RespValue) -> Result<RespValue, CacheError> {
        match reply {
            RespValue::Error(message) => Err(Self::from_server_message(message)),
            other => Ok(other),
        }
    }

    /// Combine per-node failures. `None` when nothing failed.
    pub fn join(errors: Vec<CacheError>) -> Option<CacheError> {
        if errors.is_empty() {
            None
        } else {
            Some(CacheError::Joined(errors))
        }
    }

    /// True for a redirect notice, also when it is wrapped or arrives as an
    /// unparsed server message.
    pub fn is_redirect(&self) -> bool {
        match self {
            CacheError::Redirect { .. } => true,
            CacheError::Server(message) => message.starts_with(REDIRECT_MARKER),
            CacheError::Replica { source, .. } | CacheError::Node { source, .. } => {
                source.is_redirect()
            }
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CacheError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_reply_is_classified() {
        let err = CacheError::from_server_message("MOVED 3999 10.0.0.2:6379".to_string());
        match &err {
            CacheError::Redirect { slot, address } => {
                assert_eq!(*slot, 3999);
                assert_eq!(address, "10.0.0.2:6379");
            }
            other => panic!("Expected Redirect, got {:?}", other),
        }
        assert!(err.is_redirect());
        assert!(err.to_string().starts_with(REDIRECT_MARKER));
    }

    #[test]
    fn test_other_server_errors_are_not_redirects() {
        let err = CacheError::from_server_message("WRONGTYPE Operation against a key".to_string());
        assert!(matches!(err, CacheError::Server(_)));
        assert!(!err.is_redirect());
    }

    #[test]
    fn test_check_reply() {
        assert!(CacheError::check_reply(RespValue::BulkString(None)).is_ok());
        assert!(CacheError::check_reply(RespValue::Error("ERR boom".to_string())).is_err());
    }

    #[test]
    fn test_join() {
        assert!(CacheError::join(Vec::new()).is_none());

        let joined = CacheError::join(vec![
            CacheError::Connection("a down".to_string()),
            CacheError::Connection("c down".to_string()),
        ])
        .unwrap();
        let text = joined.to_string();
        assert!(text.contains("a down"));
        assert!(text.contains("c down"));
    }
}
