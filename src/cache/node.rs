use crate::cache::command::Command;
use crate::cache::connection::{DialOptions, RespConnection};
use crate::cache::traits::{CacheError, Node};
use crate::protocol::RespValue;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type Slot = Mutex<Option<RespConnection<TcpStream>>>;

/// Client for one storage node.
///
/// Owns `pipeline_multiplex` connections picked round-robin. A connection
/// that failed is dropped and dialled again on next use.
pub struct NodeClient {
    address: String,
    options: Arc<DialOptions>,
    slots: Vec<Slot>,
    next: AtomicUsize,
}

impl NodeClient {
    /// Create the client and dial its first connection.
    pub async fn connect(address: &str, options: Arc<DialOptions>) -> Result<Self, CacheError> {
        let slots = (0..options.pipeline_multiplex.max(1))
            .map(|_| Mutex::new(None))
            .collect();
        let client = Self {
            address: address.to_string(),
            options,
            slots,
            next: AtomicUsize::new(0),
        };

        let conn = client.dial().await?;
        *client.slots[0].lock().await = Some(conn);
        debug!("Connected to {}", client.address);
        Ok(client)
    }

    async fn dial(&self) -> Result<RespConnection<TcpStream>, CacheError> {
        let stream = timeout(self.options.dial_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| CacheError::Timeout(self.options.dial_timeout))?
            .map_err(|e| CacheError::Connection(format!("{}: {}", self.address, e)))?;
        stream.set_nodelay(true).ok();

        let mut conn = RespConnection::new(stream, self.options.read_timeout);
        conn.handshake(&self.options).await?;
        Ok(conn)
    }

    /// Pipeline `commands` over one connection and return raw replies.
    pub async fn pipeline(
        &self,
        commands: &[&Command],
        cancel: &CancellationToken,
    ) -> Result<Vec<RespValue>, CacheError> {
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let mut slot = tokio::select! {
            guard = self.slots[idx].lock() => guard,
            _ = cancel.cancelled() => return Err(CacheError::Cancelled),
        };

        let result = tokio::select! {
            result = async {
                if slot.is_none() {
                    *slot = Some(self.dial().await?);
                }
                match slot.as_mut() {
                    Some(conn) => conn.send(commands).await,
                    None => Err(CacheError::Connection("no connection".to_string())),
                }
            } => result,
            _ = cancel.cancelled() => Err(CacheError::Cancelled),
        };

        // A half-read pipeline leaves the stream out of sync.
        if let Err(e) = &result {
            warn!("Dropping connection to {}: {}", self.address, e);
            *slot = None;
        }
        result
    }

    pub async fn close(&self) {
        for slot in &self.slots {
            slot.lock().await.take();
        }
    }
}

#[async_trait]
impl Node for NodeClient {
    fn address(&self) -> &str {
        &self.address
    }

    async fn execute(
        &self,
        command: &Command,
        cancel: &CancellationToken,
    ) -> Result<RespValue, CacheError> {
        let reply = self
            .pipeline(&[command], cancel)
            .await?
            .pop()
            .ok_or_else(|| CacheError::Protocol("missing reply".to_string()))?;
        CacheError::check_reply(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_pongs(listener: TcpListener) {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                    let pings = String::from_utf8_lossy(&buf[..n]).matches("PING").count();
                    for _ in 0..pings {
                        if socket.write_all(b"+PONG\r\n").await.is_err() {
                            return;
                        }
                    }
                }
            });
        }
    }

    #[tokio::test]
    async fn test_execute_against_live_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(serve_pongs(listener));

        let options = Arc::new(DialOptions {
            pipeline_multiplex: 2,
            ..DialOptions::default()
        });
        let node = NodeClient::connect(&address, options).await.unwrap();
        let cancel = CancellationToken::new();

        for _ in 0..4 {
            let reply = node.execute(&Command::ping(), &cancel).await.unwrap();
            assert_eq!(reply, RespValue::SimpleString("PONG".to_string()));
        }
        assert_eq!(node.address(), address);
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(serve_pongs(listener));

        let node = NodeClient::connect(&address, Arc::new(DialOptions::default()))
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = node.execute(&Command::ping(), &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_dial_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let options = Arc::new(DialOptions {
            dial_timeout: Duration::from_millis(500),
            ..DialOptions::default()
        });
        assert!(NodeClient::connect(&address, options).await.is_err());
    }
}
