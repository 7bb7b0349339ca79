use crate::cache::command::Command;
use crate::cache::traits::CacheError;
use crate::protocol::{RespParser, RespValue};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::debug;

/// Per-connection settings taken from a backend descriptor.
#[derive(Debug, Clone)]
pub struct DialOptions {
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_name: String,
    pub dial_timeout: Duration,
    pub read_timeout: Duration,
    pub disable_retry: bool,
    pub always_pipelining: bool,
    pub pipeline_multiplex: usize,
}

impl Default for DialOptions {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            client_name: String::new(),
            dial_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(1),
            disable_retry: false,
            always_pipelining: true,
            pipeline_multiplex: 1,
        }
    }
}

/// A RESP request/response stream.
///
/// Requests are written back to back and flushed once; replies are read in
/// the same order.
pub struct RespConnection<S> {
    stream: S,
    parser: RespParser,
    read_buf: Vec<u8>,
    read_timeout: Duration,
}

impl<S> RespConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, read_timeout: Duration) -> Self {
        Self {
            stream,
            parser: RespParser::new(),
            read_buf: vec![0u8; 4096],
            read_timeout,
        }
    }

    /// Pipeline `commands` and return one raw reply per command. Error
    /// replies are returned as values, not as errors.
    pub async fn send(&mut self, commands: &[&Command]) -> Result<Vec<RespValue>, CacheError> {
        let mut out = Vec::new();
        for command in commands {
            out.extend_from_slice(&command.to_resp().to_bytes());
        }
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;

        let mut replies = Vec::with_capacity(commands.len());
        while replies.len() < commands.len() {
            replies.push(self.read_reply().await?);
        }
        Ok(replies)
    }

    /// Send one command and turn an error reply into an error.
    pub async fn request(&mut self, command: &Command) -> Result<RespValue, CacheError> {
        let mut replies = self.send(&[command]).await?;
        let reply = replies
            .pop()
            .ok_or_else(|| CacheError::Protocol("missing reply".to_string()))?;
        CacheError::check_reply(reply)
    }

    /// Authenticate and name the connection.
    pub async fn handshake(&mut self, options: &DialOptions) -> Result<(), CacheError> {
        if let Some(password) = options.password.as_deref() {
            self.request(&Command::auth(options.username.as_deref(), password))
                .await?;
        }
        if !options.client_name.is_empty() {
            self.request(&Command::client_setname(&options.client_name))
                .await?;
        }
        Ok(())
    }

    async fn read_reply(&mut self) -> Result<RespValue, CacheError> {
        loop {
            if let Some(value) = self
                .parser
                .parse()
                .map_err(|e| CacheError::Protocol(e.to_string()))?
            {
                return Ok(value);
            }

            let n = timeout(self.read_timeout, self.stream.read(&mut self.read_buf))
                .await
                .map_err(|_| CacheError::Timeout(self.read_timeout))??;
            if n == 0 {
                debug!("Connection closed by peer");
                return Err(CacheError::Connection("connection closed".to_string()));
            }
            self.parser.add_data(&self.read_buf[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_pipelined_replies_in_order() {
        let stream = Builder::new()
            .write(b"*2\r\n$3\r\nGET\r\n$1\r\na\r\n*2\r\n$3\r\nGET\r\n$1\r\nb\r\n")
            .read(b"$1\r\n1\r\n$-1\r\n")
            .build();
        let mut conn = RespConnection::new(stream, Duration::from_secs(1));

        let get_a = Command::get("a");
        let get_b = Command::get("b");
        let replies = assert_ok!(conn.send(&[&get_a, &get_b]).await);

        assert_eq!(replies[0], RespValue::BulkString(Some("1".to_string())));
        assert!(replies[1].is_null());
    }

    #[tokio::test]
    async fn test_reply_split_across_reads() {
        let stream = Builder::new()
            .write(b"*1\r\n$4\r\nPING\r\n")
            .read(b"+PO")
            .read(b"NG\r\n")
            .build();
        let mut conn = RespConnection::new(stream, Duration::from_secs(1));

        let reply = assert_ok!(conn.request(&Command::ping()).await);
        assert_eq!(reply, RespValue::SimpleString("PONG".to_string()));
    }

    #[tokio::test]
    async fn test_error_reply_becomes_error() {
        let stream = Builder::new()
            .write(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n")
            .read(b"-MOVED 12 10.0.0.1:6379\r\n")
            .build();
        let mut conn = RespConnection::new(stream, Duration::from_secs(1));

        let err = assert_err!(conn.request(&Command::get("k")).await);
        assert!(err.is_redirect());
    }

    #[tokio::test]
    async fn test_handshake_sends_auth_and_name() {
        let stream = Builder::new()
            .write(b"*3\r\n$4\r\nAUTH\r\n$4\r\nuser\r\n$6\r\nsecret\r\n")
            .read(b"+OK\r\n")
            .write(b"*3\r\n$6\r\nCLIENT\r\n$7\r\nSETNAME\r\n$3\r\napp\r\n")
            .read(b"+OK\r\n")
            .build();
        let mut conn = RespConnection::new(stream, Duration::from_secs(1));

        let options = DialOptions {
            username: Some("user".to_string()),
            password: Some("secret".to_string()),
            client_name: "app".to_string(),
            ..DialOptions::default()
        };
        assert_ok!(conn.handshake(&options).await);
    }

    #[tokio::test]
    async fn test_closed_stream_is_connection_error() {
        let stream = Builder::new().write(b"*1\r\n$4\r\nPING\r\n").build();
        let mut conn = RespConnection::new(stream, Duration::from_secs(1));

        let err = assert_err!(conn.request(&Command::ping()).await);
        assert!(matches!(err, CacheError::Connection(_)));
    }
}
