use crate::error::AppError;
use crate::lifecycle::{Service, StoppableService};
use crate::telemetry;
use async_trait::async_trait;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::Registry;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Serves the Prometheus text format on `GET /metrics`.
pub struct MetricsExporter {
    address: String,
    registry: Registry,
    stop: CancellationToken,
}

impl MetricsExporter {
    pub fn new(address: String, registry: Registry) -> Self {
        Self {
            address,
            registry,
            stop: CancellationToken::new(),
        }
    }
}

fn router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(handle_metrics))
        .with_state(registry)
}

async fn handle_metrics(State(registry): State<Registry>) -> Response {
    match telemetry::render(&registry) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!("Cannot render metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[async_trait]
impl Service for MetricsExporter {
    fn name(&self) -> &str {
        "metrics-exporter"
    }

    async fn up(&self, shutdown: CancellationToken) -> Result<(), AppError> {
        let listener = TcpListener::bind(&self.address).await?;
        info!("Metrics available on http://{}/metrics", self.address);

        let stop = self.stop.clone();
        axum::serve(listener, router(self.registry.clone()))
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = stop.cancelled() => {}
                    _ = shutdown.cancelled() => {}
                }
            })
            .await?;

        info!("Metrics exporter stopped");
        Ok(())
    }
}

#[async_trait]
impl StoppableService for MetricsExporter {
    async fn down(&self) -> Result<(), AppError> {
        self.stop.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::IntCounter;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::task::JoinHandle;

    async fn send(address: &str, segments: &[&str]) -> String {
        let mut stream = TcpStream::connect(address).await.unwrap();
        for segment in segments {
            stream.write_all(segment.as_bytes()).await.unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    async fn fetch(address: &str, path: &str) -> String {
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n",
            path
        );
        send(address, &[request.as_str()]).await
    }

    type Running = (String, Arc<MetricsExporter>, JoinHandle<Result<(), AppError>>);

    async fn start(registry: Registry) -> Running {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let address = format!("127.0.0.1:{}", port);
        let exporter = Arc::new(MetricsExporter::new(address.clone(), registry));

        let running = exporter.clone();
        let handle = tokio::spawn(async move { running.up(CancellationToken::new()).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        (address, exporter, handle)
    }

    fn registry_with_counter() -> Registry {
        let registry = Registry::new();
        let counter = IntCounter::new("exported_total", "test counter").unwrap();
        registry.register(Box::new(counter.clone())).unwrap();
        counter.inc();
        registry
    }

    #[tokio::test]
    async fn test_serves_registry_until_stopped() {
        let (address, exporter, handle) = start(registry_with_counter()).await;

        let body = fetch(&address, "/metrics").await;
        assert!(body.starts_with("HTTP/1.1 200 OK"));
        assert!(body.contains("exported_total 1"));

        let missing = fetch(&address, "/other").await;
        assert!(missing.starts_with("HTTP/1.1 404"));

        exporter.down().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_request_split_across_writes() {
        let (address, exporter, handle) = start(registry_with_counter()).await;

        let body = send(
            &address,
            &["GET /met", "rics HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n"],
        )
        .await;
        assert!(body.starts_with("HTTP/1.1 200 OK"));
        assert!(body.contains("exported_total 1"));

        exporter.down().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
