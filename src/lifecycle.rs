//! Service unit orchestration.
//!
//! Units are started concurrently and left running; on a termination signal
//! or cancellation every unit that can be stopped is stopped in turn.

use crate::error::AppError;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// A long-running background unit.
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Run the unit. `shutdown` fires after every stop operation has been
    /// attempted.
    async fn up(&self, shutdown: CancellationToken) -> Result<(), AppError>;
}

/// A unit that also exposes a stop operation.
#[async_trait]
pub trait StoppableService: Service {
    async fn down(&self) -> Result<(), AppError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Running,
    ShuttingDown,
    Stopped,
}

/// Runs registered service units and coordinates their shutdown.
pub struct App {
    services: Vec<Arc<dyn Service>>,
    stoppable: Vec<Arc<dyn StoppableService>>,
    state: watch::Sender<LifecycleState>,
    units_token: CancellationToken,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LifecycleState::Created);
        Self {
            services: Vec::new(),
            stoppable: Vec::new(),
            state,
            units_token: CancellationToken::new(),
        }
    }

    /// Register a unit with a start operation only.
    pub fn with_service<S: Service + 'static>(mut self, service: Arc<S>) -> Self {
        self.services.push(service);
        self
    }

    /// Register a unit with both a start and a stop operation.
    pub fn with_stoppable_service<S: StoppableService + 'static>(mut self, service: Arc<S>) -> Self {
        self.services.push(service.clone());
        self.stoppable.push(service);
        self
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Launch every unit's start operation. Start failures are logged and
    /// otherwise dropped; a unit is never restarted.
    pub fn start(&self) {
        if self.state() != LifecycleState::Created {
            warn!("App already started");
            return;
        }

        for service in &self.services {
            let service = service.clone();
            let token = self.units_token.child_token();
            tokio::spawn(async move {
                if let Err(e) = service.up(token).await {
                    error!("Service {} failed to start: {}", service.name(), e);
                }
            });
        }
        self.state.send_replace(LifecycleState::Running);
        info!("Started {} services", self.services.len());
    }

    /// Start the units, wait for `shutdown` to complete, then shut down.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), AppError>
    where
        F: Future<Output = ()> + Send,
    {
        self.start();
        shutdown.await;
        self.shutdown().await
    }

    /// Start the units and run until SIGINT, SIGTERM or `cancel`.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), AppError> {
        self.run_until(async move {
            tokio::select! {
                _ = ctrl_c() => info!("Received interrupt"),
                _ = terminate() => info!("Received terminate"),
                _ = cancel.cancelled() => info!("Cancelled"),
            }
        })
        .await
    }

    /// Stop every stoppable unit in registration order.
    ///
    /// A failing stop does not prevent the remaining ones. Returns the first
    /// error seen.
    pub async fn shutdown(&self) -> Result<(), AppError> {
        self.state.send_replace(LifecycleState::ShuttingDown);
        info!("Shutting down {} stoppable services", self.stoppable.len());

        let mut first_error = None;
        for service in &self.stoppable {
            if let Err(e) = service.down().await {
                error!("Service {} failed to stop: {}", service.name(), e);
                first_error.get_or_insert(e);
            }
        }

        self.units_token.cancel();
        self.state.send_replace(LifecycleState::Stopped);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for interrupt: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            warn!("Cannot listen for terminate: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Idle;

    #[async_trait]
    impl Service for Idle {
        async fn up(&self, shutdown: CancellationToken) -> Result<(), AppError> {
            shutdown.cancelled().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let app = App::new().with_service(Arc::new(Idle));
        let mut states = app.subscribe();
        assert_eq!(app.state(), LifecycleState::Created);

        app.start();
        assert_eq!(app.state(), LifecycleState::Running);
        assert!(states.has_changed().unwrap());
        states.borrow_and_update();

        app.shutdown().await.unwrap();
        assert_eq!(app.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_default_name_is_type_name() {
        assert!(Idle.name().ends_with("Idle"));
    }

    #[tokio::test]
    async fn test_run_returns_on_cancel() {
        let app = App::new().with_service(Arc::new(Idle));
        let cancel = CancellationToken::new();
        cancel.cancel();

        app.run(cancel).await.unwrap();
        assert_eq!(app.state(), LifecycleState::Stopped);
    }
}
