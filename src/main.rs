use service_skeleton::cache::ReplicaSet;
use service_skeleton::cli::Cli;
use service_skeleton::config::Config;
use service_skeleton::lifecycle::App;
use service_skeleton::metrics::{MetricsSink, QueryMetrics};
use service_skeleton::services::{CacheManager, KeyspaceReporter, MetricsExporter};
use service_skeleton::telemetry::{init_tracing, TelemetryService};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.debug);

    let config = Config::from_sources(&cli)?;
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        Cli::print_examples();
        return Err(e.into());
    }

    let telemetry = TelemetryService::new(&config.metrics)?;
    let hostname = config.identity.hostname().to_string();
    let metrics: Arc<dyn MetricsSink> =
        Arc::new(QueryMetrics::new(&config.metrics.service, &hostname));

    let cache = Arc::new(ReplicaSet::connect(&config.redis, &hostname, Some(metrics)).await?);
    info!("Cache ready: {:?}", cache);

    let mut app = App::new()
        .with_stoppable_service(Arc::new(CacheManager::new(cache.clone())))
        .with_service(Arc::new(KeyspaceReporter::new(
            cache,
            config.reporter.clone(),
        )));
    if telemetry.is_enabled() {
        app = app.with_stoppable_service(Arc::new(MetricsExporter::new(
            config.metrics.bind_address(),
            telemetry.registry().clone(),
        )));
    }

    let result = app.run(CancellationToken::new()).await;
    telemetry.shutdown()?;
    result?;

    info!("Shutdown complete");
    Ok(())
}
