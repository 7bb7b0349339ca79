//! Service units run by [`crate::lifecycle::App`].

pub mod cache_manager;
pub mod keyspace_reporter;
pub mod metrics_exporter;

pub use cache_manager::CacheManager;
pub use keyspace_reporter::KeyspaceReporter;
pub use metrics_exporter::MetricsExporter;
