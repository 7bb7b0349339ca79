pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod protocol;
pub mod services;
pub mod telemetry;

pub use cache::{Backend, CacheError, Command, Node, ReplicaSet};
pub use lifecycle::{App, LifecycleState, Service, StoppableService};
pub use metrics::MetricsSink;
pub use protocol::{RespParser, RespValue};
