//! Sensor-tag updates and the sinks they are delivered to.

pub mod dispatcher;
pub mod influxdb;
pub mod metrics_defs;
pub mod sink;
pub mod update;

pub use dispatcher::Dispatcher;
pub use sink::{NoopSink, Sink, SinkError, UpdateContext};
pub use update::Update;
