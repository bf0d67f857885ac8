//! Metrics definitions for update delivery.

use shared::metrics_defs::{MetricDef, MetricType};

pub const SINK_ERRORS: MetricDef = MetricDef {
    name: "sink.errors",
    metric_type: MetricType::Counter,
    description: "Updates a sink refused, stopping the dispatch. Tagged with sink.",
};

pub const INFLUXDB_POINTS_WRITTEN: MetricDef = MetricDef {
    name: "influxdb.points.written",
    metric_type: MetricType::Counter,
    description: "Points accepted by InfluxDB in a flushed batch",
};

pub const INFLUXDB_POINTS_DROPPED: MetricDef = MetricDef {
    name: "influxdb.points.dropped",
    metric_type: MetricType::Counter,
    description: "Points discarded before reaching InfluxDB. Tagged with reason.",
};

pub const INFLUXDB_FLUSH_DURATION: MetricDef = MetricDef {
    name: "influxdb.flush.duration",
    metric_type: MetricType::Histogram,
    description: "Time to send one batch of points to InfluxDB in seconds",
};

pub const ALL_METRICS: &[MetricDef] = &[
    SINK_ERRORS,
    INFLUXDB_POINTS_WRITTEN,
    INFLUXDB_POINTS_DROPPED,
    INFLUXDB_FLUSH_DURATION,
];
