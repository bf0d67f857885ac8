use shared::metrics_defs::{MetricDef, MetricType};

pub const UPDATES_RECEIVED: MetricDef = MetricDef {
    name: "updates.received",
    metric_type: MetricType::Counter,
    description: "Requests that reached the update handler",
};

pub const UPDATES_REJECTED: MetricDef = MetricDef {
    name: "updates.rejected",
    metric_type: MetricType::Counter,
    description: "Requests answered with an error. Tagged with reason.",
};

pub const UPDATES_SAVED: MetricDef = MetricDef {
    name: "updates.saved",
    metric_type: MetricType::Counter,
    description: "Updates accepted by every sink",
};

pub const ALL_METRICS: &[MetricDef] = &[UPDATES_RECEIVED, UPDATES_REJECTED, UPDATES_SAVED];
