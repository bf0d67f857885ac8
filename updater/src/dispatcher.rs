//! Dispatcher - fan-out of one update to every configured sink

use crate::metrics_defs::SINK_ERRORS;
use crate::sink::{Sink, SinkError, UpdateContext};
use crate::update::Update;
use async_trait::async_trait;
use std::sync::Arc;

/// Delivers each update to an ordered list of sinks.
///
/// Sinks are called one after another in registration order. The first
/// error stops the dispatch: sinks after the failing one are not called and
/// the caller only sees that one error, with no record of which sinks had
/// already accepted the update. Nothing is retried.
///
/// A dispatch to zero sinks succeeds without doing anything.
#[derive(Clone, Default)]
pub struct Dispatcher {
    sinks: Arc<Vec<Arc<dyn Sink>>>,
}

impl Dispatcher {
    pub fn new(sinks: Vec<Arc<dyn Sink>>) -> Self {
        Self {
            sinks: Arc::new(sinks),
        }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn sink_names(&self) -> impl Iterator<Item = &str> {
        self.sinks.iter().map(|sink| sink.name())
    }

    pub async fn update(&self, ctx: &UpdateContext, update: &Update) -> Result<(), SinkError> {
        for sink in self.sinks.iter() {
            if let Err(e) = sink.update(ctx, update).await {
                tracing::warn!(sink = sink.name(), error = %e, "sink refused update");
                shared::counter!(SINK_ERRORS, "sink" => sink.name().to_owned()).increment(1);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Closes every sink, in registration order.
    pub async fn close(&self) {
        for sink in self.sinks.iter() {
            tracing::info!(sink = sink.name(), "closing sink");
            sink.close().await;
        }
    }
}

#[async_trait]
impl Sink for Dispatcher {
    fn name(&self) -> &str {
        "dispatcher"
    }

    async fn update(&self, ctx: &UpdateContext, update: &Update) -> Result<(), SinkError> {
        Dispatcher::update(self, ctx, update).await
    }

    async fn close(&self) {
        Dispatcher::close(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::testutils::RecordingSink;
    use std::sync::Mutex;

    fn reading() -> Update {
        Update {
            name: "kitchen".into(),
            id: "A1".into(),
            degrees_c: 21.5,
            humidity: 40.2,
            battery_voltage: 3.01,
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn no_sinks_is_a_noop() {
        let dispatcher = Dispatcher::default();
        assert!(dispatcher.is_empty());
        assert!(
            dispatcher
                .update(&UpdateContext::default(), &reading())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn every_sink_is_called_once_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let sinks: Vec<Arc<RecordingSink>> = ["first", "second", "third"]
            .into_iter()
            .map(|name| Arc::new(RecordingSink::ok(name).recording_order(order.clone())))
            .collect();
        let dispatcher = Dispatcher::new(
            sinks
                .iter()
                .map(|sink| sink.clone() as Arc<dyn Sink>)
                .collect(),
        );

        let update = reading();
        dispatcher
            .update(&UpdateContext::default(), &update)
            .await
            .unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
        for sink in &sinks {
            assert_eq!(sink.calls(), 1);
            assert_eq!(sink.received(), vec![update.clone()]);
        }
        assert_eq!(
            dispatcher.sink_names().collect::<Vec<_>>(),
            vec!["first", "second", "third"]
        );
    }

    #[tokio::test]
    async fn first_failure_stops_the_dispatch() {
        for failing_at in 0..3 {
            let sinks: Vec<Arc<RecordingSink>> = (0..3)
                .map(|i| {
                    let name = format!("sink{i}");
                    if i == failing_at {
                        Arc::new(RecordingSink::failing(&name))
                    } else {
                        Arc::new(RecordingSink::ok(&name))
                    }
                })
                .collect();
            let dispatcher = Dispatcher::new(
                sinks
                    .iter()
                    .map(|sink| sink.clone() as Arc<dyn Sink>)
                    .collect(),
            );

            let err = dispatcher
                .update(&UpdateContext::default(), &reading())
                .await
                .unwrap_err();

            match err {
                SinkError::Rejected { sink, .. } => assert_eq!(sink, format!("sink{failing_at}")),
                other => panic!("unexpected error: {other}"),
            }
            for (i, sink) in sinks.iter().enumerate() {
                let expected = if i <= failing_at { 1 } else { 0 };
                assert_eq!(sink.calls(), expected, "sink{i} with failure at {failing_at}");
            }
        }
    }

    #[tokio::test]
    async fn repeated_updates_are_delivered_again() {
        let sink = Arc::new(RecordingSink::ok("only"));
        let dispatcher = Dispatcher::new(vec![sink.clone() as Arc<dyn Sink>]);

        let update = reading();
        let ctx = UpdateContext::default();
        dispatcher.update(&ctx, &update).await.unwrap();
        dispatcher.update(&ctx, &update).await.unwrap();

        assert_eq!(sink.calls(), 2);
    }

    #[tokio::test]
    async fn dispatchers_nest_as_sinks() {
        let inner_sink = Arc::new(RecordingSink::ok("inner"));
        let inner = Dispatcher::new(vec![inner_sink.clone() as Arc<dyn Sink>]);
        let outer = Dispatcher::new(vec![Arc::new(inner) as Arc<dyn Sink>]);

        outer
            .update(&UpdateContext::default(), &reading())
            .await
            .unwrap();
        assert_eq!(inner_sink.calls(), 1);
    }
}
