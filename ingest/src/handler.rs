use crate::errors::IngestError;
use crate::metrics_defs::{UPDATES_RECEIVED, UPDATES_REJECTED, UPDATES_SAVED};
use http_body_util::combinators::BoxBody;
use http_body_util::BodyExt;
use hyper::body::{Body, Bytes};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use shared::http::{error_response, text_response};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;
use updater::{Dispatcher, Update, UpdateContext};

const READ_FAILED: &str = "unable to read request body";
const PARSE_FAILED: &str = "unable to parse request body";
const SAVE_FAILED: &str = "unable to save data";

pub type HandlerBody = BoxBody<Bytes, IngestError>;

/// Accepts one update per request and hands it to the dispatcher.
///
/// Every method and path is accepted, so the tag manager can be pointed at
/// any URL on this service. The client only ever sees one of four fixed
/// outcomes; details of failures stay in the server log.
#[derive(Clone)]
pub struct IngestService {
    dispatcher: Dispatcher,
}

impl IngestService {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

impl<B> Service<Request<B>> for IngestService
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: fmt::Display + Send,
{
    type Response = Response<HandlerBody>;
    type Error = IngestError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        let dispatcher = self.dispatcher.clone();
        Box::pin(async move { Ok(handle_update(&dispatcher, req).await) })
    }
}

fn reject(status: StatusCode, reason: &'static str, message: &str) -> Response<HandlerBody> {
    shared::counter!(UPDATES_REJECTED, "reason" => reason).increment(1);
    error_response(status, message)
}

async fn handle_update<B>(dispatcher: &Dispatcher, req: Request<B>) -> Response<HandlerBody>
where
    B: Body,
    B::Error: fmt::Display,
{
    shared::counter!(UPDATES_RECEIVED).increment(1);

    let content_length = req.body().size_hint().exact();
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::error!(error = %e, "error reading request body");
            return reject(StatusCode::INTERNAL_SERVER_ERROR, "read", READ_FAILED);
        }
    };

    let update = match Update::from_json(&body) {
        Ok(update) => update,
        Err(e) => {
            tracing::error!(
                error = %e,
                content_length = ?content_length,
                size = body.len(),
                body = %String::from_utf8_lossy(&body),
                "error parsing request body"
            );
            return reject(StatusCode::UNPROCESSABLE_ENTITY, "parse", PARSE_FAILED);
        }
    };
    tracing::info!(?update, "update");

    // Cancelled once this handler returns or is dropped mid-dispatch.
    let cancel = CancellationToken::new();
    let _cancel_on_exit = cancel.clone().drop_guard();
    let ctx = UpdateContext::new(cancel);

    if let Err(e) = dispatcher.update(&ctx, &update).await {
        tracing::error!(error = %e, tag_id = %update.id, "error saving update");
        return reject(StatusCode::INTERNAL_SERVER_ERROR, "save", SAVE_FAILED);
    }

    shared::counter!(UPDATES_SAVED).increment(1);
    text_response(StatusCode::OK, format!("OK! {update:?}\r\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use http_body_util::Full;
    use hyper::body::Frame;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};
    use std::time::Duration;
    use updater::{Sink, SinkError};

    const KITCHEN: &str = r#"{"tag_name":"kitchen","tag_id":"A1","degrees_c":21.5,"humidity":40.2,"battery":3.01,"now":"2023-05-01T12:00:00Z"}"#;

    #[derive(Default)]
    struct TestSink {
        fail: bool,
        delay: Duration,
        calls: AtomicUsize,
        seen: Mutex<Vec<(Update, DateTime<Utc>)>>,
    }

    impl TestSink {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Sink for TestSink {
        fn name(&self) -> &str {
            "test"
        }

        async fn update(&self, _ctx: &UpdateContext, update: &Update) -> Result<(), SinkError> {
            tokio::time::sleep(self.delay).await;
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap()
                .push((update.clone(), update.timestamp_or_now()));
            if self.fail {
                return Err(SinkError::Rejected {
                    sink: "test".into(),
                    message: "database is down".into(),
                });
            }
            Ok(())
        }
    }

    /// Body that fails on the first read.
    struct BrokenBody;

    impl Body for BrokenBody {
        type Data = Bytes;
        type Error = std::io::Error;

        fn poll_frame(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
            Poll::Ready(Some(Err(std::io::Error::other("connection reset"))))
        }
    }

    fn service(sinks: Vec<Arc<dyn Sink>>) -> IngestService {
        IngestService::new(Dispatcher::new(sinks))
    }

    fn post(body: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method("POST")
            .uri("/")
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap()
    }

    async fn send<B>(service: &IngestService, req: Request<B>) -> (StatusCode, String)
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: fmt::Display + Send,
    {
        let response = service.call(req).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn kitchen() -> Update {
        Update {
            name: "kitchen".into(),
            id: "A1".into(),
            degrees_c: 21.5,
            humidity: 40.2,
            battery_voltage: 3.01,
            timestamp: Some(Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap()),
        }
    }

    #[tokio::test]
    async fn no_sinks_echoes_the_update() {
        let (status, body) = send(&service(vec![]), post(KITCHEN)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, format!("OK! {:?}\r\n", kitchen()));
    }

    #[tokio::test]
    async fn sink_receives_decoded_fields() {
        let sink = Arc::new(TestSink::default());
        let (status, _) = send(&service(vec![sink.clone()]), post(KITCHEN)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(sink.calls(), 1);
        let seen = sink.seen.lock().unwrap();
        assert_eq!(seen[0].0, kitchen());
        assert_eq!(
            seen[0].1,
            Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn malformed_json_is_unprocessable() {
        let sink = Arc::new(TestSink::default());
        let (status, body) = send(&service(vec![sink.clone()]), post(r#"{"tag_name":"#)).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body, "unable to parse request body\n");
        assert_eq!(sink.calls(), 0);
    }

    #[tokio::test]
    async fn empty_body_is_unprocessable() {
        let (status, _) = send(&service(vec![]), post("")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn unreadable_body_is_an_internal_error() {
        let req = Request::builder()
            .method("POST")
            .uri("/")
            .body(BrokenBody)
            .unwrap();
        let (status, body) = send(&service(vec![]), req).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "unable to read request body\n");
    }

    #[tokio::test]
    async fn sink_failure_is_not_leaked() {
        let (status, body) =
            send(&service(vec![Arc::new(TestSink::failing())]), post(KITCHEN)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "unable to save data\n");
        assert!(!body.contains("database is down"));
    }

    #[tokio::test]
    async fn missing_timestamp_is_stamped_by_the_sink() {
        let delay = Duration::from_millis(50);
        let stamping = Arc::new(TestSink::default());
        let sinks: Vec<Arc<dyn Sink>> = vec![Arc::new(TestSink::slow(delay)), stamping.clone()];

        let before = Utc::now();
        let (status, _) = send(
            &service(sinks),
            post(r#"{"tag_name":"kitchen","tag_id":"A1","degrees_c":21.5}"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let seen = stamping.seen.lock().unwrap();
        assert_eq!(seen[0].0.timestamp, None);
        // Decoding happened before the slow sink ran; the stamp is taken after it.
        assert!(seen[0].1 >= before + chrono::Duration::from_std(delay).unwrap());
    }

    #[tokio::test]
    async fn later_sinks_are_skipped_after_a_failure() {
        let first = Arc::new(TestSink::failing());
        let second = Arc::new(TestSink::default());
        let (status, _) = send(&service(vec![first.clone(), second.clone()]), post(KITCHEN)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 0);
    }

    #[tokio::test]
    async fn any_path_and_method_reaches_the_handler() {
        let sink = Arc::new(TestSink::default());
        let req = Request::builder()
            .method("PUT")
            .uri("/wirelesstags/updates?source=lan")
            .body(Full::new(Bytes::from_static(KITCHEN.as_bytes())))
            .unwrap();
        let (status, _) = send(&service(vec![sink.clone()]), req).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(sink.calls(), 1);
    }

    #[tokio::test]
    async fn serves_updates_over_http() {
        use shared::request_logger::RequestLogger;

        let sink = Arc::new(TestSink::default());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let service = RequestLogger::new(service(vec![sink.clone()]));
        tokio::spawn(shared::http::serve(listener, service));

        let response = reqwest::Client::new()
            .post(format!("http://{addr}/"))
            .body(KITCHEN)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert!(response.text().await.unwrap().starts_with("OK! Update {"));
        assert_eq!(sink.calls(), 1);
    }
}
