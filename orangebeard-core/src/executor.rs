//! # Request Executor
//!
//! Performs one listener call with bounded retries.
//!
//! ```text
//!  execute() ──► health valid? ──no──► ConnectionInvalid (no network)
//!                    │yes
//!                    ▼
//!              transport.send ──2xx──► Some(json) | None
//!                    │
//!        transient ──┴── retry with exponential backoff (backon)
//!                    │
//!          attempts exhausted ──► health := invalid ──► ConnectionInvalid
//! ```
//!
//! The health flag is sticky for the lifetime of the executor: once a request
//! burns through its retries, every later request fails without touching the
//! network.

use backon::Retryable;
use http::{Method, StatusCode};
use serde_json::Value;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::*;

use crate::{
    config::RetryConfig,
    http::{Body, Request, Response, Transport},
    Error, Result,
};

/// Whether the listener is still considered reachable. Starts valid.
#[derive(Debug)]
pub struct ConnectionHealth(AtomicBool);

impl Default for ConnectionHealth {
    fn default() -> Self {
        ConnectionHealth(AtomicBool::new(true))
    }
}

impl ConnectionHealth {
    pub fn is_valid(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn invalidate(&self) {
        if self.0.swap(false, Ordering::SeqCst) {
            error!("connection with Orangebeard marked invalid, further requests are skipped");
        }
    }
}

pub struct Executor {
    transport: Arc<dyn Transport>,
    retry: RetryConfig,
    health: ConnectionHealth,
}

impl Executor {
    pub fn new(transport: Arc<dyn Transport>, retry: RetryConfig) -> Executor {
        Executor {
            transport,
            retry,
            health: ConnectionHealth::default(),
        }
    }

    pub fn health(&self) -> &ConnectionHealth {
        &self.health
    }

    fn ensure_valid(&self) -> Result<()> {
        if self.health.is_valid() {
            Ok(())
        } else {
            Err(Error::ConnectionInvalid(
                "an earlier request exhausted its retries".into(),
            ))
        }
    }

    /// Send a request, retrying transient failures. Returns the JSON body of a
    /// successful response, or `None` if the body is empty or not JSON.
    pub async fn execute(&self, method: Method, path: &str, body: Body) -> Result<Option<Value>> {
        let request = Request::new(method, path, body);
        let res = self.send_with_retry(&request, is_transient_status).await?;
        check_status(&res)?;
        Ok(parse_json(&res.text))
    }

    /// Upload a multipart request. Transport failures are retried like
    /// [`Executor::execute`], but any non-2xx answer, 5xx included, invalidates
    /// the connection without a retry.
    pub async fn upload(&self, path: &str, body: Body) -> Result<String> {
        let request = Request::new(Method::POST, path, body);
        let res = self.send_with_retry(&request, |_| false).await?;

        if !res.status.is_success() {
            self.health.invalidate();
            return Err(Error::ConnectionInvalid(format!(
                "attachment upload rejected with status {}: {}",
                res.status, res.text
            )));
        }
        Ok(res.text)
    }

    /// Send with retries. Transport failures are always retried; a response
    /// is retried only if `retry_status` says so.
    async fn send_with_retry(
        &self,
        request: &Request,
        retry_status: fn(StatusCode) -> bool,
    ) -> Result<Response> {
        let attempts = self.retry.attempts();
        let attempt = move || async move {
            self.ensure_valid()?;
            let res = self.transport.send(request.clone()).await?;
            if retry_status(res.status) {
                return Err(Error::Transient(format!("status {}", res.status)));
            }
            Ok(res)
        };

        let res = attempt
            .retry(self.retry.backoff())
            .when(Error::is_transient)
            .notify(|e: &Error, dur: Duration| {
                warn!(
                    "{} {} failed: {e}. retrying in {dur:?}",
                    request.method, request.path
                );
            })
            .await;

        match res {
            Err(Error::Transient(reason)) => {
                self.health.invalidate();
                Err(Error::ConnectionInvalid(format!(
                    "failed to communicate with Orangebeard after {attempts} attempts: {reason}"
                )))
            }
            res => res,
        }
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

fn check_status(res: &Response) -> Result<()> {
    if res.status.is_success() {
        return Ok(());
    }
    Err(Error::ServerRejection {
        status: res.status.as_u16(),
        body: res.text.clone(),
    })
}

fn parse_json(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(text) {
        Ok(value) => Some(value),
        Err(_) => {
            debug!("ignoring non-JSON response body");
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::{
        collections::VecDeque,
        sync::{atomic::AtomicUsize, Mutex},
    };

    /// Transport that replays scripted outcomes and counts calls.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        outcomes: Mutex<VecDeque<Result<(u16, String)>>>,
        pub(crate) calls: AtomicUsize,
    }

    impl ScriptedTransport {
        pub(crate) fn new(outcomes: Vec<Result<(u16, &str)>>) -> Arc<ScriptedTransport> {
            Arc::new(ScriptedTransport {
                outcomes: Mutex::new(
                    outcomes
                        .into_iter()
                        .map(|o| o.map(|(status, body)| (status, body.to_string())))
                        .collect(),
                ),
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, _request: Request) -> Result<Response> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::Transient("script exhausted".into())));
            next.map(|(status, text)| Response {
                status: StatusCode::from_u16(status).unwrap(),
                text,
            })
        }
    }

    pub(crate) fn fast_retry(attempts: usize) -> RetryConfig {
        RetryConfig {
            attempts: Some(attempts),
            min_delay: Some(Duration::from_millis(1)),
            max_delay: Some(Duration::from_millis(5)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn success_returns_json() -> eyre::Result<()> {
        let transport = ScriptedTransport::new(vec![Ok((200, r#""run-1""#))]);
        let executor = Executor::new(transport.clone(), fast_retry(4));

        let res = executor
            .execute(Method::POST, "/x", Body::Empty)
            .await?;
        assert_eq!(res, Some(Value::String("run-1".into())));
        assert_eq!(transport.calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn non_json_success_is_empty_result() -> eyre::Result<()> {
        let transport = ScriptedTransport::new(vec![Ok((200, "OK")), Ok((204, ""))]);
        let executor = Executor::new(transport, fast_retry(4));

        assert_eq!(executor.execute(Method::PUT, "/x", Body::Empty).await?, None);
        assert_eq!(executor.execute(Method::PUT, "/x", Body::Empty).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn transient_failure_is_retried() -> eyre::Result<()> {
        let transport = ScriptedTransport::new(vec![
            Err(Error::Transient("reset".into())),
            Ok((503, "")),
            Ok((200, r#"{"a":1}"#)),
        ]);
        let executor = Executor::new(transport.clone(), fast_retry(4));

        let res = executor.execute(Method::GET, "/x", Body::Empty).await?;
        assert_eq!(res, Some(serde_json::json!({ "a": 1 })));
        assert_eq!(transport.calls(), 3);
        assert!(executor.health().is_valid());
        Ok(())
    }

    #[tokio::test]
    async fn exhausted_retries_invalidate_connection() {
        let transport = ScriptedTransport::new(vec![]);
        let executor = Executor::new(transport.clone(), fast_retry(3));

        let res = executor.execute(Method::POST, "/x", Body::Empty).await;
        assert!(matches!(res, Err(Error::ConnectionInvalid(_))));
        assert_eq!(transport.calls(), 3);
        assert!(!executor.health().is_valid());

        // Later calls fail fast without touching the network.
        let res = executor.execute(Method::POST, "/y", Body::Empty).await;
        assert!(matches!(res, Err(Error::ConnectionInvalid(_))));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn client_error_is_rejected_without_retry() {
        let transport = ScriptedTransport::new(vec![Ok((400, "bad payload"))]);
        let executor = Executor::new(transport.clone(), fast_retry(4));

        let res = executor.execute(Method::POST, "/x", Body::Empty).await;
        assert!(matches!(
            res,
            Err(Error::ServerRejection { status: 400, ref body }) if body == "bad payload"
        ));
        assert_eq!(transport.calls(), 1);
        assert!(executor.health().is_valid());
    }

    #[tokio::test]
    async fn rejected_upload_invalidates_connection() {
        let transport = ScriptedTransport::new(vec![Ok((413, "too large"))]);
        let executor = Executor::new(transport.clone(), fast_retry(4));

        let res = executor.upload("/attachment", Body::Empty).await;
        assert!(matches!(res, Err(Error::ConnectionInvalid(_))));
        assert_eq!(transport.calls(), 1);
        assert!(!executor.health().is_valid());
    }

    #[tokio::test]
    async fn upload_server_error_is_not_retried() {
        let transport = ScriptedTransport::new(vec![Ok((503, "busy")), Ok((201, "att-1"))]);
        let executor = Executor::new(transport.clone(), fast_retry(4));

        let res = executor.upload("/attachment", Body::Empty).await;
        assert!(matches!(res, Err(Error::ConnectionInvalid(ref reason)) if reason.contains("503")));
        assert_eq!(transport.calls(), 1);
        assert!(!executor.health().is_valid());
    }

    #[tokio::test]
    async fn upload_retries_transport_failures() -> eyre::Result<()> {
        let transport = ScriptedTransport::new(vec![
            Err(Error::Transient("reset".into())),
            Ok((201, "att-1")),
        ]);
        let executor = Executor::new(transport.clone(), fast_retry(4));

        assert_eq!(executor.upload("/attachment", Body::Empty).await?, "att-1");
        assert_eq!(transport.calls(), 2);
        assert!(executor.health().is_valid());
        Ok(())
    }

    #[tokio::test]
    async fn request_build_failure_is_not_retried() {
        let transport = ScriptedTransport::new(vec![
            Err(Error::Decode("failed to build request".into())),
            Ok((200, r#""never""#)),
        ]);
        let executor = Executor::new(transport.clone(), fast_retry(4));

        let res = executor.execute(Method::POST, "/x", Body::Empty).await;
        assert!(matches!(res, Err(Error::Decode(_))));
        assert_eq!(transport.calls(), 1);
        assert!(executor.health().is_valid());
    }
}
