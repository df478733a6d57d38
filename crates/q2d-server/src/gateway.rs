//! Query gateway: authenticate, execute, encode, respond, then dispatch.
//!
//! Over HTTP the command is handed to the dispatcher only once the response
//! body has been produced, so the reply never waits on device I/O. Dispatch
//! runs as a detached task and its outcome never reaches the caller.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::body::{Body, Bytes};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use q2d_core::{Bitstring, EncodedCommand, QueryStore, Row};

use crate::dispatch::CommandDispatcher;

/// Request body of `POST /query`.
///
/// Both fields are kept as raw JSON so that wrong types fail validation
/// instead of body parsing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub query: Option<Value>,
    #[serde(default, rename = "API_KEY")]
    pub api_key: Option<Value>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            query: Some(Value::String(query.into())),
            api_key: Some(Value::String(api_key.into())),
        }
    }

    /// Parse a request body leniently. Anything that is not a JSON object
    /// becomes an empty request, which then fails authentication.
    ///
    /// Arrays are rejected explicitly: serde would otherwise fill the fields
    /// by position.
    pub fn from_body(body: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(body) {
            Ok(doc @ Value::Object(_)) => serde_json::from_value(doc).unwrap_or_default(),
            _ => Self::default(),
        }
    }
}

/// Successful query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub data: Vec<Row>,
    pub count: usize,
    pub bitstring: Bitstring,
}

/// Errors returned to the HTTP caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("Invalid key")]
    Auth,

    #[error("Missing SQL query")]
    Validation,

    /// The store's own message, verbatim.
    #[error("{0}")]
    Execution(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Auth => StatusCode::UNAUTHORIZED,
            GatewayError::Validation | GatewayError::Execution(_) => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Authenticates and runs queries, then hands the encoded result to the
/// dispatcher.
#[derive(Clone)]
pub struct QueryGateway {
    store: Arc<dyn QueryStore>,
    api_key: Arc<str>,
    dispatcher: CommandDispatcher,
}

/// An encoded command that has not been handed to the dispatcher yet.
pub struct PendingDispatch {
    dispatcher: CommandDispatcher,
    command: EncodedCommand,
}

impl PendingDispatch {
    /// Hand the command to a detached dispatch task.
    pub fn spawn(self) {
        self.dispatcher.spawn(self.command);
    }
}

/// Spawns the pending dispatch when dropped.
struct DispatchOnDrop(Option<PendingDispatch>);

impl Drop for DispatchOnDrop {
    fn drop(&mut self) {
        if let Some(pending) = self.0.take() {
            pending.spawn();
        }
    }
}

/// JSON response whose body releases `pending` to the dispatcher after the
/// last byte has been handed to the server, or when the body is dropped
/// because the caller went away.
pub fn respond_then_dispatch(response: &QueryResponse, pending: PendingDispatch) -> Response {
    let json = match serde_json::to_vec(response) {
        Ok(json) => Bytes::from(json),
        Err(e) => return GatewayError::Execution(e.to_string()).into_response(),
    };
    let len = json.len();
    let guard = DispatchOnDrop(Some(pending));

    let chunks = stream::unfold((Some(json), Some(guard)), |(json, guard)| async move {
        match json {
            Some(json) => Some((Ok::<_, Infallible>(json), (None, guard))),
            None => {
                drop(guard);
                None
            }
        }
    });

    let mut reply = Response::new(Body::from_stream(chunks));
    let headers = reply.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
    reply
}

impl QueryGateway {
    pub fn new(
        store: Arc<dyn QueryStore>,
        api_key: impl Into<Arc<str>>,
        dispatcher: CommandDispatcher,
    ) -> Self {
        Self {
            store,
            api_key: api_key.into(),
            dispatcher,
        }
    }

    /// Validate, execute and encode. On success the command has been handed
    /// to a detached dispatch task by the time this returns.
    pub async fn handle(&self, request: QueryRequest) -> Result<QueryResponse, GatewayError> {
        let (response, pending) = self.execute(request).await?;
        pending.spawn();
        Ok(response)
    }

    /// Like [`handle`](Self::handle), but leaves the dispatch to the caller.
    pub async fn execute(
        &self,
        request: QueryRequest,
    ) -> Result<(QueryResponse, PendingDispatch), GatewayError> {
        let query = self.validate(&request)?;

        let store = Arc::clone(&self.store);
        let rows = tokio::task::spawn_blocking(move || store.execute(&query))
            .await
            .map_err(|e| {
                warn!(error = %e, "Store worker failed");
                GatewayError::Execution(e.to_string())
            })?
            .map_err(|e| {
                debug!(error = %e, "Query failed");
                GatewayError::Execution(e.message().to_string())
            })?;

        let command = EncodedCommand::from_rows(&rows);
        info!(
            rows = rows.len(),
            bitstring = %command.bitstring,
            light1 = command.lights.light1,
            light2 = command.lights.light2,
            "Query executed"
        );

        let response = QueryResponse {
            count: rows.len(),
            bitstring: command.bitstring.clone(),
            data: rows,
        };
        let pending = PendingDispatch {
            dispatcher: self.dispatcher.clone(),
            command,
        };
        Ok((response, pending))
    }

    /// Authentication first, then query presence.
    fn validate(&self, request: &QueryRequest) -> Result<String, GatewayError> {
        match &request.api_key {
            Some(Value::String(key)) if key.as_str() == &*self.api_key => {}
            _ => {
                warn!("Rejected query with invalid key");
                return Err(GatewayError::Auth);
            }
        }
        match &request.query {
            Some(Value::String(query)) if !query.is_empty() => Ok(query.clone()),
            _ => Err(GatewayError::Validation),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::{mpsc, oneshot};

    use super::*;
    use crate::link::{DeviceHandle, DeviceLink, LinkConfig};
    use q2d_core::protocol::{Codec, Message};
    use q2d_test_utils::{FakeStore, rows};

    const KEY: &str = "MY_SECRET_KEY";

    fn gateway(store: Arc<FakeStore>) -> (QueryGateway, DeviceLink) {
        let link = DeviceLink::new(LinkConfig::default());
        let gateway = QueryGateway::new(store, KEY, CommandDispatcher::new(link.clone()));
        (gateway, link)
    }

    fn attach(link: &DeviceLink) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(8);
        let (evict_tx, _) = oneshot::channel();
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        link.attach(DeviceHandle::new(link.next_connection_id(), peer, tx, evict_tx));
        rx
    }

    #[tokio::test]
    async fn wrong_key_never_touches_store() {
        let store = Arc::new(FakeStore::with_rows(rows(json!([{"id": 1}]))));
        let (gateway, link) = gateway(Arc::clone(&store));
        let mut frames = attach(&link);
        frames.recv().await.unwrap();

        for request in [
            QueryRequest::new("SELECT 1", "wrong"),
            QueryRequest {
                query: Some(json!("SELECT 1")),
                api_key: Some(json!(42)),
            },
            QueryRequest::default(),
        ] {
            assert_eq!(gateway.handle(request).await, Err(GatewayError::Auth));
        }
        assert_eq!(store.calls(), 0);

        // Nothing dispatched.
        assert!(
            tokio::time::timeout(Duration::from_millis(100), frames.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn auth_is_checked_before_query() {
        let store = Arc::new(FakeStore::with_rows(Vec::new()));
        let (gateway, _link) = gateway(store);
        let request = QueryRequest {
            query: None,
            api_key: Some(json!("nope")),
        };
        assert_eq!(gateway.handle(request).await, Err(GatewayError::Auth));
    }

    #[tokio::test]
    async fn missing_or_non_string_query_is_validation_error() {
        let store = Arc::new(FakeStore::with_rows(Vec::new()));
        let (gateway, _link) = gateway(Arc::clone(&store));
        for query in [None, Some(json!(12)), Some(json!("")), Some(json!(["SELECT 1"]))] {
            let request = QueryRequest {
                query,
                api_key: Some(json!(KEY)),
            };
            assert_eq!(gateway.handle(request).await, Err(GatewayError::Validation));
        }
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn store_failure_is_verbatim_and_not_dispatched() {
        let store = Arc::new(FakeStore::failing("no such table: robots"));
        let (gateway, link) = gateway(Arc::clone(&store));
        let mut frames = attach(&link);
        frames.recv().await.unwrap();

        let err = gateway
            .handle(QueryRequest::new("SELECT * FROM robots", KEY))
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::Execution("no such table: robots".into()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(store.queries(), vec!["SELECT * FROM robots".to_string()]);

        assert!(
            tokio::time::timeout(Duration::from_millis(100), frames.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn success_responds_and_dispatches() {
        let data = rows(json!([
            {"id": 1, "name": "cow"},
            {"id": 5, "name": "Light 1"},
            {"id": 9}
        ]));
        let store = Arc::new(FakeStore::with_rows(data.clone()));
        let (gateway, link) = gateway(store);
        let mut frames = attach(&link);
        frames.recv().await.unwrap();

        let response = gateway
            .handle(QueryRequest::new("SELECT * FROM animal", KEY))
            .await
            .unwrap();
        assert_eq!(response.count, 3);
        assert_eq!(response.bitstring.as_str(), "1000100010");
        assert_eq!(response.data, data);

        let frame = tokio::time::timeout(Duration::from_secs(1), frames.recv())
            .await
            .unwrap()
            .unwrap();
        match Codec::decode(&frame).unwrap() {
            Message::Cmd(cmd) => {
                assert_eq!(cmd.bitstring.as_str(), "1000100010");
                assert!(cmd.light1);
                assert!(!cmd.light2);
            }
            other => panic!("expected cmd, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn success_without_device_still_responds() {
        let store = Arc::new(FakeStore::with_rows(rows(json!([{"id": "10"}]))));
        let (gateway, _link) = gateway(store);
        let response = gateway
            .handle(QueryRequest::new("SELECT 10 AS id", KEY))
            .await
            .unwrap();
        assert_eq!(response.bitstring.as_str(), "0000000001");
        assert_eq!(response.count, 1);
    }

    #[test]
    fn lenient_body_parsing() {
        let parsed = QueryRequest::from_body(br#"{"query":"SELECT 1","API_KEY":"k"}"#);
        assert_eq!(parsed.query, Some(json!("SELECT 1")));
        assert_eq!(parsed.api_key, Some(json!("k")));

        for body in [
            &b"not json"[..],
            b"[1,2]",
            br#"["SELECT * FROM light","MY_SECRET_KEY"]"#,
            b"\"SELECT 1\"",
            b"",
        ] {
            let parsed = QueryRequest::from_body(body);
            assert!(parsed.query.is_none());
            assert!(parsed.api_key.is_none());
        }
    }

    #[tokio::test]
    async fn http_reply_is_produced_before_dispatch() {
        let store = Arc::new(FakeStore::with_rows(rows(json!([{"id": 3}]))));
        let (gateway, link) = gateway(store);
        let mut frames = attach(&link);
        frames.recv().await.unwrap();

        let (response, pending) = gateway
            .execute(QueryRequest::new("SELECT * FROM food", KEY))
            .await
            .unwrap();
        let http = respond_then_dispatch(&response, pending);
        assert_eq!(http.status(), StatusCode::OK);

        // Nothing leaves until the body has been consumed.
        assert!(
            tokio::time::timeout(Duration::from_millis(100), frames.recv())
                .await
                .is_err()
        );

        let body = axum::body::to_bytes(http.into_body(), usize::MAX)
            .await
            .unwrap();
        let decoded: QueryResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(decoded.bitstring.as_str(), "0010000000");

        let frame = tokio::time::timeout(Duration::from_secs(1), frames.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(Codec::decode(&frame).unwrap(), Message::Cmd(_)));
    }

    #[tokio::test]
    async fn dropped_reply_still_dispatches() {
        let store = Arc::new(FakeStore::with_rows(rows(json!([{"id": 4}]))));
        let (gateway, link) = gateway(store);
        let mut frames = attach(&link);
        frames.recv().await.unwrap();

        let (response, pending) = gateway
            .execute(QueryRequest::new("SELECT * FROM food", KEY))
            .await
            .unwrap();
        drop(respond_then_dispatch(&response, pending));

        let frame = tokio::time::timeout(Duration::from_secs(1), frames.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(Codec::decode(&frame).unwrap(), Message::Cmd(_)));
    }

    #[test]
    fn error_statuses() {
        assert_eq!(GatewayError::Auth.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(GatewayError::Validation.status(), StatusCode::BAD_REQUEST);
        assert_eq!(GatewayError::Auth.to_string(), "Invalid key");
        assert_eq!(GatewayError::Validation.to_string(), "Missing SQL query");
    }
}
