#![allow(unused_imports, dead_code)]

use std::future::pending;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bridge_worker::worker::dispatch::Dispatcher;
use bytes::Bytes;
use lmstudio_client::client::mock::MockModelBackend;
use lmstudio_client::{ApiResponse, LmStudioError, LmStudioResult, ModelBackend};
use serde_json::Value;

/// Dispatcher wired to a recording backend double.
pub fn dispatcher() -> (Arc<MockModelBackend>, Dispatcher) {
    let backend = Arc::new(MockModelBackend::new());
    (Arc::clone(&backend), Dispatcher::new(backend))
}

/// Backend double whose calls never complete, for driving handlers into
/// their deadlines under a paused clock.
pub struct HangingBackend;

#[async_trait]
impl ModelBackend for HangingBackend {
    async fn list_models(&self) -> LmStudioResult<ApiResponse> {
        pending().await
    }

    async fn pull_model(&self, _identifier: &str) -> LmStudioResult<String> {
        pending().await
    }

    async fn delete_model(&self, _model_id: &str) -> LmStudioResult<PathBuf> {
        pending().await
    }

    async fn chat_completion(&self, _payload: Bytes) -> LmStudioResult<ApiResponse> {
        pending().await
    }
}

/// Dispatcher whose backend never answers.
pub fn hanging_dispatcher() -> Dispatcher {
    Dispatcher::new(Arc::new(HangingBackend))
}

/// Decodes a reply and checks the envelope invariant: a failure carries a
/// non-empty error, a success carries none.
pub fn decode_envelope(reply: &[u8]) -> Value {
    let value: Value = serde_json::from_slice(reply).expect("reply is not valid JSON");
    if value["ok"].as_bool().expect("reply without ok field") {
        assert!(
            value.get("error").is_none(),
            "ok reply carries an error: {value}"
        );
    } else {
        let error = value["error"].as_str().expect("failure reply without error");
        assert!(!error.is_empty(), "failure reply with empty error");
    }
    value
}

/// A real transport-level client error: connection refused against a local
/// port nothing listens on.
pub async fn transport_error() -> LmStudioError {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    reqwest::get(format!("http://{addr}/"))
        .await
        .unwrap_err()
        .into()
}
