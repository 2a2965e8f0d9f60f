//! Uniform command dispatch and reply envelopes
//!
//! Every inbound message takes the same path: decode and validate the
//! payload, run the backend action under the operation's deadline, and
//! encode the outcome as a [`BusResponse`]. Exactly one reply payload is
//! produced per message, on every path, including internal serialization
//! failures.

use std::sync::Arc;
use std::time::Duration;

use bridge_types::{
    subjects, BusResponse, ChatCompletionData, DeleteModelDiagnostics, DeleteModelRequest,
    DeletedModelData, HttpDiagnostics, ListModelsData, PullModelData, PullModelRequest,
};
use bytes::Bytes;
use lmstudio_client::ModelBackend;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use tokio::time::timeout;
use tracing::{error, warn};

/// Reply sent when the response itself cannot be serialized.
pub const SERIALIZE_FALLBACK: &[u8] =
    br#"{"ok":false,"error":"internal error serializing response"}"#;

/// Bus operations the worker serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// List the models known to the daemon
    ListModels,
    /// Download a model through the daemon CLI
    PullModel,
    /// Remove a model from the local store
    DeleteModel,
    /// Forward a chat completion request
    ChatModel,
}

impl Operation {
    /// Every operation, in subscription order.
    pub const ALL: [Self; 4] = [
        Self::ListModels,
        Self::PullModel,
        Self::DeleteModel,
        Self::ChatModel,
    ];

    /// Bus subject the operation is served on
    #[must_use]
    pub const fn subject(self) -> &'static str {
        match self {
            Self::ListModels => subjects::MODELS_LIST,
            Self::PullModel => subjects::MODELS_PULL,
            Self::DeleteModel => subjects::MODELS_DELETE,
            Self::ChatModel => subjects::MODELS_CHAT,
        }
    }

    /// Operation name as it appears in reply error messages
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ListModels => "ListModels",
            Self::PullModel => "PullModel",
            Self::DeleteModel => "DeleteModel",
            Self::ChatModel => "ChatModel",
        }
    }

    /// Deadline covering the operation's entire backend action
    ///
    /// Pull gets ten minutes to cover large downloads; list is a local
    /// lookup and gets the shortest bound.
    #[must_use]
    pub const fn deadline(self) -> Duration {
        match self {
            Self::ListModels => Duration::from_secs(30),
            Self::PullModel => Duration::from_secs(600),
            Self::DeleteModel | Self::ChatModel => Duration::from_secs(120),
        }
    }
}

/// Minimal view of a chat payload. The payload itself is forwarded
/// untouched; this exists only to check the `model` field.
#[derive(Debug, Deserialize)]
struct ChatModelPeek {
    #[serde(default)]
    model: String,
}

/// Translates inbound bus messages into backend calls and encodes each
/// outcome as exactly one reply envelope.
pub struct Dispatcher {
    backend: Arc<dyn ModelBackend>,
}

impl Dispatcher {
    #[must_use]
    pub const fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self { backend }
    }

    /// Produces the reply payload for one inbound message.
    ///
    /// Always returns a serialized envelope; when the envelope itself cannot
    /// be serialized the reply degrades to [`SERIALIZE_FALLBACK`].
    pub async fn handle(&self, op: Operation, payload: &Bytes) -> Vec<u8> {
        match op {
            Operation::ListModels => self.handle_list_models().await,
            Operation::PullModel => self.handle_pull_model(payload).await,
            Operation::DeleteModel => self.handle_delete_model(payload).await,
            Operation::ChatModel => self.handle_chat_model(payload).await,
        }
    }

    async fn handle_list_models(&self) -> Vec<u8> {
        let op = Operation::ListModels;

        match timeout(op.deadline(), self.backend.list_models()).await {
            Ok(Ok(api)) => {
                let Some(models) = embed_raw(op, &api.body) else {
                    return SERIALIZE_FALLBACK.to_vec();
                };
                encode(
                    op,
                    &BusResponse::ok(ListModelsData {
                        http_status: api.status,
                        models,
                    }),
                )
            }
            Ok(Err(err)) => encode(
                op,
                &BusResponse::error(
                    err.to_string(),
                    Some(HttpDiagnostics {
                        http_status: err.http_status().unwrap_or(0),
                    }),
                ),
            ),
            Err(_) => encode(
                op,
                &BusResponse::error(timed_out(op), Some(HttpDiagnostics { http_status: 0 })),
            ),
        }
    }

    async fn handle_pull_model(&self, payload: &Bytes) -> Vec<u8> {
        let op = Operation::PullModel;

        let req: PullModelRequest = match serde_json::from_slice(payload) {
            Ok(req) => req,
            Err(err) => return error_reply(op, format!("invalid JSON in {}: {err}", op.name())),
        };
        if req.identifier.is_empty() {
            return error_reply(op, "'identifier' is required".to_string());
        }

        match timeout(op.deadline(), self.backend.pull_model(&req.identifier)).await {
            Ok(Ok(output)) => encode(
                op,
                &BusResponse::ok(PullModelData {
                    model: req.identifier,
                    output,
                }),
            ),
            Ok(Err(err)) => {
                let output = err.captured_output().unwrap_or_default().to_string();
                encode(
                    op,
                    &BusResponse::error(
                        err.to_string(),
                        Some(PullModelData {
                            model: req.identifier,
                            output,
                        }),
                    ),
                )
            }
            Err(_) => encode(
                op,
                &BusResponse::error(
                    timed_out(op),
                    Some(PullModelData {
                        model: req.identifier,
                        output: String::new(),
                    }),
                ),
            ),
        }
    }

    async fn handle_delete_model(&self, payload: &Bytes) -> Vec<u8> {
        let op = Operation::DeleteModel;

        let req: DeleteModelRequest = match serde_json::from_slice(payload) {
            Ok(req) => req,
            Err(err) => return error_reply(op, format!("invalid JSON in {}: {err}", op.name())),
        };
        if req.model_id.is_empty() {
            return error_reply(op, "'model_id' is required".to_string());
        }

        match timeout(op.deadline(), self.backend.delete_model(&req.model_id)).await {
            Ok(Ok(dir)) => encode(
                op,
                &BusResponse::ok(DeletedModelData {
                    model_id: req.model_id,
                    deleted_dir: dir.display().to_string(),
                }),
            ),
            Ok(Err(err)) => {
                // Resolution failures have no directory yet; report it empty.
                let dir = err
                    .model_dir()
                    .map_or_else(String::new, |dir| dir.display().to_string());
                encode(
                    op,
                    &BusResponse::error(
                        err.to_string(),
                        Some(DeleteModelDiagnostics {
                            model_id: req.model_id,
                            dir,
                        }),
                    ),
                )
            }
            Err(_) => encode(
                op,
                &BusResponse::error(
                    timed_out(op),
                    Some(DeleteModelDiagnostics {
                        model_id: req.model_id,
                        dir: String::new(),
                    }),
                ),
            ),
        }
    }

    async fn handle_chat_model(&self, payload: &Bytes) -> Vec<u8> {
        let op = Operation::ChatModel;

        if payload.is_empty() {
            return error_reply(op, format!("empty payload in {}", op.name()));
        }
        let peek: ChatModelPeek = match serde_json::from_slice(payload) {
            Ok(peek) => peek,
            Err(err) => return error_reply(op, format!("invalid JSON in {}: {err}", op.name())),
        };
        if peek.model.is_empty() {
            return error_reply(op, format!("'model' is required in {}", op.name()));
        }

        match timeout(op.deadline(), self.backend.chat_completion(payload.clone())).await {
            Ok(Ok(api)) => {
                let Some(response) = embed_raw(op, &api.body) else {
                    return SERIALIZE_FALLBACK.to_vec();
                };
                encode(
                    op,
                    &BusResponse::ok(ChatCompletionData {
                        http_status: api.status,
                        response,
                    }),
                )
            }
            Ok(Err(err)) => encode(
                op,
                &BusResponse::error(
                    err.to_string(),
                    Some(HttpDiagnostics {
                        http_status: err.http_status().unwrap_or(0),
                    }),
                ),
            ),
            Err(_) => encode(
                op,
                &BusResponse::error(timed_out(op), Some(HttpDiagnostics { http_status: 0 })),
            ),
        }
    }
}

/// Serializes an envelope, degrading to [`SERIALIZE_FALLBACK`] when the
/// envelope itself cannot be serialized.
fn encode<T: Serialize>(op: Operation, response: &BusResponse<T>) -> Vec<u8> {
    match serde_json::to_vec(response) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!("error serializing {} reply: {err}", op.name());
            SERIALIZE_FALLBACK.to_vec()
        }
    }
}

/// Failure envelope with no diagnostic payload.
fn error_reply(op: Operation, message: String) -> Vec<u8> {
    encode(op, &BusResponse::<()>::error(message, None))
}

/// Re-wraps a daemon body for verbatim embedding in a JSON reply.
///
/// `None` means the body is not valid JSON and the reply cannot carry it;
/// the caller degrades to [`SERIALIZE_FALLBACK`].
fn embed_raw(op: Operation, body: &Bytes) -> Option<Box<RawValue>> {
    let text = match String::from_utf8(body.to_vec()) {
        Ok(text) => text,
        Err(err) => {
            error!("error serializing {} reply: {err}", op.name());
            return None;
        }
    };
    match RawValue::from_string(text) {
        Ok(raw) => Some(raw),
        Err(err) => {
            error!("error serializing {} reply: {err}", op.name());
            None
        }
    }
}

fn timed_out(op: Operation) -> String {
    let message = format!("{} timed out after {}s", op.name(), op.deadline().as_secs());
    warn!("{message}");
    message
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_operation_table() {
        assert_eq!(Operation::ALL.len(), 4);
        assert_eq!(Operation::ListModels.subject(), "models.list");
        assert_eq!(Operation::PullModel.subject(), "models.pull");
        assert_eq!(Operation::DeleteModel.subject(), "models.delete");
        assert_eq!(Operation::ChatModel.subject(), "models.chat");

        assert_eq!(Operation::ListModels.deadline(), Duration::from_secs(30));
        assert_eq!(Operation::PullModel.deadline(), Duration::from_secs(600));
        assert_eq!(Operation::DeleteModel.deadline(), Duration::from_secs(120));
        assert_eq!(Operation::ChatModel.deadline(), Duration::from_secs(120));
    }

    #[test]
    fn test_timeout_message_names_the_operation() {
        assert_eq!(timed_out(Operation::PullModel), "PullModel timed out after 600s");
        assert_eq!(timed_out(Operation::ListModels), "ListModels timed out after 30s");
    }

    #[test]
    fn test_fallback_reply_is_a_valid_envelope() {
        let value: serde_json::Value = serde_json::from_slice(SERIALIZE_FALLBACK).unwrap();
        assert_eq!(value["ok"], false);
        assert_eq!(value["error"], "internal error serializing response");
    }
}
