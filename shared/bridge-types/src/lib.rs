//! Bus-facing types for the LM Studio bridge
//!
//! Every reply published by the bridge uses the same `{ok, error, data}`
//! envelope; the `data` shape is operation-specific. Bus-side consumers can
//! depend on this crate alone to build requests and decode replies.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Subject names the bridge worker subscribes to.
pub mod subjects {
    /// List the models known to the daemon.
    pub const MODELS_LIST: &str = "models.list";
    /// Download a model through the daemon CLI.
    pub const MODELS_PULL: &str = "models.pull";
    /// Remove a model's files from the local store.
    pub const MODELS_DELETE: &str = "models.delete";
    /// Forward a chat completion request to the daemon.
    pub const MODELS_CHAT: &str = "models.chat";
}

/// Uniform reply envelope.
///
/// Invariant: `ok == false` implies `error` carries a non-empty message, and
/// `ok == true` implies `error` is absent. Build envelopes through
/// [`BusResponse::ok`] and [`BusResponse::error`] to keep it that way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusResponse<T> {
    /// Whether the operation succeeded.
    pub ok: bool,
    /// Failure message, absent on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Operation-specific payload; present on success, and on failure when
    /// the operation has diagnostics worth returning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> BusResponse<T> {
    /// Builds a success envelope carrying `data`.
    #[must_use]
    pub fn ok(data: T) -> Self {
        Self {
            ok: true,
            error: None,
            data: Some(data),
        }
    }

    /// Builds a failure envelope with an error message and optional
    /// diagnostic payload.
    #[must_use]
    pub fn error(message: impl Into<String>, data: Option<T>) -> Self {
        let message = message.into();
        debug_assert!(!message.is_empty(), "failure envelopes need an error message");
        Self {
            ok: false,
            error: Some(message),
            data,
        }
    }
}

/// Request body for [`subjects::MODELS_PULL`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullModelRequest {
    /// Model identifier understood by the daemon CLI,
    /// e.g. `meta-llama/Meta-Llama-3-8B-Instruct`.
    ///
    /// Defaults to empty when absent so the handler can report the missing
    /// field instead of a decode failure.
    #[serde(default)]
    pub identifier: String,
}

/// Request body for [`subjects::MODELS_DELETE`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteModelRequest {
    /// Model ID as reported by the daemon, e.g. `granite-3.0-2b-instruct`.
    ///
    /// Defaults to empty when absent so the handler can report the missing
    /// field instead of a decode failure.
    #[serde(default)]
    pub model_id: String,
}

/// Reply data for [`subjects::MODELS_LIST`].
///
/// `models` is the daemon's response body verbatim; it is never reparsed, so
/// key order and number formatting survive the trip.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListModelsData {
    /// HTTP status returned by the daemon.
    pub http_status: u16,
    /// Raw daemon response body.
    pub models: Box<RawValue>,
}

/// Reply data for [`subjects::MODELS_PULL`], success and failure alike.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullModelData {
    /// Identifier the pull was issued for.
    pub model: String,
    /// Combined stdout/stderr captured from the daemon CLI.
    pub output: String,
}

/// Success reply data for [`subjects::MODELS_DELETE`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletedModelData {
    /// Model ID the request named.
    pub model_id: String,
    /// Directory that was removed.
    pub deleted_dir: String,
}

/// Failure reply data for [`subjects::MODELS_DELETE`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteModelDiagnostics {
    /// Model ID the request named.
    pub model_id: String,
    /// Resolved model directory, or empty when resolution never got that far.
    pub dir: String,
}

/// Reply data for [`subjects::MODELS_CHAT`].
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatCompletionData {
    /// HTTP status returned by the daemon.
    pub http_status: u16,
    /// Raw daemon response body.
    pub response: Box<RawValue>,
}

/// Failure reply data for the HTTP-backed operations (list and chat).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpDiagnostics {
    /// HTTP status returned by the daemon, or 0 when the call never
    /// completed.
    pub http_status: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ok_envelope_omits_error() {
        let resp = BusResponse::ok(HttpDiagnostics { http_status: 200 });
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"ok":true,"data":{"http_status":200}}"#);
    }

    #[test]
    fn test_error_envelope_omits_absent_data() {
        let resp = BusResponse::<HttpDiagnostics>::error("'identifier' is required", None);
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"ok":false,"error":"'identifier' is required"}"#);
    }

    #[test]
    fn test_error_envelope_carries_diagnostics() {
        let resp = BusResponse::error(
            "LM Studio returned 503: overloaded",
            Some(HttpDiagnostics { http_status: 503 }),
        );
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(
            json,
            r#"{"ok":false,"error":"LM Studio returned 503: overloaded","data":{"http_status":503}}"#
        );
    }

    #[test]
    fn test_raw_passthrough_preserves_body_bytes() {
        // Key order and number formatting must survive the envelope.
        let body = r#"{"data":[{"id":"acme/foo","size":2.50}],"object":"list"}"#;
        let data = ListModelsData {
            http_status: 200,
            models: RawValue::from_string(body.to_string()).unwrap(),
        };
        let json = serde_json::to_string(&BusResponse::ok(data)).unwrap();
        assert_eq!(
            json,
            format!(r#"{{"ok":true,"data":{{"http_status":200,"models":{body}}}}}"#)
        );
    }

    #[test]
    fn test_envelope_round_trips_for_consumers() {
        // DeletedModelData implements no Default; absent optional fields
        // must still decode as None.
        let json = r#"{"ok":true,"data":{"model_id":"acme/foo","deleted_dir":"/m/acme/acme/foo"}}"#;
        let resp: BusResponse<DeletedModelData> = serde_json::from_str(json).unwrap();
        assert!(resp.ok);
        assert_eq!(resp.error, None);
        let data = resp.data.unwrap();
        assert_eq!(data.model_id, "acme/foo");
        assert_eq!(data.deleted_dir, "/m/acme/acme/foo");

        let json = r#"{"ok":false,"error":"model directory not found: /m/acme/acme/foo"}"#;
        let resp: BusResponse<DeletedModelData> = serde_json::from_str(json).unwrap();
        assert!(!resp.ok);
        assert_eq!(
            resp.error.as_deref(),
            Some("model directory not found: /m/acme/acme/foo")
        );
        assert!(resp.data.is_none());
    }

    #[test]
    #[should_panic(expected = "failure envelopes need an error message")]
    fn test_error_envelope_rejects_an_empty_message() {
        let _ = BusResponse::<HttpDiagnostics>::error("", None);
    }
}
