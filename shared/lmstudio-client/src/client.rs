//! Backend client for the LM Studio daemon
//!
//! One external action per call, normalized into bytes plus status plus
//! error. List and chat responses are passed through without parsing so the
//! dispatch layer can embed the daemon's body verbatim.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header;
use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::cli::{CommandRunner, SystemCommandRunner};
use crate::error::{LmStudioError, LmStudioResult};

/// Maximum number of idle connections to maintain per host
const MAX_IDLE_CONNECTIONS_PER_HOST: usize = 10;

/// Immutable client configuration.
///
/// Built once at startup and shared read-only by every handler, so there is
/// no locking anywhere in the client.
#[derive(Debug, Clone)]
pub struct LmStudioConfig {
    /// Daemon HTTP API base, e.g. `http://localhost:1234`.
    pub base_url: String,
    /// Root of the on-disk model store.
    pub models_dir: PathBuf,
    /// Transport-level timeout for daemon HTTP calls.
    pub request_timeout: Duration,
}

/// Raw response from the daemon HTTP API: body bytes plus status, no
/// interpretation.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP status the daemon returned.
    pub status: u16,
    /// Response body, verbatim.
    pub body: Bytes,
}

/// Transient model record from the daemon's info endpoint.
///
/// Fetched per delete to resolve the on-disk directory; never cached.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    /// Model ID as the daemon reports it.
    #[serde(default)]
    pub id: String,
    /// Publishing organisation; the daemon sometimes omits this.
    #[serde(default)]
    pub publisher: String,
}

/// Outbound operations against the daemon and its model store.
///
/// The dispatch layer depends on this trait rather than the concrete client
/// so handler tests can swap in a recording double.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Fetches the daemon's model list verbatim.
    ///
    /// Non-success statuses are not an error here; the status is passed
    /// through for the caller to report.
    ///
    /// # Errors
    ///
    /// Returns [`LmStudioError::Http`] when the daemon cannot be reached or
    /// the transport fails mid-call.
    async fn list_models(&self) -> LmStudioResult<ApiResponse>;

    /// Downloads a model through the daemon CLI, returning the combined
    /// output it printed.
    ///
    /// # Errors
    ///
    /// Returns [`LmStudioError::EmptyIdentifier`] for an empty identifier
    /// and [`LmStudioError::Cli`] (carrying the captured output) when the
    /// tool cannot be started or exits non-zero.
    async fn pull_model(&self, identifier: &str) -> LmStudioResult<String>;

    /// Removes a model's files from the local store, returning the directory
    /// that was removed.
    ///
    /// The daemon is asked to unload the model first; that step is
    /// best-effort and its failure is logged, never propagated.
    ///
    /// # Errors
    ///
    /// Returns [`LmStudioError::ModelDirNotFound`] when the resolved
    /// directory does not exist, [`LmStudioError::Io`] on other filesystem
    /// failures, [`LmStudioError::UnsafeModelPath`] when the daemon reports
    /// a publisher or ID that would resolve outside the store, and the HTTP
    /// error kinds when the info lookup fails. Error variants expose the
    /// resolved directory through [`LmStudioError::model_dir`] for
    /// diagnostics.
    async fn delete_model(&self, model_id: &str) -> LmStudioResult<PathBuf>;

    /// Forwards an opaque chat completion payload verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`LmStudioError::Http`] when the daemon cannot be reached or
    /// the transport fails mid-call.
    async fn chat_completion(&self, payload: Bytes) -> LmStudioResult<ApiResponse>;
}

/// Client for the daemon's HTTP API, CLI tool, and model store.
#[derive(Debug)]
pub struct LmStudioClient {
    base_url: Url,
    models_dir: PathBuf,
    http: reqwest::Client,
    runner: Arc<dyn CommandRunner>,
}

impl LmStudioClient {
    /// Creates a client over the real daemon CLI.
    ///
    /// # Errors
    ///
    /// Returns [`LmStudioError::BaseUrl`] when the configured base URL does
    /// not parse.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client fails to be created.
    pub fn new(config: &LmStudioConfig) -> LmStudioResult<Self> {
        Self::with_runner(config, Arc::new(SystemCommandRunner))
    }

    /// Creates a client with a custom CLI runner.
    ///
    /// # Errors
    ///
    /// Returns [`LmStudioError::BaseUrl`] when the configured base URL does
    /// not parse.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client fails to be created.
    pub fn with_runner(
        config: &LmStudioConfig,
        runner: Arc<dyn CommandRunner>,
    ) -> LmStudioResult<Self> {
        let trimmed = config.base_url.trim_end_matches('/');
        let base_url = Url::parse(trimmed).map_err(|err| LmStudioError::BaseUrl {
            url: config.base_url.clone(),
            reason: err.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(LmStudioError::BaseUrl {
                url: config.base_url.clone(),
                reason: "not a base URL".to_string(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(MAX_IDLE_CONNECTIONS_PER_HOST)
            .build()
            .expect("Failed to create HTTP client");

        Ok(Self {
            base_url,
            models_dir: config.models_dir.clone(),
            http,
            runner,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // `with_runner` rejected cannot-be-a-base URLs, so segments are
        // always available here.
        if let Ok(mut parts) = url.path_segments_mut() {
            parts.pop_if_empty().extend(segments);
        }
        url
    }

    fn model_info_url(&self, model_id: &str) -> Url {
        let mut url = self.endpoint(&["api", "v0", "models"]);
        // push() percent-encodes the ID as one segment; IDs with slashes
        // (`acme/foo`) must not become two segments.
        if let Ok(mut parts) = url.path_segments_mut() {
            parts.push(model_id);
        }
        url
    }

    /// Best-effort unload before deletion. Failures are logged and swallowed
    /// so a model the daemon never loaded can still be deleted.
    async fn unload_model(&self, model_id: &str) {
        if model_id.is_empty() {
            return;
        }
        match self.runner.run(&["unload", model_id]).await {
            Ok(run) if run.success => {}
            Ok(run) => warn!(
                "failed to unload model {model_id}: {} | output: {}",
                exit_reason(run.code),
                run.combined.trim()
            ),
            Err(err) => warn!("failed to unload model {model_id}: {err}"),
        }
    }

    async fn model_info(&self, model_id: &str) -> LmStudioResult<ModelInfo> {
        let resp = self.http.get(self.model_info_url(model_id)).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LmStudioError::Api {
                status: status.as_u16(),
                body,
            });
        }
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl ModelBackend for LmStudioClient {
    async fn list_models(&self) -> LmStudioResult<ApiResponse> {
        let resp = self
            .http
            .get(self.endpoint(&["api", "v0", "models"]))
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await?;
        Ok(ApiResponse { status, body })
    }

    async fn pull_model(&self, identifier: &str) -> LmStudioResult<String> {
        if identifier.is_empty() {
            return Err(LmStudioError::EmptyIdentifier);
        }

        let command = format!("get {identifier}");
        let run = self
            .runner
            .run(&["get", identifier])
            .await
            .map_err(|err| LmStudioError::Cli {
                command: command.clone(),
                reason: err.to_string(),
                output: String::new(),
            })?;

        if !run.success {
            return Err(LmStudioError::Cli {
                command,
                reason: exit_reason(run.code),
                output: run.combined,
            });
        }

        Ok(run.combined)
    }

    async fn delete_model(&self, model_id: &str) -> LmStudioResult<PathBuf> {
        if model_id.is_empty() {
            return Err(LmStudioError::EmptyModelId);
        }

        self.unload_model(model_id).await;

        let info = self.model_info(model_id).await?;
        let publisher = resolve_publisher(&info)?;
        ensure_plain_path(&publisher)?;
        ensure_plain_path(&info.id)?;

        // The daemon's reported ID, not the requested one, names the
        // directory; with slashed IDs the ID contributes further components.
        let dir = self.models_dir.join(publisher).join(info.id);

        match tokio::fs::metadata(&dir).await {
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(LmStudioError::ModelDirNotFound { dir });
            }
            Err(err) => {
                return Err(LmStudioError::Io {
                    action: "checking",
                    dir,
                    source: err,
                });
            }
        }

        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|err| LmStudioError::Io {
                action: "removing",
                dir: dir.clone(),
                source: err,
            })?;

        Ok(dir)
    }

    async fn chat_completion(&self, payload: Bytes) -> LmStudioResult<ApiResponse> {
        let resp = self
            .http
            .post(self.endpoint(&["api", "v0", "chat", "completions"]))
            .header(header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await?;
        Ok(ApiResponse { status, body })
    }
}

/// Publisher as reported by the daemon, falling back to the `publisher/`
/// prefix of the reported ID. The prefix convention is undocumented daemon
/// behavior, so every use of the fallback is logged.
fn resolve_publisher(info: &ModelInfo) -> LmStudioResult<String> {
    if !info.publisher.is_empty() {
        return Ok(info.publisher.clone());
    }

    match info.id.split_once('/') {
        Some((publisher, _)) if !publisher.is_empty() => {
            warn!(
                "publisher missing from model info for {}, deriving '{publisher}' from ID prefix",
                info.id
            );
            Ok(publisher.to_string())
        }
        _ => Err(LmStudioError::UnknownPublisher {
            model_id: info.id.clone(),
        }),
    }
}

/// Guards the models root: reported publishers and IDs may only contribute
/// plain directory names to the joined path. `PathBuf::join` replaces the
/// base entirely when handed an absolute component, and `..` walks out of
/// the store, so neither may come from the daemon.
fn ensure_plain_path(value: &str) -> LmStudioResult<()> {
    let plain = !value.is_empty()
        && Path::new(value)
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if plain {
        Ok(())
    } else {
        Err(LmStudioError::UnsafeModelPath {
            component: value.to_string(),
        })
    }
}

fn exit_reason(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with status {code}"),
        None => "terminated by signal".to_string(),
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    //! Recording test double for the backend seam.

    #![allow(clippy::missing_panics_doc)]

    use std::path::PathBuf;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::{ApiResponse, ModelBackend};
    use crate::error::LmStudioResult;

    /// One recorded backend invocation.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum BackendCall {
        ListModels,
        PullModel(String),
        DeleteModel(String),
        ChatCompletion(Bytes),
    }

    /// Backend double that records every call and plays back scripted
    /// results in order. Unscripted calls fall back to a benign default, so
    /// tests only script what they assert.
    #[derive(Default)]
    pub struct MockModelBackend {
        calls: Mutex<Vec<BackendCall>>,
        list_results: Mutex<Vec<LmStudioResult<ApiResponse>>>,
        pull_results: Mutex<Vec<LmStudioResult<String>>>,
        delete_results: Mutex<Vec<LmStudioResult<PathBuf>>>,
        chat_results: Mutex<Vec<LmStudioResult<ApiResponse>>>,
    }

    impl MockModelBackend {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Every backend call recorded so far.
        #[must_use]
        pub fn calls(&self) -> Vec<BackendCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn push_list_result(&self, result: LmStudioResult<ApiResponse>) {
            self.list_results.lock().unwrap().push(result);
        }

        pub fn push_pull_result(&self, result: LmStudioResult<String>) {
            self.pull_results.lock().unwrap().push(result);
        }

        pub fn push_delete_result(&self, result: LmStudioResult<PathBuf>) {
            self.delete_results.lock().unwrap().push(result);
        }

        pub fn push_chat_result(&self, result: LmStudioResult<ApiResponse>) {
            self.chat_results.lock().unwrap().push(result);
        }

        fn take<T>(queue: &Mutex<Vec<LmStudioResult<T>>>) -> Option<LmStudioResult<T>> {
            let mut queue = queue.lock().unwrap();
            if queue.is_empty() {
                None
            } else {
                Some(queue.remove(0))
            }
        }
    }

    #[async_trait]
    impl ModelBackend for MockModelBackend {
        async fn list_models(&self) -> LmStudioResult<ApiResponse> {
            self.calls.lock().unwrap().push(BackendCall::ListModels);
            Self::take(&self.list_results).unwrap_or_else(|| {
                Ok(ApiResponse {
                    status: 200,
                    body: Bytes::from_static(br#"{"data":[],"object":"list"}"#),
                })
            })
        }

        async fn pull_model(&self, identifier: &str) -> LmStudioResult<String> {
            self.calls
                .lock()
                .unwrap()
                .push(BackendCall::PullModel(identifier.to_string()));
            Self::take(&self.pull_results).unwrap_or_else(|| Ok(String::new()))
        }

        async fn delete_model(&self, model_id: &str) -> LmStudioResult<PathBuf> {
            self.calls
                .lock()
                .unwrap()
                .push(BackendCall::DeleteModel(model_id.to_string()));
            Self::take(&self.delete_results)
                .unwrap_or_else(|| Ok(PathBuf::from(format!("/models/{model_id}"))))
        }

        async fn chat_completion(&self, payload: Bytes) -> LmStudioResult<ApiResponse> {
            self.calls
                .lock()
                .unwrap()
                .push(BackendCall::ChatCompletion(payload));
            Self::take(&self.chat_results).unwrap_or_else(|| {
                Ok(ApiResponse {
                    status: 200,
                    body: Bytes::from_static(b"{}"),
                })
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::cli::mock::RecordingRunner;

    fn build_client(base_url: &str) -> LmStudioResult<LmStudioClient> {
        LmStudioClient::with_runner(
            &LmStudioConfig {
                base_url: base_url.to_string(),
                models_dir: PathBuf::from("/models"),
                request_timeout: Duration::from_secs(5),
            },
            Arc::new(RecordingRunner::new()),
        )
    }

    #[test]
    fn test_endpoint_joins_segments() {
        let client = build_client("http://localhost:1234").unwrap();
        assert_eq!(
            client.endpoint(&["api", "v0", "models"]).as_str(),
            "http://localhost:1234/api/v0/models"
        );
        assert_eq!(
            client.endpoint(&["api", "v0", "chat", "completions"]).as_str(),
            "http://localhost:1234/api/v0/chat/completions"
        );
    }

    #[test]
    fn test_trailing_slash_in_base_url_is_trimmed() {
        let client = build_client("http://localhost:1234/").unwrap();
        assert_eq!(
            client.endpoint(&["api", "v0", "models"]).as_str(),
            "http://localhost:1234/api/v0/models"
        );
    }

    #[test]
    fn test_model_info_url_escapes_slashes_in_the_id() {
        let client = build_client("http://localhost:1234").unwrap();
        assert_eq!(
            client.model_info_url("acme/foo").as_str(),
            "http://localhost:1234/api/v0/models/acme%2Ffoo"
        );
    }

    #[test]
    fn test_malformed_base_url_is_rejected() {
        let err = build_client("not a url").unwrap_err();
        assert!(matches!(err, LmStudioError::BaseUrl { .. }));
    }

    #[test]
    fn test_reported_publisher_wins_over_prefix() {
        let info = ModelInfo {
            id: "other/foo".to_string(),
            publisher: "acme".to_string(),
        };
        assert_eq!(resolve_publisher(&info).unwrap(), "acme");
    }

    #[test]
    fn test_publisher_derived_from_id_prefix_when_missing() {
        let info = ModelInfo {
            id: "acme/foo".to_string(),
            publisher: String::new(),
        };
        assert_eq!(resolve_publisher(&info).unwrap(), "acme");
    }

    #[test]
    fn test_publisher_unresolvable_without_prefix() {
        let info = ModelInfo {
            id: "granite-3.0-2b-instruct".to_string(),
            publisher: String::new(),
        };
        let err = resolve_publisher(&info).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unable to determine publisher of model granite-3.0-2b-instruct"
        );
    }

    #[test]
    fn test_publisher_unresolvable_with_empty_prefix() {
        let info = ModelInfo {
            id: "/foo".to_string(),
            publisher: String::new(),
        };
        assert!(matches!(
            resolve_publisher(&info),
            Err(LmStudioError::UnknownPublisher { .. })
        ));
    }

    #[test]
    fn test_reported_path_components_must_be_plain() {
        assert!(ensure_plain_path("acme").is_ok());
        assert!(ensure_plain_path("acme/foo").is_ok());
        for value in ["/srv/models", "acme/../..", "..", ""] {
            assert!(matches!(
                ensure_plain_path(value),
                Err(LmStudioError::UnsafeModelPath { .. })
            ));
        }
    }
}
