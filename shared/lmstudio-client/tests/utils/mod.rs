#![allow(unused_imports, dead_code)]

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// In-process stand-in for the LM Studio daemon HTTP API.
///
/// Serves an axum router on an ephemeral local port for the duration of one
/// test; the server task is aborted on drop.
pub struct StubDaemon {
    base_url: String,
    server: JoinHandle<()>,
}

impl StubDaemon {
    /// Start serving `router` on an ephemeral local port.
    pub async fn start(router: Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            server,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Drop for StubDaemon {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Base URL of a local port with nothing listening on it.
pub async fn unreachable_base_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}
