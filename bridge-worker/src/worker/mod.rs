pub mod dispatch;

use std::sync::Arc;

use async_nats::{Client, Subscriber};
use futures::StreamExt;
use lmstudio_client::LmStudioClient;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::types::environment::Environment;

use self::dispatch::{Dispatcher, Operation};

/// Queue group shared by bridge instances; the bus delivers each request to
/// one member only.
pub const QUEUE_GROUP: &str = "bridge-worker";

/// Bridge worker that serves model operations over the bus
pub struct BridgeWorker {
    client: Client,
    dispatcher: Arc<Dispatcher>,
    shutdown_token: CancellationToken,
}

impl BridgeWorker {
    /// Creates a new bridge worker connected to the bus
    ///
    /// # Errors
    ///
    /// Returns an error if the LM Studio base URL is invalid or the bus
    /// connection cannot be established.
    pub async fn new(env: &Environment) -> anyhow::Result<Self> {
        let config = env.lmstudio_config();
        info!(
            "Using LM Studio at {} with model store {}",
            config.base_url,
            config.models_dir.display()
        );
        let backend = LmStudioClient::new(&config)?;

        info!("Connecting to NATS at {}", env.nats_url());
        let client = async_nats::connect(env.nats_url()).await?;

        Ok(Self {
            client,
            dispatcher: Arc::new(Dispatcher::new(Arc::new(backend))),
            shutdown_token: CancellationToken::new(),
        })
    }

    /// Returns a clone of the shutdown token for external control
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Starts the worker and serves requests until shutdown
    ///
    /// # Errors
    ///
    /// Returns an error if a subject subscription cannot be established.
    pub async fn start(self) -> anyhow::Result<()> {
        info!("Starting bridge worker in queue group '{QUEUE_GROUP}'");

        let handler_tracker = TaskTracker::new();
        let listener_handles = self.spawn_listeners(&handler_tracker).await?;

        // Listeners exit on the shutdown token; a dead subscription cancels
        // it as well, taking the whole worker down.
        self.shutdown_token.cancelled().await;
        info!("Bridge worker shutdown initiated");

        for handle in listener_handles {
            if let Err(e) = handle.await {
                error!("Listener task error: {}", e);
            }
        }

        // Wait for in-flight handlers, then push out any buffered replies.
        handler_tracker.close();
        handler_tracker.wait().await;
        if let Err(e) = self.client.flush().await {
            error!("Failed to flush bus connection: {}", e);
        }

        info!("All bridge worker components stopped");
        Ok(())
    }

    /// Subscribes to every operation subject and spawns its listener task
    async fn spawn_listeners(
        &self,
        handler_tracker: &TaskTracker,
    ) -> anyhow::Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::new();

        for op in Operation::ALL {
            let subscriber = self
                .client
                .queue_subscribe(op.subject(), QUEUE_GROUP.to_string())
                .await?;
            info!("Subscribed to '{}' for {}", op.subject(), op.name());

            let listener = SubjectListener {
                op,
                client: self.client.clone(),
                dispatcher: Arc::clone(&self.dispatcher),
                handler_tracker: handler_tracker.clone(),
                shutdown_token: self.shutdown_token.clone(),
            };
            handles.push(tokio::spawn(listener.run(subscriber)));
        }

        Ok(handles)
    }
}

/// Consumes one subject's messages and spawns a handler task per message
struct SubjectListener {
    op: Operation,
    client: Client,
    dispatcher: Arc<Dispatcher>,
    handler_tracker: TaskTracker,
    shutdown_token: CancellationToken,
}

impl SubjectListener {
    async fn run(self, mut subscriber: Subscriber) {
        loop {
            tokio::select! {
                () = self.shutdown_token.cancelled() => {
                    info!("{} listener received shutdown signal", self.op.name());
                    break;
                }
                message = subscriber.next() => {
                    match message {
                        Some(message) => self.spawn_handler(message),
                        None => {
                            error!("{} subscription closed, shutting down", self.op.name());
                            self.shutdown_token.cancel();
                            break;
                        }
                    }
                }
            }
        }

        // Stop new deliveries; in-flight handlers drain through the tracker.
        if let Err(e) = subscriber.unsubscribe().await {
            warn!("Failed to unsubscribe from '{}': {}", self.op.subject(), e);
        }
    }

    /// Handles one message on its own task so a slow pull cannot block the
    /// subject's other requests
    fn spawn_handler(&self, message: async_nats::Message) {
        let op = self.op;
        let client = self.client.clone();
        let dispatcher = Arc::clone(&self.dispatcher);

        self.handler_tracker.spawn(async move {
            let reply = dispatcher.handle(op, &message.payload).await;
            match message.reply {
                Some(subject) => {
                    if let Err(e) = client.publish(subject, reply.into()).await {
                        error!("error responding to {} message: {}", op.name(), e);
                    }
                }
                None => warn!("Dropping {} reply: request has no reply subject", op.name()),
            }
        });
    }
}
