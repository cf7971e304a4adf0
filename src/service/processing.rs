//! # Message Processing Service
//!
//! Single consumer of the incoming message queue. Each message is routed by
//! its type:
//!
//! | Message              | Delivery                                           |
//! |----------------------|----------------------------------------------------|
//! | `ClientConnected`    | every client except the one that connected         |
//! | `ClientDisconnected` | every remaining client                             |
//! | `DirectMessage`      | the receiver only, if connected                    |
//! | `RoomMessage`        | stored, then every room member except the emitter  |
//!
//! Room members are resolved before the message is stored, so a message for
//! an unknown room is rejected without touching the store.
//!
//! A routing failure is logged and counted; the loop moves on to the next
//! message. The consumer waits on the queue with a bounded timeout so a stop
//! request is noticed even when no traffic arrives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn, Instrument};

use crate::core::message::Message;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::ClientRegistry;
use crate::service::persistence::MessageStore;
use crate::service::rooms::RoomDirectory;
use crate::utils::fault;
use crate::utils::metrics::global_metrics;

/// Routes decoded messages to their recipients.
#[derive(Clone)]
pub struct MessageRouter {
    registry: Arc<ClientRegistry>,
    rooms: Arc<dyn RoomDirectory>,
    store: Arc<dyn MessageStore>,
}

impl MessageRouter {
    pub fn new(
        registry: Arc<ClientRegistry>,
        rooms: Arc<dyn RoomDirectory>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            registry,
            rooms,
            store,
        }
    }

    /// Deliver one message. Returns how many clients accepted it.
    #[instrument(skip(self, message), fields(kind = %message.message_type()))]
    pub async fn route(&self, message: &Message) -> Result<usize> {
        match message {
            Message::ClientConnected { client } => self.registry.broadcast_except(*client, message),
            Message::ClientDisconnected { .. } => self.registry.broadcast(message),
            Message::DirectMessage { receiver, .. } => {
                Ok(usize::from(self.registry.send_to(*receiver, message)?))
            }
            Message::RoomMessage { emitter, room, .. } => {
                let members = self.rooms.members(*room).await?;
                let stored = self.store.create(message).await?;
                trace!(sequence = stored.sequence, members = members.len(), "Room message stored");

                let mut delivered = 0;
                for member in members.into_iter().filter(|m| m != emitter) {
                    if self.registry.send_to(member, message)? {
                        delivered += 1;
                    }
                }
                Ok(delivered)
            }
        }
    }
}

#[derive(Default)]
struct ServiceState {
    /// Present while stopped
    queue: Option<mpsc::Receiver<Message>>,
    /// Present while running; yields the queue back when the loop exits
    task: Option<JoinHandle<mpsc::Receiver<Message>>>,
}

/// `Stopped -> Running -> Stopped` consumer of the incoming queue.
pub struct ProcessingService {
    router: MessageRouter,
    wait_timeout: Duration,
    running: Arc<AtomicBool>,
    state: Mutex<ServiceState>,
}

impl ProcessingService {
    pub fn new(router: MessageRouter, queue: mpsc::Receiver<Message>, wait_timeout: Duration) -> Self {
        Self {
            router,
            wait_timeout,
            running: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(ServiceState {
                queue: Some(queue),
                task: None,
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start the consumer task. Does nothing if already running.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.task.is_some() {
            return Ok(());
        }

        let queue = state
            .queue
            .take()
            .ok_or_else(|| ProtocolError::Custom(constants::ERR_QUEUE_CLOSED.to_string()))?;

        self.running.store(true, Ordering::Release);
        let span = tracing::info_span!("processing");
        state.task = Some(tokio::spawn(
            consume(
                self.router.clone(),
                queue,
                Arc::clone(&self.running),
                self.wait_timeout,
            )
            .instrument(span),
        ));

        info!("Processing service started");
        Ok(())
    }

    /// Stop the consumer and wait for it to exit. Does nothing if stopped.
    ///
    /// The message being routed when the stop arrives is finished; anything
    /// still queued stays queued for the next `start`.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        self.running.store(false, Ordering::Release);

        if let Some(task) = state.task.take() {
            match task.await {
                Ok(queue) => state.queue = Some(queue),
                Err(e) => error!(error = %e, "Processing task failed, queue lost"),
            }
            info!("Processing service stopped");
        }
    }
}

async fn consume(
    router: MessageRouter,
    mut queue: mpsc::Receiver<Message>,
    running: Arc<AtomicBool>,
    wait_timeout: Duration,
) -> mpsc::Receiver<Message> {
    let metrics = global_metrics();

    while running.load(Ordering::Acquire) {
        let message = match tokio::time::timeout(wait_timeout, queue.recv()).await {
            Err(_) => continue,
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!("{}", constants::ERR_QUEUE_CLOSED);
                break;
            }
        };

        match fault::guard(router.route(&message)).await {
            Ok(Ok(delivered)) => {
                trace!(kind = %message.message_type(), delivered, "Message routed")
            }
            Ok(Err(e)) => {
                metrics.routing_failure();
                warn!(
                    kind = %message.message_type(),
                    origin = %message.origin(),
                    error = %e,
                    "Failed to route message"
                );
            }
            Err(panic) => {
                metrics.routing_failure();
                error!(kind = %message.message_type(), error = %panic, "Routing panicked");
            }
        }
    }

    running.store(false, Ordering::Release);
    queue
}
