//! # Connection Listener
//!
//! Drives one [`FramedConnection`] in a dedicated task for the lifetime of
//! the connection.
//!
//! The task multiplexes three event sources:
//! - the stop token, set by [`ConnectionListener::close`]
//! - the outbound queue, fed through the [`ClientSink`] impl
//! - timed reads from the stream
//!
//! A listener created with [`ConnectionListener::spawn_paused`] holds off
//! all three until [`ConnectionListener::resume`] is called, so its owner can
//! finish registering the connection before any byte is processed.
//!
//! Buffered bytes are offered to [`ListenerHandler::on_read_data`] after every
//! successful read. A read timeout only re-checks the stop token. End of
//! stream fires `on_disconnect`, any other read failure fires `on_read_error`;
//! both end the task.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn, Instrument};

use crate::core::codec;
use crate::core::framed::FramedConnection;
use crate::core::id::ClientId;
use crate::core::message::Message;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::ClientSink;
use crate::transport::callbacks::ListenerHandler;
use crate::utils::fault;
use crate::utils::metrics::global_metrics;

/// Handle to a running listener task.
pub struct ConnectionListener {
    client_id: ClientId,
    outbound: mpsc::Sender<Message>,
    cancel: CancellationToken,
    started: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionListener {
    /// Start the listener task for `framed`.
    ///
    /// `outbound_capacity` bounds the queue of messages waiting to be written.
    pub fn spawn<S>(
        client_id: ClientId,
        framed: FramedConnection<S>,
        handler: Arc<dyn ListenerHandler>,
        outbound_capacity: usize,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let listener = Self::spawn_paused(client_id, framed, handler, outbound_capacity);
        listener.resume();
        listener
    }

    /// Like [`spawn`](Self::spawn), but nothing is read, written or handed to
    /// callbacks until [`resume`](Self::resume). Outbound messages queue up
    /// in the meantime; `close` works as usual.
    pub fn spawn_paused<S>(
        client_id: ClientId,
        framed: FramedConnection<S>,
        handler: Arc<dyn ListenerHandler>,
        outbound_capacity: usize,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, rx) = mpsc::channel(outbound_capacity.max(1));
        let cancel = CancellationToken::new();
        let started = CancellationToken::new();

        let span = tracing::info_span!("listener", client = %client_id);
        let task = tokio::spawn(
            run(
                client_id,
                framed,
                handler,
                rx,
                cancel.clone(),
                started.clone(),
            )
            .instrument(span),
        );

        Self {
            client_id,
            outbound,
            cancel,
            started,
            task: Mutex::new(Some(task)),
        }
    }

    /// Let a paused listener start serving its connection.
    pub fn resume(&self) {
        self.started.cancel();
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Whether a stop has been requested.
    pub fn is_closing(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Queue a message for writing without waiting.
    ///
    /// # Errors
    /// - `RoutingError` if the outbound queue is full; the message is dropped
    /// - `ConnectionClosed` if the listener task has exited
    pub fn send(&self, message: Message) -> Result<()> {
        use mpsc::error::TrySendError;

        match self.outbound.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ProtocolError::RoutingError(
                constants::ERR_OUTBOUND_FULL.to_string(),
            )),
            Err(TrySendError::Closed(_)) => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Stop the task and wait until it has exited and released the stream.
    ///
    /// No callback runs after this returns. Calling it again is a no-op.
    pub async fn close(&self) {
        self.cancel.cancel();

        // Hold the lock across the join so a concurrent caller also waits
        let mut task = self.task.lock().await;
        if let Some(handle) = task.take() {
            if let Err(e) = handle.await {
                error!(client = %self.client_id, error = %e, "Listener task failed");
            }
        }
    }
}

impl ClientSink for ConnectionListener {
    fn deliver(&self, message: &Message) -> Result<()> {
        self.send(message.clone())
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(ConnectionListener::close(self))
    }
}

enum Event {
    Stop,
    Outbound(Option<Message>),
    Read(Result<usize>),
}

async fn run<S>(
    client: ClientId,
    mut framed: FramedConnection<S>,
    handler: Arc<dyn ListenerHandler>,
    mut outbound: mpsc::Receiver<Message>,
    cancel: CancellationToken,
    started: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let metrics = global_metrics();
    metrics.connection_opened();

    let mut running = tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = started.cancelled() => true,
    };
    if running {
        debug!("Listener started");
    }

    let mut outbound_open = true;

    while running {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => Event::Stop,
            next = outbound.recv(), if outbound_open => Event::Outbound(next),
            read = framed.read() => Event::Read(read),
        };

        match event {
            Event::Stop => {
                debug!("Stop requested");
                running = false;
            }
            Event::Outbound(None) => {
                // Every handle is gone; keep serving reads
                outbound_open = false;
            }
            Event::Outbound(Some(message)) => {
                // A peer that stops reading can stall the write indefinitely
                let written = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    written = write_message(&mut framed, &message) => Some(written),
                };
                match written {
                    None => {
                        debug!("Stop requested during write");
                        running = false;
                    }
                    Some(Err(e)) => {
                        notify(&*handler, client, Notice::ReadError(&e)).await;
                        running = false;
                    }
                    Some(Ok(())) => {}
                }
            }
            Event::Read(Ok(received)) => {
                trace!(received, buffered = framed.buffered().len(), "Offering buffered bytes");
                let data = framed.buffered();
                let offered = fault::guard(async { handler.on_read_data(client, data).await }).await;
                match offered {
                    Ok(outcome) => {
                        framed.discard(outcome.consumed);
                        if !outcome.keep_alive {
                            debug!("Handler closed the connection");
                            running = false;
                        }
                    }
                    Err(panic) => {
                        warn!(
                            error = %panic,
                            discarded = framed.buffered().len(),
                            "Read callback panicked, discarding offered bytes"
                        );
                        framed.clear();
                        report_panic(&*handler, client, &panic).await;
                    }
                }
            }
            Event::Read(Err(ProtocolError::Timeout)) => {
                running = !cancel.is_cancelled();
            }
            Event::Read(Err(ProtocolError::ConnectionClosed)) => {
                notify(&*handler, client, Notice::Disconnected).await;
                running = false;
            }
            Event::Read(Err(e)) => {
                notify(&*handler, client, Notice::ReadError(&e)).await;
                running = false;
            }
        }
    }

    if let Err(e) = framed.close().await {
        trace!(error = %e, "Shutdown after listener exit failed");
    }
    metrics.connection_closed();
    info!("Listener stopped");
}

async fn write_message<S>(framed: &mut FramedConnection<S>, message: &Message) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let bytes = codec::encode(message)?;
    let written = framed.write(&bytes).await?;
    global_metrics().message_sent(written as u64);
    trace!(kind = %message.message_type(), written, "Message written");
    Ok(())
}

enum Notice<'a> {
    Disconnected,
    ReadError(&'a ProtocolError),
}

async fn notify(handler: &dyn ListenerHandler, client: ClientId, notice: Notice<'_>) {
    let result = match notice {
        Notice::Disconnected => fault::guard(async { handler.on_disconnect(client).await }).await,
        Notice::ReadError(e) => {
            fault::guard(async { handler.on_read_error(client, e).await }).await
        }
    };
    if let Err(panic) = result {
        report_panic(handler, client, &panic).await;
    }
}

async fn report_panic(handler: &dyn ListenerHandler, client: ClientId, panic: &ProtocolError) {
    if let Err(nested) = fault::guard(async { handler.on_panic(client, panic).await }).await {
        error!(error = %nested, "Panic callback panicked");
    }
}
