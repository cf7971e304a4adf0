use crate::core::id::ClientId;
use crate::core::message::Message;
use crate::error::{constants, ProtocolError, Result};
use crate::utils::metrics::global_metrics;
use futures::future::{join_all, BoxFuture};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Outbound side of one client connection.
///
/// `deliver` must not block: it runs on the single processing task while the
/// registry's read lock is held.
pub trait ClientSink: Send + Sync {
    /// Queue `message` for the client.
    fn deliver(&self, message: &Message) -> Result<()>;

    /// Tear down the connection and wait for it to finish.
    fn close(&self) -> BoxFuture<'_, ()>;

    /// Fired once after a forced close by [`ClientRegistry::close`].
    fn disconnected(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

type Entries = HashMap<ClientId, Arc<dyn ClientSink>>;

/// Concurrency-safe map from client identity to its outbound sink.
///
/// Delivery takes the read lock; registration changes take the write lock.
pub struct ClientRegistry {
    entries: RwLock<Entries>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Add a client. Fails with `AlreadyRegistered` if the identity is taken.
    pub fn register(&self, id: ClientId, sink: Arc<dyn ClientSink>) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_REGISTRY_WRITE_LOCK.to_string()))?;

        if entries.contains_key(&id) {
            return Err(ProtocolError::AlreadyRegistered(id));
        }
        entries.insert(id, sink);
        debug!(client = %id, clients = entries.len(), "Client registered");
        Ok(())
    }

    /// Add a client unless `limit` clients are already registered.
    ///
    /// The size check and the insert happen under one write lock, so
    /// concurrent callers can never push the registry past `limit`.
    ///
    /// # Errors
    /// `ConnectionLimitReached` when full, `AlreadyRegistered` if the identity is taken.
    pub fn register_bounded(
        &self,
        id: ClientId,
        sink: Arc<dyn ClientSink>,
        limit: usize,
    ) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_REGISTRY_WRITE_LOCK.to_string()))?;

        if entries.len() >= limit {
            return Err(ProtocolError::ConnectionLimitReached(limit));
        }
        if entries.contains_key(&id) {
            return Err(ProtocolError::AlreadyRegistered(id));
        }
        entries.insert(id, sink);
        debug!(client = %id, clients = entries.len(), limit, "Client registered");
        Ok(())
    }

    /// Remove a client, returning its sink if it was present.
    pub fn unregister(&self, id: ClientId) -> Result<Option<Arc<dyn ClientSink>>> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_REGISTRY_WRITE_LOCK.to_string()))?;

        let removed = entries.remove(&id);
        if removed.is_some() {
            debug!(client = %id, clients = entries.len(), "Client unregistered");
        }
        Ok(removed)
    }

    /// Deliver to every registered client. Returns how many accepted it.
    pub fn broadcast(&self, message: &Message) -> Result<usize> {
        self.fan_out(message, None)
    }

    /// Deliver to every registered client except `excluded`.
    pub fn broadcast_except(&self, excluded: ClientId, message: &Message) -> Result<usize> {
        self.fan_out(message, Some(excluded))
    }

    /// Deliver to one client. Unknown identities are silently ignored.
    ///
    /// Returns whether the client accepted the message.
    pub fn send_to(&self, id: ClientId, message: &Message) -> Result<bool> {
        let entries = self.read()?;
        match entries.get(&id) {
            Some(sink) => Ok(deliver_logged(id, &**sink, message)),
            None => {
                debug!(client = %id, "Dropping message for unknown client");
                Ok(false)
            }
        }
    }

    fn fan_out(&self, message: &Message, excluded: Option<ClientId>) -> Result<usize> {
        let entries = self.read()?;
        let mut delivered = 0;
        for (id, sink) in entries.iter() {
            if Some(*id) == excluded {
                continue;
            }
            if deliver_logged(*id, &**sink, message) {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    pub fn contains(&self, id: ClientId) -> Result<bool> {
        Ok(self.read()?.contains_key(&id))
    }

    /// Number of registered clients.
    pub fn client_count(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    /// Like [`client_count`](Self::client_count) for diagnostics; 0 if the lock is poisoned.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identities currently registered, in no particular order.
    pub fn clients(&self) -> Result<Vec<ClientId>> {
        Ok(self.read()?.keys().copied().collect())
    }

    /// Close every registered client.
    ///
    /// Entries are moved out under the write lock and the lock is released
    /// before any sink is closed, so teardown code may call back into the
    /// registry. All sinks are closed concurrently; returns once every
    /// teardown and disconnect notification has finished.
    pub async fn close(&self) -> Result<()> {
        let drained: Vec<(ClientId, Arc<dyn ClientSink>)> = {
            let mut entries = self.entries.write().map_err(|_| {
                ProtocolError::Custom(constants::ERR_REGISTRY_WRITE_LOCK.to_string())
            })?;
            entries.drain().collect()
        };

        info!(clients = drained.len(), "Closing all registered clients");

        join_all(drained.into_iter().map(|(id, sink)| async move {
            sink.close().await;
            sink.disconnected().await;
            debug!(client = %id, "Client closed");
        }))
        .await;

        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Entries>> {
        self.entries
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_REGISTRY_READ_LOCK.to_string()))
    }
}

#[inline]
fn deliver_logged(id: ClientId, sink: &dyn ClientSink, message: &Message) -> bool {
    match sink.deliver(message) {
        Ok(()) => true,
        Err(e) => {
            global_metrics().delivery_dropped();
            warn!(client = %id, kind = %message.message_type(), error = %e, "Delivery failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        received: Mutex<Vec<Message>>,
        closed: AtomicBool,
    }

    impl ClientSink for RecordingSink {
        fn deliver(&self, message: &Message) -> Result<()> {
            self.received.lock().unwrap().push(message.clone());
            Ok(())
        }

        fn close(&self) -> BoxFuture<'_, ()> {
            Box::pin(async move {
                self.closed.store(true, Ordering::SeqCst);
            })
        }
    }

    fn notice(client: ClientId) -> Message {
        Message::ClientConnected { client }
    }

    #[test]
    fn duplicate_registration_rejected() {
        let registry = ClientRegistry::new();
        let id = ClientId::new();
        registry
            .register(id, Arc::new(RecordingSink::default()))
            .unwrap();

        let err = registry
            .register(id, Arc::new(RecordingSink::default()))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::AlreadyRegistered(dup) if dup == id));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn broadcast_except_skips_origin() {
        let registry = ClientRegistry::new();
        let a = ClientId::new();
        let b = ClientId::new();
        let sink_a = Arc::new(RecordingSink::default());
        let sink_b = Arc::new(RecordingSink::default());
        registry.register(a, sink_a.clone()).unwrap();
        registry.register(b, sink_b.clone()).unwrap();

        assert_eq!(registry.broadcast_except(a, &notice(a)).unwrap(), 1);
        assert!(sink_a.received.lock().unwrap().is_empty());
        assert_eq!(sink_b.received.lock().unwrap().len(), 1);

        assert_eq!(registry.broadcast(&notice(b)).unwrap(), 2);
    }

    #[test]
    fn send_to_unknown_is_noop() {
        let registry = ClientRegistry::new();
        assert!(!registry.send_to(ClientId::new(), &notice(ClientId::new())).unwrap());
    }

    #[tokio::test]
    async fn close_drains_and_closes_sinks() {
        let registry = ClientRegistry::new();
        let sink = Arc::new(RecordingSink::default());
        registry.register(ClientId::new(), sink.clone()).unwrap();

        registry.close().await.unwrap();

        assert!(registry.is_empty());
        assert!(sink.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn bounded_registration_stops_at_limit() {
        let registry = Arc::new(ClientRegistry::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry
                        .register_bounded(ClientId::new(), Arc::new(RecordingSink::default()), 4)
                        .is_ok()
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 4);
        assert_eq!(registry.client_count().unwrap(), 4);
        assert!(matches!(
            registry.register_bounded(ClientId::new(), Arc::new(RecordingSink::default()), 4),
            Err(ProtocolError::ConnectionLimitReached(4))
        ));
    }

    #[test]
    fn poisoned_lock_is_reported() {
        let registry = ClientRegistry::new();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _held = registry.entries.write().unwrap();
            panic!("poison the registry lock");
        }));

        assert!(registry.contains(ClientId::new()).is_err());
        assert!(registry.client_count().is_err());
        assert!(registry
            .register_bounded(ClientId::new(), Arc::new(RecordingSink::default()), 4)
            .is_err());
    }
}
