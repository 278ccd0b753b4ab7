//! Per-session registry of in-flight correlated operations.
//!
//! Mutations register a one-shot waiter before their request is written;
//! subscriptions are tracked so the receive loop can tell their traffic
//! apart from stray ids. The operation sender inserts and the receive loop
//! resolves, so both sides go through the same lock.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::value::RawValue;
use tokio::sync::oneshot;

use crate::protocol::{Envelope, MessageType, OperationId};

/// Outcome delivered to a mutation waiter: the captured `next` payload
/// (`None` when the server completed without one), or the server's error
/// message.
pub type MutationReply = Result<Option<Box<RawValue>>, String>;

/// Why [`WaiterRegistry::register`] turned a waiter away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refused {
    /// The registry is closed; the session has ended.
    Closed,
    /// A pending mutation or tracked subscription already holds the id.
    InUse,
}

/// Where the receive loop's envelope ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Consumed by a pending mutation.
    Mutation,
    /// Belongs to the tracked subscription with this label.
    Subscription(String),
    /// No consumer registered for the id.
    Unclaimed,
}

#[derive(Debug)]
struct Waiter {
    captured: Option<Box<RawValue>>,
    reply: oneshot::Sender<MutationReply>,
}

#[derive(Debug, Default)]
struct RegistryState {
    waiters: HashMap<OperationId, Waiter>,
    subscriptions: HashMap<OperationId, String>,
    closed: bool,
}

/// Registry of `id → consumer` for one session.
#[derive(Debug, Default)]
pub struct WaiterRegistry {
    state: Mutex<RegistryState>,
}

impl WaiterRegistry {
    /// Creates an empty, open registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a one-shot waiter for a mutation.
    ///
    /// # Errors
    ///
    /// [`Refused::Closed`] once the registry is closed, so no caller can
    /// start waiting on a session that has already ended.
    /// [`Refused::InUse`] if the id already belongs to another operation;
    /// the existing entry is left untouched.
    pub fn register(
        &self,
        id: OperationId,
    ) -> Result<oneshot::Receiver<MutationReply>, Refused> {
        let mut state = self.lock();
        if state.closed {
            return Err(Refused::Closed);
        }
        if state.waiters.contains_key(&id) || state.subscriptions.contains_key(&id) {
            return Err(Refused::InUse);
        }
        let (reply, rx) = oneshot::channel();
        state.waiters.insert(
            id,
            Waiter {
                captured: None,
                reply,
            },
        );
        Ok(rx)
    }

    /// Removes a waiter if it is still registered.
    pub fn deregister(&self, id: &OperationId) {
        self.lock().waiters.remove(id);
    }

    /// Tracks a subscription so its traffic is recognised.
    pub fn track_subscription(&self, id: OperationId, label: &str) {
        let mut state = self.lock();
        if !state.closed {
            state.subscriptions.insert(id, label.to_string());
        }
    }

    /// Delivers an operation-scoped envelope to its consumer.
    ///
    /// A mutation waiter captures the `next` payload and is resolved on
    /// `complete` or `error`. A subscription is dropped from the registry on
    /// `complete` or `error`.
    pub fn route(&self, id: &OperationId, envelope: &Envelope) -> Route {
        let mut state = self.lock();

        if let Some(waiter) = state.waiters.get_mut(id) {
            match envelope.kind {
                MessageType::Next => {
                    if waiter.captured.is_some() {
                        tracing::debug!(op_id = %id, "extra next for mutation; keeping the first");
                    } else {
                        waiter.captured = envelope.payload.clone();
                    }
                }
                MessageType::Complete => {
                    if let Some(waiter) = state.waiters.remove(id) {
                        let _ = waiter.reply.send(Ok(waiter.captured));
                    }
                }
                MessageType::Error => {
                    if let Some(waiter) = state.waiters.remove(id) {
                        let _ = waiter.reply.send(Err(envelope.error_message()));
                    }
                }
                _ => {}
            }
            return Route::Mutation;
        }

        let finished = matches!(envelope.kind, MessageType::Complete | MessageType::Error);
        let label = if finished {
            state.subscriptions.remove(id)
        } else {
            state.subscriptions.get(id).cloned()
        };
        label.map_or(Route::Unclaimed, Route::Subscription)
    }

    /// Closes the registry. Pending waiters are dropped, which their callers
    /// observe as cancellation; later registrations are refused.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.waiters.clear();
        state.subscriptions.clear();
    }

    /// Returns `true` once [`WaiterRegistry::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of mutations waiting for a result.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Number of subscriptions still running.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.lock().subscriptions.len()
    }
}

/// Removes a mutation waiter when the waiting call ends, however it ends.
#[derive(Debug)]
pub struct WaiterGuard<'a> {
    registry: &'a WaiterRegistry,
    id: OperationId,
}

impl<'a> WaiterGuard<'a> {
    /// Guards the waiter registered under `id`.
    #[must_use]
    pub const fn new(registry: &'a WaiterRegistry, id: OperationId) -> Self {
        Self { registry, id }
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.registry.deregister(&self.id);
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::protocol::GraphqlError;

    fn next(id: &OperationId, body: &str) -> Envelope {
        let Ok(raw) = RawValue::from_string(body.to_string()) else {
            panic!("invalid raw json");
        };
        Envelope::next(id.clone(), raw)
    }

    #[tokio::test]
    async fn next_then_complete_resolves_with_payload() {
        let registry = WaiterRegistry::new();
        let id = OperationId::new();
        let Ok(rx) = registry.register(id.clone()) else {
            panic!("registry refused the waiter");
        };

        assert_eq!(registry.route(&id, &next(&id, r#"{"data":1}"#)), Route::Mutation);
        assert_eq!(registry.pending(), 1);
        assert_eq!(registry.route(&id, &Envelope::complete(id.clone())), Route::Mutation);
        assert_eq!(registry.pending(), 0);

        let Ok(Ok(Some(payload))) = rx.await else {
            panic!("expected payload");
        };
        assert_eq!(payload.get(), r#"{"data":1}"#);
    }

    #[tokio::test]
    async fn error_resolves_with_message() {
        let registry = WaiterRegistry::new();
        let id = OperationId::new();
        let Ok(rx) = registry.register(id.clone()) else {
            panic!("registry refused the waiter");
        };
        let Ok(err) = Envelope::error(
            id.clone(),
            &[GraphqlError {
                message: "denied".to_string(),
            }],
        ) else {
            panic!("encode failed");
        };
        registry.route(&id, &err);

        let Ok(Err(message)) = rx.await else {
            panic!("expected error reply");
        };
        assert_eq!(message, "denied");
    }

    #[tokio::test]
    async fn complete_without_next_resolves_empty() {
        let registry = WaiterRegistry::new();
        let id = OperationId::new();
        let Ok(rx) = registry.register(id.clone()) else {
            panic!("registry refused the waiter");
        };
        registry.route(&id, &Envelope::complete(id.clone()));
        let Ok(Ok(None)) = rx.await else {
            panic!("expected an empty reply");
        };
        assert_eq!(registry.pending(), 0);
    }

    #[tokio::test]
    async fn taken_id_is_refused_and_first_waiter_survives() {
        let registry = WaiterRegistry::new();
        let id = OperationId::from("op-a");
        let Ok(rx) = registry.register(id.clone()) else {
            panic!("registry refused the waiter");
        };

        assert_eq!(registry.register(id.clone()).err(), Some(Refused::InUse));
        assert_eq!(registry.pending(), 1);

        registry.route(&id, &next(&id, r#"{"data":"first"}"#));
        registry.route(&id, &Envelope::complete(id.clone()));
        let Ok(Ok(Some(payload))) = rx.await else {
            panic!("first waiter must still get its reply");
        };
        assert_eq!(payload.get(), r#"{"data":"first"}"#);

        let sub = OperationId::from("sub-1");
        registry.track_subscription(sub.clone(), "createdTags");
        assert_eq!(registry.register(sub).err(), Some(Refused::InUse));
    }

    #[tokio::test]
    async fn close_cancels_waiters_and_refuses_new_ones() {
        let registry = WaiterRegistry::new();
        let Ok(rx) = registry.register(OperationId::new()) else {
            panic!("registry refused the waiter");
        };
        registry.close();
        assert!(rx.await.is_err());
        assert_eq!(
            registry.register(OperationId::new()).err(),
            Some(Refused::Closed)
        );
        assert!(registry.is_closed());
    }

    #[test]
    fn subscription_is_removed_on_complete() {
        let registry = WaiterRegistry::new();
        let id = OperationId::new();
        registry.track_subscription(id.clone(), "createdTags");

        assert_eq!(
            registry.route(&id, &next(&id, "{}")),
            Route::Subscription("createdTags".to_string())
        );
        assert_eq!(registry.active_subscriptions(), 1);
        assert_eq!(
            registry.route(&id, &Envelope::complete(id.clone())),
            Route::Subscription("createdTags".to_string())
        );
        assert_eq!(registry.active_subscriptions(), 0);
        assert_eq!(registry.route(&id, &Envelope::complete(id.clone())), Route::Unclaimed);
    }

    #[test]
    fn guard_deregisters_on_drop() {
        let registry = WaiterRegistry::new();
        let id = OperationId::new();
        let _rx = registry.register(id.clone());
        {
            let _guard = WaiterGuard::new(&registry, id);
            assert_eq!(registry.pending(), 1);
        }
        assert_eq!(registry.pending(), 0);
    }
}
