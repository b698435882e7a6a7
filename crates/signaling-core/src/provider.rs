//! Fan-out of session events to subscribed handlers
//!
//! The provider is the session's single [`EventSink`]. For every event it
//! snapshots the subscriber set and delivers to all subscribers
//! concurrently, waiting for every delivery before the session hands it
//! the next event. That keeps each handler's stream in emission order while
//! a slow or failing handler cannot starve its siblings of the current
//! event.
//!
//! A handler unsubscribed while an event is in flight may still see that
//! event, but never a later one.
//!
//! A callback that never completes holds up every later event for all
//! subscribers. With a handler timeout set, such a delivery is cancelled
//! after the timeout and logged, and the remaining deliveries proceed.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::RwLock;
use tracing::{debug, error, trace, warn};

use crate::error::{SignalingError, SignalingResult};
use crate::events::{HandlerId, SignalingEvent, SignalingHandler};
use crate::session::{EventSink, SignalingSession};

#[derive(Clone)]
struct Subscription {
    id: HandlerId,
    handler: Arc<dyn SignalingHandler>,
    active: Arc<AtomicBool>,
}

impl Subscription {
    async fn deliver(self, event: SignalingEvent, limit: Option<Duration>) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        let kind = event.kind();
        let callback = AssertUnwindSafe(self.handler.on_signaling_event(event)).catch_unwind();
        let outcome = match limit {
            Some(limit) => match tokio::time::timeout(limit, callback).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        handler = %self.id,
                        name = self.handler.name(),
                        event = kind,
                        timeout_ms = limit.as_millis() as u64,
                        "Handler timed out processing signaling event"
                    );
                    return;
                }
            },
            None => callback.await,
        };
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(
                    handler = %self.id,
                    name = self.handler.name(),
                    event = kind,
                    error = %e,
                    "Handler failed to process signaling event"
                );
            }
            Err(_) => {
                error!(
                    handler = %self.id,
                    name = self.handler.name(),
                    event = kind,
                    "Handler panicked while processing signaling event"
                );
            }
        }
    }
}

pub struct SignalingEventProvider {
    session: Weak<SignalingSession>,
    subscriptions: RwLock<Vec<Subscription>>,
    handler_timeout: Option<Duration>,
    closed: AtomicBool,
}

impl SignalingEventProvider {
    /// Create a provider bound to `session`
    ///
    /// Delivery starts once the provider is attached with
    /// [`SignalingSession::attach`].
    pub fn new(session: &Arc<SignalingSession>) -> Arc<Self> {
        Self::with_handler_timeout(session, None)
    }

    /// Like [`new`](Self::new), cancelling any single callback that runs
    /// longer than `handler_timeout`
    pub fn with_handler_timeout(
        session: &Arc<SignalingSession>,
        handler_timeout: Option<Duration>,
    ) -> Arc<Self> {
        Arc::new(Self {
            session: Arc::downgrade(session),
            subscriptions: RwLock::new(Vec::new()),
            handler_timeout,
            closed: AtomicBool::new(false),
        })
    }

    /// Bind `handler` to the session and add it to the delivery set
    ///
    /// Subscribing an already subscribed handler is a no-op.
    pub fn subscribe(&self, handler: Arc<dyn SignalingHandler>) -> SignalingResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SignalingError::invalid_state("Event provider is closed"));
        }
        let session = self
            .session
            .upgrade()
            .filter(|session| !session.is_disposed())
            .ok_or_else(|| SignalingError::invalid_state("Signaling session is no longer active"))?;

        let id = HandlerId::of(&handler);
        if self.is_subscribed_id(id) {
            return Ok(());
        }

        handler.bind(Some(session));
        let mut subscriptions = self.subscriptions.write();
        if !subscriptions.iter().any(|sub| sub.id == id) {
            subscriptions.push(Subscription {
                id,
                handler,
                active: Arc::new(AtomicBool::new(true)),
            });
            debug!(handler = %id, subscribers = subscriptions.len(), "Handler subscribed");
        }
        Ok(())
    }

    /// Remove `handler` from the delivery set and clear its session
    ///
    /// Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, handler: &Arc<dyn SignalingHandler>) -> bool {
        let id = HandlerId::of(handler);
        let removed = {
            let mut subscriptions = self.subscriptions.write();
            subscriptions
                .iter()
                .position(|sub| sub.id == id)
                .map(|pos| subscriptions.remove(pos))
        };

        match removed {
            Some(subscription) => {
                subscription.active.store(false, Ordering::Release);
                subscription.handler.bind(None);
                debug!(handler = %id, "Handler unsubscribed");
                true
            }
            None => false,
        }
    }

    pub fn is_subscribed(&self, handler: &Arc<dyn SignalingHandler>) -> bool {
        self.is_subscribed_id(HandlerId::of(handler))
    }

    fn is_subscribed_id(&self, id: HandlerId) -> bool {
        self.subscriptions.read().iter().any(|sub| sub.id == id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Unsubscribe everyone and refuse further subscriptions
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let subscriptions = std::mem::take(&mut *self.subscriptions.write());
        for subscription in &subscriptions {
            subscription.active.store(false, Ordering::Release);
        }
        for subscription in subscriptions {
            subscription.handler.bind(None);
        }
        debug!("Event provider closed");
    }
}

#[async_trait]
impl EventSink for SignalingEventProvider {
    async fn publish(&self, event: SignalingEvent) {
        let snapshot: Vec<Subscription> = self.subscriptions.read().clone();
        if snapshot.is_empty() {
            trace!(event = event.kind(), "No subscribers for signaling event");
            return;
        }

        trace!(event = event.kind(), subscribers = snapshot.len(), "Delivering signaling event");
        let deliveries = snapshot
            .into_iter()
            .map(|subscription| subscription.deliver(event.clone(), self.handler_timeout));
        join_all(deliveries).await;
    }
}

impl fmt::Debug for SignalingEventProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalingEventProvider")
            .field("subscribers", &self.subscriber_count())
            .field("handler_timeout", &self.handler_timeout)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}
