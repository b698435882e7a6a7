//! Live signaling session
//!
//! A [`SignalingSession`] exists between a successful run and the matching
//! stop. It owns the transport for its whole lifetime:
//!
//! ```text
//!  Signaling transport ──events──► pump task ──► EventSink (event provider)
//!        ▲                            │
//!        │                            └─ answer / peer-left clear pending offers
//!        │
//!  handlers ── open/close/offer/answer/candidate ──┐
//!                                                  ▼
//!                                    pending offers ◄── resend every interval
//! ```
//!
//! Offers stay pending until an answer (or peer-left) arrives for their
//! connection and are resent on the injected [`Scheduler`] meanwhile.
//!
//! When the transport's event stream ends before disposal the pump reports
//! an [`SignalingEvent::Error`] and restarts the transport under the same
//! [`RetryConfig`] used to open it. Pending offers survive the reconnect.
//!
//! After [`dispose`](SignalingSession::dispose) every operation fails with
//! `InvalidState`.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::error::{SignalingError, SignalingResult};
use crate::events::{CandidateMessage, SdpMessage, SignalingEvent};
use crate::recovery::{retry_with_backoff, with_timeout, RetryConfig};
use crate::scheduler::{PeriodicTask, ScheduledTask, Scheduler};
use crate::transport::Signaling;

/// Upper bound on how long disposal waits for the transport to close
const TRANSPORT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// The single delivery point a session publishes inbound events to
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: SignalingEvent);
}

#[derive(Debug, Clone)]
struct PendingOffer {
    offer: SdpMessage,
    last_sent: Instant,
}

type PendingOffers = Arc<DashMap<String, PendingOffer>>;

pub struct SignalingSession {
    config: SessionConfig,
    transport: Arc<dyn Signaling>,
    pending_offers: PendingOffers,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SignalingEvent>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    resend: Mutex<Option<ScheduledTask>>,
    retry: RetryConfig,
    connected: Arc<AtomicBool>,
    disposed: Arc<AtomicBool>,
}

impl SignalingSession {
    /// Start `transport` under the `retry` policy and schedule offer resends
    ///
    /// Inbound events are buffered until a sink is attached.
    pub async fn open(
        config: SessionConfig,
        transport: Arc<dyn Signaling>,
        scheduler: Arc<dyn Scheduler>,
        retry: &RetryConfig,
    ) -> SignalingResult<Arc<Self>> {
        let url = transport.url();
        info!(url = %url, "Starting signaling transport");
        let events_rx = connect(transport.as_ref(), retry, "signaling.start").await?;

        let session = Arc::new(Self {
            config,
            transport,
            pending_offers: Arc::new(DashMap::new()),
            events_rx: Mutex::new(Some(events_rx)),
            pump: Mutex::new(None),
            resend: Mutex::new(None),
            retry: retry.clone(),
            connected: Arc::new(AtomicBool::new(true)),
            disposed: Arc::new(AtomicBool::new(false)),
        });

        if let Some(period) = session.config.resend_interval() {
            let task = scheduler.schedule_periodic(period, session.resend_task(period));
            *session.resend.lock() = Some(task);
        }

        info!(
            url = %url,
            ice_servers = session.config.ice_servers().len(),
            resend_interval_secs = session.config.resend_interval_secs(),
            "Signaling session opened"
        );
        Ok(session)
    }

    /// Begin delivering inbound events to `sink`
    ///
    /// A session has exactly one delivery point; a second attach fails with
    /// `InvalidState`.
    pub fn attach(&self, sink: Arc<dyn EventSink>) -> SignalingResult<()> {
        self.ensure_active()?;
        let events_rx = self
            .events_rx
            .lock()
            .take()
            .ok_or_else(|| SignalingError::invalid_state("Signaling session already has an event sink"))?;

        let pump = EventPump {
            sink,
            transport: self.transport.clone(),
            retry: self.retry.clone(),
            pending: self.pending_offers.clone(),
            connected: self.connected.clone(),
            disposed: self.disposed.clone(),
        };
        let pump = tokio::spawn(pump.run(events_rx));

        *self.pump.lock() = Some(pump);
        if self.is_disposed() {
            self.abort_pump();
        }
        Ok(())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport_url(&self) -> String {
        self.transport.url()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// `false` while the transport is down and being (or failed to be)
    /// restarted
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.is_disposed()
    }

    /// Offers sent and not yet answered
    pub fn pending_offer_count(&self) -> usize {
        self.pending_offers.len()
    }

    pub async fn open_connection(&self, connection_id: &str) -> SignalingResult<()> {
        self.ensure_active()?;
        self.transport.open_connection(connection_id).await
    }

    pub async fn close_connection(&self, connection_id: &str) -> SignalingResult<()> {
        self.ensure_active()?;
        self.pending_offers.remove(connection_id);
        self.transport.close_connection(connection_id).await
    }

    /// Send an offer and keep resending it until answered
    pub async fn send_offer(&self, connection_id: &str, sdp: &str) -> SignalingResult<()> {
        self.ensure_active()?;
        let offer = SdpMessage {
            connection_id: connection_id.to_string(),
            sdp: sdp.to_string(),
            polite: false,
        };
        // Tracked before sending: the answer may arrive while the send is
        // still in flight
        self.pending_offers.insert(
            connection_id.to_string(),
            PendingOffer {
                offer: offer.clone(),
                last_sent: Instant::now(),
            },
        );
        if let Err(e) = self.transport.send_offer(&offer).await {
            self.pending_offers.remove(connection_id);
            return Err(e);
        }
        Ok(())
    }

    pub async fn send_answer(&self, connection_id: &str, sdp: &str) -> SignalingResult<()> {
        self.ensure_active()?;
        let answer = SdpMessage {
            connection_id: connection_id.to_string(),
            sdp: sdp.to_string(),
            polite: false,
        };
        self.transport.send_answer(&answer).await
    }

    pub async fn send_candidate(&self, candidate: CandidateMessage) -> SignalingResult<()> {
        self.ensure_active()?;
        self.transport.send_candidate(&candidate).await
    }

    /// Tear the session down
    ///
    /// Cancels offer resends, closes the transport and stops event delivery.
    /// Transport close failures are logged, not returned. Calling it again
    /// is a no-op.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(task) = self.resend.lock().take() {
            task.cancel();
        }

        let url = self.transport.url();
        if let Err(e) = with_timeout("signaling.stop", TRANSPORT_STOP_TIMEOUT, self.transport.stop()).await {
            warn!(url = %url, error = %e, "Failed to close signaling transport, continuing disposal");
        }

        self.pending_offers.clear();
        self.events_rx.lock().take();
        // Last, so a dispose issued from inside a delivery runs to completion
        self.abort_pump();
        info!(url = %url, "Signaling session disposed");
    }

    fn ensure_active(&self) -> SignalingResult<()> {
        if self.is_disposed() {
            return Err(SignalingError::invalid_state("Signaling session has been disposed"));
        }
        Ok(())
    }

    fn abort_pump(&self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
    }

    fn resend_task(&self, period: Duration) -> PeriodicTask {
        let pending = self.pending_offers.clone();
        let transport = self.transport.clone();
        Box::new(move || {
            let pending = pending.clone();
            let transport = transport.clone();
            async move { resend_pending_offers(&pending, transport.as_ref(), period).await }.boxed()
        })
    }
}

impl Drop for SignalingSession {
    fn drop(&mut self) {
        self.abort_pump();
    }
}

impl fmt::Debug for SignalingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalingSession")
            .field("url", &self.transport.url())
            .field("config", &self.config)
            .field("pending_offers", &self.pending_offers.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Start `transport` under `retry` on a fresh event channel
async fn connect(
    transport: &dyn Signaling,
    retry: &RetryConfig,
    operation: &str,
) -> SignalingResult<mpsc::UnboundedReceiver<SignalingEvent>> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    retry_with_backoff(operation, retry, || transport.start(events_tx.clone())).await?;
    Ok(events_rx)
}

/// Background task moving inbound events into the sink
struct EventPump {
    sink: Arc<dyn EventSink>,
    transport: Arc<dyn Signaling>,
    retry: RetryConfig,
    pending: PendingOffers,
    connected: Arc<AtomicBool>,
    disposed: Arc<AtomicBool>,
}

impl EventPump {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    async fn run(self, mut events_rx: mpsc::UnboundedReceiver<SignalingEvent>) {
        loop {
            while let Some(event) = events_rx.recv().await {
                if self.is_disposed() {
                    return;
                }
                track_answers(&self.pending, &event);
                self.sink.publish(event).await;
            }
            if self.is_disposed() {
                break;
            }

            match self.reconnect().await {
                Some(next) => events_rx = next,
                None => break,
            }
        }
        debug!("Signaling event stream closed");
    }

    async fn reconnect(&self) -> Option<mpsc::UnboundedReceiver<SignalingEvent>> {
        let url = self.transport.url();
        self.connected.store(false, Ordering::Release);
        warn!(url = %url, "Signaling connection lost, reconnecting");
        self.sink
            .publish(SignalingEvent::Error {
                message: format!("Signaling connection to {} lost", url),
            })
            .await;

        match connect(self.transport.as_ref(), &self.retry, "signaling.reconnect").await {
            Ok(events_rx) => {
                if self.is_disposed() {
                    // Disposal raced the restart; close what was just opened
                    let _ = self.transport.stop().await;
                    return None;
                }
                self.connected.store(true, Ordering::Release);
                info!(url = %url, "Signaling transport reconnected");
                Some(events_rx)
            }
            Err(e) => {
                if self.is_disposed() {
                    return None;
                }
                error!(url = %url, error = %e, "Signaling reconnect failed, session has no connection");
                self.sink
                    .publish(SignalingEvent::Error {
                        message: format!("Reconnect to {} failed: {}", url, e),
                    })
                    .await;
                None
            }
        }
    }
}

fn track_answers(pending: &PendingOffers, event: &SignalingEvent) {
    match event {
        SignalingEvent::Answer(answer) => {
            if pending.remove(&answer.connection_id).is_some() {
                debug!(connection_id = %answer.connection_id, "Offer answered");
            }
        }
        SignalingEvent::PeerLeft { connection_id } => {
            pending.remove(connection_id);
        }
        _ => {}
    }
}

async fn resend_pending_offers(pending: &PendingOffers, transport: &dyn Signaling, interval: Duration) {
    let due: Vec<SdpMessage> = pending
        .iter()
        .filter(|entry| entry.last_sent.elapsed() >= interval)
        .map(|entry| entry.offer.clone())
        .collect();

    for offer in due {
        debug!(connection_id = %offer.connection_id, "Resending unanswered offer");
        match transport.send_offer(&offer).await {
            Ok(()) => {
                if let Some(mut entry) = pending.get_mut(&offer.connection_id) {
                    entry.last_sent = Instant::now();
                }
            }
            Err(e) => {
                warn!(connection_id = %offer.connection_id, error = %e, "Failed to resend offer");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TokioScheduler;
    use crate::transport::MemorySignaling;

    struct ChannelSink(mpsc::UnboundedSender<SignalingEvent>);

    #[async_trait]
    impl EventSink for ChannelSink {
        async fn publish(&self, event: SignalingEvent) {
            let _ = self.0.send(event);
        }
    }

    async fn open_session(
        transport: Arc<MemorySignaling>,
        resend_secs: f64,
    ) -> SignalingResult<Arc<SignalingSession>> {
        let config = SessionConfig::new(vec![], resend_secs).unwrap();
        SignalingSession::open(
            config,
            transport,
            Arc::new(TokioScheduler::current()),
            &RetryConfig::quick(),
        )
        .await
    }

    #[tokio::test]
    async fn test_events_buffered_until_attach() {
        let transport = Arc::new(MemorySignaling::new("ws://memory"));
        let session = open_session(transport.clone(), 0.0).await.unwrap();
        transport.emit(SignalingEvent::PeerJoined {
            connection_id: "c1".to_string(),
            polite: true,
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        session.attach(Arc::new(ChannelSink(tx))).unwrap();

        assert_eq!(rx.recv().await, Some(SignalingEvent::Started));
        assert_eq!(rx.recv().await.unwrap().connection_id(), Some("c1"));
    }

    #[tokio::test]
    async fn test_second_attach_rejected() {
        let transport = Arc::new(MemorySignaling::new("ws://memory"));
        let session = open_session(transport, 0.0).await.unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();

        session.attach(Arc::new(ChannelSink(tx.clone()))).unwrap();
        let err = session.attach(Arc::new(ChannelSink(tx))).unwrap_err();
        assert!(matches!(err, SignalingError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_open_retries_recoverable_start_failures() {
        let transport = Arc::new(MemorySignaling::new("ws://memory"));
        transport.fail_next_starts(2);

        let session = open_session(transport.clone(), 0.0).await;
        assert!(session.is_ok());
        assert_eq!(transport.start_attempts(), 3);
    }

    #[tokio::test]
    async fn test_open_fails_when_retries_exhausted() {
        let transport = Arc::new(MemorySignaling::new("ws://memory"));
        transport.fail_next_starts(10);

        let err = open_session(transport.clone(), 0.0).await.unwrap_err();
        assert!(matches!(err, SignalingError::Transport { .. }));
        assert_eq!(transport.start_attempts(), RetryConfig::quick().max_attempts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_offer_is_resent_until_answered() {
        let transport = Arc::new(MemorySignaling::new("ws://memory"));
        let session = open_session(transport.clone(), 1.0).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.attach(Arc::new(ChannelSink(tx))).unwrap();

        session.send_offer("c1", "v=0 offer").await.unwrap();
        assert_eq!(session.pending_offer_count(), 1);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(transport.offers_sent("c1"), 3, "initial send plus two resends");

        transport.emit(SignalingEvent::Answer(SdpMessage {
            connection_id: "c1".to_string(),
            sdp: "v=0 answer".to_string(),
            polite: false,
        }));
        while rx.recv().await.map(|e| e.kind()) != Some("answer") {}
        assert_eq!(session.pending_offer_count(), 0);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(transport.offers_sent("c1"), 3);
    }

    #[tokio::test]
    async fn test_operations_after_dispose_are_invalid_state() {
        let transport = Arc::new(MemorySignaling::new("ws://memory"));
        let session = open_session(transport.clone(), 5.0).await.unwrap();

        session.dispose().await;
        session.dispose().await;

        assert!(transport.is_stopped());
        assert!(matches!(
            session.send_offer("c1", "v=0").await,
            Err(SignalingError::InvalidState { .. })
        ));
        assert!(matches!(
            session.open_connection("c1").await,
            Err(SignalingError::InvalidState { .. })
        ));
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(session.attach(Arc::new(ChannelSink(tx))).is_err());
    }

    /// Peer that answers before the offer send has returned
    struct AnswersDuringSend {
        inner: MemorySignaling,
    }

    #[async_trait]
    impl Signaling for AnswersDuringSend {
        fn url(&self) -> String {
            self.inner.url()
        }

        async fn start(&self, events: crate::transport::EventSender) -> SignalingResult<()> {
            self.inner.start(events).await
        }

        async fn stop(&self) -> SignalingResult<()> {
            self.inner.stop().await
        }

        async fn open_connection(&self, connection_id: &str) -> SignalingResult<()> {
            self.inner.open_connection(connection_id).await
        }

        async fn close_connection(&self, connection_id: &str) -> SignalingResult<()> {
            self.inner.close_connection(connection_id).await
        }

        async fn send_offer(&self, offer: &SdpMessage) -> SignalingResult<()> {
            self.inner.emit(SignalingEvent::Answer(SdpMessage {
                connection_id: offer.connection_id.clone(),
                sdp: "v=0 answer".to_string(),
                polite: true,
            }));
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.inner.send_offer(offer).await
        }

        async fn send_answer(&self, answer: &SdpMessage) -> SignalingResult<()> {
            self.inner.send_answer(answer).await
        }

        async fn send_candidate(&self, candidate: &CandidateMessage) -> SignalingResult<()> {
            self.inner.send_candidate(candidate).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_arriving_while_offer_in_flight_settles_it() {
        let transport = Arc::new(AnswersDuringSend {
            inner: MemorySignaling::new("ws://memory"),
        });
        let config = SessionConfig::new(vec![], 0.1).unwrap();
        let session = SignalingSession::open(
            config,
            transport.clone(),
            Arc::new(TokioScheduler::current()),
            &RetryConfig::none(),
        )
        .await
        .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.attach(Arc::new(ChannelSink(tx))).unwrap();

        session.send_offer("c1", "v=0 offer").await.unwrap();
        while rx.recv().await.map(|e| e.kind()) != Some("answer") {}
        assert_eq!(session.pending_offer_count(), 0);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(transport.inner.offers_sent("c1"), 1, "answered offer must not be resent");
        session.dispose().await;
    }

    #[tokio::test]
    async fn test_failed_offer_send_leaves_nothing_pending() {
        let transport = Arc::new(MemorySignaling::new("ws://memory"));
        let session = open_session(transport.clone(), 1.0).await.unwrap();
        transport.stop().await.unwrap();

        let err = session.send_offer("c1", "v=0 offer").await.unwrap_err();
        assert!(matches!(err, SignalingError::Transport { .. }));
        assert_eq!(session.pending_offer_count(), 0);
    }

    #[tokio::test]
    async fn test_lost_stream_is_reported_and_reconnected() {
        let transport = Arc::new(MemorySignaling::new("ws://memory"));
        let session = open_session(transport.clone(), 0.0).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.attach(Arc::new(ChannelSink(tx))).unwrap();
        assert_eq!(rx.recv().await, Some(SignalingEvent::Started));
        session.send_offer("c1", "v=0 offer").await.unwrap();

        transport.stop().await.unwrap();

        assert!(matches!(rx.recv().await, Some(SignalingEvent::Error { .. })));
        assert_eq!(rx.recv().await, Some(SignalingEvent::Started));
        assert!(session.is_connected());
        assert_eq!(transport.start_attempts(), 2);
        assert_eq!(session.pending_offer_count(), 1);

        session.dispose().await;
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_dispose_survives_transport_close_failure() {
        let transport = Arc::new(MemorySignaling::new("ws://memory"));
        let session = open_session(transport.clone(), 0.0).await.unwrap();
        transport.fail_stop(true);

        session.dispose().await;
        assert!(session.is_disposed());
        assert!(!transport.is_connected());
    }
}
