//! Per-agent inbox with FIFO receive and keyed (correlated) expectations.
//!
//! Workers drain their mailbox in arrival order with [`Mailbox::receive`].
//! The coordinator instead parks a waiter per `(correlation_id, kind,
//! attempt)` with [`Mailbox::expect`]: a delivery matching a parked waiter
//! is handed straight to it, anything else is queued. A waiter never
//! consumes or discards a message that is not its own, so a late reply
//! from an earlier round, or from another case sharing the coordinator
//! mailbox, cannot satisfy it.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{oneshot, Notify};
use tracing::debug;

use crate::message::{CorrelationId, Message, ReplyKey};
use crate::metrics::Metrics;

#[derive(Debug, Clone, thiserror::Error)]
pub enum MailboxError {
    #[error("no message for mailbox '{mailbox}' within {timeout_ms}ms")]
    Timeout { mailbox: String, timeout_ms: u64 },

    #[error("waiter for {key} was replaced by a newer expectation")]
    Superseded { key: String },
}

/// A delivered message plus what the receiver needs to answer it.
#[derive(Debug)]
pub struct Envelope {
    pub message: Message,
    /// Where replies to this message go.
    pub reply_to: Address,
    /// Counters of the case this message belongs to.
    pub metrics: Arc<Metrics>,
}

impl Envelope {
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.message.correlation_id
    }
}

#[derive(Default)]
struct Inner {
    queue: VecDeque<Envelope>,
    waiters: HashMap<ReplyKey, oneshot::Sender<Envelope>>,
}

enum Claim {
    Ready(Envelope),
    Parked(oneshot::Receiver<Envelope>),
}

/// Unbounded, never-dropping inbox owned by one agent.
pub struct Mailbox {
    name: String,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl Mailbox {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A cloneable handle other agents use to send here.
    pub fn address(self: &Arc<Self>) -> Address {
        Address {
            mailbox: Arc::clone(self),
        }
    }

    /// Messages currently queued (parked waiters not included).
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, mut envelope: Envelope) {
        let mut inner = self.lock();
        if let Some(waiter) = inner.waiters.remove(&envelope.message.key()) {
            match waiter.send(envelope) {
                Ok(()) => return,
                // Waiter went away between parking and delivery.
                Err(returned) => envelope = returned,
            }
        }
        inner.queue.push_back(envelope);
        drop(inner);
        self.notify.notify_one();
    }

    /// Dequeue the oldest message, waiting up to `timeout` (forever if `None`).
    ///
    /// A successful receive is counted on the message's own case metrics.
    /// A timeout increments `timeouts_occurred` on `on_timeout`, the metrics
    /// of whichever case the caller was waiting on.
    pub async fn receive(
        &self,
        timeout: Option<Duration>,
        on_timeout: Option<&Metrics>,
    ) -> Result<Envelope, MailboxError> {
        let next = async {
            loop {
                let notified = self.notify.notified();
                let head = self.lock().queue.pop_front();
                if let Some(envelope) = head {
                    return envelope;
                }
                notified.await;
            }
        };

        let envelope = match timeout {
            None => next.await,
            Some(limit) => match tokio::time::timeout(limit, next).await {
                Ok(envelope) => envelope,
                Err(_) => {
                    if let Some(metrics) = on_timeout {
                        metrics.record_timeout();
                    }
                    debug!(mailbox = %self.name, "Receive timed out");
                    return Err(MailboxError::Timeout {
                        mailbox: self.name.clone(),
                        timeout_ms: limit.as_millis() as u64,
                    });
                }
            },
        };
        envelope.metrics.record_received();
        Ok(envelope)
    }

    fn claim_or_park(&self, key: &ReplyKey) -> Claim {
        let mut inner = self.lock();
        let position = inner.queue.iter().position(|e| &e.message.key() == key);
        if let Some(envelope) = position.and_then(|pos| inner.queue.remove(pos)) {
            return Claim::Ready(envelope);
        }
        let (tx, rx) = oneshot::channel();
        inner.waiters.insert(key.clone(), tx);
        Claim::Parked(rx)
    }

    /// Wait for the message matching `key`.
    ///
    /// An already-queued match is claimed immediately. On timeout the waiter
    /// is unregistered, `timeouts_occurred` is incremented once, and
    /// [`MailboxError::Timeout`] is returned.
    pub async fn expect(
        &self,
        key: ReplyKey,
        timeout: Duration,
        metrics: &Metrics,
    ) -> Result<Envelope, MailboxError> {
        let mut rx = match self.claim_or_park(&key) {
            Claim::Ready(envelope) => {
                metrics.record_received();
                return Ok(envelope);
            }
            Claim::Parked(rx) => rx,
        };

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(envelope)) => {
                metrics.record_received();
                Ok(envelope)
            }
            Ok(Err(_)) => Err(MailboxError::Superseded {
                key: key.to_string(),
            }),
            Err(_) => {
                let still_parked = self.lock().waiters.remove(&key).is_some();
                if !still_parked {
                    // Delivered right at the deadline.
                    if let Ok(envelope) = rx.try_recv() {
                        metrics.record_received();
                        return Ok(envelope);
                    }
                }
                metrics.record_timeout();
                debug!(mailbox = %self.name, key = %key, "Expectation timed out");
                Err(MailboxError::Timeout {
                    mailbox: self.name.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Drop every queued message and parked waiter of a finished case.
    ///
    /// Returns the number of queued messages discarded.
    pub fn purge(&self, correlation_id: &CorrelationId) -> usize {
        let mut inner = self.lock();
        let before = inner.queue.len();
        inner
            .queue
            .retain(|e| &e.message.correlation_id != correlation_id);
        inner
            .waiters
            .retain(|key, _| &key.correlation_id != correlation_id);
        before - inner.queue.len()
    }
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("name", &self.name)
            .field("queued", &self.len())
            .finish()
    }
}

/// Sending side of a [`Mailbox`].
#[derive(Clone)]
pub struct Address {
    mailbox: Arc<Mailbox>,
}

impl Address {
    pub fn name(&self) -> &str {
        self.mailbox.name()
    }

    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }

    /// Enqueue `message` at the tail. Never blocks and never drops.
    pub fn send(&self, message: Message, reply_to: &Address, metrics: &Arc<Metrics>) {
        debug!(
            correlation_id = %message.correlation_id,
            kind = %message.kind(),
            attempt = message.attempt,
            from = reply_to.name(),
            to = self.name(),
            "send"
        );
        metrics.record_sent();
        self.mailbox.deliver(Envelope {
            message,
            reply_to: reply_to.clone(),
            metrics: Arc::clone(metrics),
        });
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Address").field(&self.name()).finish()
    }
}
