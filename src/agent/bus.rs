//! Fan-out of agent events to subscribers and correlation of command
//! acknowledgements.
//!
//! Both structures are shared between the reader task (single producer) and
//! the supervisor's public API. They use `std::sync::Mutex` because no lock
//! is ever held across an `.await`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::agent::protocol::{AgentEvent, AgentEventKind, AgentResponse, InboundMessage};

/// Receiving half of an event subscription.
pub type EventReceiver = mpsc::UnboundedReceiver<AgentEvent>;

struct Subscriber {
    /// `None` subscribes to every kind.
    kind: Option<AgentEventKind>,
    tx: mpsc::UnboundedSender<AgentEvent>,
}

/// Observer registry keyed by [`AgentEventKind`].
///
/// Each subscriber owns an unbounded channel, so a slow consumer never stalls
/// the reader. Events reach every subscriber in the order they were
/// published. Subscribers whose receiver has been dropped are pruned on the
/// next publish.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &lock(&self.subscribers).len())
            .finish()
    }
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one kind of event.
    pub fn subscribe(&self, kind: AgentEventKind) -> EventReceiver {
        self.add(Some(kind))
    }

    /// Subscribe to every event.
    pub fn subscribe_all(&self) -> EventReceiver {
        self.add(None)
    }

    fn add(&self, kind: Option<AgentEventKind>) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.subscribers).push(Subscriber { kind, tx });
        rx
    }

    /// Deliver `event` to every matching live subscriber.
    pub fn publish(&self, event: &AgentEvent) {
        let kind = event.kind();
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|sub| {
            if sub.kind.is_some_and(|k| k != kind) {
                return !sub.tx.is_closed();
            }
            sub.tx.send(event.clone()).is_ok()
        });
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|sub| !sub.tx.is_closed());
        subscribers.len()
    }
}

/// Waiters for command acknowledgements, keyed by command name.
///
/// The agent protocol has no request ID, so a response is handed to the most
/// recently registered, still-waiting caller for the same command name. Two
/// concurrent identical commands therefore cannot be told apart: the second
/// caller receives the first response.
#[derive(Debug, Default)]
pub struct PendingAcks {
    waiters: Mutex<HashMap<String, Vec<oneshot::Sender<AgentResponse>>>>,
}

impl PendingAcks {
    /// Create an empty waiter table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in the next acknowledgement for `command`.
    ///
    /// Waiters whose receiver was dropped (a timed-out or failed send) are
    /// pruned here, so abandoned entries never outlive the next registration.
    pub fn register(&self, command: &str) -> oneshot::Receiver<AgentResponse> {
        let (tx, rx) = oneshot::channel();
        let mut waiters = lock(&self.waiters);
        waiters.retain(|_, stack| {
            stack.retain(|waiter| !waiter.is_closed());
            !stack.is_empty()
        });
        waiters.entry(command.to_owned()).or_default().push(tx);
        rx
    }

    /// Number of waiter slots held for `command`, including abandoned ones
    /// that have not been pruned yet.
    #[must_use]
    pub fn slots(&self, command: &str) -> usize {
        lock(&self.waiters).get(command).map_or(0, Vec::len)
    }

    /// Hand `response` to the most recent live waiter for its command.
    ///
    /// Returns `false` when nobody was waiting.
    pub fn resolve(&self, response: AgentResponse) -> bool {
        let mut waiters = lock(&self.waiters);
        let Some(stack) = waiters.get_mut(&response.command) else {
            return false;
        };

        let mut delivered = false;
        let mut response = Some(response);
        while let Some(tx) = stack.pop() {
            if tx.is_closed() {
                continue;
            }
            if let Some(resp) = response.take() {
                match tx.send(resp) {
                    Ok(()) => {
                        delivered = true;
                        break;
                    }
                    // Receiver dropped between the check and the send.
                    Err(resp) => response = Some(resp),
                }
            }
        }
        waiters.retain(|_, stack| !stack.is_empty());
        delivered
    }

    /// Number of callers still waiting on `command`.
    #[must_use]
    pub fn pending(&self, command: &str) -> usize {
        lock(&self.waiters)
            .get(command)
            .map_or(0, |stack| stack.iter().filter(|tx| !tx.is_closed()).count())
    }

    /// Drop every waiter; their receivers observe a closed channel.
    pub fn clear(&self) {
        lock(&self.waiters).clear();
    }
}

/// Route one parsed line: events to the bus, acknowledgements to waiters.
pub fn route(bus: &EventBus, acks: &PendingAcks, message: InboundMessage) {
    match message {
        InboundMessage::Event(event) => bus.publish(&event),
        InboundMessage::Response(response) => {
            let command = response.command.clone();
            if !acks.resolve(response) {
                debug!(%command, "agent reader: acknowledgement with no waiter, dropping");
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
