//! In-memory event bus for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::bus::{Acknowledger, BusError, Delivery, EventBus, Subscription};
use crate::{RawEnvelope, Subject};

/// Redelivery cap before a message is dropped with a warning.
const DEFAULT_MAX_ATTEMPTS: u32 = 10;

#[derive(Default)]
struct Group {
    members: Vec<mpsc::UnboundedSender<Delivery>>,
    next: usize,
    /// Messages published while the group had no live member.
    backlog: VecDeque<(RawEnvelope, u32)>,
}

struct Shared {
    groups: Mutex<HashMap<Subject, HashMap<String, Group>>>,
    max_attempts: u32,
}

/// In-memory queue-group bus.
///
/// - Every group subscribed to a subject gets each event once, round-robin
///   across its members.
/// - Nacked or dropped deliveries are redelivered (up to a cap).
/// - Events published to a subject nobody has subscribed to are discarded.
#[derive(Clone)]
pub struct InMemoryEventBus {
    shared: Arc<Shared>,
}

impl core::fmt::Debug for InMemoryEventBus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryEventBus")
            .field("max_attempts", &self.shared.max_attempts)
            .finish_non_exhaustive()
    }
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::with_max_attempts(DEFAULT_MAX_ATTEMPTS)
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            shared: Arc::new(Shared {
                groups: Mutex::new(HashMap::new()),
                max_attempts: max_attempts.max(1),
            }),
        }
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Shared {
    fn deliver(self: &Arc<Self>, group_name: &str, envelope: RawEnvelope, attempt: u32) -> Result<(), BusError> {
        let mut groups = self.groups.lock().map_err(|_| BusError::Closed)?;
        if let Some(group) = groups
            .get_mut(&envelope.subject())
            .and_then(|by_name| by_name.get_mut(group_name))
        {
            self.offer(group_name, group, envelope, attempt);
        }
        Ok(())
    }

    /// Hand the envelope to the next live member, pruning closed ones.
    fn offer(self: &Arc<Self>, group_name: &str, group: &mut Group, envelope: RawEnvelope, attempt: u32) {
        loop {
            if group.members.is_empty() {
                group.backlog.push_back((envelope, attempt));
                return;
            }

            let idx = group.next % group.members.len();
            group.next = group.next.wrapping_add(1);

            let acker = InMemoryAcker {
                shared: Arc::downgrade(self),
                group: group_name.to_string(),
                envelope: envelope.clone(),
                attempt,
            };
            let delivery = Delivery::new(envelope.clone(), attempt, Box::new(acker));

            match group.members[idx].send(delivery) {
                Ok(()) => return,
                Err(mpsc::error::SendError(undelivered)) => {
                    // Disarm first: dropping an armed delivery would re-enter this lock.
                    undelivered.disarm();
                    group.members.remove(idx);
                }
            }
        }
    }
}

struct InMemoryAcker {
    shared: Weak<Shared>,
    group: String,
    envelope: RawEnvelope,
    attempt: u32,
}

impl InMemoryAcker {
    fn redeliver(&self) -> Result<(), BusError> {
        let Some(shared) = self.shared.upgrade() else {
            return Err(BusError::Closed);
        };

        if self.attempt >= shared.max_attempts {
            warn!(
                event_id = %self.envelope.event_id(),
                subject = %self.envelope.subject(),
                group = %self.group,
                attempts = self.attempt,
                "dropping message after max delivery attempts"
            );
            return Ok(());
        }

        shared.deliver(&self.group, self.envelope.clone(), self.attempt + 1)
    }
}

#[async_trait]
impl Acknowledger for InMemoryAcker {
    async fn ack(&self) -> Result<(), BusError> {
        Ok(())
    }

    async fn nack(&self) -> Result<(), BusError> {
        self.redeliver()
    }

    fn abandon(&self) {
        let _ = self.redeliver();
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, envelope: RawEnvelope) -> Result<(), BusError> {
        let mut groups = self.shared.groups.lock().map_err(|_| BusError::Closed)?;
        if let Some(by_name) = groups.get_mut(&envelope.subject()) {
            for (name, group) in by_name.iter_mut() {
                self.shared.offer(name, group, envelope.clone(), 1);
            }
        }
        Ok(())
    }

    async fn subscribe_queue_group(&self, subject: Subject, group: &str) -> Result<Subscription, BusError> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut groups = self.shared.groups.lock().map_err(|_| BusError::Closed)?;
        let entry = groups.entry(subject).or_default().entry(group.to_string()).or_default();
        entry.members.push(tx);

        let backlog: Vec<_> = entry.backlog.drain(..).collect();
        for (envelope, attempt) in backlog {
            self.shared.offer(group, entry, envelope, attempt);
        }

        Ok(Subscription::new(subject, group, rx))
    }
}
