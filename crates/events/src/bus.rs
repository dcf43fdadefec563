//! Event publishing/subscription abstraction (mechanics only).
//!
//! This module provides the **event bus pattern** both services talk through:
//! the catalog publishes item changes, the reservation service publishes
//! booking lifecycle events, and each consumes the other's subjects.
//!
//! ## Delivery model
//!
//! - **Queue groups**: a subscription names a group; every event on a subject is
//!   handled by exactly one member of each group.
//! - **At-least-once**: a delivery that is not acknowledged is redelivered,
//!   possibly to another member of the group.
//! - **No ordering guarantees**: events may arrive out of order, and duplicates
//!   are expected. Consumers must be idempotent.
//!
//! ## Acknowledgement
//!
//! Every [`Delivery`] must be settled with [`Delivery::ack`] (handled, do not
//! redeliver) or [`Delivery::nack`] (failed, redeliver). A delivery dropped
//! without being settled counts as a nack.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{RawEnvelope, Subject};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("bus connection error: {0}")]
    Connection(String),

    #[error("bus command error: {0}")]
    Command(String),

    #[error("event encoding error: {0}")]
    Codec(String),

    #[error("bus is closed")]
    Closed,

    #[error("bus operation timed out")]
    Timeout,
}

/// Settles a single delivery with the transport that produced it.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Mark the delivery as handled.
    async fn ack(&self) -> Result<(), BusError>;

    /// Mark the delivery as failed; the transport will redeliver it.
    async fn nack(&self) -> Result<(), BusError>;

    /// Called when a delivery is dropped without being settled.
    ///
    /// Transports that redeliver on their own (e.g. pending-entry reclaim) can
    /// leave this as a no-op.
    fn abandon(&self) {}
}

/// A single message handed to one member of a queue group.
pub struct Delivery {
    envelope: RawEnvelope,
    attempt: u32,
    acker: Option<Box<dyn Acknowledger>>,
}

impl core::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Delivery")
            .field("event_id", &self.envelope.event_id())
            .field("subject", &self.envelope.subject())
            .field("attempt", &self.attempt)
            .field("settled", &self.acker.is_none())
            .finish()
    }
}

impl Delivery {
    pub fn new(envelope: RawEnvelope, attempt: u32, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            envelope,
            attempt,
            acker: Some(acker),
        }
    }

    pub fn envelope(&self) -> &RawEnvelope {
        &self.envelope
    }

    pub fn subject(&self) -> Subject {
        self.envelope.subject()
    }

    /// 1-based delivery attempt (greater than 1 means this is a redelivery).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub async fn ack(mut self) -> Result<(), BusError> {
        match self.acker.take() {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }

    pub async fn nack(mut self) -> Result<(), BusError> {
        match self.acker.take() {
            Some(acker) => acker.nack().await,
            None => Ok(()),
        }
    }

    /// Detach the acknowledger without settling (transport-internal use, e.g.
    /// when a delivery could not be handed to a closed consumer).
    pub fn disarm(mut self) -> RawEnvelope {
        self.acker = None;
        self.envelope.clone()
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if let Some(acker) = self.acker.take() {
            acker.abandon();
        }
    }
}

/// Stream of deliveries for one `(subject, group)` membership.
#[derive(Debug)]
pub struct Subscription {
    subject: Subject,
    group: String,
    receiver: mpsc::UnboundedReceiver<Delivery>,
}

impl Subscription {
    pub fn new(subject: Subject, group: impl Into<String>, receiver: mpsc::UnboundedReceiver<Delivery>) -> Self {
        Self {
            subject,
            group: group.into(),
            receiver,
        }
    }

    pub fn subject(&self) -> Subject {
        self.subject
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Wait for the next delivery. `None` means the bus side has shut down.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// Non-blocking poll, mostly useful in tests.
    pub fn try_next(&mut self) -> Option<Delivery> {
        self.receiver.try_recv().ok()
    }
}

/// Transport-agnostic event bus.
///
/// `publish` returns once the transport has accepted the envelope (durably, for
/// persistent transports). It does not wait for consumers.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, envelope: RawEnvelope) -> Result<(), BusError>;

    /// Join `group` on `subject`. Each event is delivered to one member per group.
    async fn subscribe_queue_group(&self, subject: Subject, group: &str) -> Result<Subscription, BusError>;
}

#[async_trait]
impl<B> EventBus for Arc<B>
where
    B: EventBus + ?Sized,
{
    async fn publish(&self, envelope: RawEnvelope) -> Result<(), BusError> {
        (**self).publish(envelope).await
    }

    async fn subscribe_queue_group(&self, subject: Subject, group: &str) -> Result<Subscription, BusError> {
        (**self).subscribe_queue_group(subject, group).await
    }
}
