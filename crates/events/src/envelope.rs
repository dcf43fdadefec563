use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::{Event, Subject};

/// Envelope as it travels over the bus: the payload is kept as JSON so the
/// transport never needs to know the concrete event types.
pub type RawEnvelope = EventEnvelope<JsonValue>;

/// Envelope for an event: identity, routing and schema metadata around a payload.
///
/// Notes:
/// - `event_id` is stable across redeliveries, so consumers can log/dedupe on it.
/// - `subject` decides which subscriptions receive the envelope.
/// - `payload` is the event itself; the byte encoding is an implementation detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    subject: Subject,
    schema_version: u32,
    occurred_at: DateTime<Utc>,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        subject: Subject,
        schema_version: u32,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            subject,
            schema_version,
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn subject(&self) -> Subject {
        self.subject
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

impl<E: Event> EventEnvelope<E> {
    /// Wrap a typed event with a fresh event id.
    pub fn wrap(event: E) -> Self {
        Self::new(
            Uuid::now_v7(),
            event.subject(),
            event.version(),
            event.occurred_at(),
            event,
        )
    }

    /// Erase the payload type for transport.
    pub fn to_raw(&self) -> Result<RawEnvelope, serde_json::Error> {
        Ok(EventEnvelope {
            event_id: self.event_id,
            subject: self.subject,
            schema_version: self.schema_version,
            occurred_at: self.occurred_at,
            payload: serde_json::to_value(&self.payload)?,
        })
    }
}

impl RawEnvelope {
    /// Decode the payload into a typed event.
    pub fn decode<E: DeserializeOwned>(&self) -> Result<EventEnvelope<E>, serde_json::Error> {
        Ok(EventEnvelope {
            event_id: self.event_id,
            subject: self.subject,
            schema_version: self.schema_version,
            occurred_at: self.occurred_at,
            payload: E::deserialize(&self.payload)?,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
