use std::time::Duration;

use uuid::Uuid;

use boxoffice_events::{Event, EventBus, EventEnvelope};

use crate::error::ServiceError;
use crate::timeout::bus_call;

/// Wrap, encode and publish one event. Returns the envelope's event id.
pub(crate) async fn publish_event<E: Event>(bus: &dyn EventBus, timeout: Duration, event: E) -> Result<Uuid, ServiceError> {
    let envelope = EventEnvelope::wrap(event);
    let event_id = envelope.event_id();
    let raw = envelope.to_raw()?;
    bus_call(timeout, bus.publish(raw)).await?;
    Ok(event_id)
}
