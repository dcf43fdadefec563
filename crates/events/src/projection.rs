use async_trait::async_trait;

use crate::{Event, EventEnvelope};

/// A projection folds events from another service into a local read model.
///
/// Projections are fed by an at-least-once bus, so they must tolerate:
///
/// - **duplicates**: applying the same event twice leaves the same state
/// - **reordering**: an older event arriving late must not overwrite newer state
///
/// A read model that listens to several event kinds implements this once per kind.
/// Storage is an infrastructure concern; this trait only describes the fold.
#[async_trait]
pub trait Projection<E: Event>: Send + Sync {
    /// What happened to the read model (e.g. applied vs. ignored as stale).
    type Outcome: Send;

    type Error: std::error::Error + Send + Sync + 'static;

    /// Apply a single event to the read model.
    ///
    /// An `Err` means the event was not absorbed and should be redelivered.
    async fn apply(&self, envelope: &EventEnvelope<E>) -> Result<Self::Outcome, Self::Error>;
}
