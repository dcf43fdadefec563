//! Request-scoped bounds for store and bus calls.
//!
//! Dropping the returned future cancels the inner call, so a caller whose own
//! request is abandoned never leaves work behind.

use std::future::Future;
use std::time::Duration;

use boxoffice_events::BusError;

use crate::store::StoreError;

/// Default bound for a single store or bus call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(3);

pub async fn store_call<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or(Err(StoreError::Timeout))
}

pub async fn bus_call<T, F>(limit: Duration, fut: F) -> Result<T, BusError>
where
    F: Future<Output = Result<T, BusError>>,
{
    tokio::time::timeout(limit, fut).await.unwrap_or(Err(BusError::Timeout))
}
