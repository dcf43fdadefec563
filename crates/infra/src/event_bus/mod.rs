//! Infrastructure-backed event bus implementations.
//!
//! The bus abstraction and the in-memory transport live in `boxoffice-events`.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsEventBus;
