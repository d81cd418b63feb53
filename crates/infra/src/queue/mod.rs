//! Persistent queue clients.
//!
//! The in-memory queue lives in `watchstore-events`; this module holds the
//! implementations that talk to real infrastructure.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsQueue;
