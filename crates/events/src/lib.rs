//! Queue-borne events: wire format, transport abstraction, publisher and dispatcher.
//!
//! This crate is mechanics only. Domain crates define payloads; infra
//! provides handlers, persistent queue clients and the polling workers.

pub mod dispatcher;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_queue;
pub mod publisher;
pub mod queue;

pub use dispatcher::{DispatchError, DispatchOutcome, EventDispatcher};
pub use envelope::RawEvent;
pub use event::{Event, EventKind, UnknownEventKind};
pub use handler::EventHandler;
pub use in_memory_queue::InMemoryQueue;
pub use publisher::{EventPublisher, PublishError};
pub use queue::{MessageId, QueueClient, QueueError, QueueMessage, ReceiveOptions};
