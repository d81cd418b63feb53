//! Background workers.

pub mod queue_poller;

pub use queue_poller::{
    DEFAULT_MAX_RECEIVE_COUNT, DEFAULT_RETRY_DELAY, DeadLetterPolicy, PollStats, PollerHandle,
    QueuePoller, QueuePollerConfig,
};
