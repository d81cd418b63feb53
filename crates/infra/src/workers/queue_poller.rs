use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use watchstore_events::{
    DispatchError, DispatchOutcome, EventDispatcher, QueueClient, QueueError, QueueMessage,
    ReceiveOptions,
};

/// Pause after a failed receive before polling again.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Deliveries allowed before a message is dead-lettered when only a
/// dead-letter queue is configured.
pub const DEFAULT_MAX_RECEIVE_COUNT: u32 = 5;

/// Where a message goes once it has been delivered too often.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterPolicy {
    /// Deliveries allowed; the next one is forwarded instead of dispatched.
    pub max_receive_count: u32,
    /// Dead-letter queue address.
    pub queue: String,
}

impl DeadLetterPolicy {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            max_receive_count: DEFAULT_MAX_RECEIVE_COUNT,
            queue: queue.into(),
        }
    }

    pub fn with_max_receive_count(mut self, max_receive_count: u32) -> Self {
        self.max_receive_count = max_receive_count;
        self
    }

    fn exceeded_by(&self, message: &QueueMessage) -> bool {
        message.receive_count > self.max_receive_count
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePollerConfig {
    /// Used in logs only.
    pub name: String,
    pub queue: String,
    pub receive: ReceiveOptions,
    pub retry_delay: Duration,
    /// `None` retries a failing message for as long as the queue redelivers it.
    pub dead_letter: Option<DeadLetterPolicy>,
}

impl QueuePollerConfig {
    pub fn new(name: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: queue.into(),
            receive: ReceiveOptions::default(),
            retry_delay: DEFAULT_RETRY_DELAY,
            dead_letter: None,
        }
    }

    pub fn with_receive_options(mut self, receive: ReceiveOptions) -> Self {
        self.receive = receive;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_dead_letter(mut self, policy: DeadLetterPolicy) -> Self {
        self.dead_letter = Some(policy);
        self
    }
}

/// Counters for one processed batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollStats {
    pub received: usize,
    pub handled: usize,
    pub ignored: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

/// Handle to stop a spawned poller.
#[derive(Debug)]
pub struct PollerHandle {
    name: String,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl PollerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the loop and wait for it to exit.
    ///
    /// A pending receive is abandoned; a batch being dispatched is finished first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.join.await {
            error!(poller = %self.name, error = %err, "queue poller task failed");
        }
    }
}

/// Consumes one queue: receive a batch, dispatch each message in order,
/// delete what was handled, receive again.
///
/// There is no timer. The next receive starts only after the previous batch
/// is done, so polls against one queue never overlap. A message whose
/// dispatch fails is left in place and comes back after the queue's
/// visibility timeout.
pub struct QueuePoller {
    client: Arc<dyn QueueClient>,
    dispatcher: Arc<EventDispatcher>,
    config: QueuePollerConfig,
}

impl core::fmt::Debug for QueuePoller {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QueuePoller")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl QueuePoller {
    pub fn new(
        client: Arc<dyn QueueClient>,
        dispatcher: Arc<EventDispatcher>,
        config: QueuePollerConfig,
    ) -> Self {
        Self {
            client,
            dispatcher,
            config,
        }
    }

    /// One receive followed by processing of whatever arrived.
    pub async fn run_once(&self) -> Result<PollStats, QueueError> {
        let messages = self.receive().await?;
        Ok(self.process_batch(messages).await)
    }

    /// Process messages one at a time, in the order given.
    pub async fn process_batch(&self, messages: Vec<QueueMessage>) -> PollStats {
        let mut stats = PollStats {
            received: messages.len(),
            ..PollStats::default()
        };
        for message in &messages {
            self.process(message, &mut stats).await;
        }
        stats
    }

    /// Run the loop on a tokio task until the handle shuts it down (or is dropped).
    pub fn spawn(self) -> PollerHandle {
        let (shutdown, rx) = watch::channel(false);
        let name = self.config.name.clone();
        let join = tokio::spawn(self.run(rx));
        PollerHandle {
            name,
            shutdown,
            join,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let name = self.config.name.as_str();
        let queue = self.config.queue.as_str();
        info!(poller = name, queue, "queue poller started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let received = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                received = self.receive() => received,
            };

            match received {
                Ok(messages) => {
                    let stats = self.process_batch(messages).await;
                    if stats.received > 0 {
                        debug!(
                            poller = name,
                            queue,
                            received = stats.received,
                            handled = stats.handled,
                            ignored = stats.ignored,
                            failed = stats.failed,
                            dead_lettered = stats.dead_lettered,
                            "batch processed"
                        );
                    }
                }
                Err(err) => {
                    error!(
                        poller = name,
                        queue,
                        error = %err,
                        retry_in_ms = self.config.retry_delay.as_millis() as u64,
                        "failed to receive messages"
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(self.config.retry_delay) => {}
                    }
                }
            }
        }

        info!(poller = name, queue, "queue poller stopped");
    }

    async fn receive(&self) -> Result<Vec<QueueMessage>, QueueError> {
        self.client
            .receive(&self.config.queue, self.config.receive)
            .await
    }

    async fn process(&self, message: &QueueMessage, stats: &mut PollStats) {
        let queue = self.config.queue.as_str();

        if let Some(policy) = self
            .config
            .dead_letter
            .as_ref()
            .filter(|p| p.exceeded_by(message))
        {
            self.dead_letter(message, policy, stats).await;
            return;
        }

        match self.dispatcher.dispatch(&message.body).await {
            Ok(outcome) => {
                match &outcome {
                    DispatchOutcome::Handled(_) => stats.handled += 1,
                    DispatchOutcome::Ignored { .. } => stats.ignored += 1,
                }
                self.delete(message).await;
            }
            Err(err) => {
                stats.failed += 1;
                let action = err.action().map(|a| a.as_str()).unwrap_or("unknown");
                match &err {
                    DispatchError::Malformed { .. } => error!(
                        queue,
                        message_id = %message.message_id,
                        action,
                        receive_count = message.receive_count,
                        error = %err,
                        "malformed message left on queue"
                    ),
                    DispatchError::Handler { .. } => error!(
                        queue,
                        message_id = %message.message_id,
                        action,
                        receive_count = message.receive_count,
                        error = %err,
                        "message handling failed; it will be redelivered"
                    ),
                }
            }
        }
    }

    async fn dead_letter(
        &self,
        message: &QueueMessage,
        policy: &DeadLetterPolicy,
        stats: &mut PollStats,
    ) {
        let queue = self.config.queue.as_str();

        match self.client.send(&policy.queue, message.body.clone()).await {
            Ok(dead_letter_id) => {
                warn!(
                    queue,
                    dead_letter_queue = %policy.queue,
                    message_id = %message.message_id,
                    dead_letter_id = %dead_letter_id,
                    receive_count = message.receive_count,
                    "message moved to dead-letter queue"
                );
                stats.dead_lettered += 1;
                self.delete(message).await;
            }
            Err(err) => {
                stats.failed += 1;
                error!(
                    queue,
                    dead_letter_queue = %policy.queue,
                    message_id = %message.message_id,
                    error = %err,
                    "failed to dead-letter message"
                );
            }
        }
    }

    async fn delete(&self, message: &QueueMessage) {
        if let Err(err) = self
            .client
            .delete(&self.config.queue, &message.receipt_handle)
            .await
        {
            // The message will be delivered again and handled a second time.
            error!(
                queue = %self.config.queue,
                message_id = %message.message_id,
                error = %err,
                "failed to delete handled message"
            );
        }
    }
}
