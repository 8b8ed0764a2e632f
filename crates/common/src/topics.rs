//! Broker topic names.

/// Topic carrying commands from the orchestrator to the participants.
pub const SAGA_COMMAND_TOPIC: &str = "saga-command-topic";

/// Topic carrying participant replies back to the orchestrator.
pub const SAGA_EVENT_TOPIC: &str = "saga-event-topic";

/// Topic carrying product registrations, keyed by product id.
pub const PRODUCT_TOPIC: &str = "product-topic";

/// Topic drained by the batch consumer.
pub const BATCH_TOPIC: &str = "batch-topic";

/// Suffix appended to a topic name to form its dead-letter topic.
pub const DLT_SUFFIX: &str = ".DLT";

/// Returns the dead-letter topic for `topic`.
pub fn dead_letter_topic(topic: &str) -> String {
    format!("{topic}{DLT_SUFFIX}")
}
