use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Brokers not set: {0}")]
    BrokersNotSet(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid configuration: a message handler is required")]
    MessageHandlerNotSet,

    #[error("Failed to join consumer group: {group}: {reason}")]
    Connection { group: String, reason: String },

    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Consumer error: {0}")]
    Consumer(String),

    #[error("Consumer already closed")]
    AlreadyClosed,

    #[error("Close task ended before reporting a result")]
    CloseInterrupted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
