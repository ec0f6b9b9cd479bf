//! Kafka producer for outbox event shipping.

use rdkafka::{
    config::ClientConfig,
    producer::{FutureProducer, FutureRecord},
};
use std::time::Duration;
use thiserror::Error;

use crate::config::KafkaConfig;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

#[derive(Clone)]
pub struct EventPublisher {
    producer: FutureProducer,
    topic: String,
}

impl EventPublisher {
    pub fn connect(config: &KafkaConfig) -> Result<Self, BusError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self {
            producer,
            topic: config.topic.clone(),
        })
    }

    /// Append one record to the bus. Keyed so records for the same aggregate
    /// land on the same partition.
    pub async fn publish(&self, key: &str, payload: &str) -> Result<(), BusError> {
        let record = FutureRecord::to(&self.topic).key(key).payload(payload);

        match self.producer.send(record, Duration::from_secs(0)).await {
            Ok(_) => Ok(()),
            Err((e, _)) => Err(BusError::Kafka(e)),
        }
    }
}
