//! Durable event bus contract. `EventBus` is the trait every producer and
//! consumer in this crate programs against; [`memory::MemoryEventBus`]
//! backs the unit and property tests, [`nats::NatsEventBus`] (feature
//! `nats`, default-on) is the production implementation over JetStream.

pub mod memory;
#[cfg(feature = "nats")]
pub mod nats;

pub mod subjects;

use crate::error::BusError;
use crate::types::Seq;
use async_trait::async_trait;
use std::time::Duration;

/// A message fetched off the bus, carrying enough to ack it back.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub message_id: String,
    pub subject: String,
    pub seq: Seq,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy)]
pub struct ConsumeOptions {
    pub max_messages: usize,
    pub timeout: Duration,
}

impl Default for ConsumeOptions {
    fn default() -> Self {
        Self {
            max_messages: 10,
            timeout: Duration::from_secs(5),
        }
    }
}

/// At-least-once publish/consume with named durable consumers, explicit ack,
/// and per-subject filtering.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes `payload` to `subject`, returning a monotonic sequence id.
    async fn publish(&self, subject: &str, payload: serde_json::Value) -> Result<Seq, BusError>;

    /// Idempotently creates a durable, explicit-ack consumer on `stream`
    /// filtered to `subject_filter`, delivering all messages from its first
    /// creation onward.
    async fn ensure_consumer(
        &self,
        stream: &str,
        subject_filter: &str,
        consumer: &str,
    ) -> Result<(), BusError>;

    /// Fetches up to `opts.max_messages`, waiting at most `opts.timeout` for
    /// at least one to arrive.
    async fn fetch(
        &self,
        stream: &str,
        consumer: &str,
        opts: ConsumeOptions,
    ) -> Result<Vec<BusMessage>, BusError>;

    /// Acks a message previously returned by `fetch`. Never acking a message
    /// causes the broker to redeliver it.
    async fn ack(&self, message: &BusMessage) -> Result<(), BusError>;

    /// Returns the number of undelivered + unacked messages pending for
    /// `consumer` on `stream` — the hatchery's lag signal.
    async fn pending(&self, stream: &str, consumer: &str) -> Result<u64, BusError>;

    /// Drains in-flight work and releases the underlying connection.
    async fn close(&self) -> Result<(), BusError>;
}
