//! Production event bus over NATS JetStream. Feature-gated (`nats`,
//! default-on) so the rest of the crate — and its test suite — can build
//! without a NATS client in scope.

use super::{BusMessage, ConsumeOptions, EventBus};
use crate::error::BusError;
use crate::types::Seq;
use async_nats::jetstream::{self, consumer::PullConsumer};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;

/// Wraps a JetStream context. One `NatsEventBus` is shared across the whole
/// process; consumers are created lazily and cached so repeated
/// `ensure_consumer` calls are cheap.
pub struct NatsEventBus {
    context: jetstream::Context,
    consumers: DashMap<(String, String), jetstream::consumer::Consumer<jetstream::consumer::pull::Config>>,
    pending_acks: DashMap<String, jetstream::Message>,
}

impl NatsEventBus {
    pub async fn connect(url: &str, stream: &str) -> Result<Self, BusError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        let context = jetstream::new(client);

        context
            .get_or_create_stream(jetstream::stream::Config {
                name: stream.to_string(),
                subjects: vec!["swarm.>".to_string()],
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;

        Ok(Self {
            context,
            consumers: DashMap::new(),
            pending_acks: DashMap::new(),
        })
    }
}

#[async_trait]
impl EventBus for NatsEventBus {
    async fn publish(&self, subject: &str, payload: serde_json::Value) -> Result<Seq, BusError> {
        let bytes = serde_json::to_vec(&payload)?;
        let ack = self
            .context
            .publish(subject.to_string(), bytes.into())
            .await
            .map_err(|e| BusError::Publish {
                subject: subject.to_string(),
                reason: e.to_string(),
            })?
            .await
            .map_err(|e| BusError::Publish {
                subject: subject.to_string(),
                reason: e.to_string(),
            })?;
        Ok(ack.sequence as Seq)
    }

    async fn ensure_consumer(
        &self,
        stream: &str,
        subject_filter: &str,
        consumer: &str,
    ) -> Result<(), BusError> {
        let key = (stream.to_string(), consumer.to_string());
        if self.consumers.contains_key(&key) {
            return Ok(());
        }

        let jetstream_stream = self
            .context
            .get_stream(stream)
            .await
            .map_err(|e| BusError::ConsumerSetup {
                stream: stream.to_string(),
                consumer: consumer.to_string(),
                reason: e.to_string(),
            })?;

        let pull_consumer: jetstream::consumer::Consumer<jetstream::consumer::pull::Config> =
            jetstream_stream
                .get_or_create_consumer(
                    consumer,
                    jetstream::consumer::pull::Config {
                        durable_name: Some(consumer.to_string()),
                        filter_subject: subject_filter.to_string(),
                        ack_policy: jetstream::consumer::AckPolicy::Explicit,
                        deliver_policy: jetstream::consumer::DeliverPolicy::All,
                        ..Default::default()
                    },
                )
                .await
                .map_err(|e| BusError::ConsumerSetup {
                    stream: stream.to_string(),
                    consumer: consumer.to_string(),
                    reason: e.to_string(),
                })?;

        self.consumers.insert(key, pull_consumer);
        Ok(())
    }

    async fn fetch(
        &self,
        stream: &str,
        consumer: &str,
        opts: ConsumeOptions,
    ) -> Result<Vec<BusMessage>, BusError> {
        let key = (stream.to_string(), consumer.to_string());
        let pull_consumer = self
            .consumers
            .get(&key)
            .ok_or_else(|| BusError::ConsumerSetup {
                stream: stream.to_string(),
                consumer: consumer.to_string(),
                reason: "ensure_consumer was never called".to_string(),
            })?
            .clone();

        let mut batch = pull_consumer
            .fetch()
            .max_messages(opts.max_messages)
            .expires(opts.timeout)
            .messages()
            .await
            .map_err(|_| BusError::FetchTimeout(consumer.to_string()))?;

        let mut out = Vec::with_capacity(opts.max_messages);
        while let Some(message) = batch.next().await {
            let message = message.map_err(|e| BusError::Publish {
                subject: "<fetch>".to_string(),
                reason: e.to_string(),
            })?;
            let subject = message.subject.to_string();
            let stream_sequence = message
                .info()
                .map_err(|e| BusError::Publish {
                    subject: subject.clone(),
                    reason: e.to_string(),
                })?
                .stream_sequence;
            let payload: serde_json::Value = serde_json::from_slice(&message.payload)?;
            let message_id = format!("{stream}:{consumer}:{stream_sequence}");
            self.pending_acks.insert(message_id.clone(), message);
            out.push(BusMessage {
                message_id,
                subject,
                seq: stream_sequence as Seq,
                payload,
            });
        }
        Ok(out)
    }

    async fn ack(&self, message: &BusMessage) -> Result<(), BusError> {
        if let Some((_, handle)) = self.pending_acks.remove(&message.message_id) {
            handle
                .ack()
                .await
                .map_err(|e| BusError::Publish {
                    subject: message.subject.clone(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    async fn pending(&self, stream: &str, consumer: &str) -> Result<u64, BusError> {
        let key = (stream.to_string(), consumer.to_string());
        let mut pull_consumer = self
            .consumers
            .get(&key)
            .ok_or_else(|| BusError::ConsumerSetup {
                stream: stream.to_string(),
                consumer: consumer.to_string(),
                reason: "ensure_consumer was never called".to_string(),
            })?
            .clone();
        let info = pull_consumer
            .info()
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        Ok(info.num_pending)
    }

    async fn close(&self) -> Result<(), BusError> {
        Ok(())
    }
}
