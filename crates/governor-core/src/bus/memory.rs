//! In-process event bus used by unit tests and by `govctl` when run without
//! a NATS connection. Implements the same at-least-once, explicit-ack
//! contract as the production bus, minus persistence across restarts: a
//! message fetched and never acked is redelivered once its ack-wait
//! expires, same as a JetStream consumer's `AckWait`.

use super::{BusMessage, ConsumeOptions, EventBus};
use crate::error::BusError;
use crate::types::Seq;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// How long a fetched-but-unacked message stays in flight before it
/// becomes eligible for redelivery. Mirrors JetStream's default `AckWait`
/// in spirit, just much shorter since this backend only ever lives for the
/// length of a test or a single `govctl up` process.
const ACK_WAIT: Duration = Duration::from_secs(30);

struct StoredMessage {
    seq: Seq,
    subject: String,
    payload: serde_json::Value,
}

struct ConsumerState {
    filter: String,
    next_index: usize,
    in_flight: HashMap<String, (usize, Instant)>,
}

struct Inner {
    log: Vec<StoredMessage>,
    consumers: HashMap<(String, String), ConsumerState>,
    next_seq: Seq,
}

/// Matches a concrete subject against a NATS-style filter using `*` as a
/// single-token wildcard and `>` as a trailing multi-token wildcard.
fn subject_matches(filter: &str, subject: &str) -> bool {
    let filter_tokens: Vec<&str> = filter.split('.').collect();
    let subject_tokens: Vec<&str> = subject.split('.').collect();

    for (i, ftok) in filter_tokens.iter().enumerate() {
        if *ftok == ">" {
            return true;
        }
        match subject_tokens.get(i) {
            Some(stok) if *ftok == "*" || ftok == stok => continue,
            _ => return false,
        }
    }
    filter_tokens.len() == subject_tokens.len()
}

/// In-memory `EventBus`. A message fetched and never acked re-enters the
/// redelivery pool once `ack_wait` elapses, and a subsequent `fetch` hands
/// it out again ahead of any not-yet-delivered messages.
pub struct MemoryEventBus {
    inner: Mutex<Inner>,
    ack_wait: Duration,
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::with_ack_wait(ACK_WAIT)
    }

    /// Used by tests that need to observe redelivery without sleeping out
    /// the default 30s ack-wait.
    pub fn with_ack_wait(ack_wait: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                log: Vec::new(),
                consumers: HashMap::new(),
                next_seq: 1,
            }),
            ack_wait,
        }
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, subject: &str, payload: serde_json::Value) -> Result<Seq, BusError> {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.log.push(StoredMessage {
            seq,
            subject: subject.to_string(),
            payload,
        });
        Ok(seq)
    }

    async fn ensure_consumer(
        &self,
        stream: &str,
        subject_filter: &str,
        consumer: &str,
    ) -> Result<(), BusError> {
        let mut inner = self.inner.lock();
        inner
            .consumers
            .entry((stream.to_string(), consumer.to_string()))
            .or_insert_with(|| ConsumerState {
                filter: subject_filter.to_string(),
                next_index: 0,
                in_flight: HashMap::new(),
            });
        Ok(())
    }

    async fn fetch(
        &self,
        stream: &str,
        consumer: &str,
        opts: ConsumeOptions,
    ) -> Result<Vec<BusMessage>, BusError> {
        let mut inner = self.inner.lock();
        let key = (stream.to_string(), consumer.to_string());
        let log_len = inner.log.len();
        let state = inner.consumers.get_mut(&key).ok_or_else(|| {
            BusError::ConsumerSetup {
                stream: stream.to_string(),
                consumer: consumer.to_string(),
                reason: "consumer not created; call ensure_consumer first".to_string(),
            }
        })?;

        let mut out = Vec::new();
        let now = Instant::now();

        // Redelivery first: any message still in flight past its ack-wait
        // is handed out again before anything undelivered, same as a
        // JetStream consumer redelivering before advancing further.
        let expired: Vec<String> = state
            .in_flight
            .iter()
            .filter(|(_, (_, delivered_at))| now.duration_since(*delivered_at) >= self.ack_wait)
            .map(|(message_id, _)| message_id.clone())
            .collect();
        for message_id in expired {
            if out.len() >= opts.max_messages {
                break;
            }
            let idx = state.in_flight[&message_id].0;
            let msg = &inner.log[idx];
            state.in_flight.insert(message_id.clone(), (idx, now));
            out.push(BusMessage {
                message_id,
                subject: msg.subject.clone(),
                seq: msg.seq,
                payload: msg.payload.clone(),
            });
        }

        let mut idx = state.next_index;
        while idx < log_len && out.len() < opts.max_messages {
            let msg = &inner.log[idx];
            if subject_matches(&state.filter, &msg.subject) {
                let message_id = format!("{stream}:{consumer}:{}", msg.seq);
                state.in_flight.insert(message_id.clone(), (idx, now));
                out.push(BusMessage {
                    message_id,
                    subject: msg.subject.clone(),
                    seq: msg.seq,
                    payload: msg.payload.clone(),
                });
            }
            idx += 1;
        }
        state.next_index = idx;
        Ok(out)
    }

    async fn ack(&self, message: &BusMessage) -> Result<(), BusError> {
        let mut inner = self.inner.lock();
        for state in inner.consumers.values_mut() {
            state.in_flight.remove(&message.message_id);
        }
        Ok(())
    }

    async fn pending(&self, stream: &str, consumer: &str) -> Result<u64, BusError> {
        let inner = self.inner.lock();
        let key = (stream.to_string(), consumer.to_string());
        let Some(state) = inner.consumers.get(&key) else {
            return Ok(0);
        };
        let undelivered = inner.log[state.next_index..]
            .iter()
            .filter(|m| subject_matches(&state.filter, &m.subject))
            .count();
        Ok((undelivered + state.in_flight.len()) as u64)
    }

    async fn close(&self) -> Result<(), BusError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_then_fetch_then_ack_roundtrips() {
        let bus = MemoryEventBus::new();
        bus.ensure_consumer("swarm", "swarm.proposals.>", "governance")
            .await
            .unwrap();
        bus.publish("swarm.proposals.facts-worker", json!({"a": 1}))
            .await
            .unwrap();

        let msgs = bus
            .fetch("swarm", "governance", ConsumeOptions::default())
            .await
            .unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].payload, json!({"a": 1}));

        assert_eq!(bus.pending("swarm", "governance").await.unwrap(), 1);
        bus.ack(&msgs[0]).await.unwrap();
        assert_eq!(bus.pending("swarm", "governance").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unacked_message_is_not_redelivered_before_ack_wait() {
        let bus = MemoryEventBus::new();
        bus.ensure_consumer("swarm", "swarm.proposals.>", "governance")
            .await
            .unwrap();
        bus.publish("swarm.proposals.facts-worker", json!({"a": 1}))
            .await
            .unwrap();

        let first = bus
            .fetch("swarm", "governance", ConsumeOptions::default())
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        // next_index has advanced past the message and the default 30s
        // ack-wait hasn't elapsed, so a second fetch sees nothing new.
        let second = bus
            .fetch("swarm", "governance", ConsumeOptions::default())
            .await
            .unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn unacked_message_is_redelivered_once_ack_wait_elapses() {
        let bus = MemoryEventBus::with_ack_wait(Duration::from_millis(10));
        bus.ensure_consumer("swarm", "swarm.proposals.>", "governance")
            .await
            .unwrap();
        bus.publish("swarm.proposals.facts-worker", json!({"a": 1}))
            .await
            .unwrap();

        let first = bus
            .fetch("swarm", "governance", ConsumeOptions::default())
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;

        let redelivered = bus
            .fetch("swarm", "governance", ConsumeOptions::default())
            .await
            .unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].message_id, first[0].message_id);

        bus.ack(&redelivered[0]).await.unwrap();
        assert_eq!(bus.pending("swarm", "governance").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn subject_filter_respects_wildcards() {
        assert!(subject_matches("swarm.proposals.>", "swarm.proposals.facts"));
        assert!(subject_matches("swarm.events.*", "swarm.events.bootstrap"));
        assert!(!subject_matches("swarm.events.*", "swarm.events.a.b"));
        assert!(!subject_matches("swarm.jobs.extract_facts", "swarm.jobs.check_drift"));
    }
}
