//! In-memory streaming bus for tests.
//!
//! Subscribers receive the full backlog of their topics first, then live
//! messages, mimicking a consumer group reading from the earliest offset.
//! Topics can be made to reject publishes to exercise the relay's FAILED
//! path.

use async_stream::stream;
use commerce_core::error::BusError;
use commerce_core::store::{BusMessage, MessageStream, StreamingBus};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

struct BusInner {
    log: Vec<BusMessage>,
    live: broadcast::Sender<BusMessage>,
    failing_topics: HashSet<String>,
}

/// In-memory [`StreamingBus`].
#[derive(Clone)]
pub struct InMemoryStreamingBus {
    inner: Arc<Mutex<BusInner>>,
}

impl Default for InMemoryStreamingBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStreamingBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        let (live, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                log: Vec::new(),
                live,
                failing_topics: HashSet::new(),
            })),
        }
    }

    /// Make publishes to `topic` fail until re-enabled.
    pub async fn fail_topic(&self, topic: &str, failing: bool) {
        let mut inner = self.inner.lock().await;
        if failing {
            inner.failing_topics.insert(topic.to_owned());
        } else {
            inner.failing_topics.remove(topic);
        }
    }

    /// Everything published so far, across topics, in publish order.
    pub async fn published(&self) -> Vec<BusMessage> {
        self.inner.lock().await.log.clone()
    }

    /// Everything published to one topic.
    pub async fn published_to(&self, topic: &str) -> Vec<BusMessage> {
        self.inner
            .lock()
            .await
            .log
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }
}

impl StreamingBus for InMemoryStreamingBus {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), BusError> {
        let mut inner = self.inner.lock().await;
        if inner.failing_topics.contains(topic) {
            return Err(BusError::PublishFailed {
                topic: topic.to_owned(),
                reason: "injected publish failure".into(),
            });
        }
        let message = BusMessage {
            topic: topic.to_owned(),
            key: key.to_owned(),
            payload: payload.to_vec(),
        };
        inner.log.push(message.clone());
        // No receivers is fine; the backlog covers late subscribers.
        let _ = inner.live.send(message);
        Ok(())
    }

    async fn subscribe(&self, topics: &[&str], _group: &str) -> Result<MessageStream, BusError> {
        let wanted: HashSet<String> = topics.iter().map(|t| (*t).to_owned()).collect();
        // Snapshot the backlog and attach the live receiver under one lock so
        // nothing published in between is missed or duplicated.
        let (backlog, mut live) = {
            let inner = self.inner.lock().await;
            let backlog: Vec<BusMessage> = inner
                .log
                .iter()
                .filter(|m| wanted.contains(&m.topic))
                .cloned()
                .collect();
            (backlog, inner.live.subscribe())
        };

        let stream = stream! {
            for message in backlog {
                yield Ok(message);
            }
            loop {
                match live.recv().await {
                    Ok(message) => {
                        if wanted.contains(&message.topic) {
                            yield Ok(message);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        yield Err(BusError::TransportError(format!(
                            "subscriber lagged, {skipped} messages dropped"
                        )));
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn backlog_then_live_delivery() {
        let bus = InMemoryStreamingBus::new();
        bus.publish("t1", "k1", b"one").await.unwrap();

        let mut stream = bus.subscribe(&["t1"], "g").await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.payload, b"one");

        bus.publish("t1", "k2", b"two").await.unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.key, "k2");
    }

    #[tokio::test]
    async fn other_topics_are_filtered() {
        let bus = InMemoryStreamingBus::new();
        bus.publish("t1", "k", b"keep").await.unwrap();
        bus.publish("t2", "k", b"skip").await.unwrap();

        let mut stream = bus.subscribe(&["t1"], "g").await.unwrap();
        let only = stream.next().await.unwrap().unwrap();
        assert_eq!(only.payload, b"keep");
    }

    #[tokio::test]
    async fn failing_topic_rejects_publish() {
        let bus = InMemoryStreamingBus::new();
        bus.fail_topic("t1", true).await;
        let err = bus.publish("t1", "k", b"x").await.unwrap_err();
        assert!(matches!(err, BusError::PublishFailed { .. }));

        bus.fail_topic("t1", false).await;
        bus.publish("t1", "k", b"x").await.unwrap();
        assert_eq!(bus.published_to("t1").await.len(), 1);
    }
}
