//! In-process `tokio::sync::mpsc`-backed bus. Sufficient for single-node
//! operation and for the integration tests in `tests/`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Acker, BusError, Delivery, Result, Subscription};

const DEFAULT_MAX_DELIVERIES: u32 = 5;
const DEFAULT_ACK_DEADLINE: Duration = Duration::from_secs(300);

struct RawDelivery {
    payload: Vec<u8>,
    delivery_count: u32,
}

struct Topic {
    sender: mpsc::UnboundedSender<RawDelivery>,
    receiver: Option<mpsc::UnboundedReceiver<RawDelivery>>,
    dead_letters: Arc<Mutex<Vec<Vec<u8>>>>,
}

/// An in-memory message bus backed by one `mpsc` channel per topic.
///
/// Each topic supports exactly one live subscriber, matching the "exactly
/// one consumer per delivery attempt" contract. Subscribing twice without
/// dropping the first `Subscription` returns `BusError::SubscribeFailed`.
pub struct LocalBus {
    topics: Mutex<HashMap<String, Topic>>,
    max_deliveries: u32,
    ack_deadline: Duration,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DELIVERIES, DEFAULT_ACK_DEADLINE)
    }
}

impl LocalBus {
    pub fn new(max_deliveries: u32, ack_deadline: Duration) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            max_deliveries,
            ack_deadline,
        }
    }

    fn topic_entry<'a>(topics: &'a mut HashMap<String, Topic>, name: &str) -> &'a mut Topic {
        topics.entry(name.to_string()).or_insert_with(|| {
            let (sender, receiver) = mpsc::unbounded_channel();
            Topic {
                sender,
                receiver: Some(receiver),
                dead_letters: Arc::new(Mutex::new(Vec::new())),
            }
        })
    }

    /// Messages moved to dead-letter for a topic after exhausting redelivery
    /// attempts. Test/inspection hook — mirrors the "dead-letter topic per
    /// subscription" requirement without modeling it as a separate bus topic.
    pub fn dead_letters(&self, topic: &str) -> Vec<Vec<u8>> {
        let mut topics = self.topics.lock().unwrap();
        let entry = Self::topic_entry(&mut topics, topic);
        entry.dead_letters.lock().unwrap().clone()
    }
}

#[async_trait]
impl super::MessageBus for LocalBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let mut topics = self.topics.lock().unwrap();
        let entry = Self::topic_entry(&mut topics, topic);
        entry
            .sender
            .send(RawDelivery {
                payload,
                delivery_count: 0,
            })
            .map_err(|e| BusError::PublishFailed(e.to_string()))
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>> {
        let mut topics = self.topics.lock().unwrap();
        let entry = Self::topic_entry(&mut topics, topic);
        let receiver = entry
            .receiver
            .take()
            .ok_or_else(|| BusError::SubscribeFailed(format!("topic '{topic}' already has a subscriber")))?;

        Ok(Box::new(LocalSubscription {
            receiver,
            sender: entry.sender.clone(),
            dead_letters: entry.dead_letters.clone(),
            max_deliveries: self.max_deliveries,
            ack_deadline: self.ack_deadline,
        }))
    }
}

struct LocalAcker {
    sender: mpsc::UnboundedSender<RawDelivery>,
    payload: Vec<u8>,
    delivery_count: u32,
    max_deliveries: u32,
    dead_letters: Arc<Mutex<Vec<Vec<u8>>>>,
}

#[async_trait]
impl Acker for LocalAcker {
    async fn ack(&self) -> Result<()> {
        Ok(())
    }

    async fn nack(&self) -> Result<()> {
        if self.delivery_count + 1 >= self.max_deliveries {
            self.dead_letters.lock().unwrap().push(self.payload.clone());
        } else {
            let _ = self.sender.send(RawDelivery {
                payload: self.payload.clone(),
                delivery_count: self.delivery_count + 1,
            });
        }
        Ok(())
    }
}

struct LocalSubscription {
    receiver: mpsc::UnboundedReceiver<RawDelivery>,
    sender: mpsc::UnboundedSender<RawDelivery>,
    dead_letters: Arc<Mutex<Vec<Vec<u8>>>>,
    max_deliveries: u32,
    ack_deadline: Duration,
}

#[async_trait]
impl Subscription for LocalSubscription {
    async fn recv(&mut self) -> Option<Delivery> {
        let raw = self.receiver.recv().await?;

        let acker: Arc<dyn Acker> = Arc::new(LocalAcker {
            sender: self.sender.clone(),
            payload: raw.payload.clone(),
            delivery_count: raw.delivery_count,
            max_deliveries: self.max_deliveries,
            dead_letters: self.dead_letters.clone(),
        });
        let ack = super::AckHandle::new(acker.clone());

        let deadline_acked = ack.acked_flag();
        let deadline = self.ack_deadline;
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if !deadline_acked.swap(true, std::sync::atomic::Ordering::SeqCst) {
                tracing::warn!("ack deadline expired without settlement, redelivering");
                let _ = acker.nack().await;
            }
        });

        Some(Delivery {
            payload: raw.payload,
            ack,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::MessageBus;
    use super::*;

    #[tokio::test]
    async fn publish_then_subscribe_delivers_the_message() {
        let bus = LocalBus::default();
        bus.publish("tasks.ocr", b"hello".to_vec()).await.unwrap();

        let mut sub = bus.subscribe("tasks.ocr").await.unwrap();
        let delivery = sub.recv().await.unwrap();
        assert_eq!(delivery.payload, b"hello");
        delivery.ack.ack().await.unwrap();
    }

    #[tokio::test]
    async fn second_subscriber_is_rejected_while_first_is_live() {
        let bus = LocalBus::default();
        let _first = bus.subscribe("tasks.diff").await.unwrap();
        assert!(bus.subscribe("tasks.diff").await.is_err());
    }

    #[tokio::test]
    async fn nack_below_max_deliveries_requeues_the_message() {
        let bus = LocalBus::new(3, Duration::from_secs(60));
        bus.publish("tasks.summary", b"payload".to_vec()).await.unwrap();

        let mut sub = bus.subscribe("tasks.summary").await.unwrap();
        let first = sub.recv().await.unwrap();
        first.ack.nack().await.unwrap();

        let second = sub.recv().await.unwrap();
        assert_eq!(second.payload, b"payload");
        second.ack.ack().await.unwrap();

        assert!(bus.dead_letters("tasks.summary").is_empty());
    }

    #[tokio::test]
    async fn exhausting_deliveries_dead_letters_the_message() {
        let bus = LocalBus::new(2, Duration::from_secs(60));
        bus.publish("tasks.summary", b"payload".to_vec()).await.unwrap();

        let mut sub = bus.subscribe("tasks.summary").await.unwrap();

        let first = sub.recv().await.unwrap();
        first.ack.nack().await.unwrap();

        let second = sub.recv().await.unwrap();
        second.ack.nack().await.unwrap();

        assert_eq!(bus.dead_letters("tasks.summary").len(), 1);
    }
}
