//! Message bus abstraction (§4.6).
//!
//! Delivers each task to exactly one consumer per delivery attempt,
//! re-delivers on nack or ack-deadline expiry, and moves a message to a
//! dead-letter sink after a configured maximum delivery count. Publishing is
//! fire-and-forget from the caller's perspective; only a completion's ack
//! commits state (the Orchestrator relies on this, see `repository::with_retry`
//! for the analogous store-side conditional-update pattern).

pub mod local;
pub mod messages;

#[cfg(feature = "amqp-broker")]
pub mod amqp;

pub use local::LocalBus;
#[cfg(feature = "amqp-broker")]
pub use amqp::RabbitMqBus;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("publish failed: {0}")]
    PublishFailed(String),
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),
    #[error("ack failed: {0}")]
    AckFailed(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[cfg(feature = "amqp-broker")]
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),
}

pub type Result<T> = std::result::Result<T, BusError>;

/// Acknowledges or negative-acknowledges one delivered message. Backend-specific.
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self) -> Result<()>;
    async fn nack(&self) -> Result<()>;
}

/// One delivered message plus the handle used to settle it.
///
/// Move semantics: the consumer must call `ack()` or `nack()` on `ack`
/// exactly once. Dropping a `Delivery` without settling it is not an error
/// in itself — the ack-deadline timer (or, for AMQP, the broker's own
/// consumer-cancel-on-disconnect) is the real redelivery mechanism — but it
/// does log a warning to aid debugging, mirroring the claim-lifecycle
/// handles elsewhere in this codebase.
pub struct AckHandle {
    acked: Arc<AtomicBool>,
    acker: Arc<dyn Acker>,
}

impl AckHandle {
    fn new(acker: Arc<dyn Acker>) -> Self {
        Self {
            acked: Arc::new(AtomicBool::new(false)),
            acker,
        }
    }

    pub async fn ack(&self) -> Result<()> {
        self.acked.store(true, Ordering::SeqCst);
        self.acker.ack().await
    }

    pub async fn nack(&self) -> Result<()> {
        self.acked.store(true, Ordering::SeqCst);
        self.acker.nack().await
    }

    /// Shared settled-flag, used by bus backends to wire up ack-deadline timers.
    pub(crate) fn acked_flag(&self) -> Arc<AtomicBool> {
        self.acked.clone()
    }
}

impl Drop for AckHandle {
    fn drop(&mut self) {
        if !self.acked.load(Ordering::SeqCst) {
            tracing::warn!("AckHandle dropped without ack/nack — message will be redelivered after its ack deadline");
        }
    }
}

pub struct Delivery {
    pub payload: Vec<u8>,
    pub ack: AckHandle,
}

/// A single-consumer handle to one topic. `recv` pulls the next delivery;
/// `None` means the bus (or its sender half) has shut down.
#[async_trait]
pub trait Subscription: Send {
    async fn recv(&mut self) -> Option<Delivery>;
}

/// Deliver each task to exactly one consumer per delivery attempt,
/// re-deliver on nack or ack-deadline expiry, dead-letter after a
/// configured maximum delivery count. Message ordering is not required.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Subscribe to a topic. Each topic has exactly one live subscriber at a
    /// time (matching the "exactly one consumer per delivery attempt"
    /// requirement); subscribing twice to the same topic is a backend error.
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>>;
}

/// Serialize a message and publish it to the topic implied by its kind.
pub async fn publish_task(bus: &dyn MessageBus, task: &messages::TaskMessage) -> Result<()> {
    let payload = serde_json::to_vec(task)?;
    bus.publish(task.topic(), payload).await
}

/// Serialize and publish a completion event to the shared completions topic.
pub async fn publish_completion(bus: &dyn MessageBus, completion: &messages::CompletionMessage) -> Result<()> {
    let payload = serde_json::to_vec(completion)?;
    bus.publish(messages::CompletionMessage::TOPIC, payload).await
}
