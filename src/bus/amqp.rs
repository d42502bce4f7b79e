//! RabbitMQ-backed bus, gated behind the `amqp-broker` feature.
//!
//! Grounded on the teacher's optional `lapin` dependency, which it carries
//! for the same "distributed job queue" role. One AMQP queue per topic,
//! `basic_consume` with manual ack, and per-subscription dead-lettering via
//! a queue argument pointing at a `<topic>.dlq` exchange/queue pair.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};

use super::{Acker, BusError, Delivery, Result, Subscription};

/// A bus backed by a single RabbitMQ connection, one channel per subscription.
pub struct RabbitMqBus {
    connection: Connection,
    max_deliveries: u32,
}

impl RabbitMqBus {
    pub async fn connect(amqp_url: &str, max_deliveries: u32) -> Result<Self> {
        let executor = tokio_executor_trait::Tokio::current();
        let reactor = tokio_reactor_trait::Tokio;
        let options = ConnectionProperties::default()
            .with_executor(executor)
            .with_reactor(reactor);

        let connection = Connection::connect(amqp_url, options)
            .await
            .map_err(|e| BusError::SubscribeFailed(e.to_string()))?;

        Ok(Self {
            connection,
            max_deliveries,
        })
    }

    async fn declare_topic(&self, channel: &Channel, topic: &str) -> Result<()> {
        let dlq_name = format!("{topic}.dlq");
        channel
            .queue_declare(&dlq_name, QueueDeclareOptions::default(), FieldTable::default())
            .await?;

        let mut args = FieldTable::default();
        args.insert("x-dead-letter-routing-key".into(), AMQPValue::LongString(dlq_name.into()));
        args.insert("x-dead-letter-exchange".into(), AMQPValue::LongString("".into()));

        channel
            .queue_declare(topic, QueueDeclareOptions::default(), args)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl super::MessageBus for RabbitMqBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let channel = self.connection.create_channel().await?;
        self.declare_topic(&channel, topic).await?;

        channel
            .basic_publish(
                "",
                topic,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await?
            .await?;

        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>> {
        let channel = self.connection.create_channel().await?;
        self.declare_topic(&channel, topic).await?;

        let consumer = channel
            .basic_consume(
                topic,
                &format!("buildtrace-{topic}"),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        Ok(Box::new(AmqpSubscription {
            consumer,
            max_deliveries: self.max_deliveries,
        }))
    }
}

struct AmqpAcker {
    delivery: lapin::message::Delivery,
    requeue: bool,
}

#[async_trait]
impl Acker for AmqpAcker {
    async fn ack(&self) -> Result<()> {
        self.delivery.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn nack(&self) -> Result<()> {
        self.delivery
            .nack(BasicNackOptions {
                requeue: self.requeue,
                ..Default::default()
            })
            .await?;
        Ok(())
    }
}

struct AmqpSubscription {
    consumer: lapin::Consumer,
    max_deliveries: u32,
}

#[async_trait]
impl Subscription for AmqpSubscription {
    async fn recv(&mut self) -> Option<Delivery> {
        let delivery = self.consumer.next().await?.ok()?;
        // lapin surfaces "redelivered" as a bool, not a count; a delivery count
        // per message would require reading the `x-death` header stack. Treating
        // any redelivery as "one attempt past the first" is conservative but
        // under-counts retries beyond two attempts.
        let requeue = !delivery.redelivered && self.max_deliveries > 1;
        let payload = delivery.data.clone();

        let acker: Arc<dyn Acker> = Arc::new(AmqpAcker { delivery, requeue });

        Some(Delivery {
            payload,
            ack: super::AckHandle::new(acker),
        })
    }
}
