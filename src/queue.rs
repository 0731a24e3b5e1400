//! Queue adapter (§4.8): durable AMQP topology over RabbitMQ via `lapin`,
//! grounded on the `Coordinator`'s connect/declare/consume/ack shape, with
//! the exchange/TTL dead-letter topology from §4.8-4.9 layered on top so the
//! broker performs retry-delay and DLQ hand-off natively instead of the
//! worker polling for it.

use anyhow::{Context, Result};
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use serde::Serialize;
use tracing::info;

use crate::config::Config;

pub const SUBMISSIONS_QUEUE: &str = "judge.submissions";
pub const RETRY_QUEUE: &str = "judge.retry";
pub const FAILED_QUEUE: &str = "judge.failed";
pub const EVENTS_EXCHANGE: &str = "judge.events";

const DLX_TO_FAILED: &str = "judge.dlx";
const DLX_TO_SUBMISSIONS: &str = "judge.retry.dlx";

pub struct QueueAdapter {
    _connection: Connection,
    channel: Channel,
}

impl QueueAdapter {
    pub async fn connect(cfg: &Config) -> Result<Self> {
        let connection = Connection::connect(&cfg.rabbitmq_url, ConnectionProperties::default())
            .await
            .context("failed to connect to RabbitMQ")?;
        let channel = connection.create_channel().await?;

        // Consumers pull one message at a time per worker (§5 backpressure).
        channel.basic_qos(1, Default::default()).await?;

        declare_topology(&channel, cfg).await?;

        Ok(Self { _connection: connection, channel })
    }

    /// Start consuming from the primary submissions queue.
    pub async fn consume_submissions(&self, consumer_tag: &str) -> Result<Consumer> {
        self.channel
            .basic_consume(SUBMISSIONS_QUEUE, consumer_tag, BasicConsumeOptions::default(), FieldTable::default())
            .await
            .context("failed to start consuming judge.submissions")
    }

    /// Start consuming from the dead-letter queue (the retry/permanent-failure pipeline).
    pub async fn consume_dlq(&self, consumer_tag: &str) -> Result<Consumer> {
        self.channel
            .basic_consume(FAILED_QUEUE, consumer_tag, BasicConsumeOptions::default(), FieldTable::default())
            .await
            .context("failed to start consuming judge.failed")
    }

    pub async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.channel.basic_ack(delivery_tag, BasicAckOptions::default()).await?;
        Ok(())
    }

    /// `requeue = true` puts the message back on the same queue immediately
    /// (used for transient faults worth a same-worker retry); `requeue =
    /// false` triggers the queue's dead-letter-exchange, which for
    /// `judge.submissions` routes straight to `judge.failed`.
    pub async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.channel
            .basic_nack(delivery_tag, BasicNackOptions { requeue, ..Default::default() })
            .await?;
        Ok(())
    }

    /// Publish a JSON event to the events exchange under `routing_key`
    /// (e.g. "submission.judged", "submission.compilation_failed").
    pub async fn publish_event<T: Serialize>(&self, routing_key: &str, payload: &T) -> Result<()> {
        let body = serde_json::to_vec(payload)?;
        self.channel
            .basic_publish(
                EVENTS_EXCHANGE,
                routing_key,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await?
            .await?;
        Ok(())
    }

    /// Passively declare `judge.submissions` and read back its message
    /// count. A passive declare doesn't create or modify the queue (it must
    /// already exist), so this is safe to call from the autoscaler without
    /// racing the real `declare_topology` — and it works without the
    /// RabbitMQ management plugin, unlike the HTTP queue-stats API.
    pub async fn submissions_queue_depth(&self) -> Result<u32> {
        let queue = self
            .channel
            .queue_declare(
                SUBMISSIONS_QUEUE,
                QueueDeclareOptions { passive: true, durable: true, ..Default::default() },
                FieldTable::default(),
            )
            .await
            .context("failed to read judge.submissions queue depth")?;
        Ok(queue.message_count())
    }

    /// Publish an envelope onto the retry queue; it will reappear on
    /// `judge.submissions` once its per-message TTL (the retry delay)
    /// expires.
    pub async fn publish_to_retry<T: Serialize>(&self, envelope: &T) -> Result<()> {
        let body = serde_json::to_vec(envelope)?;
        self.channel
            .basic_publish(
                "",
                RETRY_QUEUE,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await?
            .await?;
        Ok(())
    }
}

async fn declare_topology(channel: &Channel, cfg: &Config) -> Result<()> {
    channel
        .exchange_declare(EVENTS_EXCHANGE, ExchangeKind::Topic, ExchangeDeclareOptions { durable: true, ..Default::default() }, FieldTable::default())
        .await?;
    channel
        .exchange_declare(DLX_TO_FAILED, ExchangeKind::Direct, ExchangeDeclareOptions { durable: true, ..Default::default() }, FieldTable::default())
        .await?;
    channel
        .exchange_declare(DLX_TO_SUBMISSIONS, ExchangeKind::Direct, ExchangeDeclareOptions { durable: true, ..Default::default() }, FieldTable::default())
        .await?;

    let mut submissions_args = FieldTable::default();
    submissions_args.insert("x-dead-letter-exchange".into(), AMQPValue::LongString(DLX_TO_FAILED.into()));
    submissions_args.insert("x-dead-letter-routing-key".into(), AMQPValue::LongString(FAILED_QUEUE.into()));
    channel
        .queue_declare(SUBMISSIONS_QUEUE, QueueDeclareOptions { durable: true, ..Default::default() }, submissions_args)
        .await?;

    let mut retry_args = FieldTable::default();
    retry_args.insert("x-dead-letter-exchange".into(), AMQPValue::LongString(DLX_TO_SUBMISSIONS.into()));
    retry_args.insert("x-dead-letter-routing-key".into(), AMQPValue::LongString(SUBMISSIONS_QUEUE.into()));
    retry_args.insert("x-message-ttl".into(), AMQPValue::LongInt(cfg.retry_delay.as_millis() as i32));
    channel
        .queue_declare(RETRY_QUEUE, QueueDeclareOptions { durable: true, ..Default::default() }, retry_args)
        .await?;

    let mut failed_args = FieldTable::default();
    failed_args.insert("x-message-ttl".into(), AMQPValue::LongInt(cfg.dlq_message_ttl.as_millis() as i32));
    channel
        .queue_declare(FAILED_QUEUE, QueueDeclareOptions { durable: true, ..Default::default() }, failed_args)
        .await?;

    channel
        .queue_bind(FAILED_QUEUE, DLX_TO_FAILED, FAILED_QUEUE, QueueBindOptions::default(), FieldTable::default())
        .await?;
    channel
        .queue_bind(SUBMISSIONS_QUEUE, DLX_TO_SUBMISSIONS, SUBMISSIONS_QUEUE, QueueBindOptions::default(), FieldTable::default())
        .await?;

    info!("declared judge queue topology");
    Ok(())
}
