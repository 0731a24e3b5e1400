//! Dead-letter / retry pipeline (§4.9), grounded on the retry/DLQ branch of
//! `minos`'s stream consumer (`retry_job` / `send_to_dead_letter`) but
//! driven by the AMQP TTL hand-off in `queue` instead of polling a Redis
//! Stream's pending-entries list.

use futures_util::StreamExt;
use lapin::options::BasicAckOptions;
use tracing::{info, warn};

use crate::config::Config;
use crate::dao::JudgeDao;
use crate::queue::QueueAdapter;
use crate::types::RetryableEnvelope;

/// Consumes `judge.failed`, deciding per envelope whether to schedule
/// another attempt or give up for good.
pub struct DeadLetterPipeline<'a> {
    queue: &'a QueueAdapter,
    dao: &'a dyn JudgeDao,
    max_retries: u32,
}

impl<'a> DeadLetterPipeline<'a> {
    pub fn new(queue: &'a QueueAdapter, dao: &'a dyn JudgeDao, cfg: &Config) -> Self {
        Self { queue, dao, max_retries: cfg.max_retries }
    }

    pub async fn run(&self, consumer_tag: &str) -> anyhow::Result<()> {
        let mut consumer = self.queue.consume_dlq(consumer_tag).await?;

        while let Some(delivery) = consumer.next().await {
            let delivery = match delivery {
                Ok(d) => d,
                Err(e) => {
                    warn!("DLQ consume error: {}", e);
                    continue;
                }
            };

            match self.handle_delivery(&delivery.data).await {
                Ok(()) => {
                    let _ = delivery.ack(BasicAckOptions::default()).await;
                }
                Err(e) => {
                    warn!("failed to process DLQ entry, leaving unacked for redelivery: {}", e);
                }
            }
        }

        Ok(())
    }

    async fn handle_delivery(&self, body: &[u8]) -> anyhow::Result<()> {
        let envelope: RetryableEnvelope = match serde_json::from_slice(body) {
            Ok(e) => e,
            Err(parse_err) => {
                warn!("DLQ message is not a RetryableEnvelope, treating as an unwrapped request: {}", parse_err);
                self.wrap_and_retry(serde_json::from_slice(body)?, "unknown".to_string()).await?;
                return Ok(());
            }
        };

        self.decide(envelope).await
    }

    async fn wrap_and_retry(
        &self,
        request: crate::types::JudgeRequest,
        last_error: String,
    ) -> anyhow::Result<()> {
        let envelope = RetryableEnvelope {
            request,
            retry_count: 0,
            original_queue: crate::queue::SUBMISSIONS_QUEUE.to_string(),
            last_error,
            first_failed_unix_ms: 0,
            last_retry_unix_ms: 0,
        };
        self.decide(envelope).await
    }

    async fn decide(&self, mut envelope: RetryableEnvelope) -> anyhow::Result<()> {
        if envelope.retry_count < self.max_retries {
            envelope.retry_count += 1;
            info!(
                submission_id = envelope.request.submission_id,
                retry_count = envelope.retry_count,
                "scheduling retry"
            );
            self.queue.publish_to_retry(&envelope).await?;
        } else {
            warn!(
                submission_id = envelope.request.submission_id,
                retries = envelope.retry_count,
                "retries exhausted, marking permanently failed"
            );
            self.dao
                .log_event(
                    envelope.request.submission_id,
                    "AUDIT",
                    &format!("permanently failed after {} retries: {}", envelope.retry_count, envelope.last_error),
                )
                .await?;
            // TODO(judge-worker): once the submissions table exposes a
            // "permanently_failed" flag, set verdict=IE + the flag here
            // instead of only logging the audit trail.
        }
        Ok(())
    }
}
