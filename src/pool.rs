//! Worker pool (§4.7): spawns and supervises judge-worker tasks, and runs
//! the heartbeat / health-monitor / recovery / autoscale loops alongside the
//! submission consumer loop. Grounded on the Coordinator's single consumer
//! loop, generalized from one static consumer to an elastic pool of
//! concurrently consuming tasks sharing one `QueueAdapter` channel.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::breaker::Breakers;
use crate::catalog::CatalogClient;
use crate::checker::OutputChecker;
use crate::config::Config;
use crate::dao::JudgeDao;
use crate::metrics;
use crate::queue::QueueAdapter;
use crate::storage::StorageClient;
use crate::types::{
    JudgeRequest, PlagiarismCheckRequested, SubmissionCompilationFailed, SubmissionJudged, Verdict,
    WorkerStatus,
};
use crate::worker::JudgeWorker;

struct PooledWorker {
    /// The `judge_workers` row id, used to report status/heartbeat. Set to
    /// -1 until the task's own `register_worker` call completes.
    logical_id: Arc<AtomicI64>,
    busy: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

pub struct WorkerPool {
    cfg: Arc<Config>,
    dao: Arc<dyn JudgeDao>,
    queue: Arc<QueueAdapter>,
    breakers: Arc<Breakers>,
    storage: Arc<StorageClient>,
    catalog: Arc<CatalogClient>,
    checker: Arc<OutputChecker>,
    workers: RwLock<Vec<PooledWorker>>,
    next_worker_seq: AtomicU32,
    backlog_estimate: Arc<AtomicI64>,
}

impl WorkerPool {
    pub fn new(
        cfg: Arc<Config>,
        dao: Arc<dyn JudgeDao>,
        queue: Arc<QueueAdapter>,
        breakers: Arc<Breakers>,
        storage: Arc<StorageClient>,
        catalog: Arc<CatalogClient>,
        checker: Arc<OutputChecker>,
    ) -> Self {
        Self {
            cfg,
            dao,
            queue,
            breakers,
            storage,
            catalog,
            checker,
            workers: RwLock::new(Vec::new()),
            next_worker_seq: AtomicU32::new(0),
            backlog_estimate: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Brings the pool up to `min_workers` and runs forever, supervising
    /// health/heartbeat/autoscale alongside it.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        for _ in 0..self.cfg.min_workers {
            self.clone().spawn_one().await;
        }
        metrics::ACTIVE_WORKERS.set(self.cfg.min_workers as i64);

        let heartbeat = tokio::spawn(self.clone().heartbeat_loop());
        let health = tokio::spawn(self.clone().health_loop());
        let autoscale = tokio::spawn(self.clone().autoscale_loop());

        let _ = tokio::join!(heartbeat, health, autoscale);
        Ok(())
    }

    async fn spawn_one(self: Arc<Self>) {
        let seq = self.next_worker_seq.fetch_add(1, Ordering::Relaxed);
        let busy = Arc::new(AtomicBool::new(false));
        let busy_for_task = busy.clone();
        let logical_id = Arc::new(AtomicI64::new(-1));
        let logical_id_for_task = logical_id.clone();
        let pool = self.clone();

        // Registration happens inside the task so a failed registration
        // doesn't block the caller; the slot is simply dropped on error.
        let task = tokio::spawn(async move {
            let worker_name = format!("judge-worker-{seq}");
            let registered_id = match pool.dao.register_worker(&worker_name).await {
                Ok(id) => id,
                Err(e) => {
                    error!("failed to register {}: {}", worker_name, e);
                    return;
                }
            };
            logical_id_for_task.store(registered_id, Ordering::Release);

            if let Err(e) = pool.consume_loop(seq, registered_id, busy_for_task).await {
                error!("worker {} consumer loop exited: {}", worker_name, e);
                let _ = pool.dao.set_worker_status(registered_id, WorkerStatus::Failed, None).await;
            }
        });

        self.workers.write().await.push(PooledWorker { logical_id, busy, task });
    }

    async fn consume_loop(
        &self,
        worker_seq: u32,
        logical_id: i64,
        busy: Arc<AtomicBool>,
    ) -> anyhow::Result<()> {
        let judge_worker = JudgeWorker::new(
            worker_seq,
            self.cfg.clone(),
            self.storage.clone(),
            self.catalog.clone(),
            self.checker.clone(),
            self.breakers.clone(),
        );

        let consumer_tag = format!("judge-worker-{worker_seq}");
        let mut consumer = self.queue.consume_submissions(&consumer_tag).await?;

        while let Some(delivery) = consumer.next().await {
            let delivery = match delivery {
                Ok(d) => d,
                Err(e) => {
                    warn!("consume error on {}: {}", consumer_tag, e);
                    continue;
                }
            };

            self.backlog_estimate.fetch_add(1, Ordering::Relaxed);
            busy.store(true, Ordering::Release);
            metrics::BUSY_WORKERS.inc();
            let _ = self.dao.set_worker_status(logical_id, WorkerStatus::Busy, None).await;

            let request: JudgeRequest = match serde_json::from_slice(&delivery.data) {
                Ok(r) => r,
                Err(e) => {
                    warn!("malformed submission payload, dropping to DLQ: {}", e);
                    let _ = self.queue.nack(delivery.delivery_tag, false).await;
                    busy.store(false, Ordering::Release);
                    metrics::BUSY_WORKERS.dec();
                    self.backlog_estimate.fetch_sub(1, Ordering::Relaxed);
                    continue;
                }
            };

            let submission_id = request.submission_id;
            let _ = self.dao.set_worker_status(logical_id, WorkerStatus::Busy, Some(submission_id)).await;

            match judge_worker.process(&request).await {
                Ok(outcome) => {
                    if let Some(reason) = outcome.compile_failed {
                        let event = SubmissionCompilationFailed {
                            submission_id,
                            language: request.language.clone(),
                            error_message: reason,
                        };
                        let _ = self.queue.publish_event("submission.compilation_failed", &event).await;
                    } else {
                        let event = SubmissionJudged::from(&outcome.judged);
                        let _ = self.queue.publish_event("submission.judged", &event).await;
                    }

                    metrics::record_verdict(outcome.judged.verdict.wire_code());
                    metrics::JOBS_PROCESSED.inc();
                    if let (Some(t), Some(m)) = (outcome.judged.execution_time_ms, outcome.judged.memory_used_kb) {
                        metrics::record_execution(request.problem_id, t as f64 / 1000.0, m);
                    }

                    if let Err(e) = self.dao.commit_judgement(&outcome.judged, &outcome.test_results).await {
                        error!("failed to persist judgement for {}: {}", submission_id, e);
                        let _ = self.queue.nack(delivery.delivery_tag, false).await;
                    } else {
                        if outcome.judged.verdict == Verdict::Accepted {
                            let plagiarism_check = PlagiarismCheckRequested {
                                submission_id,
                                problem_id: request.problem_id,
                            };
                            let _ = self
                                .queue
                                .publish_event("submission.plagiarism_check_requested", &plagiarism_check)
                                .await;
                        }
                        let _ = self.queue.ack(delivery.delivery_tag).await;
                    }
                }
                Err(e) => {
                    metrics::JOBS_FAILED.inc();
                    warn!(submission_id, "judging failed: {}", e);
                    let _ = self.dao.log_event(submission_id, "ERROR", &e.to_string()).await;

                    if e.is_retryable() {
                        // requeue = true: same-worker retry via the broker's
                        // own redelivery, no DLQ hop.
                        let _ = self.queue.nack(delivery.delivery_tag, true).await;
                    } else {
                        // requeue = false routes through judge.submissions'
                        // dead-letter-exchange straight to judge.failed.
                        let _ = self.queue.nack(delivery.delivery_tag, false).await;
                    }
                }
            }

            busy.store(false, Ordering::Release);
            metrics::BUSY_WORKERS.dec();
            let _ = self.dao.set_worker_status(logical_id, WorkerStatus::Idle, None).await;
            self.backlog_estimate.fetch_sub(1, Ordering::Relaxed);
        }

        Ok(())
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.cfg.heartbeat_interval);
        loop {
            ticker.tick().await;
            let workers = self.workers.read().await;
            for w in workers.iter() {
                let id = w.logical_id.load(Ordering::Acquire);
                if id >= 0 {
                    if let Err(e) = self.dao.update_worker_heartbeat(id).await {
                        warn!("heartbeat failed for worker {}: {}", id, e);
                    }
                }
            }
        }
    }

    /// Marks workers whose heartbeat has gone stale as failed and replaces
    /// them with a freshly registered one (§4.7 recovery).
    async fn health_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.cfg.health_check_interval);
        loop {
            ticker.tick().await;
            let stale_after_secs = self.cfg.recovery_interval.as_secs() as i64;
            match self.dao.stale_workers(stale_after_secs).await {
                Ok(stale) if !stale.is_empty() => {
                    warn!("{} worker(s) stale, marking failed and respawning", stale.len());
                    for id in stale {
                        let _ = self.dao.set_worker_status(id, WorkerStatus::Failed, None).await;
                    }
                    self.reap_finished().await;
                    self.clone().spawn_one().await;
                }
                Ok(_) => {}
                Err(e) => warn!("stale-worker scan failed: {}", e),
            }
        }
    }

    async fn reap_finished(&self) {
        let mut workers = self.workers.write().await;
        workers.retain(|w| !w.task.is_finished());
    }

    /// Scales the pool between `min_workers` and `max_workers` on the
    /// queue-depth formula from §4.7: empty queue drains to `min_workers`;
    /// a backlog more than 3x the active-worker count scales up hard;
    /// a backlog under half the active-worker count scales down gently.
    async fn autoscale_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.cfg.autoscale_interval);
        loop {
            ticker.tick().await;
            self.reap_finished().await;

            let workers = self.workers.read().await;
            let current = workers.len();
            let active = workers.iter().filter(|w| w.busy.load(Ordering::Acquire)).count();
            drop(workers);

            let queue_depth = match self.queue.submissions_queue_depth().await {
                Ok(d) => d as i64,
                Err(e) => {
                    warn!("failed to read queue depth for autoscaling: {}", e);
                    continue;
                }
            };

            let target = compute_autoscale_target(
                queue_depth,
                active,
                current,
                self.cfg.min_workers,
                self.cfg.max_workers,
            );

            if target > current {
                info!("queue depth {}, scaling up from {} to {}", queue_depth, current, target);
                for _ in 0..(target - current) {
                    self.clone().spawn_one().await;
                }
            } else if target < current {
                info!("queue depth {}, scaling down from {} to {}", queue_depth, current, target);
                let mut workers = self.workers.write().await;
                for _ in 0..(current - target) {
                    match workers.iter().position(|w| !w.busy.load(Ordering::Acquire)) {
                        Some(idle_idx) => {
                            let w = workers.remove(idle_idx);
                            w.task.abort();
                        }
                        None => break,
                    }
                }
            }

            metrics::ACTIVE_WORKERS.set(self.workers.read().await.len() as i64);
            metrics::BREAKER_OPEN.set(self.breakers.open_count());
        }
    }
}

/// Pure §4.7 autoscaler-target math, pulled out of `autoscale_loop` so it
/// can be exercised without a queue or a running pool. Never returns below
/// `active` (busy workers can't be torn down) and always clamps into
/// `[min_workers, max_workers]`.
fn compute_autoscale_target(
    queue_depth: i64,
    active: usize,
    current: usize,
    min_workers: usize,
    max_workers: usize,
) -> usize {
    let target = if queue_depth == 0 {
        min_workers
    } else if queue_depth as f64 > active as f64 * 3.0 {
        current + 5
    } else if (queue_depth as f64) < active as f64 * 0.5 && current > min_workers {
        current.saturating_sub(3)
    } else {
        current
    };

    target.clamp(min_workers, max_workers).max(active)
}

#[cfg(test)]
mod tests {
    use super::compute_autoscale_target;

    #[test]
    fn empty_queue_drains_to_min_workers() {
        assert_eq!(compute_autoscale_target(0, 2, 8, 3, 20), 3);
    }

    #[test]
    fn deep_backlog_scales_up_by_five() {
        // active=2, depth=10 > 2*3, current=4 -> 9
        assert_eq!(compute_autoscale_target(10, 2, 4, 3, 20), 9);
    }

    #[test]
    fn shallow_backlog_scales_down_by_three() {
        // active=4, depth=1 < 4*0.5, current=10 -> 7
        assert_eq!(compute_autoscale_target(1, 4, 10, 3, 20), 7);
    }

    #[test]
    fn scale_down_never_drops_below_min_workers() {
        assert_eq!(compute_autoscale_target(0, 1, 4, 3, 20), 3);
        assert_eq!(compute_autoscale_target(1, 2, 4, 3, 20), 3);
    }

    #[test]
    fn result_never_goes_below_active_worker_count() {
        // min_workers=1 would normally win, but 5 workers are busy.
        assert_eq!(compute_autoscale_target(0, 5, 5, 1, 20), 5);
    }

    #[test]
    fn scale_up_respects_max_workers_ceiling() {
        assert_eq!(compute_autoscale_target(100, 2, 18, 3, 20), 20);
    }

    #[test]
    fn moderate_backlog_leaves_pool_unchanged() {
        // active=4, depth=6: not > 12, not < 2 -> unchanged.
        assert_eq!(compute_autoscale_target(6, 4, 6, 3, 20), 6);
    }
}
