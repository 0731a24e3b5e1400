//! Persistence access (§3, §6). The only place SQL appears; the worker and
//! pool depend on the `JudgeDao` trait so tests can substitute a fake.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::types::{JudgedSubmission, TestResult, WorkerStatus};

#[async_trait]
pub trait JudgeDao: Send + Sync {
    /// Persist the terminal verdict and the per-test-case rows in one
    /// transaction. Idempotent on `submission_id` so redelivered messages
    /// converge rather than duplicate rows.
    async fn commit_judgement(
        &self,
        judged: &JudgedSubmission,
        test_results: &[TestResult],
    ) -> anyhow::Result<()>;

    async fn register_worker(&self, worker_name: &str) -> anyhow::Result<i64>;
    async fn update_worker_heartbeat(&self, worker_id: i64) -> anyhow::Result<()>;
    async fn set_worker_status(
        &self,
        worker_id: i64,
        status: WorkerStatus,
        current_submission_id: Option<i64>,
    ) -> anyhow::Result<()>;
    async fn stale_workers(&self, stale_after_secs: i64) -> anyhow::Result<Vec<i64>>;
    async fn log_event(&self, submission_id: i64, level: &str, message: &str) -> anyhow::Result<()>;
}

pub struct PgJudgeDao {
    pool: PgPool,
}

impl PgJudgeDao {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl JudgeDao for PgJudgeDao {
    async fn commit_judgement(
        &self,
        judged: &JudgedSubmission,
        test_results: &[TestResult],
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE submissions SET verdict = $2, execution_time_ms = $3, memory_used_kb = $4, \
             test_cases_passed = $5, test_cases_total = $6, compile_output = $7, judged_at = now() \
             WHERE id = $1",
        )
        .bind(judged.submission_id)
        .bind(judged.verdict.wire_code())
        .bind(judged.execution_time_ms.map(|v| v as i32))
        .bind(judged.memory_used_kb.map(|v| v as i32))
        .bind(judged.test_cases_passed as i32)
        .bind(judged.test_cases_total as i32)
        .bind(&judged.compile_output)
        .execute(&mut *tx)
        .await?;

        for result in test_results {
            sqlx::query(
                "INSERT INTO submission_test_results \
                 (submission_id, test_case_id, test_number, verdict, execution_time_ms, memory_used_kb, checker_output) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) \
                 ON CONFLICT (submission_id, test_case_id) DO UPDATE SET \
                 verdict = EXCLUDED.verdict, execution_time_ms = EXCLUDED.execution_time_ms, \
                 memory_used_kb = EXCLUDED.memory_used_kb, checker_output = EXCLUDED.checker_output",
            )
            .bind(result.submission_id)
            .bind(result.test_case_id)
            .bind(result.test_number as i32)
            .bind(result.verdict.wire_code())
            .bind(result.execution_time_ms.map(|v| v as i32))
            .bind(result.memory_used_kb.map(|v| v as i32))
            .bind(&result.checker_output)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn register_worker(&self, worker_name: &str) -> anyhow::Result<i64> {
        let row = sqlx::query(
            "INSERT INTO judge_workers (worker_name, status, started_at, last_heartbeat) \
             VALUES ($1, 'idle', now(), now()) RETURNING id",
        )
        .bind(worker_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("id"))
    }

    async fn update_worker_heartbeat(&self, worker_id: i64) -> anyhow::Result<()> {
        sqlx::query("UPDATE judge_workers SET last_heartbeat = now() WHERE id = $1")
            .bind(worker_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_worker_status(
        &self,
        worker_id: i64,
        status: WorkerStatus,
        current_submission_id: Option<i64>,
    ) -> anyhow::Result<()> {
        let status_str = match status {
            WorkerStatus::Idle => "idle",
            WorkerStatus::Busy => "busy",
            WorkerStatus::Recovering => "recovering",
            WorkerStatus::Failed => "failed",
        };
        sqlx::query("UPDATE judge_workers SET status = $2, current_submission_id = $3 WHERE id = $1")
            .bind(worker_id)
            .bind(status_str)
            .bind(current_submission_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn stale_workers(&self, stale_after_secs: i64) -> anyhow::Result<Vec<i64>> {
        let rows = sqlx::query(
            "SELECT id FROM judge_workers \
             WHERE status != 'failed' AND last_heartbeat < now() - make_interval(secs => $1)",
        )
        .bind(stale_after_secs as f64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get::<i64, _>("id")).collect())
    }

    async fn log_event(&self, submission_id: i64, level: &str, message: &str) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO execution_logs (submission_id, level, message, created_at) VALUES ($1, $2, $3, now())",
        )
        .bind(submission_id)
        .bind(level)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
