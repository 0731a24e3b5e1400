//! Judge worker (§4.6): the state machine for a single submission. One
//! worker owns one in-flight submission and one sandbox box lineage at a
//! time; this module never touches the queue or the database directly —
//! that's `pool`'s job, mirroring the sandbox module's own separation rule.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::breaker::Breakers;
use crate::catalog::CatalogClient;
use crate::checker::OutputChecker;
use crate::compiler::compile_user_code;
use crate::config::Config;
use crate::error::{JudgeError, JudgeResult as Result};
use crate::sandbox::{self, IoSpec, IsolateBox, Limits};
use crate::storage::StorageClient;
use crate::types::{JudgeRequest, JudgedSubmission, TestCase, TestResult, Verdict};
use crate::validator::{validate, Severity};

pub struct JudgeWorker {
    pub worker_id: u32,
    pub cfg: Arc<Config>,
    pub storage: Arc<StorageClient>,
    pub catalog: Arc<CatalogClient>,
    pub checker: Arc<OutputChecker>,
    pub breakers: Arc<Breakers>,
    box_counter: AtomicU32,
}

/// Outcome of judging one submission end-to-end.
pub struct JudgeOutcome {
    pub judged: JudgedSubmission,
    pub test_results: Vec<TestResult>,
    pub compile_failed: Option<String>,
}

impl JudgeWorker {
    pub fn new(
        worker_id: u32,
        cfg: Arc<Config>,
        storage: Arc<StorageClient>,
        catalog: Arc<CatalogClient>,
        checker: Arc<OutputChecker>,
        breakers: Arc<Breakers>,
    ) -> Self {
        Self { worker_id, cfg, storage, catalog, checker, breakers, box_counter: AtomicU32::new(0) }
    }

    /// Box IDs are computed directly from this worker's own id rather than
    /// through `sandbox::calculate_box_id`'s process-global config: the pool
    /// runs many logical workers concurrently in one process, each needing
    /// its own slice of the 0-9999 box-id space, which a single global
    /// `SandboxConfig::worker_id` can't represent.
    fn next_box_id(&self, test_idx: u32) -> u32 {
        let base = self.box_counter.fetch_add(1, Ordering::Relaxed);
        let worker_offset = (self.worker_id % 10) * 1000;
        worker_offset + ((base * 10 + test_idx) % 1000)
    }

    /// Runs the full claimed -> validating -> compiling -> running(k) ->
    /// scoring transition chain for one request.
    pub async fn process(&self, request: &JudgeRequest) -> Result<JudgeOutcome> {
        let lang = crate::languages::get_language_config(&request.language)
            .ok_or_else(|| JudgeError::UserError(format!("unsupported language: {}", request.language)))?;

        let code = self.fetch_code(&request.code_url).await?;

        // validating
        let validation = validate(&code, &request.language);
        if !validation.ok {
            let reason = validation
                .violations
                .iter()
                .filter(|v| v.severity == Severity::Critical)
                .map(|v| v.description.clone())
                .collect::<Vec<_>>()
                .join("; ");
            return Ok(JudgeOutcome {
                judged: terminal(request.submission_id, Verdict::CompileError, 0, 0, Some(reason.clone())),
                test_results: vec![],
                compile_failed: Some(reason),
            });
        }
        for v in validation.violations.iter().filter(|v| v.severity != Severity::Critical) {
            info!(submission_id = request.submission_id, rule = v.rule, "non-critical validator finding");
        }

        let test_cases = self.fetch_test_cases(request.problem_id).await?;
        if test_cases.is_empty() {
            warn!(submission_id = request.submission_id, problem_id = request.problem_id, "problem has zero test cases");
            return Ok(JudgeOutcome {
                judged: terminal(request.submission_id, Verdict::InternalError, 0, 0, None),
                test_results: vec![],
                compile_failed: None,
            });
        }

        let temp_dir = tempfile::tempdir().map_err(|e| JudgeError::InternalFault(e.to_string()))?;
        let source_path = temp_dir.path().join(&lang.source_file);
        tokio::fs::write(&source_path, &code).await.map_err(|e| JudgeError::InternalFault(e.to_string()))?;

        // compiling
        if lang.compile_command.is_some() {
            let box_id = self.next_box_id(0);
            let compile_result = compile_user_code(box_id, temp_dir.path(), &lang)
                .await
                .map_err(|e| JudgeError::SandboxFault(e.to_string()))?;

            if !compile_result.success {
                return Ok(JudgeOutcome {
                    judged: terminal(request.submission_id, Verdict::CompileError, 0, 0, compile_result.message.clone()),
                    test_results: vec![],
                    compile_failed: compile_result.message,
                });
            }
        }

        self.run_test_cases(request, &lang, temp_dir.path(), &test_cases).await
    }

    async fn run_test_cases(
        &self,
        request: &JudgeRequest,
        lang: &crate::languages::LanguageConfig,
        work_dir: &Path,
        test_cases: &[TestCase],
    ) -> Result<JudgeOutcome> {
        let mut results = Vec::with_capacity(test_cases.len());
        // Peak time/memory are tracked element-wise across every test case
        // actually executed, independent of the terminal verdict (§4.6) -
        // unlike the teacher's judger, which only recorded these on AC.
        let mut max_time_ms = 0u32;
        let mut max_memory_kb = 0u32;
        let mut overall_verdict = Verdict::Accepted;

        for (idx, tc) in test_cases.iter().enumerate() {
            let limits = crate::resource::resolve_test_case_limits(
                &self.cfg,
                lang,
                tc,
                request.time_limit_ms,
                request.memory_limit_kb,
            );

            let input = self.fetch_blob_string(&tc.input_url).await?;
            let expected = self.fetch_blob_string(&tc.output_url).await?;

            let box_id = self.next_box_id(idx as u32 + 1);
            let outcome = self.execute_one(box_id, work_dir, lang, &input, &limits).await?;

            let (verdict, time_ms, memory_kb, checker_output) = match outcome {
                ExecOutcome::Ran { stdout, time_ms, memory_kb, exit_ok } => {
                    if !exit_ok {
                        (Verdict::RuntimeError, time_ms, memory_kb, None)
                    } else {
                        let checker_path = match &tc.checker_url {
                            Some(url) => Some(
                                self.checker
                                    .prepare_checker(&self.storage, url, request.problem_id)
                                    .await
                                    .map_err(|e| JudgeError::SandboxFault(e.to_string()))?,
                            ),
                            None => None,
                        };
                        let check = self.checker.check(checker_path.as_deref(), &input, &stdout, &expected).await;
                        (check.verdict, time_ms, memory_kb, check.message)
                    }
                }
                ExecOutcome::TimeLimitExceeded { time_ms, memory_kb } => {
                    (Verdict::TimeLimitExceeded, time_ms, memory_kb, None)
                }
                ExecOutcome::MemoryLimitExceeded { time_ms, memory_kb } => {
                    (Verdict::MemoryLimitExceeded, time_ms, memory_kb, None)
                }
            };

            max_time_ms = max_time_ms.max(time_ms);
            max_memory_kb = max_memory_kb.max(memory_kb);

            results.push(TestResult {
                submission_id: request.submission_id,
                test_case_id: tc.id,
                test_number: idx as u32 + 1,
                verdict,
                execution_time_ms: Some(time_ms),
                memory_used_kb: Some(memory_kb),
                checker_output,
            });

            // Early-termination policy (default: stop on first non-AC,
            // including WA, per §4.6). Remaining test cases are left
            // unscheduled and never materialize as TestResult rows.
            if !verdict.is_accepted() {
                overall_verdict = verdict;
                break;
            }
        }

        let test_cases_total = test_cases.len() as u32;
        let test_cases_passed = results.iter().filter(|r| r.verdict.is_accepted()).count() as u32;

        Ok(JudgeOutcome {
            judged: JudgedSubmission {
                submission_id: request.submission_id,
                verdict: overall_verdict,
                execution_time_ms: Some(max_time_ms),
                memory_used_kb: Some(max_memory_kb),
                test_cases_passed,
                test_cases_total,
                compile_output: None,
            },
            test_results: results,
            compile_failed: None,
        })
    }

    async fn execute_one(
        &self,
        box_id: u32,
        work_dir: &Path,
        lang: &crate::languages::LanguageConfig,
        input: &str,
        limits: &crate::resource::ResourceLimits,
    ) -> Result<ExecOutcome> {
        let use_cgroups = sandbox::is_cgroups_available().await;
        let isolate_box = IsolateBox::new(box_id, use_cgroups)
            .await
            .map_err(|e| JudgeError::SandboxFault(e.to_string()))?;
        isolate_box.copy_dir_in(work_dir).await.map_err(|e| JudgeError::SandboxFault(e.to_string()))?;

        let stdin_path = work_dir.join("__stdin.txt");
        tokio::fs::write(&stdin_path, input).await.map_err(|e| JudgeError::InternalFault(e.to_string()))?;

        let run_limits = Limits {
            time_ms: limits.time_limit_ms,
            memory_mb: limits.memory_limit_kb / 1024,
            processes: 1,
            open_files: 64,
            fsize_kb: (self.cfg.max_output_bytes / 1024) as u32,
        };
        let io = IoSpec::new().with_stdin(&stdin_path);

        let outcome = isolate_box
            .run(lang.run_command.as_slice(), &run_limits, &io)
            .await
            .map_err(|e| JudgeError::SandboxFault(e.to_string()))?;

        isolate_box.cleanup().await.map_err(|e| JudgeError::SandboxFault(e.to_string()))?;

        // MLE check runs as a post-hoc pass regardless of the reported
        // status, per §4.1: a program killed for time while also over its
        // memory cap is reported as MLE.
        if sandbox::is_mle(&outcome.meta, limits.memory_limit_kb) {
            return Ok(ExecOutcome::MemoryLimitExceeded { time_ms: outcome.meta.time_ms, memory_kb: outcome.meta.memory_kb });
        }
        if sandbox::is_tle(&outcome.meta) {
            return Ok(ExecOutcome::TimeLimitExceeded { time_ms: outcome.meta.time_ms, memory_kb: outcome.meta.memory_kb });
        }

        Ok(ExecOutcome::Ran {
            stdout: outcome.stdout,
            time_ms: outcome.meta.time_ms,
            memory_kb: outcome.meta.memory_kb,
            exit_ok: sandbox::is_success(&outcome.meta),
        })
    }

    async fn fetch_code(&self, code_url: &str) -> Result<Vec<u8>> {
        self.breakers
            .storage
            .call(|| async {
                self.storage
                    .download(code_url)
                    .await
                    .map_err(|e| JudgeError::Transient(format!("code fetch: {e}")))
            })
            .await
    }

    async fn fetch_blob_string(&self, url: &str) -> Result<String> {
        self.breakers
            .storage
            .call(|| async {
                self.storage
                    .download_string(url)
                    .await
                    .map_err(|e| JudgeError::Transient(format!("blob fetch: {e}")))
            })
            .await
    }

    async fn fetch_test_cases(&self, problem_id: i64) -> Result<Vec<TestCase>> {
        self.breakers
            .catalog
            .call(|| async {
                self.catalog
                    .get_test_cases(problem_id)
                    .await
                    .map_err(|e| JudgeError::Transient(format!("catalog fetch: {e}")))
            })
            .await
    }
}

enum ExecOutcome {
    Ran { stdout: String, time_ms: u32, memory_kb: u32, exit_ok: bool },
    TimeLimitExceeded { time_ms: u32, memory_kb: u32 },
    MemoryLimitExceeded { time_ms: u32, memory_kb: u32 },
}

fn terminal(
    submission_id: i64,
    verdict: Verdict,
    time_ms: u32,
    memory_kb: u32,
    compile_output: Option<String>,
) -> JudgedSubmission {
    JudgedSubmission {
        submission_id,
        verdict,
        execution_time_ms: if time_ms > 0 { Some(time_ms) } else { None },
        memory_used_kb: if memory_kb > 0 { Some(memory_kb) } else { None },
        test_cases_passed: 0,
        test_cases_total: 0,
        compile_output,
    }
}
