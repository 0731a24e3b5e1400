//! Output checker (§4.3): exact-match comparison, or a compiled testlib.h
//! checker when the test case names one.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::compiler::TrustedBinaryCache;
use crate::storage::StorageClient;
use crate::trusted::run_checker_binary;
use crate::types::Verdict;

pub const DEFAULT_CHECKER_TIMEOUT_SECS: u64 = 30;
const CHECKER_MESSAGE_LIMIT: usize = 1024;

#[derive(Debug)]
pub struct CheckResult {
    pub verdict: Verdict,
    pub message: Option<String>,
}

/// testlib.h exit codes. https://github.com/MikeMirzayanov/testlib
mod testlib_exit_codes {
    pub const OK: i32 = 0;
    pub const WRONG_ANSWER: i32 = 1;
    pub const PRESENTATION_ERROR: i32 = 2;
    pub const FAIL: i32 = 3;
    pub const DIRT: i32 = 4;
    pub const UNEXPECTED_EOF: i32 = 8;
}

fn exit_code_to_verdict(exit_code: i32) -> Verdict {
    use testlib_exit_codes::*;
    match exit_code {
        OK => Verdict::Accepted,
        WRONG_ANSWER => Verdict::WrongAnswer,
        PRESENTATION_ERROR => Verdict::PresentationError,
        FAIL => Verdict::CheckerFail,
        DIRT | UNEXPECTED_EOF => Verdict::WrongAnswer,
        other => {
            warn!("unknown checker exit code: {}", other);
            Verdict::CheckerFail
        }
    }
}

/// Trimmed, trailing-whitespace- and trailing-blank-line-insensitive exact
/// match, used when a test case carries no checker.
pub fn compare_output(actual: &str, expected: &str) -> bool {
    let normalize = |s: &str| -> Vec<&str> {
        let mut lines: Vec<&str> = s.lines().map(|l| l.trim_end()).collect();
        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        lines
    };
    normalize(actual) == normalize(expected)
}

async fn run_testlib_checker(
    checker_path: &Path,
    input: &str,
    actual_output: &str,
    expected_output: &str,
    timeout_secs: u64,
) -> Result<CheckResult> {
    let dir = tempfile::tempdir()?;
    let input_path = dir.path().join("input.txt");
    let output_path = dir.path().join("output.txt");
    let answer_path = dir.path().join("answer.txt");

    tokio::fs::write(&input_path, input).await?;
    tokio::fs::write(&output_path, actual_output).await?;
    tokio::fs::write(&answer_path, expected_output).await?;

    let outcome = run_checker_binary(checker_path, &input_path, &output_path, &answer_path, timeout_secs)
        .await
        .context("failed to run checker")?;

    let verdict = exit_code_to_verdict(outcome.exit_code);
    let raw_message = if !outcome.stderr.trim().is_empty() {
        outcome.stderr
    } else {
        outcome.stdout
    };
    let message = if raw_message.trim().is_empty() {
        None
    } else {
        Some(raw_message.trim().chars().take(CHECKER_MESSAGE_LIMIT).collect())
    };

    Ok(CheckResult { verdict, message })
}

/// Owns the testlib checker binary cache and decides exact-match vs.
/// custom-checker per test case.
pub struct OutputChecker {
    cache: TrustedBinaryCache,
}

impl OutputChecker {
    pub fn new(testlib_path: impl AsRef<Path>, cache_dir: impl AsRef<Path>) -> Self {
        Self { cache: TrustedBinaryCache::new("checker", testlib_path, cache_dir) }
    }

    /// Download (if needed) and compile the checker for a problem, returning
    /// its cached binary path.
    pub async fn prepare_checker(
        &self,
        storage: &StorageClient,
        checker_url: &str,
        problem_id: i64,
    ) -> Result<PathBuf> {
        info!("downloading checker source: {}", checker_url);
        let source = storage.download_string(checker_url).await?;
        self.cache.get_or_compile(&source, problem_id).await
    }

    pub async fn clear_cache(&self, problem_id: i64) -> Result<()> {
        self.cache.clear_cache(problem_id).await
    }

    /// Check one test case's output. Falls back to exact match (with a
    /// logged warning) if the checker itself faults.
    pub async fn check(
        &self,
        checker_path: Option<&Path>,
        input: &str,
        actual_output: &str,
        expected_output: &str,
    ) -> CheckResult {
        match checker_path {
            None => {
                let verdict = if compare_output(actual_output, expected_output) {
                    Verdict::Accepted
                } else {
                    Verdict::WrongAnswer
                };
                CheckResult { verdict, message: None }
            }
            Some(path) => {
                match run_testlib_checker(path, input, actual_output, expected_output, DEFAULT_CHECKER_TIMEOUT_SECS)
                    .await
                {
                    Ok(result) => result,
                    Err(e) => {
                        warn!("checker execution faulted, falling back to exact match: {}", e);
                        let verdict = if compare_output(actual_output, expected_output) {
                            Verdict::Accepted
                        } else {
                            Verdict::WrongAnswer
                        };
                        CheckResult { verdict, message: Some(format!("checker fault (fell back to exact match): {e}")) }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_mapping() {
        assert_eq!(exit_code_to_verdict(0), Verdict::Accepted);
        assert_eq!(exit_code_to_verdict(1), Verdict::WrongAnswer);
        assert_eq!(exit_code_to_verdict(2), Verdict::PresentationError);
        assert_eq!(exit_code_to_verdict(3), Verdict::CheckerFail);
        assert_eq!(exit_code_to_verdict(4), Verdict::WrongAnswer);
        assert_eq!(exit_code_to_verdict(8), Verdict::WrongAnswer);
    }

    #[test]
    fn compare_output_exact_match() {
        assert!(compare_output("hello\nworld\n", "hello\nworld\n"));
    }

    #[test]
    fn compare_output_ignores_trailing_whitespace() {
        assert!(compare_output("hello  \nworld\t\n", "hello\nworld\n"));
    }

    #[test]
    fn compare_output_ignores_trailing_blank_lines() {
        assert!(compare_output("hello\nworld\n\n\n", "hello\nworld\n"));
    }

    #[test]
    fn compare_output_detects_difference() {
        assert!(!compare_output("hello\nworld\n", "hello\nearth\n"));
    }
}
