//! Wire and persistence data model (§3, §6).

use serde::{Deserialize, Serialize};

/// Terminal (and pending) judging verdict.
///
/// Internally this keeps the finer-grained testlib distinctions
/// (`PresentationError`, `Fail`, `Skipped`) because they carry useful detail
/// in logs and test-result rows, but the wire format (`SubmissionJudged`,
/// `Submission.verdict`) only ever emits the closed set from §6:
/// `pending`, `AC`, `WA`, `TLE`, `MLE`, `RE`, `CE`, `IE`. `Verdict::wire_code`/
/// `Verdict::from_wire_code` perform that narrowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pending,
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    CompileError,
    InternalError,
    /// testlib exit-code 2: folds to WA on the wire.
    PresentationError,
    /// testlib exit-code 3 (checker bug): folds to IE on the wire.
    CheckerFail,
    /// Not run because an earlier test case already decided the verdict.
    Skipped,
}

impl Verdict {
    pub fn wire_code(self) -> &'static str {
        match self {
            Verdict::Pending => "pending",
            Verdict::Accepted => "AC",
            Verdict::WrongAnswer | Verdict::PresentationError => "WA",
            Verdict::TimeLimitExceeded => "TLE",
            Verdict::MemoryLimitExceeded => "MLE",
            Verdict::RuntimeError => "RE",
            Verdict::CompileError => "CE",
            Verdict::InternalError | Verdict::CheckerFail => "IE",
            Verdict::Skipped => "pending",
        }
    }

    pub fn from_wire_code(code: &str) -> Option<Self> {
        Some(match code {
            "pending" => Verdict::Pending,
            "AC" => Verdict::Accepted,
            "WA" => Verdict::WrongAnswer,
            "TLE" => Verdict::TimeLimitExceeded,
            "MLE" => Verdict::MemoryLimitExceeded,
            "RE" => Verdict::RuntimeError,
            "CE" => Verdict::CompileError,
            "IE" => Verdict::InternalError,
            _ => return None,
        })
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Verdict::Pending | Verdict::Skipped)
    }

    pub fn is_accepted(self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

impl Serialize for Verdict {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.wire_code())
    }
}

impl<'de> Deserialize<'de> for Verdict {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Verdict::from_wire_code(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown verdict code: {s}")))
    }
}

/// Message body for the inbound `judge.submissions` queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeRequest {
    pub submission_id: i64,
    pub user_id: i64,
    pub problem_id: i64,
    pub language: String,
    pub code_url: String,
    pub time_limit_ms: u32,
    pub memory_limit_kb: u32,
    #[serde(default)]
    pub priority: i32,
}

/// A test case as resolved from the catalog client (§4.5). The wire field
/// names (`time_limit`, `memory_limit`) are the catalog's; this crate's
/// fields carry their unit suffix since every call site needs it spelled
/// out (ms/kb), so the rename only happens at the serde boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub id: i64,
    pub input_url: String,
    pub output_url: String,
    #[serde(default)]
    pub is_sample: bool,
    #[serde(rename = "time_limit")]
    pub time_limit_ms: u32,
    #[serde(rename = "memory_limit")]
    pub memory_limit_kb: u32,
    #[serde(default)]
    pub checker_url: Option<String>,
}

/// One persisted row in `submission_test_results`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub submission_id: i64,
    pub test_case_id: i64,
    pub test_number: u32,
    pub verdict: Verdict,
    pub execution_time_ms: Option<u32>,
    pub memory_used_kb: Option<u32>,
    #[serde(default)]
    pub checker_output: Option<String>,
}

/// The judged outcome for a whole submission, as persisted and emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgedSubmission {
    pub submission_id: i64,
    pub verdict: Verdict,
    pub execution_time_ms: Option<u32>,
    pub memory_used_kb: Option<u32>,
    pub test_cases_passed: u32,
    pub test_cases_total: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compile_output: Option<String>,
}

/// Outbound `judge.events` payload for a finished submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionJudged {
    pub submission_id: i64,
    pub verdict: Verdict,
    pub execution_time_ms: Option<u32>,
    pub memory_used_kb: Option<u32>,
    pub test_cases_passed: u32,
    pub test_cases_total: u32,
}

impl From<&JudgedSubmission> for SubmissionJudged {
    fn from(j: &JudgedSubmission) -> Self {
        Self {
            submission_id: j.submission_id,
            verdict: j.verdict,
            execution_time_ms: j.execution_time_ms,
            memory_used_kb: j.memory_used_kb,
            test_cases_passed: j.test_cases_passed,
            test_cases_total: j.test_cases_total,
        }
    }
}

/// Outbound event when compilation itself fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionCompilationFailed {
    pub submission_id: i64,
    pub language: String,
    pub error_message: String,
}

/// Fire-and-forget handoff to the (out-of-scope) plagiarism detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlagiarismCheckRequested {
    pub submission_id: i64,
    pub problem_id: i64,
}

/// Status of one logical worker, as tracked in the `judge_workers` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Recovering,
    Failed,
}

/// A message that has been routed to the dead-letter queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryableEnvelope {
    pub request: JudgeRequest,
    pub retry_count: u32,
    pub original_queue: String,
    pub last_error: String,
    pub first_failed_unix_ms: i64,
    pub last_retry_unix_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_code_round_trips_closed_set() {
        for code in ["pending", "AC", "WA", "TLE", "MLE", "RE", "CE", "IE"] {
            let v = Verdict::from_wire_code(code).expect("known code parses");
            assert_eq!(v.wire_code(), code);
        }
    }

    #[test]
    fn rejects_codes_outside_closed_set() {
        assert!(Verdict::from_wire_code("AC ").is_none());
        assert!(Verdict::from_wire_code("accepted").is_none());
        assert!(Verdict::from_wire_code("").is_none());
    }

    #[test]
    fn presentation_error_and_checker_fail_fold_onto_wire() {
        assert_eq!(Verdict::PresentationError.wire_code(), "WA");
        assert_eq!(Verdict::CheckerFail.wire_code(), "IE");
    }

    #[test]
    fn serde_json_uses_wire_codes() {
        let json = serde_json::to_string(&Verdict::Accepted).unwrap();
        assert_eq!(json, "\"AC\"");
        let err = serde_json::from_str::<Verdict>("\"nonsense\"");
        assert!(err.is_err());
    }
}
