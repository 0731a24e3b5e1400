//! Code validator (§4.2): a pre-compilation gate that rejects obviously
//! hostile submissions without running them. Distinct from the testcase
//! validation the catalog performs on problem setters' own fixtures — this
//! module only ever looks at submitted source.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

const MAX_SOURCE_BYTES: usize = 1024 * 1024;
const MAX_NON_PRINTABLE_RATIO: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub rule: &'static str,
    pub line: Option<u32>,
    pub severity: Severity,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub ok: bool,
    pub violations: Vec<Violation>,
}

struct Rule {
    name: &'static str,
    pattern: Regex,
    severity: Severity,
    description: &'static str,
    /// Only applies when the language matches one of these; empty = all languages.
    languages: &'static [&'static str],
}

struct RuleTable {
    rules: Vec<Rule>,
}

fn rule_table() -> &'static RuleTable {
    static TABLE: OnceLock<RuleTable> = OnceLock::new();
    TABLE.get_or_init(|| RuleTable {
        rules: vec![
            Rule {
                name: "forbidden_eval",
                pattern: Regex::new(r"\beval\s*\(").unwrap(),
                severity: Severity::Critical,
                description: "dynamic code evaluation is not allowed",
                languages: &[],
            },
            Rule {
                name: "forbidden_system_call",
                pattern: Regex::new(r"\bsystem\s*\(").unwrap(),
                severity: Severity::Critical,
                description: "direct shell invocation is not allowed",
                languages: &[],
            },
            Rule {
                name: "forbidden_html_script",
                pattern: Regex::new(r"(?i)<script[^>]*>").unwrap(),
                severity: Severity::Critical,
                description: "embedded script tag in source",
                languages: &[],
            },
            Rule {
                name: "sql_injection_pattern",
                pattern: Regex::new(r"(?i)(drop\s+table|union\s+select|;\s*--)").unwrap(),
                severity: Severity::Warning,
                description: "string resembling a SQL injection payload",
                languages: &[],
            },
            Rule {
                name: "path_traversal_pattern",
                pattern: Regex::new(r"\.\./\.\./").unwrap(),
                severity: Severity::Warning,
                description: "string resembling a path traversal payload",
                languages: &[],
            },
            Rule {
                name: "hardcoded_secret_pattern",
                pattern: Regex::new(r#"(?i)(api[_-]?key|secret|password)\s*=\s*["'][^"']{8,}["']"#).unwrap(),
                severity: Severity::Warning,
                description: "string resembling a hardcoded credential",
                languages: &[],
            },
            Rule {
                name: "python_subprocess_import",
                pattern: Regex::new(r"\bimport\s+subprocess\b").unwrap(),
                severity: Severity::Warning,
                description: "subprocess import in submitted python",
                languages: &["python"],
            },
            Rule {
                name: "java_runtime_exec",
                pattern: Regex::new(r"Runtime\s*\.\s*getRuntime\s*\(\s*\)\s*\.\s*exec\s*\(").unwrap(),
                severity: Severity::Critical,
                description: "Runtime.getRuntime().exec() in submitted java",
                languages: &["java"],
            },
        ],
    })
}

/// Validate submitted source. A single critical-severity violation rejects
/// the submission (caller maps this to verdict CE); non-critical
/// violations are reported but do not block execution.
pub fn validate(source: &[u8], language: &str) -> ValidationOutcome {
    let mut violations = Vec::new();

    if source.len() > MAX_SOURCE_BYTES {
        violations.push(Violation {
            rule: "max_size",
            line: None,
            severity: Severity::Critical,
            description: format!("source exceeds {} bytes", MAX_SOURCE_BYTES),
        });
        return ValidationOutcome { ok: false, violations };
    }

    let text = match std::str::from_utf8(source) {
        Ok(s) => s,
        Err(_) => {
            violations.push(Violation {
                rule: "invalid_utf8",
                line: None,
                severity: Severity::Critical,
                description: "source is not valid UTF-8".to_string(),
            });
            return ValidationOutcome { ok: false, violations };
        }
    };

    let non_printable = text.chars().filter(|c| c.is_control() && *c != '\n' && *c != '\t' && *c != '\r').count();
    if text.is_empty() {
        violations.push(Violation {
            rule: "empty_source",
            line: None,
            severity: Severity::Critical,
            description: "source is empty".to_string(),
        });
        return ValidationOutcome { ok: false, violations };
    }
    if (non_printable as f64 / text.chars().count() as f64) > MAX_NON_PRINTABLE_RATIO {
        violations.push(Violation {
            rule: "excess_non_printable",
            line: None,
            severity: Severity::Critical,
            description: "source contains too many non-printable bytes".to_string(),
        });
    }

    let lang = language.to_lowercase();
    for rule in &rule_table().rules {
        if !rule.languages.is_empty() && !rule.languages.contains(&lang.as_str()) {
            continue;
        }
        for (idx, line) in text.lines().enumerate() {
            if rule.pattern.is_match(line) {
                violations.push(Violation {
                    rule: rule.name,
                    line: Some(idx as u32 + 1),
                    severity: rule.severity,
                    description: rule.description.to_string(),
                });
            }
        }
    }

    let ok = !violations.iter().any(|v| v.severity == Severity::Critical);
    ValidationOutcome { ok, violations }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_code_passes() {
        let outcome = validate(b"print('hello world')", "python");
        assert!(outcome.ok);
        assert!(outcome.violations.is_empty());
    }

    #[test]
    fn system_call_is_critical() {
        let outcome = validate(b"system(\"rm -rf /\");", "cpp");
        assert!(!outcome.ok);
        assert_eq!(outcome.violations[0].severity, Severity::Critical);
    }

    #[test]
    fn oversized_source_rejected() {
        let source = vec![b'a'; MAX_SOURCE_BYTES + 1];
        let outcome = validate(&source, "cpp");
        assert!(!outcome.ok);
        assert_eq!(outcome.violations[0].rule, "max_size");
    }

    #[test]
    fn size_at_exactly_the_limit_is_accepted() {
        let source = vec![b'a'; MAX_SOURCE_BYTES];
        let outcome = validate(&source, "cpp");
        assert!(outcome.ok);
    }

    #[test]
    fn non_critical_violation_does_not_block() {
        let outcome = validate(b"x = \"api_key=\" + \"sk_live_abcdefgh\"", "python");
        assert!(outcome.ok);
        assert!(!outcome.violations.is_empty());
    }

    #[test]
    fn language_scoped_rule_only_applies_to_its_language() {
        let py = validate(b"import subprocess", "python");
        assert!(!py.violations.is_empty());
        let cpp = validate(b"import subprocess", "cpp");
        assert!(cpp.violations.is_empty());
    }
}
