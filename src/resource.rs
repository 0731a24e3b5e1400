//! Resource validator (§4.11): clamps a requested time/memory limit into the
//! worker's policy envelope, after applying the language's multiplier/bonus.

use tracing::warn;

use crate::config::Config;
use crate::languages::LanguageConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub time_limit_ms: u32,
    pub memory_limit_kb: u32,
}

const MIN_TIME_LIMIT_MS: u32 = 100;
const MIN_MEMORY_LIMIT_KB: u32 = 1024;

/// Clamp a (problem-declared or request-declared) limit pair into policy,
/// applying the language's time/memory bonus first so a bonus can still be
/// clamped down by the ceiling.
pub fn resolve_limits(
    cfg: &Config,
    lang: &LanguageConfig,
    requested_time_ms: u32,
    requested_memory_kb: u32,
) -> ResourceLimits {
    let base_time = if requested_time_ms == 0 {
        cfg.default_time_limit_ms
    } else {
        requested_time_ms
    };
    let base_memory = if requested_memory_kb == 0 {
        cfg.default_memory_limit_kb
    } else {
        requested_memory_kb
    };

    let adjusted_time = lang.calculate_time_limit(base_time);
    let adjusted_memory = lang.calculate_memory_limit(base_memory);

    ResourceLimits {
        time_limit_ms: clamp_with_log("time limit (ms)", adjusted_time, MIN_TIME_LIMIT_MS, cfg.max_time_limit_ms),
        memory_limit_kb: clamp_with_log(
            "memory limit (kb)",
            adjusted_memory,
            MIN_MEMORY_LIMIT_KB,
            cfg.max_memory_limit_kb,
        ),
    }
}

/// Per-test-case limits from the catalog take precedence over the
/// problem-level request when positive (§4.11).
pub fn resolve_test_case_limits(
    cfg: &Config,
    lang: &LanguageConfig,
    test_case: &crate::types::TestCase,
    fallback_time_ms: u32,
    fallback_memory_kb: u32,
) -> ResourceLimits {
    let time_ms = if test_case.time_limit_ms > 0 {
        test_case.time_limit_ms
    } else {
        fallback_time_ms
    };
    let memory_kb = if test_case.memory_limit_kb > 0 {
        test_case.memory_limit_kb
    } else {
        fallback_memory_kb
    };
    resolve_limits(cfg, lang, time_ms, memory_kb)
}

fn clamp_with_log(label: &str, value: u32, floor: u32, ceiling: u32) -> u32 {
    if value < floor {
        warn!("{} {} below floor {}, clamping up", label, value, floor);
        floor
    } else if value > ceiling {
        warn!("{} {} above ceiling {}, clamping down", label, value, ceiling);
        ceiling
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lang_no_bonus() -> LanguageConfig {
        LanguageConfig {
            source_file: "main.cpp".into(),
            compile_command: None,
            run_command: vec!["./main".into()],
            time_limit: None,
            memory_limit: None,
        }
    }

    #[test]
    fn clamps_above_ceiling() {
        let cfg = Config::from_env();
        let lang = lang_no_bonus();
        let limits = resolve_limits(&cfg, &lang, cfg.max_time_limit_ms + 1000, 1024);
        assert_eq!(limits.time_limit_ms, cfg.max_time_limit_ms);
    }

    #[test]
    fn clamps_below_floor() {
        let cfg = Config::from_env();
        let lang = lang_no_bonus();
        let limits = resolve_limits(&cfg, &lang, 1, 1);
        assert_eq!(limits.time_limit_ms, MIN_TIME_LIMIT_MS);
        assert_eq!(limits.memory_limit_kb, MIN_MEMORY_LIMIT_KB);
    }

    #[test]
    fn bonus_applies_before_clamp() {
        let cfg = Config::from_env();
        let mut lang = lang_no_bonus();
        lang.time_limit = Some((3, 2));
        let limits = resolve_limits(&cfg, &lang, 1000, 1024);
        assert_eq!(limits.time_limit_ms, 1000 * 3 + 2000);
    }

    #[test]
    fn test_case_limit_takes_precedence() {
        let cfg = Config::from_env();
        let lang = lang_no_bonus();
        let tc = crate::types::TestCase {
            id: 1,
            input_url: "x".into(),
            output_url: "y".into(),
            is_sample: false,
            time_limit_ms: 500,
            memory_limit_kb: 2048,
            checker_url: None,
        };
        let limits = resolve_test_case_limits(&cfg, &lang, &tc, 9999, 9999);
        assert_eq!(limits.time_limit_ms, 500);
        assert_eq!(limits.memory_limit_kb, 2048);
    }
}
