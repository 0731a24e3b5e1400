//! Parsing for isolate's `--meta` file: one `key:value` pair per line,
//! documented in `man isolate`. We only need the fields the worker uses to
//! tell success from TLE/MLE/RE/crash.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolateStatus {
    /// No `status` line: the program ran to completion.
    Ok,
    /// `status:RE` - exited with a nonzero code.
    RuntimeError,
    /// `status:SG` - killed by a signal.
    Signalled,
    /// `status:TO` - hit the time or wall-time limit.
    TimeOut,
    /// `status:XX` - isolate itself failed (not the program's fault).
    InternalError,
}

impl IsolateStatus {
    fn from_code(code: &str) -> Self {
        match code {
            "RE" => IsolateStatus::RuntimeError,
            "SG" => IsolateStatus::Signalled,
            "TO" => IsolateStatus::TimeOut,
            "XX" => IsolateStatus::InternalError,
            _ => IsolateStatus::Ok,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IsolateMeta {
    pub status: IsolateStatus,
    pub exit_code: i32,
    pub exit_signal: Option<i32>,
    pub time_ms: u32,
    pub wall_time_ms: u32,
    pub memory_kb: u32,
    pub message: Option<String>,
}

impl Default for IsolateMeta {
    fn default() -> Self {
        Self {
            status: IsolateStatus::Ok,
            exit_code: 0,
            exit_signal: None,
            time_ms: 0,
            wall_time_ms: 0,
            memory_kb: 0,
            message: None,
        }
    }
}

/// Parse the contents of an isolate meta file. Missing or malformed fields
/// fall back to defaults rather than erroring - a truncated meta file
/// (e.g. isolate itself got killed) still needs to report *something*.
pub fn parse_meta(content: &str) -> IsolateMeta {
    let mut meta = IsolateMeta::default();
    let mut cg_mem_kb: Option<u32> = None;
    let mut max_rss_kb: Option<u32> = None;

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else { continue };
        match key {
            "status" => meta.status = IsolateStatus::from_code(value),
            "exitcode" => meta.exit_code = value.parse().unwrap_or(0),
            "exitsig" => meta.exit_signal = value.parse().ok(),
            "time" => meta.time_ms = parse_seconds_to_ms(value),
            "time-wall" => meta.wall_time_ms = parse_seconds_to_ms(value),
            "cg-mem" => cg_mem_kb = value.parse().ok(),
            "max-rss" => max_rss_kb = value.parse().ok(),
            "message" => meta.message = Some(value.to_string()),
            _ => {}
        }
    }

    // cg-mem (cgroup accounting) is the more reliable figure when
    // available; max-rss is the fallback for non-cgroup runs.
    meta.memory_kb = cg_mem_kb.or(max_rss_kb).unwrap_or(0);

    meta
}

fn parse_seconds_to_ms(value: &str) -> u32 {
    value.parse::<f64>().map(|secs| (secs * 1000.0).round() as u32).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_run() {
        let meta = parse_meta("time:0.042\ntime-wall:0.050\nmax-rss:4096\nexitcode:0\n");
        assert_eq!(meta.status, IsolateStatus::Ok);
        assert_eq!(meta.exit_code, 0);
        assert_eq!(meta.time_ms, 42);
        assert_eq!(meta.memory_kb, 4096);
    }

    #[test]
    fn parses_timeout() {
        let meta = parse_meta("status:TO\ntime:2.000\nmessage:Time limit exceeded\n");
        assert_eq!(meta.status, IsolateStatus::TimeOut);
        assert_eq!(meta.time_ms, 2000);
        assert_eq!(meta.message.as_deref(), Some("Time limit exceeded"));
    }

    #[test]
    fn prefers_cg_mem_over_max_rss() {
        let meta = parse_meta("cg-mem:8192\nmax-rss:4096\n");
        assert_eq!(meta.memory_kb, 8192);
    }

    #[test]
    fn signalled_process() {
        let meta = parse_meta("status:SG\nexitsig:11\n");
        assert_eq!(meta.status, IsolateStatus::Signalled);
        assert_eq!(meta.exit_signal, Some(11));
    }

    #[test]
    fn empty_content_defaults_to_ok() {
        let meta = parse_meta("");
        assert_eq!(meta.status, IsolateStatus::Ok);
        assert_eq!(meta.memory_kb, 0);
    }
}
