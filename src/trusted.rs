//! Trusted (non-sandboxed) execution: compiling and running checkers and
//! validators, which are supplied by problem setters rather than
//! submitters and so don't need isolate's protection.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug)]
pub struct TrustedRunOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Run a trusted program directly, optionally feeding it stdin, under a
/// wall-clock timeout.
pub async fn run_trusted(
    program_path: &Path,
    args: &[&str],
    stdin_content: Option<&str>,
    timeout_secs: u64,
) -> Result<TrustedRunOutcome> {
    debug!("running trusted program: {:?} {:?}", program_path, args);

    let mut cmd = Command::new(program_path);
    cmd.args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().context("failed to spawn trusted program")?;

    if let Some(input) = stdin_content {
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes()).await?;
        }
    }

    let output = tokio::time::timeout(
        std::time::Duration::from_secs(timeout_secs),
        child.wait_with_output(),
    )
    .await
    .context("trusted program execution timed out")?
    .context("failed to wait for trusted program")?;

    Ok(TrustedRunOutcome {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Run a testlib.h-style checker: `checker <input> <output> <answer>`.
pub async fn run_checker_binary(
    checker_path: &Path,
    input_path: &Path,
    output_path: &Path,
    answer_path: &Path,
    timeout_secs: u64,
) -> Result<TrustedRunOutcome> {
    let args = [
        input_path.to_str().unwrap_or(""),
        output_path.to_str().unwrap_or(""),
        answer_path.to_str().unwrap_or(""),
    ];
    run_trusted(checker_path, &args, None, timeout_secs).await
}

#[derive(Debug)]
pub struct TrustedCompileResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Compile a checker/validator's C++ source with g++, outside the sandbox.
pub async fn compile_trusted_cpp(
    source_path: &Path,
    output_path: &Path,
    include_paths: &[&Path],
) -> Result<TrustedCompileResult> {
    let mut args = vec![
        "-O2".to_string(),
        "-std=c++17".to_string(),
        "-o".to_string(),
        output_path.to_str().unwrap_or("").to_string(),
        source_path.to_str().unwrap_or("").to_string(),
    ];

    for p in include_paths {
        args.push(format!("-I{}", p.to_str().unwrap_or("")));
    }

    debug!("compiling trusted c++ with args: {:?}", args);

    let output = Command::new("g++")
        .args(&args)
        .output()
        .await
        .context("failed to run g++")?;

    Ok(TrustedCompileResult {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}
