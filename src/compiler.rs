//! Compilation: user code inside the sandbox, and checker/validator C++
//! sources outside it (trusted, cached on disk per problem).

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::languages::LanguageConfig;
use crate::sandbox::{self, IoSpec, IsolateBox, Limits};
use crate::trusted::compile_trusted_cpp;

#[derive(Debug, Clone)]
pub struct CompileResult {
    pub success: bool,
    pub message: Option<String>,
}

/// Compile user-submitted code inside a one-shot isolate box. `source_dir`
/// must already contain the source file written under the language's
/// expected name; compiled artifacts are copied back into it.
pub async fn compile_user_code(
    box_id: u32,
    source_dir: &Path,
    lang: &LanguageConfig,
) -> Result<CompileResult> {
    let Some(compile_cmd) = &lang.compile_command else {
        return Ok(CompileResult { success: true, message: None });
    };

    let config = sandbox::get_config();
    compile_in_sandbox(
        box_id,
        source_dir,
        compile_cmd,
        config.compile_time_limit_ms,
        config.compile_memory_limit_mb,
    )
    .await
}

async fn compile_in_sandbox(
    box_id: u32,
    source_dir: &Path,
    compile_cmd: &[String],
    time_limit_ms: u32,
    memory_limit_mb: u32,
) -> Result<CompileResult> {
    let use_cgroups = sandbox::is_cgroups_available().await;
    if !use_cgroups {
        anyhow::bail!("cgroup support is required for compilation");
    }

    debug!("compiling {:?} in box {}", compile_cmd, box_id);

    let isolate_box = IsolateBox::new(box_id, use_cgroups).await?;
    isolate_box.copy_dir_in(source_dir).await?;

    let limits = Limits {
        time_ms: time_limit_ms,
        memory_mb: memory_limit_mb,
        processes: 10,
        open_files: 256,
        fsize_kb: 262_144,
    };
    let io = IoSpec::new()
        .with_stderr_file("compile_stderr.txt");
    let io = IoSpec { stdout_file: "compile_stdout.txt".to_string(), ..io };

    let command: Vec<String> = compile_cmd.to_vec();
    let outcome = isolate_box.run(&command, &limits, &io).await?;

    let success = sandbox::is_success(&outcome.meta);

    if success {
        let box_work_dir = isolate_box.work_dir();
        let mut entries = fs::read_dir(&box_work_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if metadata.is_dir() {
                continue;
            }
            let file_name = entry.file_name();
            if file_name == "compile_stdout.txt" || file_name == "compile_stderr.txt" {
                continue;
            }
            let dest = source_dir.join(&file_name);
            fs::copy(entry.path(), &dest).await?;
        }
    }

    isolate_box.cleanup().await?;

    if success {
        Ok(CompileResult { success: true, message: None })
    } else {
        let message = if !outcome.stderr.trim().is_empty() {
            outcome.stderr
        } else if sandbox::is_tle(&outcome.meta) {
            "compilation timed out".to_string()
        } else {
            format!("compilation failed (exit code {})", outcome.meta.exit_code)
        };
        Ok(CompileResult { success: false, message: Some(message) })
    }
}

/// Compiles and caches a trusted C++ binary (checker or validator) per
/// problem id, keyed by a hash of its source so a source change invalidates
/// the cache. Grounded on the teacher's `CheckerCompiler`/`ValidatorCompiler`.
pub struct TrustedBinaryCache {
    kind: &'static str,
    testlib_path: PathBuf,
    cache_dir: PathBuf,
}

impl TrustedBinaryCache {
    pub fn new(kind: &'static str, testlib_path: impl AsRef<Path>, cache_dir: impl AsRef<Path>) -> Self {
        Self {
            kind,
            testlib_path: testlib_path.as_ref().to_path_buf(),
            cache_dir: cache_dir.as_ref().to_path_buf(),
        }
    }

    pub async fn get_or_compile(&self, source_content: &str, problem_id: i64) -> Result<PathBuf> {
        let dir = self.cache_dir.join(format!("{}_{}", self.kind, problem_id));
        fs::create_dir_all(&dir).await?;

        let source_path = dir.join(format!("{}.cpp", self.kind));
        let binary_path = dir.join(self.kind);

        let need_compile = if binary_path.exists() && source_path.exists() {
            let cached = fs::read_to_string(&source_path).await.unwrap_or_default();
            cached != source_content
        } else {
            true
        };

        if need_compile {
            fs::write(&source_path, source_content).await?;
            info!("compiling {} for problem {}", self.kind, problem_id);
            let include_dir = self.testlib_path.parent().unwrap_or(Path::new("."));
            let result = compile_trusted_cpp(&source_path, &binary_path, &[include_dir])
                .await
                .with_context(|| format!("failed to compile {}", self.kind))?;
            if !result.success {
                anyhow::bail!("failed to compile {}: {}", self.kind, result.stderr);
            }
        }

        Ok(binary_path)
    }

    pub async fn clear_cache(&self, problem_id: i64) -> Result<()> {
        let dir = self.cache_dir.join(format!("{}_{}", self.kind, problem_id));
        if dir.exists() {
            fs::remove_dir_all(&dir).await?;
        }
        Ok(())
    }
}
