//! CLI command implementations
//!
//! All command functions return `CliResult<ExitCode>` instead of calling
//! `process::exit`. Error handling and exits happen in the top-level `run()`.

use std::path::Path;

use crate::backend::project::{BuildConfig, BuildError, BuildResult, CmakeTool, ProjectBuilder, has_cmake_lists};
use crate::backend::{Command, ExecutionStatus, ProcessRunner};

use super::{CliError, CliResult, ExitCode};

/// Ensure the compiler is built and report where it is.
pub fn build(config: &BuildConfig, runner: ProcessRunner) -> CliResult<BuildResult> {
    if !has_cmake_lists(&config.source_dir) {
        tracing::warn!(
            source_dir = %config.source_dir.display(),
            "no CMakeLists.txt in source directory; configure will likely fail"
        );
    }

    let result = ProjectBuilder::cmake(runner)
        .ensure_built(config)
        .map_err(build_error)?;

    if result.skipped {
        eprintln!("Compiler already built: {}", result.executable.display());
    } else {
        eprintln!("Built compiler: {}", result.executable.display());
    }
    Ok(result)
}

/// Build, then run the compiler on `file` with the terminal attached.
pub fn run_file(config: &BuildConfig, runner: ProcessRunner, file: &Path, args: &[String]) -> CliResult<ExitCode> {
    if !file.is_file() {
        return Err(CliError::failure(format!("Source file '{}' not found", file.display())));
    }
    let build = build(config, runner)?;
    let cmd = Command::new(&build.executable).arg(file).args(args);
    passthrough(runner, &cmd)
}

/// Build, then run `ctest` over the build tree.
pub fn ctest(config: &BuildConfig, runner: ProcessRunner) -> CliResult<ExitCode> {
    build(config, runner)?;
    passthrough(runner, &CmakeTool::ctest_command(config))
}

/// Run with inherited stdio and forward the child's exit code.
fn passthrough(runner: ProcessRunner, cmd: &Command) -> CliResult<ExitCode> {
    let result = runner.run_inherited(cmd);
    match (&result.status, result.exit_code) {
        (ExecutionStatus::Completed, Some(0)) => Ok(ExitCode::SUCCESS),
        (ExecutionStatus::Completed, Some(code)) => Err(CliError::with_code(
            format!("Command '{}' failed with exit code {}", cmd, code),
            code,
        )),
        _ => Err(CliError::failure(format!(
            "Command '{}' failed: {}",
            cmd,
            result.failure_reason().unwrap_or_default()
        ))),
    }
}

/// Render a build failure: captured log first, then the diagnostic.
fn build_error(err: BuildError) -> CliError {
    let mut message = String::new();
    if let Some(log) = err.log() {
        if !log.trim().is_empty() {
            message.push_str(log.trim_end());
            message.push_str("\n\n");
        }
    }
    message.push_str(&format!("{:?}", miette::Report::new(err)));
    CliError::failure(message)
}
