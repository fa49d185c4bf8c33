//! CLI module for the Chtholly build and test driver
//!
//! ## Commands
//!
//! - `build` - Configure and build the compiler (skipped when already built)
//! - `run <file>` - Build, then run the compiler on a source file
//! - `test [path]` - Build, then run the golden-output suite
//! - `ctest` - Build, then run the project's native unit tests
//!
//! ## Modules
//!
//! - `commands` - build/run/ctest implementations
//! - `test_runner` - Golden suite entry point and reporters
//!
//! ## Design
//!
//! The CLI uses clap for argument parsing with derive macros.
//! Command functions return `CliResult<T>` instead of calling `process::exit`.
//! Only the top-level `run()` function handles errors and exits.

// Enforce explicit error handling - no panicking in production code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod commands;
pub mod test_runner;

use std::fmt;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::backend::ProcessRunner;
use crate::backend::project::{BuildConfig, CompilerOverrides};
use crate::version::HARNESS_VERSION;

// ============================================================================
// CLI Error handling
// ============================================================================

/// Exit code for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const FAILURE: ExitCode = ExitCode(1);
}

/// Error type for CLI operations.
///
/// Contains a user-facing message and an exit code. The CLI entry point
/// catches these errors, prints the message, and exits with the code.
#[derive(Debug)]
pub struct CliError {
    /// User-facing error message (already formatted for display)
    pub message: String,
    /// Exit code to return to the shell
    pub exit_code: ExitCode,
}

impl CliError {
    /// Create a new CLI error with a message and exit code.
    pub fn new(message: impl Into<String>, exit_code: ExitCode) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }

    /// Create a failure error (exit code 1).
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(message, ExitCode::FAILURE)
    }

    /// Create an error with a custom exit code.
    pub fn with_code(message: impl Into<String>, code: i32) -> Self {
        Self::new(message, ExitCode(code))
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

// ============================================================================
// Clap CLI definition
// ============================================================================

/// Build driver and golden-output test harness for the Chtholly compiler
#[derive(Parser, Debug)]
#[command(name = "chtholly-harness")]
#[command(version = HARNESS_VERSION)]
#[command(about = "Build the Chtholly compiler and run its golden-output tests", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub build: BuildArgs,

    /// Print each external command before running it
    #[arg(long, global = true)]
    pub echo: bool,
}

/// Options shared by every subcommand (they all build first).
#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// Project source directory (contains CMakeLists.txt)
    #[arg(long, value_name = "DIR", default_value = ".", global = true)]
    pub source_dir: PathBuf,

    /// Build output directory
    #[arg(long, value_name = "DIR", default_value = "build", global = true)]
    pub build_dir: PathBuf,

    /// Name of the compiler executable produced by the build
    #[arg(long, value_name = "NAME", default_value = "chtholly", global = true)]
    pub name: String,

    /// Configure and build even if the compiler already exists
    #[arg(long, global = true)]
    pub rebuild: bool,

    /// CMake generator (passed as -G)
    #[arg(long, value_name = "GENERATOR", global = true)]
    pub generator: Option<String>,

    /// CMAKE_BUILD_TYPE (Debug, Release, ...)
    #[arg(long, value_name = "TYPE", global = true)]
    pub build_type: Option<String>,

    /// Time limit for each build phase
    #[arg(long, value_name = "SECS", global = true)]
    pub build_timeout: Option<u64>,

    /// C compiler for the CMake build
    #[arg(long, env = "CC", global = true)]
    pub cc: Option<String>,

    /// C++ compiler for the CMake build
    #[arg(long, env = "CXX", global = true)]
    pub cxx: Option<String>,

    /// C compiler flags for the CMake build
    #[arg(long, env = "CFLAGS", allow_hyphen_values = true, global = true)]
    pub cflags: Option<String>,

    /// C++ compiler flags for the CMake build
    #[arg(long, env = "CXXFLAGS", allow_hyphen_values = true, global = true)]
    pub cxxflags: Option<String>,
}

impl BuildArgs {
    /// Resolve into the orchestrator's configuration.
    pub fn to_config(&self) -> BuildConfig {
        BuildConfig::new()
            .with_source_dir(&self.source_dir)
            .with_build_dir(&self.build_dir)
            .with_executable_name(&self.name)
            .with_force_rebuild(self.rebuild)
            .with_compilers(CompilerOverrides {
                cc: self.cc.clone(),
                cxx: self.cxx.clone(),
                cflags: self.cflags.clone(),
                cxxflags: self.cxxflags.clone(),
            })
            .with_generator(self.generator.clone())
            .with_build_type(self.build_type.clone())
            .with_timeout(self.build_timeout.map(Duration::from_secs))
    }
}

/// Output format of the golden suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ReportFormat {
    /// pytest-style console output
    #[default]
    Human,
    /// One JSON object per line
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Configure and build the compiler
    Build,

    /// Build, then run the compiler on a source file
    Run {
        /// Source file to compile
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Extra arguments passed to the compiler
        #[arg(last = true, value_name = "ARGS")]
        args: Vec<String>,
    },

    /// Build, then run the golden-output tests
    Test {
        /// Test directory or single test file
        #[arg(value_name = "PATH", default_value = "tests")]
        path: PathBuf,
        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
        /// Stop on first failure
        #[arg(short = 'x', long = "exitfirst")]
        stop_on_fail: bool,
        /// Only run tests whose name contains EXPR
        #[arg(short = 'k', value_name = "EXPR")]
        filter: Option<String>,
        /// Time limit for each generated program
        #[arg(long, value_name = "SECS", default_value_t = 10)]
        timeout: u64,
        /// Time limit for the compiler-under-test and native compile stages
        #[arg(long, value_name = "SECS")]
        stage_timeout: Option<u64>,
        /// Keep intermediate and executable files of passing tests too
        #[arg(long)]
        keep_artifacts: bool,
        /// Test source extension
        #[arg(long, value_name = "EXT", default_value = "cns")]
        ext: String,
        /// Directory for intermediate and executable files (default: <build-dir>/golden)
        #[arg(long, value_name = "DIR")]
        work_dir: Option<PathBuf>,
        /// C++ compiler for the intermediate output (default: $CXX or c++)
        #[arg(long, value_name = "PROGRAM")]
        native_cc: Option<PathBuf>,
        /// Flag for the native compiler (repeatable; default: $CXXFLAGS)
        #[arg(long = "native-flag", value_name = "FLAG", allow_hyphen_values = true)]
        native_flags: Vec<String>,
        /// Report format
        #[arg(long, value_enum, default_value_t = ReportFormat::Human)]
        format: ReportFormat,
    },

    /// Build, then run the native unit tests through ctest
    Ctest,
}

// ============================================================================
// CLI entry point
// ============================================================================

/// Main CLI entry point.
///
/// This is the only place where `process::exit` is called. All command
/// implementations return `CliResult` and errors are handled here.
pub fn run() {
    let cli = Cli::parse();

    match execute(cli) {
        Ok(exit_code) => {
            if exit_code.0 != 0 {
                process::exit(exit_code.0);
            }
        }
        Err(e) => {
            if !e.message.is_empty() {
                eprintln!("{}", e.message);
            }
            process::exit(e.exit_code.0);
        }
    }
}

/// Execute the CLI command and return result.
fn execute(cli: Cli) -> CliResult<ExitCode> {
    let runner = ProcessRunner::new(cli.echo);
    let config = cli.build.to_config();

    match cli.command {
        Command::Build => commands::build(&config, runner).map(|_| ExitCode::SUCCESS),
        Command::Run { file, args } => commands::run_file(&config, runner, &file, &args),
        Command::Ctest => commands::ctest(&config, runner),
        Command::Test {
            path,
            verbose,
            stop_on_fail,
            filter,
            timeout,
            stage_timeout,
            keep_artifacts,
            ext,
            work_dir,
            native_cc,
            native_flags,
            format,
        } => {
            let build = commands::build(&config, runner)?;
            let native_cc = native_cc
                .or_else(|| cli.build.cxx.as_ref().map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("c++"));
            let native_flags = if native_flags.is_empty() {
                cli.build
                    .cxxflags
                    .as_deref()
                    .map(|f| f.split_whitespace().map(str::to_string).collect())
                    .unwrap_or_default()
            } else {
                native_flags
            };
            let options = test_runner::TestRunOptions {
                path,
                extension: ext,
                work_dir: work_dir.unwrap_or_else(|| config.build_dir.join("golden")),
                filter,
                stop_on_fail,
                verbose,
                run_timeout: Duration::from_secs(timeout),
                stage_timeout: stage_timeout.map(Duration::from_secs),
                keep_artifacts,
                format,
            };
            test_runner::run_tests(&build.executable, &native_cc, native_flags, runner, &options)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
