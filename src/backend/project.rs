//! Build orchestrator - configures and builds the compiler with CMake
//!
//! Two phases, strictly in order:
//! - configure: `cmake -S <source> -B <build> [-G ..] [-DCMAKE_BUILD_TYPE=..]`
//! - compile: `cmake --build <build>`
//!
//! Both are skipped when the executable is already present and no rebuild
//! was requested. Presence is the whole staleness check; sources are not
//! compared against the artifact's timestamp.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

use super::locate::locate;
use super::process::{Command, ExecutionResult, ProcessRunner};

// ============================================================================
// Configuration
// ============================================================================

/// C/C++ toolchain overrides passed to CMake through the child environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompilerOverrides {
    pub cc: Option<String>,
    pub cxx: Option<String>,
    pub cflags: Option<String>,
    pub cxxflags: Option<String>,
}

impl CompilerOverrides {
    /// Attach the overrides that are set to `cmd`'s environment.
    pub fn apply(&self, mut cmd: Command) -> Command {
        let vars = [
            ("CC", &self.cc),
            ("CXX", &self.cxx),
            ("CFLAGS", &self.cflags),
            ("CXXFLAGS", &self.cxxflags),
        ];
        for (key, value) in vars {
            if let Some(value) = value {
                cmd = cmd.with_env(key, value.as_str());
            }
        }
        cmd
    }
}

/// Everything needed to build the compiler-under-test.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Project source directory (contains the top-level CMakeLists.txt)
    pub source_dir: PathBuf,
    /// Build output root
    pub build_dir: PathBuf,
    /// Logical executable name (e.g. `chtholly`)
    pub executable_name: String,
    /// Run both phases even when the executable already exists
    pub force_rebuild: bool,
    pub compilers: CompilerOverrides,
    /// CMake generator (`-G`)
    pub generator: Option<String>,
    /// `CMAKE_BUILD_TYPE`
    pub build_type: Option<String>,
    /// Deadline for each phase; build tools are unbounded by default
    pub timeout: Option<Duration>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("."),
            build_dir: PathBuf::from("build"),
            executable_name: "chtholly".to_string(),
            force_rebuild: false,
            compilers: CompilerOverrides::default(),
            generator: None,
            build_type: None,
            timeout: None,
        }
    }
}

impl BuildConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = dir.into();
        self
    }

    pub fn with_build_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.build_dir = dir.into();
        self
    }

    pub fn with_executable_name(mut self, name: impl Into<String>) -> Self {
        self.executable_name = name.into();
        self
    }

    pub fn with_force_rebuild(mut self, force: bool) -> Self {
        self.force_rebuild = force;
        self
    }

    pub fn with_compilers(mut self, compilers: CompilerOverrides) -> Self {
        self.compilers = compilers;
        self
    }

    pub fn with_generator(mut self, generator: Option<String>) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_build_type(mut self, build_type: Option<String>) -> Self {
        self.build_type = build_type;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

// ============================================================================
// Results and errors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    Configure,
    Compile,
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildPhase::Configure => write!(f, "configure"),
            BuildPhase::Compile => write!(f, "compile"),
        }
    }
}

/// Result of a successful [`ProjectBuilder::ensure_built`]
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub success: bool,
    /// Captured output of the phases that ran (empty when skipped)
    pub log: String,
    /// Located compiler executable
    pub executable: PathBuf,
    /// True when both phases were skipped because the executable existed
    pub skipped: bool,
}

/// Errors that abort the whole run: no tests can execute without a compiler.
#[derive(Debug, Error, Diagnostic)]
pub enum BuildError {
    #[error("{phase} phase failed: {reason}")]
    #[diagnostic(
        code(harness::build::phase_failed),
        help("the captured build log is shown above; fix the build and re-run")
    )]
    PhaseFailed {
        phase: BuildPhase,
        reason: String,
        log: String,
    },

    #[error("build reported success but no `{name}` executable was found under {}", .build_dir.display())]
    #[diagnostic(
        code(harness::build::artifact_missing),
        help("check the executable name (--name) against the CMake target")
    )]
    ArtifactMissing { name: String, build_dir: PathBuf },

    #[error("cannot create build directory {}: {source}", .path.display())]
    #[diagnostic(code(harness::build::io))]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl BuildError {
    /// Captured tool output, when the failure came from a phase.
    pub fn log(&self) -> Option<&str> {
        match self {
            BuildError::PhaseFailed { log, .. } => Some(log),
            _ => None,
        }
    }
}

// ============================================================================
// Build tool boundary
// ============================================================================

/// The external build system, one call per phase.
pub trait BuildTool {
    fn configure(&self, config: &BuildConfig) -> ExecutionResult;
    fn compile(&self, config: &BuildConfig) -> ExecutionResult;
}

/// CMake through the process runner.
#[derive(Debug, Clone, Copy, Default)]
pub struct CmakeTool {
    runner: ProcessRunner,
}

impl CmakeTool {
    pub fn new(runner: ProcessRunner) -> Self {
        Self { runner }
    }

    pub fn configure_command(config: &BuildConfig) -> Command {
        let mut cmd = Command::new("cmake")
            .arg("-S")
            .arg(&config.source_dir)
            .arg("-B")
            .arg(&config.build_dir);
        if let Some(generator) = &config.generator {
            cmd = cmd.arg("-G").arg(generator);
        }
        if let Some(build_type) = &config.build_type {
            cmd = cmd.arg(format!("-DCMAKE_BUILD_TYPE={}", build_type));
        }
        config.compilers.apply(cmd).with_timeout(config.timeout)
    }

    pub fn compile_command(config: &BuildConfig) -> Command {
        let cmd = Command::new("cmake").arg("--build").arg(&config.build_dir);
        config.compilers.apply(cmd).with_timeout(config.timeout)
    }

    /// `ctest` over the build tree (the project's own native unit tests).
    pub fn ctest_command(config: &BuildConfig) -> Command {
        Command::new("ctest")
            .arg("--test-dir")
            .arg(&config.build_dir)
            .arg("--output-on-failure")
    }
}

impl BuildTool for CmakeTool {
    fn configure(&self, config: &BuildConfig) -> ExecutionResult {
        self.runner.run(&Self::configure_command(config))
    }

    fn compile(&self, config: &BuildConfig) -> ExecutionResult {
        self.runner.run(&Self::compile_command(config))
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Drives the configure/compile phases and locates the result.
pub struct ProjectBuilder<T: BuildTool> {
    tool: T,
}

impl ProjectBuilder<CmakeTool> {
    pub fn cmake(runner: ProcessRunner) -> Self {
        Self::new(CmakeTool::new(runner))
    }
}

impl<T: BuildTool> ProjectBuilder<T> {
    pub fn new(tool: T) -> Self {
        Self { tool }
    }

    /// Make sure the compiler executable exists, building it if needed.
    #[tracing::instrument(skip_all, fields(build_dir = %config.build_dir.display(), force = config.force_rebuild))]
    pub fn ensure_built(&self, config: &BuildConfig) -> Result<BuildResult, BuildError> {
        if !config.force_rebuild {
            if let Some(executable) = locate(&config.build_dir, &config.executable_name) {
                tracing::info!(executable = %executable.display(), "compiler already built, skipping build");
                return Ok(BuildResult {
                    success: true,
                    log: String::new(),
                    executable,
                    skipped: true,
                });
            }
        }

        fs::create_dir_all(&config.build_dir).map_err(|source| BuildError::Io {
            path: config.build_dir.clone(),
            source,
        })?;

        let mut log = String::new();
        run_phase(BuildPhase::Configure, self.tool.configure(config), &mut log)?;
        run_phase(BuildPhase::Compile, self.tool.compile(config), &mut log)?;

        let executable = locate(&config.build_dir, &config.executable_name).ok_or_else(|| {
            BuildError::ArtifactMissing {
                name: config.executable_name.clone(),
                build_dir: config.build_dir.clone(),
            }
        })?;
        tracing::info!(executable = %executable.display(), "build finished");

        Ok(BuildResult {
            success: true,
            log,
            executable,
            skipped: false,
        })
    }
}

fn run_phase(phase: BuildPhase, result: ExecutionResult, log: &mut String) -> Result<(), BuildError> {
    tracing::info!(%phase, elapsed_ms = result.elapsed.as_millis() as u64, "phase finished");
    log.push_str(&result.combined_output());
    match result.failure_reason() {
        None => Ok(()),
        Some(reason) => Err(BuildError::PhaseFailed {
            phase,
            reason,
            log: log.clone(),
        }),
    }
}

/// True when `path` looks like a CMake source tree.
pub fn has_cmake_lists(path: &Path) -> bool {
    path.join("CMakeLists.txt").is_file()
}
