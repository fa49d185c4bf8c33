//! Build backend
//!
//! Everything that touches external tools:
//! 1. `process` runs a command with captured output and an optional deadline
//! 2. `project` configures and builds the compiler with CMake
//! 3. `locate` finds the built executable in the build tree
//!
//! ## Module Organization
//!
//! - `process.rs` - Process runner and execution results
//! - `locate.rs` - Artifact locator
//! - `project.rs` - Build orchestrator

pub mod locate;
pub mod process;
pub mod project;

pub use locate::locate;
pub use process::{Command, ExecutionResult, ExecutionStatus, ProcessRunner};
pub use project::{BuildConfig, BuildError, BuildResult, CmakeTool, ProjectBuilder};
