#![forbid(unsafe_code)]
//! Chtholly build driver and golden-output test harness
//!
//! This crate builds the Chtholly compiler with CMake and validates it
//! against a corpus of annotated source files: each file is compiled to C++
//! by the compiler-under-test, compiled natively, executed, and its stdout
//! compared with the `// expect:` lines embedded in the source.
//!
//! ## Panic Policy
//!
//! - **Production code**: Use `Result` or status enums with `?` / `ok_or` / `map_err`. The `cli` module
//!   enforces `#![deny(clippy::unwrap_used)]`.
//!
//! - **Test code**: `.unwrap()` and `.expect()` are acceptable in tests.
//!
//! - **External failures**: a tool that is missing, exits nonzero or times out is a value
//!   ([`backend::ExecutionStatus`], [`harness::CaseStatus`]), never a panic.

pub mod backend;
pub mod cli;
pub mod harness;
pub mod version;

pub use backend::locate::locate;
pub use backend::process::{Command, ExecutionResult, ExecutionStatus, ProcessRunner};
pub use backend::project::{BuildConfig, BuildError, BuildResult, ProjectBuilder};
pub use harness::{Pipeline, SuiteOptions, SuiteReport, TestCase, TestOutcome, Toolchain, run_suite};
