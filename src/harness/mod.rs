//! Golden-output test harness
//!
//! A golden test is a source file whose expected stdout is embedded as
//! `// expect:` comments. Each case is compiled by the compiler-under-test,
//! the intermediate C++ is compiled natively, and the program's stdout is
//! compared with the expectation.
//!
//! ## Modules
//!
//! - `expect` - Expectation extraction from annotations
//! - `pipeline` - Per-case compile → recompile → execute → compare
//! - `suite` - Discovery, aggregation and the reporter boundary

pub mod expect;
pub mod pipeline;
pub mod suite;

pub use expect::{extract_expectations, expected_text};
pub use pipeline::{CaseStatus, Pipeline, TestCase, TestOutcome, Toolchain};
pub use suite::{SuiteOptions, SuiteReport, TestError, TestReporter, discover_test_files, run_suite};
