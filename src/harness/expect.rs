//! Expectation extraction from `// expect:` annotations
//!
//! A golden test declares its expected stdout inline, one line per marker:
//!
//! ```text
//! print(1 + 2);      // expect: 3
//! print("hello");    // expect: hello
//! ```
//!
//! The expected output for this file is `"3\nhello\n"`.

use std::fs;
use std::path::Path;

/// Reserved inline-comment marker.
pub const EXPECT_MARKER: &str = "// expect:";

/// Collect expected output lines in file order.
///
/// Each line containing the marker contributes the text after its first
/// occurrence, trimmed. Other lines are ignored.
pub fn extract_expectations(source: &str) -> Vec<String> {
    source
        .lines()
        .filter_map(|line| {
            line.find(EXPECT_MARKER)
                .map(|pos| line[pos + EXPECT_MARKER.len()..].trim().to_string())
        })
        .collect()
}

/// Join expected lines into the text a passing program prints.
///
/// Every line is newline-terminated; no lines means no output.
pub fn expected_text(lines: &[String]) -> String {
    let mut text = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in lines {
        text.push_str(line);
        text.push('\n');
    }
    text
}

/// Read `path` and extract its expectations.
pub fn load_expectations(path: &Path) -> std::io::Result<Vec<String>> {
    let source = fs::read_to_string(path)?;
    Ok(extract_expectations(&source))
}
