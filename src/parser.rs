//! Normalizes heterogeneous test-framework output into uniform counts.
//!
//! Test commands may come from pytest, jest, playwright, or an arbitrary
//! shell script. This module extracts pass/fail/error/skip counts and a
//! duration from raw output, trying framework-specific patterns in priority
//! order and taking the first one that recovers any count:
//!
//! 1. pytest combined summary — `10 passed, 1 failed, 1 error in 5.23s`
//! 2. jest totals — `Tests: 8 passed, 2 failed, 10 total`
//! 3. playwright — `5 passed (10.5s)`
//! 4. independent counters — `N passed` / `N failed` / `N errors` /
//!    `N skipped` / `in T s` matched separately
//!
//! When nothing matches, counts are inferred from the exit code alone and
//! the result carries [`ParseSource::Fallback`] so verdict logic can refuse
//! to trust the guessed numbers. Parsing never fails: malformed or binary
//! input at worst produces the fallback.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Where the counts in a [`TestCounts`] were recovered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseSource {
    /// pytest combined summary line.
    Pytest,
    /// jest `Tests:` totals line.
    Jest,
    /// playwright `N passed (T s)` line.
    Playwright,
    /// Independent counter phrases.
    Counters,
    /// Nothing recognized; counts inferred from the exit code.
    Fallback,
}

impl ParseSource {
    /// Returns `true` if the counts were guessed from the exit code.
    pub fn is_fallback(&self) -> bool {
        matches!(self, ParseSource::Fallback)
    }
}

/// Structured test counts extracted from raw output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCounts {
    /// Number of tests that passed.
    pub passed: u32,
    /// Number of tests that failed.
    pub failed: u32,
    /// Number of tests that errored (crashed, fixture failures).
    pub errors: u32,
    /// Number of tests that were skipped.
    pub skipped: u32,
    /// Reported duration in seconds, when the output included one.
    pub duration: f64,
    /// Provenance of these counts.
    pub source: ParseSource,
}

impl TestCounts {
    /// Total number of tests accounted for.
    pub fn total(&self) -> u32 {
        self.passed + self.failed + self.errors + self.skipped
    }
}

/// Extracts test counts from raw output, falling back to the exit code.
pub fn parse_test_output(output: &str, exit_code: i32) -> TestCounts {
    parse_pytest_summary(output)
        .or_else(|| parse_jest_totals(output))
        .or_else(|| parse_playwright(output))
        .or_else(|| parse_counters(output))
        .unwrap_or_else(|| fallback(exit_code))
}

/// pytest combined summary: `N passed, M failed, K error(s) in T s`.
fn parse_pytest_summary(output: &str) -> Option<TestCounts> {
    let re = Regex::new(r"(?i)(\d+) passed.*?(\d+) failed.*?(\d+) error.*?in ([\d.]+)s").unwrap();
    let caps = re.captures(output)?;

    let skipped = Regex::new(r"(\d+) skipped")
        .unwrap()
        .captures(output)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0);

    Some(TestCounts {
        passed: caps[1].parse().ok()?,
        failed: caps[2].parse().ok()?,
        errors: caps[3].parse().ok()?,
        skipped,
        duration: caps[4].parse().unwrap_or(0.0),
        source: ParseSource::Pytest,
    })
}

/// jest totals: `Tests: N passed, M failed, K total`.
fn parse_jest_totals(output: &str) -> Option<TestCounts> {
    let re = Regex::new(r"Tests:\s*(\d+) passed,\s*(\d+) failed,\s*(\d+) total").unwrap();
    let caps = re.captures(output)?;

    let duration = Regex::new(r"Time:\s*([\d.]+)\s*s")
        .unwrap()
        .captures(output)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0.0);

    Some(TestCounts {
        passed: caps[1].parse().ok()?,
        failed: caps[2].parse().ok()?,
        errors: 0,
        skipped: 0,
        duration,
        source: ParseSource::Jest,
    })
}

/// playwright: `N passed (T s)`.
fn parse_playwright(output: &str) -> Option<TestCounts> {
    let re = Regex::new(r"(\d+) passed.*?\(([\d.]+)s\)").unwrap();
    let caps = re.captures(output)?;

    let failed = Regex::new(r"(\d+) failed")
        .unwrap()
        .captures(output)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0);

    Some(TestCounts {
        passed: caps[1].parse().ok()?,
        failed,
        errors: 0,
        skipped: 0,
        duration: caps[2].parse().unwrap_or(0.0),
        source: ParseSource::Playwright,
    })
}

/// Independent counter phrases, each matched on its own.
///
/// Returns `None` unless at least one counter phrase was present.
fn parse_counters(output: &str) -> Option<TestCounts> {
    let mut counts = TestCounts {
        passed: 0,
        failed: 0,
        errors: 0,
        skipped: 0,
        duration: 0.0,
        source: ParseSource::Counters,
    };
    let mut matched = false;

    let patterns: [(&str, fn(&mut TestCounts, u32)); 4] = [
        (r"(\d+) passed", |c, n| c.passed = n),
        (r"(\d+) failed", |c, n| c.failed = n),
        (r"(\d+) errors?", |c, n| c.errors = n),
        (r"(\d+) skipped", |c, n| c.skipped = n),
    ];

    for (pattern, assign) in patterns {
        if let Some(caps) = Regex::new(pattern).unwrap().captures(output) {
            if let Ok(n) = caps[1].parse() {
                assign(&mut counts, n);
                matched = true;
            }
        }
    }

    if let Some(caps) = Regex::new(r"in ([\d.]+)s").unwrap().captures(output) {
        counts.duration = caps[1].parse().unwrap_or(0.0);
    }

    matched.then_some(counts)
}

/// Exit-code inference when no pattern matched anything.
fn fallback(exit_code: i32) -> TestCounts {
    let (passed, failed) = if exit_code == 0 { (1, 0) } else { (0, 1) };
    TestCounts {
        passed,
        failed,
        errors: 0,
        skipped: 0,
        duration: 0.0,
        source: ParseSource::Fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pytest_summary() {
        let output = "\
============== test session starts ==============
collected 12 items

tests/test_example.py ...F..E....

============ 10 passed, 1 failed, 1 error in 5.23s ============";

        let counts = parse_test_output(output, 1);

        assert_eq!(counts.passed, 10);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.errors, 1);
        assert_eq!(counts.duration, 5.23);
        assert_eq!(counts.source, ParseSource::Pytest);
    }

    #[test]
    fn test_parse_combined_summary_ignores_surrounding_text() {
        let output = "noise before\n12 passed, 3 failed, 1 error in 4.5s\nnoise after";
        let counts = parse_test_output(output, 1);

        assert_eq!(counts.passed, 12);
        assert_eq!(counts.failed, 3);
        assert_eq!(counts.errors, 1);
        assert_eq!(counts.duration, 4.5);
    }

    #[test]
    fn test_parse_simple_passed() {
        let counts = parse_test_output("5 passed in 2.1s", 0);

        assert_eq!(counts.passed, 5);
        assert_eq!(counts.duration, 2.1);
        assert_eq!(counts.source, ParseSource::Counters);
    }

    #[test]
    fn test_parse_jest_output() {
        let output = "\
PASS src/tests/example.test.js
Tests: 8 passed, 2 failed, 10 total
Time: 3.456s";

        let counts = parse_test_output(output, 1);

        assert_eq!(counts.passed, 8);
        assert_eq!(counts.failed, 2);
        assert_eq!(counts.source, ParseSource::Jest);
    }

    #[test]
    fn test_parse_playwright_output() {
        let output = "Running 5 tests using 2 workers\n5 passed (10.5s)";
        let counts = parse_test_output(output, 0);

        assert_eq!(counts.passed, 5);
        assert_eq!(counts.duration, 10.5);
        assert_eq!(counts.source, ParseSource::Playwright);
    }

    #[test]
    fn test_parse_with_skipped() {
        let counts = parse_test_output("10 passed, 3 skipped in 5.0s", 0);

        assert_eq!(counts.passed, 10);
        assert_eq!(counts.skipped, 3);
        assert_eq!(counts.duration, 5.0);
    }

    #[test]
    fn test_fallback_on_success_exit() {
        let counts = parse_test_output("All checks completed", 0);

        assert_eq!(counts.passed, 1);
        assert_eq!(counts.failed, 0);
        assert!(counts.source.is_fallback());
    }

    #[test]
    fn test_fallback_on_failure_exit() {
        let counts = parse_test_output("Something went wrong", 1);

        assert_eq!(counts.passed, 0);
        assert_eq!(counts.failed, 1);
        assert!(counts.source.is_fallback());
    }

    #[test]
    fn test_empty_input_never_panics() {
        let counts = parse_test_output("", 0);
        assert!(counts.source.is_fallback());

        let counts = parse_test_output("\u{0}\u{1}\u{fffd} garbage", 7);
        assert_eq!(counts.failed, 1);
    }

    #[test]
    fn test_total() {
        let counts = parse_test_output("3 passed, 2 failed, 1 error in 1.0s", 1);
        assert_eq!(counts.total(), 6);
    }
}
