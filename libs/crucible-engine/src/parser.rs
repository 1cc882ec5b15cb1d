//! Framework-specific parsing of captured sandbox output.
//!
//! The parser is total: whatever the sandbox printed (including nothing at
//! all), it returns a `ReportDetails` with unmatched fields left at zero.

use crucible_common::{Language, ReportDetails};
use once_cell::sync::Lazy;
use regex::Regex;

static PYTEST_COLLECTED: Lazy<Regex> = Lazy::new(|| Regex::new(r"collected (\d+) items?").unwrap());
static PYTEST_PASSED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+) passed").unwrap());
static PYTEST_FAILED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+) failed").unwrap());
static PYTEST_ERRORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+) error").unwrap());
static PYTEST_TIME: Lazy<Regex> = Lazy::new(|| Regex::new(r"in ([\d.]+)s").unwrap());

static JEST_PASSED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+) passed").unwrap());
static JEST_FAILED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+) failed").unwrap());
static JEST_TOTAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+) total").unwrap());
static JEST_TIME: Lazy<Regex> = Lazy::new(|| Regex::new(r"Time:\s+([\d.]+) s").unwrap());

fn capture_u32(re: &Regex, text: &str) -> Option<u32> {
    re.captures(text).and_then(|caps| caps[1].parse().ok())
}

fn capture_str<'t>(re: &Regex, text: &'t str) -> Option<&'t str> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Extract structured counts from the combined stdout/stderr of a run.
pub fn parse_output(language: Language, output: &str) -> ReportDetails {
    if language.is_module_based() {
        parse_jest(output)
    } else {
        parse_pytest(output)
    }
}

/// Pytest summary lines vary:
///   "======= 22 passed in 0.11s ======="
///   "======= 1 failed, 2 passed in 0.14s ======="
///
/// "collected N items" is kept as a fallback total for runs that crashed
/// before printing a completion summary (incomplete run: total with zero
/// passed).
fn parse_pytest(output: &str) -> ReportDetails {
    let mut details = ReportDetails::default();

    if let Some(collected) = capture_u32(&PYTEST_COLLECTED, output) {
        details.total = collected;
    }

    if let Some(passed) = capture_u32(&PYTEST_PASSED, output) {
        details.passed = passed;
    }
    if let Some(failed) = capture_u32(&PYTEST_FAILED, output) {
        details.failed = failed;
    }
    if let Some(errors) = capture_u32(&PYTEST_ERRORS, output) {
        details.errors = errors;
    }
    if let Some(time) = capture_str(&PYTEST_TIME, output) {
        details.duration = format!("{}s", time);
    }

    // Explicit pass/fail/error counts win over the collected-item count
    if details.passed > 0 || details.failed > 0 || details.errors > 0 {
        details.total = details
            .total
            .max(details.passed + details.failed + details.errors);
    }

    details
}

/// Jest summary: "Tests:       1 failed, 2 passed, 3 total"
///
/// Counts are taken from the "Tests:" line when one exists; the
/// "Test Suites:" line above it would otherwise shadow the real counts.
fn parse_jest(output: &str) -> ReportDetails {
    let mut details = ReportDetails::default();

    let summary = output
        .lines()
        .find(|line| line.trim_start().starts_with("Tests:"))
        .unwrap_or(output);

    if let Some(passed) = capture_u32(&JEST_PASSED, summary) {
        details.passed = passed;
    }
    if let Some(failed) = capture_u32(&JEST_FAILED, summary) {
        details.failed = failed;
    }
    if let Some(total) = capture_u32(&JEST_TOTAL, summary) {
        details.total = total;
    }
    if let Some(time) = capture_str(&JEST_TIME, output) {
        details.duration = format!("{}s", time);
    }

    details
}

#[cfg(test)]
mod tests {
    use super::*;

    const PYTEST_ALL_PASS: &str = "\
============================= test session starts ==============================
platform linux -- Python 3.11.4, pytest-7.4.0, pluggy-1.2.0
rootdir: /app
plugins: cov-4.1.0
collected 2 items

test_run.py ..                                                           [100%]

---------- coverage: platform linux, python 3.11.4-final-0 -----------
Coverage JSON written to file coverage.json

============================== 2 passed in 0.11s ===============================
";

    const PYTEST_MIXED: &str = "\
collected 4 items

test_run.py .F.E                                                         [100%]

=========================== short test summary info ============================
FAILED test_run.py::test_divide - assert 2 == 3
ERROR test_run.py::test_broken
==================== 1 failed, 2 passed, 1 error in 0.14s =====================
";

    const PYTEST_CRASHED: &str = "\
collected 5 items

test_run.py
Segmentation fault (core dumped)
";

    const JEST_MIXED: &str = "\
FAIL ./test_run.js
  calculator
    ✓ adds numbers (3 ms)
    ✕ divides by zero (5 ms)

Test Suites: 1 failed, 1 total
Tests:       1 failed, 2 passed, 3 total
Snapshots:   0 total
Time:        2.145 s
Ran all test suites.
";

    const JEST_ALL_PASS: &str = "\
PASS tests/run.test.js

Test Suites: 1 passed, 1 total
Tests:       4 passed, 4 total
Snapshots:   0 total
Time:        1.5 s
";

    #[test]
    fn test_pytest_all_pass() {
        let details = parse_output(Language::Python, PYTEST_ALL_PASS);
        assert_eq!(details.total, 2);
        assert_eq!(details.passed, 2);
        assert_eq!(details.failed, 0);
        assert_eq!(details.errors, 0);
        assert_eq!(details.duration, "0.11s");
    }

    #[test]
    fn test_pytest_mixed_counts() {
        let details = parse_output(Language::Python, PYTEST_MIXED);
        assert_eq!(details.total, 4);
        assert_eq!(details.passed, 2);
        assert_eq!(details.failed, 1);
        assert_eq!(details.errors, 1);
        assert_eq!(details.duration, "0.14s");
    }

    #[test]
    fn test_pytest_crashed_run_reports_collected_total() {
        // No completion summary: the collected count stands in as the total
        // and zero passed marks the run as incomplete.
        let details = parse_output(Language::Python, PYTEST_CRASHED);
        assert_eq!(details.total, 5);
        assert_eq!(details.passed, 0);
        assert_eq!(details.failed, 0);
        assert_eq!(details.duration, "");
    }

    #[test]
    fn test_jest_counts_come_from_tests_line_not_suites_line() {
        let details = parse_output(Language::JavaScript, JEST_MIXED);
        assert_eq!(details.total, 3);
        assert_eq!(details.passed, 2);
        assert_eq!(details.failed, 1);
        assert_eq!(details.duration, "2.145s");
    }

    #[test]
    fn test_jest_all_pass() {
        let details = parse_output(Language::TypeScript, JEST_ALL_PASS);
        assert_eq!(details.total, 4);
        assert_eq!(details.passed, 4);
        assert_eq!(details.failed, 0);
        assert_eq!(details.duration, "1.5s");
    }

    #[test]
    fn test_parser_is_total_on_empty_output() {
        assert_eq!(parse_output(Language::Python, ""), ReportDetails::default());
        assert_eq!(
            parse_output(Language::JavaScript, ""),
            ReportDetails::default()
        );
    }

    #[test]
    fn test_parser_is_total_on_garbage() {
        let garbage = "}{ totally unexpected ☃ output\nwith lines\n";
        assert_eq!(parse_output(Language::Python, garbage), ReportDetails::default());
        assert_eq!(
            parse_output(Language::TypeScript, garbage),
            ReportDetails::default()
        );
    }
}
