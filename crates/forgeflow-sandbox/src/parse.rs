//! Test-count extraction from common runner summaries.

use regex::Regex;
use std::sync::LazyLock;

use forgeflow_utils::types::TestCounts;

static CARGO_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"test result: \w+\. (\d+) passed; (\d+) failed; (\d+) ignored")
        .expect("valid cargo regex")
});

static PYTEST_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^=+ (.+) in [\d.]+s.*=+\s*$").expect("valid pytest regex")
});

static PYTEST_COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+) (passed|failed|skipped|errors?|xfailed|xpassed)")
        .expect("valid pytest count regex")
});

static JEST_SUMMARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^Tests:\s+(.+)$").expect("valid jest regex"));

static JEST_COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+) (passed|failed|skipped|todo)").expect("valid jest count regex")
});

static GO_RESULT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*--- (PASS|FAIL|SKIP): ").expect("valid go regex")
});

/// Sum the summaries found in `output`. `None` when no runner format matched.
#[must_use]
pub fn parse_test_counts(output: &str) -> Option<TestCounts> {
    parse_cargo(output)
        .or_else(|| parse_pytest(output))
        .or_else(|| parse_jest(output))
        .or_else(|| parse_go(output))
}

fn num(s: &str) -> u32 {
    s.parse().unwrap_or(0)
}

fn parse_cargo(output: &str) -> Option<TestCounts> {
    let mut counts = TestCounts::default();
    let mut found = false;
    for caps in CARGO_SUMMARY.captures_iter(output) {
        found = true;
        counts.passed += num(&caps[1]);
        counts.failed += num(&caps[2]);
        counts.skipped += num(&caps[3]);
    }
    found.then_some(counts)
}

fn parse_pytest(output: &str) -> Option<TestCounts> {
    let summary = PYTEST_SUMMARY.captures_iter(output).last()?;
    let mut counts = TestCounts::default();
    let mut found = false;
    for caps in PYTEST_COUNT.captures_iter(&summary[1]) {
        found = true;
        let n = num(&caps[1]);
        match &caps[2] {
            "passed" | "xpassed" => counts.passed += n,
            "failed" | "error" | "errors" => counts.failed += n,
            _ => counts.skipped += n,
        }
    }
    found.then_some(counts)
}

fn parse_jest(output: &str) -> Option<TestCounts> {
    let summary = JEST_SUMMARY.captures_iter(output).last()?;
    let mut counts = TestCounts::default();
    let mut found = false;
    for caps in JEST_COUNT.captures_iter(&summary[1]) {
        found = true;
        let n = num(&caps[1]);
        match &caps[2] {
            "passed" => counts.passed += n,
            "failed" => counts.failed += n,
            _ => counts.skipped += n,
        }
    }
    found.then_some(counts)
}

fn parse_go(output: &str) -> Option<TestCounts> {
    let mut counts = TestCounts::default();
    let mut found = false;
    for caps in GO_RESULT.captures_iter(output) {
        found = true;
        match &caps[1] {
            "PASS" => counts.passed += 1,
            "FAIL" => counts.failed += 1,
            _ => counts.skipped += 1,
        }
    }
    found.then_some(counts)
}
