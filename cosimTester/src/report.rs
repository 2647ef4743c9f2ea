use std::time::Duration;

use crate::suite::SuiteReport;
use crate::types::TestStatus;

pub fn print_summary(report: &SuiteReport) {
    let total = report.reports.len();
    let elapsed = report
        .reports
        .iter()
        .map(|test| test.duration)
        .sum::<Duration>();

    for test in report.failures() {
        println!("\n--- {} ---", test.name);
        if let Some(kind) = test.error_kind {
            println!("kind: {}", kind.label());
        }
        if let Some(detail) = &test.detail {
            println!("detail: {detail}");
        }
        if let Some(output) = test.output.as_deref().filter(|output| !output.is_empty()) {
            println!("output:\n{}", output.trim_end());
        }
    }

    println!("\n--- summary ---");
    println!("tests: {total}");
    println!("passed: {}", report.passed());
    println!("failed: {}", report.failed());
    println!("time: {}", format_duration(elapsed));
    if report.all_passed() {
        println!("result: {}", TestStatus::Passed.label());
    } else {
        let names = report
            .failures()
            .map(|test| test.name.as_str())
            .collect::<Vec<_>>();
        println!("result: {} ({})", TestStatus::Failed.label(), names.join(", "));
    }
}

/// `250ms`, `4.250s`, or `2m05.500s` once a run passes a minute.
fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    let (minutes, rest) = (millis / 60_000, millis % 60_000);
    match (minutes, rest) {
        (0, rest) if rest < 1000 => format!("{rest}ms"),
        (0, rest) => format!("{}.{:03}s", rest / 1000, rest % 1000),
        (minutes, rest) => format!("{minutes}m{:02}.{:03}s", rest / 1000, rest % 1000),
    }
}
