//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT sleep to wait for events.
//! **Exceptions**: reconnection backoff and the ping-timeout timer, each marked
//! with a `// backoff` or `// timer:` comment right above the call.

use architectural_enforcement::{has_marker_above, scan};

const MARKERS: [&str; 2] = ["backoff", "timer:"];

/// Test that production code does not contain unmarked sleep calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan(|lines, idx, code| {
        let sleeps = code.contains("::sleep(")
            || code.contains(".sleep(")
            || code.contains("sleep_until(");
        sleeps && !has_marker_above(lines, idx, 3, &MARKERS)
    });

    if !violations.is_empty() {
        eprintln!("\n❌ Sleep calls found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ ACCEPTABLE sleep uses:");
        eprintln!("  - Exponential backoff between reconnection attempts (// backoff)");
        eprintln!("  - Deadline timers raced in select! (// timer: ...)");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - Sleep in polling loops");
        eprintln!("  - Sleep as poor man's synchronization");

        panic!(
            "\nFound {} sleep violation(s) in production code.",
            violations.len()
        );
    }
}

/// Blocking sleeps are never acceptable inside async code
#[test]
fn test_no_thread_sleep() {
    let violations = scan(|_, _, code| code.contains("thread::sleep("));
    assert!(
        violations.is_empty(),
        "std::thread::sleep in production code:\n{}",
        violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    );
}
