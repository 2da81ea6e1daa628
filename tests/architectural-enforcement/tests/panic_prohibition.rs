//! Integration Test: Panic Prohibition
//!
//! **Policy**: Production code propagates errors; it MUST NOT call `unwrap()`
//! or `expect()`. `unwrap_or`, `unwrap_or_else` and `unwrap_or_default` are
//! fine. Test modules are exempt.

use architectural_enforcement::scan;

#[test]
fn test_no_unwrap_or_expect_in_production_code() {
    let violations = scan(|_, _, code| code.contains(".unwrap()") || code.contains(".expect("));

    if !violations.is_empty() {
        eprintln!("\n❌ unwrap()/expect() found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        panic!(
            "\nFound {} unwrap/expect call(s) in production code. Propagate the error instead.",
            violations.len()
        );
    }
}
