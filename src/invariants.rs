//! Runtime invariant checks with a per-thread hit log.
//!
//! Session-graph code asserts its structural invariants through
//! [`check_invariant!`]; tests then use [`assert_checked`] to prove the
//! invariant was actually exercised by the scenario they drove.
//!
//! ```rust,ignore
//! check_invariant!(video_inputs <= 1, "Session holds at most one video input", "session");
//!
//! #[test]
//! fn contract_single_video_input() {
//!     // ... drive a device switch ...
//!     assert_checked("device switch", &["Session holds at most one video input"]);
//! }
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::thread_local;

thread_local! {
    static CHECKED: RefCell<HashMap<String, u64>> = RefCell::new(HashMap::new());
}

/// Check an invariant, record that it was evaluated, and panic if it fails.
#[macro_export]
macro_rules! check_invariant {
    ($condition:expr, $message:expr) => {
        $crate::invariants::__record_check($condition, $message, None)
    };
    ($condition:expr, $message:expr, $context:expr) => {
        $crate::invariants::__record_check($condition, $message, Some($context))
    };
}

#[doc(hidden)]
pub fn __record_check(condition: bool, message: &str, context: Option<&str>) {
    CHECKED.with(|log| {
        *log.borrow_mut().entry(message.to_string()).or_insert(0) += 1;
    });

    if !condition {
        panic!(
            "INVARIANT VIOLATION [{}]: {}",
            context.unwrap_or("unknown"),
            message
        );
    }
}

/// Number of times `message` was checked on this thread.
pub fn times_checked(message: &str) -> u64 {
    CHECKED.with(|log| log.borrow().get(message).copied().unwrap_or(0))
}

/// Panic unless every invariant in `required` was checked on this thread.
pub fn assert_checked(scenario: &str, required: &[&str]) {
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|message| times_checked(message) == 0)
        .collect();

    if !missing.is_empty() {
        panic!(
            "CONTRACT FAILURE [{}]: invariants never checked:\n  - {}",
            scenario,
            missing.join("\n  - ")
        );
    }
}

pub fn clear_checks() {
    CHECKED.with(|log| log.borrow_mut().clear());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checks_are_counted() {
        clear_checks();
        check_invariant!(true, "counted invariant");
        check_invariant!(true, "counted invariant", "tests");
        assert_eq!(times_checked("counted invariant"), 2);
        assert_checked("counting", &["counted invariant"]);
    }

    #[test]
    #[should_panic(expected = "INVARIANT VIOLATION [tests]")]
    fn test_violation_panics() {
        check_invariant!(false, "always fails", "tests");
    }

    #[test]
    #[should_panic(expected = "CONTRACT FAILURE")]
    fn test_missing_check_fails_contract() {
        clear_checks();
        assert_checked("nothing ran", &["never evaluated"]);
    }
}
