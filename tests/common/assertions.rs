//! Custom assertion macros
//!
//! Assertions over results, progress values and recorded events with
//! messages that say what was expected.

/// Assert that a result is ok and return the value
#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
    ($result:expr, $message:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("{}: {:?}", $message, e),
        }
    };
}

/// Assert that a result is an error, optionally of a given shape
#[macro_export]
macro_rules! assert_err {
    ($result:expr) => {
        assert!($result.is_err(), "Expected Err, got Ok");
    };
    ($result:expr, $pattern:pat) => {
        match $result {
            Err($pattern) => {}
            Ok(value) => panic!("Expected Err, got Ok: {:?}", value),
            Err(e) => panic!("Expected different error variant, got: {:?}", e),
        }
    };
}

/// Assert that a progress value lies in `[0, 100]`
#[macro_export]
macro_rules! assert_valid_progress {
    ($value:expr) => {
        let value: f64 = $value;
        assert!(
            (0.0..=100.0).contains(&value),
            "Progress {} is outside [0, 100]",
            value
        );
    };
}

/// Assert how many recorded events have a given type
#[macro_export]
macro_rules! assert_event_count {
    ($log:expr, $event_type:expr, $expected:expr) => {
        let actual = $log.count($event_type);
        assert_eq!(
            actual,
            $expected,
            "Expected {} {} event(s), saw {}: {:?}",
            $expected,
            $event_type,
            actual,
            $log.types()
        );
    };
}
