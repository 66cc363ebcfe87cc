//! Environment variable helpers for `RESTFUZZ_*` overrides.
//!
//! ```
//! use restfuzz_types::env_utils::{env_bool, env_var_or};
//!
//! let workers: usize = env_var_or("RESTFUZZ_WORKERS", 4);
//! let schema_violations = env_bool("RESTFUZZ_ALLOW_SCHEMA_VIOLATIONS");
//! # let _ = (workers, schema_violations);
//! ```

use std::str::FromStr;

fn is_truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Parsed value of `key`, or `None` when unset or unparseable.
pub fn env_var<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

pub fn env_var_or<T: FromStr>(key: &str, default: T) -> T {
    env_var(key).unwrap_or(default)
}

/// `true` for `1`, `true`, `yes` or `on` (any case).
pub fn env_bool(key: &str) -> bool {
    env_bool_or(key, false)
}

pub fn env_bool_or(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| is_truthy(&v))
        .unwrap_or(default)
}

/// Comma-separated list with blank entries dropped.
///
/// `RESTFUZZ_HEADERS="Authorization: Bearer x, X-Tenant: 7"` yields two entries,
/// so entries cannot themselves contain commas.
pub fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_parsing() {
        std::env::set_var("RESTFUZZ_TEST_ITERATIONS", " 250 ");
        let val: Option<u64> = env_var("RESTFUZZ_TEST_ITERATIONS");
        assert_eq!(val, Some(250));
        let bad: Option<u64> = env_var("RESTFUZZ_TEST_MISSING_A");
        assert_eq!(bad, None);
        assert_eq!(env_var_or("RESTFUZZ_TEST_MISSING_A", 7u32), 7);
        std::env::remove_var("RESTFUZZ_TEST_ITERATIONS");
    }

    #[test]
    fn test_env_bool_variants() {
        std::env::set_var("RESTFUZZ_TEST_FLAG_ON", "On");
        std::env::set_var("RESTFUZZ_TEST_FLAG_OFF", "0");
        assert!(env_bool("RESTFUZZ_TEST_FLAG_ON"));
        assert!(!env_bool("RESTFUZZ_TEST_FLAG_OFF"));
        assert!(!env_bool("RESTFUZZ_TEST_MISSING_B"));
        assert!(env_bool_or("RESTFUZZ_TEST_MISSING_B", true));
        assert!(!env_bool_or("RESTFUZZ_TEST_FLAG_OFF", true));
        std::env::remove_var("RESTFUZZ_TEST_FLAG_ON");
        std::env::remove_var("RESTFUZZ_TEST_FLAG_OFF");
    }

    #[test]
    fn test_env_list() {
        std::env::set_var("RESTFUZZ_TEST_LIST", "a, ,b,");
        assert_eq!(env_list("RESTFUZZ_TEST_LIST"), vec!["a", "b"]);
        assert!(env_list("RESTFUZZ_TEST_MISSING_C").is_empty());
        std::env::remove_var("RESTFUZZ_TEST_LIST");
    }
}
