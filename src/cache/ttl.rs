//! TTL Policy
//!
//! Deterministic, side-effect-free mapping from a key and its tags to the
//! time-to-live used for the distributed tier.

use std::time::Duration;

/// TTL for entries tagged `static` (reference data)
pub const TTL_STATIC: Duration = Duration::from_secs(3600);
/// TTL for entries tagged `dynamic`
pub const TTL_DYNAMIC: Duration = Duration::from_secs(300);
/// TTL for search result keys
pub const TTL_SEARCH: Duration = Duration::from_secs(300);
/// TTL for user-scoped keys
pub const TTL_USER: Duration = Duration::from_secs(900);
/// Fallback TTL
pub const TTL_DEFAULT: Duration = Duration::from_secs(300);

/// Compute the time-to-live for a key and its tags
///
/// Tags win over key substrings; the first matching rule applies.
pub fn ttl_for(key: &str, tags: &[String]) -> Duration {
    if tags.iter().any(|t| t == "static") {
        return TTL_STATIC;
    }
    if tags.iter().any(|t| t == "dynamic") {
        return TTL_DYNAMIC;
    }
    if key.contains("search") {
        return TTL_SEARCH;
    }
    if key.contains("user") {
        return TTL_USER;
    }
    TTL_DEFAULT
}

// =============================================================================
// Tests
// =============================================================================
