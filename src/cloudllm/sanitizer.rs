//! Canonicalizes tool names for providers that restrict identifiers to
//! `[A-Za-z0-9_]`, and maintains the bidirectional canonical ↔ sanitized map
//! needed to translate a model's tool-call reply back into the tool
//! namespace the router knows about.

use std::collections::HashMap;
use std::fmt;

/// Raised when a second canonical name sanitizes to an already-registered form.
#[derive(Debug)]
pub struct SanitizerCollisionError {
    pub sanitized: String,
    pub existing_canonical: String,
    pub rejected_canonical: String,
}

impl fmt::Display for SanitizerCollisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tool name '{}' sanitizes to '{}', which is already registered for '{}'",
            self.rejected_canonical, self.sanitized, self.existing_canonical
        )
    }
}

impl std::error::Error for SanitizerCollisionError {}

/// Replaces every character outside `[A-Za-z0-9_]` with `_`. Case is preserved;
/// consecutive underscores are never collapsed.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Per-call bidirectional name map. Built fresh for each `run`/`runStream`
/// invocation so that registration order — and therefore collision
/// resolution — is scoped to one call.
#[derive(Debug, Default)]
pub struct NameSanitizer {
    sanitized_to_canonical: HashMap<String, String>,
}

impl NameSanitizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a canonical name. First registration wins; a later canonical
    /// name that sanitizes to an already-claimed form is rejected with a
    /// deterministic error rather than silently overriding the earlier one.
    pub fn register(&mut self, canonical: &str) -> Result<String, SanitizerCollisionError> {
        let sanitized = sanitize(canonical);
        match self.sanitized_to_canonical.get(&sanitized) {
            Some(existing) if existing != canonical => Err(SanitizerCollisionError {
                sanitized,
                existing_canonical: existing.clone(),
                rejected_canonical: canonical.to_string(),
            }),
            Some(_) => Ok(sanitized),
            None => {
                self.sanitized_to_canonical.insert(sanitized.clone(), canonical.to_string());
                Ok(sanitized)
            }
        }
    }

    /// Looks up the canonical name for a sanitized form the model handed back.
    pub fn canonical_of(&self, sanitized: &str) -> Option<&str> {
        self.sanitized_to_canonical.get(sanitized).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_non_identifier_characters() {
        assert_eq!(sanitize("weather.lookup"), "weather_lookup");
        assert_eq!(sanitize("user@domain"), "user_domain");
        assert_eq!(sanitize("already_ok_123"), "already_ok_123");
    }

    #[test]
    fn never_collapses_consecutive_underscores() {
        assert_eq!(sanitize("a..b"), "a__b");
    }

    #[test]
    fn preserves_case() {
        assert_eq!(sanitize("GetWeather"), "GetWeather");
    }

    #[test]
    fn round_trips_through_reverse_map() {
        let mut s = NameSanitizer::new();
        let sanitized = s.register("weather.lookup").unwrap();
        assert_eq!(s.canonical_of(&sanitized), Some("weather.lookup"));
    }

    #[test]
    fn first_canonical_wins_on_collision() {
        let mut s = NameSanitizer::new();
        s.register("a.b").unwrap();
        let err = s.register("a_b").unwrap_err();
        assert_eq!(err.existing_canonical, "a.b");
        assert_eq!(err.rejected_canonical, "a_b");
        assert!(err.to_string().contains("a.b"));
        // the first registration's mapping is untouched
        assert_eq!(s.canonical_of("a_b"), Some("a.b"));
    }

    #[test]
    fn re_registering_the_same_canonical_is_idempotent() {
        let mut s = NameSanitizer::new();
        let first = s.register("tool.one").unwrap();
        let second = s.register("tool.one").unwrap();
        assert_eq!(first, second);
    }
}
