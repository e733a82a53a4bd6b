//! Unified error taxonomy. Behavioral kinds, not raw provider error shapes.
//!
//! Loop-survivable failures (tool execution, MCP discovery) never surface as
//! [`CoordinatorError`] — they are materialized as messages in the working
//! history instead. Only loop-fatal conditions reach this type.

use std::fmt;

/// The behavioral error kinds a provider attempt can produce.
#[derive(Debug)]
pub enum CoordinatorError {
    /// 401, or a provider-reported missing/invalid API key.
    Auth { provider: String, message: String },
    /// 429, or a `retryWords` phrase match, after the retry schedule is exhausted.
    RateLimit { provider: String, message: String },
    /// 5xx, timeout, or stream interruption before the first chunk.
    Transient { provider: String, message: String },
    /// Response content is null after parsing, or the stream state machine
    /// cannot reconcile a tool-call block reference.
    BadResponse { provider: String, message: String },
    /// MCP server listing failed; always logged and swallowed by the caller,
    /// this variant exists so the listing function has a typed error to log.
    Discovery { server: String, message: String },
    /// A mid-stream interruption after at least one chunk has already been
    /// forwarded to the consumer.
    StreamInterrupted { provider: String, message: String },
    /// Catch-all for invoker-level failures that don't classify into the above.
    Other(String),
}

impl fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinatorError::Auth { provider, message } => {
                write!(f, "auth error from {}: {}", provider, message)
            }
            CoordinatorError::RateLimit { provider, message } => {
                write!(f, "rate limited by {}: {}", provider, message)
            }
            CoordinatorError::Transient { provider, message } => {
                write!(f, "transient error from {}: {}", provider, message)
            }
            CoordinatorError::BadResponse { provider, message } => {
                write!(f, "Malformed LLM response from {}: {}", provider, message)
            }
            CoordinatorError::Discovery { server, message } => {
                write!(f, "MCP discovery failed for {}: {}", server, message)
            }
            CoordinatorError::StreamInterrupted { provider, message } => {
                write!(f, "stream from {} interrupted: {}", provider, message)
            }
            CoordinatorError::Other(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for CoordinatorError {}

impl From<serde_json::Error> for CoordinatorError {
    fn from(e: serde_json::Error) -> Self {
        CoordinatorError::Other(format!("json error: {}", e))
    }
}

impl From<reqwest::Error> for CoordinatorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CoordinatorError::Transient {
                provider: "unknown".to_string(),
                message: e.to_string(),
            }
        } else {
            CoordinatorError::Other(e.to_string())
        }
    }
}

impl CoordinatorError {
    /// Whether this kind should advance to the next `(provider, model)` entry
    /// rather than abort the whole call. Per §7: only `BadResponse` is loop-fatal
    /// from within a single provider attempt's retry walk; everything else falls
    /// through to the next priority entry.
    pub fn falls_through(&self) -> bool {
        !matches!(self, CoordinatorError::BadResponse { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_response_does_not_fall_through() {
        let e = CoordinatorError::BadResponse {
            provider: "openai".to_string(),
            message: "content is null".to_string(),
        };
        assert!(!e.falls_through());
    }

    #[test]
    fn auth_error_falls_through() {
        let e = CoordinatorError::Auth {
            provider: "anthropic".to_string(),
            message: "missing key".to_string(),
        };
        assert!(e.falls_through());
    }

    #[test]
    fn display_includes_provider_and_message() {
        let e = CoordinatorError::RateLimit {
            provider: "google".to_string(),
            message: "429".to_string(),
        };
        let s = e.to_string();
        assert!(s.contains("google"));
        assert!(s.contains("429"));
    }
}
