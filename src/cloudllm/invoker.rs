//! The HTTP/SDK invoker executes one provider attempt and classifies its
//! outcome into the behavioral error taxonomy. The concrete request/response
//! shape is provider detail (`Compat::build_payload`/`parse_response`); this
//! module only owns "send this JSON body, get headers/status/body back" plus
//! the shared connection pool.

use crate::cloudllm::error::CoordinatorError;
use async_trait::async_trait;
use lazy_static::lazy_static;
use std::time::Duration;

lazy_static! {
    /// Shared, pre-tuned client reused across every provider attempt in the
    /// process. Matches the pool defaults in
    /// [`crate::cloudllm::config::CoordinatorConfig`].
    static ref SHARED_HTTP_CLIENT: reqwest::Client = reqwest::Client::builder()
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(10)
        .tcp_keepalive(Duration::from_secs(60))
        .timeout(Duration::from_secs(300))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .expect("failed to build shared HTTP client");
}

/// Returns the process-wide pooled client.
pub fn shared_http_client() -> &'static reqwest::Client {
    &SHARED_HTTP_CLIENT
}

/// Raw result of one provider attempt, before `Compat::parse_response` turns
/// it into an [`crate::cloudllm::model::LLMResponse`].
pub struct RawAttempt {
    pub status: u16,
    pub body: serde_json::Value,
    /// `None` for SDK-style providers that don't expose a status/body split.
    pub retry_words_matched: bool,
}

/// Sends one provider attempt and reports its raw status/body. The concrete
/// transport is swappable so the coordinator can be driven in tests against
/// hand-built fakes instead of a live network call (§10). `headers` carries
/// the resolved auth header (name, value) pairs; the invoker attaches them
/// verbatim and never inspects or logs them itself.
#[async_trait]
pub trait HttpInvoker: Send + Sync {
    async fn send(&self, url: &str, headers: &[(String, String)], payload: &serde_json::Value) -> Result<RawAttempt, CoordinatorError>;
}

/// Default [`HttpInvoker`] backed by the shared pooled `reqwest::Client`.
pub struct ReqwestInvoker;

#[async_trait]
impl HttpInvoker for ReqwestInvoker {
    async fn send(&self, url: &str, headers: &[(String, String)], payload: &serde_json::Value) -> Result<RawAttempt, CoordinatorError> {
        let mut request = shared_http_client().post(url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.json(payload).send().await?;
        let status = response.status().as_u16();
        let body: serde_json::Value = response.json().await.unwrap_or(serde_json::Value::Null);
        let retry_words_matched = matches_retry_words(&body, default_retry_words());
        Ok(RawAttempt { status, body, retry_words_matched })
    }
}

/// Classifies a raw HTTP outcome into the behavioral taxonomy (§7). `body`
/// is inspected for provider-specific phrase matches (`retry_words`) used to
/// detect rate limiting that doesn't use a 429 status.
pub fn classify(provider: &str, attempt: &RawAttempt) -> Option<CoordinatorError> {
    if attempt.status == 401 || attempt.status == 403 {
        return Some(CoordinatorError::Auth {
            provider: provider.to_string(),
            message: error_message(&attempt.body),
        });
    }
    if attempt.status == 429 || attempt.retry_words_matched {
        return Some(CoordinatorError::RateLimit {
            provider: provider.to_string(),
            message: error_message(&attempt.body),
        });
    }
    if attempt.status >= 500 {
        return Some(CoordinatorError::Transient {
            provider: provider.to_string(),
            message: error_message(&attempt.body),
        });
    }
    None
}

fn error_message(body: &serde_json::Value) -> String {
    body.get("error")
        .and_then(|e| e.get("message").or(Some(e)))
        .and_then(|m| m.as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

/// Default retry-word list used when a provider plugin manifest supplies
/// none: phrases observed in provider error bodies that indicate rate
/// limiting even when the HTTP status itself is not 429.
pub fn default_retry_words() -> &'static [&'static str] {
    &["rate limit", "too many requests", "quota exceeded", "overloaded"]
}

/// Whether any of `words` appears (case-insensitively) in `body`'s textual form.
pub fn matches_retry_words(body: &serde_json::Value, words: &[&str]) -> bool {
    let haystack = body.to_string().to_lowercase();
    words.iter().any(|w| haystack.contains(&w.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_401_as_auth() {
        let attempt = RawAttempt { status: 401, body: serde_json::json!({"error": {"message": "no key"}}), retry_words_matched: false };
        let err = classify("openai", &attempt).unwrap();
        assert!(matches!(err, CoordinatorError::Auth { .. }));
    }

    #[test]
    fn classifies_429_as_rate_limit() {
        let attempt = RawAttempt { status: 429, body: serde_json::json!({}), retry_words_matched: false };
        let err = classify("anthropic", &attempt).unwrap();
        assert!(matches!(err, CoordinatorError::RateLimit { .. }));
    }

    #[test]
    fn classifies_5xx_as_transient() {
        let attempt = RawAttempt { status: 503, body: serde_json::json!({}), retry_words_matched: false };
        let err = classify("google", &attempt).unwrap();
        assert!(matches!(err, CoordinatorError::Transient { .. }));
    }

    #[test]
    fn status_200_classifies_to_none() {
        let attempt = RawAttempt { status: 200, body: serde_json::json!({}), retry_words_matched: false };
        assert!(classify("openai", &attempt).is_none());
    }

    #[test]
    fn retry_word_match_without_429_status_is_rate_limit() {
        let body = serde_json::json!({"error": "You have exceeded your quota exceeded limit"});
        let matched = matches_retry_words(&body, default_retry_words());
        assert!(matched);
        let attempt = RawAttempt { status: 200, body, retry_words_matched: matched };
        let err = classify("openrouter", &attempt).unwrap();
        assert!(matches!(err, CoordinatorError::RateLimit { .. }));
    }
}
