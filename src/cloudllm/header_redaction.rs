//! Masks secret-looking header values before a payload is formatted into a
//! log line (§6, §10). Applied unconditionally, not only when file logging
//! is active, so no code path can accidentally log an unredacted credential.

/// Masks `Bearer <token>` / `x-api-key: <token>` / `x-goog-api-key: <token>`
/// values down to `***<last4>` wherever they appear in `text`, case-
/// insensitively. Everything else passes through untouched.
pub fn redact(text: &str) -> String {
    let mut out = text.to_string();
    for marker in ["Bearer ", "x-api-key: ", "x-goog-api-key: "] {
        out = redact_marker(&out, marker);
    }
    out
}

fn redact_marker(text: &str, marker: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        match find_case_insensitive(rest, marker) {
            Some(idx) => {
                out.push_str(&rest[..idx + marker.len()]);
                let after = &rest[idx + marker.len()..];
                let token_end = after
                    .find(|c: char| c == '"' || c == '\'' || c == ' ' || c == '\\' || c == '\n')
                    .unwrap_or(after.len());
                let token = &after[..token_end];
                out.push_str(&mask(token));
                rest = &after[token_end..];
            }
            None => {
                out.push_str(rest);
                break;
            }
        }
    }
    out
}

fn mask(token: &str) -> String {
    if token.len() <= 4 {
        return "*".repeat(token.len());
    }
    format!("***{}", &token[token.len() - 4..])
}

fn find_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    haystack.to_ascii_lowercase().find(&needle.to_ascii_lowercase())
}
