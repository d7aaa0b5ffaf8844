/// Maximum length for response bodies quoted in error messages
const MAX_BODY_LENGTH: usize = 500;

/// Number of leading characters of a token shown in logs
const FINGERPRINT_PREFIX: usize = 6;

/// Render a secret as a short, log-safe fingerprint.
///
/// Only the first few characters and the total length are shown, enough to
/// tell two tokens apart in a log without leaking either of them.
pub fn fingerprint(secret: &str) -> String {
    if secret.is_empty() {
        return "<empty>".to_string();
    }
    let prefix: String = secret.chars().take(FINGERPRINT_PREFIX).collect();
    format!("{}…({} chars)", prefix, secret.chars().count())
}

/// Truncate a response body to avoid logging excessive data
pub fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}
