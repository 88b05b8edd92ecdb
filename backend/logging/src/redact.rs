//! Log Redaction Layer
//!
//! Scrubs API keys, bearer tokens, and credential pairs from strings prior to logging.

use regex::Regex;
use std::sync::LazyLock;

static API_KEY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(sk-[a-zA-Z0-9]{32,})|(Bearer\s+[a-zA-Z0-9\-\._~+/]+=*)").unwrap());
static PASSWORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"(?i)("?(?:password|passwd|pass|secret)"?\s*[:=]\s*)("[^"]*"|\S+)"#).unwrap());

/// Redacts sensitive patterns in a string.
pub fn redact_sensitive_data(input: &str) -> String {
    let redacted = API_KEY_RE.replace_all(input, "[REDACTED_TOKEN]");
    PASSWORD_RE
        .replace_all(&redacted, "${1}[REDACTED]")
        .to_string()
}
