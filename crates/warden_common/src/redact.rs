//! Redaction of secrets before anything reaches the ledger.

/// Maximum persisted command text length
const MAX_AUDIT_TEXT: usize = 1000;

/// Sanitize command text for the audit ledger: strip likely secrets and
/// truncate oversized input.
pub fn sanitize_for_ledger(text: &str) -> String {
    let mut sanitized = text.to_string();

    let secret_patterns = [
        (
            r"(?i)(password|passwd|pwd)\s*[=:]\s*\S+",
            "[REDACTED_PASSWORD]",
        ),
        (
            r"(?i)(api[_-]?key|apikey)\s*[=:]\s*\S+",
            "[REDACTED_API_KEY]",
        ),
        (r"(?i)(secret|token)\s*[=:]\s*\S+", "[REDACTED_SECRET]"),
        (r"(?i)(bearer)\s+\S+", "Bearer [REDACTED]"),
    ];

    for (pattern, replacement) in &secret_patterns {
        if let Ok(re) = regex::Regex::new(pattern) {
            sanitized = re.replace_all(&sanitized, *replacement).to_string();
        }
    }

    if sanitized.len() > MAX_AUDIT_TEXT {
        let cut = sanitized
            .char_indices()
            .take_while(|(i, _)| *i < MAX_AUDIT_TEXT)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(MAX_AUDIT_TEXT);
        sanitized = format!("{}... [truncated]", &sanitized[..cut]);
    }

    sanitized
}
