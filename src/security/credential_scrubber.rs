//! Credential scrubbing for error details and log lines.
//!
//! Two layers are applied: generic patterns for things that look like
//! credentials, and exact redaction of the secrets configured for a host
//! (SSH password or key passphrase, storage secret key).

use lazy_static::lazy_static;
use regex::Regex;

const REDACTED: &str = "<REDACTED>";

lazy_static! {
    /// Regex patterns for detecting credentials in free text
    static ref CREDENTIAL_PATTERNS: Vec<(Regex, &'static str)> = vec![
        // AWS Access Key ID
        (Regex::new(r"(?i)(aws[_-]?access[_-]?key[_-]?id|access[_-]?key[_-]?id)\s*[:=]\s*([A-Z0-9]{16,32})").unwrap(),
         "$1=<REDACTED_AWS_KEY>"),

        // AWS Secret Access Key
        (Regex::new(r"(?i)(aws[_-]?secret[_-]?access[_-]?key|secret[_-]?access[_-]?key|secret[_-]?key)\s*[:=]\s*([A-Za-z0-9/+=]{16,})").unwrap(),
         "$1=<REDACTED_AWS_SECRET>"),

        // Passwords and key passphrases
        (Regex::new(r"(?i)(password|passwd|passphrase|pwd)\s*[:=]\s*([^\s]+)").unwrap(),
         "$1=<REDACTED_PASSWORD>"),

        // Basic auth in URLs
        (Regex::new(r"(https?://)([^:/\s]+):([^@\s]+)@").unwrap(),
         "$1<REDACTED_USER>:<REDACTED_PASS>@"),
    ];
}

/// Scrub credential-looking substrings.
///
/// # Example
///
/// ```
/// use lime_collector::security::credential_scrubber::scrub_credentials;
///
/// let input = "Failed to connect with password=secret123";
/// let scrubbed = scrub_credentials(input);
/// assert_eq!(scrubbed, "Failed to connect with password=<REDACTED_PASSWORD>");
/// ```
pub fn scrub_credentials(input: &str) -> String {
    let mut result = input.to_string();

    for (pattern, replacement) in CREDENTIAL_PATTERNS.iter() {
        result = pattern.replace_all(&result, *replacement).to_string();
    }

    result
}

/// Replace every occurrence of the given secret values.
///
/// Empty secrets are ignored so they cannot blank out the whole message.
pub fn redact_secrets(input: &str, secrets: &[&str]) -> String {
    secrets
        .iter()
        .filter(|s| !s.is_empty())
        .fold(input.to_string(), |acc, secret| acc.replace(secret, REDACTED))
}

/// Format an error for logs and reports with credentials removed.
pub fn safe_error_message(error: &impl std::fmt::Display, secrets: &[&str]) -> String {
    scrub_credentials(&redact_secrets(&error.to_string(), secrets))
}
