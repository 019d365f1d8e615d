//! Security utilities.
//!
//! Error details end up in log files and in the batch summary, which are
//! often shared beyond the responder who ran the acquisition. Everything
//! recorded there passes through the credential scrubber first.

pub mod credential_scrubber;

pub use credential_scrubber::{redact_secrets, safe_error_message, scrub_credentials};
