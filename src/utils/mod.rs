//! Utility functions for captured images and batch reporting.
//!
//! ## Components
//!
//! - **Hashing**: SHA-256 over the capture stream, with progress logging
//! - **Summary**: JSON batch report and per-host report lines
//!
//! ### Hashing a Stream
//!
//! ```
//! use lime_collector::utils::hash::HashingReader;
//! use std::io::Read;
//!
//! # fn example() -> std::io::Result<()> {
//! let mut reader = HashingReader::new(&b"image bytes"[..], "10.0.0.5", 11);
//! let mut sink = Vec::new();
//! reader.read_to_end(&mut sink)?;
//!
//! let (bytes, sha256) = reader.finish();
//! assert_eq!(bytes, 11);
//! assert_eq!(sha256.len(), 64);
//! # Ok(())
//! # }
//! ```

/// Batch summary generation and reporting
pub mod summary;

/// Streaming SHA-256 calculation
pub mod hash;
