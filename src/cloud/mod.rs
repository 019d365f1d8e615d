//! Object-storage persistence for captured memory images.
//!
//! The pipeline persists images through the [`ObjectStore`] trait so that
//! the sink logic can be exercised without a bucket. [`s3::S3ObjectStore`]
//! is the rusoto-backed implementation.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌──────────────┐
//! │  Tunnel stream  │────▶│   ImageUpload   │────▶│  S3 Bucket   │
//! └─────────────────┘     │ (multipart,     │     └──────────────┘
//!                         │   part buffer)  │
//!                         └─────────────────┘
//! ```
//!
//! An upload is opened with [`ObjectStore::begin_upload`], fed through
//! `std::io::Write`, and finished with [`ImageUpload::complete`] or
//! discarded with [`ImageUpload::abort`].

use std::io::Write;

use anyhow::Result;

use crate::models::StorageCredentials;

/// S3 client construction
pub mod client;

/// rusoto-backed object store and multipart image upload
pub mod s3;

pub use s3::S3ObjectStore;

/// An in-progress upload of one image
pub trait ImageUpload: Write {
    /// `s3://bucket/key` style name for logs and reports
    fn target_name(&self) -> String;

    /// Bytes acknowledged by the store so far
    fn bytes_uploaded(&self) -> u64;

    /// Flush buffered data and finalize the object
    fn complete(self: Box<Self>) -> Result<()>;

    /// Discard the upload and any parts already stored
    fn abort(self: Box<Self>) -> Result<()>;
}

/// Object storage backend shared by all workers
pub trait ObjectStore: Send + Sync {
    /// Check whether ambient credentials can access `bucket`.
    ///
    /// Never fails: any error, including missing credentials, is `false`.
    fn probe_credentials(&self, bucket: &str, region: Option<&str>) -> bool;

    /// Start uploading an object of roughly `expected_size` bytes.
    /// `credentials` of `None` means ambient credentials from the environment.
    fn begin_upload(
        &self,
        bucket: &str,
        key: &str,
        region: Option<&str>,
        credentials: Option<&StorageCredentials>,
        expected_size: u64,
    ) -> Result<Box<dyn ImageUpload>>;
}
