use std::io;
use std::io::Write;
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use bytes::{Bytes, BytesMut};
use log::{debug, info, warn};
use rusoto_core::{ByteStream, RusotoError};
use rusoto_s3::{
    AbortMultipartUploadRequest, CompleteMultipartUploadRequest, CompletedMultipartUpload,
    CompletedPart, CreateMultipartUploadRequest, ListObjectsV2Request, S3Client, UploadPartRequest, S3,
};
use tokio::runtime::Runtime;

use crate::cloud::client::create_s3_client;
use crate::cloud::{ImageUpload, ObjectStore};
use crate::constants::{
    MAX_UPLOAD_RETRIES, RETRY_BASE_DELAY_MS, S3_MAX_PART_SIZE, S3_TARGET_PART_COUNT, S3_UPLOAD_CHUNK_SIZE,
};
use crate::models::StorageCredentials;

/// Size of each multipart part for an image of `expected_size` bytes.
///
/// Never below `S3_UPLOAD_CHUNK_SIZE`; large images get larger parts so the
/// upload stays within `S3_TARGET_PART_COUNT` parts.
pub fn part_size_for(expected_size: u64) -> usize {
    let scaled = expected_size / S3_TARGET_PART_COUNT + u64::from(expected_size % S3_TARGET_PART_COUNT != 0);
    scaled.clamp(S3_UPLOAD_CHUNK_SIZE as u64, S3_MAX_PART_SIZE) as usize
}

/// Amazon S3 object store.
///
/// Workers are plain threads, so every rusoto call is driven to completion
/// on the shared tokio runtime with `block_on`.
pub struct S3ObjectStore {
    runtime: Arc<Runtime>,
    default_region: Option<String>,
}

impl S3ObjectStore {
    /// Create a store using `runtime` for all requests.
    ///
    /// `default_region` applies when a sink decision carries no region.
    pub fn new(runtime: Arc<Runtime>, default_region: Option<&str>) -> Self {
        Self {
            runtime,
            default_region: default_region.map(String::from),
        }
    }

    fn client(&self, region: Option<&str>, credentials: Option<&StorageCredentials>) -> Result<Arc<S3Client>> {
        let _guard = self.runtime.enter();
        create_s3_client(region.or(self.default_region.as_deref()), credentials)
    }
}

impl ObjectStore for S3ObjectStore {
    fn probe_credentials(&self, bucket: &str, region: Option<&str>) -> bool {
        info!("bucket {} configured but no credentials supplied", bucket);
        info!("checking for aws credentials in environment");

        let client = match self.client(region, None) {
            Ok(client) => client,
            Err(e) => {
                warn!("failed to create S3 client for credential probe: {:#}", e);
                return false;
            }
        };

        let request = ListObjectsV2Request {
            bucket: bucket.to_string(),
            max_keys: Some(1),
            ..Default::default()
        };

        match self.runtime.block_on(client.list_objects_v2(request)) {
            Ok(_) => {
                info!("credentials found, proceeding");
                true
            }
            Err(RusotoError::Credentials(e)) => {
                info!("no credentials found ({}), falling back to file download", e);
                false
            }
            Err(e) => {
                warn!("credential probe against {} failed ({}), falling back to file download", bucket, e);
                false
            }
        }
    }

    fn begin_upload(
        &self,
        bucket: &str,
        key: &str,
        region: Option<&str>,
        credentials: Option<&StorageCredentials>,
        expected_size: u64,
    ) -> Result<Box<dyn ImageUpload>> {
        let client = self.client(region, credentials)?;

        let create_result = self.runtime
            .block_on(client.create_multipart_upload(CreateMultipartUploadRequest {
                bucket: bucket.to_string(),
                key: key.to_string(),
                ..Default::default()
            }))
            .context(format!("Failed to create multipart upload for s3://{}/{}", bucket, key))?;

        let upload_id = create_result.upload_id
            .ok_or_else(|| anyhow!("No upload ID returned from S3"))?;

        let part_size = part_size_for(expected_size);
        debug!("Started multipart upload with ID: {} for {} ({} byte parts)", upload_id, key, part_size);

        Ok(Box::new(S3ImageUpload {
            runtime: Arc::clone(&self.runtime),
            client,
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id,
            part_size,
            buffer: BytesMut::with_capacity(part_size),
            next_part: 1,
            completed_parts: Vec::new(),
            bytes_uploaded: 0,
        }))
    }
}

/// Multipart upload fed synchronously through [`Write`].
///
/// Data is buffered until a full part of `part_size` bytes is available;
/// each part is uploaded with retry and exponential backoff.
pub struct S3ImageUpload {
    runtime: Arc<Runtime>,
    client: Arc<S3Client>,
    bucket: String,
    key: String,
    upload_id: String,
    part_size: usize,
    buffer: BytesMut,
    next_part: i64,
    completed_parts: Vec<CompletedPart>,
    bytes_uploaded: u64,
}

impl S3ImageUpload {
    fn upload_part(&mut self, data: Bytes) -> Result<()> {
        let part_number = self.next_part;
        let part_size = data.len() as u64;
        let mut attempts = 0;

        loop {
            attempts += 1;

            let request = UploadPartRequest {
                bucket: self.bucket.clone(),
                key: self.key.clone(),
                upload_id: self.upload_id.clone(),
                part_number,
                body: Some(ByteStream::from(data.to_vec())),
                ..Default::default()
            };

            match self.runtime.block_on(self.client.upload_part(request)) {
                Ok(output) => {
                    let e_tag = output.e_tag
                        .ok_or_else(|| anyhow!("No ETag in upload part response"))?;
                    self.completed_parts.push(CompletedPart {
                        e_tag: Some(e_tag),
                        part_number: Some(part_number),
                    });
                    self.next_part += 1;
                    self.bytes_uploaded += part_size;
                    return Ok(());
                }
                Err(e) => {
                    if attempts >= MAX_UPLOAD_RETRIES {
                        return Err(anyhow!("Failed to upload part {} after {} attempts: {}",
                                           part_number, MAX_UPLOAD_RETRIES, e));
                    }

                    // Exponential backoff
                    let delay = Duration::from_millis(RETRY_BASE_DELAY_MS * 2u64.pow(attempts as u32));
                    warn!("Part {} upload attempt {} failed, retrying in {:?}: {}",
                          part_number, attempts, delay, e);
                    sleep(delay);
                }
            }
        }
    }
}

impl Write for S3ImageUpload {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);

        while self.buffer.len() >= self.part_size {
            let part = self.buffer.split_to(self.part_size).freeze();
            self.upload_part(part)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("{:#}", e)))?;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // Parts below the S3 minimum cannot be sent early
        Ok(())
    }
}

impl ImageUpload for S3ImageUpload {
    fn target_name(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }

    fn bytes_uploaded(&self) -> u64 {
        self.bytes_uploaded
    }

    fn complete(mut self: Box<Self>) -> Result<()> {
        // S3 requires at least one part, even for an empty object
        if !self.buffer.is_empty() || self.completed_parts.is_empty() {
            let last = self.buffer.split().freeze();
            self.upload_part(last)?;
        }

        let mut parts = std::mem::take(&mut self.completed_parts);
        parts.sort_by_key(|part| part.part_number);

        let complete_request = CompleteMultipartUploadRequest {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            upload_id: self.upload_id.clone(),
            multipart_upload: Some(CompletedMultipartUpload { parts: Some(parts) }),
            ..Default::default()
        };

        self.runtime
            .block_on(self.client.complete_multipart_upload(complete_request))
            .context("Failed to complete multipart upload")?;

        debug!("Completed multipart upload for {}", self.key);
        Ok(())
    }

    fn abort(self: Box<Self>) -> Result<()> {
        let abort_request = AbortMultipartUploadRequest {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            upload_id: self.upload_id.clone(),
            ..Default::default()
        };

        self.runtime
            .block_on(self.client.abort_multipart_upload(abort_request))
            .context("Failed to abort multipart upload")?;

        debug!("Aborted multipart upload for {}", self.key);
        Ok(())
    }
}
