use std::io::{self, Read};
use std::time::Instant;

use log::info;
use sha2::{Digest, Sha256};

use crate::constants::PROGRESS_STEP_PERCENT;

/// Reader that hashes everything passing through it and logs progress
/// against an expected total size.
///
/// The expected size is the host's declared memory size; the image can be
/// slightly larger (format headers), so progress is clamped at 100%.
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    label: String,
    expected_size: u64,
    bytes_read: u64,
    last_reported: u64,
    start_time: Instant,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R, label: &str, expected_size: u64) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            label: label.to_string(),
            expected_size,
            bytes_read: 0,
            last_reported: 0,
            start_time: Instant::now(),
        }
    }

    /// Bytes read so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Consume the reader, returning the byte count and the hex digest
    pub fn finish(self) -> (u64, String) {
        (self.bytes_read, format!("{:x}", self.hasher.finalize()))
    }

    fn report_progress(&mut self) {
        if self.expected_size == 0 {
            return;
        }

        let percentage = (self.bytes_read.saturating_mul(100) / self.expected_size).min(100);
        if percentage >= self.last_reported + PROGRESS_STEP_PERCENT {
            let elapsed = self.start_time.elapsed().as_secs_f64();
            let speed = if elapsed > 0.0 { self.bytes_read as f64 / elapsed / 1024.0 / 1024.0 } else { 0.0 };

            info!("{}: capture progress {}% ({}/{} bytes, {:.2} MB/s)",
                  self.label, percentage, self.bytes_read, self.expected_size, speed);
            self.last_reported = percentage - percentage % PROGRESS_STEP_PERCENT;
        }
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.hasher.update(&buf[..n]);
            self.bytes_read += n as u64;
            self.report_progress();
        }
        Ok(n)
    }
}
