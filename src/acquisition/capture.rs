//! Streaming the image from the tunnel into the selected sink.
//!
//! The capture stream is opened first and can only be read once. An
//! object-storage upload is mirrored into a local file under the output
//! directory while it runs: the local copy is deleted once the upload
//! completes and becomes the image if the upload fails at any point. A host
//! fails on the sink side only when both copies are lost.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use log::{debug, info, warn};

use crate::cloud::{ImageUpload, ObjectStore};
use crate::constants::CAPTURE_BUFFER_SIZE;
use crate::error::{AcquisitionError, AcquisitionResult};
use crate::models::{CaptureReport, CaptureTarget, SinkDecision, SinkKind};
use crate::utils::hash::HashingReader;

/// A local image file being written
pub struct LocalImage {
    file: File,
    path: PathBuf,
}

/// The opened persistence targets for one image.
///
/// Holds an upload, a local file, or both while an upload is mirrored.
pub struct ImageWriter {
    upload: Option<Box<dyn ImageUpload>>,
    local: Option<LocalImage>,
}

impl ImageWriter {
    /// Sink the image ends up in if the stream finishes now
    pub fn kind(&self) -> SinkKind {
        if self.upload.is_some() {
            SinkKind::ObjectStore
        } else {
            SinkKind::LocalFile
        }
    }

    /// Where the image ends up, for logs and the report
    pub fn location(&self) -> String {
        match (&self.upload, &self.local) {
            (Some(upload), _) => upload.target_name(),
            (None, Some(local)) => local.path.display().to_string(),
            (None, None) => String::new(),
        }
    }

    /// Write `data` to every live target.
    ///
    /// A failing target is dropped with a warning; an error is returned only
    /// once no target is left.
    fn write_all(&mut self, host: &str, data: &[u8]) -> anyhow::Result<()> {
        let mut last_error = None;

        if let Some(upload) = self.upload.as_mut() {
            if let Err(e) = upload.write_all(data) {
                let target = upload.target_name();
                let uploaded = upload.bytes_uploaded();
                let error = anyhow!(e).context(format!(
                    "Upload to {} failed after {} bytes were stored", target, uploaded));

                if let Some(upload) = self.upload.take() {
                    if let Err(e) = upload.abort() {
                        warn!("{}: failed to abort upload to {}: {:#}", host, target, e);
                    }
                }
                if let Some(local) = &self.local {
                    warn!("{}: {:#}, continuing with local copy {}", host, error, local.path.display());
                }
                last_error = Some(error);
            }
        }

        if let Some(local) = self.local.as_mut() {
            if let Err(e) = local.file.write_all(data) {
                let error = anyhow!(e).context(format!("Failed to write image to {}", local.path.display()));
                if let Some(local) = self.local.take() {
                    drop(local.file);
                    if let Err(e) = fs::remove_file(&local.path) {
                        warn!("{}: failed to remove partial image {}: {}", host, local.path.display(), e);
                    }
                }
                if let Some(upload) = &self.upload {
                    warn!("{}: {:#}, continuing with upload to {}", host, error, upload.target_name());
                }
                last_error = Some(error);
            }
        }

        match last_error {
            Some(error) if self.upload.is_none() && self.local.is_none() => Err(error),
            _ => Ok(()),
        }
    }

    /// Finalize the image, returning the sink it landed in and its location
    fn finish(self, host: &str) -> anyhow::Result<(SinkKind, String)> {
        let ImageWriter { upload, local } = self;

        if let Some(upload) = upload {
            let target = upload.target_name();
            match upload.complete() {
                Ok(()) => {
                    if let Some(local) = local {
                        drop(local.file);
                        if let Err(e) = fs::remove_file(&local.path) {
                            warn!("{}: failed to remove local copy {}: {}", host, local.path.display(), e);
                        }
                    }
                    return Ok((SinkKind::ObjectStore, target));
                }
                Err(e) if local.is_some() => {
                    warn!("{}: failed to complete upload to {} ({:#}), keeping local copy", host, target, e);
                }
                Err(e) => return Err(e.context(format!("Failed to complete upload to {}", target))),
            }
        }

        let LocalImage { mut file, path } = local.ok_or_else(|| anyhow!("no sink left for the image"))?;
        file.flush().context(format!("Failed to flush {}", path.display()))?;
        file.sync_all().context(format!("Failed to sync {}", path.display()))?;
        Ok((SinkKind::LocalFile, path.display().to_string()))
    }

    fn discard(self, host: &str) {
        if let Some(upload) = self.upload {
            let target = upload.target_name();
            if let Err(e) = upload.abort() {
                warn!("{}: failed to abort upload to {}: {:#}", host, target, e);
            }
        }
        if let Some(local) = self.local {
            warn!("{}: partial image left at {}", host, local.path.display());
        }
    }
}

/// Open the sink chosen for a host.
///
/// An object-storage upload is mirrored to `output_dir/filename`. If the
/// upload cannot be started the local file is the only target.
pub fn open_sink(
    host: &str,
    decision: &SinkDecision,
    store: &dyn ObjectStore,
    output_dir: &Path,
    filename: &str,
    expected_size: u64,
) -> AcquisitionResult<ImageWriter> {
    match decision {
        SinkDecision::ObjectStore { bucket, region, credentials } => {
            let local_path = output_dir.join(filename);
            match store.begin_upload(bucket, filename, region.as_deref(), credentials.as_ref(), expected_size) {
                Ok(upload) => {
                    info!("{}: streaming image to {}", host, upload.target_name());
                    let local = match open_local(&local_path) {
                        Ok(local) => {
                            debug!("{}: mirroring upload to {}", host, local_path.display());
                            Some(local)
                        }
                        Err(e) => {
                            warn!("{}: no local copy of the upload: {:#}", host, e);
                            None
                        }
                    };
                    Ok(ImageWriter { upload: Some(upload), local })
                }
                Err(e) => {
                    warn!("{}: could not start upload to bucket {} ({:#}), falling back to local file",
                          host, bucket, e);
                    local_writer(host, &local_path)
                }
            }
        }
        SinkDecision::LocalFile { path } => local_writer(host, path),
    }
}

fn local_writer(host: &str, path: &Path) -> AcquisitionResult<ImageWriter> {
    let local = open_local(path).map_err(|source| AcquisitionError::Sink {
        host: host.to_string(),
        source,
    })?;
    info!("{}: writing image to {}", host, path.display());
    Ok(ImageWriter { upload: None, local: Some(local) })
}

fn open_local(path: &Path) -> anyhow::Result<LocalImage> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .context(format!("Failed to create output directory {}", parent.display()))?;
    }

    let file = File::create(path).context(format!("Failed to create {}", path.display()))?;
    Ok(LocalImage { file, path: path.to_path_buf() })
}

/// Copy the capture stream into `writer`, hashing on the way.
pub fn stream_image(
    target: &CaptureTarget,
    stream: Box<dyn Read>,
    mut writer: ImageWriter,
) -> AcquisitionResult<CaptureReport> {
    let host = target.remote_addr.as_str();
    let mut reader = HashingReader::new(stream, host, target.memory_size);
    let mut buffer = vec![0u8; CAPTURE_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let read = reader.bytes_read();
                writer.discard(host);
                return Err(AcquisitionError::Capture {
                    host: host.to_string(),
                    source: anyhow!(e).context(format!("Capture stream failed after {} bytes", read)),
                });
            }
        };

        if let Err(source) = writer.write_all(host, &buffer[..n]) {
            writer.discard(host);
            return Err(AcquisitionError::Sink {
                host: host.to_string(),
                source,
            });
        }
    }

    let (bytes, sha256) = reader.finish();
    if bytes == 0 {
        writer.discard(host);
        return Err(AcquisitionError::Capture {
            host: host.to_string(),
            source: anyhow!("capture stream closed before any data arrived"),
        });
    }

    let (sink, location) = writer.finish(host).map_err(|source| AcquisitionError::Sink {
        host: host.to_string(),
        source,
    })?;

    if target.memory_size > 0 && bytes < target.memory_size {
        warn!("{}: image is {} bytes, smaller than reported memory size {}", host, bytes, target.memory_size);
    }
    debug!("{}: image sha256 {}", host, sha256);

    Ok(CaptureReport {
        filename: target.filename.clone(),
        location,
        sink,
        bytes,
        sha256,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_utils::{FailingReader, FakeObjectStore};
    use std::io::Cursor;
    use tempfile::TempDir;

    const FILENAME: &str = "10.0.0.3-mem.lime";

    fn target(memory_size: u64) -> CaptureTarget {
        CaptureTarget {
            local_addr: "127.0.0.1".to_string(),
            tunnel_port: 4444,
            remote_addr: "10.0.0.3".to_string(),
            memory_size,
            filename: FILENAME.to_string(),
        }
    }

    fn bucket() -> SinkDecision {
        SinkDecision::ObjectStore {
            bucket: "forensics".to_string(),
            region: None,
            credentials: None,
        }
    }

    /// Stream that arrives in two reads
    fn two_chunks(first: &[u8], second: &[u8]) -> Box<dyn Read> {
        Box::new(Cursor::new(first.to_vec()).chain(Cursor::new(second.to_vec())))
    }

    #[test]
    fn test_stream_to_local_file() {
        let dir = TempDir::new().unwrap();
        let decision = SinkDecision::LocalFile { path: dir.path().join(FILENAME) };
        let store = FakeObjectStore::new(false);

        let writer = open_sink("10.0.0.3", &decision, &store, dir.path(), FILENAME, 3).unwrap();
        let report = stream_image(&target(3), Box::new(Cursor::new(b"abc".to_vec())), writer).unwrap();

        assert_eq!(report.sink, SinkKind::LocalFile);
        assert_eq!(report.bytes, 3);
        assert_eq!(report.sha256, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
        assert_eq!(fs::read(dir.path().join(FILENAME)).unwrap(), b"abc");
    }

    #[test]
    fn test_stream_to_object_store_removes_local_copy() {
        let dir = TempDir::new().unwrap();
        let store = FakeObjectStore::new(true);

        let writer = open_sink("10.0.0.3", &bucket(), &store, dir.path(), FILENAME, 5).unwrap();
        assert!(dir.path().join(FILENAME).exists());

        let report = stream_image(&target(5), Box::new(Cursor::new(b"EMiL!".to_vec())), writer).unwrap();

        assert_eq!(report.sink, SinkKind::ObjectStore);
        assert_eq!(report.location, "s3://forensics/10.0.0.3-mem.lime");
        assert_eq!(store.completed_objects(), vec![("forensics/10.0.0.3-mem.lime".to_string(), b"EMiL!".to_vec())]);
        assert!(!dir.path().join(FILENAME).exists());
    }

    #[test]
    fn test_upload_receives_memory_size() {
        let dir = TempDir::new().unwrap();
        let store = FakeObjectStore::new(true);
        let size = 256 * 1024 * 1024 * 1024u64;

        let writer = open_sink("10.0.0.3", &bucket(), &store, dir.path(), FILENAME, size).unwrap();
        writer.discard("10.0.0.3");

        assert_eq!(store.expected_sizes(), vec![size]);
    }

    #[test]
    fn test_upload_start_failure_falls_back_to_local() {
        let dir = TempDir::new().unwrap();
        let store = FakeObjectStore::new(true).with_begin_error();

        let writer = open_sink("10.0.0.3", &bucket(), &store, dir.path(), FILENAME, 3).unwrap();
        assert_eq!(writer.kind(), SinkKind::LocalFile);

        let report = stream_image(&target(3), Box::new(Cursor::new(b"abc".to_vec())), writer).unwrap();
        assert_eq!(report.filename, FILENAME);
        assert!(dir.path().join(FILENAME).exists());
    }

    #[test]
    fn test_mid_stream_upload_failure_keeps_local_image() {
        let dir = TempDir::new().unwrap();
        let store = FakeObjectStore::new(true).with_write_error_after(4);

        let writer = open_sink("10.0.0.3", &bucket(), &store, dir.path(), FILENAME, 10).unwrap();
        let report = stream_image(&target(10), two_chunks(b"EMiL", b"-image"), writer).unwrap();

        assert_eq!(report.sink, SinkKind::LocalFile);
        assert_eq!(report.bytes, 10);
        assert_eq!(report.location, dir.path().join(FILENAME).display().to_string());
        assert_eq!(fs::read(dir.path().join(FILENAME)).unwrap(), b"EMiL-image");
        assert_eq!(store.aborted_count(), 1);
        assert!(store.completed_objects().is_empty());
    }

    #[test]
    fn test_first_write_upload_failure_keeps_local_image() {
        let dir = TempDir::new().unwrap();
        let store = FakeObjectStore::new(true).with_write_error();

        let writer = open_sink("10.0.0.3", &bucket(), &store, dir.path(), FILENAME, 3).unwrap();
        let report = stream_image(&target(3), Box::new(Cursor::new(b"abc".to_vec())), writer).unwrap();

        assert_eq!(report.sink, SinkKind::LocalFile);
        assert_eq!(fs::read(dir.path().join(FILENAME)).unwrap(), b"abc");
        assert_eq!(store.aborted_count(), 1);
    }

    #[test]
    fn test_complete_failure_keeps_local_image() {
        let dir = TempDir::new().unwrap();
        let store = FakeObjectStore::new(true).with_complete_error();

        let writer = open_sink("10.0.0.3", &bucket(), &store, dir.path(), FILENAME, 3).unwrap();
        let report = stream_image(&target(3), Box::new(Cursor::new(b"abc".to_vec())), writer).unwrap();

        assert_eq!(report.sink, SinkKind::LocalFile);
        assert_eq!(fs::read(dir.path().join(FILENAME)).unwrap(), b"abc");
    }

    #[test]
    fn test_losing_both_sinks_is_sink_error() {
        let dir = TempDir::new().unwrap();
        let store = FakeObjectStore::new(true).with_write_error();
        // A directory where the local copy should go leaves the upload alone
        fs::create_dir(dir.path().join(FILENAME)).unwrap();

        let writer = open_sink("10.0.0.3", &bucket(), &store, dir.path(), FILENAME, 3).unwrap();
        assert_eq!(writer.kind(), SinkKind::ObjectStore);

        let err = stream_image(&target(3), Box::new(Cursor::new(b"abc".to_vec())), writer).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Sink);
        assert_eq!(store.aborted_count(), 1);
    }

    #[test]
    fn test_read_failure_is_capture_error() {
        let dir = TempDir::new().unwrap();
        let store = FakeObjectStore::new(true);

        let writer = open_sink("10.0.0.3", &bucket(), &store, dir.path(), FILENAME, 3).unwrap();
        let err = stream_image(&target(3), Box::new(FailingReader), writer).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Capture);
        assert_eq!(store.aborted_count(), 1);
    }

    #[test]
    fn test_empty_stream_is_capture_error() {
        let dir = TempDir::new().unwrap();
        let decision = SinkDecision::LocalFile { path: dir.path().join("x-mem.lime") };
        let store = FakeObjectStore::new(false);

        let writer = open_sink("10.0.0.3", &decision, &store, dir.path(), "x-mem.lime", 3).unwrap();
        let err = stream_image(&target(3), Box::new(Cursor::new(Vec::new())), writer).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capture);
    }
}
