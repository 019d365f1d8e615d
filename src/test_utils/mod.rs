//! Test utilities for lime-collector
//!
//! Scripted fakes for the remote, tunnel, transport and object-store
//! collaborators. Every fake records the calls it receives so tests can
//! assert on ordering and on what was never issued.

#![cfg(test)]

use std::collections::{HashMap, HashSet};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::thread::sleep;
use std::time::Duration;

use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use log::{LevelFilter, Log, Metadata, Record};

use crate::cloud::{ImageUpload, ObjectStore};
use crate::models::{AuthMethod, CaptureTarget, HostDescriptor, JobSpec, LogDestination, StorageCredentials};
use crate::remote::{RemoteSession, Transport, TunnelSession};

/// Kernel release reported by [`FakeRemote`]
pub const FAKE_KERNEL: &str = "5.10.0-test";

/// Image bytes served by [`FakeTransport::open_capture`]
pub const FAKE_IMAGE: &[u8] = b"EMiL\x01\x00\x00\x00fake physical memory";

lazy_static! {
    static ref CAPTURED_LOGS: Mutex<Vec<String>> = Mutex::new(Vec::new());
}

static INSTALL_LOGGER: Once = Once::new();

/// Logger that keeps every record in memory as `LEVEL message`
struct CaptureLogger;

impl Log for CaptureLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if let Ok(mut lines) = CAPTURED_LOGS.lock() {
            lines.push(format!("{} {}", record.level(), record.args()));
        }
    }

    fn flush(&self) {}
}

/// Route log records of this test binary into memory.
///
/// Records from concurrently running tests interleave, so look them up by a
/// host address unique to the test with [`logged_lines`].
pub fn capture_logs() {
    INSTALL_LOGGER.call_once(|| {
        if log::set_boxed_logger(Box::new(CaptureLogger)).is_ok() {
            log::set_max_level(LevelFilter::Debug);
        }
    });
}

/// Captured lines containing `needle`
pub fn logged_lines(needle: &str) -> Vec<String> {
    CAPTURED_LOGS
        .lock()
        .unwrap()
        .iter()
        .filter(|line| line.contains(needle))
        .cloned()
        .collect()
}

/// A job for `address` with key-file auth and an explicit module
pub fn job(address: &str) -> JobSpec {
    let mut host = HostDescriptor::new(address, "root");
    host.key_file = Some(PathBuf::from("/keys/id_rsa"));
    host.module_path = Some(PathBuf::from("/modules/lime.ko"));
    JobSpec {
        host,
        logging: LogDestination::default(),
        storage: None,
    }
}

/// Reader whose first read fails
pub struct FailingReader;

impl Read for FailingReader {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "tunnel reset by peer"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Upload { local: PathBuf, remote: String },
    ExecuteAsync(String),
    Execute(String),
    WaitForReady(u16),
    KernelVersion,
    MemorySize,
    Lookup(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelCall {
    StartForward { local_port: u16, target_host: String, target_port: u16 },
    Cleanup,
}

/// Scripted [`RemoteSession`]
pub struct FakeRemote {
    calls: Arc<Mutex<Vec<RemoteCall>>>,
    kernel_error: bool,
    module: Option<PathBuf>,
    upload_error: bool,
    ready: bool,
    ready_delay: Duration,
    memory_size: u64,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            kernel_error: false,
            module: Some(PathBuf::from(format!("/repo/lime-{}.ko", FAKE_KERNEL))),
            upload_error: false,
            ready: true,
            ready_delay: Duration::ZERO,
            memory_size: FAKE_IMAGE.len() as u64,
        }
    }

    pub fn with_kernel_error(mut self) -> Self {
        self.kernel_error = true;
        self
    }

    pub fn with_module(mut self, module: Option<PathBuf>) -> Self {
        self.module = module;
        self
    }

    pub fn with_upload_error(mut self) -> Self {
        self.upload_error = true;
        self
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: RemoteCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl RemoteSession for FakeRemote {
    fn upload_file(&mut self, local_path: &Path, remote_name: &str) -> Result<()> {
        self.record(RemoteCall::Upload {
            local: local_path.to_path_buf(),
            remote: remote_name.to_string(),
        });
        if self.upload_error {
            return Err(anyhow!("scp: permission denied"));
        }
        Ok(())
    }

    fn execute_async(&mut self, command: &str) -> Result<()> {
        self.record(RemoteCall::ExecuteAsync(command.to_string()));
        Ok(())
    }

    fn execute(&mut self, command: &str) -> Result<i32> {
        self.record(RemoteCall::Execute(command.to_string()));
        Ok(0)
    }

    fn wait_for_ready(&mut self, port: u16) -> Result<bool> {
        self.record(RemoteCall::WaitForReady(port));
        if !self.ready_delay.is_zero() {
            sleep(self.ready_delay);
        }
        Ok(self.ready)
    }

    fn kernel_version(&mut self) -> Result<String> {
        self.record(RemoteCall::KernelVersion);
        if self.kernel_error {
            return Err(anyhow!("uname -r failed with status 127"));
        }
        Ok(FAKE_KERNEL.to_string())
    }

    fn memory_size(&mut self) -> Result<u64> {
        self.record(RemoteCall::MemorySize);
        Ok(self.memory_size)
    }

    fn lookup_module_for_kernel(&mut self, kernel_version: &str) -> Result<Option<PathBuf>> {
        self.record(RemoteCall::Lookup(kernel_version.to_string()));
        Ok(self.module.clone())
    }
}

/// Scripted [`TunnelSession`]
pub struct FakeTunnel {
    calls: Arc<Mutex<Vec<TunnelCall>>>,
    cleanup_error: bool,
}

impl TunnelSession for FakeTunnel {
    fn start_forward(&mut self, local_port: u16, target_host: &str, target_port: u16) -> Result<()> {
        self.calls.lock().unwrap().push(TunnelCall::StartForward {
            local_port,
            target_host: target_host.to_string(),
            target_port,
        });
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        self.calls.lock().unwrap().push(TunnelCall::Cleanup);
        if self.cleanup_error {
            return Err(anyhow!("tunnel already torn down by peer"));
        }
        Ok(())
    }
}

#[derive(Default)]
struct HostLog {
    remote: Arc<Mutex<Vec<RemoteCall>>>,
    tunnel: Arc<Mutex<Vec<TunnelCall>>>,
}

/// Scripted [`Transport`] with per-host behaviour
#[derive(Default)]
pub struct FakeTransport {
    fail_connect: HashSet<String>,
    without_module: HashSet<String>,
    never_ready: HashSet<String>,
    failing_cleanup: HashSet<String>,
    panic_on_capture: HashSet<String>,
    ready_delay: HashMap<String, Duration>,
    logs: Mutex<HashMap<String, HostLog>>,
    connects: AtomicUsize,
    captures: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_connect(mut self, host: &str) -> Self {
        self.fail_connect.insert(host.to_string());
        self
    }

    pub fn without_module(mut self, host: &str) -> Self {
        self.without_module.insert(host.to_string());
        self
    }

    pub fn never_ready(mut self, host: &str) -> Self {
        self.never_ready.insert(host.to_string());
        self
    }

    pub fn ready_after(mut self, host: &str, delay: Duration) -> Self {
        self.ready_delay.insert(host.to_string(), delay);
        self
    }

    pub fn failing_cleanup(mut self, host: &str) -> Self {
        self.failing_cleanup.insert(host.to_string());
        self
    }

    pub fn panic_on_capture(mut self, host: &str) -> Self {
        self.panic_on_capture.insert(host.to_string());
        self
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn capture_count(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    pub fn remote_calls(&self, host: &str) -> Vec<RemoteCall> {
        self.logs
            .lock()
            .unwrap()
            .get(host)
            .map(|log| log.remote.lock().unwrap().clone())
            .unwrap_or_default()
    }

    pub fn tunnel_calls(&self, host: &str) -> Vec<TunnelCall> {
        self.logs
            .lock()
            .unwrap()
            .get(host)
            .map(|log| log.tunnel.lock().unwrap().clone())
            .unwrap_or_default()
    }

    fn check_connect(&self, host: &HostDescriptor) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.contains(&host.address) {
            return Err(anyhow!(
                "Failed to connect to {}:{}: login rejected (password {})",
                host.address,
                host.port,
                host.password.as_deref().unwrap_or("-")
            ));
        }
        Ok(())
    }
}

impl Transport for FakeTransport {
    fn connect_remote(&self, host: &HostDescriptor, _auth: &AuthMethod) -> Result<Box<dyn RemoteSession>> {
        self.check_connect(host)?;

        let calls = {
            let mut logs = self.logs.lock().unwrap();
            Arc::clone(&logs.entry(host.address.clone()).or_default().remote)
        };

        let mut remote = FakeRemote::new();
        remote.calls = calls;
        if self.without_module.contains(&host.address) {
            remote.module = None;
        }
        if self.never_ready.contains(&host.address) {
            remote.ready = false;
        }
        if let Some(delay) = self.ready_delay.get(&host.address) {
            remote.ready_delay = *delay;
        }
        Ok(Box::new(remote))
    }

    fn connect_tunnel(&self, host: &HostDescriptor, _auth: &AuthMethod) -> Result<Box<dyn TunnelSession>> {
        self.check_connect(host)?;

        let calls = {
            let mut logs = self.logs.lock().unwrap();
            Arc::clone(&logs.entry(host.address.clone()).or_default().tunnel)
        };

        Ok(Box::new(FakeTunnel {
            calls,
            cleanup_error: self.failing_cleanup.contains(&host.address),
        }))
    }

    fn open_capture(&self, target: &CaptureTarget) -> Result<Box<dyn Read>> {
        if self.panic_on_capture.contains(&target.remote_addr) {
            panic!("capture stream for {} exploded", target.remote_addr);
        }
        self.captures.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Cursor::new(FAKE_IMAGE.to_vec())))
    }
}

#[derive(Default)]
struct StoreState {
    probes: usize,
    aborted: usize,
    expected_sizes: Vec<u64>,
    completed: Vec<(String, Vec<u8>)>,
}

/// In-memory [`ObjectStore`]
pub struct FakeObjectStore {
    probe_result: bool,
    begin_error: bool,
    write_limit: Option<usize>,
    complete_error: bool,
    state: Arc<Mutex<StoreState>>,
}

impl FakeObjectStore {
    /// `probe_result` is what a credential probe reports
    pub fn new(probe_result: bool) -> Self {
        Self {
            probe_result,
            begin_error: false,
            write_limit: None,
            complete_error: false,
            state: Arc::new(Mutex::new(StoreState::default())),
        }
    }

    pub fn with_begin_error(mut self) -> Self {
        self.begin_error = true;
        self
    }

    pub fn with_write_error(self) -> Self {
        self.with_write_error_after(0)
    }

    /// Uploads accept `limit` bytes, then every write fails
    pub fn with_write_error_after(mut self, limit: usize) -> Self {
        self.write_limit = Some(limit);
        self
    }

    pub fn with_complete_error(mut self) -> Self {
        self.complete_error = true;
        self
    }

    /// `expected_size` passed to every `begin_upload`
    pub fn expected_sizes(&self) -> Vec<u64> {
        self.state.lock().unwrap().expected_sizes.clone()
    }

    pub fn probe_count(&self) -> usize {
        self.state.lock().unwrap().probes
    }

    pub fn aborted_count(&self) -> usize {
        self.state.lock().unwrap().aborted
    }

    /// `bucket/key` and content of every completed upload
    pub fn completed_objects(&self) -> Vec<(String, Vec<u8>)> {
        self.state.lock().unwrap().completed.clone()
    }
}

impl ObjectStore for FakeObjectStore {
    fn probe_credentials(&self, _bucket: &str, _region: Option<&str>) -> bool {
        self.state.lock().unwrap().probes += 1;
        self.probe_result
    }

    fn begin_upload(
        &self,
        bucket: &str,
        key: &str,
        _region: Option<&str>,
        _credentials: Option<&StorageCredentials>,
        expected_size: u64,
    ) -> Result<Box<dyn ImageUpload>> {
        if self.begin_error {
            return Err(anyhow!("CreateMultipartUpload: AccessDenied"));
        }
        self.state.lock().unwrap().expected_sizes.push(expected_size);
        Ok(Box::new(FakeUpload {
            name: format!("{}/{}", bucket, key),
            data: Vec::new(),
            write_limit: self.write_limit,
            complete_error: self.complete_error,
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeUpload {
    name: String,
    data: Vec<u8>,
    write_limit: Option<usize>,
    complete_error: bool,
    state: Arc<Mutex<StoreState>>,
}

impl Write for FakeUpload {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.write_limit.map_or(false, |limit| self.data.len() + buf.len() > limit) {
            return Err(io::Error::new(io::ErrorKind::Other, "UploadPart: SlowDown"));
        }
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ImageUpload for FakeUpload {
    fn target_name(&self) -> String {
        format!("s3://{}", self.name)
    }

    fn bytes_uploaded(&self) -> u64 {
        self.data.len() as u64
    }

    fn complete(self: Box<Self>) -> Result<()> {
        if self.complete_error {
            return Err(anyhow!("CompleteMultipartUpload: InternalError"));
        }
        let FakeUpload { name, data, state, .. } = *self;
        state.lock().unwrap().completed.push((name, data));
        Ok(())
    }

    fn abort(self: Box<Self>) -> Result<()> {
        self.state.lock().unwrap().aborted += 1;
        Ok(())
    }
}
