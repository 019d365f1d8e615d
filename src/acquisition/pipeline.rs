//! Per-host acquisition state machine.
//!
//! States run strictly in order: authenticate, provision, load, open tunnel,
//! await readiness, determine target and sink, stream and persist. Cleanup
//! (module unload, then tunnel close) runs once for whatever was opened.

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use log::{debug, error, info, warn};

use crate::acquisition::capture::{open_sink, stream_image};
use crate::acquisition::provisioner::provision;
use crate::acquisition::sink::select_sink;
use crate::cloud::ObjectStore;
use crate::constants::{LOOPBACK_ADDR, MODULE_FORMAT, REMOTE_MODULE_NAME};
use crate::error::{AcquisitionError, AcquisitionResult};
use crate::models::{CaptureReport, CaptureTarget, HostDescriptor, HostOutcome, JobSpec};
use crate::remote::{select_auth_method, RemoteSession, Transport, TunnelSession};
use crate::security::safe_error_message;

/// Collaborators shared by every pipeline of a batch
#[derive(Clone)]
pub struct PipelineContext {
    pub transport: Arc<dyn Transport>,
    pub store: Arc<dyn ObjectStore>,
    /// Directory for local-file images
    pub output_dir: PathBuf,
}

/// Command that loads the acquisition module listening on `port`
pub fn load_command(port: u16) -> String {
    format!("sudo insmod ./{} \"path=tcp:{} format={}\"", REMOTE_MODULE_NAME, port, MODULE_FORMAT)
}

/// Command that unloads the acquisition module
pub fn unload_command() -> String {
    format!("sudo rmmod {}", REMOTE_MODULE_NAME)
}

/// Handles opened by one pipeline.
///
/// `release` unloads the module and closes the tunnel exactly once; `Drop`
/// covers a pipeline that unwinds before reaching it.
pub struct SessionHandles {
    host: String,
    remote: Option<Box<dyn RemoteSession>>,
    tunnel: Option<Box<dyn TunnelSession>>,
    released: bool,
}

impl SessionHandles {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            remote: None,
            tunnel: None,
            released: false,
        }
    }

    /// Unload the module, then close the tunnel. Failures are logged only.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let Some(mut remote) = self.remote.take() {
            match remote.execute(&unload_command()) {
                Ok(0) => debug!("{}: module unloaded", self.host),
                Ok(status) => warn!("{}: module unload exited with status {}", self.host, status),
                Err(e) => warn!("{}: module unload failed: {:#}", self.host, e),
            }
        }

        if let Some(mut tunnel) = self.tunnel.take() {
            if let Err(e) = tunnel.cleanup() {
                warn!("{}: tunnel cleanup failed: {:#}", self.host, e);
            }
        }
    }
}

impl Drop for SessionHandles {
    fn drop(&mut self) {
        self.release();
    }
}

/// Run the full acquisition for one host and report its terminal outcome.
///
/// Never fails: every error is converted into a failed [`HostOutcome`].
pub fn run_pipeline(job: &JobSpec, ctx: &PipelineContext) -> HostOutcome {
    let host = &job.host.address;
    let start = Instant::now();
    info!("{}: starting acquisition", host);

    let mut handles = SessionHandles::new(host);
    let result = acquire(job, ctx, &mut handles);
    handles.release();

    let duration_secs = start.elapsed().as_secs_f64();
    match result {
        Ok(report) => {
            info!("{}: acquisition complete, {} bytes to {} in {:.1}s",
                  host, report.bytes, report.location, duration_secs);
            HostOutcome {
                host: host.clone(),
                success: true,
                error_kind: None,
                error: None,
                image: Some(report),
                duration_secs,
            }
        }
        Err(e) => {
            let message = safe_error_message(&e, &job_secrets(job));
            error!("{}", message);
            HostOutcome {
                host: host.clone(),
                success: false,
                error_kind: Some(e.kind()),
                error: Some(message),
                image: None,
                duration_secs,
            }
        }
    }
}

fn job_secrets(job: &JobSpec) -> Vec<&str> {
    let mut secrets = Vec::new();
    if let Some(password) = job.host.password.as_deref() {
        secrets.push(password);
    }
    if let Some(secret) = job.storage.as_ref().and_then(|s| s.secret.as_deref()) {
        secrets.push(secret);
    }
    secrets
}

fn acquire(
    job: &JobSpec,
    ctx: &PipelineContext,
    handles: &mut SessionHandles,
) -> AcquisitionResult<CaptureReport> {
    let host = &job.host;
    let addr = host.address.as_str();

    // Authenticate
    let auth = select_auth_method(host)?;
    debug!("{}: authenticating as {} using {}", addr, host.username, auth.name());

    let remote = handles.remote.insert(
        ctx.transport
            .connect_remote(host, &auth)
            .map_err(|source| AcquisitionError::Authentication { host: addr.to_string(), source })?,
    );
    let tunnel = handles.tunnel.insert(
        ctx.transport
            .connect_tunnel(host, &auth)
            .map_err(|source| AcquisitionError::Authentication { host: addr.to_string(), source })?,
    );

    // Provision
    let resolution = provision(host, &mut **remote)?;
    debug!("{}: provisioned module for kernel {}", addr, resolution.kernel_version);

    // Load
    let port = tunnel_port(host)?;
    info!("{}: loading module on port {}", addr, port);
    remote
        .execute_async(&load_command(port))
        .map_err(|source| AcquisitionError::ModuleLoad { host: addr.to_string(), source })?;

    // Open tunnel
    tunnel
        .start_forward(port, LOOPBACK_ADDR, port)
        .context(format!("Failed to forward local port {}", port))
        .map_err(|source| AcquisitionError::Capture { host: addr.to_string(), source })?;

    // Await readiness
    let ready = match remote.wait_for_ready(port) {
        Ok(ready) => ready,
        Err(e) => {
            warn!("{}: readiness check failed: {:#}", addr, e);
            false
        }
    };
    if !ready {
        return Err(AcquisitionError::ReadinessTimeout { host: addr.to_string(), port });
    }
    info!("{}: module listening on port {}", addr, port);

    // Determine capture target and sink
    let memory_size = remote
        .memory_size()
        .map_err(|source| AcquisitionError::Capture { host: addr.to_string(), source })?;

    let target = CaptureTarget {
        local_addr: LOOPBACK_ADDR.to_string(),
        tunnel_port: port,
        remote_addr: addr.to_string(),
        memory_size,
        filename: host.image_filename(),
    };
    let decision = select_sink(addr, job.storage.as_ref(), ctx.store.as_ref(), &ctx.output_dir, &target.filename);
    debug!("{}: sink decision {:?}", addr, decision);

    // Stream and persist
    let stream = ctx.transport
        .open_capture(&target)
        .map_err(|source| AcquisitionError::Capture { host: addr.to_string(), source })?;
    let writer = open_sink(
        addr,
        &decision,
        ctx.store.as_ref(),
        &ctx.output_dir,
        &target.filename,
        target.memory_size,
    )?;

    info!("{}: capturing {} bytes of memory", addr, memory_size);
    stream_image(&target, stream, writer)
}

/// Per-host override, else a free loopback port picked by the OS
fn tunnel_port(host: &HostDescriptor) -> AcquisitionResult<u16> {
    if let Some(port) = host.overrides.tunnel_port {
        return Ok(port);
    }

    TcpListener::bind((LOOPBACK_ADDR, 0))
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .context("Failed to allocate a local tunnel port")
        .map_err(|source| AcquisitionError::ModuleLoad { host: host.address.clone(), source })
}
