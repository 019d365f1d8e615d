use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, sleep, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{debug, warn};
use ssh2::Session;

use crate::constants::{LOOPBACK_ADDR, TUNNEL_POLL_INTERVAL_MS};
use crate::remote::TunnelSession;

const PUMP_BUFFER_SIZE: usize = 64 * 1024;

struct Forwarder {
    local_port: u16,
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Local port forward over a dedicated ssh2 [`Session`].
///
/// A background thread accepts connections on the loopback listener and
/// pumps bytes in both directions through a `direct-tcpip` channel. The
/// session runs non-blocking while pumping so the thread can observe the
/// stop flag.
pub struct SshTunnel {
    host: String,
    session: Session,
    forwarder: Option<Forwarder>,
    closed: bool,
}

impl SshTunnel {
    pub fn new(host: &str, session: Session) -> Self {
        Self {
            host: host.to_string(),
            session,
            forwarder: None,
            closed: false,
        }
    }
}

impl TunnelSession for SshTunnel {
    fn start_forward(&mut self, local_port: u16, target_host: &str, target_port: u16) -> Result<()> {
        if self.closed {
            return Err(anyhow!("tunnel to {} is already closed", self.host));
        }
        if let Some(forwarder) = &self.forwarder {
            return Err(anyhow!("tunnel to {} already forwards port {}", self.host, forwarder.local_port));
        }

        let listener = TcpListener::bind((LOOPBACK_ADDR, local_port))
            .context(format!("Failed to bind {}:{}", LOOPBACK_ADDR, local_port))?;
        listener.set_nonblocking(true)
            .context("Failed to make tunnel listener non-blocking")?;

        let stop = Arc::new(AtomicBool::new(false));
        let session = self.session.clone();
        let host = self.host.clone();
        let target_host = target_host.to_string();
        let thread_stop = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name(format!("tunnel-{}", self.host))
            .spawn(move || {
                forward_loop(&host, listener, session, &target_host, target_port, &thread_stop)
            })
            .context("Failed to spawn tunnel thread")?;

        debug!("{}: forwarding {}:{} -> {}:{}",
               self.host, LOOPBACK_ADDR, local_port, LOOPBACK_ADDR, target_port);

        self.forwarder = Some(Forwarder { local_port, stop, thread });
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Some(forwarder) = self.forwarder.take() {
            forwarder.stop.store(true, Ordering::SeqCst);
            if forwarder.thread.join().is_err() {
                warn!("{}: tunnel thread panicked", self.host);
            }
        }

        self.session.set_blocking(true);
        self.session
            .disconnect(None, "acquisition complete", None)
            .context(format!("Failed to disconnect tunnel to {}", self.host))?;

        debug!("{}: tunnel closed", self.host);
        Ok(())
    }
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            debug!("{}: tunnel cleanup on drop failed: {}", self.host, e);
        }
    }
}

fn forward_loop(
    host: &str,
    listener: TcpListener,
    session: Session,
    target_host: &str,
    target_port: u16,
    stop: &AtomicBool,
) {
    let poll = Duration::from_millis(TUNNEL_POLL_INTERVAL_MS);

    while !stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!("{}: tunnel connection from {}", host, peer);
                if let Err(e) = pump_connection(&session, stream, target_host, target_port, stop) {
                    warn!("{}: tunnel connection failed: {:#}", host, e);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => sleep(poll),
            Err(e) => {
                warn!("{}: tunnel listener failed: {}", host, e);
                break;
            }
        }
    }
}

fn pump_connection(
    session: &Session,
    mut stream: TcpStream,
    target_host: &str,
    target_port: u16,
    stop: &AtomicBool,
) -> Result<()> {
    session.set_blocking(true);
    let mut channel = session
        .channel_direct_tcpip(target_host, target_port, None)
        .context(format!("Failed to open direct-tcpip channel to {}:{}", target_host, target_port))?;

    session.set_blocking(false);
    stream.set_nonblocking(true)?;

    let poll = Duration::from_millis(TUNNEL_POLL_INTERVAL_MS);
    let mut buffer = vec![0u8; PUMP_BUFFER_SIZE];

    while !stop.load(Ordering::SeqCst) {
        let mut idle = true;

        match channel.read(&mut buffer) {
            Ok(0) if channel.eof() => break,
            Ok(0) => {}
            Ok(n) => {
                write_all_nonblocking(&mut stream, &buffer[..n], stop)?;
                idle = false;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e).context("Failed to read from tunnel channel"),
        }

        match stream.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                write_all_nonblocking(&mut channel, &buffer[..n], stop)?;
                idle = false;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e).context("Failed to read from local tunnel client"),
        }

        if idle {
            sleep(poll);
        }
    }

    let _ = channel.close();
    Ok(())
}

/// `write_all` for a non-blocking writer, retrying on `WouldBlock`
pub(crate) fn write_all_nonblocking<W: Write>(
    writer: &mut W,
    mut data: &[u8],
    stop: &AtomicBool,
) -> io::Result<()> {
    let poll = Duration::from_millis(TUNNEL_POLL_INTERVAL_MS);

    while !data.is_empty() {
        if stop.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "tunnel stopped"));
        }
        match writer.write(data) {
            Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "peer closed")),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => sleep(poll),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }

    Ok(())
}
