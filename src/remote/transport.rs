use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::thread::sleep;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{debug, warn};
use ssh2::Session;

use crate::constants::{CAPTURE_CONNECT_ATTEMPTS, DEFAULT_CONNECTION_TIMEOUT_SECS, RETRY_BASE_DELAY_MS};
use crate::models::{AuthMethod, CaptureTarget, HostDescriptor};
use crate::remote::auth::authenticate;
use crate::remote::readiness::ReadinessPolicy;
use crate::remote::repository::ModuleRepository;
use crate::remote::session::SshRemoteSession;
use crate::remote::tunnel::SshTunnel;
use crate::remote::{RemoteSession, Transport, TunnelSession};

/// Settings shared by every SSH connection of a batch
#[derive(Debug, Clone)]
pub struct SshSettings {
    pub connection_timeout: Duration,
    pub readiness: ReadinessPolicy,
    pub repository: Option<ModuleRepository>,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECS),
            readiness: ReadinessPolicy::default(),
            repository: None,
        }
    }
}

/// [`Transport`] backed by `ssh2`. One remote session and one tunnel
/// session are opened per host, each on its own TCP connection.
#[derive(Debug, Clone, Default)]
pub struct SshTransport {
    settings: SshSettings,
}

impl SshTransport {
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }

    /// Create an authenticated SSH session
    fn create_session(&self, host: &HostDescriptor, auth: &AuthMethod) -> Result<Session> {
        let endpoint = format!("{}:{}", host.address, host.port);
        let addr = (host.address.as_str(), host.port)
            .to_socket_addrs()
            .context(format!("Failed to resolve {}", endpoint))?
            .next()
            .ok_or_else(|| anyhow!("No address found for {}", endpoint))?;

        let tcp = TcpStream::connect_timeout(&addr, self.settings.connection_timeout)
            .context(format!("Failed to connect to {}", endpoint))?;

        let mut session = Session::new().context("Failed to create SSH session")?;
        session.set_tcp_stream(tcp);
        session.set_timeout(self.settings.connection_timeout.as_millis().min(u32::MAX as u128) as u32);
        session.handshake().context("Failed to perform SSH handshake")?;

        authenticate(&session, &host.username, auth)?;

        debug!("{}: authenticated as {} using {}", host.address, host.username, auth.name());
        Ok(session)
    }
}

impl Transport for SshTransport {
    fn connect_remote(&self, host: &HostDescriptor, auth: &AuthMethod) -> Result<Box<dyn RemoteSession>> {
        let session = self.create_session(host, auth)?;
        Ok(Box::new(SshRemoteSession::new(
            &host.address,
            session,
            self.settings.readiness,
            self.settings.repository.clone(),
        )))
    }

    fn connect_tunnel(&self, host: &HostDescriptor, auth: &AuthMethod) -> Result<Box<dyn TunnelSession>> {
        let session = self.create_session(host, auth)?;
        // The image stream has no deadline; its size is only known approximately.
        session.set_timeout(0);
        Ok(Box::new(SshTunnel::new(&host.address, session)))
    }

    fn open_capture(&self, target: &CaptureTarget) -> Result<Box<dyn Read>> {
        let endpoint = format!("{}:{}", target.local_addr, target.tunnel_port);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match TcpStream::connect((target.local_addr.as_str(), target.tunnel_port)) {
                Ok(stream) => {
                    stream.set_read_timeout(None)
                        .context("Failed to clear capture read timeout")?;
                    debug!("{}: connected to capture endpoint {}", target.remote_addr, endpoint);
                    return Ok(Box::new(stream));
                }
                Err(e) => {
                    if attempt >= CAPTURE_CONNECT_ATTEMPTS {
                        return Err(anyhow!("Failed to connect to {} after {} attempts: {}",
                                           endpoint, attempt, e));
                    }
                    let delay = Duration::from_millis(RETRY_BASE_DELAY_MS * 2u64.pow(attempt as u32 - 1));
                    warn!("{}: capture connect attempt {} failed, retrying in {:?}: {}",
                          target.remote_addr, attempt, delay, e);
                    sleep(delay);
                }
            }
        }
    }
}
