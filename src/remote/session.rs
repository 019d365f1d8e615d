use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::thread::sleep;

use anyhow::{anyhow, Context, Result};
use log::{debug, warn};
use ssh2::{Channel, Session};

use crate::remote::readiness::ReadinessPolicy;
use crate::remote::repository::ModuleRepository;
use crate::remote::RemoteSession;

/// Command session to one host over an authenticated ssh2 [`Session`]
pub struct SshRemoteSession {
    host: String,
    session: Session,
    /// Channels started by `execute_async`; kept open so the remote command
    /// is not torn down with its channel
    pending: Vec<Channel>,
    readiness: ReadinessPolicy,
    repository: Option<ModuleRepository>,
}

impl SshRemoteSession {
    pub fn new(
        host: &str,
        session: Session,
        readiness: ReadinessPolicy,
        repository: Option<ModuleRepository>,
    ) -> Self {
        Self {
            host: host.to_string(),
            session,
            pending: Vec::new(),
            readiness,
            repository,
        }
    }

    /// Run a command and capture its exit status and stdout
    fn run(&mut self, command: &str) -> Result<(i32, String)> {
        let mut channel = self.session.channel_session()
            .context("Failed to open SSH channel")?;
        channel.exec(command)
            .context(format!("Failed to execute '{}'", command))?;

        let mut output = String::new();
        channel.read_to_string(&mut output)
            .context(format!("Failed to read output of '{}'", command))?;

        channel.wait_close().context("Failed to close SSH channel")?;
        let status = channel.exit_status().context("Failed to read exit status")?;

        debug!("{}: '{}' exited with {}", self.host, command, status);
        Ok((status, output))
    }

    /// Exit status of an async command that already terminated unsuccessfully
    fn failed_async_command(&self) -> Option<i32> {
        self.pending.iter().find_map(|channel| {
            if channel.eof() {
                match channel.exit_status() {
                    Ok(status) if status != 0 => Some(status),
                    _ => None,
                }
            } else {
                None
            }
        })
    }
}

impl RemoteSession for SshRemoteSession {
    fn upload_file(&mut self, local_path: &Path, remote_name: &str) -> Result<()> {
        let metadata = fs::metadata(local_path)
            .context(format!("Failed to get metadata for {}", local_path.display()))?;
        let mut local_file = fs::File::open(local_path)
            .context(format!("Failed to open {}", local_path.display()))?;

        let mut remote_file = self.session
            .scp_send(Path::new(remote_name), 0o644, metadata.len(), None)
            .context(format!("Failed to create remote file {}", remote_name))?;

        io::copy(&mut local_file, &mut remote_file)
            .context(format!("Failed to upload {} to {}", local_path.display(), remote_name))?;
        remote_file.flush()?;

        remote_file.send_eof().context("Failed to finish SCP upload")?;
        remote_file.wait_eof().context("Failed to finish SCP upload")?;
        remote_file.close().context("Failed to close SCP channel")?;
        remote_file.wait_close().context("Failed to close SCP channel")?;

        debug!("{}: uploaded {} ({} bytes) as {}",
               self.host, local_path.display(), metadata.len(), remote_name);
        Ok(())
    }

    fn execute_async(&mut self, command: &str) -> Result<()> {
        let mut channel = self.session.channel_session()
            .context("Failed to open SSH channel")?;
        channel.exec(command)
            .context(format!("Failed to execute '{}'", command))?;

        debug!("{}: started '{}'", self.host, command);
        self.pending.push(channel);
        Ok(())
    }

    fn execute(&mut self, command: &str) -> Result<i32> {
        self.run(command).map(|(status, _)| status)
    }

    fn wait_for_ready(&mut self, port: u16) -> Result<bool> {
        let check = listening_check_command(port);

        for attempt in 1..=self.readiness.max_attempts {
            if let Some(status) = self.failed_async_command() {
                warn!("{}: module load command exited with status {}", self.host, status);
                return Ok(false);
            }

            let (status, _) = self.run(&check)?;
            if status == 0 {
                debug!("{}: module listening on port {} after {} attempt(s)", self.host, port, attempt);
                return Ok(true);
            }

            if attempt < self.readiness.max_attempts {
                let delay = self.readiness.delay_for(attempt);
                debug!("{}: module not listening yet, retrying in {:?}", self.host, delay);
                sleep(delay);
            }
        }

        Ok(false)
    }

    fn kernel_version(&mut self) -> Result<String> {
        let (status, output) = self.run("uname -r")?;
        let version = output.trim();
        if status != 0 || version.is_empty() {
            return Err(anyhow!("uname -r failed with status {}", status));
        }
        Ok(version.to_string())
    }

    fn memory_size(&mut self) -> Result<u64> {
        let (status, output) = self.run("grep MemTotal /proc/meminfo")?;
        if status != 0 {
            return Err(anyhow!("reading /proc/meminfo failed with status {}", status));
        }
        parse_mem_total(&output)
            .ok_or_else(|| anyhow!("unexpected /proc/meminfo output: {}", output.trim()))
    }

    fn lookup_module_for_kernel(&mut self, kernel_version: &str) -> Result<Option<PathBuf>> {
        match &self.repository {
            Some(repository) => {
                debug!("{}: looking up module for {} in {}",
                       self.host, kernel_version, repository.root().display());
                Ok(repository.find(kernel_version))
            }
            None => {
                debug!("{}: no module repository configured", self.host);
                Ok(None)
            }
        }
    }
}

/// Shell check that succeeds once a TCP listener is bound to `port`
pub fn listening_check_command(port: u16) -> String {
    format!(
        "(ss -ltn 2>/dev/null || netstat -lnt 2>/dev/null) | grep -q ':{} '",
        port
    )
}

/// Parse the `MemTotal:  <n> kB` line into bytes
pub fn parse_mem_total(meminfo: &str) -> Option<u64> {
    meminfo.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("MemTotal:")?;
        let mut parts = rest.split_whitespace();
        let value: u64 = parts.next()?.parse().ok()?;
        match parts.next() {
            Some(unit) if unit.eq_ignore_ascii_case("kb") => value.checked_mul(1024),
            None => Some(value),
            Some(_) => None,
        }
    })
}
