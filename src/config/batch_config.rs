use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_SSH_PORT;
use crate::models::{HostDescriptor, HostOverrides};

/// One entry of the `hosts` list
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct HostEntry {
    pub addr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyfile: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
}

impl HostEntry {
    /// Convert into an immutable descriptor. Empty strings count as unset.
    pub fn to_descriptor(&self) -> HostDescriptor {
        HostDescriptor {
            address: self.addr.trim().to_string(),
            username: self.username.clone(),
            port: self.port.unwrap_or(DEFAULT_SSH_PORT),
            module_path: self.module.clone().filter(|p| !p.as_os_str().is_empty()),
            key_file: self.keyfile.clone().filter(|p| !p.as_os_str().is_empty()),
            password: self.password.clone().filter(|p| !p.is_empty()),
            overrides: HostOverrides {
                tunnel_port: self.tunnel_port,
                bucket: self.bucket.clone().filter(|b| !b.is_empty()),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct LoggingSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AwsSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RepositorySection {
    pub path: PathBuf,
}

/// Raw batch configuration as read from YAML.
///
/// `workers` is kept as a raw YAML value: the builder decides whether it is
/// a valid integer or the `auto` token.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct BatchConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepositorySection>,
    #[serde(default)]
    pub hosts: Vec<HostEntry>,
}

impl BatchConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        let config = Self::from_yaml_str(&content)?;

        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse YAML config")
    }

    /// Save configuration to a YAML file
    pub fn save_to_yaml_file(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self)
            .context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .context(format!("Failed to write config to {}", path.display()))?;

        info!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Reject configurations no batch can run with.
    ///
    /// Missing credentials are not checked here: they fail the affected
    /// host only, when its pipeline selects an auth method.
    pub fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(anyhow!("configuration contains no hosts"));
        }

        // Images are named after the address, so it must be unique
        let mut seen = HashSet::new();
        for (index, host) in self.hosts.iter().enumerate() {
            let addr = host.addr.trim();
            if addr.is_empty() {
                return Err(anyhow!("host #{} has an empty address", index + 1));
            }
            if host.username.trim().is_empty() {
                return Err(anyhow!("host {} has an empty username", host.addr));
            }
            if !seen.insert(addr) {
                return Err(anyhow!("host {} is listed more than once", addr));
            }
        }

        Ok(())
    }

    /// Example configuration written by `init-config`
    pub fn sample() -> Self {
        Self {
            workers: Some(serde_yaml::Value::String("auto".to_string())),
            logging: Some(LoggingSection {
                dir: Some("logs".to_string()),
                prefix: Some("fleet-".to_string()),
            }),
            aws: Some(AwsSection {
                bucket: Some("forensics-memory".to_string()),
                key: None,
                secret: None,
                region: Some("us-east-1".to_string()),
            }),
            repository: Some(RepositorySection { path: PathBuf::from("modules") }),
            hosts: vec![
                HostEntry {
                    addr: "10.0.0.10".to_string(),
                    username: "ec2-user".to_string(),
                    keyfile: Some(PathBuf::from("~/.ssh/forensics.pem")),
                    module: Some(PathBuf::from("modules/lime-5.10.0-21-amd64.ko")),
                    ..Default::default()
                },
                HostEntry {
                    addr: "10.0.0.11".to_string(),
                    port: Some(2222),
                    username: "responder".to_string(),
                    password: Some("changeme".to_string()),
                    ..Default::default()
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FULL_CONFIG: &str = r#"
workers: 4
logging:
  dir: /var/log/lime
  prefix: case-42-
aws:
  bucket: evidence
  key: AKIAEXAMPLE
  secret: s3cr3t
hosts:
  - addr: 10.1.1.1
    username: root
    keyfile: /keys/id_rsa
  - addr: 10.1.1.2
    port: 2200
    username: admin
    password: pw
    module: /modules/lime.ko
    tunnel_port: 5555
"#;

    #[test]
    fn test_parse_full_config() {
        let config = BatchConfig::from_yaml_str(FULL_CONFIG).unwrap();
        assert_eq!(config.hosts.len(), 2);
        assert_eq!(config.workers, Some(serde_yaml::Value::from(4)));
        assert_eq!(config.aws.as_ref().unwrap().bucket.as_deref(), Some("evidence"));
        config.validate().unwrap();
    }

    #[test]
    fn test_host_entry_to_descriptor() {
        let config = BatchConfig::from_yaml_str(FULL_CONFIG).unwrap();

        let first = config.hosts[0].to_descriptor();
        assert_eq!(first.port, 22);
        assert_eq!(first.key_file, Some(PathBuf::from("/keys/id_rsa")));
        assert!(first.password.is_none());
        assert!(first.module_path.is_none());

        let second = config.hosts[1].to_descriptor();
        assert_eq!(second.port, 2200);
        assert_eq!(second.module_path, Some(PathBuf::from("/modules/lime.ko")));
        assert_eq!(second.overrides.tunnel_port, Some(5555));
    }

    #[test]
    fn test_empty_strings_are_unset() {
        let entry = HostEntry {
            addr: " 10.0.0.1 ".to_string(),
            username: "root".to_string(),
            password: Some(String::new()),
            module: Some(PathBuf::new()),
            ..Default::default()
        };
        let host = entry.to_descriptor();
        assert_eq!(host.address, "10.0.0.1");
        assert!(host.password.is_none());
        assert!(host.module_path.is_none());
    }

    #[test]
    fn test_validate_rejects_empty_hosts() {
        let config = BatchConfig::from_yaml_str("workers: 1\nhosts: []\n").unwrap();
        assert!(config.validate().is_err());

        let config = BatchConfig::from_yaml_str("hosts:\n  - addr: ''\n    username: root\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_addresses() {
        let yaml = "hosts:\n  - addr: 10.0.0.1\n    username: root\n  - addr: ' 10.0.0.1'\n    username: admin\n";
        let config = BatchConfig::from_yaml_str(yaml).unwrap();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("10.0.0.1 is listed more than once"));
    }

    #[test]
    fn test_missing_username_fails_to_parse() {
        assert!(BatchConfig::from_yaml_str("hosts:\n  - addr: 10.0.0.1\n").is_err());
    }

    #[test]
    fn test_sample_round_trips_through_file() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("fleet.yaml");

        BatchConfig::sample().save_to_yaml_file(&path)?;
        let loaded = BatchConfig::from_yaml_file(&path)?;

        loaded.validate()?;
        assert_eq!(loaded.hosts.len(), 2);
        assert_eq!(loaded.workers, Some(serde_yaml::Value::String("auto".into())));
        Ok(())
    }
}
