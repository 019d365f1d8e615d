use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use log::info;
use ssh2::Session;

use crate::error::{AcquisitionError, AcquisitionResult};
use crate::models::{AuthMethod, HostDescriptor};

/// Pick the authentication method for a host.
///
/// Key file and password together mean the key is encrypted with that
/// password. With neither configured the host cannot be acquired and the
/// error is returned before any connection is attempted.
pub fn select_auth_method(host: &HostDescriptor) -> AcquisitionResult<AuthMethod> {
    match (&host.key_file, &host.password) {
        (Some(key_file), Some(password)) => Ok(AuthMethod::EncryptedKeyFile {
            key_file: key_file.clone(),
            passphrase: password.clone(),
        }),
        (Some(key_file), None) => Ok(AuthMethod::KeyFile { key_file: key_file.clone() }),
        (None, Some(password)) => Ok(AuthMethod::Password { password: password.clone() }),
        (None, None) => {
            info!("{}: no auth method specified", host.address);
            Err(AcquisitionError::NoAuthMethod { host: host.address.clone() })
        }
    }
}

/// Authenticate an already handshaken session
pub fn authenticate(session: &Session, username: &str, auth: &AuthMethod) -> Result<()> {
    match auth {
        AuthMethod::KeyFile { key_file } => {
            let key_file = expand_home(key_file);
            session
                .userauth_pubkey_file(username, None, &key_file, None)
                .context(format!("Failed to authenticate with private key: {}", key_file.display()))?;
        }
        AuthMethod::EncryptedKeyFile { key_file, passphrase } => {
            let key_file = expand_home(key_file);
            session
                .userauth_pubkey_file(username, None, &key_file, Some(passphrase))
                .context(format!("Failed to authenticate with encrypted private key: {}", key_file.display()))?;
        }
        AuthMethod::Password { password } => {
            session
                .userauth_password(username, password)
                .context(format!("Failed to authenticate {} with password", username))?;
        }
    }

    if !session.authenticated() {
        return Err(anyhow!("Authentication failed for user {}", username));
    }

    Ok(())
}

/// Expand a leading `~/` to the current user's home directory
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
