use log::{debug, info, warn};

use crate::constants::REMOTE_MODULE_NAME;
use crate::error::{AcquisitionError, AcquisitionResult};
use crate::models::{HostDescriptor, ModuleResolution};
use crate::remote::RemoteSession;

const UNKNOWN_KERNEL: &str = "unknown";

/// Decide which module binary `host` receives.
///
/// An explicit module path wins; the kernel version is still queried for
/// context but a failed query is tolerated. Without a path the kernel version
/// is required and the repository lookup must produce a module.
pub fn resolve_module(
    host: &HostDescriptor,
    remote: &mut dyn RemoteSession,
) -> AcquisitionResult<ModuleResolution> {
    if let Some(module_path) = host.module_path.as_ref().filter(|p| !p.as_os_str().is_empty()) {
        let kernel_version = match remote.kernel_version() {
            Ok(version) => version,
            Err(e) => {
                warn!("{}: could not determine kernel version: {:#}", host.address, e);
                UNKNOWN_KERNEL.to_string()
            }
        };
        debug!("{}: using configured module {}", host.address, module_path.display());
        return Ok(ModuleResolution {
            module_path: module_path.clone(),
            kernel_version,
        });
    }

    let kernel_version = remote
        .kernel_version()
        .map_err(|source| AcquisitionError::Provisioning {
            host: host.address.clone(),
            source: source.context("Failed to query kernel version"),
        })?;

    info!("{}: no module specified, looking up module for kernel {}", host.address, kernel_version);

    let found = remote
        .lookup_module_for_kernel(&kernel_version)
        .map_err(|source| AcquisitionError::Provisioning {
            host: host.address.clone(),
            source: source.context(format!("Module lookup for kernel {} failed", kernel_version)),
        })?;

    match found.filter(|p| !p.as_os_str().is_empty()) {
        Some(module_path) => {
            info!("{}: found module {} for kernel {}", host.address, module_path.display(), kernel_version);
            Ok(ModuleResolution { module_path, kernel_version })
        }
        None => Err(AcquisitionError::ModuleNotFound {
            host: host.address.clone(),
            kernel_version,
        }),
    }
}

/// Resolve the module and upload it under the fixed remote filename.
pub fn provision(
    host: &HostDescriptor,
    remote: &mut dyn RemoteSession,
) -> AcquisitionResult<ModuleResolution> {
    let resolution = resolve_module(host, remote)?;

    info!("{}: uploading {} as {}", host.address, resolution.module_path.display(), REMOTE_MODULE_NAME);
    remote
        .upload_file(&resolution.module_path, REMOTE_MODULE_NAME)
        .map_err(|source| AcquisitionError::Provisioning {
            host: host.address.clone(),
            source,
        })?;

    Ok(resolution)
}
