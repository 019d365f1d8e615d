use std::path::{Path, PathBuf};

use log::debug;
use walkdir::WalkDir;

/// Directory of prebuilt acquisition modules.
///
/// Two layouts are recognised:
/// - `lime-<kernel>.ko` anywhere below the root
/// - `<kernel>/lime.ko`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRepository {
    root: PathBuf,
}

impl ModuleRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Find the module built for `kernel_version`
    pub fn find(&self, kernel_version: &str) -> Option<PathBuf> {
        let kernel_version = kernel_version.trim();
        if kernel_version.is_empty() || !self.root.is_dir() {
            return None;
        }

        let flat_name = format!("lime-{}.ko", kernel_version);

        for entry in WalkDir::new(&self.root).follow_links(true).into_iter().flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let name = entry.file_name().to_string_lossy();

            let nested = name == "lime.ko"
                && path
                    .parent()
                    .and_then(|p| p.file_name())
                    .map(|dir| dir.to_string_lossy() == kernel_version)
                    .unwrap_or(false);

            if name == flat_name || nested {
                debug!("found module {} for kernel {}", path.display(), kernel_version);
                return Some(path.to_path_buf());
            }
        }

        None
    }
}
