use std::path::Path;

use log::{debug, info};

use crate::cloud::ObjectStore;
use crate::models::{SinkDecision, StorageConfig};

/// Choose where one host's image is persisted.
///
/// - bucket with full credentials: object store, no probe
/// - bucket without full credentials: object store with ambient
///   credentials if the live probe succeeds, local file otherwise
/// - no bucket: local file, no probe
pub fn select_sink(
    host: &str,
    storage: Option<&StorageConfig>,
    store: &dyn ObjectStore,
    output_dir: &Path,
    filename: &str,
) -> SinkDecision {
    let local = || SinkDecision::LocalFile { path: output_dir.join(filename) };

    let storage = match storage {
        Some(storage) => storage,
        None => {
            debug!("{}: no storage configured, writing to local file", host);
            return local();
        }
    };

    let bucket = match storage.bucket.as_deref().filter(|b| !b.is_empty()) {
        Some(bucket) => bucket,
        None => {
            debug!("{}: no bucket configured, writing to local file", host);
            return local();
        }
    };

    if let Some(credentials) = storage.credentials() {
        debug!("{}: using configured credentials for bucket {}", host, bucket);
        return SinkDecision::ObjectStore {
            bucket: bucket.to_string(),
            region: storage.region.clone(),
            credentials: Some(credentials),
        };
    }

    if store.probe_credentials(bucket, storage.region.as_deref()) {
        SinkDecision::ObjectStore {
            bucket: bucket.to_string(),
            region: storage.region.clone(),
            credentials: None,
        }
    } else {
        info!("{}: no usable credentials for bucket {}, falling back to local file", host, bucket);
        local()
    }
}
