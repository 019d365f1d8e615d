use std::sync::Arc;

use anyhow::{Context, Result};
use log::warn;
use rusoto_core::{HttpClient, Region};
use rusoto_credential::StaticProvider;
use rusoto_s3::S3Client;

use crate::models::StorageCredentials;

/// Parse a region name, falling back to the default region chain
pub fn parse_region(region_name: Option<&str>) -> Region {
    match region_name {
        Some(name) => match name.parse::<Region>() {
            Ok(r) => r,
            Err(_) => {
                warn!("Invalid region '{}', using default", name);
                Region::default()
            }
        },
        None => Region::default(),
    }
}

/// Create an S3 client for the given region.
///
/// With static credentials the client signs with exactly those; otherwise
/// the default provider chain (environment, profile, instance role) is used.
pub fn create_s3_client(
    region_name: Option<&str>,
    credentials: Option<&StorageCredentials>,
) -> Result<Arc<S3Client>> {
    let region = parse_region(region_name);

    let s3_client = match credentials {
        Some(creds) => {
            let provider = StaticProvider::new_minimal(
                creds.access_key_id.clone(),
                creds.secret_access_key.clone(),
            );
            let http_client = HttpClient::new().context("Failed to create HTTP client")?;
            Arc::new(S3Client::new_with(http_client, provider, region))
        }
        None => Arc::new(S3Client::new(region)),
    };

    Ok(s3_client)
}
