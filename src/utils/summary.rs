use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::models::HostOutcome;

/// Create a JSON summary of an acquisition batch.
///
/// The report enumerates every host outcome, failed ones included, so a
/// partially successful batch is fully documented for chain of custody.
///
/// # Example Output
///
/// ```json
/// {
///   "batch_id": "550e8400-e29b-41d4-a716-446655440000",
///   "started_at": "2024-01-15T14:30:52Z",
///   "finished_at": "2024-01-15T14:41:07Z",
///   "workers": 4,
///   "totals": { "hosts": 2, "succeeded": 1, "failed": 1 },
///   "hosts": [...]
/// }
/// ```
pub fn create_batch_summary(
    outcomes: &[HostOutcome],
    workers: usize,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
) -> Result<String> {
    let succeeded = outcomes.iter().filter(|o| o.success).count();

    let summary = json!({
        "batch_id": Uuid::new_v4().to_string(),
        "collector_version": env!("CARGO_PKG_VERSION"),
        "started_at": started_at.to_rfc3339(),
        "finished_at": finished_at.to_rfc3339(),
        "duration_seconds": (finished_at - started_at).num_milliseconds() as f64 / 1000.0,
        "workers": workers,
        "totals": {
            "hosts": outcomes.len(),
            "succeeded": succeeded,
            "failed": outcomes.len() - succeeded,
        },
        "hosts": outcomes,
    });

    serde_json::to_string_pretty(&summary).context("Failed to serialize batch summary to JSON")
}

/// One line per host for the end-of-batch log
pub fn outcome_lines(outcomes: &[HostOutcome]) -> Vec<String> {
    outcomes
        .iter()
        .map(|outcome| match (&outcome.image, &outcome.error) {
            (Some(image), _) if outcome.success => format!(
                "{}: ok, {} bytes -> {} (sha256 {})",
                outcome.host, image.bytes, image.location, image.sha256
            ),
            (_, Some(error)) => format!("{}: FAILED ({})", outcome.host, error),
            _ if outcome.success => format!("{}: ok", outcome.host),
            _ => format!("{}: FAILED", outcome.host),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::{CaptureReport, SinkKind};
    use chrono::Duration;
    use serde_json::Value;

    fn outcomes() -> Vec<HostOutcome> {
        vec![
            HostOutcome {
                host: "10.0.0.1".to_string(),
                success: false,
                error_kind: Some(ErrorKind::ReadinessTimeout),
                error: Some("10.0.0.1: module failed to signal readiness on port 4444".to_string()),
                image: None,
                duration_secs: 12.5,
            },
            HostOutcome {
                host: "10.0.0.2".to_string(),
                success: true,
                error_kind: None,
                error: None,
                image: Some(CaptureReport {
                    filename: "10.0.0.2-mem.lime".to_string(),
                    location: "s3://forensics/10.0.0.2-mem.lime".to_string(),
                    sink: SinkKind::ObjectStore,
                    bytes: 4096,
                    sha256: "ab".repeat(32),
                }),
                duration_secs: 40.0,
            },
        ]
    }

    #[test]
    fn test_summary_totals_and_hosts() {
        let start = Utc::now();
        let json_str = create_batch_summary(&outcomes(), 2, start, start + Duration::seconds(90)).unwrap();
        let json: Value = serde_json::from_str(&json_str).unwrap();

        assert!(json["batch_id"].is_string());
        assert_eq!(json["workers"], 2);
        assert_eq!(json["totals"]["hosts"], 2);
        assert_eq!(json["totals"]["succeeded"], 1);
        assert_eq!(json["totals"]["failed"], 1);
        assert_eq!(json["duration_seconds"], 90.0);

        let hosts = json["hosts"].as_array().unwrap();
        assert_eq!(hosts[0]["error_kind"], "readiness_timeout");
        assert!(hosts[0]["image"].is_null());
        assert_eq!(hosts[1]["image"]["sink"], "object_store");
        assert_eq!(hosts[1]["image"]["filename"], "10.0.0.2-mem.lime");
    }

    #[test]
    fn test_empty_batch_summary() {
        let now = Utc::now();
        let json: Value = serde_json::from_str(&create_batch_summary(&[], 1, now, now).unwrap()).unwrap();
        assert_eq!(json["totals"]["hosts"], 0);
        assert_eq!(json["hosts"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_outcome_lines() {
        let lines = outcome_lines(&outcomes());
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("10.0.0.1: FAILED"));
        assert!(lines[1].contains("s3://forensics/10.0.0.2-mem.lime"));
    }
}
