//! Metrics snapshot files consumed by the CLI
//!
//! A file holds either one [`MetricsSnapshot`] served for every window, or
//! a default snapshot plus per-window overrides keyed by window (`"1h"`,
//! `"6h"`, `"30d"`):
//!
//! ```json
//! {
//!   "default": { "total_requests": 1000000, "failed_requests": 200 },
//!   "windows": { "1h": { "total_requests": 40000, "failed_requests": 35 } }
//! }
//! ```

use bulwark_core_sli::{parse_window, MetricsSnapshot, StaticSource};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{BulwarkError, Result};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SnapshotFile {
    Windowed {
        default: MetricsSnapshot,
        #[serde(default)]
        windows: BTreeMap<String, MetricsSnapshot>,
    },
    Single(MetricsSnapshot),
}

/// Parse snapshot JSON into a source
pub fn parse_source(json: &str) -> std::result::Result<StaticSource, String> {
    let file: SnapshotFile = serde_json::from_str(json).map_err(|e| e.to_string())?;
    match file {
        SnapshotFile::Single(snapshot) => Ok(StaticSource::new(normalize(snapshot, None)?)),
        SnapshotFile::Windowed { default, windows } => {
            let mut source = StaticSource::new(normalize(default, Some("default"))?);
            for (key, snapshot) in windows {
                let window = parse_window(&key).map_err(|e| e.to_string())?;
                source = source.with_window(window, normalize(snapshot, Some(&key))?);
            }
            Ok(source)
        }
    }
}

/// Files carry counts; availability and error rate are always recomputed
fn normalize(
    snapshot: MetricsSnapshot,
    window: Option<&str>,
) -> std::result::Result<MetricsSnapshot, String> {
    snapshot.normalized().map_err(|e| match window {
        Some(key) => format!("window '{key}': {e}"),
        None => e.to_string(),
    })
}

/// Read a snapshot file from disk
pub fn load_source(path: &Path) -> Result<StaticSource> {
    let snapshot_err = |reason: String| BulwarkError::Snapshot {
        path: path.to_path_buf(),
        reason,
    };
    let json = std::fs::read_to_string(path).map_err(|e| snapshot_err(e.to_string()))?;
    parse_source(&json).map_err(snapshot_err)
}
