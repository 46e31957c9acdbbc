//! Structural statistics from `git-sizer -j --json-version=2`.

use crate::measure::MeasurementError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
struct Metric {
    value: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SizerReport {
    unique_blob_count: Metric,
    unique_blob_size: Metric,
    unique_tree_count: Metric,
    unique_tree_entries: Metric,
    unique_tree_size: Metric,
    unique_commit_count: Metric,
    unique_commit_size: Metric,
}

/// Unique, de-duplicated object statistics over all branches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureStats {
    pub unique_blob_count: u64,
    pub unique_blob_size: u64,
    pub unique_tree_count: u64,
    pub unique_tree_entries: u64,
    pub unique_tree_size: u64,
    pub unique_commit_count: u64,
    pub unique_commit_size: u64,
}

impl From<SizerReport> for StructureStats {
    fn from(r: SizerReport) -> Self {
        Self {
            unique_blob_count: r.unique_blob_count.value,
            unique_blob_size: r.unique_blob_size.value,
            unique_tree_count: r.unique_tree_count.value,
            unique_tree_entries: r.unique_tree_entries.value,
            unique_tree_size: r.unique_tree_size.value,
            unique_commit_count: r.unique_commit_count.value,
            unique_commit_size: r.unique_commit_size.value,
        }
    }
}

pub fn parse_sizer_report(json: &str) -> Result<StructureStats, MeasurementError> {
    serde_json::from_str::<SizerReport>(json)
        .map(StructureStats::from)
        .map_err(|e| MeasurementError::unparseable("git-sizer", format!("{}: {}", e, json.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"{
        "uniqueBlobCount": {"description": "The total number of distinct blob objects", "value": 41, "level": 0.0},
        "uniqueBlobSize": {"description": "The total size of all distinct blob objects", "value": 1234, "unit": "B", "level": 0.0},
        "uniqueTreeCount": {"description": "The total number of distinct tree objects", "value": 17, "level": 0.0},
        "uniqueTreeEntries": {"description": "The total number of entries in all distinct tree objects", "value": 58, "level": 0.0},
        "uniqueTreeSize": {"description": "The total size of all distinct tree objects", "value": 2048, "unit": "B", "level": 0.0},
        "uniqueCommitCount": {"description": "The total number of distinct commit objects", "value": 9, "level": 0.0},
        "uniqueCommitSize": {"description": "The total size of all distinct commit objects", "value": 1800, "unit": "B", "level": 0.0},
        "maxCommitSize": {"description": "The maximum size of a single commit", "value": 220, "unit": "B", "level": 0.0}
    }"#;

    #[test]
    fn test_parse_v2_report() {
        let stats = parse_sizer_report(REPORT).unwrap();
        assert_eq!(stats.unique_blob_count, 41);
        assert_eq!(stats.unique_blob_size, 1234);
        assert_eq!(stats.unique_tree_entries, 58);
        assert_eq!(stats.unique_commit_size, 1800);
    }

    #[test]
    fn test_missing_metric_is_unparseable() {
        let err = parse_sizer_report(r#"{"uniqueBlobCount": {"value": 1}}"#).unwrap_err();
        assert!(matches!(
            err,
            MeasurementError::UnparseableOutput { tool: "git-sizer", .. }
        ));
    }

    #[test]
    fn test_non_json_is_unparseable() {
        assert!(parse_sizer_report("error: not a git repository").is_err());
    }
}
