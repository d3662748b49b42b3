//! Failure report built from a run's evaluation state.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::metric::Metric;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnInfo {
    pub ip: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResponseInfo {
    pub headers: BTreeMap<String, String>,
    pub status_code: u16,
}

/// Describes one failed sample run.
///
/// Attachments travel alongside the JSON document and are never embedded
/// in it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Report {
    pub name: String,
    pub path: String,
    pub variables: BTreeMap<String, String>,
    pub elapsed_ms: u64,
    pub metrics: BTreeMap<String, f64>,
    pub last_error: String,
    pub tags: BTreeMap<String, String>,
    pub conn_info: ConnInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_info: Option<ResponseInfo>,
    #[serde(skip)]
    pub attachments: BTreeMap<String, Vec<u8>>,
}

impl Report {
    /// Flatten metrics into `series -> value`. Later entries win.
    pub fn snapshot(metrics: &[Metric]) -> BTreeMap<String, f64> {
        metrics.iter().map(|m| (m.series_key(), m.value)).collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_omits_attachments() {
        let mut report = Report {
            name: "homepage".to_string(),
            last_error: "expected status code 200 but got 500".to_string(),
            ..Default::default()
        };
        report
            .attachments
            .insert("body.html".to_string(), b"<html/>".to_vec());

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["name"], "homepage");
        assert_eq!(json["last_error"], "expected status code 200 but got 500");
        assert!(json.get("attachments").is_none());
        assert!(json.get("response_info").is_none());
        assert_eq!(json["conn_info"]["ip"], "");
    }

    #[test]
    fn snapshot_flattens_series() {
        let metrics = vec![
            Metric::new("a", 1.0),
            Metric::new("b", 2.0).label("k", "v"),
        ];
        let snap = Report::snapshot(&metrics);
        assert_eq!(snap["a"], 1.0);
        assert_eq!(snap["b{k=\"v\"}"], 2.0);
    }
}
