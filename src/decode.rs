//! Decoder for the request-cache statistics document

use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::models::WorkflowRecord;

/// Top-level document: workflows arrive sharded into arbitrary batches.
#[derive(Debug, Deserialize)]
struct StatsDocument {
    #[serde(rename = "Result", default)]
    result: Vec<BTreeMap<String, WorkflowRecord>>,
}

/// Decode a snapshot into `(workflow name, record)` pairs.
///
/// Batches are flattened in document order; within a batch records come out
/// ordered by key. The workflow name is the record's `RequestName`, or the
/// batch key when that is empty. Any malformed JSON rejects the whole
/// snapshot.
pub fn decode(data: &[u8]) -> Result<Vec<(String, WorkflowRecord)>> {
    let document: StatsDocument =
        serde_json::from_slice(data).map_err(|e| AppError::Decode(e.to_string()))?;

    let batches = document.result.len();
    let records: Vec<(String, WorkflowRecord)> = document
        .result
        .into_iter()
        .flat_map(|batch| batch.into_iter())
        .map(|(key, record)| {
            let name = if record.request_name.is_empty() {
                key
            } else {
                record.request_name.clone()
            };
            (name, record)
        })
        .collect();

    debug!(
        batches = batches,
        workflows = records.len(),
        bytes = data.len(),
        "Decoded statistics snapshot"
    );
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"{
        "Result": [
            {
                "wf1": {
                    "RequestStatus": "running-closed",
                    "RequestPriority": 85000,
                    "RequestType": "ReReco",
                    "RequestName": "wf1",
                    "Campaign": "Run2022",
                    "CMSSWVersion": "CMSSW_12_4_0",
                    "SiteWhiteList": ["T1_US_FNAL", "T2_CH_CERN"],
                    "AgentJobInfo": {
                        "agent1.cern.ch": {
                            "agent_url": "agent1.cern.ch:9999",
                            "Workflow": "wf1",
                            "Status": {"success": 8, "failure": {"create": 2}},
                            "Sites": {"T1_US_FNAL": {"success": 8, "failure": {"create": 2}}}
                        }
                    }
                }
            },
            {
                "batch-key": {"RequestName": "", "Campaign": "Run2023", "AgentJobInfo": null}
            }
        ]
    }"#;

    #[test]
    fn test_decode_flattens_batches() {
        let records = decode(DOCUMENT.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);

        let (name, record) = &records[0];
        assert_eq!(name, "wf1");
        assert_eq!(record.campaign, "Run2022");
        assert_eq!(record.cmssw_version, "CMSSW_12_4_0");
        assert_eq!(record.priority, 85000.0);
        assert_eq!(record.sites.len(), 2);

        let agent = &record.agents["agent1.cern.ch"];
        assert_eq!(agent.agent_url, "agent1.cern.ch:9999");
        assert_eq!(agent.status.success, 8);
        assert_eq!(agent.sites["T1_US_FNAL"].failure.create, 2);
    }

    #[test]
    fn test_decode_falls_back_to_batch_key() {
        let records = decode(DOCUMENT.as_bytes()).unwrap();
        let (name, record) = &records[1];
        assert_eq!(name, "batch-key");
        assert!(record.agents.is_empty());
    }

    #[test]
    fn test_decode_empty_document() {
        assert!(decode(b"{}").unwrap().is_empty());
        assert!(decode(br#"{"Result": []}"#).unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_malformed_json() {
        let err = decode(br#"{"Result": [ {"wf1": "#).unwrap_err();
        assert!(matches!(err, AppError::Decode(_)));
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        let err = decode(br#"{"Result": "not a list"}"#).unwrap_err();
        assert!(matches!(err, AppError::Decode(_)));
    }
}
