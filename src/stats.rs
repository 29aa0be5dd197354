//! Query façade: snapshot bytes in, aggregated statistics out

use crate::aggregate::{aggregate, StatsInfo};
use crate::decode::decode;
use crate::error::Result;
use crate::filters::Filters;

/// Decode a snapshot and aggregate it.
///
/// Safe to call repeatedly on successive snapshots; the bytes are only
/// borrowed for the duration of the call.
pub fn get_stats(data: &[u8], filters: &Filters, verbose: u8) -> Result<StatsInfo> {
    let records = decode(data)?;
    Ok(aggregate(&records, filters, verbose))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    const SNAPSHOT: &str = r#"{"Result": [{
        "wf1": {
            "RequestName": "wf1", "Campaign": "C1", "CMSSWVersion": "CMSSW_12",
            "RequestStatus": "running-open", "RequestType": "MonteCarlo", "RequestPriority": 10,
            "SiteWhiteList": ["site1"],
            "AgentJobInfo": {"agent1": {
                "agent_url": "agent1:9999", "Workflow": "wf1",
                "Status": {"success": 8, "failure": {"Create": 2}},
                "Sites": {"site1": {"success": 8, "failure": {"Create": 2}}}
            }}
        },
        "wf2": {
            "RequestName": "wf2", "Campaign": "C2", "CMSSWVersion": "CMSSW_13",
            "AgentJobInfo": {"agent1": {
                "Workflow": "wf2",
                "Status": {"submitted": {"Running": 3, "Pending": 1}},
                "Sites": {"site2": {"submitted": {"Running": 3, "Pending": 1}}}
            }}
        }
    }]}"#;

    #[test]
    fn test_get_stats_end_to_end() {
        let info = get_stats(SNAPSHOT.as_bytes(), &Filters::new(), 0).unwrap();

        assert_eq!(info.campaigns["C1"].requests, 1);
        assert_eq!(info.campaigns["C1"].failure_rate, 20.0);
        assert_eq!(info.campaigns["C1"].job_progress, 100.0);
        assert_eq!(info.sites["site1"].failure_rate, 20.0);
        assert_eq!(info.sites["site2"].running, 3);
        assert_eq!(info.sites["site2"].pending, 1);
        assert_eq!(info.agents["agent1"].requests, 2);
        assert_eq!(info.release_workflows.len(), 2);
    }

    #[test]
    fn test_get_stats_is_idempotent() {
        let filters = Filters::parse("site=site.*");
        let first = get_stats(SNAPSHOT.as_bytes(), &filters, 0).unwrap();
        let second = get_stats(SNAPSHOT.as_bytes(), &filters, 0).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[test]
    fn test_get_stats_applies_campaign_filter() {
        let info = get_stats(SNAPSHOT.as_bytes(), &Filters::parse("campaign=^C2$"), 0).unwrap();
        assert_eq!(info.campaigns.keys().collect::<Vec<_>>(), vec!["C2"]);
    }

    #[test]
    fn test_get_stats_reports_decode_failure() {
        let err = get_stats(b"<html>upstream error</html>", &Filters::new(), 0).unwrap_err();
        assert!(matches!(err, AppError::Decode(_)));
    }
}
