//! Core domain models for wmstats
//!
//! The feed types mirror the upstream request-cache document; the published
//! types are what the aggregation engine hands to the presentation layer.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Treat an explicit JSON `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Failed jobs, by the stage they failed in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    #[serde(default, rename = "Exception", alias = "exception")]
    pub exception: u64,
    #[serde(default, rename = "Create", alias = "create")]
    pub create: u64,
    #[serde(default, rename = "Submit", alias = "submit")]
    pub submit: u64,
}

impl Failure {
    pub fn sum(&self) -> u64 {
        self.exception
            .saturating_add(self.create)
            .saturating_add(self.submit)
    }

    pub fn update(&mut self, other: &Failure) {
        self.exception = self.exception.saturating_add(other.exception);
        self.create = self.create.saturating_add(other.create);
        self.submit = self.submit.saturating_add(other.submit);
    }
}

/// Jobs held in retry back-off
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoolOff {
    #[serde(default, rename = "Job", alias = "job")]
    pub job: u64,
    #[serde(default, rename = "Submit", alias = "submit")]
    pub submit: u64,
    #[serde(default, rename = "Create", alias = "create")]
    pub create: u64,
}

impl CoolOff {
    pub fn sum(&self) -> u64 {
        self.job
            .saturating_add(self.submit)
            .saturating_add(self.create)
    }

    pub fn update(&mut self, other: &CoolOff) {
        self.job = self.job.saturating_add(other.job);
        self.submit = self.submit.saturating_add(other.submit);
        self.create = self.create.saturating_add(other.create);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Queued {
    #[serde(default, rename = "First", alias = "first")]
    pub first: u64,
    #[serde(default, rename = "Retry", alias = "retry")]
    pub retry: u64,
}

impl Queued {
    pub fn sum(&self) -> u64 {
        self.first.saturating_add(self.retry)
    }

    pub fn update(&mut self, other: &Queued) {
        self.first = self.first.saturating_add(other.first);
        self.retry = self.retry.saturating_add(other.retry);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paused {
    #[serde(default, rename = "Job", alias = "job")]
    pub job: u64,
    #[serde(default, rename = "Submit", alias = "submit")]
    pub submit: u64,
    #[serde(default, rename = "Create", alias = "create")]
    pub create: u64,
}

impl Paused {
    pub fn sum(&self) -> u64 {
        self.job
            .saturating_add(self.submit)
            .saturating_add(self.create)
    }

    pub fn update(&mut self, other: &Paused) {
        self.job = self.job.saturating_add(other.job);
        self.submit = self.submit.saturating_add(other.submit);
        self.create = self.create.saturating_add(other.create);
    }
}

/// Jobs handed to the batch system.
///
/// `retry` is tracked but does not count toward the totals used by the
/// derived metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submitted {
    #[serde(default, rename = "Running", alias = "running")]
    pub running: u64,
    #[serde(default, rename = "Pending", alias = "pending")]
    pub pending: u64,
    #[serde(default, rename = "Retry", alias = "retry")]
    pub retry: u64,
}

impl Submitted {
    pub fn update(&mut self, other: &Submitted) {
        self.running = self.running.saturating_add(other.running);
        self.pending = self.pending.saturating_add(other.pending);
        self.retry = self.retry.saturating_add(other.retry);
    }
}

/// Job-state counters reported by an agent, either for a whole workflow or
/// for one site of it.
///
/// `update` is component-wise addition, so folding any set of counters gives
/// the same totals regardless of order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounters {
    #[serde(default, deserialize_with = "null_as_default")]
    pub failure: Failure,
    #[serde(default, rename = "cooloff", deserialize_with = "null_as_default")]
    pub cool_off: CoolOff,
    #[serde(default, deserialize_with = "null_as_default")]
    pub queued: Queued,
    #[serde(default, deserialize_with = "null_as_default")]
    pub submitted: Submitted,
    #[serde(default, deserialize_with = "null_as_default")]
    pub paused: Paused,
    #[serde(default, deserialize_with = "null_as_default")]
    pub success: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub canceled: u64,
    #[serde(default, rename = "inWMBS", deserialize_with = "null_as_default")]
    pub in_wmbs: u64,
    #[serde(default, rename = "inQueue", deserialize_with = "null_as_default")]
    pub in_queue: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub transition: u64,
}

impl StatusCounters {
    /// Add every counter of `other` into `self`.
    pub fn update(&mut self, other: &StatusCounters) {
        self.failure.update(&other.failure);
        self.cool_off.update(&other.cool_off);
        self.queued.update(&other.queued);
        self.submitted.update(&other.submitted);
        self.paused.update(&other.paused);
        self.success = self.success.saturating_add(other.success);
        self.canceled = self.canceled.saturating_add(other.canceled);
        self.in_wmbs = self.in_wmbs.saturating_add(other.in_wmbs);
        self.in_queue = self.in_queue.saturating_add(other.in_queue);
        self.transition = self.transition.saturating_add(other.transition);
    }

    /// Total jobs known to WMBS: every terminal and in-flight state.
    pub fn wmbs_total_jobs(&self) -> u64 {
        [
            self.canceled,
            self.transition,
            self.failure.sum(),
            self.cool_off.sum(),
            self.paused.sum(),
            self.queued.sum(),
            self.submitted.running,
            self.submitted.pending,
        ]
        .into_iter()
        .fold(self.success, u64::saturating_add)
    }
}

/// One agent's view of a workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentBreakdown {
    #[serde(default, rename = "agent_url", deserialize_with = "null_as_default")]
    pub agent_url: String,
    #[serde(default, rename = "Workflow", deserialize_with = "null_as_default")]
    pub workflow: String,
    #[serde(default, rename = "Status", deserialize_with = "null_as_default")]
    pub status: StatusCounters,
    #[serde(default, rename = "Sites", deserialize_with = "null_as_default")]
    pub sites: BTreeMap<String, StatusCounters>,
}

/// One compute-job request as published by the request cache
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    #[serde(default, rename = "RequestName", deserialize_with = "null_as_default")]
    pub request_name: String,
    #[serde(default, rename = "Campaign", deserialize_with = "null_as_default")]
    pub campaign: String,
    #[serde(default, rename = "RequestType", deserialize_with = "null_as_default")]
    pub request_type: String,
    #[serde(default, rename = "CMSSWVersion", deserialize_with = "null_as_default")]
    pub cmssw_version: String,
    #[serde(default, rename = "RequestPriority", deserialize_with = "null_as_default")]
    pub priority: f64,
    #[serde(default, rename = "RequestStatus", deserialize_with = "null_as_default")]
    pub request_status: String,
    #[serde(default, rename = "SiteWhiteList", deserialize_with = "null_as_default")]
    pub sites: Vec<String>,
    #[serde(default, rename = "AgentJobInfo", deserialize_with = "null_as_default")]
    pub agents: BTreeMap<String, AgentBreakdown>,
}

/// Per-workflow rollup built while folding agent breakdowns
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkflowInfo {
    pub name: String,
    pub campaign: String,
    pub request_type: String,
    pub priority: f64,
    pub sites: Vec<String>,
    pub agents: Vec<String>,
    pub status: StatusCounters,
}

/// Lightweight workflow row used by the drill-down listings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Workflow {
    pub workflow: String,
    pub status: String,
    #[serde(rename = "type")]
    pub request_type: String,
    pub priority: f64,
    pub queue_injection: f64,
    pub job_progress: f64,
    pub event_progress: f64,
    pub lumi_progress: f64,
    pub failure_rate: f64,
    pub estimated_completion: String,
    pub cool_off: u64,
}

impl Workflow {
    /// Zero-progress view tagged with the record's declared attributes
    pub fn from_record(name: &str, record: &WorkflowRecord) -> Self {
        Self {
            workflow: name.to_string(),
            status: record.request_status.clone(),
            request_type: record.request_type.clone(),
            priority: record.priority,
            queue_injection: 0.0,
            job_progress: 0.0,
            event_progress: 0.0,
            lumi_progress: 0.0,
            failure_rate: 0.0,
            estimated_completion: "N/A".to_string(),
            cool_off: 0,
        }
    }
}

/// Running accumulator for one campaign, release or agent.
///
/// Derived percentages are only meaningful once every workflow is folded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Summary {
    pub status: StatusCounters,
    pub requests: u64,
    pub cool_off: u64,
    pub total_events: u64,
    pub total_lumis: u64,
}

pub type CampaignSummary = Summary;
pub type CMSSWSummary = Summary;
pub type AgentSummary = Summary;

/// Zero denominators are replaced by 1.
fn guarded(denominator: u64) -> f64 {
    if denominator == 0 {
        1.0
    } else {
        denominator as f64
    }
}

impl Summary {
    /// Merge agent counters and refresh the scalar cool-off total.
    pub fn merge(&mut self, status: &StatusCounters) {
        self.status.update(status);
        self.cool_off = self.status.cool_off.sum();
    }

    pub fn total_jobs(&self) -> f64 {
        guarded(self.status.wmbs_total_jobs())
    }

    pub fn job_progress(&self) -> f64 {
        let done = self.status.success.saturating_add(self.status.failure.sum());
        100.0 * done as f64 / self.total_jobs()
    }

    pub fn failure_rate(&self) -> f64 {
        100.0 * self.status.failure.sum() as f64 / self.total_jobs()
    }

    pub fn event_progress(&self) -> f64 {
        100.0 * self.avg_events() / guarded(self.total_events)
    }

    pub fn lumi_progress(&self) -> f64 {
        100.0 * self.avg_lumis() / guarded(self.total_lumis)
    }

    // The feed carries no processed event or lumi counts yet.
    fn avg_events(&self) -> f64 {
        1.0
    }

    fn avg_lumis(&self) -> f64 {
        1.0
    }
}

/// Published campaign row
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CampaignStats {
    pub job_progress: f64,
    pub event_progress: f64,
    pub lumi_progress: f64,
    pub failure_rate: f64,
    pub requests: u64,
    pub cool_off: u64,
}

impl From<&Summary> for CampaignStats {
    fn from(summary: &Summary) -> Self {
        Self {
            job_progress: summary.job_progress(),
            event_progress: summary.event_progress(),
            lumi_progress: summary.lumi_progress(),
            failure_rate: summary.failure_rate(),
            requests: summary.requests,
            cool_off: summary.status.cool_off.sum(),
        }
    }
}

/// Published release row
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CMSSWStats {
    pub job_progress: f64,
    pub event_progress: f64,
    pub lumi_progress: f64,
    pub failure_rate: f64,
    pub requests: u64,
    pub cool_off: u64,
}

impl From<&Summary> for CMSSWStats {
    fn from(summary: &Summary) -> Self {
        Self {
            job_progress: summary.job_progress(),
            event_progress: summary.event_progress(),
            lumi_progress: summary.lumi_progress(),
            failure_rate: summary.failure_rate(),
            requests: summary.requests,
            cool_off: summary.cool_off,
        }
    }
}

/// Published agent row
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AgentStats {
    pub failure_rate: f64,
    pub job_progress: f64,
    pub requests: u64,
    pub cool_off: u64,
}

impl From<&Summary> for AgentStats {
    fn from(summary: &Summary) -> Self {
        Self {
            failure_rate: summary.failure_rate(),
            job_progress: summary.job_progress(),
            requests: summary.requests,
            cool_off: summary.cool_off,
        }
    }
}

/// Published site row
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SiteStats {
    pub failure_rate: f64,
    /// Distinct workflows seen at the site
    pub requests: u64,
    pub cool_off: u64,
    pub pending: u64,
    pub running: u64,
    pub fail_jobs: u64,
    pub success_jobs: u64,
}

impl SiteStats {
    /// Fold one per-site breakdown into the running totals.
    pub fn accumulate(&mut self, status: &StatusCounters) {
        self.cool_off = self.cool_off.saturating_add(status.cool_off.sum());
        self.pending = self.pending.saturating_add(status.submitted.pending);
        self.running = self.running.saturating_add(status.submitted.running);
        self.fail_jobs = self.fail_jobs.saturating_add(status.failure.sum());
        self.success_jobs = self.success_jobs.saturating_add(status.success);
    }

    /// Failed share of completed jobs, 0 when nothing has completed.
    pub fn compute_failure_rate(&mut self) {
        let completed = self.fail_jobs.saturating_add(self.success_jobs);
        self.failure_rate = if completed == 0 {
            0.0
        } else {
            100.0 * self.fail_jobs as f64 / completed as f64
        };
    }
}

pub type CampaignStatsMap = BTreeMap<String, CampaignStats>;
pub type SiteStatsMap = BTreeMap<String, SiteStats>;
pub type CMSSWStatsMap = BTreeMap<String, CMSSWStats>;
pub type AgentStatsMap = BTreeMap<String, AgentStats>;

/// Key to the workflows observed under it, in decode order
pub type WorkflowMap = BTreeMap<String, Vec<Workflow>>;
