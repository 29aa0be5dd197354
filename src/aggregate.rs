//! Aggregation engine
//!
//! Folds the decoded workflow records into campaign, site, release and agent
//! summaries plus the four workflow drill-down indexes. Every call starts from
//! empty maps; nothing survives between calls.
//!
//! Filters are applied inline: sites are pruned after the site totals are
//! final, campaigns are skipped while the campaign summaries are seeded. The
//! workflow indexes are built before either step and keep filtered-out keys.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::time::Instant;
use tracing::{debug, info, trace};

use crate::filters::{Filters, CAMPAIGN, SITE};
use crate::models::{
    AgentStats, AgentStatsMap, AgentSummary, CMSSWStats, CMSSWStatsMap, CMSSWSummary,
    CampaignStats, CampaignStatsMap, CampaignSummary, SiteStatsMap, StatusCounters,
    Workflow, WorkflowInfo, WorkflowMap, WorkflowRecord,
};

/// Everything one aggregation pass publishes
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsInfo {
    pub campaigns: CampaignStatsMap,
    pub sites: SiteStatsMap,
    pub releases: CMSSWStatsMap,
    pub agents: AgentStatsMap,
    pub campaign_workflows: WorkflowMap,
    pub site_workflows: WorkflowMap,
    pub release_workflows: WorkflowMap,
    pub agent_workflows: WorkflowMap,
}

/// Working state for a single fold pass
#[derive(Default)]
struct Aggregator {
    verbose: u8,
    workflows: BTreeMap<String, WorkflowInfo>,
    release_summary: BTreeMap<String, CMSSWSummary>,
    agent_summary: BTreeMap<String, AgentSummary>,
    campaign_summary: BTreeMap<String, CampaignSummary>,
    site_workflow_names: BTreeMap<String, HashSet<String>>,
    info: StatsInfo,
}

fn append(index: &mut WorkflowMap, key: &str, workflow: &Workflow) {
    index
        .entry(key.to_string())
        .or_default()
        .push(workflow.clone());
}

impl Aggregator {
    fn new(verbose: u8) -> Self {
        Self {
            verbose,
            ..Default::default()
        }
    }

    fn fold_workflow(&mut self, name: &str, record: &WorkflowRecord) {
        if self.verbose > 1 {
            trace!(workflow = name, agents = record.agents.len(), "Folding workflow");
        }

        let view = Workflow::from_record(name, record);
        append(&mut self.info.campaign_workflows, &record.campaign, &view);
        append(&mut self.info.release_workflows, &record.cmssw_version, &view);

        // Known even when no agent reports for it.
        let base = WorkflowInfo {
            name: name.to_string(),
            campaign: record.campaign.clone(),
            request_type: record.request_type.clone(),
            priority: record.priority,
            sites: record.sites.clone(),
            agents: Vec::new(),
            status: StatusCounters::default(),
        };
        // An earlier agent breakdown may already have created this entry; its
        // counters stay and only the descriptive fields are refreshed.
        let entry = self
            .workflows
            .entry(name.to_string())
            .or_insert_with(|| base.clone());
        entry.campaign = base.campaign.clone();
        entry.request_type = base.request_type.clone();
        entry.priority = base.priority;
        entry.sites = base.sites.clone();

        self.release_summary
            .entry(record.cmssw_version.clone())
            .or_default()
            .requests += 1;

        let mut agents = Vec::with_capacity(record.agents.len());
        for (agent, breakdown) in &record.agents {
            append(&mut self.info.agent_workflows, agent, &view);
            agents.push(agent.clone());

            let target = if breakdown.workflow.is_empty() {
                name
            } else {
                breakdown.workflow.as_str()
            };
            self.workflows
                .entry(target.to_string())
                .or_insert_with(|| WorkflowInfo {
                    name: target.to_string(),
                    ..base.clone()
                })
                .status
                .update(&breakdown.status);

            self.release_summary
                .entry(record.cmssw_version.clone())
                .or_default()
                .merge(&breakdown.status);

            let agent_summary = self.agent_summary.entry(agent.clone()).or_default();
            agent_summary.requests += 1;
            agent_summary.merge(&breakdown.status);

            for (site, status) in &breakdown.sites {
                append(&mut self.info.site_workflows, site, &view);
                self.info
                    .sites
                    .entry(site.clone())
                    .or_default()
                    .accumulate(status);
                self.site_workflow_names
                    .entry(site.clone())
                    .or_default()
                    .insert(target.to_string());
            }
        }

        if let Some(workflow) = self.workflows.get_mut(name) {
            for agent in agents {
                if !workflow.agents.contains(&agent) {
                    workflow.agents.push(agent);
                }
            }
        }
    }

    /// Site totals are final only after every workflow is folded.
    fn finish_sites(&mut self, filters: &Filters) {
        for (site, stats) in self.info.sites.iter_mut() {
            stats.requests = self
                .site_workflow_names
                .get(site)
                .map(|names| names.len() as u64)
                .unwrap_or(0);
            stats.compute_failure_rate();
            if self.verbose > 1 {
                trace!(site = %site, stats = ?stats, "Site stats");
            }
        }

        let matcher = filters.matcher(SITE);
        self.info.sites.retain(|site, _| matcher.keeps(site));
        debug!(sites = self.info.sites.len(), "Site stats prepared");
    }

    fn finish_campaigns(&mut self, filters: &Filters) {
        let matcher = filters.matcher(CAMPAIGN);
        for workflow in self.workflows.values() {
            if !matcher.keeps(&workflow.campaign) {
                continue;
            }
            let summary = self
                .campaign_summary
                .entry(workflow.campaign.clone())
                .or_default();
            summary.requests += 1;
            summary.merge(&workflow.status);
        }

        for (campaign, summary) in &self.campaign_summary {
            let stats = CampaignStats::from(summary);
            if self.verbose > 1 {
                trace!(campaign = %campaign, stats = ?stats, "Campaign stats");
            }
            self.info.campaigns.insert(campaign.clone(), stats);
        }
        debug!(campaigns = self.info.campaigns.len(), "Campaign stats prepared");
    }

    fn finish_releases_and_agents(&mut self) {
        for (release, summary) in &self.release_summary {
            if self.verbose > 1 {
                trace!(release = %release, summary = ?summary, "Release summary");
            }
            self.info
                .releases
                .insert(release.clone(), CMSSWStats::from(summary));
        }
        for (agent, summary) in &self.agent_summary {
            if self.verbose > 1 {
                trace!(agent = %agent, summary = ?summary, "Agent summary");
            }
            self.info
                .agents
                .insert(agent.clone(), AgentStats::from(summary));
        }
    }

    fn finish(mut self, filters: &Filters) -> StatsInfo {
        self.finish_sites(filters);
        self.finish_campaigns(filters);
        self.finish_releases_and_agents();
        self.info
    }
}

/// Fold decoded records into summary tables and drill-down indexes.
///
/// `verbose` only raises diagnostic tracing; it never changes the result.
pub fn aggregate(records: &[(String, WorkflowRecord)], filters: &Filters, verbose: u8) -> StatsInfo {
    let started = Instant::now();
    let mut aggregator = Aggregator::new(verbose);
    for (name, record) in records {
        aggregator.fold_workflow(name, record);
    }
    let workflows = aggregator.workflows.len();
    let info = aggregator.finish(filters);

    info!(
        workflows = workflows,
        campaigns = info.campaigns.len(),
        sites = info.sites.len(),
        releases = info.releases.len(),
        agents = info.agents.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Aggregated workflow statistics"
    );
    info
}
