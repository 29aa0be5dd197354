//! HTML dashboard pages

use axum::{
    extract::{Query, State},
    response::Html,
};
use serde::Deserialize;
use tracing::debug;

use crate::error::Result;
use crate::filters::Filters;
use crate::presentation::{StatsKind, Table};
use crate::state::AppState;

/// Query parameters for the main page
#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    /// Table to show: campaign, site, cmssw or agent
    pub stats: Option<String>,
    /// Filters as `key=value` pairs separated by commas
    pub filters: Option<String>,
}

impl StatsQuery {
    pub fn kind(&self) -> StatsKind {
        StatsKind::parse(self.stats.as_deref())
    }

    pub fn filters(&self) -> Filters {
        self.filters.as_deref().map(Filters::parse).unwrap_or_default()
    }
}

/// Query parameters for the workflows drill-down
#[derive(Debug, Default, Deserialize)]
pub struct WorkflowsQuery {
    pub campaign: Option<String>,
    pub site: Option<String>,
    pub cmssw: Option<String>,
    pub agent: Option<String>,
    pub filters: Option<String>,
}

impl WorkflowsQuery {
    /// First drill-down key present, checked in campaign, site, cmssw, agent order.
    pub fn selection(&self) -> Option<(StatsKind, &str)> {
        [
            (StatsKind::Campaign, &self.campaign),
            (StatsKind::Site, &self.site),
            (StatsKind::Release, &self.cmssw),
            (StatsKind::Agent, &self.agent),
        ]
        .into_iter()
        .find_map(|(kind, value)| {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .map(|v| (kind, v))
        })
    }

    pub fn filters(&self) -> Filters {
        self.filters.as_deref().map(Filters::parse).unwrap_or_default()
    }
}

/// GET /
///
/// Summary table for the selected kind.
pub async fn main_page(
    State(state): State<AppState>,
    Query(params): Query<StatsQuery>,
) -> Result<Html<String>> {
    let kind = params.kind();
    let filters = params.filters();
    debug!(stats = ?kind, filters = %filters, "Rendering dashboard");

    let info = state.stats(filters.clone()).await?;
    let table = kind.table(&info, state.pages.base());
    let page = state.pages.render(kind, &filters, None, Some(&table), "")?;
    Ok(Html(page))
}

/// GET /workflows
///
/// Workflows observed under one campaign, site, release or agent.
pub async fn workflows_page(
    State(state): State<AppState>,
    Query(params): Query<WorkflowsQuery>,
) -> Result<Html<String>> {
    let filters = params.filters();
    let info = state.stats(filters.clone()).await?;

    let page = match params.selection() {
        Some((kind, name)) => match kind.workflows(&info, name) {
            Some(workflows) => {
                let title = format!("Workflows associated with {} {}", name, kind.key());
                let table = Table::workflows(workflows);
                state
                    .pages
                    .render(kind, &filters, Some(&title), Some(&table), "")?
            }
            None => state.pages.render(
                kind,
                &filters,
                None,
                None,
                &format!("No workflows found for {} {}", kind.key(), name),
            )?,
        },
        None => state.pages.render(
            StatsKind::Campaign,
            &filters,
            None,
            None,
            "Unknown key: use one of campaign, site, cmssw or agent",
        )?,
    };
    Ok(Html(page))
}
