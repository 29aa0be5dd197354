//! JSON API over the aggregated statistics

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Serialize;

use crate::aggregate::StatsInfo;
use crate::error::{AppError, Result};
use crate::models::Workflow;
use crate::routes::dashboard::{StatsQuery, WorkflowsQuery};
use crate::state::AppState;

/// GET /api/stats
///
/// Full aggregation result: the four summary maps and four workflow indexes.
pub async fn stats(
    State(state): State<AppState>,
    Query(params): Query<StatsQuery>,
) -> Result<Json<StatsInfo>> {
    let info = state.stats(params.filters()).await?;
    Ok(Json(info))
}

#[derive(Debug, Serialize)]
pub struct WorkflowsResponse {
    pub kind: &'static str,
    pub key: String,
    pub count: usize,
    pub workflows: Vec<Workflow>,
}

/// GET /api/workflows
///
/// Drill-down listing for one campaign, site, release or agent.
pub async fn workflows(
    State(state): State<AppState>,
    Query(params): Query<WorkflowsQuery>,
) -> Result<Json<WorkflowsResponse>> {
    let (kind, name) = params.selection().ok_or_else(|| {
        AppError::InvalidRequest("one of campaign, site, cmssw or agent is required".into())
    })?;
    let info = state.stats(params.filters()).await?;
    let workflows = kind
        .workflows(&info, name)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("{} {}", kind.key(), name)))?;

    Ok(Json(WorkflowsResponse {
        kind: kind.key(),
        key: name.to_string(),
        count: workflows.len(),
        workflows,
    }))
}
