//! One-shot command line statistics

use std::time::Duration;

use crate::error::Result;
use crate::fetch::SnapshotSource;
use crate::filters::Filters;
use crate::presentation::StatsKind;
use crate::stats::get_stats;

/// Options for a one-shot `stats` run
#[derive(Debug, Clone)]
pub struct StatsOptions {
    pub uri: String,
    pub token: Option<String>,
    pub timeout: Option<Duration>,
    pub kind: StatsKind,
    pub filters: Filters,
    pub verbose: u8,
}

/// Fetch the feed once, aggregate it and render the selected table as text.
pub async fn stats_table(options: &StatsOptions) -> Result<String> {
    let source = SnapshotSource::new(options.uri.clone(), options.token.clone(), options.timeout)?;
    let data = source.fetch().await?;
    let info = get_stats(&data, &options.filters, options.verbose)?;
    Ok(options.kind.table(&info, "").to_text())
}
