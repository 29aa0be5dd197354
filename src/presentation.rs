//! Presentation: summary tables as HTML pages or aligned text
//!
//! The aggregation engine returns typed maps; this module picks the table
//! for a [`StatsKind`] and renders it.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use tera::{Context, Tera};

use crate::aggregate::StatsInfo;
use crate::error::Result;
use crate::filters::Filters;
use crate::models::Workflow;

/// Everything but RFC 3986 unreserved characters is escaped in query values.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encode a value for use inside a query string.
pub fn encode_query_value(value: &str) -> String {
    utf8_percent_encode(value, QUERY_VALUE).to_string()
}

/// Which summary table to show
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsKind {
    #[default]
    Campaign,
    Site,
    Release,
    Agent,
}

impl StatsKind {
    pub const ALL: [StatsKind; 4] = [
        StatsKind::Campaign,
        StatsKind::Site,
        StatsKind::Release,
        StatsKind::Agent,
    ];

    /// Unknown or missing names select the campaign table.
    pub fn parse(name: Option<&str>) -> Self {
        match name.map(|n| n.trim().to_ascii_lowercase()).as_deref() {
            Some("site") => StatsKind::Site,
            Some("cmssw") | Some("release") => StatsKind::Release,
            Some("agent") => StatsKind::Agent,
            _ => StatsKind::Campaign,
        }
    }

    /// Query key used by the drill-down links
    pub fn key(&self) -> &'static str {
        match self {
            StatsKind::Campaign => "campaign",
            StatsKind::Site => "site",
            StatsKind::Release => "cmssw",
            StatsKind::Agent => "agent",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            StatsKind::Campaign => "Campaign",
            StatsKind::Site => "Site",
            StatsKind::Release => "CMSSW",
            StatsKind::Agent => "Agent",
        }
    }

    /// Build the summary table for this kind.
    ///
    /// Row keys link to `{base}/workflows?<key>=<name>`.
    pub fn table(&self, info: &StatsInfo, base: &str) -> Table {
        let link = |name: &str| {
            Some(format!(
                "{}/workflows?{}={}",
                base,
                self.key(),
                encode_query_value(name)
            ))
        };
        let id = format!("{}-stats", self.key());
        match self {
            StatsKind::Campaign => Table::new(
                id,
                &["Campaign", "Requests", "Job Progress", "Event Progress", "Lumi Progress", "Failure Rate", "Cool off"],
                info.campaigns
                    .iter()
                    .map(|(name, s)| {
                        vec![
                            Cell::linked(name, link(name.as_str())),
                            Cell::count(s.requests),
                            Cell::percent(s.job_progress),
                            Cell::percent(s.event_progress),
                            Cell::percent(s.lumi_progress),
                            Cell::percent(s.failure_rate),
                            Cell::count(s.cool_off),
                        ]
                    })
                    .collect(),
            ),
            StatsKind::Site => Table::new(
                id,
                &["Site", "Requests", "Pending", "Running", "CoolOff", "Failure Rate"],
                info.sites
                    .iter()
                    .map(|(name, s)| {
                        vec![
                            Cell::linked(name, link(name.as_str())),
                            Cell::count(s.requests),
                            Cell::count(s.pending),
                            Cell::count(s.running),
                            Cell::count(s.cool_off),
                            Cell::percent(s.failure_rate),
                        ]
                    })
                    .collect(),
            ),
            StatsKind::Release => Table::new(
                id,
                &["CMSSW", "Requests", "Job Progress", "Event Progress", "Lumi Progress", "Failure Rate", "Cool off"],
                info.releases
                    .iter()
                    .map(|(name, s)| {
                        vec![
                            Cell::linked(name, link(name.as_str())),
                            Cell::count(s.requests),
                            Cell::percent(s.job_progress),
                            Cell::percent(s.event_progress),
                            Cell::percent(s.lumi_progress),
                            Cell::percent(s.failure_rate),
                            Cell::count(s.cool_off),
                        ]
                    })
                    .collect(),
            ),
            StatsKind::Agent => Table::new(
                id,
                &["Agent", "Requests", "Job Progress", "Failure Rate", "Cool off"],
                info.agents
                    .iter()
                    .map(|(name, s)| {
                        vec![
                            Cell::linked(name, link(name.as_str())),
                            Cell::count(s.requests),
                            Cell::percent(s.job_progress),
                            Cell::percent(s.failure_rate),
                            Cell::count(s.cool_off),
                        ]
                    })
                    .collect(),
            ),
        }
    }

    /// Drill-down index for this kind
    pub fn workflows<'a>(&self, info: &'a StatsInfo, name: &str) -> Option<&'a Vec<Workflow>> {
        match self {
            StatsKind::Campaign => info.campaign_workflows.get(name),
            StatsKind::Site => info.site_workflows.get(name),
            StatsKind::Release => info.release_workflows.get(name),
            StatsKind::Agent => info.agent_workflows.get(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cell {
    pub text: String,
    pub link: Option<String>,
}

impl Cell {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            link: None,
        }
    }

    fn linked(text: &str, link: Option<String>) -> Self {
        Self {
            text: text.to_string(),
            link,
        }
    }

    fn count(value: u64) -> Self {
        Self::text(value.to_string())
    }

    fn percent(value: f64) -> Self {
        Self::text(format!("{:.1}", value))
    }
}

/// Rendering-neutral table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub id: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    fn new(id: String, headers: &[&str], rows: Vec<Vec<Cell>>) -> Self {
        Self {
            id,
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows,
        }
    }

    /// Workflow drill-down listing
    pub fn workflows(workflows: &[Workflow]) -> Self {
        Table::new(
            "wmap".to_string(),
            &[
                "Workflow",
                "Status",
                "Type",
                "Priority",
                "Queue Injection",
                "Job Progress",
                "Event Progress",
                "Lumi Progress",
                "Failure Rate",
                "Estimated completion",
                "Cool off",
            ],
            workflows
                .iter()
                .map(|w| {
                    vec![
                        Cell::linked(
                            &w.workflow,
                            Some(format!(
                                "https://cmsweb.cern.ch/reqmgr2/fetch?rid={}",
                                encode_query_value(&w.workflow)
                            )),
                        ),
                        Cell::text(w.status.as_str()),
                        Cell::text(w.request_type.as_str()),
                        Cell::text(w.priority.to_string()),
                        Cell::percent(w.queue_injection),
                        Cell::percent(w.job_progress),
                        Cell::percent(w.event_progress),
                        Cell::percent(w.lumi_progress),
                        Cell::percent(w.failure_rate),
                        Cell::text(w.estimated_completion.as_str()),
                        Cell::count(w.cool_off),
                    ]
                })
                .collect(),
        )
    }

    /// Column-aligned text, each column padded to its widest cell.
    pub fn to_text(&self) -> String {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                if let Some(width) = widths.get_mut(i) {
                    *width = (*width).max(cell.text.chars().count());
                }
            }
        }

        let line = |cells: Vec<&str>| -> String {
            cells
                .iter()
                .zip(&widths)
                .map(|(text, width)| format!("{:<width$}", text, width = *width))
                .collect::<Vec<_>>()
                .join("  ")
                .trim_end()
                .to_string()
        };

        let mut out = line(self.headers.iter().map(String::as_str).collect());
        out.push('\n');
        for row in &self.rows {
            out.push_str(&line(row.iter().map(|c| c.text.as_str()).collect()));
            out.push('\n');
        }
        out
    }
}

const PAGE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>WMStats</title>
<style>
body { font-family: sans-serif; margin: 1.5em; }
table { border-collapse: collapse; }
th, td { border: 1px solid #ccc; padding: 0.3em 0.6em; text-align: left; }
tr:nth-child(even) { background: #f5f5f5; }
.menu a { margin-right: 1em; }
.filter { background: #e8f0fe; border-radius: 3px; padding: 0.1em 0.4em; margin-right: 0.4em; }
</style>
</head>
<body>
<div class="menu">
{% for item in menu %}<a href="{{ base | safe }}/?stats={{ item.key }}{% if filters %}&filters={{ filters | urlencode_strict }}{% endif %}">{{ item.title }}</a>{% endfor %}
</div>
<form method="get" action="{{ base | safe }}/">
<input type="hidden" name="stats" value="{{ stats }}">
<input type="text" name="filters" size="50" placeholder="site=T1_.*,campaign=Run2022.*" value="{{ filters }}">
<input type="submit" value="Filter">
</form>
<p>{% for f in active_filters %}<span class="filter">{{ f.0 }}={{ f.1 }}</span>{% endfor %}</p>
{% if title %}<h4>{{ title }}</h4>{% endif %}
{% if table %}
<table id="{{ table.id }}">
<tr>{% for h in table.headers %}<th>{{ h }}</th>{% endfor %}</tr>
{% for row in table.rows %}<tr>{% for cell in row %}<td>{% if cell.link %}<a href="{{ cell.link }}">{{ cell.text }}</a>{% else %}{{ cell.text }}{% endif %}</td>{% endfor %}</tr>
{% endfor %}</table>
{% else %}
<p>{{ message }}</p>
{% endif %}
<footer><small>{{ server }}</small></footer>
</body>
</html>
"#;

#[derive(Serialize)]
struct MenuItem {
    key: &'static str,
    title: &'static str,
}

/// HTML page renderer backed by an embedded tera template
pub struct Pages {
    tera: Tera,
    base: String,
    server: String,
}

impl Pages {
    pub fn new(base: impl Into<String>, server: impl Into<String>) -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_template("page.html", PAGE_TEMPLATE)?;
        Ok(Self {
            tera,
            base: base.into(),
            server: server.into(),
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Render a page around `table`, or around `message` when there is none.
    pub fn render(
        &self,
        stats: StatsKind,
        filters: &Filters,
        title: Option<&str>,
        table: Option<&Table>,
        message: &str,
    ) -> Result<String> {
        let menu: Vec<MenuItem> = StatsKind::ALL
            .iter()
            .map(|k| MenuItem {
                key: k.key(),
                title: k.title(),
            })
            .collect();
        let active: Vec<(&str, &str)> = filters.iter().collect();

        let mut context = Context::new();
        context.insert("base", &self.base);
        context.insert("server", &self.server);
        context.insert("menu", &menu);
        context.insert("stats", stats.key());
        context.insert("filters", &filters.to_string());
        context.insert("active_filters", &active);
        context.insert("title", &title);
        context.insert("table", &table);
        context.insert("message", message);
        Ok(self.tera.render("page.html", &context)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CampaignStats, SiteStats};

    fn info() -> StatsInfo {
        let mut info = StatsInfo::default();
        info.campaigns.insert(
            "Run2022".to_string(),
            CampaignStats {
                job_progress: 100.0,
                event_progress: 100.0,
                lumi_progress: 100.0,
                failure_rate: 20.0,
                requests: 1,
                cool_off: 0,
            },
        );
        info.sites.insert(
            "T1_US_FNAL".to_string(),
            SiteStats {
                failure_rate: 20.0,
                requests: 12,
                pending: 3,
                running: 40,
                ..Default::default()
            },
        );
        info
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!(StatsKind::parse(Some("site")), StatsKind::Site);
        assert_eq!(StatsKind::parse(Some("cmssw")), StatsKind::Release);
        assert_eq!(StatsKind::parse(Some("release")), StatsKind::Release);
        assert_eq!(StatsKind::parse(Some("Agent")), StatsKind::Agent);
        assert_eq!(StatsKind::parse(Some("bogus")), StatsKind::Campaign);
        assert_eq!(StatsKind::parse(None), StatsKind::Campaign);
    }

    #[test]
    fn test_campaign_table_links_to_workflows() {
        let table = StatsKind::Campaign.table(&info(), "/wmstats");
        assert_eq!(table.headers.len(), 7);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(
            table.rows[0][0].link.as_deref(),
            Some("/wmstats/workflows?campaign=Run2022")
        );
        assert_eq!(table.rows[0][5].text, "20.0");
    }

    #[test]
    fn test_text_table_is_aligned() {
        let text = StatsKind::Site.table(&info(), "").to_text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Site        Requests"));
        assert!(lines[1].starts_with("T1_US_FNAL  12"));
        let header_col = lines[0].find("Pending").unwrap();
        assert_eq!(&lines[1][header_col..header_col + 1], "3");
    }

    #[test]
    fn test_empty_table_has_header_only() {
        let text = StatsKind::Agent.table(&StatsInfo::default(), "").to_text();
        assert_eq!(text, "Agent  Requests  Job Progress  Failure Rate  Cool off\n");
    }

    #[test]
    fn test_render_page_escapes_html() {
        let pages = Pages::new("", "wmstats test").unwrap();
        let mut info = info();
        info.campaigns.insert("<script>".to_string(), CampaignStats::default());
        let table = StatsKind::Campaign.table(&info, "");
        let html = pages
            .render(StatsKind::Campaign, &Filters::parse("site=T1.*"), None, Some(&table), "")
            .unwrap();

        assert!(html.contains("<table id=\"campaign-stats\">"));
        assert!(html.contains("Run2022"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("site=T1.*"));
    }

    #[test]
    fn test_render_page_without_table() {
        let pages = Pages::new("/base", "wmstats test").unwrap();
        let html = pages
            .render(StatsKind::Site, &Filters::new(), None, None, "Unknown key")
            .unwrap();
        assert!(html.contains("Unknown key"));
        assert!(html.contains("href=\"/base/?stats=site\""));
    }

    fn query_value<'a>(link: &'a str, key: &str) -> std::borrow::Cow<'a, str> {
        let start = link.find(&format!("{}=", key)).unwrap() + key.len() + 1;
        let rest = &link[start..];
        let end = rest.find(['&', '"']).unwrap_or(rest.len());
        percent_encoding::percent_decode_str(&rest[..end])
            .decode_utf8()
            .unwrap()
    }

    #[test]
    fn test_drill_down_links_encode_names() {
        let mut info = StatsInfo::default();
        info.agents
            .insert("a&b+c#d".to_string(), Default::default());
        let table = StatsKind::Agent.table(&info, "");
        let link = table.rows[0][0].link.clone().unwrap();

        assert_eq!(link, "/workflows?agent=a%26b%2Bc%23d");
        assert_eq!(query_value(&link, "agent"), "a&b+c#d");
    }

    #[test]
    fn test_menu_links_keep_regex_filters() {
        let pages = Pages::new("", "wmstats test").unwrap();
        let filters = Filters::parse("campaign=Run2022.+");
        let html = pages
            .render(StatsKind::Campaign, &filters, None, None, "")
            .unwrap();

        let start = html.find("?stats=site").unwrap();
        let link = &html[start..];
        assert!(link.starts_with("?stats=site&filters=campaign%3DRun2022%2E%2B\""));
        assert_eq!(query_value(link, "filters"), "campaign=Run2022.+");
    }
}
