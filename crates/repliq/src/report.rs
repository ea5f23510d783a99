//! 📊 Job report — what got resolved, in a shape humans (table) and machines (JSON) can read.
//!
//! 🎬 *[the resolution is over. the credits roll. everyone wants to know who was in it.]*
//!
//! No secrets in here: connection strings are the redacted form, credentials are reduced
//! to the name of the scheme. Paste it in a ticket. Paste it in a channel. Frame it.

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use serde::Serialize;

/// 📋 Everything worth printing about a resolved job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub service_url: String,
    /// 🔒 `api_key`, `basic`, `bearer`, or absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<&'static str>,
    pub rate_limit: RateLimitSummary,
    pub requests: Vec<RequestSummary>,
    pub storage: Vec<StorageSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitSummary {
    pub unlimited: bool,
    /// Permits per second. Absent when unlimited, since JSON has no infinity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permits_per_second: Option<f64>,
    pub burst: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestSummary {
    pub method: String,
    pub endpoint: String,
    pub table: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageSummary {
    pub kind: String,
    pub connection_string: String,
    pub database: String,
}

/// 🍽️ Render the summary as plain-text tables, no borders (preset: NOTHING).
pub fn render_table(summary: &JobSummary) -> String {
    let rate = if summary.rate_limit.unlimited {
        "unlimited".to_string()
    } else {
        format!(
            "{:.2} req/s, burst {}",
            summary.rate_limit.permits_per_second.unwrap_or_default(),
            summary.rate_limit.burst
        )
    };

    let mut header = Table::new();
    header.load_preset(NOTHING);
    header.add_row(vec![Cell::new("service"), Cell::new(&summary.service_url)]);
    header.add_row(vec![Cell::new("rate limit"), Cell::new(rate)]);
    if let Some(auth) = summary.authentication {
        header.add_row(vec![Cell::new("auth"), Cell::new(auth)]);
    }

    let mut requests = Table::new();
    requests.load_preset(NOTHING);
    requests.set_content_arrangement(ContentArrangement::Dynamic);
    requests.set_header(vec!["#", "METHOD", "TABLE", "URL"]);
    for (index, request) in summary.requests.iter().enumerate() {
        requests.add_row(vec![
            Cell::new(index).set_alignment(CellAlignment::Right),
            Cell::new(&request.method),
            Cell::new(&request.table),
            Cell::new(&request.url),
        ]);
    }

    let mut storage = Table::new();
    storage.load_preset(NOTHING);
    storage.set_content_arrangement(ContentArrangement::Dynamic);
    storage.set_header(vec!["#", "KIND", "DATABASE", "CONNECTION"]);
    for (index, target) in summary.storage.iter().enumerate() {
        storage.add_row(vec![
            Cell::new(index).set_alignment(CellAlignment::Right),
            Cell::new(&target.kind),
            Cell::new(&target.database),
            Cell::new(&target.connection_string),
        ]);
    }

    format!("{header}\n\n📝 requests\n{requests}\n\n🗄️ storage\n{storage}")
}
