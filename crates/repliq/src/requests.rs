//! 📝 Request Materializer — turns "I'd like `/repos/golang/go/issues`, please" into a request
//! that knows its verb, its destination table, and which speed limit it answers to.
//!
//! 🎬 *[three requests walk into a bar. the bartender hands them ONE tab.]*
//! *["it's a shared rate limit," he says. "you'll thank me when the API doesn't ban you."]*
//!
//! 🧠 Knowledge graph:
//! - Input: `config::RequestDeclaration` (method/table optional)
//! - Output: [`Request`] (method/table always present, budget always attached)
//! - The budget is an `Arc` clone, never a fresh limiter: sharing the *instance* is the
//!   whole enforcement mechanism. N limiters = N times the traffic. Ask us how we know. 🦆
//! - Pure and synchronous: no I/O, no sleeping, no surprises.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::{Method, Url};
use tracing::debug;

use crate::config::{RequestDeclaration, parse_method};
use crate::errors::ResolveError;
use crate::rate_budget::SharedRateBudget;

/// 📦 A fully materialized request, ready for the executor.
#[derive(Debug, Clone)]
pub struct Request {
    pub endpoint: String,
    pub query: BTreeMap<String, String>,
    pub method: Method,
    /// 🗄️ Destination table/collection. Declared, or derived from the endpoint's last segment.
    pub table: String,
    /// 🚦 The job-wide budget. Same `Arc` in every request of the job.
    pub rate_budget: SharedRateBudget,
}

impl Request {
    /// 📡 The absolute URL for this request: service base + endpoint + query pairs.
    ///
    /// The base's own path is kept, so `https://host/api/v3` + `/issues` lands on
    /// `https://host/api/v3/issues` instead of quietly dropping the `/api/v3`.
    pub fn url(&self, service_url: &Url) -> Result<Url> {
        let base = service_url.as_str().trim_end_matches('/');
        let endpoint = self.endpoint.trim_start_matches('/');
        let mut url = Url::parse(&format!("{base}/{endpoint}")).with_context(|| {
            format!(
                "💀 Could not glue endpoint '{}' onto '{}'. The URL parser has standards, apparently.",
                self.endpoint, service_url
            )
        })?;
        if !self.query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(self.query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        Ok(url)
    }
}

/// 🏷️ Derive a table name from an endpoint: the last non-empty path segment.
///
/// `/repos/golang/go/issues` → `issues`. `/a//b/` → `b`. `///` → `None`.
/// Deterministic and idempotent, which is a fancy way of saying "it's a string split".
pub fn derive_table(endpoint: &str) -> Option<&str> {
    endpoint
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty())
        .last()
}

/// 🔄 Materialize every declaration, in order, against one shared budget.
///
/// For each declaration: attach the budget (by `Arc`), default the method to `GET`,
/// derive the table when absent. Declared values are never overwritten.
///
/// ⚠️ The only possible error is an endpoint with no segments and no explicit table.
/// `ConfigDocument::validate` already rejects those, so inside a resolution this never fails.
pub fn materialize(
    budget: &SharedRateBudget,
    declarations: Vec<RequestDeclaration>,
) -> Result<Vec<Request>, ResolveError> {
    declarations
        .into_iter()
        .enumerate()
        .map(|(idx, declaration)| materialize_one(idx, budget, declaration))
        .collect()
}

fn materialize_one(
    idx: usize,
    budget: &SharedRateBudget,
    declaration: RequestDeclaration,
) -> Result<Request, ResolveError> {
    let RequestDeclaration {
        endpoint,
        query,
        method,
        table,
    } = declaration;

    let method = match method.as_deref().map(str::trim) {
        None | Some("") => Method::GET,
        Some(raw) => parse_method(raw).ok_or_else(|| {
            ResolveError::invalid(
                format!("requests[{idx}].method"),
                format!("'{raw}' is not an HTTP method"),
            )
        })?,
    };

    let table = match table.filter(|t| !t.trim().is_empty()) {
        Some(declared) => declared,
        None => derive_table(&endpoint)
            .map(str::to_owned)
            .ok_or_else(|| {
                ResolveError::invalid(
                    format!("requests[{idx}].table"),
                    format!("cannot derive a table from endpoint '{endpoint}'"),
                )
            })?,
    };

    debug!(
        request = idx,
        %method,
        table = %table,
        "📝 materialized request for '{}'",
        endpoint
    );

    Ok(Request {
        endpoint,
        query,
        method,
        table,
        rate_budget: Arc::clone(budget),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::rate_budget::RateBudget;
    use std::time::Duration;

    fn shared_budget(burst: i64) -> SharedRateBudget {
        Arc::new(
            RateBudget::derive(Some(&RateLimitConfig::new(burst, Duration::from_secs(1))))
                .expect("💀 A sane rate limit should build a sane budget."),
        )
    }

    #[test]
    fn the_one_where_the_last_segment_becomes_the_table() {
        assert_eq!(derive_table("/repos/golang/go/issues"), Some("issues"));
        assert_eq!(derive_table("/search/titles/results"), Some("results"));
        assert_eq!(derive_table("issues/"), Some("issues"));
        assert_eq!(derive_table("//a//b//"), Some("b"));
        assert_eq!(derive_table("\\windows\\flavoured"), Some("flavoured"));
        assert_eq!(derive_table("/"), None);
        assert_eq!(derive_table(""), None);
    }

    #[test]
    fn the_one_where_deriving_twice_changes_nothing() {
        let endpoint = "/repos/golang/go/issues";
        let once = derive_table(endpoint);
        let twice = once.and_then(derive_table);
        assert_eq!(once, twice);
    }

    #[test]
    fn the_one_where_defaults_fill_the_gaps_and_declared_values_win() {
        let budget = shared_budget(10);
        let requests = materialize(
            &budget,
            vec![
                RequestDeclaration::new("/repos/golang/go/issues")
                    .with_query("format", "json")
                    .with_query("page", "5"),
                RequestDeclaration::new("/repos/golang/go/pulls")
                    .with_method("post")
                    .with_table("pull_requests"),
            ],
        )
        .expect("💀 Two perfectly reasonable requests failed to materialize.");

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].method, Method::GET);
        assert_eq!(requests[0].table, "issues");
        assert_eq!(requests[0].query.get("page").map(String::as_str), Some("5"));
        assert_eq!(requests[1].method, Method::POST);
        assert_eq!(requests[1].table, "pull_requests");
    }

    #[test]
    fn the_one_where_everyone_shares_the_same_speed_limit() {
        let budget = shared_budget(10);
        let requests = materialize(
            &budget,
            vec![
                RequestDeclaration::new("/a"),
                RequestDeclaration::new("/b"),
                RequestDeclaration::new("/c"),
            ],
        )
        .expect("💀 Three one-letter endpoints should not be this hard.");

        for request in &requests {
            assert!(Arc::ptr_eq(&request.rate_budget, &budget));
        }
        // -- 1 held by the test + 3 held by the requests. Not a single clone of the limiter itself.
        assert_eq!(Arc::strong_count(&budget), 4);
    }

    #[test]
    fn the_one_where_an_empty_request_list_is_still_a_list() {
        let budget = shared_budget(1);
        let requests = materialize(&budget, Vec::new())
            .expect("💀 Nothing in, nothing out. Should be the easiest job in the crate.");
        assert!(requests.is_empty());
    }

    #[test]
    fn the_one_where_a_segmentless_endpoint_is_refused_not_blanked() {
        let budget = shared_budget(1);
        let err = materialize(&budget, vec![RequestDeclaration::new("///")])
            .expect_err("💀 An endpoint with no segments must not become an empty table name.");
        match err {
            ResolveError::ConfigValidation { field, .. } => assert_eq!(field, "requests[0].table"),
            other => panic!("💀 Wrong flavour of error: {other:?}"),
        }
    }

    #[test]
    fn the_one_where_urls_keep_their_base_path_and_query() {
        let budget = shared_budget(1);
        let requests = materialize(
            &budget,
            vec![
                RequestDeclaration::new("/search/titles/results")
                    .with_query("terms", "oakland")
                    .with_query("format", "json"),
            ],
        )
        .expect("💀 materialize refused a textbook request");

        let base = Url::parse("https://chroniclingamerica.loc.gov/api/").expect("valid base");
        let url = requests[0].url(&base).expect("💀 URL assembly failed");
        assert_eq!(
            url.as_str(),
            "https://chroniclingamerica.loc.gov/api/search/titles/results?format=json&terms=oakland"
        );
    }
}
