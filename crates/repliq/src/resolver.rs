//! # 🎬 THE CONFIG RESOLVER
//!
//! 🎬 COLD OPEN — INT. PRODUCTION OFFICE — MONDAY MORNING
//!
//! A document lands on the desk: one service URL, a rate limit, a handful of requests, and a
//! list of places to put the results. By lunchtime it needs to be a Job: every request bound to
//! the same throttle, every destination open and answering. Or a clear, itemised explanation of
//! why not, with nothing left running.
//!
//! 🧠 Knowledge graph:
//! - `validate` first, always. Nothing opens before the paperwork is in order.
//! - rate budget: derived once per document, or reused when the caller brought one
//! - requests and storage are resolved side by side (`tokio::join!`), they share nothing
//! - all-or-nothing: there is no "mostly resolved" Job
//! - the Job owns every storage handle; `Job::close` lets them go, exactly once each 🦆

use std::sync::Arc;

use anyhow::Result;
use reqwest::Url;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{Authentication, ConfigDocument};
use crate::errors::ResolveError;
use crate::rate_budget::{RateBudget, SharedRateBudget};
use crate::report::{JobSummary, RateLimitSummary, RequestSummary, StorageSummary};
use crate::requests::{Request, materialize};
use crate::storage::{ResolvedStorage, StorageRegistry, release_all, resolve_storage};

/// 🏭 Turns documents into jobs. Holds the backend registry and, optionally, a budget to reuse.
#[derive(Debug, Clone, Default)]
pub struct ConfigResolver {
    registry: StorageRegistry,
    rate_budget: Option<SharedRateBudget>,
}

impl ConfigResolver {
    pub fn new(registry: StorageRegistry) -> Self {
        Self {
            registry,
            rate_budget: None,
        }
    }

    /// 🔗 Reuse an existing budget instead of deriving one from each document's `rate_limit`.
    /// Every job resolved through this resolver then shares that one throttle.
    pub fn with_rate_budget(mut self, budget: SharedRateBudget) -> Self {
        self.rate_budget = Some(budget);
        self
    }

    pub fn registry(&self) -> &StorageRegistry {
        &self.registry
    }

    /// 🚀 Validate, derive the budget, materialize requests, resolve storage. In that spirit,
    /// if not strictly that order: the last two run concurrently.
    pub async fn resolve(
        &self,
        document: ConfigDocument,
        cancel: &CancellationToken,
    ) -> Result<Job, ResolveError> {
        document.validate()?;
        if cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }

        let service_url = Url::parse(document.url.trim())
            .map_err(|err| ResolveError::invalid("url", err.to_string()))?;
        let ConfigDocument {
            rate_limit,
            authentication,
            requests,
            storage,
            ..
        } = document;

        let rate_budget = match &self.rate_budget {
            Some(budget) => Arc::clone(budget),
            None => Arc::new(RateBudget::derive(rate_limit.as_ref())?),
        };

        info!(
            service = %service_url,
            requests = requests.len(),
            storage = storage.len(),
            "🎬 resolving configuration"
        );

        let (requests, storage) = tokio::join!(
            async { materialize(&rate_budget, requests) },
            resolve_storage(&self.registry, storage, cancel),
        );
        let storage = storage?;
        let requests = match requests {
            Ok(requests) => requests,
            Err(err) => {
                if let Err(release_err) = release_all(storage).await {
                    warn!(error = %format!("{release_err:#}"), "⚠️ cleanup after a failed materialization was not clean");
                }
                return Err(err);
            }
        };

        info!(
            requests = requests.len(),
            storage = storage.len(),
            "✅ job ready"
        );
        Ok(Job {
            service_url,
            authentication,
            rate_budget,
            requests,
            storage,
        })
    }
}

/// 📦 A fully materialized job, ready for an executor.
///
/// Owns every storage handle. Call [`Job::close`] when done; dropping it skips the
/// orderly shutdown (pools still go away, but nobody gets to hear about errors).
#[derive(Debug)]
pub struct Job {
    pub service_url: Url,
    pub authentication: Option<Authentication>,
    pub rate_budget: SharedRateBudget,
    pub requests: Vec<Request>,
    pub storage: Vec<ResolvedStorage>,
}

impl Job {
    /// 🗑️ Release every storage handle. Tries all of them, reports the first failure.
    pub async fn close(self) -> Result<()> {
        info!(storage = self.storage.len(), "🗑️ closing job");
        release_all(self.storage).await
    }

    pub fn summary(&self) -> JobSummary {
        let rate_limit = RateLimitSummary {
            unlimited: self.rate_budget.is_unlimited(),
            permits_per_second: Some(self.rate_budget.limit()).filter(|limit| limit.is_finite()),
            burst: self.rate_budget.burst(),
        };
        let requests = self
            .requests
            .iter()
            .map(|request| RequestSummary {
                method: request.method.to_string(),
                endpoint: request.endpoint.clone(),
                table: request.table.clone(),
                url: request
                    .url(&self.service_url)
                    .map(String::from)
                    .unwrap_or_else(|_| request.endpoint.clone()),
            })
            .collect();
        let storage = self
            .storage
            .iter()
            .map(|entry| StorageSummary {
                kind: entry.handle.kind().to_string(),
                connection_string: entry.target.redacted(),
                database: entry.target.database.clone(),
            })
            .collect();

        JobSummary {
            service_url: self.service_url.to_string(),
            authentication: self.authentication.as_ref().map(Authentication::scheme_name),
            rate_limit,
            requests,
            storage,
        }
    }
}
