//! # 🚦 THE STORAGE RESOLVER
//!
//! 🎬 COLD OPEN — INT. DISPATCH CENTRE — NIGHT
//!
//! Five connection strings arrive on the desk. One is Postgres. One is a directory.
//! One is an Elasticsearch node that has been "restarting" since Tuesday.
//! The dispatcher sends a runner to each of them at once, and waits at the door.
//!
//! Either every runner comes back with a live handle, in the order they were sent,
//! or the whole job is called off: the first runner to fail shouts "ABORT", everyone still
//! knocking on doors turns around, everyone already holding a handle lets go of it, and the
//! dispatcher writes down exactly which doors slammed shut.
//!
//! 🧠 Knowledge graph:
//! - fan-out: one `tokio::spawn` per target, all under a child [`CancellationToken`]
//! - each task: look up connector → `connect` → `ping`, both raced against the scope
//! - the first real failure cancels the scope (a panic does too, via the drop guard)
//! - fan-in: `join_all` in input order; successes are released if anything failed
//! - aborted siblings are logged, not blamed
//!
//! 🦆 The duck waits at the door too. The duck has been waiting since Tuesday.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::StorageTarget;
use crate::errors::{ResolveError, TargetFailure};
use crate::storage::{Connector, Storage, StorageBackend, StorageRegistry};

/// ✅ A target together with the live handle it resolved to.
#[derive(Debug)]
pub struct ResolvedStorage {
    pub target: StorageTarget,
    pub handle: StorageBackend,
}

/// 🎲 How a single runner came back.
#[derive(Debug)]
enum Outcome {
    Resolved(StorageBackend),
    Failed(anyhow::Error),
    /// A sibling failed or the caller cancelled. Whatever this task held is already released.
    Aborted,
}

/// 🚀 Resolve every target concurrently into a pinged handle, all-or-nothing.
///
/// On success the result has the same length and order as `targets`. On failure every handle
/// that did resolve has been closed before the error is returned, and
/// [`ResolveError::StorageResolution`] lists the targets that failed on their own.
/// If `cancel` fires and nothing failed first, the result is [`ResolveError::Cancelled`].
pub async fn resolve_storage(
    registry: &StorageRegistry,
    targets: Vec<StorageTarget>,
    cancel: &CancellationToken,
) -> Result<Vec<ResolvedStorage>, ResolveError> {
    let total = targets.len();
    let scope = cancel.child_token();
    // -- dropping this future mid-flight stops every runner
    let _scope_guard = scope.clone().drop_guard();

    info!(targets = total, "🚦 resolving storage targets");

    let tasks: Vec<_> = targets
        .iter()
        .cloned()
        .enumerate()
        .map(|(index, target)| {
            let connector = registry.connector_for(&target);
            let scope = scope.clone();
            tokio::spawn(resolve_one(index, connector, target, scope))
        })
        .collect();

    let joined = join_all(tasks).await;

    let mut resolved = Vec::with_capacity(total);
    let mut failures = Vec::new();
    let mut aborted = 0usize;
    for ((index, target), joined) in targets.into_iter().enumerate().zip(joined) {
        let outcome = joined.unwrap_or_else(|join_error| {
            Outcome::Failed(anyhow::anyhow!("💀 the resolution task died: {join_error}"))
        });
        match outcome {
            Outcome::Resolved(handle) => resolved.push(ResolvedStorage { target, handle }),
            Outcome::Failed(err) => failures.push(TargetFailure {
                index,
                connection_string: target.redacted(),
                database: target.database.clone(),
                reason: target.scrub(&format!("{err:#}")),
            }),
            Outcome::Aborted => {
                aborted += 1;
                debug!(index, location = %target.redacted(), "🛑 target aborted before it could finish");
            }
        }
    }

    if !failures.is_empty() {
        warn!(
            failed = failures.len(),
            aborted,
            releasing = resolved.len(),
            "💀 storage resolution failed, releasing the handles that made it"
        );
        sweep(resolved).await;
        return Err(ResolveError::StorageResolution { total, failures });
    }

    if aborted > 0 || cancel.is_cancelled() {
        warn!(aborted, releasing = resolved.len(), "🛑 storage resolution cancelled");
        sweep(resolved).await;
        return Err(ResolveError::Cancelled);
    }

    info!(targets = total, "✅ every storage target resolved and answered its ping");
    Ok(resolved)
}

/// 🏃 One runner, one door.
async fn resolve_one(
    index: usize,
    connector: Result<Arc<dyn Connector>>,
    target: StorageTarget,
    scope: CancellationToken,
) -> Outcome {
    // -- armed until success; a failure or a panic on the way cancels the siblings
    let guard = scope.clone().drop_guard();
    let location = target.redacted();

    let connector = match connector {
        Ok(connector) => connector,
        Err(err) => return Outcome::Failed(err),
    };

    trace!(index, location = %location, "🔌 connecting");
    let connected = tokio::select! {
        biased;
        _ = scope.cancelled() => {
            guard.disarm();
            return Outcome::Aborted;
        }
        result = connector.connect(&target) => result,
    };
    let mut handle = match connected {
        Ok(handle) => handle,
        Err(err) => {
            return Outcome::Failed(err.context(format!("💀 could not connect to '{location}'")));
        }
    };

    trace!(index, location = %location, kind = %handle.kind(), "📡 pinging");
    let pinged = tokio::select! {
        biased;
        _ = scope.cancelled() => None,
        result = handle.ping() => Some(result),
    };

    match pinged {
        Some(Ok(())) => {
            guard.disarm();
            debug!(index, location = %location, kind = %handle.kind(), "✅ target resolved");
            Outcome::Resolved(handle)
        }
        Some(Err(err)) => {
            // -- siblings first, then our own cleanup
            drop(guard);
            release(&mut handle, index, &target).await;
            Outcome::Failed(err.context(format!("💀 '{location}' failed its liveness check")))
        }
        None => {
            guard.disarm();
            release(&mut handle, index, &target).await;
            Outcome::Aborted
        }
    }
}

async fn release(handle: &mut StorageBackend, index: usize, target: &StorageTarget) {
    let location = target.redacted();
    match handle.close().await {
        Ok(()) => warn!(index, location = %location, "🗑️ released storage handle"),
        Err(err) => warn!(
            index,
            location = %location,
            error = %target.scrub(&format!("{err:#}")),
            "⚠️ releasing storage handle failed"
        ),
    }
}

async fn sweep(resolved: Vec<ResolvedStorage>) {
    if let Err(err) = release_all(resolved).await {
        warn!(error = %format!("{err:#}"), "⚠️ a handle did not release cleanly during cleanup");
    }
}

/// 🗑️ Close every handle, in order. Keeps going past failures and reports the first one.
pub async fn release_all(resolved: Vec<ResolvedStorage>) -> Result<()> {
    let mut first_error = None;
    for (index, mut entry) in resolved.into_iter().enumerate() {
        let location = entry.target.redacted();
        let closed = entry
            .handle
            .close()
            .await
            .with_context(|| format!("💀 releasing storage #{index} '{location}' failed"));
        match closed {
            Ok(()) => debug!(index, location = %location, "🗑️ storage released"),
            Err(err) => {
                warn!(
                    index,
                    location = %location,
                    error = %entry.target.scrub(&format!("{err:#}")),
                    "⚠️ storage release failed"
                );
                first_error.get_or_insert(err);
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
