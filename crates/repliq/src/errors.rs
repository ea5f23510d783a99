//! 💀 Errors — the three ways a resolution can end in tears.
//!
//! 🎬 *[a config walks into a resolver. the resolver asks for ID. the config has none.]*
//!
//! Everything that leaves this crate's public resolution API is a [`ResolveError`].
//! Backend internals still speak `anyhow` (the lingua franca of "it broke, here's the chain"),
//! and get flattened into a [`TargetFailure`] the moment they cross the resolver boundary.
//!
//! 🧠 Knowledge graph:
//! - `ConfigValidation` → raised by `config::ConfigDocument::validate`, before any I/O
//! - `StorageResolution` → raised by `storage::resolver::resolve_storage`, after cleanup
//! - `Cancelled` → raised when the caller's `CancellationToken` fires first
//! - Nothing here retries. Retries are the executor's problem. Good luck, executor. 🦆

use std::fmt;

use thiserror::Error;

/// 🚨 The one error type to rule all resolution outcomes.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// 📋 The document is malformed: empty endpoint, zero burst, blank connection string...
    /// Always fixable by editing the document. Always found before a single socket opens.
    #[error("invalid configuration at `{field}`: {reason}")]
    ConfigValidation { field: String, reason: String },

    /// 🗄️ One or more storage targets refused to connect or to answer a ping.
    /// Every handle that did resolve has already been released when you see this.
    #[error(
        "storage resolution failed for {} of {} target(s): {}",
        .failures.len(),
        .total,
        summarize(.failures)
    )]
    StorageResolution {
        total: usize,
        failures: Vec<TargetFailure>,
    },

    /// 🛑 The caller pulled the plug. Not a failure, a choice.
    #[error("resolution cancelled by caller")]
    Cancelled,
}

impl ResolveError {
    /// 🔧 Shorthand for building a validation error without the struct-literal ceremony.
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// 🔍 The targets that failed, if this is a storage resolution error. Empty otherwise.
    pub fn failures(&self) -> &[TargetFailure] {
        match self {
            Self::StorageResolution { failures, .. } => failures,
            _ => &[],
        }
    }
}

/// 🎯 Which storage target broke, and how.
///
/// `connection_string` is already redacted, so this is safe to log, print, and paste into a
/// ticket without leaking the prod password to the whole team channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFailure {
    /// 📍 Position of the target in the document's storage list.
    pub index: usize,
    pub connection_string: String,
    pub database: String,
    /// 💬 The full context chain, flattened into one line.
    pub reason: String,
}

impl fmt::Display for TargetFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} (database '{}'): {}",
            self.index, self.connection_string, self.database, self.reason
        )
    }
}

fn summarize(failures: &[TargetFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
