//! 🚀 repliq — turns a replication document into a job you can actually run.
//!
//! 🎬 *[narrator voice]* "It all started with a TOML file and a dream..."
//!
//! A document says: fetch these endpoints from that service, no faster than this, and put the
//! results over there. This crate checks the paperwork, builds one shared rate budget, fills in
//! every request's method and table, and opens (and pings) every destination at once. What comes
//! out is a [`Job`], or a [`ResolveError`] saying exactly what went wrong, with nothing left open.
//!
//! 🧠 Knowledge graph:
//! - `app_config`: figment loading (env + TOML/YAML) → [`ConfigDocument`]
//! - `config`: the document types and their validation
//! - `rate_budget`: the shared governor-backed throttle
//! - `requests`: the materializer
//! - `storage`: backends, registry, concurrent resolver
//! - `resolver`: [`ConfigResolver`] and [`Job`]
//! - `report`: [`JobSummary`] for humans and machines 🦆

pub mod app_config;
pub mod config;
pub mod errors;
pub mod rate_budget;
pub mod report;
pub mod requests;
pub mod resolver;
pub mod storage;

pub use config::{Authentication, ConfigDocument, RateLimitConfig, RequestDeclaration, StorageTarget};
pub use errors::{ResolveError, TargetFailure};
pub use rate_budget::{RateBudget, SharedRateBudget};
pub use report::{JobSummary, render_table};
pub use requests::{Request, derive_table, materialize};
pub use resolver::{ConfigResolver, Job};
pub use storage::{ResolvedStorage, Storage, StorageBackend, StorageKind, StorageRegistry};
