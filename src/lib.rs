//! Compliance checker for the MCP Apps UI extension.
//!
//! The crate inspects a live MCP server, validates every `ui://` resource and
//! tool linkage it exposes, reduces the results to twelve category flags, and
//! records everything as a [`Snapshot`]. Two snapshots can later be diffed to
//! see what changed between runs. The helper binaries (`probe-snapshot`,
//! `probe-compare`) are thin wrappers over [`run_validation`] and
//! [`compare_snapshots`]; the report JSON they print is the contract.

use tracing_subscriber::EnvFilter;

pub mod classifier;
pub mod connectors;
pub mod content;
pub mod diagnostics;
pub mod diff;
pub mod http;
pub mod linkage;
pub mod model;
pub mod params;
pub mod pipeline;
pub mod schema;
pub mod snapshot;
pub mod sse;

pub use classifier::{Classification, ClassifierInput, classify};
pub use connectors::{ConnectError, Connector, Discovery, Session};
pub use content::{ResourceContents, ResourceOutcome, validate_resource};
pub use diagnostics::{Diagnostic, Severity};
pub use diff::{SnapshotDiff, check_integrity, diff, diff_declared};
pub use http::HttpConnector;
pub use model::{
    CategoryFlags, CspDomains, FeatureFlags, RawCapabilitySet, RawResource, RawTool, ServerInfo,
    UiLinkedTool, ValidatedResource,
};
pub use params::{DEFAULT_TIMEOUT_MS, ParamError, ParamIssue, RunOptions, StoredSnapshot};
pub use pipeline::{
    CompareReport, ValidationReport, compare_parsed, compare_snapshots, read_snapshot_file,
    run_validation, validate_endpoint,
};
pub use schema::SnapshotSchema;
pub use snapshot::{Latency, Snapshot, SnapshotEntries, UiResourceSummary, build, build_empty};

/// Log filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Install the stderr `tracing` subscriber used by the helper binaries.
///
/// Stdout is reserved for report JSON. Calling this more than once is a no-op.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
