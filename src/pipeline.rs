//! The two public operations: validate a live endpoint, compare two snapshots.

use crate::classifier::{ClassifierInput, classify};
use crate::connectors::{
    Connector, Session, discover, measure_latency, read_ui_resource, select_ui_resources,
};
use crate::content::{ResourceOutcome, validate_resource};
use crate::diagnostics::Diagnostic;
use crate::diff::{SnapshotDiff, check_integrity, diff_declared};
use crate::linkage::{linked_tools, validate_linkage, validate_tool_ui_meta};
use crate::model::{CategoryFlags, RawResource, ValidatedResource};
use crate::params::{ParamError, RunOptions, parse_compare_inputs};
use crate::snapshot::{Snapshot, SnapshotEntries, SnapshotInput, build, build_empty};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::thread;
use tracing::{debug, warn};

/// Maximum number of resource reads in flight at once.
pub const READ_BATCH_WIDTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize)]
/// Result of one validation run. `status` is true only when no finding was
/// produced.
pub struct ValidationReport {
    pub status: bool,
    pub messages: Vec<Diagnostic>,
    pub categories: CategoryFlags,
    pub entries: SnapshotEntries,
}

impl ValidationReport {
    fn new(messages: Vec<Diagnostic>, snapshot: Snapshot) -> Self {
        Self {
            status: messages.is_empty(),
            messages,
            categories: snapshot.categories,
            entries: snapshot.entries,
        }
    }

    /// The snapshot portion of the report, suitable for storing and comparing.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            categories: self.categories,
            entries: self.entries.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
/// Result of comparing two snapshots. Always `status: true`; integrity
/// problems are reported as warnings in `messages`.
pub struct CompareReport {
    pub status: bool,
    pub messages: Vec<Diagnostic>,
    pub has_changes: bool,
    pub diff: SnapshotDiff,
}

/// Validate raw arguments, then run a full validation pass.
pub fn run_validation(
    connector: &dyn Connector,
    endpoint: Option<&Value>,
    timeout: Option<&Value>,
) -> Result<ValidationReport, ParamError> {
    let options = RunOptions::parse(endpoint, timeout)?;
    Ok(validate_endpoint(connector, &options))
}

/// Run a full validation pass with already validated options.
pub fn validate_endpoint(connector: &dyn Connector, options: &RunOptions) -> ValidationReport {
    let endpoint = options.endpoint.as_str();
    debug!(endpoint, timeout_ms = options.timeout.as_millis() as u64, "validation started");

    let session = match connector.connect(endpoint, options.timeout) {
        Ok(session) => session,
        Err(err) => {
            warn!(endpoint, error = %err, "connect failed");
            return ValidationReport::new(vec![err.diagnostic()], build_empty(endpoint));
        }
    };

    let (messages, snapshot) = inspect_session(session.as_ref(), endpoint);
    if let Err(err) = session.close() {
        warn!(endpoint, error = %format!("{err:#}"), "session close failed");
    }
    ValidationReport::new(messages, snapshot)
}

fn inspect_session(session: &dyn Session, endpoint: &str) -> (Vec<Diagnostic>, Snapshot) {
    let discovery = discover(session);
    let mut messages = discovery.diagnostics.clone();

    let ui_resources = select_ui_resources(&discovery.resources);
    let linked = linked_tools(&discovery.tools);
    debug!(
        ui_resources = ui_resources.len(),
        linked_tools = linked.len(),
        "ui surface selected"
    );

    let mut validated: Vec<ValidatedResource> = Vec::new();
    let mut content_diagnostics: Vec<Diagnostic> = Vec::new();
    for outcome in validate_ui_resources(session, &ui_resources) {
        validated.extend(outcome.validated);
        content_diagnostics.extend(outcome.diagnostics);
    }
    messages.extend(content_diagnostics.iter().cloned());
    messages.extend(validate_linkage(&linked, &ui_resources));
    messages.extend(validate_tool_ui_meta(&discovery.tools));

    let classification = classify(&ClassifierInput {
        capabilities: &discovery.capabilities,
        ui_resources: &ui_resources,
        linked_tools: &linked,
        validated: &validated,
        content_diagnostics: &content_diagnostics,
    });
    messages.extend(classification.diagnostics);

    let latency = measure_latency(session, &ui_resources);

    let snapshot = build(&SnapshotInput {
        endpoint,
        server_info: session.server_info(),
        capabilities: &discovery.capabilities,
        tools: &discovery.tools,
        resources: &discovery.resources,
        ui_resources: &ui_resources,
        linked_tools: &linked,
        validated: &validated,
        features: classification.flags,
        latency,
    });
    (messages, snapshot)
}

/// Read and validate every UI resource concurrently. Outcomes come back in
/// discovery order whatever order the reads finish in.
fn validate_ui_resources(
    session: &dyn Session,
    ui_resources: &[RawResource],
) -> Vec<ResourceOutcome> {
    let mut outcomes = Vec::with_capacity(ui_resources.len());
    for batch in ui_resources.chunks(READ_BATCH_WIDTH) {
        thread::scope(|scope| {
            let handles: Vec<_> = batch
                .iter()
                .map(|resource| scope.spawn(move || check_resource(session, resource)))
                .collect();
            for (handle, resource) in handles.into_iter().zip(batch) {
                let outcome = handle.join().unwrap_or_else(|_| {
                    warn!(uri = %resource.uri, "resource check panicked");
                    ResourceOutcome::read_failed(&resource.uri)
                });
                outcomes.push(outcome);
            }
        });
    }
    outcomes
}

fn check_resource(session: &dyn Session, resource: &RawResource) -> ResourceOutcome {
    let uri = resource.uri.as_str();
    let outcome = match read_ui_resource(session, uri) {
        Some(contents) => validate_resource(uri, resource.name.as_deref(), &contents),
        None => ResourceOutcome::read_failed(uri),
    };
    debug!(
        uri,
        validated = outcome.validated.is_some(),
        findings = outcome.diagnostics.len(),
        "resource checked"
    );
    outcome
}

/// Validate the shape of two raw snapshots and diff them.
pub fn compare_snapshots(
    before: Option<&Value>,
    after: Option<&Value>,
) -> Result<CompareReport, ParamError> {
    let (before, after) = parse_compare_inputs(before, after)?;
    Ok(compare_declared(
        &before.snapshot,
        &after.snapshot,
        &before.declared_categories,
    ))
}

/// Diff two snapshots that are already in typed form.
pub fn compare_parsed(before: &Snapshot, after: &Snapshot) -> CompareReport {
    let every: Vec<&str> = before.categories.pairs().iter().map(|(name, _)| *name).collect();
    compare_declared(before, after, &every)
}

fn compare_declared(before: &Snapshot, after: &Snapshot, declared: &[&str]) -> CompareReport {
    let messages = check_integrity(before, after);
    let diff = diff_declared(before, after, declared);
    debug!(
        warnings = messages.len(),
        has_changes = diff.has_changes(),
        "snapshots compared"
    );
    CompareReport {
        status: true,
        messages,
        has_changes: diff.has_changes(),
        diff,
    }
}

/// Load a JSON document from disk for comparison.
pub fn read_snapshot_file(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read snapshot {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("failed to parse snapshot {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::ConnectError;
    use anyhow::anyhow;
    use serde_json::json;
    use std::time::Duration;

    struct RefusingConnector;

    impl Connector for RefusingConnector {
        fn connect(
            &self,
            endpoint: &str,
            _timeout: Duration,
        ) -> Result<Box<dyn Session>, ConnectError> {
            Err(ConnectError::Unreachable {
                endpoint: endpoint.to_string(),
                source: anyhow!("connection refused"),
            })
        }
    }

    #[test]
    fn parameter_errors_happen_before_connecting() {
        let err = run_validation(&RefusingConnector, None, None).expect_err("missing endpoint");
        assert_eq!(err.codes(), vec!["VAL-001"]);
    }

    #[test]
    fn unreachable_server_yields_empty_snapshot() {
        let endpoint = json!("https://example.com/mcp");
        let report =
            run_validation(&RefusingConnector, Some(&endpoint), None).expect("valid parameters");
        assert!(!report.status);
        assert_eq!(report.messages, vec![Diagnostic::Unreachable]);
        assert_eq!(report.categories, CategoryFlags::unreachable());
        assert_eq!(report.entries.endpoint.as_deref(), Some("https://example.com/mcp"));
        assert!(report.entries.timestamp.is_some());
        assert!(report.entries.tools.is_empty());
    }

    #[test]
    fn compare_reports_serialize_with_wire_names() {
        let snapshot = json!({ "categories": {}, "entries": { "endpoint": "https://example.com/mcp" } });
        let report = compare_snapshots(Some(&snapshot), Some(&snapshot)).expect("valid shapes");
        assert!(report.status);
        assert!(!report.has_changes);
        assert_eq!(report.messages, vec![Diagnostic::BeforeTimestampMissing]);

        let value = serde_json::to_value(&report).expect("serializes");
        assert_eq!(value["hasChanges"], json!(false));
        assert_eq!(value["messages"][0]["code"], json!("CMP-002"));
        assert_eq!(value["messages"][0]["severity"], json!("warning"));
    }

    #[test]
    fn categories_missing_from_before_are_not_reported() {
        let before = json!({ "categories": { "isReachable": true }, "entries": {} });
        let after = json!({
            "categories": { "isReachable": true, "supportsMcp": true },
            "entries": {}
        });
        let report = compare_snapshots(Some(&before), Some(&after)).expect("valid shapes");
        assert!(!report.has_changes);
        assert!(report.diff.categories.changed.is_empty());
    }
}
