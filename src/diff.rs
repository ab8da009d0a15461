//! Structural diff between two snapshots.
//!
//! Pure and single pass: an integrity check that only produces warnings,
//! followed by one comparison per section. Sequences compare in order except
//! the permission summary, which compares as a set.

use crate::diagnostics::Diagnostic;
use crate::model::{CspDomains, UiLinkedTool};
use crate::snapshot::{Latency, Snapshot, SnapshotEntries, UiResourceSummary};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Change<T> {
    pub before: T,
    pub after: T,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LatencyChange {
    pub before: u64,
    pub after: u64,
    pub delta: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
/// One field of a keyed record that differs between the two snapshots.
pub struct FieldChange {
    pub field: &'static str,
    pub before: Value,
    pub after: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModifiedResource {
    pub uri: String,
    pub changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModifiedTool {
    pub name: String,
    pub changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangedSection<T> {
    pub changed: BTreeMap<&'static str, T>,
}

impl<T> Default for ChangedSection<T> {
    fn default() -> Self {
        Self {
            changed: BTreeMap::new(),
        }
    }
}

impl<T> ChangedSection<T> {
    fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyedSection<M> {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<M>,
}

impl<M> KeyedSection<M> {
    fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SetSection {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDiff {
    pub server: ChangedSection<Change<Option<String>>>,
    pub ui_resources: KeyedSection<ModifiedResource>,
    pub ui_linked_tools: KeyedSection<ModifiedTool>,
    pub csp: ChangedSection<Change<Vec<String>>>,
    pub permissions: SetSection,
    pub latency: ChangedSection<LatencyChange>,
    pub categories: ChangedSection<Change<bool>>,
}

impl SnapshotDiff {
    /// True when any section recorded at least one entry.
    pub fn has_changes(&self) -> bool {
        !(self.server.is_empty()
            && self.ui_resources.is_empty()
            && self.ui_linked_tools.is_empty()
            && self.csp.is_empty()
            && self.permissions.added.is_empty()
            && self.permissions.removed.is_empty()
            && self.latency.is_empty()
            && self.categories.is_empty())
    }
}

/// Warnings about whether the two snapshots belong together. Never fatal.
pub fn check_integrity(before: &Snapshot, after: &Snapshot) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let (before, after) = (&before.entries, &after.entries);

    if before.endpoint != after.endpoint {
        diagnostics.push(Diagnostic::DifferentServers);
    }

    let before_stamp = present(&before.timestamp);
    let after_stamp = present(&after.timestamp);
    if before_stamp.is_none() {
        diagnostics.push(Diagnostic::BeforeTimestampMissing);
    }
    if let (Some(before_stamp), Some(after_stamp)) = (before_stamp, after_stamp) {
        if after_stamp < before_stamp {
            diagnostics.push(Diagnostic::AfterOlderThanBefore);
        }
    }

    diagnostics
}

pub fn diff(before: &Snapshot, after: &Snapshot) -> SnapshotDiff {
    let every: Vec<&str> = before.categories.pairs().iter().map(|(name, _)| *name).collect();
    diff_declared(before, after, &every)
}

/// Like [`diff`], but only the category flags named in `declared` are
/// compared. Snapshots read from disk pass the keys their `before` document
/// actually carried.
pub fn diff_declared(before: &Snapshot, after: &Snapshot, declared: &[&str]) -> SnapshotDiff {
    let (b, a) = (&before.entries, &after.entries);
    SnapshotDiff {
        server: diff_server(b, a),
        ui_resources: diff_keyed(
            &b.ui_resources,
            &a.ui_resources,
            |r| r.uri.as_str(),
            resource_changes,
            |uri, changes| ModifiedResource { uri, changes },
        ),
        ui_linked_tools: diff_keyed(
            &b.ui_linked_tools,
            &a.ui_linked_tools,
            |t| t.name.as_str(),
            tool_changes,
            |name, changes| ModifiedTool { name, changes },
        ),
        csp: diff_csp(&b.csp_summary, &a.csp_summary),
        permissions: diff_set(&b.permissions_summary, &a.permissions_summary),
        latency: diff_latency(&b.latency, &a.latency),
        categories: diff_categories(before, after, declared),
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

fn diff_server(before: &SnapshotEntries, after: &SnapshotEntries) -> ChangedSection<Change<Option<String>>> {
    let fields: [(&'static str, &Option<String>, &Option<String>); 5] = [
        ("serverName", &before.server_name, &after.server_name),
        ("serverVersion", &before.server_version, &after.server_version),
        (
            "serverDescription",
            &before.server_description,
            &after.server_description,
        ),
        ("protocolVersion", &before.protocol_version, &after.protocol_version),
        (
            "extensionVersion",
            &before.extension_version,
            &after.extension_version,
        ),
    ];

    let mut section = ChangedSection::default();
    for (field, b, a) in fields {
        let (b, a) = (present(b), present(a));
        if b != a {
            section.changed.insert(
                field,
                Change {
                    before: b.map(str::to_string),
                    after: a.map(str::to_string),
                },
            );
        }
    }
    section
}

/// Added and removed keys keep their snapshot order; modified entries follow
/// the `after` order.
fn diff_keyed<T, M>(
    before: &[T],
    after: &[T],
    key: impl Fn(&T) -> &str,
    compare: impl Fn(&T, &T) -> Vec<FieldChange>,
    modified: impl Fn(String, Vec<FieldChange>) -> M,
) -> KeyedSection<M> {
    let find = |items: &[T], wanted: &str| -> Option<usize> {
        items.iter().position(|item| key(item) == wanted)
    };

    let added = after
        .iter()
        .filter(|item| find(before, key(item)).is_none())
        .map(|item| key(item).to_string())
        .collect();
    let removed = before
        .iter()
        .filter(|item| find(after, key(item)).is_none())
        .map(|item| key(item).to_string())
        .collect();

    let mut changed = Vec::new();
    for item in after {
        let Some(index) = find(before, key(item)) else {
            continue;
        };
        let changes = compare(&before[index], item);
        if !changes.is_empty() {
            changed.push(modified(key(item).to_string(), changes));
        }
    }

    KeyedSection {
        added,
        removed,
        modified: changed,
    }
}

fn resource_changes(before: &UiResourceSummary, after: &UiResourceSummary) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    if before.has_csp != after.has_csp {
        changes.push(FieldChange {
            field: "hasCsp",
            before: Value::from(before.has_csp),
            after: Value::from(after.has_csp),
        });
    }
    if before.has_permissions != after.has_permissions {
        changes.push(FieldChange {
            field: "hasPermissions",
            before: Value::from(before.has_permissions),
            after: Value::from(after.has_permissions),
        });
    }
    if before.display_modes != after.display_modes {
        changes.push(FieldChange {
            field: "displayModes",
            before: Value::from(before.display_modes.clone()),
            after: Value::from(after.display_modes.clone()),
        });
    }
    changes
}

fn tool_changes(before: &UiLinkedTool, after: &UiLinkedTool) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    if before.resource_uri != after.resource_uri {
        changes.push(FieldChange {
            field: "resourceUri",
            before: Value::from(before.resource_uri.clone()),
            after: Value::from(after.resource_uri.clone()),
        });
    }
    if before.visibility != after.visibility {
        changes.push(FieldChange {
            field: "visibility",
            before: Value::from(before.visibility.clone()),
            after: Value::from(after.visibility.clone()),
        });
    }
    changes
}

fn diff_csp(before: &CspDomains, after: &CspDomains) -> ChangedSection<Change<Vec<String>>> {
    let fields = [
        ("connectDomains", &before.connect_domains, &after.connect_domains),
        ("resourceDomains", &before.resource_domains, &after.resource_domains),
        ("frameDomains", &before.frame_domains, &after.frame_domains),
    ];

    let mut section = ChangedSection::default();
    for (field, b, a) in fields {
        if b != a {
            section.changed.insert(
                field,
                Change {
                    before: b.clone(),
                    after: a.clone(),
                },
            );
        }
    }
    section
}

fn diff_set(before: &[String], after: &[String]) -> SetSection {
    SetSection {
        added: after.iter().filter(|p| !before.contains(p)).cloned().collect(),
        removed: before.iter().filter(|p| !after.contains(p)).cloned().collect(),
    }
}

fn diff_latency(before: &Latency, after: &Latency) -> ChangedSection<LatencyChange> {
    let fields = [
        ("listResources", before.list_resources, after.list_resources),
        ("readResource", before.read_resource, after.read_resource),
    ];

    let mut section = ChangedSection::default();
    for (field, b, a) in fields {
        if let (Some(b), Some(a)) = (b, a) {
            if b != a {
                let delta = a as i64 - b as i64;
                section.changed.insert(
                    field,
                    LatencyChange {
                        before: b,
                        after: a,
                        delta,
                    },
                );
            }
        }
    }
    section
}

fn diff_categories(
    before: &Snapshot,
    after: &Snapshot,
    declared: &[&str],
) -> ChangedSection<Change<bool>> {
    let mut section = ChangedSection::default();
    for ((field, b), (_, a)) in before.categories.pairs().into_iter().zip(after.categories.pairs()) {
        if b != a && declared.contains(&field) {
            section.changed.insert(field, Change { before: b, after: a });
        }
    }
    section
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::build_empty;
    use serde_json::json;

    fn snapshot(value: Value) -> Snapshot {
        serde_json::from_value(value).expect("snapshot fixture parses")
    }

    fn populated() -> Snapshot {
        snapshot(json!({
            "categories": { "isReachable": true, "supportsMcp": true, "hasValidCsp": true },
            "entries": {
                "endpoint": "https://example.com/mcp",
                "serverName": "demo",
                "serverVersion": "1.0.0",
                "uiResources": [
                    { "uri": "ui://one", "hasCsp": true, "hasPermissions": false, "displayModes": ["inline"] },
                    { "uri": "ui://two", "hasCsp": false, "hasPermissions": false, "displayModes": [] }
                ],
                "uiLinkedTools": [
                    { "name": "show", "resourceUri": "ui://one", "visibility": ["model", "app"] }
                ],
                "cspSummary": { "connectDomains": ["https://api.example.com"] },
                "permissionsSummary": ["camera"],
                "latency": { "listResources": 80, "readResource": 40 },
                "timestamp": "2026-02-07T10:00:00.000Z"
            }
        }))
    }

    #[test]
    fn self_diff_is_empty() {
        let snap = populated();
        let result = diff(&snap, &snap);
        assert!(!result.has_changes());
        assert!(check_integrity(&snap, &snap).is_empty());

        let empty = build_empty("https://example.com/mcp");
        assert!(!diff(&empty, &empty).has_changes());
    }

    #[test]
    fn integrity_warnings_can_co_occur() {
        let mut before = populated();
        before.entries.timestamp = None;
        let mut after = populated();
        after.entries.endpoint = Some("https://other.example.com/mcp".into());
        let codes: Vec<&str> = check_integrity(&before, &after).iter().map(Diagnostic::code).collect();
        assert_eq!(codes, vec!["CMP-001", "CMP-002"]);

        let before = populated();
        let mut after = populated();
        after.entries.endpoint = None;
        after.entries.timestamp = Some("2026-01-01T00:00:00.000Z".into());
        let codes: Vec<&str> = check_integrity(&before, &after).iter().map(Diagnostic::code).collect();
        assert_eq!(codes, vec!["CMP-001", "CMP-003"]);
    }

    #[test]
    fn latency_change_carries_delta() {
        let before = populated();
        let mut after = populated();
        after.entries.latency.list_resources = Some(120);
        after.entries.latency.read_resource = None;

        let result = diff(&before, &after);
        assert_eq!(
            result.latency.changed.get("listResources"),
            Some(&LatencyChange {
                before: 80,
                after: 120,
                delta: 40
            })
        );
        assert!(!result.latency.changed.contains_key("readResource"));
    }

    #[test]
    fn removed_resource_appears_only_in_removed() {
        let before = populated();
        let mut after = populated();
        after.entries.ui_resources.retain(|r| r.uri != "ui://two");

        let result = diff(&before, &after);
        assert_eq!(result.ui_resources.removed, vec!["ui://two"]);
        assert!(result.ui_resources.added.is_empty());
        assert!(result.ui_resources.modified.is_empty());
        assert!(result.has_changes());
    }

    #[test]
    fn resource_modifications_list_only_changed_fields() {
        let before = populated();
        let mut after = populated();
        after.entries.ui_resources[0].display_modes = vec!["inline".into(), "fullscreen".into()];
        after.entries.ui_resources.push(UiResourceSummary {
            uri: "ui://three".into(),
            ..UiResourceSummary::default()
        });

        let result = diff(&before, &after);
        assert_eq!(result.ui_resources.added, vec!["ui://three"]);
        assert_eq!(result.ui_resources.modified.len(), 1);
        let modified = &result.ui_resources.modified[0];
        assert_eq!(modified.uri, "ui://one");
        assert_eq!(
            modified.changes,
            vec![FieldChange {
                field: "displayModes",
                before: json!(["inline"]),
                after: json!(["inline", "fullscreen"]),
            }]
        );
    }

    #[test]
    fn visibility_narrowing_is_one_modification() {
        let before = populated();
        let mut after = populated();
        after.entries.ui_linked_tools[0].visibility = vec!["app".into()];

        let result = diff(&before, &after);
        assert_eq!(result.ui_linked_tools.modified.len(), 1);
        let changes = &result.ui_linked_tools.modified[0].changes;
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "visibility");
        assert_eq!(changes[0].after, json!(["app"]));
    }

    #[test]
    fn permissions_compare_as_sets() {
        let mut before = populated();
        before.entries.permissions_summary = vec!["camera".into(), "microphone".into()];
        let mut reordered = populated();
        reordered.entries.permissions_summary = vec!["microphone".into(), "camera".into()];
        assert!(!diff(&before, &reordered).has_changes());

        let mut grown = populated();
        grown.entries.permissions_summary = vec!["geolocation".into(), "camera".into()];
        let result = diff(&before, &grown);
        assert_eq!(result.permissions.added, vec!["geolocation"]);
        assert_eq!(result.permissions.removed, vec!["microphone"]);
    }

    #[test]
    fn display_mode_order_matters() {
        let mut before = populated();
        before.entries.ui_resources[0].display_modes = vec!["inline".into(), "pip".into()];
        let mut after = before.clone();
        after.entries.ui_resources[0].display_modes = vec!["pip".into(), "inline".into()];
        assert_eq!(diff(&before, &after).ui_resources.modified.len(), 1);
    }

    #[test]
    fn server_csp_and_category_sections() {
        let before = populated();
        let mut after = populated();
        after.entries.server_version = Some("1.1.0".into());
        after.entries.server_name = Some(String::new());
        after.entries.csp_summary.frame_domains = vec!["https://embed.example.com".into()];
        after.categories.has_valid_csp = false;

        let result = diff(&before, &after);
        assert_eq!(
            result.server.changed.get("serverVersion"),
            Some(&Change {
                before: Some("1.0.0".to_string()),
                after: Some("1.1.0".to_string())
            })
        );
        assert_eq!(
            result.server.changed.get("serverName"),
            Some(&Change {
                before: Some("demo".to_string()),
                after: None
            })
        );
        assert!(result.csp.changed.contains_key("frameDomains"));
        assert!(!result.csp.changed.contains_key("connectDomains"));
        assert_eq!(
            result.categories.changed.get("hasValidCsp"),
            Some(&Change {
                before: true,
                after: false
            })
        );

        let value = serde_json::to_value(&result).expect("serializes");
        assert_eq!(value["server"]["changed"]["serverVersion"]["after"], json!("1.1.0"));
        assert!(value["uiLinkedTools"]["modified"].is_array());
    }

    #[test]
    fn undeclared_categories_are_not_compared() {
        let before = snapshot(json!({ "categories": { "isReachable": true }, "entries": {} }));
        let after = snapshot(json!({
            "categories": { "isReachable": true, "supportsMcp": true },
            "entries": {}
        }));

        let result = diff_declared(&before, &after, &["isReachable"]);
        assert!(result.categories.changed.is_empty());
        assert!(!result.has_changes());

        let result = diff(&before, &after);
        assert!(result.categories.changed.contains_key("supportsMcp"));
    }
}
