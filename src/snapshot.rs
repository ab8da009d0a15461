//! Point-in-time snapshot records and the builder that assembles them.
//!
//! A snapshot is `{categories, entries}`: the twelve category flags plus the
//! raw and derived discovery data needed to diff two runs. Snapshots are built
//! once and never mutated; `entries.timestamp` is stamped at build time from a
//! process-wide clock that never goes backwards.

use crate::linkage::VISIBILITY_APP;
use crate::model::{
    CategoryFlags, CspDomains, FeatureFlags, RawCapabilitySet, RawResource, RawTool, ServerInfo,
    UiLinkedTool, ValidatedResource, extend_unique, extension_version,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

static LAST_STAMP_MILLIS: AtomicI64 = AtomicI64::new(i64::MIN);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// One immutable compliance record.
pub struct Snapshot {
    pub categories: CategoryFlags,
    pub entries: SnapshotEntries,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
/// Discovery data captured alongside the category flags.
///
/// Every field has a default so stored snapshots from older runs still read;
/// absent scalars become null and absent lists become empty.
pub struct SnapshotEntries {
    pub endpoint: Option<String>,
    pub server_name: Option<String>,
    pub server_version: Option<String>,
    pub server_description: Option<String>,
    pub protocol_version: Option<String>,
    pub extension_version: Option<String>,
    pub capabilities: RawCapabilitySet,
    pub ui_resource_count: usize,
    pub ui_resources: Vec<UiResourceSummary>,
    pub ui_linked_tool_count: usize,
    pub ui_linked_tools: Vec<UiLinkedTool>,
    pub app_only_tool_count: usize,
    pub csp_summary: CspDomains,
    pub permissions_summary: Vec<String>,
    pub display_modes: Vec<String>,
    pub tools: Vec<RawTool>,
    pub resources: Vec<RawResource>,
    pub latency: Latency,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
/// Per-resource summary joined from the listing and validation results.
pub struct UiResourceSummary {
    pub uri: String,
    pub name: Option<String>,
    pub mime_type: Option<String>,
    pub has_csp: bool,
    pub has_permissions: bool,
    pub display_modes: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
/// Round-trip timings in whole milliseconds; null when not measured.
pub struct Latency {
    pub list_resources: Option<u64>,
    pub read_resource: Option<u64>,
}

/// Inputs for a snapshot of a live discovery pass.
pub struct SnapshotInput<'a> {
    pub endpoint: &'a str,
    pub server_info: &'a ServerInfo,
    pub capabilities: &'a RawCapabilitySet,
    pub tools: &'a [RawTool],
    pub resources: &'a [RawResource],
    pub ui_resources: &'a [RawResource],
    pub linked_tools: &'a [UiLinkedTool],
    pub validated: &'a [ValidatedResource],
    pub features: FeatureFlags,
    pub latency: Latency,
}

/// Assemble the snapshot for a server that was reached and discovered.
pub fn build(input: &SnapshotInput<'_>) -> Snapshot {
    let ui_resources: Vec<UiResourceSummary> = input
        .ui_resources
        .iter()
        .map(|resource| summarize_resource(resource, input.validated))
        .collect();

    let mut csp_summary = CspDomains::default();
    let mut permissions_summary: Vec<String> = Vec::new();
    let mut display_modes: Vec<String> = Vec::new();
    for validated in input.validated {
        csp_summary.merge(&validated.csp);
        extend_unique(&mut permissions_summary, &validated.permissions);
        extend_unique(&mut display_modes, &validated.display_modes);
    }

    let app_only_tool_count = input
        .linked_tools
        .iter()
        .filter(|tool| tool.visibility.len() == 1 && tool.visibility[0] == VISIBILITY_APP)
        .count();

    let info = input.server_info;
    let entries = SnapshotEntries {
        endpoint: Some(input.endpoint.to_string()),
        server_name: info.name.clone(),
        server_version: info.version.clone(),
        server_description: info.description.clone(),
        protocol_version: info.protocol_version.clone(),
        extension_version: extension_version(input.capabilities),
        capabilities: input.capabilities.clone(),
        ui_resource_count: input.ui_resources.len(),
        ui_resources,
        ui_linked_tool_count: input.linked_tools.len(),
        ui_linked_tools: input.linked_tools.to_vec(),
        app_only_tool_count,
        csp_summary,
        permissions_summary,
        display_modes,
        tools: input.tools.to_vec(),
        resources: input.resources.to_vec(),
        latency: input.latency,
        timestamp: Some(stamp_now()),
    };

    Snapshot {
        categories: CategoryFlags::reachable(input.features),
        entries,
    }
}

/// The canonical snapshot for a server that was never discovered: every flag
/// false, every list empty, only `endpoint` and `timestamp` populated.
pub fn build_empty(endpoint: &str) -> Snapshot {
    Snapshot {
        categories: CategoryFlags::unreachable(),
        entries: SnapshotEntries {
            endpoint: Some(endpoint.to_string()),
            timestamp: Some(stamp_now()),
            ..SnapshotEntries::default()
        },
    }
}

fn summarize_resource(
    resource: &RawResource,
    validated: &[ValidatedResource],
) -> UiResourceSummary {
    let matched = validated.iter().find(|v| v.uri == resource.uri);
    UiResourceSummary {
        uri: resource.uri.clone(),
        name: resource.name.clone(),
        mime_type: resource.mime_type.clone(),
        has_csp: matched.is_some_and(|v| v.has_csp),
        has_permissions: matched.is_some_and(|v| v.has_permissions),
        display_modes: matched.map(|v| v.display_modes.clone()).unwrap_or_default(),
    }
}

/// Current instant as ISO-8601 with millisecond precision, clamped so a later
/// call never returns an earlier stamp than a previous one.
pub fn stamp_now() -> String {
    let now = Utc::now();
    let millis = now.timestamp_millis();
    let previous = LAST_STAMP_MILLIS.fetch_max(millis, Ordering::SeqCst);
    let stamped = if previous > millis {
        DateTime::from_timestamp_millis(previous).unwrap_or(now)
    } else {
        now
    };
    stamped.to_rfc3339_opts(SecondsFormat::Millis, true)
}
