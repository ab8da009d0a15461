//! Reduces discovery and validation results to the ten feature flags.
//!
//! Pure and total: the classifier never performs I/O and always returns every
//! flag. Reachability and protocol support are not decided here; the snapshot
//! builder sets them once a live discovery pass has happened.

use crate::diagnostics::Diagnostic;
use crate::linkage::{VISIBILITY_APP, VISIBILITY_MODEL};
use crate::model::{
    FeatureFlags, RawCapabilitySet, RawResource, UiLinkedTool, ValidatedResource,
    extension_version, ui_extension,
};

/// Everything the classifier looks at.
pub struct ClassifierInput<'a> {
    pub capabilities: &'a RawCapabilitySet,
    pub ui_resources: &'a [RawResource],
    pub linked_tools: &'a [UiLinkedTool],
    pub validated: &'a [ValidatedResource],
    /// Findings from content validation; consulted for unknown permissions.
    pub content_diagnostics: &'a [Diagnostic],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub flags: FeatureFlags,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn classify(input: &ClassifierInput<'_>) -> Classification {
    let mut diagnostics = Vec::new();

    let supports_mcp_apps = ui_extension(input.capabilities).is_some();
    if !supports_mcp_apps {
        diagnostics.push(Diagnostic::ExtensionNotDeclared);
    } else if extension_version(input.capabilities).is_none() {
        diagnostics.push(Diagnostic::ExtensionVersionMissing);
    }

    let validated = input.validated;
    let any_validated = !validated.is_empty();
    let unknown_permissions = input
        .content_diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::UnknownPermissions { .. }));

    let flags = FeatureFlags {
        supports_mcp_apps,
        has_ui_resources: !input.ui_resources.is_empty(),
        has_ui_tool_linkage: !input.linked_tools.is_empty(),
        has_valid_ui_html: any_validated,
        has_valid_csp: any_validated && validated.iter().all(|r| r.has_csp),
        supports_theming: validated.iter().any(|r| r.has_theming),
        supports_display_modes: validated.iter().any(|r| !r.display_modes.is_empty()),
        has_tool_visibility: input.linked_tools.iter().any(declares_visibility),
        has_valid_permissions: any_validated && !unknown_permissions,
        has_graceful_degradation: validated.iter().any(|r| r.has_graceful_degradation),
    };

    Classification { flags, diagnostics }
}

/// Any non-empty visibility counts unless it is exactly a two-entry list
/// without `app` that does contain `model`. The default pair contains `app`,
/// so default links count too.
fn declares_visibility(tool: &UiLinkedTool) -> bool {
    let vis = &tool.visibility;
    let contains = |value: &str| vis.iter().any(|v| v == value);
    !vis.is_empty() && (contains(VISIBILITY_APP) || vis.len() != 2 || !contains(VISIBILITY_MODEL))
}
