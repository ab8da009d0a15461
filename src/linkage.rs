//! Cross-references between tools and UI resources.
//!
//! Returns a list of findings rather than short-circuiting so callers can
//! surface every broken link at once.

use crate::diagnostics::Diagnostic;
use crate::model::{RawResource, RawTool, UiLinkedTool, value_text};
use serde_json::Value;

pub const VISIBILITY_MODEL: &str = "model";
pub const VISIBILITY_APP: &str = "app";

/// Visibility assumed when a linked tool declares none.
pub fn default_visibility() -> Vec<String> {
    vec![VISIBILITY_MODEL.to_string(), VISIBILITY_APP.to_string()]
}

/// Tools whose `_meta.ui` carries a `resourceUri` key, null included.
pub fn linked_tools(tools: &[RawTool]) -> Vec<UiLinkedTool> {
    tools
        .iter()
        .filter_map(|tool| {
            let ui = tool.ui_meta()?;
            let resource_uri = ui.get("resourceUri")?;
            Some(UiLinkedTool {
                name: tool.name.clone(),
                resource_uri: (!resource_uri.is_null()).then(|| value_text(resource_uri)),
                visibility: declared_visibility(ui.get("visibility")),
            })
        })
        .collect()
}

/// An array declaration is kept verbatim; anything falsy or non-array falls
/// back to the default pair.
fn declared_visibility(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().map(value_text).collect(),
        _ => default_visibility(),
    }
}

/// Check every link against the discovered UI resources.
pub fn validate_linkage(linked: &[UiLinkedTool], ui_resources: &[RawResource]) -> Vec<Diagnostic> {
    if linked.is_empty() {
        return vec![Diagnostic::NoLinkedTools];
    }

    let mut diagnostics = Vec::new();
    for tool in linked {
        let target_exists = tool
            .resource_uri
            .as_deref()
            .is_some_and(|uri| ui_resources.iter().any(|res| res.uri == uri));
        if !target_exists {
            diagnostics.push(Diagnostic::DanglingResourceUri {
                tool: tool.name.clone(),
                resource_uri: tool.resource_uri.clone(),
            });
        }

        let invalid: Vec<String> = tool
            .visibility
            .iter()
            .filter(|v| v.as_str() != VISIBILITY_MODEL && v.as_str() != VISIBILITY_APP)
            .cloned()
            .collect();
        if !invalid.is_empty() {
            diagnostics.push(Diagnostic::InvalidVisibility {
                tool: tool.name.clone(),
                values: invalid,
            });
        }
    }
    diagnostics
}

/// Every declared tool, linked or not, with UI metadata but no usable
/// `resourceUri`.
pub fn validate_tool_ui_meta(tools: &[RawTool]) -> Vec<Diagnostic> {
    tools
        .iter()
        .filter(|tool| {
            tool.ui_meta()
                .is_some_and(|ui| ui.get("resourceUri").is_none_or(Value::is_null))
        })
        .map(|tool| Diagnostic::UiMetaWithoutResourceUri {
            tool: tool.name.clone(),
        })
        .collect()
}
