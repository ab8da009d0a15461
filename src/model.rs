//! Serializable types shared by the validators, the classifier and snapshots.
//!
//! Raw protocol objects keep unknown fields so snapshots can embed tool and
//! resource lists verbatim. Derived records (`ValidatedResource`,
//! `UiLinkedTool`) and flag sets use camelCase on the wire so reports line up
//! with the protocol's own naming.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Capability key under which servers declare the UI extension.
pub const UI_EXTENSION_KEY: &str = "io.modelcontextprotocol/ui";
/// Namespace that may nest the extension instead of the top level.
pub const EXPERIMENTAL_KEY: &str = "experimental";
/// Reserved URI scheme prefix for UI resources.
pub const UI_SCHEME: &str = "ui://";

/// Capability namespaces as declared by the server during initialize.
pub type RawCapabilitySet = Map<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// A tool exactly as listed by `tools/list`.
pub struct RawTool {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default = "empty_object")]
    pub input_schema: Value,
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RawTool {
    /// The `_meta.ui` block, when one is declared with a truthy value.
    pub fn ui_meta(&self) -> Option<&Value> {
        let ui = self.meta.as_ref()?.get("ui")?;
        is_truthy(ui).then_some(ui)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// A resource exactly as listed by `resources/list`.
pub struct RawResource {
    #[serde(default)]
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RawResource {
    pub fn is_ui_resource(&self) -> bool {
        self.uri.starts_with(UI_SCHEME)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
/// Declared CSP allowlists, one list per directive family.
pub struct CspDomains {
    pub connect_domains: Vec<String>,
    pub resource_domains: Vec<String>,
    pub frame_domains: Vec<String>,
}

impl CspDomains {
    /// Every domain across the three lists, in declaration order.
    pub fn all(&self) -> impl Iterator<Item = &String> {
        self.connect_domains
            .iter()
            .chain(&self.resource_domains)
            .chain(&self.frame_domains)
    }

    /// Append domains not yet present, keeping first-appearance order.
    pub fn merge(&mut self, other: &CspDomains) {
        extend_unique(&mut self.connect_domains, &other.connect_domains);
        extend_unique(&mut self.resource_domains, &other.resource_domains);
        extend_unique(&mut self.frame_domains, &other.frame_domains);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Outcome of validating one UI resource that was read with an HTML mime type.
///
/// `csp` and `permissions` keep the declared values so the snapshot can
/// aggregate them; the boolean flags record presence only.
pub struct ValidatedResource {
    pub uri: String,
    pub name: Option<String>,
    pub mime_type: String,
    pub has_csp: bool,
    pub has_permissions: bool,
    pub display_modes: Vec<String>,
    pub has_theming: bool,
    pub has_graceful_degradation: bool,
    pub csp: CspDomains,
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
/// A tool whose `_meta.ui` declares a `resourceUri` (possibly null).
pub struct UiLinkedTool {
    pub name: String,
    pub resource_uri: Option<String>,
    pub visibility: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// The ten flags derived by the capability classifier.
pub struct FeatureFlags {
    pub supports_mcp_apps: bool,
    pub has_ui_resources: bool,
    pub has_ui_tool_linkage: bool,
    pub has_valid_ui_html: bool,
    pub has_valid_csp: bool,
    pub supports_theming: bool,
    pub supports_display_modes: bool,
    pub has_tool_visibility: bool,
    pub has_valid_permissions: bool,
    pub has_graceful_degradation: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
/// The complete twelve-key category set carried by every snapshot.
///
/// Reading is lenient: keys absent from a stored snapshot read as `false`.
pub struct CategoryFlags {
    pub is_reachable: bool,
    pub supports_mcp: bool,
    pub supports_mcp_apps: bool,
    pub has_ui_resources: bool,
    pub has_ui_tool_linkage: bool,
    pub has_valid_ui_html: bool,
    pub has_valid_csp: bool,
    pub supports_theming: bool,
    pub supports_display_modes: bool,
    pub has_tool_visibility: bool,
    pub has_valid_permissions: bool,
    pub has_graceful_degradation: bool,
}

impl CategoryFlags {
    /// All twelve flags false; the verdict for a server never discovered.
    pub fn unreachable() -> Self {
        Self::default()
    }

    /// Flags for a live discovery pass: reachability and protocol support are
    /// implied by the pass having happened at all.
    pub fn reachable(features: FeatureFlags) -> Self {
        Self {
            is_reachable: true,
            supports_mcp: true,
            supports_mcp_apps: features.supports_mcp_apps,
            has_ui_resources: features.has_ui_resources,
            has_ui_tool_linkage: features.has_ui_tool_linkage,
            has_valid_ui_html: features.has_valid_ui_html,
            has_valid_csp: features.has_valid_csp,
            supports_theming: features.supports_theming,
            supports_display_modes: features.supports_display_modes,
            has_tool_visibility: features.has_tool_visibility,
            has_valid_permissions: features.has_valid_permissions,
            has_graceful_degradation: features.has_graceful_degradation,
        }
    }

    /// Wire names paired with values, in declaration order.
    pub fn pairs(&self) -> [(&'static str, bool); 12] {
        [
            ("isReachable", self.is_reachable),
            ("supportsMcp", self.supports_mcp),
            ("supportsMcpApps", self.supports_mcp_apps),
            ("hasUiResources", self.has_ui_resources),
            ("hasUiToolLinkage", self.has_ui_tool_linkage),
            ("hasValidUiHtml", self.has_valid_ui_html),
            ("hasValidCsp", self.has_valid_csp),
            ("supportsTheming", self.supports_theming),
            ("supportsDisplayModes", self.supports_display_modes),
            ("hasToolVisibility", self.has_tool_visibility),
            ("hasValidPermissions", self.has_valid_permissions),
            ("hasGracefulDegradation", self.has_graceful_degradation),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Server identity reported by the initialize handshake.
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub protocol_version: Option<String>,
    pub instructions: Option<String>,
}

impl ServerInfo {
    /// Read identity fields from an initialize result; empty or missing
    /// values become `None`.
    pub fn from_initialize_result(result: &Value) -> Self {
        let inner = result.get("serverInfo");
        let field = |key: &str| inner.and_then(|info| info.get(key)).and_then(truthy_text);
        Self {
            name: field("name"),
            version: field("version"),
            description: field("description"),
            protocol_version: result.get("protocolVersion").and_then(truthy_text),
            instructions: result.get("instructions").and_then(truthy_text),
        }
    }
}

/// Locate the UI extension descriptor, preferring a truthy top-level entry
/// over the experimental namespace.
pub fn ui_extension(capabilities: &RawCapabilitySet) -> Option<&Value> {
    let top_level = capabilities.get(UI_EXTENSION_KEY).filter(|v| is_truthy(v));
    top_level
        .or_else(|| {
            capabilities
                .get(EXPERIMENTAL_KEY)
                .filter(|v| is_truthy(v))
                .and_then(|experimental| experimental.get(UI_EXTENSION_KEY))
        })
        .filter(|ext| !ext.is_null())
}

/// The declared extension version, when the descriptor is an object carrying
/// a truthy `version`.
pub fn extension_version(capabilities: &RawCapabilitySet) -> Option<String> {
    ui_extension(capabilities)?
        .as_object()?
        .get("version")
        .and_then(truthy_text)
}

/// JSON truthiness: null, false, zero and the empty string are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Render a JSON scalar as text; strings are taken verbatim.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truthy_text(value: &Value) -> Option<String> {
    is_truthy(value).then(|| value_text(value))
}

pub(crate) fn extend_unique(target: &mut Vec<String>, items: &[String]) {
    for item in items {
        if !target.contains(item) {
            target.push(item.clone());
        }
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}
