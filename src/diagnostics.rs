//! Closed catalog of runtime findings.
//!
//! Every component reports problems as a [`Diagnostic`] variant. The string
//! code (`UIV-020`, `CMP-003`, ...) is only the stable external identifier
//! written into reports; callers inside the crate match on variants. Fatal
//! parameter errors (`VAL` family) live in [`crate::params`] because they are
//! raised as errors rather than collected.

use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::fmt;

/// How a finding affects the overall verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        }
    }
}

/// One coded finding. Variants carry the context rendered into the message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Diagnostic {
    Unreachable,
    HandshakeFailed { reason: String },
    ToolsListFailed,
    ToolsListMalformed,
    ResourcesListFailed,
    ResourceReadFailed { uri: String },
    UnexpectedMimeType { uri: String, mime_type: Option<String> },
    HtmlMissing { uri: String },
    HtmlNotString { uri: String },
    HtmlEmpty { uri: String },
    HtmlShapeInvalid { uri: String },
    CspMissing { uri: String },
    CspInsecureDomain { uri: String, domain: String },
    CspWildcard { uri: String },
    UnknownPermissions { uri: String, permissions: Vec<String> },
    SensitivePermissions { uri: String, permissions: Vec<String> },
    UnknownDisplayModes { uri: String, modes: Vec<String> },
    DisplayModesMissing { uri: String },
    ThemingMissing { uri: String },
    DanglingResourceUri { tool: String, resource_uri: Option<String> },
    InvalidVisibility { tool: String, values: Vec<String> },
    NoLinkedTools,
    UiMetaWithoutResourceUri { tool: String },
    GracefulDegradationMissing { uri: String },
    ExtensionNotDeclared,
    ExtensionVersionMissing,
    DifferentServers,
    BeforeTimestampMissing,
    AfterOlderThanBefore,
}

impl Diagnostic {
    /// Stable identifier matching `^[A-Z]{3}-\d{3}$`.
    pub fn code(&self) -> &'static str {
        match self {
            Diagnostic::Unreachable => "CON-001",
            Diagnostic::HandshakeFailed { .. } => "CON-004",
            Diagnostic::ToolsListFailed | Diagnostic::ToolsListMalformed => "CON-008",
            Diagnostic::ResourcesListFailed => "CON-010",
            Diagnostic::ResourceReadFailed { .. } => "UIR-001",
            Diagnostic::UnexpectedMimeType { .. } => "UIR-002",
            Diagnostic::HtmlMissing { .. } => "UIV-010",
            Diagnostic::HtmlNotString { .. } => "UIV-011",
            Diagnostic::HtmlEmpty { .. } => "UIV-012",
            Diagnostic::HtmlShapeInvalid { .. } => "UIV-013",
            Diagnostic::CspMissing { .. } => "UIV-020",
            Diagnostic::CspInsecureDomain { .. } => "UIV-021",
            Diagnostic::CspWildcard { .. } => "UIV-022",
            Diagnostic::UnknownPermissions { .. } => "UIV-030",
            Diagnostic::SensitivePermissions { .. } => "UIV-031",
            Diagnostic::UnknownDisplayModes { .. } => "UIV-040",
            Diagnostic::DisplayModesMissing { .. } => "UIV-041",
            Diagnostic::ThemingMissing { .. } => "UIV-050",
            Diagnostic::DanglingResourceUri { .. } => "UIV-060",
            Diagnostic::InvalidVisibility { .. } => "UIV-061",
            Diagnostic::NoLinkedTools => "UIV-062",
            Diagnostic::UiMetaWithoutResourceUri { .. } => "UIV-063",
            Diagnostic::GracefulDegradationMissing { .. } => "UIV-070",
            Diagnostic::ExtensionNotDeclared => "UIV-080",
            Diagnostic::ExtensionVersionMissing => "UIV-081",
            Diagnostic::DifferentServers => "CMP-001",
            Diagnostic::BeforeTimestampMissing => "CMP-002",
            Diagnostic::AfterOlderThanBefore => "CMP-003",
        }
    }

    /// Cross-snapshot integrity findings are warnings; everything else is an
    /// error against the server under test.
    pub fn severity(&self) -> Severity {
        match self {
            Diagnostic::DifferentServers
            | Diagnostic::BeforeTimestampMissing
            | Diagnostic::AfterOlderThanBefore => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// Human-readable message without the code prefix.
    pub fn message(&self) -> String {
        match self {
            Diagnostic::Unreachable => "endpoint: Server is not reachable".to_string(),
            Diagnostic::HandshakeFailed { reason } => {
                format!("mcp: Initialize handshake failed: {reason}")
            }
            Diagnostic::ToolsListFailed => "tools/list: Request failed".to_string(),
            Diagnostic::ToolsListMalformed => "tools/list: Invalid response format".to_string(),
            Diagnostic::ResourcesListFailed => "resources/list: Request failed".to_string(),
            Diagnostic::ResourceReadFailed { uri } => {
                format!("resources/read {uri}: Resource read failed")
            }
            Diagnostic::UnexpectedMimeType { uri, mime_type } => format!(
                "resources/read {uri}: Expected text/html content, got \"{}\"",
                mime_type.as_deref().unwrap_or("null")
            ),
            Diagnostic::HtmlMissing { uri } => format!("{uri}: HTML content is missing"),
            Diagnostic::HtmlNotString { uri } => format!("{uri}: HTML content is not a string"),
            Diagnostic::HtmlEmpty { uri } => format!("{uri}: HTML content is empty"),
            Diagnostic::HtmlShapeInvalid { uri } => format!(
                "{uri}: HTML content appears invalid (missing doctype, html, or body tag)"
            ),
            Diagnostic::CspMissing { uri } => format!("{uri}: No CSP configuration declared"),
            Diagnostic::CspInsecureDomain { uri, domain } => {
                format!("{uri}: CSP domain \"{domain}\" should use https:// or wss://")
            }
            Diagnostic::CspWildcard { uri } => {
                format!("{uri}: CSP contains wildcard domain, allows unrestricted access")
            }
            Diagnostic::UnknownPermissions { uri, permissions } => format!(
                "{uri}: Unknown permissions declared: {}",
                permissions.join(", ")
            ),
            Diagnostic::SensitivePermissions { uri, permissions } => format!(
                "{uri}: Sensitive permissions requested: {}",
                permissions.join(", ")
            ),
            Diagnostic::UnknownDisplayModes { uri, modes } => {
                format!("{uri}: Unknown display modes: {}", modes.join(", "))
            }
            Diagnostic::DisplayModesMissing { uri } => format!("{uri}: No display modes declared"),
            Diagnostic::ThemingMissing { uri } => format!(
                "{uri}: No theming acknowledgment found (no color-scheme, CSS variables, or data-theme)"
            ),
            Diagnostic::DanglingResourceUri { tool, resource_uri } => format!(
                "tool {tool}: References non-existent UI resource \"{}\"",
                resource_uri.as_deref().unwrap_or("null")
            ),
            Diagnostic::InvalidVisibility { tool, values } => format!(
                "tool {tool}: Invalid visibility values: {}",
                values.join(", ")
            ),
            Diagnostic::NoLinkedTools => "tools: No tools linked to UI resources".to_string(),
            Diagnostic::UiMetaWithoutResourceUri { tool } => {
                format!("{tool}: Has UI metadata but no resourceUri")
            }
            Diagnostic::GracefulDegradationMissing { uri } => format!(
                "{uri}: No graceful degradation found (no <noscript> or text fallback)"
            ),
            Diagnostic::ExtensionNotDeclared => format!(
                "capabilities: MCP Apps extension not declared (missing {})",
                crate::model::UI_EXTENSION_KEY
            ),
            Diagnostic::ExtensionVersionMissing => {
                "capabilities: Extension version not specified".to_string()
            }
            Diagnostic::DifferentServers => {
                "compare: Snapshots are from different servers".to_string()
            }
            Diagnostic::BeforeTimestampMissing => {
                "compare: Before snapshot has no timestamp".to_string()
            }
            Diagnostic::AfterOlderThanBefore => {
                "compare: After snapshot is older than before".to_string()
            }
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.message())
    }
}

impl Serialize for Diagnostic {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Diagnostic", 3)?;
        state.serialize_field("code", self.code())?;
        state.serialize_field("severity", self.severity().as_str())?;
        state.serialize_field("message", &self.message())?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn all_variants() -> Vec<Diagnostic> {
        let uri = || "ui://sample".to_string();
        vec![
            Diagnostic::Unreachable,
            Diagnostic::HandshakeFailed {
                reason: "boom".into(),
            },
            Diagnostic::ToolsListFailed,
            Diagnostic::ToolsListMalformed,
            Diagnostic::ResourcesListFailed,
            Diagnostic::ResourceReadFailed { uri: uri() },
            Diagnostic::UnexpectedMimeType {
                uri: uri(),
                mime_type: None,
            },
            Diagnostic::HtmlMissing { uri: uri() },
            Diagnostic::HtmlNotString { uri: uri() },
            Diagnostic::HtmlEmpty { uri: uri() },
            Diagnostic::HtmlShapeInvalid { uri: uri() },
            Diagnostic::CspMissing { uri: uri() },
            Diagnostic::CspInsecureDomain {
                uri: uri(),
                domain: "http://x".into(),
            },
            Diagnostic::CspWildcard { uri: uri() },
            Diagnostic::UnknownPermissions {
                uri: uri(),
                permissions: vec!["usb".into()],
            },
            Diagnostic::SensitivePermissions {
                uri: uri(),
                permissions: vec!["camera".into()],
            },
            Diagnostic::UnknownDisplayModes {
                uri: uri(),
                modes: vec!["sidebar".into()],
            },
            Diagnostic::DisplayModesMissing { uri: uri() },
            Diagnostic::ThemingMissing { uri: uri() },
            Diagnostic::DanglingResourceUri {
                tool: "t".into(),
                resource_uri: None,
            },
            Diagnostic::InvalidVisibility {
                tool: "t".into(),
                values: vec!["user".into()],
            },
            Diagnostic::NoLinkedTools,
            Diagnostic::UiMetaWithoutResourceUri { tool: "t".into() },
            Diagnostic::GracefulDegradationMissing { uri: uri() },
            Diagnostic::ExtensionNotDeclared,
            Diagnostic::ExtensionVersionMissing,
            Diagnostic::DifferentServers,
            Diagnostic::BeforeTimestampMissing,
            Diagnostic::AfterOlderThanBefore,
        ]
    }

    #[test]
    fn every_code_matches_catalog_shape() {
        for diagnostic in all_variants() {
            let code = diagnostic.code();
            let bytes = code.as_bytes();
            assert_eq!(bytes.len(), 7, "{code} has wrong length");
            assert!(bytes[..3].iter().all(u8::is_ascii_uppercase), "{code}");
            assert_eq!(bytes[3], b'-', "{code}");
            assert!(bytes[4..].iter().all(u8::is_ascii_digit), "{code}");
            assert!(
                matches!(&code[..3], "CON" | "UIR" | "UIV" | "CMP"),
                "{code} outside runtime families"
            );
        }
    }

    #[test]
    fn only_compare_findings_are_warnings() {
        for diagnostic in all_variants() {
            let expected = if diagnostic.code().starts_with("CMP") {
                Severity::Warning
            } else {
                Severity::Error
            };
            assert_eq!(diagnostic.severity(), expected, "{diagnostic}");
        }
    }

    #[test]
    fn list_messages_join_with_commas() {
        let diagnostic = Diagnostic::UnknownPermissions {
            uri: "ui://app".into(),
            permissions: vec!["bluetooth".into(), "usb".into()],
        };
        assert_eq!(
            diagnostic.to_string(),
            "UIV-030 ui://app: Unknown permissions declared: bluetooth, usb"
        );
    }

    #[test]
    fn missing_mime_type_renders_as_null() {
        let diagnostic = Diagnostic::UnexpectedMimeType {
            uri: "ui://app".into(),
            mime_type: None,
        };
        assert!(diagnostic.message().ends_with("got \"null\""));
    }

    #[test]
    fn serializes_code_severity_and_message() {
        let value = serde_json::to_value(Diagnostic::AfterOlderThanBefore).expect("serializes");
        assert_eq!(
            value,
            json!({
                "code": "CMP-003",
                "severity": "warning",
                "message": "compare: After snapshot is older than before"
            })
        );
    }
}
