//! Rule checks for a single UI resource's markup and declared `_meta.ui`.
//!
//! The mime gate is the only early exit. Past it every rule group runs on its
//! own and appends to the same diagnostic buffer, so one resource can surface
//! HTML, CSP, permission, display-mode, theming and degradation findings in a
//! single pass.

use crate::diagnostics::Diagnostic;
use crate::model::{CspDomains, ValidatedResource, is_truthy, value_text};
use serde_json::Value;

const HTML_ESSENCE: &str = "text/html";
const MCP_APP_PROFILE: &str = "profile=mcp-app";

pub const KNOWN_PERMISSIONS: &[&str] = &["camera", "microphone", "geolocation", "clipboardWrite"];
pub const SENSITIVE_PERMISSIONS: &[&str] = &["camera", "microphone"];
pub const KNOWN_DISPLAY_MODES: &[&str] = &["inline", "fullscreen", "pip"];

const SECURE_SCHEMES: &[&str] = &["https://", "wss://"];
const SELF_SOURCE: &str = "self";
const WILDCARD_DOMAINS: &[&str] = &["*", "https://*"];

// Matched against lowercased markup, except the CSS custom property token.
const THEMING_TOKENS: &[&str] = &["color-scheme", "light-dark(", "data-theme"];
const CSS_VARIABLE_TOKEN: &str = "var(--";
const DEGRADATION_TOKENS: &[&str] = &["<noscript", "noscript", "fallback"];

/// Payload returned by a successful `resources/read`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceContents {
    pub text: Option<Value>,
    pub mime_type: Option<String>,
    pub meta: Option<Value>,
}

/// Result of checking one resource: the validated record (absent when the
/// mime gate rejected it) plus that resource's private diagnostics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceOutcome {
    pub validated: Option<ValidatedResource>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ResourceOutcome {
    pub fn read_failed(uri: &str) -> Self {
        Self {
            validated: None,
            diagnostics: vec![Diagnostic::ResourceReadFailed {
                uri: uri.to_string(),
            }],
        }
    }
}

/// True for `text/html` with no parameters or only the MCP app profile.
pub fn is_accepted_mime_type(mime_type: &str) -> bool {
    let mut parts = mime_type.split(';').map(str::trim);
    let essence = parts.next().unwrap_or_default();
    if !essence.eq_ignore_ascii_case(HTML_ESSENCE) {
        return false;
    }
    parts.all(|param| param.replace(' ', "").eq_ignore_ascii_case(MCP_APP_PROFILE))
}

/// Run every content rule against one fetched UI resource.
pub fn validate_resource(
    uri: &str,
    name: Option<&str>,
    contents: &ResourceContents,
) -> ResourceOutcome {
    let mut diagnostics = Vec::new();

    let mime_type = match contents.mime_type.as_deref() {
        Some(mime) if is_accepted_mime_type(mime) => mime.to_string(),
        other => {
            diagnostics.push(Diagnostic::UnexpectedMimeType {
                uri: uri.to_string(),
                mime_type: other.map(str::to_string),
            });
            return ResourceOutcome {
                validated: None,
                diagnostics,
            };
        }
    };

    let mut validated = ValidatedResource {
        uri: uri.to_string(),
        name: name.map(str::to_string),
        mime_type,
        ..ValidatedResource::default()
    };

    let ui_meta = contents
        .meta
        .as_ref()
        .and_then(|meta| meta.get("ui"))
        .filter(|ui| is_truthy(ui));
    let markup = contents
        .text
        .as_ref()
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty());

    check_html_shape(uri, contents.text.as_ref(), &mut diagnostics);
    check_csp(uri, ui_meta, &mut validated, &mut diagnostics);
    check_permissions(uri, ui_meta, &mut validated, &mut diagnostics);
    check_display_modes(uri, ui_meta, &mut validated, &mut diagnostics);
    if let Some(markup) = markup {
        check_theming(uri, markup, &mut validated, &mut diagnostics);
        check_graceful_degradation(uri, markup, &mut validated, &mut diagnostics);
    }

    ResourceOutcome {
        validated: Some(validated),
        diagnostics,
    }
}

fn check_html_shape(uri: &str, text: Option<&Value>, diagnostics: &mut Vec<Diagnostic>) {
    let uri = uri.to_string();
    let content = match text {
        None | Some(Value::Null) => {
            diagnostics.push(Diagnostic::HtmlMissing { uri });
            return;
        }
        Some(Value::String(content)) => content,
        Some(_) => {
            diagnostics.push(Diagnostic::HtmlNotString { uri });
            return;
        }
    };
    if content.trim().is_empty() {
        diagnostics.push(Diagnostic::HtmlEmpty { uri });
        return;
    }

    let lower = content.to_lowercase();
    let looks_like_html = ["<!doctype html>", "<html", "<body"]
        .iter()
        .any(|marker| lower.contains(marker));
    if !looks_like_html {
        diagnostics.push(Diagnostic::HtmlShapeInvalid { uri });
    }
}

fn check_csp(
    uri: &str,
    ui_meta: Option<&Value>,
    validated: &mut ValidatedResource,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let Some(csp) = ui_meta.and_then(|ui| ui.get("csp")).filter(|csp| is_truthy(csp)) else {
        diagnostics.push(Diagnostic::CspMissing {
            uri: uri.to_string(),
        });
        return;
    };

    validated.has_csp = true;
    validated.csp = CspDomains {
        connect_domains: string_list(csp.get("connectDomains")),
        resource_domains: string_list(csp.get("resourceDomains")),
        frame_domains: string_list(csp.get("frameDomains")),
    };

    let mut saw_wildcard = false;
    for domain in validated.csp.all() {
        let secure = SECURE_SCHEMES.iter().any(|scheme| domain.starts_with(scheme));
        if !secure && domain != SELF_SOURCE {
            diagnostics.push(Diagnostic::CspInsecureDomain {
                uri: uri.to_string(),
                domain: domain.clone(),
            });
        }
        saw_wildcard |= WILDCARD_DOMAINS.contains(&domain.as_str());
    }
    if saw_wildcard {
        diagnostics.push(Diagnostic::CspWildcard {
            uri: uri.to_string(),
        });
    }
}

fn check_permissions(
    uri: &str,
    ui_meta: Option<&Value>,
    validated: &mut ValidatedResource,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let Some(permissions) = ui_meta
        .and_then(|ui| ui.get("permissions"))
        .filter(|p| is_truthy(p))
    else {
        return;
    };

    validated.has_permissions = true;
    // Non-object declarations count as present but name no permissions.
    let declared: Vec<String> = permissions
        .as_object()
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default();

    let unknown: Vec<String> = declared
        .iter()
        .filter(|key| !KNOWN_PERMISSIONS.contains(&key.as_str()))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        diagnostics.push(Diagnostic::UnknownPermissions {
            uri: uri.to_string(),
            permissions: unknown,
        });
    }

    let sensitive: Vec<String> = declared
        .iter()
        .filter(|key| SENSITIVE_PERMISSIONS.contains(&key.as_str()))
        .cloned()
        .collect();
    if !sensitive.is_empty() {
        diagnostics.push(Diagnostic::SensitivePermissions {
            uri: uri.to_string(),
            permissions: sensitive,
        });
    }

    validated.permissions = declared;
}

fn check_display_modes(
    uri: &str,
    ui_meta: Option<&Value>,
    validated: &mut ValidatedResource,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let modes = match ui_meta.and_then(|ui| ui.get("displayModes")) {
        Some(Value::Array(items)) if !items.is_empty() => {
            items.iter().map(value_text).collect::<Vec<_>>()
        }
        _ => {
            diagnostics.push(Diagnostic::DisplayModesMissing {
                uri: uri.to_string(),
            });
            return;
        }
    };

    let unknown: Vec<String> = modes
        .iter()
        .filter(|mode| !KNOWN_DISPLAY_MODES.contains(&mode.as_str()))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        diagnostics.push(Diagnostic::UnknownDisplayModes {
            uri: uri.to_string(),
            modes: unknown,
        });
    }
    validated.display_modes = modes;
}

fn check_theming(
    uri: &str,
    markup: &str,
    validated: &mut ValidatedResource,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let lower = markup.to_lowercase();
    let acknowledged = markup.contains(CSS_VARIABLE_TOKEN)
        || THEMING_TOKENS.iter().any(|token| lower.contains(token));
    if acknowledged {
        validated.has_theming = true;
    } else {
        diagnostics.push(Diagnostic::ThemingMissing {
            uri: uri.to_string(),
        });
    }
}

fn check_graceful_degradation(
    uri: &str,
    markup: &str,
    validated: &mut ValidatedResource,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let lower = markup.to_lowercase();
    if DEGRADATION_TOKENS.iter().any(|token| lower.contains(token)) {
        validated.has_graceful_degradation = true;
    } else {
        diagnostics.push(Diagnostic::GracefulDegradationMissing {
            uri: uri.to_string(),
        });
    }
}

/// Entries of a JSON array as text; anything else is an empty list.
fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().map(value_text).collect())
        .unwrap_or_default()
}
