//! Connector boundary between the validation pipeline and a live server.
//!
//! A [`Connector`] turns an endpoint into a [`Session`]; a session exposes the
//! handful of list/read primitives the pipeline needs. Everything above the
//! primitives (paging, UI resource selection, content extraction, latency
//! timing) lives here as free functions so every transport shares one
//! interpretation of server responses.

use crate::content::ResourceContents;
use crate::diagnostics::Diagnostic;
use crate::model::{RawCapabilitySet, RawResource, RawTool, ServerInfo};
use crate::snapshot::Latency;
use anyhow::Result;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Upper bound on `nextCursor` pages followed for one list call.
pub const MAX_LIST_PAGES: usize = 100;

/// An initialized protocol session. Implementations must tolerate concurrent
/// `read_resource` calls from scoped worker threads.
pub trait Session: Sync {
    fn server_info(&self) -> &ServerInfo;
    fn capabilities(&self) -> &RawCapabilitySet;
    /// Raw `tools/list` result object for one page.
    fn list_tools(&self, cursor: Option<&str>) -> Result<Value>;
    /// Raw `resources/list` result object for one page.
    fn list_resources(&self, cursor: Option<&str>) -> Result<Value>;
    /// Raw `resources/read` result object.
    fn read_resource(&self, uri: &str) -> Result<Value>;
    fn close(&self) -> Result<()>;
}

pub trait Connector {
    fn connect(&self, endpoint: &str, timeout: Duration) -> Result<Box<dyn Session>, ConnectError>;
}

#[derive(Debug)]
/// Why no session could be established.
pub enum ConnectError {
    /// No HTTP response at all within the timeout.
    Unreachable {
        endpoint: String,
        source: anyhow::Error,
    },
    /// The server answered but the initialize exchange failed.
    Handshake(anyhow::Error),
}

impl ConnectError {
    /// The runtime finding reported in place of a snapshot.
    pub fn diagnostic(&self) -> Diagnostic {
        match self {
            ConnectError::Unreachable { .. } => Diagnostic::Unreachable,
            ConnectError::Handshake(err) => Diagnostic::HandshakeFailed {
                reason: format!("{err:#}"),
            },
        }
    }
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::Unreachable { endpoint, source } => {
                write!(f, "{endpoint} is not reachable: {source:#}")
            }
            ConnectError::Handshake(err) => write!(f, "initialize handshake failed: {err:#}"),
        }
    }
}

impl std::error::Error for ConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectError::Unreachable { source, .. } => Some(&**source),
            ConnectError::Handshake(err) => Some(&**err),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
/// Everything listed by one discovery pass, plus the findings it produced.
pub struct Discovery {
    pub tools: Vec<RawTool>,
    pub resources: Vec<RawResource>,
    pub capabilities: RawCapabilitySet,
    pub diagnostics: Vec<Diagnostic>,
}

enum ListFailure {
    Request(anyhow::Error),
    Shape,
}

/// List every tool and resource the session exposes. A failed list call
/// degrades to an empty list plus a finding; discovery itself never fails.
pub fn discover(session: &dyn Session) -> Discovery {
    let mut diagnostics = Vec::new();

    let tools = match collect_pages(|cursor| session.list_tools(cursor), "tools") {
        Ok(items) => {
            let total = items.len();
            let tools: Vec<RawTool> = items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect();
            if tools.len() != total {
                warn!(skipped = total - tools.len(), "tools/list returned unreadable entries");
                diagnostics.push(Diagnostic::ToolsListMalformed);
            }
            first_by_key(tools, |tool| tool.name.as_str(), "tools")
        }
        Err(ListFailure::Shape) => {
            warn!("tools/list result has a non-array tools field");
            diagnostics.push(Diagnostic::ToolsListMalformed);
            Vec::new()
        }
        Err(ListFailure::Request(err)) => {
            warn!(error = %format!("{err:#}"), "tools/list failed");
            diagnostics.push(Diagnostic::ToolsListFailed);
            Vec::new()
        }
    };

    let resources = match collect_pages(|cursor| session.list_resources(cursor), "resources") {
        Ok(items) => {
            let resources: Vec<RawResource> = items
                .into_iter()
                .filter_map(|item| match serde_json::from_value::<RawResource>(item) {
                    Ok(resource) => Some(resource),
                    Err(err) => {
                        warn!(error = %err, "skipping unreadable resources/list entry");
                        None
                    }
                })
                .collect();
            first_by_key(resources, |resource| resource.uri.as_str(), "resources")
        }
        Err(ListFailure::Shape) => {
            warn!("resources/list result has a non-array resources field");
            diagnostics.push(Diagnostic::ResourcesListFailed);
            Vec::new()
        }
        Err(ListFailure::Request(err)) => {
            warn!(error = %format!("{err:#}"), "resources/list failed");
            diagnostics.push(Diagnostic::ResourcesListFailed);
            Vec::new()
        }
    };

    debug!(
        tools = tools.len(),
        resources = resources.len(),
        "discovery complete"
    );

    Discovery {
        tools,
        resources,
        capabilities: session.capabilities().clone(),
        diagnostics,
    }
}

/// Follow `nextCursor` until it is absent or already seen, a page repeats the
/// previous one, or the page bound is hit. A repeated page is not appended. A
/// missing or null list field reads as an empty page.
fn collect_pages(
    fetch: impl Fn(Option<&str>) -> Result<Value>,
    field: &str,
) -> Result<Vec<Value>, ListFailure> {
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;
    let mut seen_cursors = HashSet::new();
    let mut previous: Vec<Value> = Vec::new();

    for _ in 0..MAX_LIST_PAGES {
        let page = fetch(cursor.as_deref()).map_err(ListFailure::Request)?;
        let entries = match page.get(field) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(entries)) => entries.clone(),
            Some(_) => return Err(ListFailure::Shape),
        };
        if cursor.is_some() && !entries.is_empty() && entries == previous {
            warn!(field, cursor = cursor.as_deref(), "server repeated a page");
            return Ok(items);
        }
        items.extend(entries.iter().cloned());

        let next = page
            .get("nextCursor")
            .and_then(Value::as_str)
            .filter(|next| !next.is_empty())
            .map(str::to_string);
        let Some(next) = next else {
            return Ok(items);
        };
        if !seen_cursors.insert(next.clone()) {
            warn!(field, cursor = %next, "nextCursor repeats an earlier cursor");
            return Ok(items);
        }
        previous = entries;
        cursor = Some(next);
    }

    warn!(field, pages = MAX_LIST_PAGES, "stopped following nextCursor");
    Ok(items)
}

/// Keep the first item for each key, in listing order.
fn first_by_key<T>(items: Vec<T>, key: impl Fn(&T) -> &str, what: &str) -> Vec<T> {
    let total = items.len();
    let mut seen = HashSet::new();
    let unique: Vec<T> = items
        .into_iter()
        .filter(|item| seen.insert(key(item).to_string()))
        .collect();
    if unique.len() != total {
        warn!(skipped = total - unique.len(), what, "dropped duplicate list entries");
    }
    unique
}

/// Resources addressed with the `ui://` scheme, in listing order.
pub fn select_ui_resources(resources: &[RawResource]) -> Vec<RawResource> {
    resources
        .iter()
        .filter(|resource| resource.is_ui_resource())
        .cloned()
        .collect()
}

/// Read one UI resource and keep its first content item. `None` when the
/// call fails or returns no contents.
pub fn read_ui_resource(session: &dyn Session, uri: &str) -> Option<ResourceContents> {
    let result = match session.read_resource(uri) {
        Ok(result) => result,
        Err(err) => {
            warn!(uri, error = %format!("{err:#}"), "resources/read failed");
            return None;
        }
    };

    let first = result.get("contents")?.as_array()?.first()?;
    Some(ResourceContents {
        text: first.get("text").cloned(),
        mime_type: first
            .get("mimeType")
            .and_then(Value::as_str)
            .filter(|mime| !mime.is_empty())
            .map(str::to_string),
        meta: first.get("_meta").filter(|meta| !meta.is_null()).cloned(),
    })
}

/// Time one `resources/list` and one read of the first UI resource.
pub fn measure_latency(session: &dyn Session, ui_resources: &[RawResource]) -> Latency {
    let list_resources = timed(|| session.list_resources(None));
    let read_resource = ui_resources
        .first()
        .and_then(|first| timed(|| session.read_resource(&first.uri)));

    debug!(?list_resources, ?read_resource, "latency measured");
    Latency {
        list_resources,
        read_resource,
    }
}

fn timed<T>(call: impl FnOnce() -> Result<T>) -> Option<u64> {
    let started = Instant::now();
    call().ok()?;
    Some(whole_millis(started.elapsed()))
}

fn whole_millis(elapsed: Duration) -> u64 {
    (elapsed.as_secs_f64() * 1000.0).round() as u64
}
