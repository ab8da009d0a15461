#![allow(dead_code)]

use anyhow::{Result, anyhow, bail};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use uiprobe::{ConnectError, Connector, RawCapabilitySet, ServerInfo, Session};

pub const ENDPOINT: &str = "https://apps.example.com/mcp";

/// Path of a helper binary built by Cargo for this test run.
pub fn helper_binary(name: &str) -> PathBuf {
    let path = match name {
        "probe-snapshot" => PathBuf::from(env!("CARGO_BIN_EXE_probe-snapshot")),
        "probe-compare" => PathBuf::from(env!("CARGO_BIN_EXE_probe-compare")),
        other => panic!("unknown helper {other}"),
    };
    assert!(path.is_file(), "helper {} missing at {}", name, path.display());
    path
}

/// Markup that satisfies every content rule.
pub const COMPLIANT_HTML: &str = "<!DOCTYPE html><html><body style=\"color: var(--text-primary)\">\
<noscript>Enable JavaScript to use this view.</noscript><div id=\"app\"></div></body></html>";

#[derive(Clone)]
pub enum ReadScript {
    Ok { result: Value, delay: Duration },
    Fail,
    Panic,
}

/// How a scripted server answers. Cloned into every session it serves.
#[derive(Clone, Default)]
pub struct ServerScript {
    pub info: ServerInfo,
    pub capabilities: Value,
    pub tools: Vec<Value>,
    pub resources: Vec<Value>,
    pub reads: BTreeMap<String, ReadScript>,
    pub refuse: bool,
    pub handshake_error: Option<String>,
    pub fail_tools: bool,
}

impl ServerScript {
    /// A server declaring the UI extension with one compliant resource and one
    /// tool linked to it.
    pub fn compliant() -> Self {
        let mut script = ServerScript {
            info: ServerInfo {
                name: Some("weather-apps".into()),
                version: Some("1.4.0".into()),
                description: None,
                protocol_version: Some("2025-03-26".into()),
                instructions: None,
            },
            capabilities: json!({
                "tools": {},
                "resources": {},
                "io.modelcontextprotocol/ui": { "version": "2026-01-26" }
            }),
            ..ServerScript::default()
        };
        script.add_tool("show_forecast", Some("ui://forecast"), None);
        script.add_ui_resource("ui://forecast", html_read(COMPLIANT_HTML, compliant_meta()));
        script
    }

    pub fn add_tool(&mut self, name: &str, resource_uri: Option<&str>, visibility: Option<Value>) {
        let mut tool = json!({
            "name": name,
            "description": format!("{name} tool"),
            "inputSchema": { "type": "object" }
        });
        if let Some(uri) = resource_uri {
            let mut ui = json!({ "resourceUri": uri });
            if let Some(visibility) = visibility {
                ui["visibility"] = visibility;
            }
            tool["_meta"] = json!({ "ui": ui });
        }
        self.tools.push(tool);
    }

    pub fn add_ui_resource(&mut self, uri: &str, read: ReadScript) {
        self.resources.push(json!({
            "uri": uri,
            "name": uri.trim_start_matches("ui://"),
            "mimeType": "text/html;profile=mcp-app"
        }));
        self.reads.insert(uri.to_string(), read);
    }
}

pub fn compliant_meta() -> Value {
    json!({
        "ui": {
            "csp": { "connectDomains": ["https://api.weather.example.com"], "resourceDomains": ["https://cdn.example.com"] },
            "permissions": { "geolocation": {} },
            "displayModes": ["inline", "fullscreen"]
        }
    })
}

pub fn html_read(text: &str, meta: Value) -> ReadScript {
    ReadScript::Ok {
        result: json!({
            "contents": [{ "uri": "ui://resource", "mimeType": "text/html;profile=mcp-app", "text": text, "_meta": meta }]
        }),
        delay: Duration::ZERO,
    }
}

pub fn delayed(read: ReadScript, millis: u64) -> ReadScript {
    match read {
        ReadScript::Ok { result, .. } => ReadScript::Ok {
            result,
            delay: Duration::from_millis(millis),
        },
        other => other,
    }
}

/// In-memory connector that replays a [`ServerScript`] and records which
/// reads completed, in completion order.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    pub script: ServerScript,
    pub completed_reads: Arc<Mutex<Vec<String>>>,
    pub closed: Arc<Mutex<usize>>,
}

impl ScriptedConnector {
    pub fn new(script: ServerScript) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    pub fn completion_order(&self) -> Vec<String> {
        self.completed_reads.lock().expect("read log").clone()
    }

    pub fn close_count(&self) -> usize {
        *self.closed.lock().expect("close log")
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self, endpoint: &str, _timeout: Duration) -> Result<Box<dyn Session>, ConnectError> {
        if self.script.refuse {
            return Err(ConnectError::Unreachable {
                endpoint: endpoint.to_string(),
                source: anyhow!("connection refused"),
            });
        }
        if let Some(reason) = &self.script.handshake_error {
            return Err(ConnectError::Handshake(anyhow!("{reason}")));
        }
        Ok(Box::new(ScriptedSession {
            script: self.script.clone(),
            capabilities: self.script.capabilities.as_object().cloned().unwrap_or_default(),
            completed_reads: Arc::clone(&self.completed_reads),
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct ScriptedSession {
    script: ServerScript,
    capabilities: RawCapabilitySet,
    completed_reads: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<usize>>,
}

impl Session for ScriptedSession {
    fn server_info(&self) -> &ServerInfo {
        &self.script.info
    }

    fn capabilities(&self) -> &RawCapabilitySet {
        &self.capabilities
    }

    fn list_tools(&self, _cursor: Option<&str>) -> Result<Value> {
        if self.script.fail_tools {
            bail!("tools/list: HTTP 500");
        }
        Ok(json!({ "tools": self.script.tools }))
    }

    fn list_resources(&self, _cursor: Option<&str>) -> Result<Value> {
        Ok(json!({ "resources": self.script.resources }))
    }

    fn read_resource(&self, uri: &str) -> Result<Value> {
        match self.script.reads.get(uri) {
            Some(ReadScript::Ok { result, delay }) => {
                thread::sleep(*delay);
                self.completed_reads
                    .lock()
                    .expect("read log")
                    .push(uri.to_string());
                Ok(result.clone())
            }
            Some(ReadScript::Fail) | None => bail!("resources/read {uri}: HTTP 404"),
            Some(ReadScript::Panic) => panic!("scripted panic while reading {uri}"),
        }
    }

    fn close(&self) -> Result<()> {
        *self.closed.lock().expect("close log") += 1;
        Ok(())
    }
}
