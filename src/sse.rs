//! Legacy HTTP+SSE transport, tried when a server rejects streamable HTTP.
//!
//! The client holds one long-lived `GET` event stream open. The server's first
//! `endpoint` event names the URL that JSON-RPC messages are posted to, and
//! every response comes back as a `message` event on the stream. A reader
//! thread parks responses by id until the caller waiting on that id takes
//! them.

use crate::connectors::Session;
use crate::http::{
    capabilities_of, cursor_params, initialize_params, is_event_stream, next_request_id,
    rpc_result,
};
use crate::model::{RawCapabilitySet, ServerInfo};
use anyhow::{Context, Result, anyhow, bail};
use reqwest::Url;
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const ENDPOINT_EVENT: &str = "endpoint";
const MESSAGE_EVENT: &str = "message";

/// One dispatched server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental `text/event-stream` parser. Feed it lines without their
/// terminators; a blank line completes an event.
#[derive(Debug, Default)]
pub struct SseParser {
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    /// Flush an event left unterminated at end of input.
    pub fn finish(&mut self) -> Option<SseEvent> {
        self.dispatch()
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        Some(SseEvent {
            event,
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

#[derive(Debug, Default)]
struct StreamState {
    post_url: Option<String>,
    responses: HashMap<u64, Value>,
    ended: Option<String>,
}

/// State shared between the stream reader and callers awaiting responses.
#[derive(Debug, Default)]
struct StreamChannel {
    state: Mutex<StreamState>,
    changed: Condvar,
}

impl StreamChannel {
    fn update(&self, apply: impl FnOnce(&mut StreamState)) {
        if let Ok(mut state) = self.state.lock() {
            apply(&mut state);
        }
        self.changed.notify_all();
    }

    fn wait_for<T>(
        &self,
        timeout: Duration,
        mut take: impl FnMut(&mut StreamState) -> Option<T>,
    ) -> Result<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("event stream state poisoned"))?;
        loop {
            if let Some(found) = take(&mut state) {
                return Ok(found);
            }
            if let Some(reason) = &state.ended {
                bail!("event stream ended: {reason}");
            }
            let now = Instant::now();
            if now >= deadline {
                bail!("timed out after {} ms", timeout.as_millis());
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .map_err(|_| anyhow!("event stream state poisoned"))?
                .0;
        }
    }

    fn deliver(&self, base: &Url, event: SseEvent) {
        match event.event.as_deref() {
            Some(ENDPOINT_EVENT) => match base.join(event.data.trim()) {
                Ok(url) => self.update(|state| state.post_url = Some(url.to_string())),
                Err(err) => warn!(error = %err, data = %event.data, "unusable endpoint event"),
            },
            None | Some(MESSAGE_EVENT) => {
                let Ok(payload) = serde_json::from_str::<Value>(&event.data) else {
                    warn!(data = %event.data, "skipping non-JSON message event");
                    return;
                };
                let envelopes = match payload {
                    Value::Array(batch) => batch,
                    single => vec![single],
                };
                self.update(|state| {
                    for envelope in envelopes {
                        // Server-initiated requests carry a method; only responses are parked.
                        if envelope.get("method").is_some() {
                            continue;
                        }
                        if let Some(id) = envelope.get("id").and_then(Value::as_u64) {
                            state.responses.insert(id, envelope);
                        }
                    }
                });
            }
            Some(other) => debug!(event = other, "ignoring event"),
        }
    }
}

fn pump_events(response: Response, base: Url, channel: Arc<StreamChannel>) {
    let mut parser = SseParser::default();
    let mut ended = "server closed the stream".to_string();
    for line in BufReader::new(response).lines() {
        match line {
            Ok(line) => {
                if let Some(event) = parser.push_line(&line) {
                    channel.deliver(&base, event);
                }
            }
            Err(err) => {
                ended = err.to_string();
                break;
            }
        }
    }
    debug!(reason = %ended, "event stream reader stopped");
    channel.update(|state| state.ended = Some(ended));
}

/// An initialized legacy HTTP+SSE session.
pub struct LegacySseSession {
    client: Client,
    post_url: String,
    timeout: Duration,
    channel: Arc<StreamChannel>,
    server_info: ServerInfo,
    capabilities: RawCapabilitySet,
}

impl LegacySseSession {
    /// Open the event stream on `endpoint`, wait for the `endpoint` event and
    /// run the initialize handshake over it.
    pub fn open(endpoint: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(endpoint).with_context(|| format!("parsing {endpoint}"))?;
        // The stream stays open for the whole session, so only connecting is bounded.
        let stream_client = Client::builder()
            .connect_timeout(timeout)
            .timeout(None::<Duration>)
            .build()
            .context("building event stream client")?;
        let response = stream_client
            .get(endpoint)
            .header(ACCEPT, "text/event-stream")
            .send()
            .with_context(|| format!("GET {endpoint}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("GET {endpoint}: HTTP {status}");
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !is_event_stream(&content_type) {
            bail!("GET {endpoint}: expected text/event-stream, got \"{content_type}\"");
        }

        let channel = Arc::new(StreamChannel::default());
        let reader = Arc::clone(&channel);
        thread::Builder::new()
            .name("uiprobe-sse".to_string())
            .spawn(move || pump_events(response, base, reader))
            .context("spawning event stream reader")?;

        let post_url = channel
            .wait_for(timeout, |state| state.post_url.clone())
            .context("waiting for the endpoint event")?;
        debug!(endpoint, post_url = %post_url, "legacy event stream open");

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;
        let mut session = Self {
            client,
            post_url,
            timeout,
            channel,
            server_info: ServerInfo::default(),
            capabilities: RawCapabilitySet::new(),
        };
        session.initialize()?;
        Ok(session)
    }

    fn initialize(&mut self) -> Result<()> {
        let result = self.request("initialize", initialize_params())?;
        self.server_info = ServerInfo::from_initialize_result(&result);
        self.capabilities = capabilities_of(&result);
        self.post(
            "notifications/initialized",
            &json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
        )
    }

    fn post(&self, method: &str, body: &Value) -> Result<()> {
        let response = self
            .client
            .post(&self.post_url)
            .json(body)
            .send()
            .with_context(|| format!("{method}: POST {}", self.post_url))?;
        let status = response.status();
        if !status.is_success() {
            bail!("{method}: HTTP {status}");
        }
        Ok(())
    }

    fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = next_request_id();
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        self.post(method, &body)?;
        let envelope = self
            .channel
            .wait_for(self.timeout, |state| state.responses.remove(&id))
            .with_context(|| format!("{method}: no response with id {id}"))?;
        rpc_result(envelope).with_context(|| format!("{method} failed"))
    }
}

impl Session for LegacySseSession {
    fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    fn capabilities(&self) -> &RawCapabilitySet {
        &self.capabilities
    }

    fn list_tools(&self, cursor: Option<&str>) -> Result<Value> {
        self.request("tools/list", cursor_params(cursor))
    }

    fn list_resources(&self, cursor: Option<&str>) -> Result<Value> {
        self.request("resources/list", cursor_params(cursor))
    }

    fn read_resource(&self, uri: &str) -> Result<Value> {
        self.request("resources/read", json!({ "uri": uri }))
    }

    // The reader thread exits once the server drops the stream.
    fn close(&self) -> Result<()> {
        self.channel
            .update(|state| state.ended = Some("session closed".to_string()));
        Ok(())
    }
}
