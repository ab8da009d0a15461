//! Streamable-HTTP implementation of the connector boundary.
//!
//! Every JSON-RPC request is a `POST` to the endpoint. Servers may answer with
//! a plain JSON body or with a `text/event-stream` body whose `data:` frames
//! carry the response; both are accepted. The `Mcp-Session-Id` header
//! returned by `initialize` is echoed on every later request. When the
//! streamable handshake fails the connector retries over the legacy HTTP+SSE
//! transport in [`crate::sse`].

use crate::connectors::{ConnectError, Connector, Session};
use crate::model::{RawCapabilitySet, ServerInfo};
use crate::sse::{LegacySseSession, SseParser};
use anyhow::{Context, Result, anyhow, bail};
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Protocol revision requested during initialize.
pub const PROTOCOL_VERSION: &str = "2025-03-26";
/// Name reported in `clientInfo`.
pub const CLIENT_NAME: &str = "uiprobe";

const SESSION_HEADER: &str = "mcp-session-id";
const ACCEPT_BOTH: &str = "application/json, text/event-stream";

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, Default)]
pub struct HttpConnector;

impl Connector for HttpConnector {
    fn connect(&self, endpoint: &str, timeout: Duration) -> Result<Box<dyn Session>, ConnectError> {
        let unreachable = |source: anyhow::Error| ConnectError::Unreachable {
            endpoint: endpoint.to_string(),
            source,
        };

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")
            .map_err(unreachable)?;

        // Any HTTP status proves something is listening.
        let head = client
            .head(endpoint)
            .send()
            .with_context(|| format!("HEAD {endpoint}"))
            .map_err(unreachable)?;
        debug!(endpoint, status = %head.status(), "endpoint reachable");

        let mut session = HttpSession {
            client,
            endpoint: endpoint.to_string(),
            session_id: None,
            server_info: ServerInfo::default(),
            capabilities: RawCapabilitySet::new(),
        };
        let streamable = match session.initialize() {
            Ok(()) => return Ok(Box::new(session)),
            Err(err) => err,
        };
        debug!(
            endpoint,
            error = %format!("{streamable:#}"),
            "streamable HTTP handshake failed, trying legacy SSE"
        );

        match LegacySseSession::open(endpoint, timeout) {
            Ok(legacy) => Ok(Box::new(legacy)),
            Err(legacy) => Err(ConnectError::Handshake(anyhow!(
                "streamable HTTP: {streamable:#}; legacy SSE: {legacy:#}"
            ))),
        }
    }
}

pub(crate) fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

pub(crate) fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": { "name": CLIENT_NAME, "version": env!("CARGO_PKG_VERSION") },
    })
}

pub(crate) fn capabilities_of(initialize_result: &Value) -> RawCapabilitySet {
    initialize_result
        .get("capabilities")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

pub(crate) fn is_event_stream(content_type: &str) -> bool {
    content_type
        .trim_start()
        .to_ascii_lowercase()
        .starts_with("text/event-stream")
}

/// An initialized streamable-HTTP session.
pub struct HttpSession {
    client: Client,
    endpoint: String,
    session_id: Option<String>,
    server_info: ServerInfo,
    capabilities: RawCapabilitySet,
}

struct Exchange {
    result: Value,
    session_id: Option<String>,
}

impl HttpSession {
    fn initialize(&mut self) -> Result<()> {
        let exchange = self.exchange("initialize", initialize_params())?;
        if exchange.session_id.is_some() {
            self.session_id = exchange.session_id;
        }

        self.server_info = ServerInfo::from_initialize_result(&exchange.result);
        self.capabilities = capabilities_of(&exchange.result);
        debug!(
            server = self.server_info.name.as_deref().unwrap_or("<unnamed>"),
            protocol = self.server_info.protocol_version.as_deref().unwrap_or("<unknown>"),
            "initialize complete"
        );

        self.notify("notifications/initialized")
    }

    fn post(&self, body: &Value) -> reqwest::blocking::RequestBuilder {
        let request = self
            .client
            .post(&self.endpoint)
            .header(ACCEPT, ACCEPT_BOTH)
            .json(body);
        match &self.session_id {
            Some(id) => request.header(SESSION_HEADER, id),
            None => request,
        }
    }

    fn exchange(&self, method: &str, params: Value) -> Result<Exchange> {
        let id = next_request_id();
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });

        let response = self
            .post(&body)
            .send()
            .with_context(|| format!("{method}: POST {}", self.endpoint))?;
        let status = response.status();
        if !status.is_success() {
            bail!("{method}: HTTP {status}");
        }

        let session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let text = response
            .text()
            .with_context(|| format!("{method}: reading response body"))?;

        let envelope = find_response(&content_type, &text, id)
            .with_context(|| format!("{method}: no JSON-RPC response with id {id}"))?;
        let result = rpc_result(envelope).with_context(|| format!("{method} failed"))?;
        Ok(Exchange { result, session_id })
    }

    fn request(&self, method: &str, params: Value) -> Result<Value> {
        Ok(self.exchange(method, params)?.result)
    }

    fn notify(&self, method: &str) -> Result<()> {
        let body = json!({ "jsonrpc": "2.0", "method": method });
        let response = self
            .post(&body)
            .send()
            .with_context(|| format!("{method}: POST {}", self.endpoint))?;
        let status = response.status();
        if !status.is_success() {
            bail!("{method}: HTTP {status}");
        }
        Ok(())
    }
}

pub(crate) fn cursor_params(cursor: Option<&str>) -> Value {
    match cursor {
        Some(cursor) => json!({ "cursor": cursor }),
        None => json!({}),
    }
}

impl Session for HttpSession {
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

    fn close(&self) -> Result<()> {
        let Some(id) = &self.session_id else {
            return Ok(());
        };
        let response = self
            .client
            .delete(&self.endpoint)
            .header(SESSION_HEADER, id)
            .send()
            .with_context(|| format!("DELETE {}", self.endpoint))?;
        // Servers without explicit session teardown answer 405.
        if !response.status().is_success() {
            warn!(status = %response.status(), "session teardown not acknowledged");
        }
        Ok(())
    }
}

/// Locate the JSON-RPC response carrying `id` in a JSON or SSE body.
fn find_response(content_type: &str, body: &str, id: u64) -> Option<Value> {
    if is_event_stream(content_type) {
        return sse_payloads(body)
            .into_iter()
            .filter_map(|data| serde_json::from_str::<Value>(&data).ok())
            .find_map(|payload| matching_envelope(payload, id));
    }
    let payload: Value = serde_json::from_str(body).ok()?;
    matching_envelope(payload, id)
}

fn matching_envelope(payload: Value, id: u64) -> Option<Value> {
    let wanted = Value::from(id);
    match payload {
        Value::Array(batch) => batch.into_iter().find(|item| item.get("id") == Some(&wanted)),
        single if single.get("id") == Some(&wanted) => Some(single),
        _ => None,
    }
}

/// The `data:` payload of each event in an SSE body.
fn sse_payloads(body: &str) -> Vec<String> {
    let mut parser = SseParser::default();
    let mut payloads: Vec<String> = body
        .lines()
        .filter_map(|line| parser.push_line(line))
        .map(|event| event.data)
        .collect();
    payloads.extend(parser.finish().map(|event| event.data));
    payloads
}

pub(crate) fn rpc_result(envelope: Value) -> Result<Value> {
    if let Some(error) = envelope.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        bail!("JSON-RPC error {code}: {message}");
    }
    envelope
        .get("result")
        .cloned()
        .ok_or_else(|| anyhow!("response carries neither result nor error"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ui_extension;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::{Arc, Mutex};
    use std::thread;

    type EventSlot = Arc<Mutex<Option<TcpStream>>>;

    /// Local server that only speaks the legacy transport: `POST` on the
    /// endpoint is refused and `GET` opens the event stream, unless
    /// `stream_available` is false.
    fn spawn_legacy_server(stream_available: bool) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
        let port = listener.local_addr().expect("local addr").port();
        let events = EventSlot::default();
        thread::spawn(move || {
            for connection in listener.incoming().flatten() {
                let events = Arc::clone(&events);
                thread::spawn(move || serve_connection(connection, events, stream_available));
            }
        });
        format!("http://127.0.0.1:{port}/sse")
    }

    fn serve_connection(connection: TcpStream, events: EventSlot, stream_available: bool) {
        let Ok(mut writer) = connection.try_clone() else {
            return;
        };
        let mut reader = BufReader::new(connection);
        loop {
            let mut request_line = String::new();
            if reader.read_line(&mut request_line).unwrap_or(0) == 0 {
                return;
            }
            let mut content_length = 0usize;
            loop {
                let mut header = String::new();
                if reader.read_line(&mut header).unwrap_or(0) == 0 {
                    return;
                }
                let header = header.trim_end();
                if header.is_empty() {
                    break;
                }
                if let Some((name, value)) = header.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap_or(0);
                    }
                }
            }
            let mut body = vec![0; content_length];
            if reader.read_exact(&mut body).is_err() {
                return;
            }

            let mut parts = request_line.split_whitespace();
            let method = parts.next().unwrap_or_default().to_string();
            let target = parts.next().unwrap_or_default();
            let path = target.split('?').next().unwrap_or_default().to_string();
            match (method.as_str(), path.as_str()) {
                ("HEAD", _) => respond(&mut writer, "200 OK"),
                ("GET", "/sse") if stream_available => {
                    let mut slot = events.lock().expect("event slot");
                    let head = concat!(
                        "HTTP/1.1 200 OK\r\n",
                        "Content-Type: text/event-stream\r\n",
                        "Cache-Control: no-cache\r\n",
                        "Connection: close\r\n\r\n",
                        "event: endpoint\r\n",
                        "data: /messages?session=1\r\n\r\n",
                    );
                    if writer.write_all(head.as_bytes()).is_err() {
                        return;
                    }
                    let _ = writer.flush();
                    *slot = Some(writer);
                    return;
                }
                ("POST", "/messages") => {
                    respond(&mut writer, "202 Accepted");
                    let request: Value = serde_json::from_slice(&body).unwrap_or_default();
                    if let Some(reply) = legacy_reply(&request) {
                        let frame = format!("event: message\r\ndata: {reply}\r\n\r\n");
                        if let Some(stream) = events.lock().expect("event slot").as_mut() {
                            let _ = stream.write_all(frame.as_bytes());
                            let _ = stream.flush();
                        }
                    }
                }
                _ => respond(&mut writer, "405 Method Not Allowed"),
            }
        }
    }

    fn respond(writer: &mut TcpStream, status: &str) {
        let _ = writer.write_all(format!("HTTP/1.1 {status}\r\nContent-Length: 0\r\n\r\n").as_bytes());
        let _ = writer.flush();
    }

    fn legacy_reply(request: &Value) -> Option<Value> {
        let id = request.get("id")?.clone();
        let result = match request.get("method").and_then(Value::as_str)? {
            "initialize" => json!({
                "protocolVersion": "2024-11-05",
                "capabilities": { "resources": {}, "io.modelcontextprotocol/ui": { "version": "2026-01-26" } },
                "serverInfo": { "name": "legacy-weather", "version": "0.9.0" }
            }),
            "tools/list" => json!({ "tools": [{ "name": "show_forecast" }] }),
            _ => {
                return Some(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": -32601, "message": "Method not found" }
                }));
            }
        };
        Some(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
    }

    #[test]
    fn falls_back_to_legacy_event_stream() {
        let endpoint = spawn_legacy_server(true);
        let session = match HttpConnector.connect(&endpoint, Duration::from_secs(5)) {
            Ok(session) => session,
            Err(err) => panic!("legacy fallback failed: {err}"),
        };
        assert_eq!(session.server_info().name.as_deref(), Some("legacy-weather"));
        assert!(ui_extension(session.capabilities()).is_some());

        let tools = session.list_tools(None).expect("tools/list over the event stream");
        assert_eq!(tools["tools"][0]["name"], json!("show_forecast"));
        let err = session.read_resource("ui://missing").expect_err("unsupported method");
        assert!(format!("{err:#}").contains("Method not found"), "{err:#}");
        session.close().expect("close");
    }

    #[test]
    fn handshake_fails_only_when_both_transports_fail() {
        let endpoint = spawn_legacy_server(false);
        let err = match HttpConnector.connect(&endpoint, Duration::from_secs(2)) {
            Ok(_) => panic!("{endpoint} speaks neither transport"),
            Err(err) => err,
        };
        assert!(matches!(err, ConnectError::Handshake(_)), "{err}");
        let finding = err.diagnostic().to_string();
        assert!(finding.starts_with("CON-004"), "{finding}");
        assert!(
            finding.contains("streamable HTTP") && finding.contains("legacy SSE"),
            "{finding}"
        );
    }

    #[test]
    fn parses_plain_json_response() {
        let body = r#"{"jsonrpc":"2.0","id":7,"result":{"tools":[]}}"#;
        let envelope = find_response("application/json", body, 7).expect("matching id");
        assert_eq!(rpc_result(envelope).expect("result"), json!({ "tools": [] }));
        assert!(find_response("application/json", body, 8).is_none());
    }

    #[test]
    fn parses_event_stream_response() {
        let body = concat!(
            "event: message\n",
            "data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n",
            "\n",
            "event: message\n",
            "data: {\"jsonrpc\":\"2.0\",\n",
            "data: \"id\":3,\"result\":{\"ok\":true}}\n",
            "\n",
        );
        let envelope = find_response("text/event-stream; charset=utf-8", body, 3).expect("frame");
        assert_eq!(rpc_result(envelope).expect("result"), json!({ "ok": true }));
    }

    #[test]
    fn batch_responses_are_searched_by_id() {
        let body = r#"[{"jsonrpc":"2.0","id":1,"result":1},{"jsonrpc":"2.0","id":2,"result":2}]"#;
        let envelope = find_response("application/json", body, 2).expect("second entry");
        assert_eq!(rpc_result(envelope).expect("result"), json!(2));
    }

    #[test]
    fn rpc_errors_become_transport_errors() {
        let envelope = json!({ "jsonrpc": "2.0", "id": 1, "error": { "code": -32601, "message": "Method not found" } });
        let err = rpc_result(envelope).expect_err("error envelope");
        assert_eq!(err.to_string(), "JSON-RPC error -32601: Method not found");
    }

    #[test]
    fn closed_port_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
        let port = listener.local_addr().expect("local addr").port();
        drop(listener);

        let endpoint = format!("http://127.0.0.1:{port}/mcp");
        let err = match HttpConnector.connect(&endpoint, Duration::from_millis(500)) {
            Ok(_) => panic!("nothing listens on {endpoint}"),
            Err(err) => err,
        };
        assert!(matches!(err, ConnectError::Unreachable { .. }), "{err}");
        assert_eq!(err.diagnostic().code(), "CON-001");
    }
}
