//! Engine.IO v4 / Socket.IO v5 text framing.
//!
//! Every websocket text frame starts with an Engine.IO packet type digit.
//! Type `4` (message) carries a Socket.IO packet whose own type digit follows
//! immediately, so an event on the default namespace looks like
//! `42["new_question",{...}]`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::types::{ClientEvent, ServerEvent};

pub const PING: &str = "2";
pub const PONG: &str = "3";
pub const CONNECT: &str = "40";
pub const DISCONNECT: &str = "41";

/// Engine.IO open packet payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds.
    pub ping_interval: u64,
    /// Milliseconds.
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(Handshake),
    Close,
    Ping,
    Pong,
    Noop,
    Connect { sid: Option<String> },
    Disconnect,
    Event { name: String, data: Value },
    ConnectError { message: String },
}

/// A decoded server event, or one this client has no handler for.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Event(ServerEvent),
    Unknown { name: String, data: Value },
}

impl Inbound {
    pub fn from_parts(name: String, data: Value) -> Result<Self, ProtocolError> {
        if !ServerEvent::is_known(&name) {
            return Ok(Self::Unknown { name, data });
        }
        let tagged = serde_json::json!({ "event": name, "data": data });
        serde_json::from_value(tagged)
            .map(Self::Event)
            .map_err(|source| ProtocolError::Payload { event: name, source })
    }
}

/// Decode one websocket text frame.
pub fn decode(frame: &str) -> Result<Packet, ProtocolError> {
    let mut chars = frame.chars();
    let kind = chars.next().ok_or(ProtocolError::Empty)?;
    let rest = chars.as_str();

    match kind {
        '0' => Ok(Packet::Open(serde_json::from_str(rest)?)),
        '1' => Ok(Packet::Close),
        // A ping may carry a "probe" payload during transport upgrades; we
        // never upgrade, so the payload is irrelevant.
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '4' => decode_socket(rest),
        '6' => Ok(Packet::Noop),
        other => Err(ProtocolError::UnknownEnginePacket(other)),
    }
}

fn decode_socket(body: &str) -> Result<Packet, ProtocolError> {
    let mut chars = body.chars();
    let kind = chars.next().ok_or(ProtocolError::Empty)?;
    let mut rest = chars.as_str();

    if rest.starts_with('/') {
        let (namespace, tail) = rest.split_once(',').unwrap_or((rest, ""));
        if namespace != "/" {
            return Err(ProtocolError::Namespace(namespace.to_string()));
        }
        rest = tail;
    }

    match kind {
        '0' => {
            let sid = if rest.is_empty() {
                None
            } else {
                let value: Value = serde_json::from_str(rest)?;
                value.get("sid").and_then(Value::as_str).map(str::to_string)
            };
            Ok(Packet::Connect { sid })
        }
        '1' => Ok(Packet::Disconnect),
        '2' => decode_event(rest),
        '4' => {
            let message = match serde_json::from_str::<Value>(rest) {
                Ok(Value::Object(map)) => map
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("connection refused")
                    .to_string(),
                Ok(Value::String(s)) => s,
                _ => rest.to_string(),
            };
            Ok(Packet::ConnectError { message })
        }
        '3' | '5' | '6' => Err(ProtocolError::Unsupported),
        other => Err(ProtocolError::UnknownSocketPacket(other)),
    }
}

fn decode_event(body: &str) -> Result<Packet, ProtocolError> {
    if body.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(ProtocolError::Unsupported);
    }

    let Value::Array(items) = serde_json::from_str::<Value>(body)? else {
        return Err(ProtocolError::MalformedEvent);
    };
    let mut items = items.into_iter();
    let Some(Value::String(name)) = items.next() else {
        return Err(ProtocolError::MalformedEvent);
    };
    let data = match items.next() {
        None | Some(Value::Null) => Value::Object(Default::default()),
        Some(data) => data,
    };
    Ok(Packet::Event { name, data })
}

/// Encode a client event as a Socket.IO event frame.
pub fn encode_event(event: &ClientEvent) -> Result<String, ProtocolError> {
    let Value::Object(mut map) = serde_json::to_value(event)? else {
        return Err(ProtocolError::MalformedEvent);
    };
    let Some(name) = map.remove("event") else {
        return Err(ProtocolError::MalformedEvent);
    };

    let mut frame = vec![name];
    if let Some(data) = map.remove("data") {
        frame.push(data);
    }
    Ok(format!("42{}", Value::Array(frame)))
}

/// Socket.IO connect packet, optionally carrying an auth payload.
pub fn encode_connect(auth: Option<&Value>) -> String {
    match auth {
        Some(auth) => format!("{CONNECT}{auth}"),
        None => CONNECT.to_string(),
    }
}
