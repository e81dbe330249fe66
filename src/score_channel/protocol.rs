/*!
 * Engine.IO v4 / Socket.IO v5 text framing
 *
 * Each WebSocket text frame carries one Engine.IO packet: a type digit
 * followed by its payload. Message packets (`4`) wrap a Socket.IO packet:
 * a type digit, an optional `/namespace,`, an optional ack id and a JSON
 * body. Binary packets are not used by the score server.
 */

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::model::SetScores;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty packet")]
    Empty,
    #[error("unknown packet type {0:?}")]
    UnknownType(char),
    #[error("binary packets are not supported")]
    Binary,
    #[error("malformed payload: {0}")]
    Payload(String),
}

/// Handshake data sent by the server in the open packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenInfo),
    Close,
    Ping(String),
    Pong(String),
    Message(SocketPacket),
    Upgrade,
    Noop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        ack_id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        namespace: String,
        ack_id: u64,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        message: String,
    },
}

impl SocketPacket {
    pub fn connect(namespace: &str) -> Self {
        SocketPacket::Connect {
            namespace: namespace.to_string(),
            data: None,
        }
    }

    pub fn event(name: &str, payload: Value) -> Self {
        SocketPacket::Event {
            namespace: "/".to_string(),
            ack_id: None,
            name: name.to_string(),
            args: vec![payload],
        }
    }

    fn type_digit(&self) -> char {
        match self {
            SocketPacket::Connect { .. } => '0',
            SocketPacket::Disconnect { .. } => '1',
            SocketPacket::Event { .. } => '2',
            SocketPacket::Ack { .. } => '3',
            SocketPacket::ConnectError { .. } => '4',
        }
    }

    fn namespace(&self) -> &str {
        match self {
            SocketPacket::Connect { namespace, .. }
            | SocketPacket::Disconnect { namespace }
            | SocketPacket::Event { namespace, .. }
            | SocketPacket::Ack { namespace, .. }
            | SocketPacket::ConnectError { namespace, .. } => namespace,
        }
    }

    fn encode(&self) -> String {
        let mut out = String::new();
        out.push(self.type_digit());
        let namespace = self.namespace();
        if namespace != "/" && !namespace.is_empty() {
            out.push_str(namespace);
            out.push(',');
        }

        match self {
            SocketPacket::Connect { data, .. } => {
                if let Some(data) = data {
                    out.push_str(&data.to_string());
                }
            }
            SocketPacket::Disconnect { .. } => {}
            SocketPacket::Event { ack_id, name, args, .. } => {
                if let Some(id) = ack_id {
                    out.push_str(&id.to_string());
                }
                let mut body = Vec::with_capacity(args.len() + 1);
                body.push(Value::String(name.clone()));
                body.extend(args.iter().cloned());
                out.push_str(&Value::Array(body).to_string());
            }
            SocketPacket::Ack { ack_id, args, .. } => {
                out.push_str(&ack_id.to_string());
                out.push_str(&Value::Array(args.clone()).to_string());
            }
            SocketPacket::ConnectError { message, .. } => {
                out.push_str(&serde_json::json!({ "message": message }).to_string());
            }
        }
        out
    }

    fn decode(text: &str) -> Result<Self, ProtocolError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let mut rest = chars.as_str();

        let mut namespace = "/".to_string();
        if rest.starts_with('/') {
            let (ns, tail) = match rest.find(',') {
                Some(idx) => (&rest[..idx], &rest[idx + 1..]),
                None => (rest, ""),
            };
            namespace = ns.to_string();
            rest = tail;
        }

        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        let ack_id = if digits > 0 {
            rest[..digits].parse::<u64>().ok()
        } else {
            None
        };
        let body = &rest[digits..];

        match kind {
            '0' => Ok(SocketPacket::Connect {
                namespace,
                data: parse_optional(body)?,
            }),
            '1' => Ok(SocketPacket::Disconnect { namespace }),
            '2' => {
                let mut items = parse_array(body)?;
                if items.is_empty() {
                    return Err(ProtocolError::Payload("event without a name".to_string()));
                }
                let name = match items.remove(0) {
                    Value::String(name) => name,
                    other => return Err(ProtocolError::Payload(format!("event name {}", other))),
                };
                Ok(SocketPacket::Event {
                    namespace,
                    ack_id,
                    name,
                    args: items,
                })
            }
            '3' => Ok(SocketPacket::Ack {
                namespace,
                ack_id: ack_id.ok_or_else(|| ProtocolError::Payload("ack without id".to_string()))?,
                args: parse_array(body)?,
            }),
            '4' => {
                let message = match parse_optional(body)? {
                    Some(Value::Object(map)) => map
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("connection refused")
                        .to_string(),
                    Some(Value::String(message)) => message,
                    Some(other) => other.to_string(),
                    None => "connection refused".to_string(),
                };
                Ok(SocketPacket::ConnectError { namespace, message })
            }
            '5' | '6' => Err(ProtocolError::Binary),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

fn parse_optional(body: &str) -> Result<Option<Value>, ProtocolError> {
    if body.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(body)
        .map(Some)
        .map_err(|e| ProtocolError::Payload(e.to_string()))
}

fn parse_array(body: &str) -> Result<Vec<Value>, ProtocolError> {
    match parse_optional(body)? {
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(ProtocolError::Payload(format!("expected array, got {}", other))),
        None => Ok(Vec::new()),
    }
}

impl EnginePacket {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let body = chars.as_str();

        match kind {
            '0' => serde_json::from_str(body)
                .map(EnginePacket::Open)
                .map_err(|e| ProtocolError::Payload(e.to_string())),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(body.to_string())),
            '3' => Ok(EnginePacket::Pong(body.to_string())),
            '4' => SocketPacket::decode(body).map(EnginePacket::Message),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(_) => "0".to_string(),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(data) => format!("2{}", data),
            EnginePacket::Pong(data) => format!("3{}", data),
            EnginePacket::Message(packet) => format!("4{}", packet.encode()),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

/// `score_update` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScoreUpdate {
    #[serde(rename = "matchId")]
    pub match_id: Value,
    #[serde(flatten)]
    pub sets: SetScores,
}

impl ScoreUpdate {
    /// True when the update targets `match_id`. Numeric ids compare by their
    /// decimal form.
    pub fn is_for(&self, match_id: &str) -> bool {
        match &self.match_id {
            Value::String(id) => id == match_id,
            Value::Number(id) => id.to_string() == match_id,
            _ => false,
        }
    }
}
