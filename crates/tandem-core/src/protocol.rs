use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RelayError;
use crate::routing::{EventKind, Route};
use crate::session::Role;

/// Wire frame in both directions: `{"event": "<name>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn to_json(&self) -> String {
        // Envelope only holds strings and JSON values, so encoding cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Default, Deserialize)]
struct RegistrationData {
    #[serde(default, alias = "device")]
    label: Option<String>,
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Register {
        role: Role,
        label: Option<String>,
    },
    Relay {
        kind: EventKind,
        payload: Map<String, Value>,
    },
    Ping,
}

impl ClientEvent {
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        let envelope: Envelope = serde_json::from_str(raw)?;
        Self::from_envelope(envelope)
    }

    pub fn from_envelope(envelope: Envelope) -> Result<Self, RelayError> {
        let Envelope { event, data } = envelope;
        match event.as_str() {
            "register-controlled" => Ok(ClientEvent::Register {
                role: Role::Controlled,
                label: registration_label(data)?,
            }),
            "register-controller" => Ok(ClientEvent::Register {
                role: Role::Controller,
                label: registration_label(data)?,
            }),
            "ping" => Ok(ClientEvent::Ping),
            name => {
                let kind =
                    EventKind::from_wire(name).ok_or_else(|| RelayError::UnknownEvent(event.clone()))?;
                let payload = relay_payload(kind.route(), data)?;
                Ok(ClientEvent::Relay { kind, payload })
            }
        }
    }
}

fn registration_label(data: Value) -> Result<Option<String>, RelayError> {
    if data.is_null() {
        return Ok(None);
    }
    let data: RegistrationData = serde_json::from_value(data)?;
    Ok(data.label)
}

fn relay_payload(route: &Route, data: Value) -> Result<Map<String, Value>, RelayError> {
    let payload = match data {
        Value::Null => Map::new(),
        Value::Object(map) => map,
        _ => {
            return Err(RelayError::InvalidPayload {
                event: route.inbound.to_string(),
            })
        }
    };
    if let Some(field) = route.required.iter().find(|field| !payload.contains_key(**field)) {
        return Err(RelayError::MissingField {
            event: route.inbound.to_string(),
            field: *field,
        });
    }
    Ok(payload)
}

/// Messages the broker originates (as opposed to relayed ones).
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Registered {
        role: Role,
        ip: Option<String>,
    },
    PeerStatus {
        peer: Role,
        connected: bool,
        label: Option<String>,
        ip: Option<String>,
        timestamp: i64,
    },
    Ack {
        event: &'static str,
        ok: bool,
        echo: Option<(&'static str, Value)>,
        error: Option<String>,
    },
    Relayed {
        event: &'static str,
        payload: Map<String, Value>,
    },
    Pong {
        timestamp: i64,
    },
}

impl ServerEvent {
    pub fn into_envelope(self) -> Envelope {
        match self {
            ServerEvent::Registered { role, ip } => {
                let mut data = Map::new();
                data.insert("role".into(), Value::from(role.as_str()));
                if let Some(ip) = ip {
                    data.insert("ip".into(), Value::from(ip));
                }
                Envelope::new("registered", Value::Object(data))
            }
            ServerEvent::PeerStatus {
                peer,
                connected,
                label,
                ip,
                timestamp,
            } => {
                let mut data = Map::new();
                data.insert("peer".into(), Value::from(peer.as_str()));
                data.insert("connected".into(), Value::from(connected));
                if let Some(label) = label {
                    data.insert("label".into(), Value::from(label));
                }
                if let Some(ip) = ip {
                    data.insert("ip".into(), Value::from(ip));
                }
                data.insert("timestamp".into(), Value::from(timestamp));
                Envelope::new("peer-status", Value::Object(data))
            }
            ServerEvent::Ack {
                event,
                ok,
                echo,
                error,
            } => {
                let mut data = Map::new();
                data.insert("ok".into(), Value::from(ok));
                if let Some((field, value)) = echo {
                    data.insert(field.into(), value);
                }
                if let Some(error) = error {
                    data.insert("error".into(), Value::from(error));
                }
                Envelope::new(event, Value::Object(data))
            }
            ServerEvent::Relayed { event, payload } => Envelope::new(event, Value::Object(payload)),
            ServerEvent::Pong { timestamp } => {
                Envelope::new("pong", serde_json::json!({ "timestamp": timestamp }))
            }
        }
    }
}

impl From<ServerEvent> for Envelope {
    fn from(event: ServerEvent) -> Self {
        event.into_envelope()
    }
}
