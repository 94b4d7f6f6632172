use thiserror::Error;

use crate::routing::EventKind;
use crate::session::Role;

/// Why an inbound frame was not relayed. None of these are fatal to the
/// broker; the transport adapter logs them and keeps the connection open,
/// except for [`RelayError::PayloadTooLarge`].
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid frame: {0}")]
    InvalidFrame(#[from] serde_json::Error),
    #[error("unknown event `{0}`")]
    UnknownEvent(String),
    #[error("payload of `{event}` must be a JSON object")]
    InvalidPayload { event: String },
    #[error("`{event}` is missing required field `{field}`")]
    MissingField { event: String, field: &'static str },
    #[error("`{}` may only be sent by the {expected} (sender: {})", .kind.as_str(), describe(.actual))]
    WrongOrigin {
        kind: EventKind,
        expected: Role,
        actual: Option<Role>,
    },
    #[error("{0} peer not connected")]
    PeerNotConnected(Role),
    #[error("payload of {size} bytes exceeds limit of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },
}

impl RelayError {
    /// Short stable label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            RelayError::InvalidFrame(_)
            | RelayError::UnknownEvent(_)
            | RelayError::InvalidPayload { .. }
            | RelayError::MissingField { .. } => "malformed",
            RelayError::WrongOrigin { .. } => "wrong_origin",
            RelayError::PeerNotConnected(_) => "no_peer",
            RelayError::PayloadTooLarge { .. } => "oversized",
        }
    }

    pub fn closes_connection(&self) -> bool {
        matches!(self, RelayError::PayloadTooLarge { .. })
    }
}

fn describe(role: &Option<Role>) -> &'static str {
    role.map(|role| role.as_str()).unwrap_or("unregistered")
}
