use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque handle for one live duplex connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The two logical positions a session can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Controlled,
    Controller,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Controlled => "controlled",
            Role::Controller => "controller",
        }
    }

    pub fn opposite(&self) -> Role {
        match self {
            Role::Controlled => Role::Controller,
            Role::Controller => Role::Controlled,
        }
    }

    /// Label used when a registration carries none.
    pub fn default_label(&self) -> &'static str {
        match self {
            Role::Controlled => "Controlled device",
            Role::Controller => "Controller",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection metadata handed to the broker by the transport adapter.
///
/// The adapter owns the connection itself; the broker only ever sees this
/// description and addresses the connection through its [`SessionId`].
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub remote_address: Option<String>,
    pub connected_at: DateTime<Utc>,
}

impl Session {
    pub fn new(remote_address: Option<String>) -> Self {
        Self {
            id: SessionId::new(),
            remote_address,
            connected_at: Utc::now(),
        }
    }
}
