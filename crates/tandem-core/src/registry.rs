use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::session::{Role, Session, SessionId};

/// A session's claim on a role slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub session: SessionId,
    pub label: String,
    pub remote_address: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl Binding {
    pub fn new(session: &Session, label: Option<&str>, role: Role, at: DateTime<Utc>) -> Self {
        let label = label
            .map(str::trim)
            .filter(|label| !label.is_empty())
            .unwrap_or_else(|| role.default_label())
            .to_string();
        Self {
            session: session.id,
            label,
            remote_address: session.remote_address.clone(),
            registered_at: at,
            last_seen_at: at,
        }
    }
}

/// What a [`RoleRegistry::bind`] call changed besides filling the slot.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BindOutcome {
    /// Another session that held the slot and lost it.
    pub displaced: Option<Binding>,
    /// A different slot the binding session left in order to take this one.
    pub vacated: Option<Role>,
}

/// The two role slots. Each holds at most one binding, and a session holds at
/// most one slot.
#[derive(Debug, Default)]
pub struct RoleRegistry {
    controlled: Option<Binding>,
    controller: Option<Binding>,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, role: Role) -> &Option<Binding> {
        match role {
            Role::Controlled => &self.controlled,
            Role::Controller => &self.controller,
        }
    }

    fn slot_mut(&mut self, role: Role) -> &mut Option<Binding> {
        match role {
            Role::Controlled => &mut self.controlled,
            Role::Controller => &mut self.controller,
        }
    }

    /// Last registration wins: an existing occupant is replaced without being
    /// told. If the session currently holds the other slot it leaves it first.
    pub fn bind(&mut self, role: Role, binding: Binding) -> BindOutcome {
        let mut outcome = BindOutcome::default();

        let other = role.opposite();
        if self.occupant_id(other) == Some(binding.session) {
            *self.slot_mut(other) = None;
            outcome.vacated = Some(other);
        }

        if let Some(previous) = self.slot_mut(role).replace(binding) {
            if self.occupant_id(role) != Some(previous.session) {
                outcome.displaced = Some(previous);
            }
        }

        outcome
    }

    /// Vacates whichever slot the session holds. Unbinding a session that holds
    /// nothing (already unbound, or displaced earlier) changes nothing.
    pub fn unbind(&mut self, session: SessionId) -> Option<Role> {
        let role = self.role_of(session)?;
        *self.slot_mut(role) = None;
        Some(role)
    }

    pub fn occupant(&self, role: Role) -> Option<&Binding> {
        self.slot(role).as_ref()
    }

    pub fn occupant_id(&self, role: Role) -> Option<SessionId> {
        self.occupant(role).map(|binding| binding.session)
    }

    pub fn role_of(&self, session: SessionId) -> Option<Role> {
        [Role::Controlled, Role::Controller]
            .into_iter()
            .find(|role| self.occupant_id(*role) == Some(session))
    }

    /// Refreshes `last_seen_at` for a bound session.
    pub fn touch(&mut self, session: SessionId, at: DateTime<Utc>) -> bool {
        let Some(role) = self.role_of(session) else {
            return false;
        };
        if let Some(binding) = self.slot_mut(role).as_mut() {
            binding.last_seen_at = at;
        }
        true
    }

    pub fn snapshot(&self, at: DateTime<Utc>) -> StatusSnapshot {
        StatusSnapshot {
            controlled: match &self.controlled {
                Some(binding) => ControlledStatus::Connected {
                    connected: true,
                    label: binding.label.clone(),
                    ip: binding.remote_address.clone(),
                    last_seen_at: binding.last_seen_at.timestamp_millis(),
                },
                None => ControlledStatus::Absent { connected: false },
            },
            controller: match &self.controller {
                Some(binding) => ControllerStatus::Connected {
                    connected: true,
                    label: binding.label.clone(),
                },
                None => ControllerStatus::Absent { connected: false },
            },
            timestamp: at.timestamp_millis(),
        }
    }
}

/// Read-only occupancy view served by the status endpoint.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub controlled: ControlledStatus,
    pub controller: ControllerStatus,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ControlledStatus {
    #[serde(rename_all = "camelCase")]
    Connected {
        connected: bool,
        label: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        ip: Option<String>,
        last_seen_at: i64,
    },
    Absent {
        connected: bool,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ControllerStatus {
    Connected { connected: bool, label: String },
    Absent { connected: bool },
}
