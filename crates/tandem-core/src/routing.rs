//! Static relay policy: which role may send each event kind, where it goes,
//! what it is called on the way out and whether the sender gets an answer.
//!
//! Adding a kind means adding a row to [`ROUTES`]; the broker has no
//! per-kind branches.

use crate::session::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Command,
    CommandResult,
    Touch,
    MouseClick,
    Swipe,
    ScreenFrame,
    Screenshot,
    BatteryStatus,
}

/// How the sender learns about the delivery outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// Fire-and-forget: a missing peer is a silent drop.
    None,
    /// Reply to the sender with `event{ok, <echo>}` on success or
    /// `event{ok: false, error}` when the peer is absent.
    Reply {
        event: &'static str,
        echo: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub kind: EventKind,
    pub inbound: &'static str,
    pub origin: Role,
    pub target: Role,
    pub outbound: &'static str,
    pub ack: Ack,
    pub required: &'static [&'static str],
}

pub static ROUTES: &[Route] = &[
    Route {
        kind: EventKind::Command,
        inbound: "command",
        origin: Role::Controller,
        target: Role::Controlled,
        outbound: "execute-command",
        ack: Ack::Reply {
            event: "command-sent",
            echo: "cmd",
        },
        required: &["cmd"],
    },
    Route {
        kind: EventKind::CommandResult,
        inbound: "command-result",
        origin: Role::Controlled,
        target: Role::Controller,
        outbound: "command-response",
        ack: Ack::None,
        required: &["cmd"],
    },
    Route {
        kind: EventKind::Touch,
        inbound: "touch",
        origin: Role::Controller,
        target: Role::Controlled,
        outbound: "touch",
        ack: Ack::None,
        required: &[],
    },
    Route {
        kind: EventKind::MouseClick,
        inbound: "mouse-click",
        origin: Role::Controller,
        target: Role::Controlled,
        outbound: "mouse-click",
        ack: Ack::None,
        required: &[],
    },
    Route {
        kind: EventKind::Swipe,
        inbound: "swipe",
        origin: Role::Controller,
        target: Role::Controlled,
        outbound: "swipe",
        ack: Ack::None,
        required: &[],
    },
    Route {
        kind: EventKind::ScreenFrame,
        inbound: "screen-frame",
        origin: Role::Controlled,
        target: Role::Controller,
        outbound: "screen-frame",
        ack: Ack::None,
        required: &[],
    },
    Route {
        kind: EventKind::Screenshot,
        inbound: "screenshot",
        origin: Role::Controlled,
        target: Role::Controller,
        outbound: "screenshot-data",
        ack: Ack::None,
        required: &["image"],
    },
    Route {
        kind: EventKind::BatteryStatus,
        inbound: "battery-status",
        origin: Role::Controlled,
        target: Role::Controller,
        outbound: "battery-update",
        ack: Ack::None,
        required: &["level"],
    },
];

impl EventKind {
    pub fn from_wire(name: &str) -> Option<Self> {
        ROUTES
            .iter()
            .find(|route| route.inbound == name)
            .map(|route| route.kind)
    }

    pub fn route(&self) -> &'static Route {
        ROUTES
            .iter()
            .find(|route| route.kind == *self)
            .unwrap_or_else(|| unreachable!("every event kind has a route"))
    }

    pub fn as_str(&self) -> &'static str {
        self.route().inbound
    }
}
