use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::RelayError;
use crate::protocol::{ClientEvent, Envelope, ServerEvent};
use crate::registry::{Binding, RoleRegistry, StatusSnapshot};
use crate::routing::{Ack, EventKind};
use crate::session::{Role, Session, SessionId};

/// Default ceiling for a single inbound frame (100 MiB).
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Outbound side of the transport adapter. Every call is non-blocking.
pub trait Transport: Send + Sync {
    /// Queues a message for one session. Returns false if the session is gone.
    fn send(&self, session: SessionId, envelope: Envelope) -> bool;
    /// Queues a message for every connected session, bound or not.
    fn broadcast(&self, envelope: Envelope);
    /// Asks the adapter to close a connection. Its disconnect still arrives
    /// through [`RelayBroker::disconnect`].
    fn close(&self, session: SessionId, reason: &str);
}

/// Who hears about the controlled device coming and going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifyScope {
    /// Only the session bound as controller.
    #[default]
    PeerOnly,
    /// Every connected session.
    AllSessions,
}

/// What happens to a session whose slot is taken over by a new registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplacedPolicy {
    /// Leave the connection open but unrouted until it disconnects on its own.
    #[default]
    Orphan,
    /// Ask the transport to close it.
    Close,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub notify_scope: NotifyScope,
    pub displaced: DisplacedPolicy,
    /// Also tell the controlled device when a controller comes and goes.
    pub symmetric_peer_status: bool,
    pub max_payload_bytes: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            notify_scope: NotifyScope::default(),
            displaced: DisplacedPolicy::default(),
            symmetric_peer_status: false,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

/// What the broker did with a frame it accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Registered(Role),
    Forwarded { kind: EventKind, target: Role },
    Pong,
}

/// Pairs one controlled and one controller session and relays events
/// between them.
///
/// All registry transitions happen under a single lock, and the outbound
/// pushes they trigger are issued before it is released, so every session
/// observes notifications in registry order.
pub struct RelayBroker {
    registry: Mutex<RoleRegistry>,
    transport: Arc<dyn Transport>,
    config: BrokerConfig,
}

impl RelayBroker {
    pub fn new(transport: Arc<dyn Transport>, config: BrokerConfig) -> Self {
        Self {
            registry: Mutex::new(RoleRegistry::new()),
            transport,
            config,
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Entry point for a raw text frame from the transport.
    pub fn handle_frame(&self, session: &Session, raw: &str) -> Result<Dispatch, RelayError> {
        if raw.len() > self.config.max_payload_bytes {
            return Err(RelayError::PayloadTooLarge {
                size: raw.len(),
                max: self.config.max_payload_bytes,
            });
        }
        let event = ClientEvent::parse(raw)?;
        self.handle_event(session, event)
    }

    pub fn handle_event(&self, session: &Session, event: ClientEvent) -> Result<Dispatch, RelayError> {
        let now = Utc::now();
        match event {
            ClientEvent::Register { role, label } => {
                self.register(session, role, label.as_deref(), now);
                Ok(Dispatch::Registered(role))
            }
            ClientEvent::Relay { kind, payload } => self.relay(session, kind, payload, now),
            ClientEvent::Ping => {
                self.registry.lock().touch(session.id, now);
                self.transport.send(
                    session.id,
                    ServerEvent::Pong {
                        timestamp: now.timestamp_millis(),
                    }
                    .into(),
                );
                Ok(Dispatch::Pong)
            }
        }
    }

    fn register(&self, session: &Session, role: Role, label: Option<&str>, now: DateTime<Utc>) {
        let mut registry = self.registry.lock();
        let binding = Binding::new(session, label, role, now);
        let outcome = registry.bind(role, binding.clone());

        info!(
            session_id = %session.id,
            role = %role,
            label = %binding.label,
            remote_addr = ?session.remote_address,
            "session registered"
        );

        // The registrant hears its own ack before any fallout of the bind.
        self.transport.send(
            session.id,
            ServerEvent::Registered {
                role,
                ip: session.remote_address.clone(),
            }
            .into(),
        );

        if let Some(vacated) = outcome.vacated {
            debug!(session_id = %session.id, role = %vacated, "session left its previous role");
            self.announce_departure(&registry, vacated, Some(session.id), now);
        }

        if let Some(displaced) = &outcome.displaced {
            info!(
                session_id = %displaced.session,
                role = %role,
                policy = ?self.config.displaced,
                "registration displaced previous occupant"
            );
            if self.config.displaced == DisplacedPolicy::Close {
                self.transport.close(displaced.session, "displaced by a new registration");
            }
        }

        match role {
            Role::Controlled => {
                self.announce_arrival(&registry, &binding, Role::Controlled, now);
            }
            Role::Controller => {
                // A late controller must learn about a controlled device that
                // registered before it, whatever the notify scope.
                if let Some(controlled) = registry.occupant(Role::Controlled) {
                    self.transport
                        .send(session.id, peer_connected(Role::Controlled, controlled, now));
                }
                if self.config.symmetric_peer_status {
                    self.announce_arrival(&registry, &binding, Role::Controller, now);
                }
            }
        }
    }

    fn relay(
        &self,
        session: &Session,
        kind: EventKind,
        mut payload: serde_json::Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<Dispatch, RelayError> {
        let route = kind.route();
        let mut registry = self.registry.lock();

        let origin = registry.role_of(session.id);
        if origin != Some(route.origin) {
            return Err(RelayError::WrongOrigin {
                kind,
                expected: route.origin,
                actual: origin,
            });
        }
        registry.touch(session.id, now);

        let echo = match route.ack {
            Ack::Reply { echo, .. } => payload.get(echo).cloned().map(|value| (echo, value)),
            Ack::None => None,
        };

        let Some(target) = registry.occupant_id(route.target) else {
            if let Ack::Reply { event, .. } = route.ack {
                self.transport.send(
                    session.id,
                    ServerEvent::Ack {
                        event,
                        ok: false,
                        echo: None,
                        error: Some("peer not connected".into()),
                    }
                    .into(),
                );
            }
            return Err(RelayError::PeerNotConnected(route.target));
        };

        payload.insert("timestamp".into(), Value::from(now.timestamp_millis()));
        let delivered = self.transport.send(
            target,
            ServerEvent::Relayed {
                event: route.outbound,
                payload,
            }
            .into(),
        );

        if let Ack::Reply { event, .. } = route.ack {
            let ack = if delivered {
                ServerEvent::Ack {
                    event,
                    ok: true,
                    echo,
                    error: None,
                }
            } else {
                ServerEvent::Ack {
                    event,
                    ok: false,
                    echo: None,
                    error: Some("peer not connected".into()),
                }
            };
            self.transport.send(session.id, ack.into());
        }

        if delivered {
            Ok(Dispatch::Forwarded {
                kind,
                target: route.target,
            })
        } else {
            Err(RelayError::PeerNotConnected(route.target))
        }
    }

    /// Transport-reported connection loss. Safe to call more than once.
    pub fn disconnect(&self, session: SessionId) -> Option<Role> {
        let now = Utc::now();
        let mut registry = self.registry.lock();
        let vacated = registry.unbind(session)?;
        info!(session_id = %session, role = %vacated, "role vacated on disconnect");
        self.announce_departure(&registry, vacated, None, now);
        Some(vacated)
    }

    pub fn status(&self) -> StatusSnapshot {
        self.registry.lock().snapshot(Utc::now())
    }

    pub fn occupant(&self, role: Role) -> Option<Binding> {
        self.registry.lock().occupant(role).cloned()
    }

    fn announce_arrival(&self, registry: &RoleRegistry, binding: &Binding, role: Role, now: DateTime<Utc>) {
        let message = peer_connected(role, binding, now);
        match (role, self.config.notify_scope) {
            (Role::Controlled, NotifyScope::AllSessions) => self.transport.broadcast(message),
            _ => {
                if let Some(peer) = registry.occupant_id(role.opposite()) {
                    if peer != binding.session {
                        self.transport.send(peer, message);
                    }
                }
            }
        }
    }

    fn announce_departure(
        &self,
        registry: &RoleRegistry,
        role: Role,
        cause: Option<SessionId>,
        now: DateTime<Utc>,
    ) {
        if role == Role::Controller && !self.config.symmetric_peer_status {
            return;
        }
        let message: Envelope = ServerEvent::PeerStatus {
            peer: role,
            connected: false,
            label: None,
            ip: None,
            timestamp: now.timestamp_millis(),
        }
        .into();
        match (role, self.config.notify_scope) {
            (Role::Controlled, NotifyScope::AllSessions) => self.transport.broadcast(message),
            _ => {
                if let Some(peer) = registry.occupant_id(role.opposite()) {
                    if Some(peer) != cause {
                        self.transport.send(peer, message);
                    }
                }
            }
        }
    }
}

fn peer_connected(role: Role, binding: &Binding, now: DateTime<Utc>) -> Envelope {
    ServerEvent::PeerStatus {
        peer: role,
        connected: true,
        label: Some(binding.label.clone()),
        ip: binding.remote_address.clone(),
        timestamp: now.timestamp_millis(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        To(SessionId, Envelope),
        All(Envelope),
        Closed(SessionId),
    }

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Sent>>,
        gone: Mutex<Vec<SessionId>>,
    }

    impl RecordingTransport {
        fn take(&self) -> Vec<Sent> {
            std::mem::take(&mut *self.sent.lock())
        }

        fn to(&self, session: SessionId) -> Vec<Envelope> {
            self.sent
                .lock()
                .iter()
                .filter_map(|sent| match sent {
                    Sent::To(id, envelope) if *id == session => Some(envelope.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    impl Transport for RecordingTransport {
        fn send(&self, session: SessionId, envelope: Envelope) -> bool {
            if self.gone.lock().contains(&session) {
                return false;
            }
            self.sent.lock().push(Sent::To(session, envelope));
            true
        }

        fn broadcast(&self, envelope: Envelope) {
            self.sent.lock().push(Sent::All(envelope));
        }

        fn close(&self, session: SessionId, _reason: &str) {
            self.sent.lock().push(Sent::Closed(session));
        }
    }

    fn broker_with(config: BrokerConfig) -> (RelayBroker, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        (RelayBroker::new(transport.clone(), config), transport)
    }

    fn broker() -> (RelayBroker, Arc<RecordingTransport>) {
        broker_with(BrokerConfig::default())
    }

    fn frame(event: &str, data: Value) -> String {
        Envelope::new(event, data).to_json()
    }

    fn register(broker: &RelayBroker, session: &Session, role: Role, label: &str) {
        let event = match role {
            Role::Controlled => "register-controlled",
            Role::Controller => "register-controller",
        };
        broker
            .handle_frame(session, &frame(event, json!({ "label": label })))
            .unwrap();
    }

    #[test]
    fn controlled_registration_acks_and_notifies_controller() {
        let (broker, transport) = broker();
        let controller = Session::new(None);
        let controlled = Session::new(Some("192.168.1.20".into()));

        register(&broker, &controller, Role::Controller, "Laptop");
        transport.take();
        register(&broker, &controlled, Role::Controlled, "Pixel");

        let sent = transport.take();
        assert_eq!(sent.len(), 2);
        let Sent::To(id, ack) = &sent[0] else { panic!("expected ack") };
        assert_eq!(*id, controlled.id);
        assert_eq!(ack.event, "registered");
        assert_eq!(ack.data, json!({"role": "controlled", "ip": "192.168.1.20"}));

        let Sent::To(id, status) = &sent[1] else { panic!("expected peer status") };
        assert_eq!(*id, controller.id);
        assert_eq!(status.event, "peer-status");
        assert_eq!(status.data["peer"], json!("controlled"));
        assert_eq!(status.data["connected"], json!(true));
        assert_eq!(status.data["label"], json!("Pixel"));
        assert_eq!(status.data["ip"], json!("192.168.1.20"));
    }

    #[test]
    fn late_controller_learns_about_controlled() {
        let (broker, transport) = broker();
        let controlled = Session::new(None);
        let controller = Session::new(None);

        register(&broker, &controlled, Role::Controlled, "Pixel");
        // Nobody to tell yet.
        assert_eq!(transport.take().len(), 1);

        register(&broker, &controller, Role::Controller, "Laptop");
        let to_controller = transport.to(controller.id);
        assert_eq!(to_controller.len(), 2);
        assert_eq!(to_controller[0].event, "registered");
        assert_eq!(to_controller[0].data["role"], json!("controller"));
        assert_eq!(to_controller[1].event, "peer-status");
        assert_eq!(to_controller[1].data["connected"], json!(true));
        assert_eq!(to_controller[1].data["label"], json!("Pixel"));
        // The controlled device hears nothing about the controller by default.
        assert!(transport.to(controlled.id).is_empty());
    }

    #[test]
    fn all_sessions_scope_broadcasts_arrival_and_departure() {
        let (broker, transport) = broker_with(BrokerConfig {
            notify_scope: NotifyScope::AllSessions,
            ..BrokerConfig::default()
        });
        let controlled = Session::new(None);

        register(&broker, &controlled, Role::Controlled, "Pixel");
        let sent = transport.take();
        assert!(matches!(&sent[1], Sent::All(envelope) if envelope.data["connected"] == json!(true)));

        broker.disconnect(controlled.id);
        let sent = transport.take();
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0], Sent::All(envelope) if envelope.data["connected"] == json!(false)));
    }

    #[test]
    fn repeated_controlled_registrations_last_one_wins() {
        let (broker, _transport) = broker();
        let sessions: Vec<Session> = (0..4).map(|_| Session::new(None)).collect();
        for (n, session) in sessions.iter().enumerate() {
            register(&broker, session, Role::Controlled, &format!("phone-{n}"));
            let occupant = broker.occupant(Role::Controlled).unwrap();
            assert_eq!(occupant.session, session.id);
            assert_eq!(occupant.label, format!("phone-{n}"));
        }
    }

    #[test]
    fn displaced_session_is_orphaned_by_default() {
        let (broker, transport) = broker();
        let old = Session::new(None);
        let new = Session::new(None);
        let controller = Session::new(None);
        register(&broker, &controller, Role::Controller, "Laptop");
        register(&broker, &old, Role::Controlled, "Old");
        register(&broker, &new, Role::Controlled, "New");

        assert!(!transport.take().iter().any(|sent| matches!(sent, Sent::Closed(_))));

        // The orphan no longer has a role, so its frames go nowhere.
        let err = broker
            .handle_frame(&old, &frame("battery-status", json!({"level": 50})))
            .unwrap_err();
        assert!(matches!(err, RelayError::WrongOrigin { actual: None, .. }));

        // And its eventual disconnect does not evict the new occupant.
        assert_eq!(broker.disconnect(old.id), None);
        assert_eq!(broker.occupant(Role::Controlled).unwrap().session, new.id);
        assert!(transport.take().is_empty());
    }

    #[test]
    fn displaced_session_closed_when_configured() {
        let (broker, transport) = broker_with(BrokerConfig {
            displaced: DisplacedPolicy::Close,
            ..BrokerConfig::default()
        });
        let old = Session::new(None);
        let new = Session::new(None);
        register(&broker, &old, Role::Controlled, "Old");
        register(&broker, &new, Role::Controlled, "New");

        assert!(transport.take().contains(&Sent::Closed(old.id)));
    }

    #[test]
    fn disconnecting_controlled_notifies_controller_once() {
        let (broker, transport) = broker();
        let controlled = Session::new(None);
        let controller = Session::new(None);
        register(&broker, &controlled, Role::Controlled, "Pixel");
        register(&broker, &controller, Role::Controller, "Laptop");
        transport.take();

        assert_eq!(broker.disconnect(controlled.id), Some(Role::Controlled));
        assert_eq!(broker.disconnect(controlled.id), None);

        let sent = transport.take();
        assert_eq!(sent.len(), 1);
        let Sent::To(id, status) = &sent[0] else { panic!("expected peer status") };
        assert_eq!(*id, controller.id);
        assert_eq!(status.data["peer"], json!("controlled"));
        assert_eq!(status.data["connected"], json!(false));
        assert!(status.data.get("label").is_none());
        assert!(broker.occupant(Role::Controlled).is_none());
    }

    #[test]
    fn disconnecting_controlled_without_controller_sends_nothing() {
        let (broker, transport) = broker();
        let controlled = Session::new(None);
        register(&broker, &controlled, Role::Controlled, "Pixel");
        transport.take();

        broker.disconnect(controlled.id);
        assert!(transport.take().is_empty());
    }

    #[test]
    fn controller_departure_is_silent_unless_symmetric() {
        let (broker, transport) = broker();
        let controlled = Session::new(None);
        let controller = Session::new(None);
        register(&broker, &controlled, Role::Controlled, "Pixel");
        register(&broker, &controller, Role::Controller, "Laptop");
        transport.take();
        assert_eq!(broker.disconnect(controller.id), Some(Role::Controller));
        assert!(transport.take().is_empty());

        let (broker, transport) = broker_with(BrokerConfig {
            symmetric_peer_status: true,
            ..BrokerConfig::default()
        });
        register(&broker, &controlled, Role::Controlled, "Pixel");
        register(&broker, &controller, Role::Controller, "Laptop");
        let arrival = transport.to(controlled.id);
        assert_eq!(arrival.last().unwrap().data["peer"], json!("controller"));
        assert_eq!(arrival.last().unwrap().data["connected"], json!(true));
        transport.take();

        broker.disconnect(controller.id);
        let to_controlled = transport.to(controlled.id);
        assert_eq!(to_controlled.len(), 1);
        assert_eq!(to_controlled[0].data["peer"], json!("controller"));
        assert_eq!(to_controlled[0].data["connected"], json!(false));
    }

    #[test]
    fn command_is_forwarded_and_acknowledged() {
        let (broker, transport) = broker();
        let controlled = Session::new(None);
        let controller = Session::new(None);
        register(&broker, &controlled, Role::Controlled, "Pixel");
        register(&broker, &controller, Role::Controller, "Laptop");
        transport.take();

        let dispatch = broker
            .handle_frame(
                &controller,
                &frame("command", json!({"cmd": "lock", "timestamp": 1})),
            )
            .unwrap();
        assert_eq!(
            dispatch,
            Dispatch::Forwarded {
                kind: EventKind::Command,
                target: Role::Controlled
            }
        );

        let forwarded = transport.to(controlled.id);
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].event, "execute-command");
        assert_eq!(forwarded[0].data["cmd"], json!("lock"));
        // Sender timestamps are replaced by the broker's own.
        assert_ne!(forwarded[0].data["timestamp"], json!(1));
        assert!(forwarded[0].data["timestamp"].is_i64());

        let acks = transport.to(controller.id);
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].event, "command-sent");
        assert_eq!(acks[0].data, json!({"ok": true, "cmd": "lock"}));
    }

    #[test]
    fn command_without_controlled_is_negatively_acknowledged() {
        let (broker, transport) = broker();
        let controller = Session::new(None);
        register(&broker, &controller, Role::Controller, "Laptop");
        transport.take();

        let err = broker
            .handle_frame(&controller, &frame("command", json!({"cmd": "lock"})))
            .unwrap_err();
        assert!(matches!(err, RelayError::PeerNotConnected(Role::Controlled)));

        let sent = transport.take();
        assert_eq!(sent.len(), 1);
        let Sent::To(id, ack) = &sent[0] else { panic!("expected ack") };
        assert_eq!(*id, controller.id);
        assert_eq!(ack.event, "command-sent");
        assert_eq!(ack.data, json!({"ok": false, "error": "peer not connected"}));
    }

    #[test]
    fn command_to_vanished_peer_is_negatively_acknowledged() {
        let (broker, transport) = broker();
        let controlled = Session::new(None);
        let controller = Session::new(None);
        register(&broker, &controlled, Role::Controlled, "Pixel");
        register(&broker, &controller, Role::Controller, "Laptop");
        transport.take();
        transport.gone.lock().push(controlled.id);

        assert!(broker
            .handle_frame(&controller, &frame("command", json!({"cmd": "lock"})))
            .is_err());
        assert_eq!(transport.to(controller.id)[0].data["ok"], json!(false));
    }

    #[test]
    fn fire_and_forget_without_peer_is_silent() {
        let (broker, transport) = broker();
        let controller = Session::new(None);
        register(&broker, &controller, Role::Controller, "Laptop");
        transport.take();

        for event in ["touch", "swipe", "mouse-click"] {
            let err = broker
                .handle_frame(&controller, &frame(event, json!({"x": 1, "y": 2})))
                .unwrap_err();
            assert!(matches!(err, RelayError::PeerNotConnected(Role::Controlled)));
        }
        assert!(transport.take().is_empty());
    }

    #[test]
    fn wrong_origin_is_dropped_silently() {
        let (broker, transport) = broker();
        let controlled = Session::new(None);
        let controller = Session::new(None);
        let stranger = Session::new(None);
        register(&broker, &controlled, Role::Controlled, "Pixel");
        register(&broker, &controller, Role::Controller, "Laptop");
        transport.take();

        assert!(matches!(
            broker.handle_frame(&controlled, &frame("command", json!({"cmd": "x"}))),
            Err(RelayError::WrongOrigin {
                expected: Role::Controller,
                actual: Some(Role::Controlled),
                ..
            })
        ));
        assert!(matches!(
            broker.handle_frame(&controller, &frame("screenshot", json!({"image": "..."}))),
            Err(RelayError::WrongOrigin { .. })
        ));
        assert!(matches!(
            broker.handle_frame(&stranger, &frame("touch", json!({}))),
            Err(RelayError::WrongOrigin { actual: None, .. })
        ));
        assert!(transport.take().is_empty());
    }

    #[test]
    fn telemetry_flows_from_controlled_to_controller() {
        let (broker, transport) = broker();
        let controlled = Session::new(None);
        let controller = Session::new(None);
        register(&broker, &controlled, Role::Controlled, "Pixel");
        register(&broker, &controller, Role::Controller, "Laptop");
        transport.take();

        let cases = [
            ("command-result", json!({"cmd": "lock", "result": "done"}), "command-response"),
            ("screenshot", json!({"image": "aGVsbG8="}), "screenshot-data"),
            ("screen-frame", json!({"frame": "AAAA", "seq": 3}), "screen-frame"),
            ("battery-status", json!({"level": 41, "charging": true}), "battery-update"),
        ];
        for (inbound, data, outbound) in cases {
            broker.handle_frame(&controlled, &frame(inbound, data.clone())).unwrap();
            let received = transport.take();
            assert_eq!(received.len(), 1, "{inbound}");
            let Sent::To(id, envelope) = &received[0] else { panic!("expected forward") };
            assert_eq!(*id, controller.id);
            assert_eq!(envelope.event, outbound);
            for (key, value) in data.as_object().unwrap() {
                assert_eq!(&envelope.data[key], value);
            }
        }
    }

    #[test]
    fn malformed_and_oversized_frames_leave_broker_usable() {
        let (broker, transport) = broker_with(BrokerConfig {
            max_payload_bytes: 64,
            ..BrokerConfig::default()
        });
        let controlled = Session::new(None);

        assert!(matches!(
            broker.handle_frame(&controlled, "{not json"),
            Err(RelayError::InvalidFrame(_))
        ));
        let big = frame("screen-frame", json!({ "frame": "A".repeat(128) }));
        let err = broker.handle_frame(&controlled, &big).unwrap_err();
        assert!(err.closes_connection());
        assert_eq!(err.reason(), "oversized");
        assert!(transport.take().is_empty());

        register(&broker, &controlled, Role::Controlled, "Pixel");
        assert_eq!(broker.occupant(Role::Controlled).unwrap().session, controlled.id);
    }

    #[test]
    fn switching_role_vacates_and_displaces() {
        let (broker, transport) = broker();
        let tablet = Session::new(None);
        let laptop = Session::new(None);
        register(&broker, &tablet, Role::Controlled, "Tablet");
        register(&broker, &laptop, Role::Controller, "Laptop");
        transport.take();

        // The controlled tablet takes over the controller slot.
        register(&broker, &tablet, Role::Controller, "Tablet");
        let sent = transport.take();
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0], Sent::To(id, ack) if *id == tablet.id && ack.event == "registered"));
        assert!(broker.occupant(Role::Controlled).is_none());
        assert_eq!(broker.occupant(Role::Controller).unwrap().session, tablet.id);

        // The displaced laptop is now unrouted.
        assert!(broker
            .handle_frame(&laptop, &frame("touch", json!({"x": 1})))
            .is_err());
        assert_eq!(broker.disconnect(laptop.id), None);
    }

    #[test]
    fn role_switch_acks_before_announcing_departure() {
        let (broker, transport) = broker_with(BrokerConfig {
            notify_scope: NotifyScope::AllSessions,
            ..BrokerConfig::default()
        });
        let tablet = Session::new(None);
        register(&broker, &tablet, Role::Controlled, "Tablet");
        transport.take();

        register(&broker, &tablet, Role::Controller, "Tablet");
        let sent = transport.take();
        assert_eq!(sent.len(), 2);
        assert!(matches!(
            &sent[0],
            Sent::To(id, ack) if *id == tablet.id && ack.event == "registered"
        ));
        assert!(matches!(
            &sent[1],
            Sent::All(status) if status.event == "peer-status"
                && status.data["peer"] == json!("controlled")
                && status.data["connected"] == json!(false)
        ));
    }

    #[test]
    fn ping_refreshes_last_seen_and_pongs() {
        let (broker, transport) = broker();
        let controlled = Session::new(None);
        register(&broker, &controlled, Role::Controlled, "Pixel");
        let before = broker.occupant(Role::Controlled).unwrap().last_seen_at;
        transport.take();

        assert_eq!(
            broker.handle_frame(&controlled, &frame("ping", Value::Null)).unwrap(),
            Dispatch::Pong
        );
        assert!(broker.occupant(Role::Controlled).unwrap().last_seen_at >= before);
        let sent = transport.to(controlled.id);
        assert_eq!(sent[0].event, "pong");
    }

    #[test]
    fn pairing_scenario() {
        let (broker, transport) = broker();
        let pixel = Session::new(None);
        let controller = Session::new(None);

        register(&broker, &pixel, Role::Controlled, "Pixel");
        register(&broker, &controller, Role::Controller, "Laptop");
        let status = transport.to(controller.id).pop().unwrap();
        assert_eq!(status.event, "peer-status");
        assert_eq!(status.data["peer"], json!("controlled"));
        assert_eq!(status.data["connected"], json!(true));
        assert_eq!(status.data["label"], json!("Pixel"));
        transport.take();

        broker.disconnect(pixel.id);
        let status = transport.to(controller.id).pop().unwrap();
        assert_eq!(status.data["connected"], json!(false));
        transport.take();

        let pixel2 = Session::new(None);
        register(&broker, &pixel2, Role::Controlled, "Pixel2");
        let status = transport.to(controller.id).pop().unwrap();
        assert_eq!(status.data["connected"], json!(true));
        assert_eq!(status.data["label"], json!("Pixel2"));

        let snapshot = serde_json::to_value(broker.status()).unwrap();
        assert_eq!(snapshot["controlled"]["label"], json!("Pixel2"));
        assert_eq!(snapshot["controller"]["label"], json!("Laptop"));
    }
}
