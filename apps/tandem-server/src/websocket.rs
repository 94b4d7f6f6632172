use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
};
use chrono::Utc;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, decrement_gauge, increment_gauge};
use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tandem_core::{Dispatch, Envelope, RelayError, Session, SessionId, Transport};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client_ip;
use crate::state::AppState;

/// How long the writer gets to flush queued frames after the reader stops.
const WRITER_DRAIN: Duration = Duration::from_secs(2);

/// Socket-level frames may exceed the relay limit by this factor so the
/// broker sees them and can answer with a 1009 close.
const SOCKET_LIMIT_FACTOR: usize = 2;

/// Pings go out four times per idle window so a client that only listens
/// still answers with pongs before it is swept.
fn heartbeat_period(idle_timeout: Duration) -> Duration {
    (idle_timeout / 4).clamp(Duration::from_millis(250), Duration::from_secs(30))
}

#[derive(Debug)]
enum Outbound {
    Frame(Envelope),
    Close { code: u16, reason: String },
}

struct Connection {
    tx: mpsc::UnboundedSender<Outbound>,
    last_activity: Arc<AtomicI64>,
    closing: Arc<Notify>,
}

/// Handles for one attached connection, owned by its socket task.
struct Attachment {
    rx: mpsc::UnboundedReceiver<Outbound>,
    last_activity: Arc<AtomicI64>,
    closing: Arc<Notify>,
}

/// Every open websocket, keyed by session. This is the broker's outbound
/// side: each connection has a writer task fed by an unbounded channel, so
/// sends never wait on the network.
#[derive(Default)]
pub struct SocketHub {
    connections: DashMap<SessionId, Connection>,
}

impl SocketHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn attach(&self, session: SessionId) -> Attachment {
        let (tx, rx) = mpsc::unbounded_channel();
        let last_activity = Arc::new(AtomicI64::new(Utc::now().timestamp_millis()));
        let closing = Arc::new(Notify::new());
        self.connections.insert(
            session,
            Connection {
                tx,
                last_activity: last_activity.clone(),
                closing: closing.clone(),
            },
        );
        Attachment {
            rx,
            last_activity,
            closing,
        }
    }

    fn detach(&self, session: SessionId) {
        self.connections.remove(&session);
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn close_with(&self, session: SessionId, code: u16, reason: &str) {
        if let Some(connection) = self.connections.get(&session) {
            let _ = connection.tx.send(Outbound::Close {
                code,
                reason: reason.to_string(),
            });
            connection.closing.notify_one();
        }
    }

    /// Closes every connection silent for longer than `timeout`. Returns how
    /// many were closed.
    pub fn close_idle(&self, timeout: Duration) -> usize {
        let cutoff = Utc::now().timestamp_millis() - timeout.as_millis() as i64;
        // Collect first so no map guard is held while closing.
        let idle: Vec<SessionId> = self
            .connections
            .iter()
            .filter(|entry| entry.last_activity.load(Ordering::Relaxed) < cutoff)
            .map(|entry| *entry.key())
            .collect();

        for session in &idle {
            info!(session_id = %session, "closing idle connection");
            counter!("tandem_idle_closed_total", 1);
            self.close_with(*session, close_code::POLICY, "idle timeout");
        }
        idle.len()
    }

    pub fn spawn_idle_monitor(self: Arc<Self>, timeout: Duration) -> JoinHandle<()> {
        let period = (timeout / 4).clamp(Duration::from_secs(1), Duration::from_secs(60));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                self.close_idle(timeout);
            }
        })
    }
}

impl Transport for SocketHub {
    fn send(&self, session: SessionId, envelope: Envelope) -> bool {
        match self.connections.get(&session) {
            Some(connection) => connection.tx.send(Outbound::Frame(envelope)).is_ok(),
            None => false,
        }
    }

    fn broadcast(&self, envelope: Envelope) {
        for connection in self.connections.iter() {
            let _ = connection.tx.send(Outbound::Frame(envelope.clone()));
        }
    }

    fn close(&self, session: SessionId, reason: &str) {
        self.close_with(session, close_code::POLICY, reason);
    }
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    let limit = state
        .broker
        .config()
        .max_payload_bytes
        .saturating_mul(SOCKET_LIMIT_FACTOR);
    let client_ip = client_ip::resolve(&headers, remote_addr);
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| handle_socket(socket, state, client_ip.to_string()))
}

async fn handle_socket(socket: WebSocket, state: AppState, client_ip: String) {
    let session = Session::new(Some(client_ip));
    let (mut sender, mut receiver) = socket.split();
    let Attachment {
        mut rx,
        last_activity,
        closing,
    } = state.hub.attach(session.id);

    counter!("tandem_connections_total", 1);
    increment_gauge!("tandem_connections_active", 1.0);
    info!(session_id = %session.id, remote_addr = ?session.remote_address, "websocket connected");

    let writer_session = session.id;
    let heartbeat = state.config.idle_timeout.map(heartbeat_period);
    let mut writer = tokio::spawn(async move {
        let mut pings = heartbeat.map(|period| {
            tokio::time::interval_at(tokio::time::Instant::now() + period, period)
        });
        loop {
            let outbound = tokio::select! {
                outbound = rx.recv() => outbound,
                _ = async {
                    match pings.as_mut() {
                        Some(interval) => {
                            interval.tick().await;
                        }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    if sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                    continue;
                }
            };
            let Some(outbound) = outbound else {
                break;
            };
            let message = match outbound {
                Outbound::Frame(envelope) => Message::Text(envelope.to_json()),
                Outbound::Close { code, reason } => {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: Cow::Owned(reason),
                        })))
                        .await;
                    break;
                }
            };
            if sender.send(message).await.is_err() {
                break;
            }
        }
        debug!(session_id = %writer_session, "writer task finished");
    });

    loop {
        let frame = tokio::select! {
            frame = receiver.next() => frame,
            _ = closing.notified() => {
                debug!(session_id = %session.id, "connection closed by server");
                break;
            }
        };
        let Some(frame) = frame else {
            break;
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                warn!(session_id = %session.id, error = %err, "error receiving websocket frame");
                break;
            }
        };
        last_activity.store(Utc::now().timestamp_millis(), Ordering::Relaxed);

        let text = match frame {
            Message::Text(text) => text,
            Message::Binary(data) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    debug!(session_id = %session.id, "ignoring non-UTF8 binary frame");
                    counter!("tandem_events_dropped_total", 1, "reason" => "malformed");
                    continue;
                }
            },
            Message::Close(frame) => {
                debug!(
                    session_id = %session.id,
                    reason = ?frame.map(|f| f.reason.to_string()),
                    "client closed websocket"
                );
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        match state.broker.handle_frame(&session, &text) {
            Ok(dispatch) => record_dispatch(&session, dispatch),
            Err(err) => {
                counter!("tandem_events_dropped_total", 1, "reason" => err.reason());
                debug!(session_id = %session.id, error = %err, "frame dropped");
                if err.closes_connection() {
                    reject_oversized(&state, &session, &err);
                }
            }
        }
    }

    state.broker.disconnect(session.id);
    state.hub.detach(session.id);
    decrement_gauge!("tandem_connections_active", 1.0);

    if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        writer.abort();
    }

    info!(session_id = %session.id, "websocket disconnected");
}

fn record_dispatch(session: &Session, dispatch: Dispatch) {
    match dispatch {
        Dispatch::Registered(role) => {
            counter!("tandem_registrations_total", 1, "role" => role.as_str());
        }
        Dispatch::Forwarded { kind, target } => {
            counter!("tandem_events_forwarded_total", 1, "kind" => kind.as_str());
            debug!(session_id = %session.id, kind = kind.as_str(), target = %target, "event relayed");
        }
        Dispatch::Pong => {}
    }
}

fn reject_oversized(state: &AppState, session: &Session, err: &RelayError) {
    warn!(session_id = %session.id, error = %err, "closing connection");
    state
        .hub
        .close_with(session.id, close_code::SIZE, "payload too large");
}
