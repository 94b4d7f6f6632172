//! Pairing and relay core for Tandem.
//!
//! A [`RelayBroker`] keeps one `controlled` and one `controller` session in a
//! [`RoleRegistry`] and moves events between them according to the static
//! [`routing::ROUTES`] table. It does no I/O of its own: the transport adapter
//! feeds it frames and disconnects, and receives its output through the
//! [`Transport`] trait.

pub mod broker;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod routing;
pub mod session;

pub use broker::{
    BrokerConfig, DisplacedPolicy, Dispatch, NotifyScope, RelayBroker, Transport,
    DEFAULT_MAX_PAYLOAD_BYTES,
};
pub use error::RelayError;
pub use protocol::{ClientEvent, Envelope, ServerEvent};
pub use registry::{Binding, RoleRegistry, StatusSnapshot};
pub use routing::{Ack, EventKind, Route, ROUTES};
pub use session::{Role, Session, SessionId};
