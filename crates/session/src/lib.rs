//! Long-lived duplex session to the upstream model provider.
//!
//! One [`SessionDriver`] per (event, agent type). The driver owns the
//! connection lifecycle: configure-on-connect, heartbeat, jittered
//! reconnect, and a send queue that guarantees at most one
//! response-expecting message in flight at a time. Inbound provider
//! events are routed to a per-driver sink; status transitions reach a
//! single lifecycle hook.

pub mod driver;
pub mod protocol;
pub mod reconnect;
pub mod transport;

pub use driver::{AudioAppend, DriverConfig, EventSink, SessionDriver, StatusHook};
pub use protocol::{ClientEvent, ServerEvent, SessionSetup, ToolSpec};
pub use reconnect::ReconnectBackoff;
pub use transport::{PipeEnd, PipeTransport, SessionTransport, TransportPipe, WsTransport};
