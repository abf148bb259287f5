//! WebSocket connection hub: sessions, room fan-out, backpressure and liveness.
//!
//! | Module | Role |
//! |--------|------|
//! | [`connection`] | Framed read/write halves with deadlines and a shared close signal |
//! | [`rate_limit`] | Per-session one-second inbound frame budget |
//! | [`heartbeat`] | Ping cadence, read/write deadlines, frame size ceiling |
//! | [`mailbox`] | Bounded outbound queue with drop-on-full pushes |
//! | [`envelope`] | Inbound/outbound JSON envelopes |
//! | [`session`] | Inbound and outbound pumps for one connection |
//! | [`hub`] | Session registry, room membership, broadcast, inbound routing |

pub mod connection;
pub mod envelope;
pub mod heartbeat;
pub mod hub;
pub mod mailbox;
pub mod rate_limit;
pub mod session;

pub use hub::{BroadcastReport, Hub, HubConfig};
pub use session::{ClientSession, SessionInfo};
