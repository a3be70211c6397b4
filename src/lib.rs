//! Sierra peer-to-peer networking runtime.
//!
//! The channel/session/protocol core of a cryptocurrency node: a strand
//! based async substrate over tokio, framed message I/O over TCP, session
//! control loops (inbound, outbound, manual, seed), the version handshake
//! state machine, a persistent address pool, and typed message dispatch.
//! No chain validation, no wallet, no mining; block and transaction relay
//! ride these rails as higher-layer protocols.

pub mod config;
pub mod error;
pub mod messages;
pub mod net;
pub mod p2p;
pub mod protocols;
pub mod runtime;
pub mod sessions;
pub mod settings;

pub use config::{Authority, Endpoint};
pub use error::{Code, Error};
pub use messages::{Identifier, Message};
pub use net::Channel;
pub use p2p::P2p;
pub use sessions::manual::ManualObserver;
pub use settings::Settings;
