//! Socket, channel and connection-machinery layer.

pub mod acceptor;
pub mod channel;
pub mod connector;
pub mod distributor;
pub mod hosts;
pub mod socket;

pub use acceptor::Acceptor;
pub use channel::Channel;
pub use connector::Connector;
pub use distributor::Distributor;
pub use hosts::Hosts;
pub use socket::Socket;
