//! Protocols: stateful handlers attached to a channel.
//!
//! A protocol holds a weak back-reference to its channel; the subscriber
//! closures pin the protocol until the channel's stop cascades through
//! the distributor and drops them.

pub mod address;
pub mod alert;
pub mod ping;
pub mod reject;
pub mod seed;
pub mod version;

use crate::messages::level;
use crate::net::Channel;
use crate::p2p::Context;
use std::sync::Arc;

/// The post-handshake suite for inbound, outbound and manual channels,
/// gated by negotiated level and configuration.
pub(crate) fn attach_standard(context: &Arc<Context>, channel: &Arc<Channel>) {
    let settings = channel.settings().clone();
    let negotiated = channel.negotiated_version();

    if negotiated >= level::ADDRESS_TIME {
        ping::ProtocolPing::attach(channel);
        if settings.enable_address {
            address::ProtocolAddress::attach(context.clone(), channel);
        }
        if settings.enable_alert {
            alert::ProtocolAlert::attach(channel);
        }
    }
    if negotiated >= level::REJECT && settings.enable_reject {
        reject::ProtocolReject::attach(channel);
    }
}
