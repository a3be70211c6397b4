//! Log-only reject handler (70002+).

use crate::messages::{Identifier, Message};
use crate::net::Channel;
use std::sync::Arc;
use tracing::debug;

pub(crate) struct ProtocolReject;

impl ProtocolReject {
    pub(crate) fn attach(channel: &Arc<Channel>) {
        let id = channel.id();
        channel.subscribe_message(Identifier::Reject, move |event| {
            if let Ok(message) = event
                && let Message::Reject(reject) = message.as_ref()
            {
                debug!(
                    "channel {} peer rejected '{}' ({:?}): {}",
                    id, reject.message, reject.code, reject.reason
                );
            }
            true
        });
    }
}
