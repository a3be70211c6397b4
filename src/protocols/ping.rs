//! Heartbeat protocol (31402+).

use crate::error::Error;
use crate::messages::{Identifier, Message, Ping, Pong};
use crate::net::Channel;
use crate::runtime::Deadline;
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;
use tracing::{debug, warn};

struct PingState {
    /// Outstanding nonce and when it was sent.
    pending: Option<(u64, Instant)>,
    /// Last measured round trip.
    latency: Option<std::time::Duration>,
}

pub(crate) struct ProtocolPing {
    channel: Weak<Channel>,
    timer: Deadline,
    state: Mutex<PingState>,
}

impl ProtocolPing {
    pub(crate) fn attach(channel: &Arc<Channel>) {
        let settings = channel.settings();
        let timer = Deadline::new(
            channel.strand().clone(),
            settings.channel_heartbeat_randomized(),
        );
        let protocol = Arc::new(Self {
            channel: Arc::downgrade(channel),
            timer,
            state: Mutex::new(PingState { pending: None, latency: None }),
        });

        let stopping = protocol.clone();
        channel.subscribe_stop(move |event| {
            if event.is_err() {
                stopping.timer.stop();
            }
        });

        let on_ping = protocol.clone();
        channel.subscribe_message(Identifier::Ping, move |event| {
            if let Ok(message) = event
                && let Message::Ping(ping) = message.as_ref()
            {
                on_ping.handle_ping(ping);
            }
            true
        });

        let on_pong = protocol.clone();
        channel.subscribe_message(Identifier::Pong, move |event| {
            if let Ok(message) = event
                && let Message::Pong(pong) = message.as_ref()
            {
                on_pong.handle_pong(pong);
            }
            true
        });

        protocol.send_ping();
    }

    /// Echo immediately.
    fn handle_ping(self: &Arc<Self>, ping: &Ping) {
        let Some(channel) = self.channel.upgrade() else {
            return;
        };
        channel.send(&Message::Pong(Pong { nonce: ping.nonce }), |_| {});
    }

    /// A pong must answer the outstanding nonce; anything else is a
    /// protocol violation.
    fn handle_pong(self: &Arc<Self>, pong: &Pong) {
        let Some(channel) = self.channel.upgrade() else {
            return;
        };
        let mut state = self.state.lock().unwrap();
        match state.pending {
            Some((nonce, sent)) if nonce == pong.nonce => {
                let latency = sent.elapsed();
                state.pending = None;
                state.latency = Some(latency);
                debug!("channel {} latency {:?}", channel.id(), latency);
            }
            _ => {
                drop(state);
                warn!("channel {} unsolicited or mismatched pong", channel.id());
                channel.stop(Error::ProtocolViolation);
            }
        }
    }

    fn send_ping(self: &Arc<Self>) {
        let Some(channel) = self.channel.upgrade() else {
            return;
        };
        let nonce: u64 = rand::random();
        self.state.lock().unwrap().pending = Some((nonce, Instant::now()));

        let protocol = self.clone();
        channel.send(&Message::Ping(Ping { nonce }), move |code| {
            if code.is_ok() {
                protocol.arm_timer();
            }
        });
    }

    fn arm_timer(self: &Arc<Self>) {
        let Some(channel) = self.channel.upgrade() else {
            return;
        };
        let period = channel.settings().channel_heartbeat_randomized();
        let protocol = self.clone();
        self.timer.start_after(period, move |code| {
            if code.is_err() {
                return;
            }
            // An unanswered ping is left to the inactivity timer; only a
            // settled heartbeat sends the next one.
            if protocol.state.lock().unwrap().pending.is_some() {
                protocol.arm_timer();
            } else {
                protocol.send_ping();
            }
        });
    }
}
