//! A channel: socket + identity nonce + timers + strand + stop subscriber
//! + distributor.
//!
//! The message pump reads framed messages off the socket and posts each
//! dispatch to the channel strand, one at a time, so protocol handlers see
//! wire order and never run concurrently. All mutable channel state lives
//! behind one lock that is never held across a handler invocation;
//! subscription and stop are strand-posted operations, which keeps handler
//! reentrancy (a handler subscribing or stopping its own channel) safe.

use crate::config::Authority;
use crate::error::{Code, Error};
use crate::messages::heading::{HEADING_SIZE, MAXIMUM_PAYLOAD};
use crate::messages::{Heading, Identifier, Message, Version};
use crate::net::distributor::Distributor;
use crate::net::socket::Socket;
use crate::runtime::{Deadline, Strand, Subscriber};
use crate::settings::Settings;
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, watch};
use tracing::debug;

struct State {
    started: bool,
    resumed: bool,
    stopped: Option<Error>,
    peer_version: Option<Arc<Version>>,
    negotiated_version: u32,
    addr_v2: bool,
    wtxid_relay: bool,
    distributor: Distributor,
    stop_subscriber: Subscriber<()>,
}

pub struct Channel {
    id: u64,
    nonce: u64,
    inbound: bool,
    settings: Arc<Settings>,
    socket: Arc<Socket>,
    strand: Strand,
    inactivity: Deadline,
    expiration: Deadline,
    paused: watch::Sender<bool>,
    state: Mutex<State>,
}

impl Channel {
    /// `id` is process-unique and monotonic; `nonce` is process-unique,
    /// random and non-zero (the loopback guard), both issued by the
    /// network controller.
    pub fn new(
        settings: Arc<Settings>,
        socket: Arc<Socket>,
        id: u64,
        nonce: u64,
        inbound: bool,
    ) -> Arc<Self> {
        debug_assert!(nonce != 0);
        let strand = Strand::new();
        let inactivity = Deadline::new(strand.clone(), settings.channel_inactivity());
        let expiration = Deadline::new(strand.clone(), settings.channel_expiration());
        let (paused, _) = watch::channel(false);
        let negotiated_version = settings.maximum_protocol;
        Arc::new(Self {
            id,
            nonce,
            inbound,
            settings,
            socket,
            strand,
            inactivity,
            expiration,
            paused,
            state: Mutex::new(State {
                started: false,
                resumed: false,
                stopped: None,
                peer_version: None,
                negotiated_version,
                addr_v2: false,
                wtxid_relay: false,
                distributor: Distributor::new(),
                stop_subscriber: Subscriber::new(),
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn inbound(&self) -> bool {
        self.inbound
    }

    pub fn authority(&self) -> Authority {
        self.socket.authority().clone()
    }

    pub fn strand(&self) -> &Strand {
        &self.strand
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn socket(&self) -> &Arc<Socket> {
        &self.socket
    }

    pub fn stopped(&self) -> bool {
        self.state.lock().unwrap().stopped.is_some()
    }

    pub fn stop_code(&self) -> Option<Error> {
        self.state.lock().unwrap().stopped
    }

    /// The peer's version message, set exactly once during handshake.
    pub fn peer_version(&self) -> Option<Arc<Version>> {
        self.state.lock().unwrap().peer_version.clone()
    }

    pub fn set_peer_version(&self, version: Version) {
        let mut state = self.state.lock().unwrap();
        debug_assert!(state.peer_version.is_none());
        state.peer_version = Some(Arc::new(version));
    }

    /// The negotiated protocol level; the configured maximum until the
    /// handshake lowers it.
    pub fn negotiated_version(&self) -> u32 {
        self.state.lock().unwrap().negotiated_version
    }

    pub fn set_negotiated_version(&self, version: u32) {
        self.state.lock().unwrap().negotiated_version = version;
    }

    pub fn addr_v2(&self) -> bool {
        self.state.lock().unwrap().addr_v2
    }

    pub fn set_addr_v2(&self) {
        self.state.lock().unwrap().addr_v2 = true;
    }

    pub fn wtxid_relay(&self) -> bool {
        self.state.lock().unwrap().wtxid_relay
    }

    pub fn set_wtxid_relay(&self) {
        self.state.lock().unwrap().wtxid_relay = true;
    }

    /// Begin the message pump for the handshake phase: only handshake
    /// protocols are subscribed, timers are not yet armed.
    pub fn start(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().unwrap();
            if state.started || state.stopped.is_some() {
                return;
            }
            state.started = true;
        }
        let channel = self.clone();
        tokio::spawn(async move { channel.pump().await });
    }

    /// Arm the inactivity and expiration timers and let general traffic
    /// flow. Called once the handshake completes, or after a pause.
    pub fn resume(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().unwrap();
            if state.stopped.is_some() {
                return;
            }
            state.resumed = true;
        }
        self.paused.send_replace(false);

        let weak = Arc::downgrade(self);
        self.expiration.start(move |code| {
            if code.is_ok()
                && let Some(channel) = weak.upgrade()
            {
                channel.stop(Error::ChannelExpired);
            }
        });
        self.arm_inactivity();
    }

    /// Suspend the pump between messages and disarm the timers.
    pub fn pause(&self) {
        self.state.lock().unwrap().resumed = false;
        self.paused.send_replace(true);
        self.inactivity.stop();
        self.expiration.stop();
    }

    /// Idempotent; the first stop code is preserved. Cancels timers, stops
    /// the socket, then notifies the distributor and the stop subscribers
    /// on the strand.
    pub fn stop(self: &Arc<Self>, error: Error) {
        {
            let mut state = self.state.lock().unwrap();
            if state.stopped.is_some() {
                return;
            }
            state.stopped = Some(error);
        }
        debug!("channel {} stopping: {}", self.id, error);

        self.inactivity.stop();
        self.expiration.stop();
        self.socket.stop();

        let channel = self.clone();
        self.strand.post_fn(move || {
            let (mut distributor, mut subscriber) = {
                let mut state = channel.state.lock().unwrap();
                (
                    std::mem::take(&mut state.distributor),
                    std::mem::take(&mut state.stop_subscriber),
                )
            };
            distributor.stop(error);
            subscriber.stop(error);
        });
    }

    /// Register for channel stop; a late subscriber is invoked with the
    /// recorded stop code. Registration is posted to the strand.
    pub fn subscribe_stop<F>(self: &Arc<Self>, handler: F)
    where
        F: FnMut(Result<&(), Error>) + Send + 'static,
    {
        let channel = self.clone();
        let mut handler = handler;
        self.strand.post_fn(move || {
            let stopped = channel.state.lock().unwrap().stopped;
            match stopped {
                Some(code) => handler(Err(code)),
                None => {
                    let _ = channel
                        .state
                        .lock()
                        .unwrap()
                        .stop_subscriber
                        .subscribe(handler);
                }
            }
        });
    }

    /// Register for messages of one type on this channel. Registration is
    /// posted to the strand, so a handler subscribing from inside another
    /// handler lands before the next message dispatch.
    pub fn subscribe_message<F>(self: &Arc<Self>, identifier: Identifier, handler: F)
    where
        F: FnMut(Result<&Arc<Message>, Error>) -> bool + Send + 'static,
    {
        let channel = self.clone();
        self.strand.post_fn(move || {
            let mut state = channel.state.lock().unwrap();
            if state.stopped.is_some() {
                drop(state);
                let mut handler = handler;
                let _ = handler(Err(Error::SubscriberStopped));
                return;
            }
            let _ = state.distributor.subscribe(identifier, handler);
        });
    }

    /// Serialize, frame and enqueue for write. The handler runs on the
    /// channel strand once the bytes are written (or the write fails).
    pub fn send<F>(self: &Arc<Self>, message: &Message, handler: F)
    where
        F: FnOnce(Code) + Send + 'static,
    {
        let version = {
            let state = self.state.lock().unwrap();
            if state.stopped.is_some() {
                drop(state);
                self.strand.post_fn(move || handler(Err(Error::ChannelStopped)));
                return;
            }
            state.negotiated_version
        };

        let payload = message.serialize(version);
        let heading = Heading::from_payload(self.settings.magic, message.command(), &payload);
        let mut data = Vec::with_capacity(HEADING_SIZE + payload.len());
        data.extend_from_slice(&heading.serialize());
        data.extend_from_slice(&payload);

        let strand = self.strand.clone();
        self.socket.write(data, move |code| {
            strand.post_fn(move || handler(code.map_err(Error::to_channel)));
        });
    }

    fn arm_inactivity(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.inactivity.start(move |code| {
            if code.is_ok()
                && let Some(channel) = weak.upgrade()
            {
                channel.stop(Error::ChannelInactive);
            }
        });
    }

    async fn pump(self: Arc<Self>) {
        let mut paused = self.paused.subscribe();
        let mut head = [0u8; HEADING_SIZE];
        loop {
            if paused.wait_for(|paused| !*paused).await.is_err() {
                break;
            }
            if self.stopped() {
                break;
            }

            if let Err(error) = self.socket.read_exact(&mut head).await {
                self.stop(error.to_channel());
                break;
            }
            let heading = match Heading::deserialize(&head) {
                Ok(heading) => heading,
                Err(error) => {
                    self.stop(error);
                    break;
                }
            };
            if let Err(error) = heading.verify(self.settings.magic, MAXIMUM_PAYLOAD) {
                self.stop(error);
                break;
            }

            let mut payload = vec![0u8; heading.payload_size as usize];
            if let Err(error) = self.socket.read_exact(&mut payload).await {
                self.stop(error.to_channel());
                break;
            }
            if let Err(error) = heading.verify_checksum(&payload) {
                self.stop(error);
                break;
            }

            // Any complete read is activity.
            if self.state.lock().unwrap().resumed {
                self.arm_inactivity();
            }

            // Dispatch on the strand and wait for it before reading ahead,
            // so delivery matches wire order.
            let (ack, done) = oneshot::channel();
            let channel = self.clone();
            self.strand.post_fn(move || {
                let _ = ack.send(channel.dispatch(&heading.command, &payload));
            });
            match done.await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    self.stop(error);
                    break;
                }
                Err(_) => break,
            }
        }
    }

    /// Runs on the strand. The distributor is taken out of the state for
    /// the duration of the fan-out so handlers may reenter the channel;
    /// registrations made by handlers are strand-posted and so land after
    /// it is put back.
    fn dispatch(self: &Arc<Self>, command: &str, payload: &[u8]) -> Code {
        let (mut distributor, version) = {
            let mut state = self.state.lock().unwrap();
            if state.stopped.is_some() {
                return Ok(());
            }
            (std::mem::take(&mut state.distributor), state.negotiated_version)
        };

        let result = distributor.notify(command, payload, version);

        let mut state = self.state.lock().unwrap();
        match state.stopped {
            None => state.distributor = distributor,
            // A handler stopped the channel mid-fanout: its peers still
            // get the stop notification from the copy they subscribed on.
            Some(code) => {
                drop(state);
                distributor.stop(code);
            }
        }
        result
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.socket.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Ping;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    async fn pair(settings: Arc<Settings>) -> (Arc<Channel>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(address), listener.accept());
        let socket = Socket::new(client.unwrap());
        let channel = Channel::new(settings, socket, 1, 42, false);
        (channel, accepted.unwrap().0)
    }

    fn frame(magic: u32, command: &str, payload: &[u8]) -> Vec<u8> {
        let heading = Heading::from_payload(magic, command, payload);
        let mut data = heading.serialize().to_vec();
        data.extend_from_slice(payload);
        data
    }

    #[tokio::test]
    async fn test_delivers_typed_messages_in_order() {
        let settings = Arc::new(Settings::default());
        let (channel, mut remote) = pair(settings.clone()).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        channel.subscribe_message(Identifier::Ping, move |event| {
            if let Ok(message) = event
                && let Message::Ping(ping) = message.as_ref()
            {
                tx.send(ping.nonce).unwrap();
            }
            true
        });
        channel.start();

        for nonce in [1u64, 2, 3] {
            let mut payload = Vec::new();
            Ping { nonce }.serialize(&mut payload);
            remote
                .write_all(&frame(settings.magic, "ping", &payload))
                .await
                .unwrap();
        }

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, Some(3));
    }

    #[tokio::test]
    async fn test_bad_magic_stops_with_invalid_magic() {
        let settings = Arc::new(Settings::default());
        let (channel, mut remote) = pair(settings.clone()).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        channel.subscribe_stop(move |event| {
            tx.send(event.err()).unwrap();
        });
        channel.start();

        remote
            .write_all(&frame(settings.magic ^ 1, "ping", &[0u8; 8]))
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), Some(Error::InvalidMagic));
    }

    #[tokio::test]
    async fn test_bad_checksum_stops_without_delivery() {
        let settings = Arc::new(Settings::default());
        let (channel, mut remote) = pair(settings.clone()).await;
        let (stop_tx, mut stop_rx) = mpsc::unbounded_channel();
        let (ping_tx, mut ping_rx) = mpsc::unbounded_channel();

        channel.subscribe_message(Identifier::Ping, move |event| {
            if event.is_ok() {
                ping_tx.send(()).unwrap();
            }
            true
        });
        channel.subscribe_stop(move |event| {
            stop_tx.send(event.err()).unwrap();
        });
        channel.start();

        let mut data = frame(settings.magic, "ping", &[0u8; 8]);
        let last = data.len() - 1;
        data[last] ^= 0xff; // corrupt the payload after the checksum was built
        remote.write_all(&data).await.unwrap();

        assert_eq!(stop_rx.recv().await.unwrap(), Some(Error::InvalidChecksum));
        assert!(ping_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_oversized_payload_stops_before_reading_body() {
        let settings = Arc::new(Settings::default());
        let (channel, mut remote) = pair(settings.clone()).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        channel.subscribe_stop(move |event| {
            tx.send(event.err()).unwrap();
        });
        channel.start();

        let heading = Heading {
            magic: settings.magic,
            command: "block".into(),
            payload_size: u32::MAX,
            checksum: 0,
        };
        remote.write_all(&heading.serialize()).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), Some(Error::OversizedPayload));
    }

    #[tokio::test]
    async fn test_stop_preserves_first_code() {
        let settings = Arc::new(Settings::default());
        let (channel, _remote) = pair(settings).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        channel.subscribe_stop(move |event| {
            tx.send(event.err()).unwrap();
        });
        channel.stop(Error::ChannelExpired);
        channel.stop(Error::ChannelInactive);

        assert_eq!(rx.recv().await.unwrap(), Some(Error::ChannelExpired));
        assert_eq!(channel.stop_code(), Some(Error::ChannelExpired));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_late_stop_subscriber_sees_recorded_code() {
        let settings = Arc::new(Settings::default());
        let (channel, _remote) = pair(settings).await;
        channel.stop(Error::PeerLoopback);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        channel.subscribe_stop(move |event| {
            tx.send(event.err()).unwrap();
        });
        assert_eq!(rx.recv().await.unwrap(), Some(Error::PeerLoopback));
    }

    #[tokio::test]
    async fn test_send_frames_message() {
        let settings = Arc::new(Settings::default());
        let (channel, mut remote) = pair(settings.clone()).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        channel.send(&Message::Ping(Ping { nonce: 7 }), move |code| {
            tx.send(code).unwrap();
        });
        assert_eq!(rx.recv().await.unwrap(), Ok(()));

        use tokio::io::AsyncReadExt;
        let mut head = [0u8; HEADING_SIZE];
        remote.read_exact(&mut head).await.unwrap();
        let heading = Heading::deserialize(&head).unwrap();
        assert_eq!(heading.command, "ping");
        assert_eq!(heading.payload_size, 8);

        let mut payload = vec![0u8; 8];
        remote.read_exact(&mut payload).await.unwrap();
        heading.verify_checksum(&payload).unwrap();
    }
}
