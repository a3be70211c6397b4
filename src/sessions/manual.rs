//! Manual session: persistent connections to user-configured endpoints,
//! reconnecting with exponential backoff until session stop or the
//! configured attempt limit.

use crate::config::Endpoint;
use crate::error::{Code, Error};
use crate::net::{Channel, Connector};
use crate::p2p::Context;
use crate::protocols;
use crate::runtime::Strand;
use crate::sessions::{SessionBase, launch_channel};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);
const RETRY_BACKOFF_FACTOR: u32 = 2;

/// Invoked for every connect attempt (with the attempt's channel on
/// success) and once more for the final stop, with no channel.
pub type ManualObserver = Box<dyn FnMut(Code, Option<&Arc<Channel>>) + Send + 'static>;

pub(crate) struct SessionManual {
    base: Arc<SessionBase>,
    connector: Arc<Connector>,
}

impl SessionManual {
    pub fn new(context: Arc<Context>, strand: Strand) -> Arc<Self> {
        let connector = Connector::new(
            context.settings.clone(),
            strand.clone(),
            context.suspended.clone(),
        );
        Arc::new(Self {
            base: Arc::new(SessionBase::new(context, strand)),
            connector,
        })
    }

    /// Maintain a connection to the endpoint until session stop.
    pub fn connect(self: &Arc<Self>, endpoint: &Endpoint, observer: Option<ManualObserver>) {
        let session = self.clone();
        let endpoint = endpoint.clone();
        tokio::spawn(async move { session.maintain(endpoint, observer).await });
    }

    async fn maintain(self: Arc<Self>, endpoint: Endpoint, observer: Option<ManualObserver>) {
        let observer = Arc::new(Mutex::new(observer));
        let limit = self.base.context.settings.manual_attempt_limit;
        let mut attempts: u32 = 0;
        let mut delay = INITIAL_RETRY_DELAY;

        let notify = |code: Code, channel: Option<&Arc<Channel>>| {
            if let Some(observer) = observer.lock().unwrap().as_mut() {
                observer(code, channel);
            }
        };

        loop {
            if self.base.stopped() {
                notify(Err(Error::ServiceStopped), None);
                return;
            }

            let (tx, rx) = oneshot::channel();
            self.connector.connect(&endpoint, move |result| {
                let _ = tx.send(result);
            });
            let connected = match rx.await {
                Ok(connected) => connected,
                Err(_) => return,
            };

            match connected {
                Ok(socket) => {
                    let channel = match self.base.context.create_channel(socket.clone(), false) {
                        Ok(channel) => channel,
                        Err(error) => {
                            socket.stop();
                            notify(Err(error), None);
                            return;
                        }
                    };
                    debug!("manual channel {} to {}", channel.id(), endpoint);

                    attempts = 0;
                    delay = INITIAL_RETRY_DELAY;
                    notify(Ok(()), Some(&channel));

                    let context = self.base.context.clone();
                    let settings = &self.base.context.settings;
                    let (stopped_tx, stopped_rx) = oneshot::channel();
                    launch_channel(
                        &self.base,
                        channel,
                        settings.services_minimum,
                        move |channel| protocols::attach_standard(&context, channel),
                        |_code| {},
                        move |code| {
                            let _ = stopped_tx.send(code);
                        },
                    );

                    if let Ok(code) = stopped_rx.await {
                        debug!("manual channel to {} stopped: {}", endpoint, code);
                        if self.base.stopped() {
                            notify(Err(code), None);
                            return;
                        }
                    }
                    tokio::time::sleep(INITIAL_RETRY_DELAY).await;
                }
                Err(error) => {
                    debug!("manual connect {} failed: {}", endpoint, error);
                    notify(Err(error), None);

                    attempts = attempts.saturating_add(1);
                    if limit != 0 && attempts >= limit {
                        debug!("manual connection to {} abandoned", endpoint);
                        notify(Err(Error::ChannelExhausted), None);
                        return;
                    }
                    tokio::time::sleep(delay).await;
                    delay = (delay * RETRY_BACKOFF_FACTOR).min(MAX_RETRY_DELAY);
                }
            }
        }
    }

    pub fn stop(&self) {
        if !self.base.set_stopped() {
            return;
        }
        self.connector.stop();
        self.base.stop_channels();
    }
}
