//! Relay connection management: one bidirectional socket per mounted inbox.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::protocol::{RelayCommand, RelayEvent};
use tokio::{
    net::TcpStream,
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::InboxError;

const NOTICE_CHANNEL_CAPACITY: usize = 256;
const CLOSE_GRACE: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What a relay subscriber observes.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayNotice {
    Event(RelayEvent),
    Disconnected { reason: String },
    Reconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconnectPolicy {
    /// Zero disables reconnecting.
    pub max_attempts: u32,
    pub delay: Duration,
}

#[async_trait]
pub trait RelayLink: Send + Sync {
    async fn emit(&self, command: RelayCommand) -> Result<(), InboxError>;
    fn subscribe(&self) -> broadcast::Receiver<RelayNotice>;
    /// Idempotent. Nothing new is published once this returns; notices a
    /// subscriber had already queued can still be read.
    async fn close(&self);
    fn is_closed(&self) -> bool;
}

#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn open(&self, address: &str) -> Result<Arc<dyn RelayLink>, InboxError>;
}

pub fn relay_ws_url(address: &str) -> Result<Url, InboxError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(InboxError::InvalidAddress(address.to_string()));
    }
    let rewritten = if let Some(rest) = address.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = address.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if address.starts_with("ws://") || address.starts_with("wss://") {
        address.to_string()
    } else {
        return Err(InboxError::InvalidAddress(address.to_string()));
    };
    Url::parse(&rewritten).map_err(|_| InboxError::InvalidAddress(address.to_string()))
}

#[derive(Debug, Clone, Default)]
pub struct WsRelayConnector {
    policy: ReconnectPolicy,
}

impl WsRelayConnector {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl RelayConnector for WsRelayConnector {
    async fn open(&self, address: &str) -> Result<Arc<dyn RelayLink>, InboxError> {
        let url = relay_ws_url(address)?;
        let stream = dial(&url).await?;
        info!(%url, "relay: connected");
        Ok(Arc::new(WsRelayLink::start(url, stream, self.policy)))
    }
}

async fn dial(url: &Url) -> Result<WsStream, InboxError> {
    let (stream, _) = connect_async(url.as_str())
        .await
        .map_err(|err| InboxError::Relay(format!("failed to connect {url}: {err}")))?;
    Ok(stream)
}

enum Outbound {
    Command(RelayCommand),
    Shutdown,
}

pub struct WsRelayLink {
    outbound: mpsc::UnboundedSender<Outbound>,
    notices: broadcast::Sender<RelayNotice>,
    closed: Arc<AtomicBool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl WsRelayLink {
    fn start(url: Url, stream: WsStream, policy: ReconnectPolicy) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);
        let closed = Arc::new(AtomicBool::new(false));
        let supervisor = Supervisor {
            url,
            policy,
            notices: notices.clone(),
            closed: Arc::clone(&closed),
            registration: None,
        };
        let handle = tokio::spawn(supervisor.run(stream, outbound_rx));
        Self {
            outbound,
            notices,
            closed,
            supervisor: Mutex::new(Some(handle)),
        }
    }
}

#[async_trait]
impl RelayLink for WsRelayLink {
    async fn emit(&self, command: RelayCommand) -> Result<(), InboxError> {
        if self.is_closed() {
            return Err(InboxError::Closed);
        }
        debug!(event = command.name(), "relay: emit");
        self.outbound
            .send(Outbound::Command(command))
            .map_err(|_| InboxError::Closed)
    }

    fn subscribe(&self) -> broadcast::Receiver<RelayNotice> {
        self.notices.subscribe()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let Some(mut handle) = self.supervisor.lock().await.take() else {
            return;
        };
        let _ = self.outbound.send(Outbound::Shutdown);
        if tokio::time::timeout(CLOSE_GRACE, &mut handle).await.is_err() {
            warn!("relay: close handshake timed out; aborting connection task");
            handle.abort();
            let _ = handle.await;
        }
        info!("relay: closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

enum Exit {
    Shutdown,
    Dropped(String),
}

struct Supervisor {
    url: Url,
    policy: ReconnectPolicy,
    notices: broadcast::Sender<RelayNotice>,
    closed: Arc<AtomicBool>,
    /// Replayed after a reconnect so the relay can still address this user.
    registration: Option<RelayCommand>,
}

impl Supervisor {
    async fn run(
        mut self,
        mut stream: WsStream,
        mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    ) {
        loop {
            let reason = match self.pump(stream, &mut outbound_rx).await {
                Exit::Shutdown => return,
                Exit::Dropped(reason) => reason,
            };
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            warn!(url = %self.url, %reason, "relay: connection dropped");

            match self.reconnect().await {
                Some(next) => {
                    stream = next;
                    self.publish(RelayNotice::Reconnected);
                }
                None => {
                    self.publish(RelayNotice::Disconnected { reason });
                    return;
                }
            }
        }
    }

    async fn pump(
        &mut self,
        stream: WsStream,
        outbound_rx: &mut mpsc::UnboundedReceiver<Outbound>,
    ) -> Exit {
        let (mut sink, mut reader) = stream.split();

        if let Some(registration) = &self.registration {
            if let Err(err) = send_command(&mut sink, registration).await {
                return Exit::Dropped(err.to_string());
            }
        }

        loop {
            tokio::select! {
                outbound = outbound_rx.recv() => match outbound {
                    Some(Outbound::Command(command)) => {
                        if matches!(command, RelayCommand::RegisterUser(_)) {
                            self.registration = Some(command.clone());
                        }
                        if let Err(err) = send_command(&mut sink, &command).await {
                            return Exit::Dropped(err.to_string());
                        }
                    }
                    Some(Outbound::Shutdown) | None => {
                        let _ = sink.send(Message::Close(None)).await;
                        let _ = sink.close().await;
                        return Exit::Shutdown;
                    }
                },
                frame = reader.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.dispatch(&text),
                    Some(Ok(Message::Close(_))) | None => {
                        return Exit::Dropped("closed by relay".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Exit::Dropped(err.to_string()),
                },
            }
        }
    }

    fn dispatch(&self, text: &str) {
        match serde_json::from_str::<RelayEvent>(text) {
            Ok(event) => self.publish(RelayNotice::Event(event)),
            Err(err) => debug!(%err, "relay: ignoring undecodable frame"),
        }
    }

    fn publish(&self, notice: RelayNotice) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.notices.send(notice);
    }

    async fn reconnect(&self) -> Option<WsStream> {
        for attempt in 1..=self.policy.max_attempts {
            tokio::time::sleep(self.policy.delay).await;
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            match dial(&self.url).await {
                Ok(stream) => {
                    info!(url = %self.url, attempt, "relay: reconnected");
                    return Some(stream);
                }
                Err(err) => warn!(url = %self.url, attempt, %err, "relay: reconnect failed"),
            }
        }
        None
    }
}

async fn send_command<S>(sink: &mut S, command: &RelayCommand) -> Result<(), tungstenite::Error>
where
    S: futures::Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(command)
        .map_err(|err| tungstenite::Error::Io(std::io::Error::other(err)))?;
    sink.send(Message::Text(text)).await
}

#[cfg(test)]
#[path = "tests/relay_tests.rs"]
mod tests;
