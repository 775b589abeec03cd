use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use shared::{
    domain::{DeviceId, DeviceKind},
    error::ChannelError,
    protocol::{DeviceCommand, DeviceFrame},
};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::events::ConsoleEvent;
use crate::router::{DeviceReadout, MessageRouter};

/// Reserved frame key carrying the device's self-reported type.
const DEV_KEY: &str = "dev";

const EVENT_CAPACITY: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
    Errored,
}

impl ChannelState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ChannelState::Closed | ChannelState::Errored)
    }
}

/// Seam through which the upgrade orchestrator drives the device, so it
/// can be exercised against a recording stub.
#[async_trait]
pub trait CommandLink: Send + Sync {
    async fn send_command(&self, command: DeviceCommand) -> Result<(), ChannelError>;
}

struct SessionState {
    channel: ChannelState,
    queue: VecDeque<DeviceCommand>,
    kind: Option<DeviceKind>,
    readout: DeviceReadout,
}

/// One duplex channel to one device, exclusively owned by the console
/// session. Commands sent before the channel opens are queued and flushed
/// in order on the single transition into `Connected`. A dropped channel
/// is terminal; there is no automatic reconnect.
pub struct DeviceSession {
    device_id: DeviceId,
    ws_url: String,
    router: MessageRouter,
    state: Mutex<SessionState>,
    writer: Mutex<Option<WsSink>>,
    events: broadcast::Sender<ConsoleEvent>,
}

impl DeviceSession {
    /// `server_url` is the http(s) console base; the channel endpoint is
    /// derived by scheme substitution plus the device id path segment.
    pub fn new(server_url: &str, device_id: DeviceId) -> anyhow::Result<Arc<Self>> {
        let ws_url = channel_url(server_url, &device_id)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Arc::new(Self {
            device_id,
            ws_url,
            router: MessageRouter::new(),
            state: Mutex::new(SessionState {
                channel: ChannelState::Disconnected,
                queue: VecDeque::new(),
                kind: None,
                readout: DeviceReadout::default(),
            }),
            writer: Mutex::new(None),
            events,
        }))
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConsoleEvent> {
        self.events.subscribe()
    }

    pub fn event_sender(&self) -> broadcast::Sender<ConsoleEvent> {
        self.events.clone()
    }

    pub async fn channel_state(&self) -> ChannelState {
        self.state.lock().await.channel
    }

    pub async fn device_kind(&self) -> Option<DeviceKind> {
        self.state.lock().await.kind
    }

    pub async fn readout(&self) -> DeviceReadout {
        self.state.lock().await.readout.clone()
    }

    pub async fn queued_commands(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Open the channel. On success the queue is flushed in enqueue order
    /// before this call returns; inbound frames are pumped from a spawned
    /// reader until the channel dies.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ChannelError> {
        {
            let mut state = self.state.lock().await;
            if state.channel != ChannelState::Disconnected {
                warn!(state = ?state.channel, "connect called on a non-fresh channel");
                return Ok(());
            }
            state.channel = ChannelState::Connecting;
        }
        let _ = self
            .events
            .send(ConsoleEvent::ChannelStateChanged(ChannelState::Connecting));

        let stream = match connect_async(self.ws_url.as_str()).await {
            Ok((stream, _)) => stream,
            Err(err) => {
                let notice = ChannelError::Setup(err.to_string());
                self.transition(ChannelState::Errored).await;
                let _ = self.events.send(ConsoleEvent::error(notice.to_string()));
                return Err(notice);
            }
        };
        let (sink, source) = stream.split();

        // Install the writer and flush under the writer lock, so any
        // send() racing this call serializes after the queued backlog.
        {
            let mut writer = self.writer.lock().await;
            *writer = Some(sink);
            let backlog: Vec<DeviceCommand> = {
                let mut state = self.state.lock().await;
                state.channel = ChannelState::Connected;
                state.queue.drain(..).collect()
            };
            let _ = self
                .events
                .send(ConsoleEvent::ChannelStateChanged(ChannelState::Connected));
            for (sent, command) in backlog.iter().enumerate() {
                let outcome = match writer.as_mut() {
                    Some(sink) => transmit(sink, command).await,
                    None => Err("writer torn down during flush".to_string()),
                };
                if let Err(reason) = outcome {
                    writer.take();
                    let mut state = self.state.lock().await;
                    for command in backlog[sent..].iter().rev() {
                        state.queue.push_front(command.clone());
                    }
                    drop(state);
                    let notice = ChannelError::Lost(reason);
                    self.transition(ChannelState::Errored).await;
                    let _ = self.events.send(ConsoleEvent::error(notice.to_string()));
                    return Err(notice);
                }
            }
        }

        let session = Arc::clone(self);
        tokio::spawn(async move {
            session.read_loop(source).await;
        });
        Ok(())
    }

    /// Transmit now if connected, otherwise queue. Never drops: a failed
    /// transmit returns the command to the front of the queue.
    pub async fn send(&self, command: DeviceCommand) -> Result<(), ChannelError> {
        // Queue-or-transmit is decided under the state lock, so a send
        // racing connect() either lands in the backlog before the flush
        // drains it or serializes behind the flush on the writer lock.
        {
            let mut state = self.state.lock().await;
            if state.channel != ChannelState::Connected {
                state.queue.push_back(command);
                return Ok(());
            }
        }

        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(sink) => match transmit(sink, &command).await {
                Ok(()) => Ok(()),
                Err(reason) => {
                    writer.take();
                    drop(writer);
                    self.state.lock().await.queue.push_front(command);
                    let notice = ChannelError::Lost(reason);
                    self.transition(ChannelState::Errored).await;
                    let _ = self.events.send(ConsoleEvent::error(notice.to_string()));
                    Err(notice)
                }
            },
            None => {
                self.state.lock().await.queue.push_back(command);
                Ok(())
            }
        }
    }

    pub async fn request(&self, item: impl Into<String>) -> Result<(), ChannelError> {
        self.send(DeviceCommand::get(item)).await
    }

    pub async fn command(
        &self,
        item: impl Into<String>,
        params: Vec<Value>,
    ) -> Result<(), ChannelError> {
        self.send(DeviceCommand::cmd(item, params)).await
    }

    async fn read_loop(self: Arc<Self>, mut source: WsSource) {
        while let Some(message) = source.next().await {
            match message {
                Ok(Message::Text(text)) => match serde_json::from_str::<DeviceFrame>(&text) {
                    Ok(frame) => self.handle_frame(frame).await,
                    Err(err) => {
                        let _ = self
                            .events
                            .send(ConsoleEvent::error(format!("unreadable device frame: {err}")));
                    }
                },
                Ok(Message::Close(frame)) => {
                    let reason = frame
                        .map(|f| format!("code={:?} reason={}", f.code, f.reason))
                        .unwrap_or_else(|| "no close frame details".into());
                    self.transition(ChannelState::Closed).await;
                    let _ = self
                        .events
                        .send(ConsoleEvent::info(format!("connection closed: {reason}")));
                    return;
                }
                Ok(_) => {}
                Err(err) => {
                    self.lost(err.to_string()).await;
                    return;
                }
            }
        }
        self.lost("channel ended without a close frame".into()).await;
    }

    async fn handle_frame(&self, frame: DeviceFrame) {
        let mut state = self.state.lock().await;
        for (key, value) in &frame {
            self.router
                .dispatch(key, value, &mut state.readout, &self.events);
            if key == DEV_KEY {
                self.record_device_kind(&mut state, value);
            }
        }
    }

    fn record_device_kind(&self, state: &mut SessionState, value: &Value) {
        let Some(reported) = value.as_str().and_then(DeviceKind::parse) else {
            warn!(?value, "device reported an unrecognized type");
            return;
        };
        // Idempotent on repeats; a changed value overwrites.
        if state.kind != Some(reported) {
            state.kind = Some(reported);
            let _ = self.events.send(ConsoleEvent::DeviceKindChanged(reported));
        }
    }

    async fn transition(&self, next: ChannelState) {
        let mut state = self.state.lock().await;
        if state.channel.is_terminal() {
            return;
        }
        state.channel = next;
        drop(state);
        debug!(?next, "channel state changed");
        let _ = self.events.send(ConsoleEvent::ChannelStateChanged(next));
    }

    async fn lost(&self, reason: String) {
        let notice = ChannelError::Lost(reason);
        self.transition(ChannelState::Errored).await;
        let _ = self.events.send(ConsoleEvent::error(notice.to_string()));
    }
}

#[async_trait]
impl CommandLink for DeviceSession {
    async fn send_command(&self, command: DeviceCommand) -> Result<(), ChannelError> {
        self.send(command).await
    }
}

async fn transmit(sink: &mut WsSink, command: &DeviceCommand) -> Result<(), String> {
    let json = serde_json::to_string(command).map_err(|err| err.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|err| err.to_string())
}

fn channel_url(server_url: &str, device_id: &DeviceId) -> anyhow::Result<String> {
    let ws_base = if server_url.starts_with("https://") {
        server_url.replacen("https://", "wss://", 1)
    } else if server_url.starts_with("http://") {
        server_url.replacen("http://", "ws://", 1)
    } else {
        bail!("server url must start with http:// or https://");
    };
    Ok(format!("{}/{}", ws_base.trim_end_matches('/'), device_id))
}
