//! Test fixtures: a local lobby socket endpoint, fake session allocators and
//! a driver that ticks a [`Broadcaster`] in real time.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use minimap_client::{
    broadcaster::Broadcaster,
    session::{ChannelId, Session, SessionAllocator, SessionKey},
};
use minimap_shared::{
    config::BroadcastConfig,
    ecs::{ChildOf, Container, EntityId, MapMarker, Name, Transform, World},
    math::Vec3,
    wire::{decode_server, ServerMsg},
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{
    handshake::server::{ErrorResponse, Request, Response},
    Message,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Config pointed at `host` over plain `ws`, with test-friendly cadences.
pub fn test_config(host: &str) -> BroadcastConfig {
    BroadcastConfig {
        host: host.to_string(),
        secure: false,
        keepalive_interval_ms: 1_000,
        reconnect_delay_ms: 50,
        max_reconnect_attempts: 3,
        position_interval_ms: 20,
        style_interval_ms: 100,
        ..BroadcastConfig::default()
    }
}

/// Issues `key-1`, `key-2`, ... without any HTTP round-trip.
pub struct CountingAllocator {
    cfg: BroadcastConfig,
    calls: AtomicU32,
}

impl CountingAllocator {
    pub fn new(cfg: &BroadcastConfig) -> Self {
        Self {
            cfg: cfg.clone(),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionAllocator for CountingAllocator {
    async fn allocate(&self, _channel: ChannelId) -> anyhow::Result<SessionKey> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SessionKey(format!("key-{n}")))
    }

    fn socket_url(&self, session: &Session) -> String {
        self.cfg.socket_url(session.channel, &session.key.0)
    }
}

/// Lobby that never issues a key.
#[derive(Default)]
pub struct RefusingAllocator {
    calls: AtomicU32,
}

impl RefusingAllocator {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionAllocator for RefusingAllocator {
    async fn allocate(&self, channel: ChannelId) -> anyhow::Result<SessionKey> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("lobby refused channel {channel}")
    }

    fn socket_url(&self, _session: &Session) -> String {
        String::new()
    }
}

/// What the local lobby observed.
#[derive(Debug, Clone, PartialEq)]
pub enum LobbyEvent {
    /// A streamer connected; carries the request path and query.
    Connected(String),
    Frame(String),
    Closed,
}

enum Control {
    Text(String),
    Close,
}

/// Local websocket endpoint standing in for the lobby's streamer socket.
pub struct LobbyServer {
    pub host: String,
    events: mpsc::UnboundedReceiver<LobbyEvent>,
    current: Arc<Mutex<Option<mpsc::UnboundedSender<Control>>>>,
}

impl LobbyServer {
    /// Binds an ephemeral localhost port and starts accepting.
    pub async fn bind() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let host = listener.local_addr()?.to_string();
        let (events_tx, events) = mpsc::unbounded_channel();
        let current = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&current);
        tokio::spawn(async move {
            while let Ok((stream, _peer)) = listener.accept().await {
                let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();
                if let Ok(mut guard) = slot.lock() {
                    *guard = Some(ctl_tx);
                }
                tokio::spawn(serve(stream, events_tx.clone(), ctl_rx));
            }
        });

        Ok(Self {
            host,
            events,
            current,
        })
    }

    fn control(&self, ctl: Control) -> bool {
        let guard = match self.current.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.as_ref().is_some_and(|tx| tx.send(ctl).is_ok())
    }

    /// Sends a text frame to the most recent streamer connection.
    pub fn send_text(&self, text: &str) -> bool {
        self.control(Control::Text(text.to_string()))
    }

    /// Closes the most recent streamer connection from the lobby side.
    pub fn close_current(&self) -> bool {
        self.control(Control::Close)
    }

    /// Everything observed since the last call.
    pub fn drain(&mut self) -> Vec<LobbyEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = self.events.try_recv() {
            out.push(ev);
        }
        out
    }
}

/// Accepts TCP connections and never answers the websocket upgrade.
pub struct SilentLobby {
    pub host: String,
    accepted: Arc<AtomicU32>,
}

impl SilentLobby {
    pub async fn bind() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let host = listener.local_addr()?.to_string();
        let accepted = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _peer)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(stream);
            }
        });

        Ok(Self { host, accepted })
    }

    /// TCP connections accepted so far.
    pub fn accepted(&self) -> u32 {
        self.accepted.load(Ordering::SeqCst)
    }
}

async fn serve(
    stream: tokio::net::TcpStream,
    events: mpsc::UnboundedSender<LobbyEvent>,
    mut control: mpsc::UnboundedReceiver<Control>,
) {
    let mut path = String::new();
    let capture = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        path = req.uri().to_string();
        Ok(resp)
    };
    let ws = match tokio_tungstenite::accept_hdr_async(stream, capture).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!(error = %e, "Lobby handshake failed");
            return;
        }
    };
    let _ = events.send(LobbyEvent::Connected(path));

    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            ctl = control.recv() => match ctl {
                Some(Control::Text(text)) => {
                    if sink.send(Message::text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Control::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = events.send(LobbyEvent::Closed);
                    break;
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(LobbyEvent::Frame(text.as_str().to_owned()));
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => {
                    let _ = events.send(LobbyEvent::Closed);
                    break;
                }
            },
        }
    }
}

/// Text frames out of a batch of lobby events, decoded.
pub fn decoded_frames(events: &[LobbyEvent]) -> Vec<ServerMsg> {
    events
        .iter()
        .filter_map(|ev| match ev {
            LobbyEvent::Frame(text) => decode_server(text).ok(),
            _ => None,
        })
        .collect()
}

/// Ticks the broadcaster in real time until `done` holds or `timeout`
/// passes. Returns whether `done` was reached.
pub async fn drive_until<F>(
    broadcaster: &mut Broadcaster,
    world: &mut World,
    timeout: Duration,
    mut done: F,
) -> bool
where
    F: FnMut(&Broadcaster, &World) -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        broadcaster.tick(Instant::now(), world);
        if done(broadcaster, world) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

/// A ground plane named `Ground` (bounds `[-5, 5]²`) and one active level
/// holding `count` markers along the x axis.
pub fn demo_world(count: usize) -> (World, Vec<EntityId>) {
    let mut world = World::default();
    let ground = world.spawn();
    world.insert(ground, Name("Ground".into()));
    world.insert(ground, Transform::at(Vec3::ZERO));

    let level = world.spawn();
    world.insert(level, Container);
    let ids = (0..count)
        .map(|i| {
            let e = world.spawn();
            world.insert(e, Name(format!("Cube {i}")));
            world.insert(e, ChildOf(level));
            world.insert(e, Transform::at(Vec3::new(i as f32, 0.0, 0.0)));
            world.insert(e, MapMarker::default());
            e
        })
        .collect();
    (world, ids)
}
