//! Session allocation and identity resolution.
//!
//! A session key is single-use: one is requested from the lobby's
//! allocation endpoint before every socket open, including reconnects.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use minimap_shared::config::BroadcastConfig;
use reqwest::Client;
use tokio::sync::oneshot;
use tracing::debug;

/// Channel (room) the broadcast belongs to.
pub type ChannelId = u64;

/// Opaque key issued by the allocation endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKey(pub String);

/// A live session: key plus the channel it was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub channel: ChannelId,
    pub key: SessionKey,
}

/// Issues session keys. Implemented over HTTP in production and faked in
/// tests.
#[async_trait]
pub trait SessionAllocator: Send + Sync {
    async fn allocate(&self, channel: ChannelId) -> anyhow::Result<SessionKey>;

    /// Socket URI for a freshly allocated session.
    fn socket_url(&self, session: &Session) -> String;
}

/// Allocates sessions with `POST <base>/lobby/new?user=<channel>`.
#[derive(Clone)]
pub struct HttpAllocator {
    client: Client,
    cfg: BroadcastConfig,
}

impl HttpAllocator {
    pub fn new(cfg: &BroadcastConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(cfg.allocation_timeout())
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            cfg: cfg.clone(),
        })
    }
}

#[async_trait]
impl SessionAllocator for HttpAllocator {
    async fn allocate(&self, channel: ChannelId) -> anyhow::Result<SessionKey> {
        let url = self.cfg.allocation_url(channel);
        debug!(%url, "Requesting session key");
        let key = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .body("{}")
            .send()
            .await
            .context("allocation request")?
            .error_for_status()
            .context("allocation status")?
            .text()
            .await
            .context("allocation body")?;

        let key = key.trim();
        anyhow::ensure!(!key.is_empty(), "allocation returned an empty key");
        Ok(SessionKey(key.to_string()))
    }

    fn socket_url(&self, session: &Session) -> String {
        self.cfg.socket_url(session.channel, &session.key.0)
    }
}

/// Answers "is my channel id known yet?" without blocking.
pub trait IdentityResolver: Send {
    fn poll_channel(&mut self) -> Option<ChannelId>;
}

/// Identity known (or permanently unknown) up front.
#[derive(Debug, Clone, Copy)]
pub struct FixedIdentity(pub Option<ChannelId>);

impl IdentityResolver for FixedIdentity {
    fn poll_channel(&mut self) -> Option<ChannelId> {
        self.0
    }
}

/// Identity delivered later by the host's account layer.
#[derive(Debug)]
pub struct PendingIdentity {
    rx: Option<oneshot::Receiver<ChannelId>>,
    resolved: Option<ChannelId>,
}

impl PendingIdentity {
    pub fn channel() -> (oneshot::Sender<ChannelId>, Self) {
        let (tx, rx) = oneshot::channel();
        (
            tx,
            Self {
                rx: Some(rx),
                resolved: None,
            },
        )
    }

    /// Resolves the identity after `delay`, as an account lookup would.
    pub fn resolve_after(channel: ChannelId, delay: Duration) -> Self {
        let (tx, pending) = Self::channel();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(channel);
        });
        pending
    }
}

impl IdentityResolver for PendingIdentity {
    fn poll_channel(&mut self) -> Option<ChannelId> {
        if self.resolved.is_none() {
            if let Some(rx) = self.rx.as_mut() {
                match rx.try_recv() {
                    Ok(channel) => {
                        self.resolved = Some(channel);
                        self.rx = None;
                    }
                    Err(oneshot::error::TryRecvError::Empty) => {}
                    Err(oneshot::error::TryRecvError::Closed) => self.rx = None,
                }
            }
        }
        self.resolved
    }
}
