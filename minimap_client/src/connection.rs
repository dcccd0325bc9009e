//! Connection manager.
//!
//! Owns the (at most one) live session and the reconnect state machine.
//! Everything runs on the tick loop: [`ConnectionManager::update`] drains the
//! worker's events, advances the state machine against the caller's clock
//! and fires the keepalive. Network I/O happens on the worker spawned per
//! attempt (see [`crate::link`]).
//!
//! ```text
//! Unresolved ──identity──▶ AllocatingSession ──opened──▶ Connected
//!                             ▲      │ alloc failed          │ close/error
//!                             │      ▼ (retry after delay)   ▼
//!                             └──── delay ◀────────── Disconnected
//!                                                        │ retries spent
//!                                                        ▼
//!                                                  ExhaustedRetries
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use minimap_shared::config::BroadcastConfig;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{
    link::{spawn_link, LinkCommand, LinkEvent, LinkEventKind, LinkHandle},
    session::{ChannelId, IdentityResolver, Session, SessionAllocator},
    slot::PendingSlot,
    timer::Timer,
};

/// How long a closing link gets to flush its close frame.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Channel id not known yet.
    Unresolved,
    /// Requesting a session key and opening the socket.
    AllocatingSession,
    /// Socket open; sends go through.
    Connected,
    /// Socket lost; waiting to retry.
    Disconnected,
    /// Retry budget spent. Terminal for the automatic path.
    ExhaustedRetries,
}

/// Transitions callers may react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected { reason: String },
    Exhausted,
}

/// Outbound side as seen by publishers.
pub trait Outbound {
    fn is_connected(&self) -> bool;

    /// Best-effort send. Returns whether the payload was handed to the
    /// socket; never fails loudly.
    fn send(&mut self, payload: &str) -> bool;
}

/// Retry and keepalive knobs.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub keepalive_interval: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    /// Bound on the socket open of each attempt.
    pub connect_timeout: Duration,
}

impl From<&BroadcastConfig> for ConnectionSettings {
    fn from(cfg: &BroadcastConfig) -> Self {
        Self {
            keepalive_interval: cfg.keepalive_interval(),
            reconnect_delay: cfg.reconnect_delay(),
            max_reconnect_attempts: cfg.max_reconnect_attempts,
            connect_timeout: cfg.connect_timeout(),
        }
    }
}

/// Owns the live session (at most one) and drives reconnection. Not
/// thread-safe; it lives on the tick loop and only its worker runs elsewhere.
pub struct ConnectionManager {
    settings: ConnectionSettings,
    identity: Box<dyn IdentityResolver>,
    allocator: Arc<dyn SessionAllocator>,

    state: ConnectionState,
    channel: Option<ChannelId>,
    session: Option<Session>,
    /// Consecutive failed attempts since the last successful open.
    retries: u32,
    /// Monotonic attempt counter; events from older attempts are ignored.
    attempt: u64,
    allocations_started: u64,
    retry_timer: Timer,
    keepalive: Timer,

    link: Option<LinkHandle>,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    events_rx: mpsc::UnboundedReceiver<LinkEvent>,
    inbound: PendingSlot<String>,
    live: bool,
}

impl ConnectionManager {
    pub fn new(
        settings: ConnectionSettings,
        identity: Box<dyn IdentityResolver>,
        allocator: Arc<dyn SessionAllocator>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            settings,
            identity,
            allocator,
            state: ConnectionState::Unresolved,
            channel: None,
            session: None,
            retries: 0,
            attempt: 0,
            allocations_started: 0,
            retry_timer: Timer::once(settings.reconnect_delay),
            keepalive: Timer::repeating(settings.keepalive_interval),
            link: None,
            events_tx,
            events_rx,
            inbound: PendingSlot::new(),
            live: true,
        }
    }

    /// Where the state machine stands after the last [`Self::update`].
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The resolved channel id. `None` until identity resolves, then fixed
    /// for the life of the manager.
    pub fn channel(&self) -> Option<ChannelId> {
        self.channel
    }

    /// The session of the current attempt. Set once the key is issued,
    /// cleared on every loss.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Consecutive failures counted toward the retry budget.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Total allocation attempts started since creation.
    pub fn allocations_started(&self) -> u64 {
        self.allocations_started
    }

    /// Takes the latest unconsumed inbound message, if any.
    pub fn take_inbound(&self) -> Option<String> {
        self.inbound.take()
    }

    /// Advances the state machine. Call once per tick.
    pub fn update(&mut self, now: Instant) -> Vec<ConnectionEvent> {
        let mut out = Vec::new();
        if !self.live {
            return out;
        }

        self.drain_link_events(now, &mut out);

        match self.state {
            ConnectionState::Unresolved => {
                if let Some(channel) = self.identity.poll_channel() {
                    info!(channel, "Channel identity resolved");
                    self.channel = Some(channel);
                    self.transition(ConnectionState::AllocatingSession);
                    self.start_attempt();
                }
            }
            ConnectionState::AllocatingSession => {
                if self.link.is_some() {
                    self.reap_dead_link(now, &mut out);
                } else if self.retry_timer.poll(now) {
                    self.start_attempt();
                }
            }
            ConnectionState::Connected => {
                self.reap_dead_link(now, &mut out);
                if self.state == ConnectionState::Connected && self.keepalive.poll(now) {
                    if let Some(link) = &self.link {
                        debug!(channel = ?self.channel, "Sending keepalive");
                        link.command(LinkCommand::Ping);
                    }
                }
            }
            ConnectionState::Disconnected => {
                if self.retry_timer.poll(now) {
                    self.transition(ConnectionState::AllocatingSession);
                    self.start_attempt();
                }
            }
            ConnectionState::ExhaustedRetries => {}
        }

        out
    }

    fn drain_link_events(&mut self, now: Instant, out: &mut Vec<ConnectionEvent>) {
        while let Ok(event) = self.events_rx.try_recv() {
            if event.attempt != self.attempt {
                debug!(attempt = event.attempt, current = self.attempt, "Stale link event ignored");
                continue;
            }
            self.on_link_event(now, event.kind, out);
        }
    }

    /// Treats a worker that stopped without reporting (panicked or
    /// cancelled) as a lost connection. The worker reports before it exits,
    /// so whatever it sent is drained first.
    fn reap_dead_link(&mut self, now: Instant, out: &mut Vec<ConnectionEvent>) {
        let dead = self.link.as_ref().is_some_and(|link| !link.is_alive());
        if !dead {
            return;
        }
        self.drain_link_events(now, out);
        if self.link.is_some() {
            self.on_lost(now, "worker stopped".into(), out);
        }
    }

    fn on_link_event(&mut self, now: Instant, kind: LinkEventKind, out: &mut Vec<ConnectionEvent>) {
        match kind {
            LinkEventKind::Allocated(session) => {
                debug!(channel = session.channel, "Session key issued");
                self.session = Some(session);
            }
            LinkEventKind::AllocationFailed(err) => {
                warn!(error = %err, channel = ?self.channel, "Session allocation failed");
                self.link = None;
                self.session = None;
                if self.spend_retry(now) {
                    // Stay put; the retry timer re-enters the attempt.
                    self.transition(ConnectionState::AllocatingSession);
                } else {
                    self.exhaust(out);
                }
            }
            LinkEventKind::Opened => {
                if self.state == ConnectionState::AllocatingSession {
                    self.retries = 0;
                    self.keepalive.start(now);
                    self.transition(ConnectionState::Connected);
                    out.push(ConnectionEvent::Connected);
                }
            }
            LinkEventKind::Closed(reason) => self.on_lost(now, format!("closed: {reason}"), out),
            LinkEventKind::Errored(err) => self.on_lost(now, format!("error: {err}"), out),
        }
    }

    /// Any close or error: drop the session and schedule (or give up) a retry.
    fn on_lost(&mut self, now: Instant, reason: String, out: &mut Vec<ConnectionEvent>) {
        if matches!(
            self.state,
            ConnectionState::Disconnected | ConnectionState::ExhaustedRetries
        ) {
            return;
        }
        if let Some(link) = self.link.take() {
            link.abort();
        }
        self.session = None;
        self.keepalive.stop();
        warn!(reason = %reason, retries = self.retries, "Connection lost");
        self.transition(ConnectionState::Disconnected);
        out.push(ConnectionEvent::Disconnected { reason });

        if !self.spend_retry(now) {
            self.exhaust(out);
        }
    }

    /// Counts one failure. Arms the retry timer and returns true while the
    /// budget allows another attempt.
    fn spend_retry(&mut self, now: Instant) -> bool {
        if self.retries >= self.settings.max_reconnect_attempts {
            return false;
        }
        self.retries += 1;
        self.retry_timer.start(now);
        info!(
            retry = self.retries,
            max = self.settings.max_reconnect_attempts,
            delay_ms = self.settings.reconnect_delay.as_millis() as u64,
            "Retry scheduled"
        );
        true
    }

    fn exhaust(&mut self, out: &mut Vec<ConnectionEvent>) {
        self.retry_timer.stop();
        self.transition(ConnectionState::ExhaustedRetries);
        error!(
            max = self.settings.max_reconnect_attempts,
            "Max reconnection attempts reached; giving up"
        );
        out.push(ConnectionEvent::Exhausted);
    }

    fn start_attempt(&mut self) {
        let Some(channel) = self.channel else {
            return;
        };
        if let Some(old) = self.link.take() {
            old.abort();
        }
        self.attempt += 1;
        self.allocations_started += 1;
        self.session = None;
        debug!(channel, attempt = self.attempt, "Starting connection attempt");
        self.link = Some(spawn_link(
            self.attempt,
            channel,
            Arc::clone(&self.allocator),
            self.settings.connect_timeout,
            self.events_tx.clone(),
            self.inbound.clone(),
        ));
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            info!(from = ?self.state, to = ?next, "Connection state");
            self.state = next;
        }
    }

    /// Closes the socket and stops every timer. No further events are
    /// processed afterwards.
    pub async fn shutdown(&mut self) {
        self.live = false;
        self.retry_timer.stop();
        self.keepalive.stop();
        self.session = None;
        if let Some(link) = self.link.take() {
            link.close(CLOSE_GRACE).await;
        }
        info!("Connection manager shut down");
    }

    pub fn is_live(&self) -> bool {
        self.live
    }
}

impl Outbound for ConnectionManager {
    fn is_connected(&self) -> bool {
        self.live && self.state == ConnectionState::Connected
    }

    fn send(&mut self, payload: &str) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.link
            .as_ref()
            .is_some_and(|link| link.command(LinkCommand::Send(payload.to_owned())))
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            link.abort();
        }
    }
}
