//! Network worker.
//!
//! One worker task per connection attempt: allocate a session key, open the
//! socket, then pump frames until the socket dies or the tick loop asks it
//! to close. The worker never touches tracker or scene state. It reports
//! through exactly two handoffs:
//! - `LinkEvent`s on an unbounded channel (state transitions), and
//! - the single-slot inbound buffer (latest viewer message).

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use minimap_shared::error::MinimapError;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::{
    session::{ChannelId, Session, SessionAllocator},
    slot::PendingSlot,
};

/// What happened on the worker, tagged with the attempt that produced it.
#[derive(Debug)]
pub struct LinkEvent {
    pub attempt: u64,
    pub kind: LinkEventKind,
}

#[derive(Debug)]
pub enum LinkEventKind {
    /// Session key issued; socket open in progress.
    Allocated(Session),
    /// The lobby did not issue a key. Always `MinimapError::Allocation`.
    AllocationFailed(MinimapError),
    /// Socket open and upgraded.
    Opened,
    /// Closed by the remote side; carries the close reason, if any.
    Closed(String),
    /// The socket open failed or timed out, or a send or receive failed.
    /// Always `MinimapError::Transport`.
    Errored(MinimapError),
}

/// Requests from the tick loop to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    Send(String),
    Ping,
    Close,
}

/// Tick-side handle on a running worker.
#[derive(Debug)]
pub struct LinkHandle {
    commands: mpsc::UnboundedSender<LinkCommand>,
    task: JoinHandle<()>,
}

impl LinkHandle {
    /// Queues a command. False when the worker has gone away.
    pub fn command(&self, cmd: LinkCommand) -> bool {
        self.commands.send(cmd).is_ok()
    }

    pub fn is_alive(&self) -> bool {
        !self.commands.is_closed() && !self.task.is_finished()
    }

    pub fn abort(&self) {
        self.task.abort();
    }

    /// Asks the worker to send a close frame and waits briefly for it.
    pub async fn close(self, grace: std::time::Duration) {
        let _ = self.commands.send(LinkCommand::Close);
        let mut task = self.task;
        if tokio::time::timeout(grace, &mut task).await.is_err() {
            task.abort();
        }
    }
}

/// Spawns a worker for one connection attempt. The socket open (TCP
/// connect plus upgrade) is bounded by `connect_timeout`.
pub fn spawn_link(
    attempt: u64,
    channel: ChannelId,
    allocator: Arc<dyn SessionAllocator>,
    connect_timeout: Duration,
    events: mpsc::UnboundedSender<LinkEvent>,
    inbound: PendingSlot<String>,
) -> LinkHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_link(
        attempt,
        channel,
        allocator,
        connect_timeout,
        events,
        rx,
        inbound,
    ));
    LinkHandle { commands: tx, task }
}

fn transport(what: &str, e: impl std::fmt::Display) -> LinkEventKind {
    LinkEventKind::Errored(MinimapError::Transport(format!("{what}: {e}")))
}

async fn run_link(
    attempt: u64,
    channel: ChannelId,
    allocator: Arc<dyn SessionAllocator>,
    connect_timeout: Duration,
    events: mpsc::UnboundedSender<LinkEvent>,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
    inbound: PendingSlot<String>,
) {
    let report = |kind: LinkEventKind| {
        // The receiver only goes away with the connection manager.
        let _ = events.send(LinkEvent { attempt, kind });
    };

    let key = match allocator.allocate(channel).await {
        Ok(key) => key,
        Err(e) => {
            report(LinkEventKind::AllocationFailed(MinimapError::Allocation(format!("{e:#}"))));
            return;
        }
    };
    let session = Session { channel, key };
    let url = allocator.socket_url(&session);
    report(LinkEventKind::Allocated(session));

    let ws = match tokio::time::timeout(connect_timeout, connect_async(url.as_str())).await {
        Ok(Ok((ws, _response))) => ws,
        Ok(Err(e)) => {
            report(transport("socket open", e));
            return;
        }
        Err(_) => {
            warn!(
                attempt,
                timeout_ms = connect_timeout.as_millis() as u64,
                "Socket open timed out"
            );
            report(transport("socket open", "timed out"));
            return;
        }
    };
    report(LinkEventKind::Opened);

    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(LinkCommand::Send(text)) => {
                    if let Err(e) = sink.send(Message::text(text)).await {
                        report(transport("send", e));
                        break;
                    }
                }
                Some(LinkCommand::Ping) => {
                    if let Err(e) = sink.send(Message::Ping(Bytes::new())).await {
                        report(transport("ping", e));
                        break;
                    }
                }
                Some(LinkCommand::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    debug!(attempt, "Link closed locally");
                    break;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if inbound.put(text.as_str().to_owned()).is_some() {
                        debug!(attempt, "Unconsumed inbound message overwritten");
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_owned())
                        .unwrap_or_default();
                    report(LinkEventKind::Closed(reason));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(attempt, error = %e, "Socket error");
                    report(transport("receive", e));
                    break;
                }
                None => {
                    report(LinkEventKind::Closed("stream ended".into()));
                    break;
                }
            },
        }
    }
}
