//! The broadcaster: one owned service that ties the connection, tracker,
//! serializer and command decoder together and is driven once per
//! simulation tick.

use std::sync::Arc;
use std::time::Instant;

use minimap_shared::{
    config::BroadcastConfig,
    coords::CoordinateMapper,
    ecs::{EntityId, SceneView},
    style::StyleRegistry,
};
use tracing::{debug, error, info};

use crate::{
    command::{CommandDecoder, Spawner},
    connection::{ConnectionEvent, ConnectionManager, ConnectionSettings, ConnectionState, Outbound},
    session::{IdentityResolver, SessionAllocator},
    snapshot::{PublishReport, SnapshotSerializer},
    tracker::WorldTracker,
};

/// What happened during one tick.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickReport {
    pub events: Vec<ConnectionEvent>,
    pub published: PublishReport,
    pub spawned: Option<EntityId>,
}

/// Mirrors tracked entities to the lobby and applies viewer commands.
/// Call [`Broadcaster::tick`] once per simulation tick.
pub struct Broadcaster {
    connection: ConnectionManager,
    tracker: WorldTracker,
    /// `None` when the reference plane could not be found: publishing and
    /// command dispatch are off for the lifetime of this instance.
    serializer: Option<SnapshotSerializer>,
    decoder: CommandDecoder,
}

impl Broadcaster {
    pub fn new(
        cfg: &BroadcastConfig,
        scene: &impl SceneView,
        identity: Box<dyn IdentityResolver>,
        allocator: Arc<dyn SessionAllocator>,
    ) -> Self {
        let serializer =
            match CoordinateMapper::from_scene(scene, &cfg.reference_plane, cfg.plane_half_extent) {
                Ok(mapper) => {
                    debug!(min = ?mapper.min(), max = ?mapper.max(), "Minimap bounds");
                    let mut styles = StyleRegistry::with_overrides(cfg.styles.clone());
                    for (selector, body) in &cfg.global_css {
                        styles.set_global_rule(selector.clone(), body.clone());
                    }
                    Some(SnapshotSerializer::new(
                        mapper,
                        styles,
                        cfg.position_interval(),
                        cfg.style_interval(),
                    ))
                }
                Err(e) => {
                    error!(error = %e, "Minimap publishing disabled");
                    None
                }
            };

        let decoder = CommandDecoder::new(cfg.fallback_kinds.clone(), cfg.styles.keys().cloned());

        Self {
            connection: ConnectionManager::new(ConnectionSettings::from(cfg), identity, allocator),
            tracker: WorldTracker::new(),
            serializer,
            decoder,
        }
    }

    /// Replaces the command decoder, e.g. with a seeded one.
    pub fn with_decoder(mut self, decoder: CommandDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    /// One simulation tick: advance the connection, apply at most one viewer
    /// command, then publish whatever is due.
    pub fn tick<S>(&mut self, now: Instant, sim: &mut S) -> TickReport
    where
        S: SceneView + Spawner,
    {
        let mut report = TickReport {
            events: self.connection.update(now),
            ..TickReport::default()
        };

        for event in &report.events {
            match event {
                ConnectionEvent::Connected => {
                    // The remote view may hold stale entries from a previous
                    // session.
                    self.tracker.request_reset();
                    if let Some(serializer) = self.serializer.as_mut() {
                        serializer.start(now);
                    }
                    info!(channel = ?self.connection.channel(), tracked = self.tracker.len(), "Broadcasting");
                }
                ConnectionEvent::Disconnected { .. } => {
                    if let Some(serializer) = self.serializer.as_mut() {
                        serializer.stop();
                    }
                }
                ConnectionEvent::Exhausted => {
                    info!("Broadcasting stopped until restart");
                }
            }
        }

        if let Some(text) = self.connection.take_inbound() {
            match self.serializer.as_ref() {
                Some(serializer) => {
                    report.spawned =
                        self.decoder
                            .handle(&text, serializer.mapper(), &mut *sim, &mut self.tracker);
                }
                None => debug!("Inbound message dropped; no minimap bounds"),
            }
        }

        if let Some(serializer) = self.serializer.as_mut() {
            report.published =
                serializer.publish(now, &mut self.tracker, &*sim, &mut self.connection);
        }
        report
    }

    /// Registers a newly created entity.
    pub fn tracker_add(&mut self, id: EntityId) -> bool {
        self.tracker.add(id)
    }

    /// Deregisters a destroyed entity.
    pub fn tracker_remove(&mut self, id: EntityId) -> bool {
        self.tracker.remove(id)
    }

    /// Bulk recovery after a structural change such as a level switch.
    pub fn tracker_rescan(&mut self, scene: &impl SceneView) {
        if self.serializer.is_none() {
            debug!("Rescan skipped; publishing disabled");
            return;
        }
        self.tracker.rescan(scene, &mut self.connection);
    }

    /// Raw send through the live socket. A silent no-op while offline.
    pub fn connection_send(&mut self, payload: &str) -> bool {
        self.connection.send(payload)
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn tracker(&self) -> &WorldTracker {
        &self.tracker
    }

    /// False when the minimap bounds could not be established.
    pub fn is_publishing_enabled(&self) -> bool {
        self.serializer.is_some()
    }

    /// Stops all timers and closes the socket.
    pub async fn shutdown(&mut self) {
        if let Some(serializer) = self.serializer.as_mut() {
            serializer.stop();
        }
        self.connection.shutdown().await;
    }
}
