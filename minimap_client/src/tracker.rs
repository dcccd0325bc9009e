//! World object tracker.
//!
//! The authoritative set of entities shown on the minimap. It holds ids,
//! never the entities themselves: the simulation owns them, and an id whose
//! entity is gone simply stops resolving.
//!
//! Entities register on creation ([`WorldTracker::add`]) and deregister on
//! destruction ([`WorldTracker::remove`]). [`WorldTracker::rescan`] is the
//! bulk recovery path for structural changes such as level transitions.

use std::collections::BTreeSet;

use minimap_shared::{
    ecs::{EntityId, SceneView},
    wire::{encode, ServerMsg},
};
use tracing::{debug, warn};

use crate::connection::Outbound;

#[derive(Debug, Default)]
pub struct WorldTracker {
    ids: BTreeSet<EntityId>,
    /// A reset must precede the next position snapshot.
    reset_pending: bool,
}

impl WorldTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entity. Returns false if it was already tracked.
    pub fn add(&mut self, id: EntityId) -> bool {
        self.ids.insert(id)
    }

    /// Drops an entity. Returns false if it was not tracked.
    pub fn remove(&mut self, id: EntityId) -> bool {
        self.ids.remove(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Tracked ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.ids.iter().copied()
    }

    /// Clears the set, tells the remote side to forget everything, and
    /// repopulates from the scene's active containers.
    ///
    /// When the reset cannot be delivered right now it stays pending and is
    /// sent ahead of the next position snapshot instead.
    pub fn rescan(&mut self, scene: &impl SceneView, out: &mut dyn Outbound) {
        self.ids.clear();
        self.reset_pending = true;
        self.flush_reset(out);
        self.ids.extend(scene.active_trackables());
        debug!(tracked = self.ids.len(), "Tracker rescanned");
    }

    /// Marks that the remote view must be rebuilt from scratch.
    pub fn request_reset(&mut self) {
        self.reset_pending = true;
    }

    pub fn reset_pending(&self) -> bool {
        self.reset_pending
    }

    /// Sends the pending reset, if any. Returns false only when a reset is
    /// still owed afterwards.
    pub fn flush_reset(&mut self, out: &mut dyn Outbound) -> bool {
        if !self.reset_pending {
            return true;
        }
        match encode(&ServerMsg::reset()) {
            Ok(text) if out.send(&text) => {
                self.reset_pending = false;
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!(error = %e, "Failed to encode reset");
                false
            }
        }
    }
}
