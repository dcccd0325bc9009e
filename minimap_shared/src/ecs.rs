//! Scene store (minimal ECS).
//!
//! Typed component storages keyed by entity id, plus the little bit of
//! hierarchy the broadcaster needs: top-level containers, `ChildOf` links
//! and activation flags. The simulation owns the `World`; everything else
//! refers to entities by `EntityId` only and must tolerate ids that no
//! longer resolve.

use std::{
    any::{Any, TypeId},
    collections::{HashMap, HashSet},
};

use serde::{Deserialize, Serialize};

use crate::{math::Vec3, style::Rgb};

/// Opaque entity id. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

trait Storage: Send + Sync {
    fn remove(&mut self, entity: EntityId);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: 'static + Send + Sync> Storage for HashMap<EntityId, T> {
    fn remove(&mut self, entity: EntityId) {
        HashMap::remove(self, &entity);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Simple world that can store typed components.
#[derive(Default)]
pub struct World {
    next_id: u64,
    alive: HashSet<EntityId>,
    storages: HashMap<TypeId, Box<dyn Storage>>,
}

impl World {
    /// Creates a new entity.
    pub fn spawn(&mut self) -> EntityId {
        self.next_id += 1;
        let id = EntityId(self.next_id);
        self.alive.insert(id);
        id
    }

    /// Removes an entity and all of its components.
    ///
    /// Children are not despawned; they become orphans and drop out of
    /// [`World::is_active_in_hierarchy`].
    pub fn despawn(&mut self, entity: EntityId) -> bool {
        if !self.alive.remove(&entity) {
            return false;
        }
        for storage in self.storages.values_mut() {
            storage.remove(entity);
        }
        true
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.alive.contains(&entity)
    }

    /// Inserts/replaces a component for an entity.
    pub fn insert<T: 'static + Send + Sync>(&mut self, entity: EntityId, component: T) {
        if !self.contains(entity) {
            return;
        }
        if let Some(storage) = self.storage_mut::<T>() {
            storage.insert(entity, component);
        }
    }

    fn storage_mut<T: 'static + Send + Sync>(&mut self) -> Option<&mut HashMap<EntityId, T>> {
        self.storages
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(HashMap::<EntityId, T>::new()))
            .as_any_mut()
            .downcast_mut::<HashMap<EntityId, T>>()
    }

    /// Removes a single component from an entity.
    pub fn remove<T: 'static + Send + Sync>(&mut self, entity: EntityId) -> Option<T> {
        self.storages
            .get_mut(&TypeId::of::<T>())
            .and_then(|boxed| boxed.as_any_mut().downcast_mut::<HashMap<EntityId, T>>())
            .and_then(|storage| storage.remove(&entity))
    }

    /// Gets a component reference.
    pub fn get<T: 'static + Send + Sync>(&self, entity: EntityId) -> Option<&T> {
        self.storages
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.as_any().downcast_ref::<HashMap<EntityId, T>>())
            .and_then(|storage| storage.get(&entity))
    }

    /// Gets a mutable component reference.
    pub fn get_mut<T: 'static + Send + Sync>(&mut self, entity: EntityId) -> Option<&mut T> {
        self.storages
            .get_mut(&TypeId::of::<T>())
            .and_then(|boxed| boxed.as_any_mut().downcast_mut::<HashMap<EntityId, T>>())
            .and_then(|storage| storage.get_mut(&entity))
    }

    /// Iterates entities with a given component.
    pub fn iter<T: 'static + Send + Sync>(&self) -> impl Iterator<Item = (EntityId, &T)> {
        self.storages
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.as_any().downcast_ref::<HashMap<EntityId, T>>())
            .into_iter()
            .flat_map(|storage| storage.iter().map(|(k, v)| (*k, v)))
    }

    /// Finds the first entity carrying the given [`Name`].
    pub fn find_by_name(&self, name: &str) -> Option<EntityId> {
        let mut hits: Vec<EntityId> = self
            .iter::<Name>()
            .filter(|(_, n)| n.0 == name)
            .map(|(id, _)| id)
            .collect();
        hits.sort();
        hits.first().copied()
    }

    /// True when the entity and every ancestor up to its container are active.
    pub fn is_active_in_hierarchy(&self, entity: EntityId) -> bool {
        let mut current = entity;
        // Bounded by the entity count so a malformed cycle cannot spin.
        for _ in 0..=self.alive.len() {
            if !self.contains(current) || self.get::<Inactive>(current).is_some() {
                return false;
            }
            match self.get::<ChildOf>(current) {
                Some(ChildOf(parent)) => current = *parent,
                None => return true,
            }
        }
        false
    }

    /// Returns the top-level container an entity hangs under, if any.
    pub fn root_of(&self, entity: EntityId) -> Option<EntityId> {
        let mut current = entity;
        for _ in 0..=self.alive.len() {
            if self.get::<Container>(current).is_some() {
                return Some(current);
            }
            current = self.get::<ChildOf>(current)?.0;
        }
        None
    }
}

/// World-space placement of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub scale: Vec3,
}

impl Transform {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            scale: Vec3::ONE,
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::at(Vec3::ZERO)
    }
}

/// Display name, e.g. `Cube (Clone)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Name(pub String);

/// Hierarchy link to a parent entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildOf(pub EntityId);

/// Marks a top-level container (a level or room).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Container;

/// Deactivates an entity and, transitively, its descendants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Inactive;

/// Marks an entity as shown on the minimap.
#[derive(Debug, Clone, PartialEq)]
pub struct MapMarker {
    /// Explicit category; when `None` the kind is derived from the name.
    pub kind: Option<String>,
    pub color: Rgb,
    /// Free-form style text, e.g. `animation: shimmer 2s infinite`.
    pub extra_css: Option<String>,
}

impl Default for MapMarker {
    fn default() -> Self {
        Self {
            kind: None,
            color: Rgb::WHITE,
            extra_css: None,
        }
    }
}

/// Read-only view of one trackable entity, assembled from its components.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedEntity {
    pub id: EntityId,
    pub name: String,
    pub position: Vec3,
    pub kind: Option<String>,
    pub color: Rgb,
    pub extra_css: Option<String>,
}

/// Scene queries the broadcaster depends on.
pub trait SceneView {
    /// Resolves a live, trackable entity. `None` for destroyed or unmarked ids.
    fn tracked(&self, id: EntityId) -> Option<TrackedEntity>;

    /// Every active trackable entity under an active top-level container.
    fn active_trackables(&self) -> Vec<EntityId>;

    /// Transform of a named scene object.
    fn named_transform(&self, name: &str) -> Option<Transform>;
}

impl SceneView for World {
    fn tracked(&self, id: EntityId) -> Option<TrackedEntity> {
        let marker = self.get::<MapMarker>(id)?;
        let transform = self.get::<Transform>(id).copied().unwrap_or_default();
        let name = self.get::<Name>(id).map(|n| n.0.clone()).unwrap_or_default();
        Some(TrackedEntity {
            id,
            name,
            position: transform.position,
            kind: marker.kind.clone(),
            color: marker.color,
            extra_css: marker.extra_css.clone(),
        })
    }

    fn active_trackables(&self) -> Vec<EntityId> {
        let mut out: Vec<EntityId> = self
            .iter::<MapMarker>()
            .map(|(id, _)| id)
            .filter(|id| self.root_of(*id).is_some() && self.is_active_in_hierarchy(*id))
            .collect();
        out.sort();
        out
    }

    fn named_transform(&self, name: &str) -> Option<Transform> {
        let id = self.find_by_name(name)?;
        Some(self.get::<Transform>(id).copied().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(world: &mut World) -> EntityId {
        let root = world.spawn();
        world.insert(root, Container);
        root
    }

    fn marked_child(world: &mut World, parent: EntityId, name: &str) -> EntityId {
        let e = world.spawn();
        world.insert(e, Name(name.to_string()));
        world.insert(e, ChildOf(parent));
        world.insert(e, Transform::at(Vec3::new(1.0, 0.0, 2.0)));
        world.insert(e, MapMarker::default());
        e
    }

    #[test]
    fn ecs_insert_and_get() {
        let mut world = World::default();
        let e = world.spawn();
        world.insert(e, Transform::at(Vec3::new(1.0, 2.0, 3.0)));
        assert_eq!(world.get::<Transform>(e).unwrap().position.x, 1.0);
    }

    #[test]
    fn despawn_drops_every_component() {
        let mut world = World::default();
        let root = level(&mut world);
        let e = marked_child(&mut world, root, "Cube");

        assert!(world.despawn(e));
        assert!(!world.contains(e));
        assert!(world.get::<MapMarker>(e).is_none());
        assert!(world.tracked(e).is_none());
        assert!(!world.despawn(e));
    }

    #[test]
    fn large_scene_membership_stays_consistent() {
        let mut world = World::default();
        let root = level(&mut world);
        let ids: Vec<EntityId> = (0..5_000)
            .map(|i| marked_child(&mut world, root, &format!("Cube {i}")))
            .collect();
        for id in ids.iter().step_by(2) {
            assert!(world.despawn(*id));
        }
        assert!(ids.iter().step_by(2).all(|id| !world.contains(*id)));
        assert!(ids.iter().skip(1).step_by(2).all(|id| world.contains(*id)));
        assert_eq!(world.active_trackables().len(), 2_500);
    }

    #[test]
    fn ids_are_not_reused() {
        let mut world = World::default();
        let a = world.spawn();
        world.despawn(a);
        let b = world.spawn();
        assert_ne!(a, b);
    }

    #[test]
    fn inactive_container_hides_descendants() {
        let mut world = World::default();
        let lobby = level(&mut world);
        let arena = level(&mut world);
        let a = marked_child(&mut world, lobby, "Cube");
        let group = world.spawn();
        world.insert(group, ChildOf(arena));
        let b = marked_child(&mut world, group, "Sphere");

        assert_eq!(world.active_trackables(), vec![a, b]);

        world.insert(arena, Inactive);
        assert_eq!(world.active_trackables(), vec![a]);
    }

    #[test]
    fn orphans_are_not_trackable() {
        let mut world = World::default();
        let e = world.spawn();
        world.insert(e, MapMarker::default());
        assert!(world.active_trackables().is_empty());
        assert!(world.tracked(e).is_some());
    }

    #[test]
    fn named_transform_finds_reference() {
        let mut world = World::default();
        let ground = world.spawn();
        world.insert(ground, Name("Ground".into()));
        world.insert(
            ground,
            Transform {
                position: Vec3::new(3.0, 0.0, 4.0),
                scale: Vec3::new(2.0, 1.0, 2.0),
            },
        );
        let t = world.named_transform("Ground").unwrap();
        assert_eq!(t.position, Vec3::new(3.0, 0.0, 4.0));
        assert!(world.named_transform("Sky").is_none());
    }
}
