//! Snapshot serializer.
//!
//! Turns the tracked set into the two outbound payloads on fixed cadences:
//! positions (fast) and styles (slow). A cycle either produces a complete
//! payload and hands it over, or is skipped outright; there is no backlog
//! and no partial payload.

use std::time::{Duration, Instant};

use minimap_shared::{
    coords::CoordinateMapper,
    ecs::{SceneView, TrackedEntity},
    style::StyleRegistry,
    wire::{encode, round_coord, ServerMsg, Unit},
};
use tracing::{debug, warn};

use crate::{connection::Outbound, timer::Timer, tracker::WorldTracker};

/// Kind shown for an entity: its explicit category, else the first word of
/// its name without any `(Clone)` suffix.
pub fn kind_of(entity: &TrackedEntity) -> String {
    if let Some(kind) = entity.kind.as_deref().filter(|k| !k.trim().is_empty()) {
        return kind.trim().to_string();
    }
    let word = entity.name.split_whitespace().next().unwrap_or_default();
    let kind = word.replace("(Clone)", "");
    if kind.is_empty() {
        "Unknown".to_string()
    } else {
        kind
    }
}

/// What one publish call sent.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub reset: bool,
    pub positions: bool,
    pub styles: bool,
}

pub struct SnapshotSerializer {
    mapper: CoordinateMapper,
    styles: StyleRegistry,
    position_timer: Timer,
    style_timer: Timer,
}

impl SnapshotSerializer {
    pub fn new(
        mapper: CoordinateMapper,
        styles: StyleRegistry,
        position_interval: Duration,
        style_interval: Duration,
    ) -> Self {
        Self {
            mapper,
            styles,
            position_timer: Timer::repeating(position_interval),
            style_timer: Timer::repeating(style_interval),
        }
    }

    pub fn mapper(&self) -> &CoordinateMapper {
        &self.mapper
    }

    /// Starts both cadences; the first cycles fire on the next publish.
    pub fn start(&mut self, now: Instant) {
        self.position_timer.start_now(now);
        self.style_timer.start_now(now);
    }

    pub fn stop(&mut self) {
        self.position_timer.stop();
        self.style_timer.stop();
    }

    /// Resolves every tracked id, skipping ids that no longer resolve.
    fn resolve(tracker: &WorldTracker, scene: &impl SceneView) -> Vec<TrackedEntity> {
        tracker.iter().filter_map(|id| scene.tracked(id)).collect()
    }

    /// Position payload for the current tracked set.
    pub fn positions(&self, tracker: &WorldTracker, scene: &impl SceneView) -> ServerMsg {
        let units = Self::resolve(tracker, scene)
            .iter()
            .map(|e| {
                let n = self.mapper.project(e.position);
                Unit {
                    id: e.id.0,
                    x: round_coord(n.x),
                    y: round_coord(n.y),
                    kind: kind_of(e),
                }
            })
            .collect();
        ServerMsg::units(units)
    }

    /// Style payload: one rule per distinct kind plus the global rules.
    pub fn stylesheet(&self, tracker: &WorldTracker, scene: &impl SceneView) -> ServerMsg {
        let entities = Self::resolve(tracker, scene);
        let kinds: Vec<String> = entities.iter().map(kind_of).collect();
        let sheet = self.styles.stylesheet(
            entities
                .iter()
                .zip(&kinds)
                .map(|(e, kind)| (kind.as_str(), e.color, e.extra_css.as_deref())),
        );
        ServerMsg::css(sheet)
    }

    /// Runs whichever cycles are due. Skips (without queueing) while the
    /// outbound side is not connected.
    pub fn publish(
        &mut self,
        now: Instant,
        tracker: &mut WorldTracker,
        scene: &impl SceneView,
        out: &mut dyn Outbound,
    ) -> PublishReport {
        let mut report = PublishReport::default();
        let positions_due = self.position_timer.poll(now);
        let styles_due = self.style_timer.poll(now);
        if !out.is_connected() {
            return report;
        }

        if positions_due {
            let was_pending = tracker.reset_pending();
            if !tracker.flush_reset(out) {
                // A snapshot must never precede an owed reset.
                return report;
            }
            report.reset = was_pending;
            report.positions = Self::send(out, &self.positions(tracker, scene));
        }
        if styles_due {
            report.styles = Self::send(out, &self.stylesheet(tracker, scene));
        }
        report
    }

    fn send(out: &mut dyn Outbound, msg: &ServerMsg) -> bool {
        match encode(msg) {
            Ok(text) => {
                let sent = out.send(&text);
                if !sent {
                    debug!("Snapshot dropped; link not ready");
                }
                sent
            }
            Err(e) => {
                warn!(error = %e, "Snapshot encode failed; cycle skipped");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::tests::RecordingOutbound;
    use minimap_shared::{
        ecs::{ChildOf, Container, EntityId, MapMarker, Name, Transform, World},
        math::Vec3,
        style::Rgb,
        wire::{decode_server, ServerData},
    };

    fn serializer() -> SnapshotSerializer {
        SnapshotSerializer::new(
            CoordinateMapper::from_plane(Vec3::ZERO, Vec3::ONE, 5.0),
            StyleRegistry::new(),
            Duration::from_millis(100),
            Duration::from_secs(1),
        )
    }

    fn spawn(world: &mut World, parent: EntityId, name: &str, at: Vec3, marker: MapMarker) -> EntityId {
        let e = world.spawn();
        world.insert(e, Name(name.into()));
        world.insert(e, ChildOf(parent));
        world.insert(e, Transform::at(at));
        world.insert(e, marker);
        e
    }

    fn level(world: &mut World) -> EntityId {
        let l = world.spawn();
        world.insert(l, Container);
        l
    }

    #[test]
    fn kind_prefers_explicit_category() {
        let mut e = TrackedEntity {
            id: EntityId(1),
            name: "Sphere(Clone) 3".into(),
            position: Vec3::ZERO,
            kind: None,
            color: Rgb::WHITE,
            extra_css: None,
        };
        assert_eq!(kind_of(&e), "Sphere");
        e.kind = Some("Boss".into());
        assert_eq!(kind_of(&e), "Boss");
        e.kind = None;
        e.name = String::new();
        assert_eq!(kind_of(&e), "Unknown");
    }

    #[test]
    fn positions_are_projected_and_rounded() {
        let mut world = World::default();
        let l = level(&mut world);
        let a = spawn(&mut world, l, "Cube", Vec3::new(2.5, 1.0, 2.5), MapMarker::default());
        let b = spawn(&mut world, l, "Cube (Clone)", Vec3::new(10.0, 0.0, 0.0), MapMarker::default());
        let c = spawn(&mut world, l, "Tree", Vec3::new(1.0 / 3.0, 0.0, 0.0), MapMarker::default());
        let mut tracker = WorldTracker::new();
        for id in [a, b, c] {
            tracker.add(id);
        }

        let msg = serializer().positions(&tracker, &world);
        let ServerData::Units(units) = msg.data else {
            panic!("expected units");
        };
        assert_eq!(units.len(), 3);
        assert_eq!((units[0].id, units[0].x, units[0].y), (a.0, 0.75, 0.75));
        assert_eq!((units[1].x, units[1].y, units[1].kind.as_str()), (1.0, 0.5, "Cube"));
        assert_eq!(units[2].x, 0.533);
    }

    #[test]
    fn styles_dedup_per_kind() {
        let mut world = World::default();
        let l = level(&mut world);
        let red = MapMarker {
            kind: Some("Cube".into()),
            color: Rgb::from_u8(255, 0, 0),
            extra_css: None,
        };
        let mut tracker = WorldTracker::new();
        for i in 0..3 {
            tracker.add(spawn(&mut world, l, "Cube", Vec3::new(i as f32, 0.0, 0.0), red.clone()));
        }

        let msg = serializer().stylesheet(&tracker, &world);
        let ServerData::Css { css } = msg.data else {
            panic!("expected css");
        };
        let rules: Vec<_> = css.keys().filter(|k| k.starts_with('.')).collect();
        assert_eq!(rules, vec![".Cube"]);
        assert_eq!(css[".Cube"]["background-color"], "rgb(255,0,0)");
        assert!(css.contains_key("@keyframes shimmer"));
    }

    #[test]
    fn reset_precedes_first_snapshot_after_rescan() {
        let mut world = World::default();
        let l = level(&mut world);
        spawn(&mut world, l, "Cube", Vec3::ZERO, MapMarker::default());
        let mut tracker = WorldTracker::new();
        let mut out = RecordingOutbound::default();
        tracker.rescan(&world, &mut out);

        let mut ser = serializer();
        let t0 = Instant::now();
        ser.start(t0);
        out.connected = true;
        let report = ser.publish(t0, &mut tracker, &world, &mut out);
        assert!(report.reset && report.positions && report.styles);

        let decoded: Vec<ServerMsg> = out.frames.iter().map(|f| decode_server(f).unwrap()).collect();
        assert!(decoded[0].is_reset());
        assert!(matches!(&decoded[1].data, ServerData::Units(u) if u.len() == 1));
        assert!(matches!(decoded[2].data, ServerData::Css { .. }));

        // Next cycle: no second reset.
        ser.publish(t0 + Duration::from_millis(100), &mut tracker, &world, &mut out);
        assert_eq!(out.resets(), 1);
    }

    #[test]
    fn offline_cycles_are_skipped_not_queued() {
        let world = World::default();
        let mut tracker = WorldTracker::new();
        let mut out = RecordingOutbound::default();
        let mut ser = serializer();
        let t0 = Instant::now();
        ser.start(t0);

        for i in 0..50 {
            ser.publish(t0 + Duration::from_millis(100 * i), &mut tracker, &world, &mut out);
        }
        assert!(out.frames.is_empty());

        out.connected = true;
        ser.publish(t0 + Duration::from_secs(5), &mut tracker, &world, &mut out);
        // One position and one style frame, not fifty of each.
        assert_eq!(out.frames.len(), 2);
    }

    #[test]
    fn destroyed_entities_are_left_out() {
        let mut world = World::default();
        let l = level(&mut world);
        let a = spawn(&mut world, l, "Cube", Vec3::ZERO, MapMarker::default());
        let b = spawn(&mut world, l, "Sphere", Vec3::ZERO, MapMarker::default());
        let mut tracker = WorldTracker::new();
        tracker.add(a);
        tracker.add(b);
        world.despawn(a);

        let ServerData::Units(units) = serializer().positions(&tracker, &world).data else {
            panic!("expected units");
        };
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].id, b.0);
    }
}
