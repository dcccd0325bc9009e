//! Command decoder.
//!
//! Turns an inbound viewer frame into a typed command and executes it
//! against the simulation. Decoding is best-effort: anything malformed is
//! logged and dropped, and never reaches the connection.

use std::collections::BTreeSet;

use minimap_shared::{
    coords::CoordinateMapper,
    ecs::{ChildOf, Container, EntityId, MapMarker, Name, Transform, World},
    error::{MinimapError, MinimapResult},
    math::{Vec2, Vec3},
    style::Rgb,
    wire::decode_click,
};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use tracing::{debug, info, warn};

use crate::tracker::WorldTracker;

/// `itemType` that requests a chat line instead of a spawn.
pub const CHAT_ITEM_TYPE: &str = "Chat";
/// Color used when a message omits `bubbleColor`.
pub const DEFAULT_BUBBLE_COLOR: &str = "#00FF00";
pub const DEFAULT_BUBBLE_SIZE: f32 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Spawn a marker of a category at the clicked point.
    SpawnAt,
    /// Relay a chat line; no entity is created.
    Chat,
    /// Well-formed but not actionable (e.g. chat without text). Dropped.
    Unknown,
}

/// A decoded viewer action. Consumed once, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundCommand {
    pub kind: CommandKind,
    pub user_id: String,
    pub category: String,
    /// Click position in normalized minimap space.
    pub source: Vec2,
    pub color: Rgb,
    pub size: f32,
    pub text: Option<String>,
}

/// Spawn request handed to the simulation, already in world space.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnRequest {
    pub user_id: String,
    pub category: String,
    pub position: Vec3,
    pub color: Rgb,
    pub size: f32,
}

/// The simulation's side of viewer commands.
pub trait Spawner {
    /// Creates the entity. Returns its id when it should be tracked.
    fn spawn(&mut self, request: &SpawnRequest) -> Option<EntityId>;

    fn chat(&mut self, user_id: &str, text: &str) {
        info!(user = %user_id, text = %text, "Viewer chat");
    }
}

/// Spawns a marked entity under the first active top-level container.
impl Spawner for World {
    fn spawn(&mut self, request: &SpawnRequest) -> Option<EntityId> {
        let parent = self
            .iter::<Container>()
            .map(|(id, _)| id)
            .filter(|id| self.is_active_in_hierarchy(*id))
            .min();
        let e = World::spawn(self);
        self.insert(e, Name(format!("{}(Clone)", request.category)));
        self.insert(e, Transform::at(request.position));
        self.insert(
            e,
            MapMarker {
                kind: Some(request.category.clone()),
                color: request.color,
                extra_css: None,
            },
        );
        if let Some(parent) = parent {
            self.insert(e, ChildOf(parent));
        }
        Some(e)
    }
}

/// Decodes viewer frames and applies them to the simulation. Holds the
/// recognized categories and the RNG used to pick a fallback one.
pub struct CommandDecoder {
    known: BTreeSet<String>,
    fallback: Vec<String>,
    spawn_height: f32,
    rng: StdRng,
}

impl CommandDecoder {
    /// `fallback` doubles as the set of recognized categories; `extra_known`
    /// adds categories that are recognized but never picked at random.
    pub fn new<I>(fallback: Vec<String>, extra_known: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self::with_rng(fallback, extra_known, StdRng::from_entropy())
    }

    /// Like [`CommandDecoder::new`] with a caller-supplied RNG, so fallback
    /// picks are reproducible.
    pub fn with_rng<I>(fallback: Vec<String>, extra_known: I, rng: StdRng) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut known: BTreeSet<String> = extra_known.into_iter().collect();
        known.extend(fallback.iter().cloned());
        Self {
            known,
            fallback,
            spawn_height: 0.0,
            rng,
        }
    }

    /// World-space height given to spawned entities. Defaults to 0, the
    /// reference plane.
    pub fn set_spawn_height(&mut self, height: f32) {
        self.spawn_height = height;
    }

    fn resolve_category(&mut self, requested: Option<&str>) -> String {
        if let Some(cat) = requested.map(str::trim).filter(|c| self.known.contains(*c)) {
            return cat.to_string();
        }
        let picked = self
            .fallback
            .choose(&mut self.rng)
            .cloned()
            .unwrap_or_else(|| "Cube".to_string());
        debug!(requested = ?requested, picked = %picked, "Unrecognized category; using fallback");
        picked
    }

    /// Decodes one frame. `Ok(None)` means "not a real command" (no user).
    pub fn decode(&mut self, text: &str) -> MinimapResult<Option<InboundCommand>> {
        let msg = decode_click(text)?;
        let Some(user_id) = msg.user_id.filter(|u| !u.trim().is_empty()) else {
            return Ok(None);
        };

        let color_text = msg.bubble_color.as_deref().unwrap_or(DEFAULT_BUBBLE_COLOR);
        let color = Rgb::from_hex(color_text).unwrap_or_else(|e| {
            warn!(error = %e, "Bad bubble color; using white");
            Rgb::WHITE
        });
        let size = msg
            .bubble_size
            .filter(|s| s.is_finite() && *s > 0.0)
            .unwrap_or(DEFAULT_BUBBLE_SIZE);

        if msg.item_type.as_deref() == Some(CHAT_ITEM_TYPE) {
            let text = msg.text.filter(|t| !t.trim().is_empty());
            let kind = if text.is_some() {
                CommandKind::Chat
            } else {
                CommandKind::Unknown
            };
            return Ok(Some(InboundCommand {
                kind,
                user_id,
                category: CHAT_ITEM_TYPE.to_string(),
                source: Vec2::new(msg.x.unwrap_or(0.5), msg.y.unwrap_or(0.5)),
                color,
                size,
                text,
            }));
        }

        let x = msg.x.filter(|v| v.is_finite()).ok_or(MinimapError::MissingField("x"))?;
        let y = msg.y.filter(|v| v.is_finite()).ok_or(MinimapError::MissingField("y"))?;
        let category = self.resolve_category(msg.item_type.as_deref());
        Ok(Some(InboundCommand {
            kind: CommandKind::SpawnAt,
            user_id,
            category,
            source: Vec2::new(x, y),
            color,
            size,
            text: msg.text,
        }))
    }

    /// Executes a decoded command. Spawned entities are registered with the
    /// tracker.
    pub fn dispatch(
        &self,
        cmd: InboundCommand,
        mapper: &CoordinateMapper,
        spawner: &mut impl Spawner,
        tracker: &mut WorldTracker,
    ) -> Option<EntityId> {
        match cmd.kind {
            CommandKind::SpawnAt => {
                let request = SpawnRequest {
                    position: mapper.invert(cmd.source, self.spawn_height),
                    user_id: cmd.user_id,
                    category: cmd.category,
                    color: cmd.color,
                    size: cmd.size,
                };
                info!(
                    user = %request.user_id,
                    category = %request.category,
                    x = request.position.x,
                    z = request.position.z,
                    "Viewer spawn"
                );
                let id = spawner.spawn(&request)?;
                tracker.add(id);
                Some(id)
            }
            CommandKind::Chat => {
                if let Some(text) = cmd.text.as_deref() {
                    spawner.chat(&cmd.user_id, text);
                }
                None
            }
            CommandKind::Unknown => {
                debug!(user = %cmd.user_id, "Unactionable command dropped");
                None
            }
        }
    }

    /// Decode and dispatch in one go. Failures are logged and swallowed.
    pub fn handle(
        &mut self,
        text: &str,
        mapper: &CoordinateMapper,
        spawner: &mut impl Spawner,
        tracker: &mut WorldTracker,
    ) -> Option<EntityId> {
        match self.decode(text) {
            Ok(Some(cmd)) => self.dispatch(cmd, mapper, spawner, tracker),
            Ok(None) => {
                debug!("Inbound message without user ignored");
                None
            }
            Err(e) => {
                warn!(error = %e, "Inbound message discarded");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minimap_shared::ecs::SceneView;

    #[derive(Default)]
    struct CountingSpawner {
        spawns: Vec<SpawnRequest>,
        chats: Vec<(String, String)>,
    }

    impl Spawner for CountingSpawner {
        fn spawn(&mut self, request: &SpawnRequest) -> Option<EntityId> {
            self.spawns.push(request.clone());
            Some(EntityId(100 + self.spawns.len() as u64))
        }

        fn chat(&mut self, user_id: &str, text: &str) {
            self.chats.push((user_id.into(), text.into()));
        }
    }

    fn decoder() -> CommandDecoder {
        CommandDecoder::with_rng(
            vec!["Cube".into(), "Sphere".into()],
            ["Boss".to_string()],
            StdRng::seed_from_u64(1),
        )
    }

    fn mapper() -> CoordinateMapper {
        CoordinateMapper::from_plane(Vec3::ZERO, Vec3::new(5.0, 1.0, 5.0), 5.0)
    }

    fn run(text: &str) -> (CountingSpawner, WorldTracker, Option<EntityId>) {
        let mut spawner = CountingSpawner::default();
        let mut tracker = WorldTracker::new();
        let id = decoder().handle(text, &mapper(), &mut spawner, &mut tracker);
        (spawner, tracker, id)
    }

    #[test]
    fn missing_user_spawns_nothing() {
        let (spawner, tracker, id) = run(r##"{"x":0.5,"y":0.5,"bubbleColor":"#FF0000","itemType":"Cube"}"##);
        assert!(spawner.spawns.is_empty());
        assert!(tracker.is_empty());
        assert!(id.is_none());

        let (spawner, _, _) = run(r#"{"x":0.5,"y":0.5,"userId":"  ","itemType":"Cube"}"#);
        assert!(spawner.spawns.is_empty());
    }

    #[test]
    fn unknown_item_type_still_spawns_once() {
        let (spawner, tracker, id) = run(r#"{"x":0.5,"y":0.5,"userId":"u1","itemType":"Dragon"}"#);
        assert_eq!(spawner.spawns.len(), 1);
        let cat = &spawner.spawns[0].category;
        assert!(cat == "Cube" || cat == "Sphere", "fallback picked {cat}");
        assert!(tracker.contains(id.unwrap()));
    }

    #[test]
    fn click_is_mapped_back_to_world_space() {
        let (spawner, _, _) = run(
            r##"{"x":0.0,"y":1.0,"bubbleColor":"#0000FF","bubbleSize":12,"userId":"u1","itemType":"Sphere"}"##,
        );
        let req = &spawner.spawns[0];
        assert_eq!(req.category, "Sphere");
        assert_eq!(req.position, Vec3::new(-25.0, 0.0, 25.0));
        assert_eq!(req.color.to_u8(), [0, 0, 255]);
        assert_eq!(req.size, 12.0);
        assert_eq!(req.user_id, "u1");
    }

    #[test]
    fn extra_known_kinds_are_honored() {
        let (spawner, _, _) = run(r#"{"x":0.5,"y":0.5,"userId":"u","itemType":"Boss"}"#);
        assert_eq!(spawner.spawns[0].category, "Boss");
    }

    #[test]
    fn malformed_messages_are_swallowed() {
        for text in ["", "nope", r#"{"x":"left","userId":"u"}"#, r#"{"userId":"u","itemType":"Cube"}"#, "[1,2]"] {
            let (spawner, tracker, id) = run(text);
            assert!(spawner.spawns.is_empty(), "{text}");
            assert!(tracker.is_empty());
            assert!(id.is_none());
        }
    }

    #[test]
    fn bad_color_falls_back_to_white() {
        let (spawner, _, _) = run(r#"{"x":0.5,"y":0.5,"bubbleColor":"blue","userId":"u","itemType":"Cube"}"#);
        assert_eq!(spawner.spawns[0].color, Rgb::WHITE);
        assert_eq!(spawner.spawns[0].size, DEFAULT_BUBBLE_SIZE);
    }

    #[test]
    fn chat_goes_to_chat_hook() {
        let (spawner, _, id) = run(r#"{"userId":"u9","itemType":"Chat","text":"hello"}"#);
        assert!(spawner.spawns.is_empty());
        assert!(id.is_none());
        assert_eq!(spawner.chats, vec![("u9".to_string(), "hello".to_string())]);

        let mut dec = decoder();
        let cmd = dec.decode(r#"{"userId":"u9","itemType":"Chat"}"#).unwrap().unwrap();
        assert_eq!(cmd.kind, CommandKind::Unknown);
    }

    #[test]
    fn world_spawner_registers_trackable_entity() {
        let mut world = World::default();
        let level = world.spawn();
        world.insert(level, Container);
        let mut tracker = WorldTracker::new();

        let id = decoder()
            .handle(
                r##"{"x":0.75,"y":0.75,"bubbleColor":"#FF0000","userId":"u","itemType":"Cube"}"##,
                &mapper(),
                &mut world,
                &mut tracker,
            )
            .unwrap();

        assert!(tracker.contains(id));
        assert_eq!(world.active_trackables(), vec![id]);
        let tracked = world.tracked(id).unwrap();
        assert_eq!(tracked.kind.as_deref(), Some("Cube"));
        assert_eq!(tracked.position, Vec3::new(12.5, 0.0, 12.5));
        assert_eq!(tracked.color.to_u8(), [255, 0, 0]);
    }
}
