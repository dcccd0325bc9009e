//! Standalone broadcaster binary.
//!
//! Usage:
//!   cargo run -p minimap_client --bin broadcaster -- [--config minimap.json]
//!       [--host lobby.example.com] [--channel 12345] [--tick-hz 60]
//!
//! Runs a small demo scene (a ground plane, two levels of drifting markers)
//! and mirrors it to the lobby host. Viewer clicks spawn new markers. The
//! active level flips periodically, which triggers a tracker rescan.
//! Ctrl-C closes the socket and exits.

use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use minimap_client::{
    broadcaster::Broadcaster,
    session::{ChannelId, FixedIdentity, HttpAllocator, IdentityResolver, PendingIdentity},
    timer::Timer,
};
use minimap_shared::{
    config::BroadcastConfig,
    ecs::{ChildOf, Container, EntityId, Inactive, MapMarker, Name, Transform, World},
    math::Vec3,
    style::Rgb,
};
use tokio::time::MissedTickBehavior;
use tracing::info;

/// Channel used when none is configured; stands in for an account lookup.
const DEMO_CHANNEL: ChannelId = 1;
const DEMO_IDENTITY_DELAY: Duration = Duration::from_secs(2);
const LEVEL_SWITCH_PERIOD: Duration = Duration::from_secs(30);

fn parse_args() -> anyhow::Result<BroadcastConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => BroadcastConfig::from_json_file(&args[i + 1])
            .with_context(|| format!("loading {}", args[i + 1]))?,
        _ => BroadcastConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => i += 2,
            "--host" if i + 1 < args.len() => {
                cfg.host = args[i + 1].clone();
                i += 2;
            }
            "--channel" if i + 1 < args.len() => {
                cfg.channel_id = Some(args[i + 1].parse().context("--channel")?);
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().context("--tick-hz")?;
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

/// Demo simulation: a scene plus the markers that drift around it.
struct Demo {
    world: World,
    levels: [EntityId; 2],
    active_level: usize,
    /// (entity, anchor, angular speed)
    drifting: Vec<(EntityId, Vec3, f32)>,
    started: Instant,
    level_switch: Timer,
}

impl Demo {
    fn new(cfg: &BroadcastConfig, now: Instant) -> Self {
        let mut world = World::default();

        let ground = world.spawn();
        world.insert(ground, Name(cfg.reference_plane.clone()));
        world.insert(
            ground,
            Transform {
                position: Vec3::ZERO,
                scale: Vec3::new(4.0, 1.0, 4.0),
            },
        );

        let levels = [world.spawn(), world.spawn()];
        for (n, level) in levels.iter().enumerate() {
            world.insert(*level, Container);
            world.insert(*level, Name(format!("Level{}", n + 1)));
        }
        world.insert(levels[1], Inactive);

        let palette = [
            ("Cube", Rgb::from_u8(255, 80, 80)),
            ("Sphere", Rgb::from_u8(80, 160, 255)),
        ];
        let mut drifting = Vec::new();
        for (n, level) in levels.iter().enumerate() {
            for k in 0..6 {
                let (kind, color) = palette[k % palette.len()];
                let anchor = Vec3::new(-12.0 + 5.0 * k as f32, 0.0, -8.0 + 10.0 * n as f32);
                let e = world.spawn();
                world.insert(e, Name(format!("{kind} {k}")));
                world.insert(e, ChildOf(*level));
                world.insert(e, Transform::at(anchor));
                world.insert(
                    e,
                    MapMarker {
                        kind: None,
                        color,
                        extra_css: (k == 0).then(|| "animation: shimmer 2s infinite".to_string()),
                    },
                );
                drifting.push((e, anchor, 0.3 + 0.1 * k as f32));
            }
        }

        let mut level_switch = Timer::repeating(LEVEL_SWITCH_PERIOD);
        level_switch.start(now);
        Self {
            world,
            levels,
            active_level: 0,
            drifting,
            started: now,
            level_switch,
        }
    }

    fn step(&mut self, now: Instant) {
        let t = now.saturating_duration_since(self.started).as_secs_f32();
        for (id, anchor, speed) in &self.drifting {
            if let Some(tf) = self.world.get_mut::<Transform>(*id) {
                let phase = t * speed;
                tf.position = *anchor + Vec3::new(phase.sin() * 3.0, 0.0, phase.cos() * 3.0);
            }
        }
    }

    /// Flips the active level when due. Returns true on a switch.
    fn maybe_switch_level(&mut self, now: Instant) -> bool {
        if !self.level_switch.poll(now) {
            return false;
        }
        let old = self.levels[self.active_level];
        self.active_level = 1 - self.active_level;
        let new = self.levels[self.active_level];
        self.world.insert(old, Inactive);
        self.world.remove::<Inactive>(new);
        info!(level = self.active_level + 1, "Level switched");
        true
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(host = %cfg.host, channel = ?cfg.channel_id, tick_hz = cfg.tick_hz, "Starting broadcaster");

    let identity: Box<dyn IdentityResolver> = match cfg.channel_id {
        Some(channel) => Box::new(FixedIdentity(Some(channel))),
        None => {
            info!(channel = DEMO_CHANNEL, "No channel configured; resolving demo identity");
            Box::new(PendingIdentity::resolve_after(DEMO_CHANNEL, DEMO_IDENTITY_DELAY))
        }
    };
    let allocator = Arc::new(HttpAllocator::new(&cfg).context("http client")?);

    let mut demo = Demo::new(&cfg, Instant::now());
    let mut broadcaster = Broadcaster::new(&cfg, &demo.world, identity, allocator);
    broadcaster.tracker_rescan(&demo.world);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(cfg.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            res = &mut shutdown => {
                res.context("ctrl-c handler")?;
                info!("Shutting down");
                break;
            }
            at = ticker.tick() => {
                let now = at.into_std();
                demo.step(now);
                if demo.maybe_switch_level(now) {
                    broadcaster.tracker_rescan(&demo.world);
                }
                let report = broadcaster.tick(now, &mut demo.world);
                if let Some(id) = report.spawned {
                    info!(entity = id.0, tracked = broadcaster.tracker().len(), "Viewer marker added");
                }
            }
        }
    }

    broadcaster.shutdown().await;
    Ok(())
}

