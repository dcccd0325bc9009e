//! `minimap_client`
//!
//! Live minimap broadcaster:
//! - Connection management (session allocation, socket worker, reconnect)
//! - World object tracking and snapshot publishing
//! - Viewer command decoding and dispatch
//! - Cooperative tick-driven timers

pub mod broadcaster;
pub mod command;
pub mod connection;
pub mod link;
pub mod session;
pub mod slot;
pub mod snapshot;
pub mod timer;
pub mod tracker;

pub use broadcaster::{Broadcaster, TickReport};
pub use command::{CommandDecoder, Spawner, SpawnRequest};
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState, Outbound};
pub use session::{FixedIdentity, HttpAllocator, IdentityResolver, PendingIdentity, SessionAllocator};
pub use tracker::WorldTracker;
