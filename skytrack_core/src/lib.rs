//! SkyTrack Core - delivery-drone tracking and flight simulation
//!
//! Two components, leaves first:
//! - **Location Store** ([`store`]): append-only persistence of timestamped
//!   location records per (tracker, session), with latest/history/list/clear
//!   queries. Pollers observe flight progress exclusively through it.
//! - **Simulation Engine** ([`engine`]): owns the active per-key simulation
//!   tasks. Each tick reads the latest persisted location, advances it toward
//!   the destination, applies the obstacle policy ([`flight`]), and appends
//!   the result. Arrival terminates the task.

pub mod engine;
pub mod flight;
pub mod location;
pub mod store;

pub use engine::{EngineError, SimulationEngine};
pub use flight::{EngineConfig, ObstacleState, TickPlan};
pub use location::{
    DeliveryStatus, LocationRecord, ObstacleType, TrackerKey, ValidationError, GLOBAL_SESSION,
};
pub use store::{LocationStore, MemoryLocationStore, SledLocationStore, StoreError};
