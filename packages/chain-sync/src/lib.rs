//! Keeps a client's view of slowly changing chain state in sync: the block
//! height of the active network and the native/secondary reference prices.

pub mod config;
pub mod models;
pub mod sources;
pub mod store;
pub mod sync;
pub mod utils;

pub use crate::config::{Config, SyncConfig};
pub use crate::models::{AssetTag, BlockObservation, NetworkId, PriceQuote};
pub use crate::store::{StateChange, StateSink, SyncStore};
pub use crate::sync::{SyncCoordinator, SyncHandle, VisibilityGate};
