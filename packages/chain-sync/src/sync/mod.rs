mod coordinator;
mod debounce;
mod error;
mod prices;
mod tracker;
mod visibility;

pub use coordinator::{SyncCoordinator, SyncHandle};
pub use debounce::Debouncer;
pub use error::{ConfigError, CoordinatorStopped, DiscardReason, ProviderError};
pub use prices::{PriceRefresher, PriceUpdate};
pub use tracker::BlockTracker;
pub use visibility::VisibilityGate;
