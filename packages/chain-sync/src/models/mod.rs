mod network;
mod price;

pub use network::{BlockObservation, NetworkId};
pub use price::{percent_change, AssetTag, PriceQuote, PriceSample};
