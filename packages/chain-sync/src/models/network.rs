use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of the network the consumer is currently pointed at (EVM chain id)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkId(pub u64);

impl NetworkId {
    pub const ETHEREUM: NetworkId = NetworkId(1);
    pub const POLYGON: NetworkId = NetworkId(137);
    pub const POLYGON_MUMBAI: NetworkId = NetworkId(80001);

    pub fn chain_id(self) -> u64 {
        self.0
    }

    /// Human readable name for the networks we know about
    pub fn name(self) -> Option<&'static str> {
        match self.0 {
            1 => Some("ethereum"),
            137 => Some("polygon"),
            80001 => Some("mumbai"),
            _ => None,
        }
    }
}

impl Default for NetworkId {
    fn default() -> Self {
        Self::POLYGON
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", name, self.0),
            None => write!(f, "chain {}", self.0),
        }
    }
}

impl From<u64> for NetworkId {
    fn from(chain_id: u64) -> Self {
        Self(chain_id)
    }
}

/// A block height seen on a specific network.
///
/// Only meaningful while `network` is still the active network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockObservation {
    pub network: NetworkId,
    pub height: u64,
}

impl BlockObservation {
    pub fn new(network: NetworkId, height: u64) -> Self {
        Self { network, height }
    }

    pub fn belongs_to(&self, network: NetworkId) -> bool {
        self.network == network
    }
}
