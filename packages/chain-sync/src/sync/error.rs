use std::fmt;
use thiserror::Error;

use crate::models::NetworkId;

/// Failure of an upstream chain or price provider.
///
/// Always recoverable: the component that sees it logs it and keeps the
/// last known-good value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request error: {0}")]
    Request(String),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("No endpoint configured for network {0}")]
    UnknownNetwork(NetworkId),

    #[error("Data not available: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            Self::Connection(e.to_string())
        } else if e.is_decode() {
            Self::Parse(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

impl From<ethers::providers::ProviderError> for ProviderError {
    fn from(e: ethers::providers::ProviderError) -> Self {
        Self::Request(e.to_string())
    }
}

/// Invalid startup configuration. Fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be positive")]
    NonPositive(&'static str),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// The coordinator task is no longer running
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("sync coordinator has stopped")]
pub struct CoordinatorStopped;

/// Why a value was dropped instead of committed. Not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Produced for a network that is no longer active
    StaleNetwork,
    /// The consumer was not visible at the commit boundary
    Hidden,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscardReason::StaleNetwork => f.write_str("stale network"),
            DiscardReason::Hidden => f.write_str("consumer hidden"),
        }
    }
}
