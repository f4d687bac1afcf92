use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use super::PriceSource;
use crate::config::{Config, NetworkEndpoints};
use crate::models::{AssetTag, NetworkId, PriceSample};
use crate::sync::ProviderError;
use crate::utils::retry::{with_retry, RetryPolicy};

const ONE_DAY_SECS: i64 = 86_400;
/// Width of the timestamp range searched for the 24h-ago block
const BLOCK_SEARCH_WINDOW_SECS: i64 = 600;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Subgraph URLs for one network
#[derive(Debug, Clone)]
pub struct SubgraphEndpoints {
    pub native_url: String,
    pub secondary_url: String,
    pub blocks_url: Option<String>,
}

impl SubgraphEndpoints {
    /// Build from configured endpoints, `None` when no price subgraph is set
    pub fn from_network(endpoints: &NetworkEndpoints) -> Option<Self> {
        let native_url = endpoints.price_subgraph_url.clone()?;
        let secondary_url = endpoints
            .secondary_price_subgraph_url
            .clone()
            .unwrap_or_else(|| native_url.clone());

        Some(Self {
            native_url,
            secondary_url,
            blocks_url: endpoints.blocks_subgraph_url.clone(),
        })
    }
}

/// Reference prices from Uniswap-style subgraphs (`bundles { <field> }`)
pub struct SubgraphPriceSource {
    client: reqwest::Client,
    endpoints: HashMap<NetworkId, SubgraphEndpoints>,
    native_field: String,
    secondary_field: String,
    retry: RetryPolicy,
}

impl SubgraphPriceSource {
    pub fn new(
        endpoints: HashMap<NetworkId, SubgraphEndpoints>,
        native_field: impl Into<String>,
        secondary_field: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            endpoints,
            native_field: native_field.into(),
            secondary_field: secondary_field.into(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let endpoints = config
            .network_endpoints()?
            .iter()
            .filter_map(|(network, endpoints)| {
                SubgraphEndpoints::from_network(endpoints).map(|e| (*network, e))
            })
            .collect();

        let source = Self::new(
            endpoints,
            config.native_price_field.clone(),
            config.secondary_price_field.clone(),
        )?
        .with_retry_policy(config.retry_policy());
        Ok(source)
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn query(&self, url: &str, query: &str) -> Result<Value, ProviderError> {
        let body = json!({ "query": query });

        let response: Value = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(errors) = response.get("errors") {
            return Err(ProviderError::Request(format!("subgraph errors: {}", errors)));
        }
        Ok(response)
    }

    async fn price_at(
        &self,
        url: &str,
        field: &str,
        block: Option<u64>,
    ) -> Result<Decimal, ProviderError> {
        let query = bundle_query(field, block);
        let response = with_retry(
            || self.query(url, &query),
            self.retry,
            &format!("subgraph_{}", field),
        )
        .await?;
        parse_bundle_price(&response, field)
    }

    async fn block_one_day_ago(&self, blocks_url: &str) -> Result<Option<u64>, ProviderError> {
        let timestamp = Utc::now().timestamp() - ONE_DAY_SECS;
        let response = self.query(blocks_url, &block_query(timestamp)).await?;
        parse_block_number(&response)
    }

    async fn one_day_ago(
        &self,
        endpoints: &SubgraphEndpoints,
        url: &str,
        field: &str,
    ) -> Option<Decimal> {
        let blocks_url = endpoints.blocks_url.as_deref()?;

        let block = match self.block_one_day_ago(blocks_url).await {
            Ok(Some(block)) => block,
            Ok(None) => {
                debug!("No block found 24h ago on {}", blocks_url);
                return None;
            }
            Err(e) => {
                warn!("Failed to look up block 24h ago: {}", e);
                return None;
            }
        };

        match self.price_at(url, field, Some(block)).await {
            Ok(price) => Some(price),
            Err(e) => {
                warn!("Failed to fetch {} at block {}: {}", field, block, e);
                None
            }
        }
    }
}

#[async_trait]
impl PriceSource for SubgraphPriceSource {
    async fn fetch_price(
        &self,
        asset: AssetTag,
        network: NetworkId,
    ) -> Result<PriceSample, ProviderError> {
        let endpoints = self
            .endpoints
            .get(&network)
            .ok_or(ProviderError::UnknownNetwork(network))?;

        let (url, field) = match asset {
            AssetTag::Native => (endpoints.native_url.as_str(), self.native_field.as_str()),
            AssetTag::Secondary => (
                endpoints.secondary_url.as_str(),
                self.secondary_field.as_str(),
            ),
        };

        let current = self.price_at(url, field, None).await?;
        let one_day_ago = self.one_day_ago(endpoints, url, field).await;

        Ok(PriceSample {
            current,
            one_day_ago,
        })
    }
}

fn bundle_query(field: &str, block: Option<u64>) -> String {
    let block = block
        .map(|number| format!(", block: {{ number: {} }}", number))
        .unwrap_or_default();
    format!(
        r#"{{ bundles(where: {{ id: "1" }}{}) {{ {} }} }}"#,
        block, field
    )
}

fn block_query(timestamp: i64) -> String {
    format!(
        "{{ blocks(first: 1, orderBy: timestamp, orderDirection: asc, \
         where: {{ timestamp_gt: {}, timestamp_lt: {} }}) {{ number }} }}",
        timestamp,
        timestamp + BLOCK_SEARCH_WINDOW_SECS
    )
}

fn parse_bundle_price(response: &Value, field: &str) -> Result<Decimal, ProviderError> {
    let raw = response
        .pointer("/data/bundles/0")
        .and_then(|bundle| bundle.get(field))
        .ok_or_else(|| ProviderError::Unavailable(format!("no bundle with {}", field)))?;

    let price = match raw {
        Value::String(s) => parse_decimal(s)?,
        Value::Number(n) => n
            .as_f64()
            .and_then(Decimal::from_f64)
            .ok_or_else(|| ProviderError::Parse(format!("{} is not a decimal", n)))?,
        other => return Err(ProviderError::Parse(format!("unexpected {} value: {}", field, other))),
    };

    if price.is_sign_negative() {
        return Err(ProviderError::Parse(format!("negative {}: {}", field, price)));
    }
    Ok(price)
}

fn parse_block_number(response: &Value) -> Result<Option<u64>, ProviderError> {
    let Some(block) = response.pointer("/data/blocks/0") else {
        return Ok(None);
    };

    let number = match block.get("number") {
        Some(Value::String(s)) => s.parse::<u64>().ok(),
        Some(Value::Number(n)) => n.as_u64(),
        _ => None,
    };
    number
        .map(Some)
        .ok_or_else(|| ProviderError::Parse(format!("bad block number: {}", block)))
}

/// Subgraphs return more fractional digits than `Decimal` holds
fn parse_decimal(raw: &str) -> Result<Decimal, ProviderError> {
    Decimal::from_str(raw)
        .ok()
        .or_else(|| raw.parse::<f64>().ok().and_then(Decimal::from_f64))
        .ok_or_else(|| ProviderError::Parse(format!("'{}' is not a decimal", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_query_pins_block() {
        assert_eq!(
            bundle_query("ethPriceUSD", None),
            r#"{ bundles(where: { id: "1" }) { ethPriceUSD } }"#
        );
        assert_eq!(
            bundle_query("maticPriceUSD", Some(42)),
            r#"{ bundles(where: { id: "1" }, block: { number: 42 }) { maticPriceUSD } }"#
        );
    }

    #[test]
    fn parses_string_prices() {
        let response = json!({ "data": { "bundles": [ { "ethPriceUSD": "3000.25" } ] } });
        assert_eq!(
            parse_bundle_price(&response, "ethPriceUSD").unwrap(),
            Decimal::new(300025, 2)
        );
    }

    #[test]
    fn empty_bundles_is_unavailable() {
        let response = json!({ "data": { "bundles": [] } });
        assert!(matches!(
            parse_bundle_price(&response, "ethPriceUSD"),
            Err(ProviderError::Unavailable(_))
        ));
    }

    #[test]
    fn negative_price_is_rejected() {
        let response = json!({ "data": { "bundles": [ { "ethPriceUSD": "-1" } ] } });
        assert!(matches!(
            parse_bundle_price(&response, "ethPriceUSD"),
            Err(ProviderError::Parse(_))
        ));
    }

    #[test]
    fn long_fractions_still_parse() {
        let price = parse_decimal("1.0123456789012345678901234567890123").unwrap();
        assert_eq!(price.round_dp(4), Decimal::new(10123, 4));
    }

    #[test]
    fn block_lookup_handles_missing_block() {
        let found = json!({ "data": { "blocks": [ { "number": "51234567" } ] } });
        assert_eq!(parse_block_number(&found).unwrap(), Some(51_234_567));

        let missing = json!({ "data": { "blocks": [] } });
        assert_eq!(parse_block_number(&missing).unwrap(), None);
    }

    #[test]
    fn endpoints_fall_back_to_native_subgraph() {
        let configured = NetworkEndpoints {
            price_subgraph_url: Some("https://graph/v3".to_string()),
            ..Default::default()
        };
        let endpoints = SubgraphEndpoints::from_network(&configured).unwrap();
        assert_eq!(endpoints.secondary_url, "https://graph/v3");
        assert!(endpoints.blocks_url.is_none());

        assert!(SubgraphEndpoints::from_network(&NetworkEndpoints::default()).is_none());
    }
}
