use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which reference price a quote is for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetTag {
    /// The chain's bridged native coin (ETH)
    Native,
    /// The gas token (MATIC)
    Secondary,
}

impl AssetTag {
    pub const ALL: [AssetTag; 2] = [AssetTag::Native, AssetTag::Secondary];

    pub fn as_str(self) -> &'static str {
        match self {
            AssetTag::Native => "native",
            AssetTag::Secondary => "secondary",
        }
    }
}

impl fmt::Display for AssetTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw answer of a price source
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSample {
    pub current: Decimal,
    /// `None` when the source has no value for 24h ago
    pub one_day_ago: Option<Decimal>,
}

/// A committed reference price
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub asset: AssetTag,
    pub current: Decimal,
    pub one_day_ago: Option<Decimal>,
    /// Relative change vs. 24h ago, in percent
    pub change_pct: Option<Decimal>,
}

impl PriceQuote {
    pub fn new(asset: AssetTag, sample: PriceSample) -> Self {
        let change_pct = sample
            .one_day_ago
            .and_then(|ago| percent_change(sample.current, ago));

        Self {
            asset,
            current: sample.current,
            one_day_ago: sample.one_day_ago,
            change_pct,
        }
    }
}

/// `(current - previous) / previous * 100`, unknown when `previous` is zero
pub fn percent_change(current: Decimal, previous: Decimal) -> Option<Decimal> {
    if previous.is_zero() {
        return None;
    }
    (current - previous)
        .checked_div(previous)?
        .checked_mul(Decimal::ONE_HUNDRED)
}
