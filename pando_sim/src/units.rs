//! Demo units driven by the simulation scenarios.
//!
//! - [`TxValues`]: parses a transaction record, emits one entry per output,
//!   then joins against the day's exchange rate to emit USD values
//! - [`ShapeShiftPairs`]: matches a transaction pair against any of the four
//!   orderings an exchange record can be stored under
//! - [`tx_subgraph_search`]: breadth-first distance over transaction edges
//!
//! Key layout, all under `ChainInfo::pack(coin, kind, subkind)`:
//!
//! | kind                  | b               | c            | value          |
//! |-----------------------|-----------------|--------------|----------------|
//! | `EXCHANGE_RATE_KIND`  | day start (s)   | 0            | cents per unit |
//! | `OUT_VAL_KIND` (coin) | tx key          | 0            | native amount  |
//! | `OUT_VAL_KIND` (USD)  | tx time (s)     | tx key       | USD cents      |
//! | `SHAPESHIFT_KIND`     | first tx        | second tx    | free text      |
//! | `TX_EDGE_KIND`        | source vertex   | sink vertex  | empty          |

use pando_core::{
    tag_param, BfsConfig, BreadthFirstDistance, Completion, EntryAccess, EntryUnit, FanOutJoin, GasUnit,
    JoinStatus, UnitConfig, UnitError,
};
use pando_env::{ChainInfo, Key, TagSet};
use serde::{Deserialize, Serialize};

pub const USD: u32 = 0;
pub const BTC: u32 = 1;
pub const ETH: u32 = 2;
pub const DOGE: u32 = 3;

pub const EXCHANGE_RATE_KIND: u16 = 2;
pub const OUT_VAL_KIND: u16 = 3;
pub const SHAPESHIFT_KIND: u16 = 4;
pub const TX_EDGE_KIND: u16 = 5;
pub const TX_DISTANCE_KIND: u16 = 6;
pub const TX_SEED_KIND: u16 = 7;

pub const SECONDS_PER_DAY: i64 = 86_400;

/// Tag added to a pair once any exchange record for it exists.
pub const MATCH_TAG: &str = "ShapeShift_transaction_found";

/// Tag carried by every USD output entry.
pub const USD_OUT_TAG: &str = "out_val_usd";

/// Midnight (UTC) of the day containing `timestamp`.
pub fn day_start(timestamp: i64) -> i64 {
    timestamp - timestamp.rem_euclid(SECONDS_PER_DAY)
}

pub fn rate_key(coin: u32, timestamp: i64) -> Key {
    Key::new(ChainInfo::pack(coin, EXCHANGE_RATE_KIND, 0), day_start(timestamp), 0)
}

pub fn native_out_key(coin: u32, n: u16, tx: i64) -> Key {
    Key::new(ChainInfo::pack(coin, OUT_VAL_KIND, n), tx, 0)
}

pub fn usd_out_key(n: u16, timestamp: i64, tx: i64) -> Key {
    Key::new(ChainInfo::pack(USD, OUT_VAL_KIND, n), timestamp, tx)
}

pub fn shapeshift_key(from: u32, to: u32, first: i64, second: i64) -> Key {
    Key::new(ChainInfo::pack(from, SHAPESHIFT_KIND, to as u16), first, second)
}

// =============================================================================
// TRANSACTION VALUES
// =============================================================================

/// One transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Amount in the coin's smallest unit
    pub value: u64,
    pub n: u16,
}

/// The JSON payload of a `tx` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    pub txid: String,
    /// Unix seconds
    pub time: i64,
    pub vout: Vec<TxOutput>,
}

impl TxRecord {
    /// Key component derived from the first 15 hex digits of the txid.
    pub fn tx_key(&self) -> Result<i64, UnitError> {
        let prefix = self.txid.get(..15).unwrap_or(&self.txid);
        i64::from_str_radix(prefix, 16)
            .map_err(|e| UnitError::malformed(format!("txid {:?} is not hex: {}", self.txid, e)))
    }

    pub fn parse(raw: &[u8]) -> Result<Self, UnitError> {
        let record: TxRecord =
            serde_json::from_slice(raw).map_err(|e| UnitError::malformed(format!("cannot parse tx: {}", e)))?;
        if record.vout.is_empty() {
            return Err(UnitError::malformed("tx has no outputs"));
        }
        record.tx_key()?;
        Ok(record)
    }
}

/// Converts transaction outputs to USD at the day's exchange rate.
///
/// Native output entries are written on the first run even when the rate is
/// still missing; rewriting them on the rerun is a no-op because identical
/// creates do not merge.
pub struct TxValues {
    config: UnitConfig,
    coin: u32,
    coin_tag: String,
}

impl TxValues {
    pub fn new(coin_tag: &str, coin: u32) -> Self {
        Self {
            config: UnitConfig::new(format!("{}_tx_vals", coin_tag))
                .require(coin_tag)
                .require("tx"),
            coin,
            coin_tag: coin_tag.to_string(),
        }
    }

    pub fn coin(&self) -> u32 {
        self.coin
    }
}

impl EntryUnit for TxValues {
    type State = TxRecord;

    fn config(&self) -> &UnitConfig {
        &self.config
    }

    fn setup(&self, access: &EntryAccess<'_>) -> Result<TxRecord, UnitError> {
        TxRecord::parse(access.value())
    }

    fn execute(&self, record: &mut TxRecord, access: &mut EntryAccess<'_>) -> Result<Completion, UnitError> {
        let tx = record.tx_key()?;
        let out_tag = format!("out_val_{}", self.coin_tag.to_lowercase());
        for out in &record.vout {
            let tags: TagSet = [self.coin_tag.as_str(), out_tag.as_str()].into_iter().collect();
            access.create(tags, out.value.to_string(), native_out_key(self.coin, out.n, tx));
        }

        let Some(raw) = access.await_key(rate_key(self.coin, record.time))? else {
            return Ok(Completion::Deferred);
        };
        let rate: u64 = String::from_utf8_lossy(&raw)
            .trim()
            .parse()
            .map_err(|_| UnitError::invariant("exchange rate entry is not an integer"))?;

        for out in &record.vout {
            let usd = out
                .value
                .checked_mul(rate)
                .ok_or_else(|| UnitError::invariant(format!("USD value of output {} overflows", out.n)))?;
            let tags: TagSet = [self.coin_tag.as_str(), USD_OUT_TAG].into_iter().collect();
            access.create(tags, usd.to_string(), usd_out_key(out.n, record.time, tx));
        }
        Ok(Completion::Done)
    }
}

// =============================================================================
// SHAPESHIFT PAIRS
// =============================================================================

/// A pair entry: `from=` / `to=` coin tags and two tx keys, one per line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairRequest {
    pub from: u32,
    pub to: u32,
    pub first: i64,
    pub second: i64,
}

impl PairRequest {
    /// Every key an exchange record for this pair may live under.
    pub fn candidates(&self) -> [Key; 4] {
        [
            shapeshift_key(self.from, self.to, self.first, self.second),
            shapeshift_key(self.from, self.to, self.second, self.first),
            shapeshift_key(self.to, self.from, self.first, self.second),
            shapeshift_key(self.to, self.from, self.second, self.first),
        ]
    }

    pub fn tags(&self) -> TagSet {
        ["pair".to_string(), format!("from={}", self.from), format!("to={}", self.to)]
            .into_iter()
            .collect()
    }

    pub fn value(&self) -> String {
        format!("{}\n{}\n", self.first, self.second)
    }
}

/// Flags pairs that an exchange record exists for.
pub struct ShapeShiftPairs {
    config: UnitConfig,
}

impl ShapeShiftPairs {
    pub fn new() -> Self {
        Self {
            config: UnitConfig::new("findShapeShiftPairs").require("pair"),
        }
    }
}

impl Default for ShapeShiftPairs {
    fn default() -> Self {
        Self::new()
    }
}

impl EntryUnit for ShapeShiftPairs {
    type State = PairRequest;

    fn config(&self) -> &UnitConfig {
        &self.config
    }

    fn setup(&self, access: &EntryAccess<'_>) -> Result<PairRequest, UnitError> {
        let from = tag_param(access.tags(), "from=").ok_or_else(|| UnitError::malformed("missing from= tag"))?;
        let to = tag_param(access.tags(), "to=").ok_or_else(|| UnitError::malformed("missing to= tag"))?;

        let text = access.value_str();
        let mut lines = text.lines().map(str::trim);
        let mut next_tx = || -> Result<i64, UnitError> {
            lines
                .next()
                .and_then(|l| l.parse().ok())
                .ok_or_else(|| UnitError::malformed("pair value must hold two tx keys"))
        };
        let first = next_tx()?;
        let second = next_tx()?;
        Ok(PairRequest { from, to, first, second })
    }

    fn execute(&self, pair: &mut PairRequest, access: &mut EntryAccess<'_>) -> Result<Completion, UnitError> {
        match FanOutJoin::any_of(pair.candidates().to_vec()).poll(access)? {
            JoinStatus::Ready(_) => {
                access.add_tag(MATCH_TAG);
                Ok(Completion::Done)
            }
            JoinStatus::Pending(_) => Ok(Completion::Deferred),
        }
    }
}

// =============================================================================
// TRANSACTION SUBGRAPH SEARCH
// =============================================================================

pub const TX_SUBGRAPH_SEARCH: &str = "tx_subgraph_search";

/// Hop distance from seeded transactions over the `coin` edge graph.
pub fn tx_subgraph_program(coin: u32) -> BreadthFirstDistance {
    BreadthFirstDistance::new(
        TX_SUBGRAPH_SEARCH,
        BfsConfig::new(
            ChainInfo::pack(coin, TX_EDGE_KIND, 0),
            ChainInfo::pack(coin, TX_DISTANCE_KIND, 0),
            ChainInfo::pack(coin, TX_SEED_KIND, 0),
        )
        .with_result_tag("TX_DISTANCE"),
    )
}

pub fn tx_subgraph_search(coin: u32) -> GasUnit<BreadthFirstDistance> {
    tx_subgraph_program(coin).into_unit()
}
