use crate::core::errors::ExchangeError;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

// REST types

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceServerTime {
    #[serde(rename = "serverTime")]
    pub server_time: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceExchangeInfo {
    pub symbols: Vec<BinanceSymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceSymbolInfo {
    pub symbol: String,
    #[serde(rename = "baseAsset")]
    pub base_asset: String,
    #[serde(rename = "quoteAsset")]
    pub quote_asset: String,
    /// Spot and USDT futures call it `status`, coin futures `contractStatus`
    #[serde(default, alias = "contractStatus")]
    pub status: Option<String>,
    #[serde(rename = "contractType", default)]
    pub contract_type: Option<String>,
    #[serde(default)]
    pub pair: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceSpotAccount {
    pub balances: Vec<BinanceSpotBalance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceSpotBalance {
    pub asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub free: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub locked: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceMarginAccount {
    #[serde(rename = "userAssets")]
    pub user_assets: Vec<BinanceMarginAsset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceMarginAsset {
    pub asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub free: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub locked: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub borrowed: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub interest: Decimal,
    #[serde(rename = "netAsset", with = "rust_decimal::serde::str")]
    pub net_asset: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceFuturesAccount {
    pub assets: Vec<BinanceFuturesAsset>,
    pub positions: Vec<BinanceFuturesPosition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceFuturesAsset {
    pub asset: String,
    #[serde(rename = "walletBalance", with = "rust_decimal::serde::str")]
    pub wallet_balance: Decimal,
    #[serde(rename = "availableBalance", with = "rust_decimal::serde::str")]
    pub available_balance: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceFuturesPosition {
    pub symbol: String,
    #[serde(rename = "positionAmt", with = "rust_decimal::serde::str")]
    pub position_amt: Decimal,
    #[serde(rename = "entryPrice", with = "rust_decimal::serde::str")]
    pub entry_price: Decimal,
    #[serde(
        rename = "markPrice",
        default,
        with = "rust_decimal::serde::str_option"
    )]
    pub mark_price: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceTicker24h {
    pub symbol: String,
    #[serde(rename = "lastPrice", with = "rust_decimal::serde::str")]
    pub last_price: Decimal,
    #[serde(rename = "priceChangePercent", with = "rust_decimal::serde::str")]
    pub price_change_percent: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,
    /// Coin futures report `baseVolume` instead of `quoteVolume`
    #[serde(
        rename = "quoteVolume",
        alias = "baseVolume",
        default,
        with = "rust_decimal::serde::str_option"
    )]
    pub quote_volume: Option<Decimal>,
    #[serde(default)]
    pub count: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceTickerPrice {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceListenKey {
    #[serde(rename = "listenKey")]
    pub listen_key: String,
}

/// Regular order as returned by order, cancel and open-orders endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct BinanceOrder {
    #[serde(rename = "orderId")]
    pub order_id: u64,
    pub symbol: String,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub price: Option<Decimal>,
    #[serde(rename = "stopPrice", default, with = "rust_decimal::serde::str_option")]
    pub stop_price: Option<Decimal>,
    #[serde(rename = "origQty", with = "rust_decimal::serde::str")]
    pub orig_qty: Decimal,
    #[serde(rename = "executedQty", default, with = "rust_decimal::serde::str_option")]
    pub executed_qty: Option<Decimal>,
    pub status: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub side: String,
    #[serde(rename = "transactTime", default)]
    pub transact_time: Option<i64>,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(rename = "updateTime", default)]
    pub update_time: Option<i64>,
}

/// Conditional order as returned by the algo-order endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct BinanceAlgoOrder {
    #[serde(rename = "algoId")]
    pub algo_id: u64,
    pub symbol: String,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub price: Option<Decimal>,
    #[serde(rename = "triggerPrice", default, with = "rust_decimal::serde::str_option")]
    pub trigger_price: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::str")]
    pub quantity: Decimal,
    #[serde(rename = "algoStatus")]
    pub algo_status: String,
    #[serde(rename = "orderType")]
    pub order_type: String,
    pub side: String,
    #[serde(rename = "createTime")]
    pub create_time: i64,
}

/// Either order shape, told apart by which id key is present.
#[derive(Debug, Clone)]
pub enum BinanceOrderShape {
    Standard(BinanceOrder),
    Algo(BinanceAlgoOrder),
}

impl BinanceOrderShape {
    /// Parse an order payload. `algoId` wins over `orderId`; a payload with
    /// neither is rejected.
    pub fn from_value(value: Value) -> Result<Self, ExchangeError> {
        if value.get("algoId").is_some() {
            let order = serde_json::from_value(value).map_err(|e| {
                ExchangeError::DeserializationError(format!("Failed to parse algo order: {}", e))
            })?;
            Ok(Self::Algo(order))
        } else if value.get("orderId").is_some() {
            let order = serde_json::from_value(value).map_err(|e| {
                ExchangeError::DeserializationError(format!("Failed to parse order: {}", e))
            })?;
            Ok(Self::Standard(order))
        } else {
            Err(ExchangeError::DeserializationError(format!(
                "Order payload has neither 'algoId' nor 'orderId': {}",
                value
            )))
        }
    }

    pub fn normalize(self) -> ParsedOrder {
        match self {
            Self::Standard(order) => ParsedOrder {
                id: order.order_id.to_string(),
                is_algo: false,
                symbol: order.symbol,
                price: order.price.unwrap_or_default(),
                stop_price: order.stop_price.unwrap_or_default(),
                original_quantity: order.orig_qty,
                executed_quantity: order.executed_qty.unwrap_or_default(),
                status: order.status,
                order_type: order.order_type,
                side: order.side,
                time: order
                    .transact_time
                    .or(order.time)
                    .or(order.update_time)
                    .unwrap_or_default(),
            },
            Self::Algo(order) => ParsedOrder {
                id: order.algo_id.to_string(),
                is_algo: true,
                symbol: order.symbol,
                price: order.price.unwrap_or_default(),
                stop_price: order.trigger_price.unwrap_or_default(),
                original_quantity: order.quantity,
                executed_quantity: Decimal::ZERO,
                status: order.algo_status,
                order_type: order.order_type,
                side: order.side,
                time: order.create_time,
            },
        }
    }
}

/// One logical order record, whichever shape it arrived in.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOrder {
    pub id: String,
    pub is_algo: bool,
    pub symbol: String,
    pub price: Decimal,
    pub stop_price: Decimal,
    pub original_quantity: Decimal,
    pub executed_quantity: Decimal,
    pub status: String,
    pub order_type: String,
    pub side: String,
    /// Milliseconds since the epoch
    pub time: i64,
}

/// Kline row. The endpoint returns positional arrays; only the first six
/// columns are used.
#[derive(Debug, Clone, PartialEq)]
pub struct BinanceKline {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl<'de> Deserialize<'de> for BinanceKline {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        let row = Vec::<Value>::deserialize(deserializer)?;
        if row.len() < 6 {
            return Err(D::Error::custom(format!(
                "kline row has {} columns, expected at least 6",
                row.len()
            )));
        }

        let decimal = |index: usize| -> Result<Decimal, D::Error> {
            match &row[index] {
                Value::String(s) => s.parse().map_err(D::Error::custom),
                other => other.to_string().parse().map_err(D::Error::custom),
            }
        };

        Ok(Self {
            open_time: row[0]
                .as_i64()
                .ok_or_else(|| D::Error::custom("kline open time is not an integer"))?,
            open: decimal(1)?,
            high: decimal(2)?,
            low: decimal(3)?,
            close: decimal(4)?,
            volume: decimal(5)?,
        })
    }
}

// WebSocket types

/// `trade` (spot) and `aggTrade` (futures) events.
#[derive(Debug, Clone, Deserialize)]
pub struct BinanceTradeEvent {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "p", with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(rename = "q", with = "rust_decimal::serde::str")]
    pub quantity: Decimal,
    #[serde(rename = "T")]
    pub trade_time: i64,
}

/// Best bid/ask update. Spot frames carry no event type.
#[derive(Debug, Clone, Deserialize)]
pub struct BinanceBookTickerEvent {
    #[serde(rename = "u")]
    pub update_id: u64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "b", with = "rust_decimal::serde::str")]
    pub bid_price: Decimal,
    #[serde(rename = "B", with = "rust_decimal::serde::str")]
    pub bid_size: Decimal,
    #[serde(rename = "a", with = "rust_decimal::serde::str")]
    pub ask_price: Decimal,
    #[serde(rename = "A", with = "rust_decimal::serde::str")]
    pub ask_size: Decimal,
}

/// Execution fields shared by `executionReport` (top level) and
/// `ORDER_TRADE_UPDATE` (under `o`).
#[derive(Debug, Clone, Deserialize)]
pub struct BinanceExecutionFields {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "S")]
    pub side: String,
    #[serde(rename = "x")]
    pub execution_type: String,
    #[serde(rename = "X")]
    pub order_status: String,
    #[serde(rename = "i")]
    pub order_id: u64,
    #[serde(rename = "l", with = "rust_decimal::serde::str")]
    pub last_quantity: Decimal,
    #[serde(rename = "L", with = "rust_decimal::serde::str")]
    pub last_price: Decimal,
    #[serde(rename = "n", default, with = "rust_decimal::serde::str_option")]
    pub fee: Option<Decimal>,
    #[serde(rename = "N", default)]
    pub fee_currency: Option<String>,
    #[serde(rename = "T")]
    pub transaction_time: i64,
    /// Algo id of the conditional order that spawned this one (futures only)
    #[serde(rename = "ai", default, deserialize_with = "id_string")]
    pub algo_id: Option<String>,
}

/// Accept an id sent either as a number or a string.
fn id_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Normalized execution event from the user-data stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub order_id: String,
    /// `None` for spot, `"0"` for plain futures orders, the algo id otherwise
    pub algo_order_id: Option<String>,
    pub symbol: String,
    pub execution_type: String,
    pub order_status: String,
    pub transaction_time: i64,
    pub last_price: Decimal,
    pub last_quantity: Decimal,
    pub side: String,
    pub fee: Decimal,
    pub fee_currency: Option<String>,
}

/// Placeholder algo id carried by futures fills of regular orders.
pub const NO_ALGO_ID: &str = "0";

impl Execution {
    pub fn from_fields(fields: BinanceExecutionFields, futures: bool) -> Self {
        let algo_order_id = if futures {
            Some(fields.algo_id.unwrap_or_else(|| NO_ALGO_ID.to_string()))
        } else {
            fields.algo_id
        };

        Self {
            order_id: fields.order_id.to_string(),
            algo_order_id,
            symbol: fields.symbol,
            execution_type: fields.execution_type,
            order_status: fields.order_status,
            transaction_time: fields.transaction_time,
            last_price: fields.last_price,
            last_quantity: fields.last_quantity,
            side: fields.side,
            fee: fields.fee.unwrap_or_default(),
            fee_currency: fields.fee_currency.filter(|c| !c.is_empty()),
        }
    }

    /// Only trades and expiries are reported to the host as fills.
    pub fn is_fill(&self) -> bool {
        self.execution_type.eq_ignore_ascii_case("TRADE")
            || self.execution_type.eq_ignore_ascii_case("EXPIRED")
    }

    /// Algo id when the execution came from a conditional order.
    pub fn real_algo_id(&self) -> Option<&str> {
        self.algo_order_id
            .as_deref()
            .filter(|id| !id.is_empty() && *id != NO_ALGO_ID)
    }
}
