use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of security the host engine trades through this brokerage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityType {
    Crypto,
    CryptoFuture,
}

/// Market identifier used by the host engine to namespace instruments.
pub mod market {
    pub const BINANCE: &str = "binance";
    pub const BINANCE_US: &str = "binanceus";
}

/// Host-side identity of a tradable instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    pub ticker: String,
    pub security_type: SecurityType,
    pub market: String,
}

impl Instrument {
    pub fn new(
        ticker: impl Into<String>,
        security_type: SecurityType,
        market: impl Into<String>,
    ) -> Self {
        Self {
            ticker: ticker.into().to_uppercase(),
            security_type,
            market: market.into(),
        }
    }

    pub fn crypto(ticker: impl Into<String>) -> Self {
        Self::new(ticker, SecurityType::Crypto, market::BINANCE)
    }

    pub fn crypto_future(ticker: impl Into<String>) -> Self {
        Self::new(ticker, SecurityType::CryptoFuture, market::BINANCE)
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {})", self.ticker, self.security_type, self.market)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderDirection {
    Buy,
    Sell,
}

impl OrderDirection {
    pub fn as_binance(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }

    /// Applies the direction's sign to an unsigned amount.
    pub fn signed(self, amount: Decimal) -> Decimal {
        match self {
            Self::Buy => amount.abs(),
            Self::Sell => -amount.abs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    GoodTilCanceled,
    ImmediateOrCancel,
    FillOrKill,
}

impl Default for TimeInForce {
    fn default() -> Self {
        Self::GoodTilCanceled
    }
}

impl TimeInForce {
    pub fn as_binance(self) -> &'static str {
        match self {
            Self::GoodTilCanceled => "GTC",
            Self::ImmediateOrCancel => "IOC",
            Self::FillOrKill => "FOK",
        }
    }
}

/// Order kind together with the prices that kind needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Market,
    Limit {
        limit_price: Decimal,
        post_only: bool,
    },
    StopLimit {
        stop_price: Decimal,
        limit_price: Decimal,
    },
    StopMarket {
        stop_price: Decimal,
    },
}

impl OrderKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Market => "Market",
            Self::Limit { .. } => "Limit",
            Self::StopLimit { .. } => "StopLimit",
            Self::StopMarket { .. } => "StopMarket",
        }
    }

    pub fn stop_price(&self) -> Option<Decimal> {
        match self {
            Self::StopLimit { stop_price, .. } | Self::StopMarket { stop_price } => {
                Some(*stop_price)
            }
            _ => None,
        }
    }
}

/// Outbound order as the host engine hands it over.
///
/// `quantity` is unsigned; the sign lives in `direction`. `broker_ids`
/// is left to the host, which learns them from `OrderIdChanged`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub instrument: Instrument,
    pub direction: OrderDirection,
    pub quantity: Decimal,
    pub kind: OrderKind,
    pub time_in_force: TimeInForce,
    pub broker_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        id: u64,
        instrument: Instrument,
        direction: OrderDirection,
        quantity: Decimal,
        kind: OrderKind,
    ) -> Self {
        Self {
            id,
            instrument,
            direction,
            quantity: quantity.abs(),
            kind,
            time_in_force: TimeInForce::default(),
            broker_ids: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn market(id: u64, instrument: Instrument, direction: OrderDirection, quantity: Decimal) -> Self {
        Self::new(id, instrument, direction, quantity, OrderKind::Market)
    }

    #[must_use]
    pub fn with_broker_id(mut self, broker_id: impl Into<String>) -> Self {
        self.broker_ids.push(broker_id.into());
        self
    }
}

/// Lifecycle states reported back to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    Submitted,
    PartiallyFilled,
    Filled,
    Canceled,
    Invalid,
}

/// Open order as reported by the exchange, normalized across market variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub broker_id: String,
    pub is_algo: bool,
    pub instrument: Instrument,
    pub direction: OrderDirection,
    /// Signed: positive for buys, negative for sells
    pub quantity: Decimal,
    pub executed_quantity: Decimal,
    pub kind: OrderKind,
    pub status: String,
    pub time: DateTime<Utc>,
}

/// Non-zero position held on the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub instrument: Instrument,
    pub average_price: Decimal,
    /// Signed: negative for short positions
    pub quantity: Decimal,
    pub market_price: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashAmount {
    pub amount: Decimal,
    pub currency: String,
}

/// Account balance line, shaped by the account type that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BalanceEntry {
    Spot {
        asset: String,
        free: Decimal,
        locked: Decimal,
    },
    Margin {
        asset: String,
        free: Decimal,
        locked: Decimal,
        borrowed: Decimal,
        interest: Decimal,
        net_asset: Decimal,
    },
    Futures {
        asset: String,
        wallet_balance: Decimal,
        available_balance: Decimal,
    },
}

impl BalanceEntry {
    pub fn asset(&self) -> &str {
        match self {
            Self::Spot { asset, .. } | Self::Margin { asset, .. } | Self::Futures { asset, .. } => {
                asset
            }
        }
    }

    /// Amount the host should see as cash for this asset.
    pub fn amount(&self) -> Decimal {
        match self {
            Self::Spot { free, locked, .. } => free + locked,
            Self::Margin { net_asset, .. } => *net_asset,
            Self::Futures { wallet_balance, .. } => *wallet_balance,
        }
    }

    pub fn to_cash(&self) -> CashAmount {
        CashAmount {
            amount: self.amount(),
            currency: self.asset().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    Tick,
    Second,
    Minute,
    Hour,
    Daily,
}

impl Resolution {
    /// Binance kline interval string, when one exists.
    pub fn as_binance_interval(self) -> Option<&'static str> {
        match self {
            Self::Minute => Some("1m"),
            Self::Hour => Some("1h"),
            Self::Daily => Some("1d"),
            Self::Tick | Self::Second => None,
        }
    }

    pub fn duration(self) -> chrono::Duration {
        match self {
            Self::Tick => chrono::Duration::zero(),
            Self::Second => chrono::Duration::seconds(1),
            Self::Minute => chrono::Duration::minutes(1),
            Self::Hour => chrono::Duration::hours(1),
            Self::Daily => chrono::Duration::days(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TickType {
    Trade,
    Quote,
    OpenInterest,
}

/// Market-data subscription requested by the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    pub instrument: Instrument,
    pub resolution: Resolution,
    pub tick_type: TickType,
}

impl Subscription {
    pub fn new(instrument: Instrument, resolution: Resolution, tick_type: TickType) -> Self {
        Self {
            instrument,
            resolution,
            tick_type,
        }
    }
}

/// Normalized market-data tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Tick {
    Trade {
        instrument: Instrument,
        time: DateTime<Utc>,
        price: Decimal,
        quantity: Decimal,
    },
    Quote {
        instrument: Instrument,
        time: DateTime<Utc>,
        bid_price: Decimal,
        bid_size: Decimal,
        ask_price: Decimal,
        ask_size: Decimal,
    },
}

impl Tick {
    pub fn instrument(&self) -> &Instrument {
        match self {
            Self::Trade { instrument, .. } | Self::Quote { instrument, .. } => instrument,
        }
    }

    pub fn tick_type(&self) -> TickType {
        match self {
            Self::Trade { .. } => TickType::Trade,
            Self::Quote { .. } => TickType::Quote,
        }
    }
}

/// Historical data request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRequest {
    pub instrument: Instrument,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub resolution: Resolution,
    pub tick_type: TickType,
}

/// One OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// 24h rolling statistics for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceChangeStatistics {
    pub symbol: String,
    pub last_price: Decimal,
    pub price_change_percent: Decimal,
    pub volume: Decimal,
    pub quote_volume: Decimal,
    /// Trade count, used as the subscription weight
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerPrice {
    pub symbol: String,
    pub price: Decimal,
}

/// Fill or status change reported back to the host for one of its orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: u64,
    pub instrument: Instrument,
    pub time: DateTime<Utc>,
    pub status: OrderStatus,
    pub direction: OrderDirection,
    pub fill_price: Decimal,
    /// Signed fill quantity
    pub fill_quantity: Decimal,
    pub fee: Decimal,
    pub fee_currency: Option<String>,
    pub message: String,
}

impl OrderEvent {
    /// Status-only event with no fill attached.
    pub fn status(order: &Order, status: OrderStatus, message: impl Into<String>) -> Self {
        Self {
            order_id: order.id,
            instrument: order.instrument.clone(),
            time: Utc::now(),
            status,
            direction: order.direction,
            fill_price: Decimal::ZERO,
            fill_quantity: Decimal::ZERO,
            fee: Decimal::ZERO,
            fee_currency: None,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Information,
    Warning,
    Error,
}

/// Everything the brokerage reports to the host outside of market data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BrokerageEvent {
    Order(OrderEvent),
    OrderIdChanged {
        order_id: u64,
        broker_ids: Vec<String>,
    },
    Message {
        kind: MessageKind,
        code: String,
        text: String,
    },
}

impl BrokerageEvent {
    pub fn warning(code: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Message {
            kind: MessageKind::Warning,
            code: code.into(),
            text: text.into(),
        }
    }

    pub fn error(code: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Message {
            kind: MessageKind::Error,
            code: code.into(),
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_direction_sign() {
        assert_eq!(OrderDirection::Buy.signed(dec!(1.5)), dec!(1.5));
        assert_eq!(OrderDirection::Sell.signed(dec!(1.5)), dec!(-1.5));
        assert_eq!(OrderDirection::Sell.signed(dec!(-2)), dec!(-2));
    }

    #[test]
    fn test_order_keeps_its_timestamp_through_json() {
        let order = Order::market(3, Instrument::crypto("BTCUSDT"), OrderDirection::Sell, dec!(2))
            .with_broker_id("17");
        let text = serde_json::to_string(&order).unwrap();
        let back: Order = serde_json::from_str(&text).unwrap();
        assert_eq!(back, order);
        assert_eq!(back.created_at, order.created_at);
    }

    #[test]
    fn test_balance_amount_per_variant() {
        let spot = BalanceEntry::Spot {
            asset: "BTC".into(),
            free: dec!(1),
            locked: dec!(0.5),
        };
        assert_eq!(spot.amount(), dec!(1.5));

        let margin = BalanceEntry::Margin {
            asset: "USDT".into(),
            free: dec!(100),
            locked: dec!(0),
            borrowed: dec!(40),
            interest: dec!(1),
            net_asset: dec!(59),
        };
        assert_eq!(margin.amount(), dec!(59));
        assert_eq!(margin.to_cash().currency, "USDT");
    }

    #[test]
    fn test_order_quantity_is_unsigned() {
        let order = Order::market(1, Instrument::crypto("btcusdt"), OrderDirection::Sell, dec!(-3));
        assert_eq!(order.quantity, dec!(3));
        assert_eq!(order.instrument.ticker, "BTCUSDT");
    }

    #[test]
    fn test_resolution_interval() {
        assert_eq!(Resolution::Minute.as_binance_interval(), Some("1m"));
        assert_eq!(Resolution::Tick.as_binance_interval(), None);
    }
}
