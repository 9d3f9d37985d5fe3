use crate::core::config::Venue;
use crate::core::errors::ExchangeError;
use crate::core::types::{market, SecurityType};
use serde::{Deserialize, Serialize};

/// Account type chosen by the host's portfolio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountType {
    Cash,
    Margin,
}

/// API surface the brokerage talks to. Fixes endpoint prefixes, account
/// payload shape and which order types are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketVariant {
    Spot,
    CrossMargin,
    UsdtFutures,
    CoinFutures,
    UsSpot,
}

impl MarketVariant {
    /// Pick the variant for a venue and the host's account type.
    ///
    /// Fails for combinations the exchange does not offer, and for testnet
    /// on surfaces that have no testnet.
    pub fn resolve(
        venue: Venue,
        account_type: AccountType,
        testnet: bool,
    ) -> Result<Self, ExchangeError> {
        let variant = match (venue, account_type) {
            (Venue::Binance, AccountType::Cash) => Self::Spot,
            (Venue::Binance, AccountType::Margin) => Self::CrossMargin,
            (Venue::BinanceUs, AccountType::Cash) => Self::UsSpot,
            (Venue::BinanceUs, AccountType::Margin) => {
                return Err(ExchangeError::ConfigurationError(
                    "Binance.US does not offer margin accounts".to_string(),
                ))
            }
            (Venue::BinanceUsdtFutures, AccountType::Margin) => Self::UsdtFutures,
            (Venue::BinanceCoinFutures, AccountType::Margin) => Self::CoinFutures,
            (Venue::BinanceUsdtFutures | Venue::BinanceCoinFutures, AccountType::Cash) => {
                return Err(ExchangeError::ConfigurationError(
                    "Futures brokerages require a margin account".to_string(),
                ))
            }
        };

        if testnet && !variant.has_testnet() {
            return Err(ExchangeError::ConfigurationError(format!(
                "{} has no testnet",
                variant.name()
            )));
        }
        Ok(variant)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Spot => "binance-spot",
            Self::CrossMargin => "binance-margin",
            Self::UsdtFutures => "binance-usdt-futures",
            Self::CoinFutures => "binance-coin-futures",
            Self::UsSpot => "binance-us",
        }
    }

    pub fn has_testnet(self) -> bool {
        matches!(self, Self::Spot | Self::UsdtFutures | Self::CoinFutures)
    }

    pub fn is_futures(self) -> bool {
        matches!(self, Self::UsdtFutures | Self::CoinFutures)
    }

    pub fn security_type(self) -> SecurityType {
        if self.is_futures() {
            SecurityType::CryptoFuture
        } else {
            SecurityType::Crypto
        }
    }

    pub fn market(self) -> &'static str {
        match self {
            Self::UsSpot => market::BINANCE_US,
            _ => market::BINANCE,
        }
    }

    pub fn rest_url(self, testnet: bool) -> &'static str {
        match (self, testnet) {
            (Self::Spot, true) => "https://testnet.binance.vision",
            (Self::Spot | Self::CrossMargin, _) => "https://api.binance.com",
            (Self::UsdtFutures, true) | (Self::CoinFutures, true) => {
                "https://testnet.binancefuture.com"
            }
            (Self::UsdtFutures, false) => "https://fapi.binance.com",
            (Self::CoinFutures, false) => "https://dapi.binance.com",
            (Self::UsSpot, _) => "https://api.binance.us",
        }
    }

    pub fn ws_url(self, testnet: bool) -> &'static str {
        match (self, testnet) {
            (Self::Spot, true) => "wss://stream.testnet.binance.vision",
            (Self::Spot | Self::CrossMargin, _) => "wss://stream.binance.com:9443",
            (Self::UsdtFutures, true) => "wss://fstream.binancefuture.com",
            (Self::UsdtFutures, false) => "wss://fstream.binance.com",
            (Self::CoinFutures, true) => "wss://dstream.binancefuture.com",
            (Self::CoinFutures, false) => "wss://dstream.binance.com",
            (Self::UsSpot, _) => "wss://stream.binance.us:9443",
        }
    }

    /// Prefix for market-data endpoints. Margin trades spot markets.
    pub fn market_data_prefix(self) -> &'static str {
        match self {
            Self::Spot | Self::CrossMargin | Self::UsSpot => "/api/v3",
            Self::UsdtFutures => "/fapi/v1",
            Self::CoinFutures => "/dapi/v1",
        }
    }

    pub fn exchange_info_endpoint(self) -> String {
        format!("{}/exchangeInfo", self.market_data_prefix())
    }

    pub fn time_endpoint(self) -> String {
        format!("{}/time", self.market_data_prefix())
    }

    pub fn klines_endpoint(self) -> String {
        format!("{}/klines", self.market_data_prefix())
    }

    pub fn ticker_24hr_endpoint(self) -> String {
        format!("{}/ticker/24hr", self.market_data_prefix())
    }

    pub fn ticker_price_endpoint(self) -> String {
        format!("{}/ticker/price", self.market_data_prefix())
    }

    pub fn account_endpoint(self) -> &'static str {
        match self {
            Self::Spot | Self::UsSpot => "/api/v3/account",
            Self::CrossMargin => "/sapi/v1/margin/account",
            Self::UsdtFutures => "/fapi/v2/account",
            Self::CoinFutures => "/dapi/v1/account",
        }
    }

    pub fn order_endpoint(self) -> &'static str {
        match self {
            Self::Spot | Self::UsSpot => "/api/v3/order",
            Self::CrossMargin => "/sapi/v1/margin/order",
            Self::UsdtFutures => "/fapi/v1/order",
            Self::CoinFutures => "/dapi/v1/order",
        }
    }

    pub fn open_orders_endpoint(self) -> &'static str {
        match self {
            Self::Spot | Self::UsSpot => "/api/v3/openOrders",
            Self::CrossMargin => "/sapi/v1/margin/openOrders",
            Self::UsdtFutures => "/fapi/v1/openOrders",
            Self::CoinFutures => "/dapi/v1/openOrders",
        }
    }

    /// Conditional-order endpoint, where the variant routes stops separately.
    pub fn algo_order_endpoint(self) -> Option<&'static str> {
        match self {
            Self::UsdtFutures => Some("/fapi/v1/algoOrder"),
            _ => None,
        }
    }

    pub fn open_algo_orders_endpoint(self) -> Option<&'static str> {
        match self {
            Self::UsdtFutures => Some("/fapi/v1/openAlgoOrders"),
            _ => None,
        }
    }

    pub fn user_data_stream_endpoint(self) -> &'static str {
        match self {
            Self::Spot | Self::UsSpot => "/api/v3/userDataStream",
            Self::CrossMargin => "/sapi/v1/userDataStream",
            Self::UsdtFutures => "/fapi/v1/listenKey",
            Self::CoinFutures => "/dapi/v1/listenKey",
        }
    }

    /// Trade stream channel name.
    pub fn trade_channel(self) -> &'static str {
        if self.is_futures() {
            "aggTrade"
        } else {
            "trade"
        }
    }

    /// Most bars the klines endpoint returns per call.
    pub fn max_klines_per_request(self) -> usize {
        if self.is_futures() {
            1500
        } else {
            1000
        }
    }
}
