pub mod core;
pub mod exchanges;

pub use crate::core::{config::BrokerageConfig, errors::ExchangeError, types::*};
pub use crate::exchanges::binance::{
    AccountType, BinanceBrokerage, BrokerageStreams, HostContext, MarketVariant, PendingBrokerage,
};
