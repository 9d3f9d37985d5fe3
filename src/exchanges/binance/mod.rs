pub mod builder;
pub mod codec;
pub mod connector;
pub mod converters;
pub mod events;
pub mod fills;
pub mod history;
pub mod rest;
pub mod session;
pub mod subscriptions;
pub mod symbols;
pub mod trading;
pub mod types;
pub mod variant;

pub use codec::{BinanceCodec, BinanceMessage};
pub use connector::{BinanceBrokerage, BrokerageStreams, HostContext, PendingBrokerage};
pub use rest::BinanceRestClient;
pub use session::{SessionTimings, UserDataSession};
pub use subscriptions::SubscriptionManager;
pub use symbols::SymbolMapper;
pub use variant::{AccountType, MarketVariant};
