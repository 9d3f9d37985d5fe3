//! Tests against the public Binance endpoints. Run with `--ignored`.

mod common;

use binance_brokerage::core::config::{BrokerageConfig, Venue};
use binance_brokerage::core::traits::NoEntitlementCheck;
use binance_brokerage::{
    AccountType, HostContext, Instrument, PendingBrokerage, Resolution, Subscription, Tick,
    TickType,
};
use common::{FixedQuote, OrderBook};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

#[tokio::test]
#[ignore = "requires network access to Binance"]
async fn test_live_spot_trades_and_quotes_arrive() {
    let host = HostContext {
        orders: Arc::new(OrderBook::default()),
        securities: Arc::new(FixedQuote(None)),
    };
    let (brokerage, mut streams) = PendingBrokerage::new(
        BrokerageConfig::read_only(Venue::Binance),
        Arc::new(NoEntitlementCheck),
    )
    .await
    .unwrap()
    .initialize(AccountType::Cash, host)
    .await
    .unwrap();

    let instrument = Instrument::crypto("BTCUSDT");
    let trades = Subscription::new(instrument.clone(), Resolution::Tick, TickType::Trade);
    let quotes = Subscription::new(instrument.clone(), Resolution::Tick, TickType::Quote);
    assert!(brokerage.subscribe(&trades).await.unwrap());
    assert!(brokerage.subscribe(&quotes).await.unwrap());

    let (mut saw_trade, mut saw_quote) = (false, false);
    let collected = timeout(Duration::from_secs(30), async {
        while let Some(tick) = streams.ticks.recv().await {
            assert_eq!(tick.instrument(), &instrument);
            match tick {
                Tick::Trade { price, quantity, .. } => {
                    assert!(price > rust_decimal::Decimal::ZERO);
                    assert!(quantity > rust_decimal::Decimal::ZERO);
                    saw_trade = true;
                }
                Tick::Quote { bid_price, ask_price, .. } => {
                    assert!(bid_price <= ask_price);
                    saw_quote = true;
                }
            }
            if saw_trade && saw_quote {
                break;
            }
        }
    })
    .await;

    assert!(collected.is_ok(), "timed out waiting for ticks");
    assert!(saw_trade && saw_quote);

    assert!(brokerage.unsubscribe(&trades).await.unwrap());
    assert!(brokerage.unsubscribe(&quotes).await.unwrap());
    assert!(!brokerage.is_subscribed(&instrument).await);
    brokerage.dispose().await.unwrap();
}

#[tokio::test]
#[ignore = "requires network access to Binance"]
async fn test_live_tickers_load() {
    let host = HostContext {
        orders: Arc::new(OrderBook::default()),
        securities: Arc::new(FixedQuote(None)),
    };
    let (brokerage, _streams) = PendingBrokerage::new(
        BrokerageConfig::read_only(Venue::Binance),
        Arc::new(NoEntitlementCheck),
    )
    .await
    .unwrap()
    .initialize(AccountType::Cash, host)
    .await
    .unwrap();

    let tickers = timeout(Duration::from_secs(30), brokerage.get_tickers())
        .await
        .unwrap()
        .unwrap();
    assert!(tickers.iter().any(|t| t.symbol == "BTCUSDT"));
}
