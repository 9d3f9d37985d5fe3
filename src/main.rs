use binance_brokerage::core::config::{BrokerageConfig, Venue};
use binance_brokerage::core::traits::{
    NoEntitlementCheck, OrderProvider, ReferencePrice, SecurityProvider,
};
use binance_brokerage::{
    AccountType, HostContext, Instrument, Order, PendingBrokerage, Resolution, Subscription,
    TickType,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// The demo places no orders, so it knows none.
struct NoOrders;

impl OrderProvider for NoOrders {
    fn order_by_broker_id(&self, _broker_id: &str) -> Option<Order> {
        None
    }
}

struct NoPrices;

impl SecurityProvider for NoPrices {
    fn reference_price(&self, _instrument: &Instrument) -> Option<ReferencePrice> {
        None
    }
}

#[cfg(feature = "env-file")]
fn load_config() -> BrokerageConfig {
    BrokerageConfig::from_env_file("BINANCE").unwrap_or_else(|e| {
        warn!("{}; continuing with public endpoints only", e);
        BrokerageConfig::read_only(Venue::Binance)
    })
}

#[cfg(not(feature = "env-file"))]
fn load_config() -> BrokerageConfig {
    BrokerageConfig::from_env("BINANCE").unwrap_or_else(|e| {
        warn!("{}; continuing with public endpoints only", e);
        BrokerageConfig::read_only(Venue::Binance)
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config();
    let account_type = match config.venue {
        Venue::Binance | Venue::BinanceUs => AccountType::Cash,
        Venue::BinanceUsdtFutures | Venue::BinanceCoinFutures => AccountType::Margin,
    };
    let has_credentials = config.has_credentials();

    let pending = PendingBrokerage::new(config, Arc::new(NoEntitlementCheck)).await?;
    let host = HostContext {
        orders: Arc::new(NoOrders),
        securities: Arc::new(NoPrices),
    };
    let (brokerage, mut streams) = pending.initialize(account_type, host).await?;

    let tickers = brokerage.get_tickers().await?;
    info!(count = tickers.len(), "tickers loaded");
    for ticker in tickers.iter().take(5) {
        info!(symbol = %ticker.symbol, price = %ticker.price);
    }

    if has_credentials {
        brokerage.connect().await?;
        for cash in brokerage.get_cash_balance().await? {
            info!(currency = %cash.currency, amount = %cash.amount, "cash");
        }
    }

    let instrument = Instrument::new(
        "BTCUSDT",
        brokerage.variant().security_type(),
        brokerage.variant().market(),
    );
    let subscription = Subscription::new(instrument, Resolution::Tick, TickType::Trade);
    brokerage.subscribe(&subscription).await?;

    let deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            () = &mut deadline => break,
            Some(tick) = streams.ticks.recv() => info!(?tick, "tick"),
            Some(event) = streams.events.recv() => info!(?event, "brokerage event"),
        }
    }

    brokerage.unsubscribe(&subscription).await?;
    brokerage.dispose().await?;
    Ok(())
}
