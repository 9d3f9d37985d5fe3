mod account;
mod market_data;
mod trading;

use super::builder::{build_rest, resolve_endpoints, Endpoints};
use super::events::EventSink;
use super::fills::FillReconciler;
use super::rest::BinanceRestClient;
use super::session::{SessionTimings, UserDataSession};
use super::subscriptions::{PoolConfig, SubscriptionManager};
use super::variant::{AccountType, MarketVariant};
use crate::core::config::BrokerageConfig;
use crate::core::errors::ExchangeError;
use crate::core::kernel::HttpTransport;
use crate::core::traits::{EntitlementCheck, OrderProvider, SecurityProvider};
use crate::core::types::{BrokerageEvent, Tick};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, PoisonError};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Capacity of the tick channel handed to the host.
pub const TICK_BUFFER: usize = 10_000;

/// Host collaborators the brokerage reads from.
#[derive(Clone)]
pub struct HostContext {
    pub orders: Arc<dyn OrderProvider>,
    pub securities: Arc<dyn SecurityProvider>,
}

/// Receiving ends of everything the brokerage reports.
pub struct BrokerageStreams {
    pub events: mpsc::UnboundedReceiver<BrokerageEvent>,
    pub ticks: mpsc::Receiver<Tick>,
}

/// First phase: configuration checked and entitlement verified, but no
/// market variant chosen yet.
#[derive(Debug)]
pub struct PendingBrokerage {
    config: BrokerageConfig,
}

impl PendingBrokerage {
    /// Validate the config and run the entitlement check once.
    pub async fn new(
        config: BrokerageConfig,
        entitlement: Arc<dyn EntitlementCheck>,
    ) -> Result<Self, ExchangeError> {
        config.validate()?;
        entitlement.verify().await?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &BrokerageConfig {
        &self.config
    }

    /// Second phase: fix the market variant from the host's account type,
    /// load the exchange listing and hand back the live brokerage.
    pub async fn initialize(
        self,
        account_type: AccountType,
        host: HostContext,
    ) -> Result<(BinanceBrokerage, BrokerageStreams), ExchangeError> {
        self.initialize_with_transport(account_type, host, None).await
    }

    #[instrument(skip(self, host, transport), fields(venue = ?self.config.venue))]
    pub async fn initialize_with_transport(
        self,
        account_type: AccountType,
        host: HostContext,
        transport: Option<Arc<dyn HttpTransport>>,
    ) -> Result<(BinanceBrokerage, BrokerageStreams), ExchangeError> {
        let variant = MarketVariant::resolve(self.config.venue, account_type, self.config.testnet)?;
        let endpoints = resolve_endpoints(&self.config, variant);
        let cancel = CancellationToken::new();

        let (events, event_rx) = EventSink::channel();
        let (tick_tx, tick_rx) = mpsc::channel(TICK_BUFFER);

        let rest = build_rest(&self.config, variant, transport, cancel.clone())?;
        let client = Arc::new(BinanceRestClient::connect(rest, variant, events.clone()).await?);

        let order_lock = Arc::new(Mutex::new(()));
        let reconciler = Arc::new(FillReconciler::new(
            host.orders,
            events.clone(),
            Arc::clone(&order_lock),
        ));
        let subscriptions = SubscriptionManager::new(
            PoolConfig::new(endpoints.ws_url.clone(), self.config.max_websocket_connections),
            variant,
            Arc::clone(client.mapper()),
            events.clone(),
            tick_tx,
            cancel.child_token(),
        );

        info!(variant = variant.name(), rest = %endpoints.rest_url, "brokerage initialized");

        let brokerage = BinanceBrokerage {
            variant,
            endpoints,
            client,
            subscriptions,
            weights_loaded: AtomicBool::new(false),
            session: std::sync::Mutex::new(None),
            reconciler,
            securities: host.securities,
            order_lock,
            events,
            timings: SessionTimings::default(),
            cancel,
        };
        let streams = BrokerageStreams {
            events: event_rx,
            ticks: tick_rx,
        };
        Ok((brokerage, streams))
    }
}

/// Live brokerage for one market variant.
///
/// Owns the REST client and the subscription pool. The user-data session
/// exists between `connect` and `disconnect`. Order placement, cancellation
/// and fill handling are serialized on one lock.
pub struct BinanceBrokerage {
    variant: MarketVariant,
    endpoints: Endpoints,
    client: Arc<BinanceRestClient>,
    subscriptions: SubscriptionManager,
    weights_loaded: AtomicBool,
    session: std::sync::Mutex<Option<Arc<UserDataSession>>>,
    reconciler: Arc<FillReconciler>,
    securities: Arc<dyn SecurityProvider>,
    order_lock: Arc<Mutex<()>>,
    events: EventSink,
    timings: SessionTimings,
    cancel: CancellationToken,
}

impl BinanceBrokerage {
    pub fn variant(&self) -> MarketVariant {
        self.variant
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn client(&self) -> &Arc<BinanceRestClient> {
        &self.client
    }

    pub fn reconciler(&self) -> &Arc<FillReconciler> {
        &self.reconciler
    }

    /// Replace the session timers; takes effect on the next `connect`.
    #[must_use]
    pub fn with_session_timings(mut self, timings: SessionTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Open the user-data session. A no-op when already connected.
    #[instrument(skip(self), fields(variant = self.variant.name()))]
    pub async fn connect(&self) -> Result<(), ExchangeError> {
        if self.is_connected() {
            return Ok(());
        }
        if !self.client.rest().has_signer() {
            return Err(ExchangeError::AuthError(
                "API key and secret are required to connect".to_string(),
            ));
        }

        self.client.sync_server_time().await?;
        let session = UserDataSession::start(
            &self.client,
            &self.endpoints.ws_url,
            Arc::clone(&self.reconciler),
            self.timings,
            self.cancel.child_token(),
        )
        .await?;
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(session));
        info!("connected");
        Ok(())
    }

    /// Close the user-data socket and release the listen key.
    #[instrument(skip(self), fields(variant = self.variant.name()))]
    pub async fn disconnect(&self) -> Result<(), ExchangeError> {
        let session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            session.stop().await;
        }
        self.client.stop_session().await?;
        info!("disconnected");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|s| s.is_running())
    }

    /// Tear everything down: session, market sockets, in-flight retries.
    pub async fn dispose(&self) -> Result<(), ExchangeError> {
        let result = self.disconnect().await;
        self.subscriptions.shutdown().await;
        self.cancel.cancel();
        result
    }
}

impl Drop for BinanceBrokerage {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
