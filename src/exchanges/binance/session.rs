use super::codec::{BinanceCodec, BinanceMessage};
use super::events::EventSink;
use super::fills::FillReconciler;
use super::rest::BinanceRestClient;
use super::subscriptions::{ReconnectBackoff, FORCED_RECONNECT};
use super::variant::MarketVariant;
use crate::core::errors::ExchangeError;
use crate::core::kernel::{TungsteniteWs, WsSession};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Timers driving the user-data session.
#[derive(Debug, Clone, Copy)]
pub struct SessionTimings {
    pub keepalive: Duration,
    pub reconnect_after: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            keepalive: KEEPALIVE_INTERVAL,
            reconnect_after: FORCED_RECONNECT,
        }
    }
}

/// User-data stream supervisor.
///
/// Owns the listen-key socket: a keepalive every 30 minutes, an
/// unconditional recycle at the forced horizon (old key closed, new key
/// created) and reconnects with a fresh listen key whenever the socket
/// drops. Executions are handed to
/// the [`FillReconciler`] one at a time, in arrival order.
pub struct UserDataSession {
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl UserDataSession {
    /// Allocate the listen key and start the supervisor. Fails if the key
    /// cannot be created; later failures are reported as events.
    #[instrument(skip_all, fields(variant = client.variant().name()))]
    pub async fn start(
        client: &Arc<BinanceRestClient>,
        ws_url: &str,
        reconciler: Arc<FillReconciler>,
        timings: SessionTimings,
        cancel: CancellationToken,
    ) -> Result<Self, ExchangeError> {
        let listen_key = client.create_listen_key().await?;
        let supervisor = Supervisor {
            client: Arc::downgrade(client),
            events: client.events().clone(),
            variant: client.variant(),
            ws_url: ws_url.trim_end_matches('/').to_string(),
            reconciler,
            timings,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(supervisor.run(listen_key));
        Ok(Self {
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stop the supervisor and wait for its socket to close.
    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                warn!("user-data supervisor ended abnormally: {}", e);
            }
        }
    }
}

enum Exit {
    Stop,
    Recycle,
    Dropped,
}

struct Supervisor {
    /// Non-owning; the facade owns the client
    client: Weak<BinanceRestClient>,
    events: EventSink,
    variant: MarketVariant,
    ws_url: String,
    reconciler: Arc<FillReconciler>,
    timings: SessionTimings,
    cancel: CancellationToken,
}

impl Supervisor {
    async fn run(self, first_key: String) {
        let mut pending_key = Some(first_key);
        let mut backoff = ReconnectBackoff::new();

        loop {
            if self.client.strong_count() == 0 {
                return;
            }
            let exit = match self.listen_key(pending_key.take()).await {
                Some(key) => self.session(&key, &mut backoff).await,
                None => Exit::Dropped,
            };

            match exit {
                Exit::Stop => return,
                Exit::Recycle => {
                    info!("user-data socket recycled");
                    self.release_listen_key().await;
                }
                Exit::Dropped => {
                    let delay = backoff.next_delay();
                    warn!(?delay, "user-data socket down, reconnecting");
                    tokio::select! {
                        () = self.cancel.cancelled() => return,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
            if self.cancel.is_cancelled() {
                return;
            }
        }
    }

    /// The given key, or a freshly created one.
    async fn listen_key(&self, key: Option<String>) -> Option<String> {
        if key.is_some() {
            return key;
        }
        let client = self.client.upgrade()?;
        match client.create_listen_key().await {
            Ok(key) => Some(key),
            Err(e) => {
                self.events
                    .warning("ListenKey", format!("Could not create listen key: {}", e));
                None
            }
        }
    }

    async fn session(&self, key: &str, backoff: &mut ReconnectBackoff) -> Exit {
        let mut ws = TungsteniteWs::new(
            format!("{}/ws/{}", self.ws_url, key),
            "binance-user-data".to_string(),
            BinanceCodec::new(self.variant),
        );
        if let Err(e) = ws.connect().await {
            self.events
                .warning("UserDataStream", format!("Connect failed: {}", e));
            return Exit::Dropped;
        }
        info!("user-data socket connected");
        backoff.reset();

        let exit = self.pump(&mut ws).await;
        let _ = ws.close().await;
        exit
    }

    async fn pump(&self, ws: &mut TungsteniteWs<BinanceCodec>) -> Exit {
        let horizon = tokio::time::sleep(self.timings.reconnect_after);
        tokio::pin!(horizon);
        let mut keepalive = interval_at(
            Instant::now() + self.timings.keepalive,
            self.timings.keepalive,
        );

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return Exit::Stop,
                () = &mut horizon => return Exit::Recycle,
                _ = keepalive.tick() => self.keep_alive().await,
                message = ws.next_message() => match message {
                    None => return Exit::Dropped,
                    Some(Ok(BinanceMessage::Execution(execution))) => {
                        self.reconciler.on_execution(&execution).await;
                    }
                    Some(Ok(BinanceMessage::ListenKeyExpired)) => {
                        warn!("listen key expired");
                        return Exit::Dropped;
                    }
                    Some(Ok(BinanceMessage::Error(detail))) => {
                        self.events.warning("UserDataStream", detail);
                    }
                    Some(Ok(BinanceMessage::Trade(_) | BinanceMessage::Quote(_))) => {}
                    Some(Err(ExchangeError::DeserializationError(detail))) => {
                        self.events.error("UserDataDecode", detail);
                    }
                    Some(Err(e)) => {
                        warn!("user-data socket error: {}", e);
                        return Exit::Dropped;
                    }
                },
            }
        }
    }

    /// Close the current key so the recycle starts from a fresh one.
    async fn release_listen_key(&self) {
        let Some(client) = self.client.upgrade() else {
            return;
        };
        if let Err(e) = client.stop_session().await {
            self.events
                .warning("ListenKey", format!("Could not close listen key: {}", e));
        }
    }

    /// Failures are reported, not fatal; the next tick retries.
    async fn keep_alive(&self) {
        let Some(client) = self.client.upgrade() else {
            return;
        };
        if let Err(e) = client.session_keep_alive().await {
            self.events
                .warning("KeepAlive", format!("Listen key keepalive failed: {}", e));
        }
    }
}
