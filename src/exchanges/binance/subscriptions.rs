use super::codec::{symbol_streams, BinanceCodec, BinanceMessage};
use super::converters::{convert_book_ticker, convert_trade};
use super::events::EventSink;
use super::symbols::SymbolMapper;
use super::variant::MarketVariant;
use crate::core::errors::ExchangeError;
use crate::core::kernel::{RateGate, TungsteniteWs, WsSession};
use crate::core::types::{Instrument, Subscription, Tick, TickType};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// Exchange ceiling on streams per socket.
pub const MAX_STREAMS_PER_CONNECTION: usize = 1024;
/// Trade channel plus book ticker.
pub const STREAMS_PER_SYMBOL: usize = 2;
pub const MAX_SYMBOLS_PER_CONNECTION: usize = MAX_STREAMS_PER_CONNECTION / STREAMS_PER_SYMBOL;
pub const DEFAULT_MAX_CONNECTIONS: usize = 4;
/// Sockets are recycled just before the exchange's 24h connection limit.
pub const FORCED_RECONNECT: Duration = Duration::from_secs(23 * 3600 + 30 * 60);

/// Doubling reconnect delay, 1s up to 60s.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    current: Duration,
}

impl ReconnectBackoff {
    const INITIAL: Duration = Duration::from_secs(1);
    const MAX: Duration = Duration::from_secs(60);

    pub fn new() -> Self {
        Self {
            current: Self::INITIAL,
        }
    }

    /// Delay to wait now; doubles the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(Self::MAX);
        delay
    }

    pub fn reset(&mut self) {
        self.current = Self::INITIAL;
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Load of one pooled connection, as seen by the allocator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionLoad {
    pub symbols: usize,
    pub weight: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Existing(usize),
    New,
}

/// Where the next symbol goes: an idle connection first, then a new one
/// while under `max_connections`, then the lightest connection with room.
/// `None` when every connection is full.
pub fn select_connection(
    loads: &[ConnectionLoad],
    max_connections: usize,
    max_symbols: usize,
) -> Option<Placement> {
    if let Some(idle) = loads.iter().position(|l| l.symbols == 0) {
        return Some(Placement::Existing(idle));
    }
    if loads.len() < max_connections {
        return Some(Placement::New);
    }
    loads
        .iter()
        .enumerate()
        .filter(|(_, l)| l.symbols < max_symbols)
        .min_by_key(|(_, l)| (l.weight, l.symbols))
        .map(|(i, _)| Placement::Existing(i))
}

/// Pool settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Base stream URL; `/ws` is appended
    pub ws_url: String,
    pub max_connections: usize,
    pub max_symbols_per_connection: usize,
    pub reconnect_after: Duration,
}

impl PoolConfig {
    pub fn new(ws_url: impl Into<String>, max_connections: Option<usize>) -> Self {
        Self {
            ws_url: ws_url.into(),
            max_connections: max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS).max(1),
            max_symbols_per_connection: MAX_SYMBOLS_PER_CONNECTION,
            reconnect_after: FORCED_RECONNECT,
        }
    }
}

enum Command {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

/// Tick types the host currently wants, per wire symbol. Read on every
/// inbound frame, written on subscribe/unsubscribe.
type ActiveSet = Arc<RwLock<HashMap<String, HashSet<TickType>>>>;

struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    symbols: HashSet<String>,
    weight: u64,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    fn load(&self) -> ConnectionLoad {
        ConnectionLoad {
            symbols: self.symbols.len(),
            weight: self.weight,
        }
    }
}

#[derive(Default)]
struct PoolState {
    connections: Vec<ConnectionHandle>,
    /// Wire symbol → index of the connection carrying it
    placement: HashMap<String, usize>,
    /// Host subscriptions per (wire symbol, tick type)
    refs: HashMap<(String, TickType), usize>,
}

/// Everything a connection task needs, shared across the pool.
#[derive(Clone)]
struct ConnectionContext {
    url: String,
    variant: MarketVariant,
    mapper: Arc<SymbolMapper>,
    events: EventSink,
    ticks: mpsc::Sender<Tick>,
    gate: Arc<RateGate>,
    active: ActiveSet,
    cancel: CancellationToken,
    reconnect_after: Duration,
}

/// Fans market-data subscriptions out over a bounded pool of sockets.
///
/// Each symbol lives on exactly one connection and costs two streams. Host
/// subscriptions are reference counted per symbol and tick type, so
/// control frames go out only on the first subscribe and the last
/// unsubscribe of a symbol. Ticks flow into one bounded channel.
pub struct SubscriptionManager {
    config: PoolConfig,
    context: ConnectionContext,
    weights: RwLock<HashMap<String, u64>>,
    state: Mutex<PoolState>,
}

impl SubscriptionManager {
    pub fn new(
        config: PoolConfig,
        variant: MarketVariant,
        mapper: Arc<SymbolMapper>,
        events: EventSink,
        ticks: mpsc::Sender<Tick>,
        cancel: CancellationToken,
    ) -> Self {
        let context = ConnectionContext {
            url: format!("{}/ws", config.ws_url.trim_end_matches('/')),
            variant,
            mapper,
            events,
            ticks,
            gate: Arc::new(RateGate::ws_control_default()),
            active: ActiveSet::default(),
            cancel,
            reconnect_after: config.reconnect_after,
        };
        Self {
            config,
            context,
            weights: RwLock::new(HashMap::new()),
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Per-symbol traffic weights (24h trade counts) used for placement.
    pub fn set_weights(&self, weights: HashMap<String, u64>) {
        *self.weights.write().unwrap_or_else(PoisonError::into_inner) = weights;
    }

    fn weight_of(&self, symbol: &str) -> u64 {
        self.weights
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .copied()
            .unwrap_or_default()
    }

    /// Start delivering ticks for a subscription. Returns `false` when the
    /// pool has no room left for a new symbol.
    #[instrument(skip(self), fields(variant = self.context.variant.name(), ticker = %subscription.instrument.ticker))]
    pub async fn subscribe(&self, subscription: &Subscription) -> Result<bool, ExchangeError> {
        let symbol = self.validate(subscription)?;
        let mut state = self.state.lock().await;

        let placed = state.placement.contains_key(&symbol);
        if !placed {
            let loads: Vec<ConnectionLoad> =
                state.connections.iter().map(ConnectionHandle::load).collect();
            let Some(placement) = select_connection(
                &loads,
                self.config.max_connections,
                self.config.max_symbols_per_connection,
            ) else {
                self.context.events.warning(
                    "SubscriptionLimit",
                    format!(
                        "Cannot subscribe {}: all {} connections are full",
                        symbol, self.config.max_connections
                    ),
                );
                return Ok(false);
            };

            let streams = symbol_streams(self.context.variant, &symbol).to_vec();
            let index = match placement {
                Placement::Existing(index) => {
                    if state.connections[index]
                        .commands
                        .send(Command::Subscribe(streams))
                        .is_err()
                    {
                        warn!(symbol = %symbol, connection = index, "connection task gone, subscribe not sent");
                    }
                    index
                }
                Placement::New => {
                    let index = state.connections.len();
                    state.connections.push(self.spawn_connection(index, streams));
                    index
                }
            };

            let weight = self.weight_of(&symbol);
            let connection = &mut state.connections[index];
            connection.symbols.insert(symbol.clone());
            connection.weight += weight;
            state.placement.insert(symbol.clone(), index);
            debug!(symbol = %symbol, connection = index, "symbol placed");
        }

        *state
            .refs
            .entry((symbol.clone(), subscription.tick_type))
            .or_default() += 1;
        self.context
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(symbol)
            .or_default()
            .insert(subscription.tick_type);
        Ok(true)
    }

    /// Stop one subscription. The symbol's streams are released once no
    /// subscription of any tick type remains.
    #[instrument(skip(self), fields(variant = self.context.variant.name(), ticker = %subscription.instrument.ticker))]
    pub async fn unsubscribe(&self, subscription: &Subscription) -> Result<bool, ExchangeError> {
        let symbol = self.validate(subscription)?;
        let mut state = self.state.lock().await;

        let key = (symbol.clone(), subscription.tick_type);
        let Some(count) = state.refs.get_mut(&key) else {
            return Ok(false);
        };
        *count -= 1;
        if *count > 0 {
            return Ok(true);
        }
        state.refs.remove(&key);

        let still_wanted = {
            let mut active = self
                .context
                .active
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            match active.get_mut(&symbol) {
                Some(types) => {
                    types.remove(&subscription.tick_type);
                    if types.is_empty() {
                        active.remove(&symbol);
                        false
                    } else {
                        true
                    }
                }
                None => false,
            }
        };

        if !still_wanted {
            if let Some(index) = state.placement.remove(&symbol) {
                let weight = self.weight_of(&symbol);
                let connection = &mut state.connections[index];
                connection.symbols.remove(&symbol);
                connection.weight = connection.weight.saturating_sub(weight);
                let streams = symbol_streams(self.context.variant, &symbol).to_vec();
                if connection.commands.send(Command::Unsubscribe(streams)).is_err() {
                    warn!(symbol = %symbol, connection = index, "connection task gone, unsubscribe not sent");
                }
                debug!(symbol = %symbol, connection = index, "symbol released");
            }
        }
        Ok(true)
    }

    pub async fn is_subscribed(&self, instrument: &Instrument) -> bool {
        match self.context.mapper.to_brokerage_symbol(instrument) {
            Ok(symbol) => self.state.lock().await.placement.contains_key(&symbol),
            Err(_) => false,
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.connections.len()
    }

    /// Stop every connection task and wait for them to close.
    pub async fn shutdown(&self) {
        self.context.cancel.cancel();
        let connections = {
            let mut state = self.state.lock().await;
            state.placement.clear();
            state.refs.clear();
            std::mem::take(&mut state.connections)
        };
        self.context
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        for connection in connections {
            if let Err(e) = connection.task.await {
                warn!("connection task ended abnormally: {}", e);
            }
        }
    }

    fn validate(&self, subscription: &Subscription) -> Result<String, ExchangeError> {
        if !matches!(subscription.tick_type, TickType::Trade | TickType::Quote) {
            return Err(ExchangeError::Unsupported(format!(
                "{:?} ticks are not streamed",
                subscription.tick_type
            )));
        }
        self.context
            .mapper
            .to_brokerage_symbol(&subscription.instrument)
    }

    fn spawn_connection(&self, index: usize, initial: Vec<String>) -> ConnectionHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let context = self.context.clone();
        let task = tokio::spawn(run_connection(context, index, initial, rx));
        ConnectionHandle {
            commands: tx,
            symbols: HashSet::new(),
            weight: 0,
            task,
        }
    }
}

enum Exit {
    Stop,
    Recycle,
    Dropped,
}

/// Own one socket for its whole life: connect, replay streams, pump
/// frames, recycle on the forced horizon, reconnect on drops.
async fn run_connection(
    context: ConnectionContext,
    index: usize,
    initial: Vec<String>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut streams: Vec<String> = initial;
    let mut backoff = ReconnectBackoff::new();
    let name = format!("{}#{}", context.variant.name(), index);

    loop {
        let mut ws = TungsteniteWs::new(
            context.url.clone(),
            name.clone(),
            BinanceCodec::new(context.variant),
        );

        let exit = match ws.connect().await {
            Ok(()) => {
                info!(connection = %name, streams = streams.len(), "market socket connected");
                backoff.reset();
                pump(&context, &name, &mut ws, &mut streams, &mut commands).await
            }
            Err(e) => {
                context
                    .events
                    .warning("WebSocketError", format!("{} connect failed: {}", name, e));
                Exit::Dropped
            }
        };
        let _ = ws.close().await;

        match exit {
            Exit::Stop => return,
            Exit::Recycle => info!(connection = %name, "forced reconnect"),
            Exit::Dropped => {
                let delay = backoff.next_delay();
                warn!(connection = %name, ?delay, "market socket down, reconnecting");
                tokio::select! {
                    () = context.cancel.cancelled() => return,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

async fn pump(
    context: &ConnectionContext,
    name: &str,
    ws: &mut TungsteniteWs<BinanceCodec>,
    streams: &mut Vec<String>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> Exit {
    if !streams.is_empty() {
        context.gate.acquire().await;
        if let Err(e) = ws.subscribe(streams.as_slice()).await {
            warn!(connection = %name, "stream replay failed: {}", e);
            return Exit::Dropped;
        }
    }

    let horizon = tokio::time::sleep(context.reconnect_after);
    tokio::pin!(horizon);

    loop {
        tokio::select! {
            () = context.cancel.cancelled() => return Exit::Stop,
            () = &mut horizon => return Exit::Recycle,
            command = commands.recv() => {
                let Some(command) = command else {
                    return Exit::Stop;
                };
                context.gate.acquire().await;
                let sent = match command {
                    Command::Subscribe(added) => {
                        let sent = ws.subscribe(added.as_slice()).await;
                        streams.extend(added);
                        sent
                    }
                    Command::Unsubscribe(removed) => {
                        streams.retain(|s| !removed.contains(s));
                        ws.unsubscribe(removed.as_slice()).await
                    }
                };
                if let Err(e) = sent {
                    warn!(connection = %name, "control frame failed: {}", e);
                    return Exit::Dropped;
                }
            }
            message = ws.next_message() => match message {
                None => return Exit::Dropped,
                Some(Ok(message)) => deliver(context, message).await,
                Some(Err(ExchangeError::DeserializationError(detail))) => {
                    context.events.error("WebSocketDecode", format!("{}: {}", name, detail));
                }
                Some(Err(e)) => {
                    warn!(connection = %name, "market socket error: {}", e);
                    return Exit::Dropped;
                }
            },
        }
    }
}

async fn deliver(context: &ConnectionContext, message: BinanceMessage) {
    let tick = match message {
        BinanceMessage::Trade(event) => convert_trade(&event, &context.mapper),
        BinanceMessage::Quote(event) => convert_book_ticker(&event, &context.mapper),
        BinanceMessage::Error(detail) => {
            context.events.warning("WebSocketError", detail);
            return;
        }
        BinanceMessage::Execution(_) | BinanceMessage::ListenKeyExpired => return,
    };
    let tick = match tick {
        Ok(tick) => tick,
        Err(e) => {
            trace!("tick for unmapped symbol skipped: {}", e);
            return;
        }
    };

    let wanted = {
        let ticker = &tick.instrument().ticker;
        let active = context.active.read().unwrap_or_else(PoisonError::into_inner);
        context
            .mapper
            .to_brokerage_symbol(tick.instrument())
            .ok()
            .and_then(|symbol| active.get(&symbol).map(|types| types.contains(&tick.tick_type())))
            .unwrap_or_else(|| {
                trace!(ticker = %ticker, "tick for inactive symbol dropped");
                false
            })
    };
    if wanted && context.ticks.send(tick).await.is_err() {
        trace!("tick receiver dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(symbols: usize, weight: u64) -> ConnectionLoad {
        ConnectionLoad { symbols, weight }
    }

    #[test]
    fn test_symbols_per_connection() {
        assert_eq!(MAX_SYMBOLS_PER_CONNECTION, 512);
        assert_eq!(FORCED_RECONNECT, Duration::from_secs(84_600));
    }

    #[test]
    fn test_select_prefers_idle_then_new() {
        assert_eq!(select_connection(&[], 4, 512), Some(Placement::New));
        assert_eq!(
            select_connection(&[load(3, 10), load(0, 0)], 4, 512),
            Some(Placement::Existing(1))
        );
        assert_eq!(
            select_connection(&[load(3, 10), load(1, 5)], 4, 512),
            Some(Placement::New)
        );
    }

    #[test]
    fn test_select_lightest_when_at_max() {
        let loads = [load(10, 900), load(12, 100), load(2, 5_000)];
        assert_eq!(select_connection(&loads, 3, 512), Some(Placement::Existing(1)));
    }

    #[test]
    fn test_select_skips_full_connections() {
        let loads = [load(512, 1), load(5, 1_000)];
        assert_eq!(select_connection(&loads, 2, 512), Some(Placement::Existing(1)));
        assert_eq!(select_connection(&[load(512, 1), load(512, 2)], 2, 512), None);
    }

    #[test]
    fn test_backoff_doubles_to_cap() {
        let mut backoff = ReconnectBackoff::new();
        let delays: Vec<u64> = (0..8).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }
}
