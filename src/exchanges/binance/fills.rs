use super::converters::{convert_order_status, millis_to_datetime, parse_side};
use super::events::EventSink;
use super::types::Execution;
use crate::core::traits::OrderProvider;
use crate::core::types::{Order, OrderEvent, OrderStatus};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Turns user-data executions into host order events.
///
/// Shares the order lock with order placement and cancellation so a fill
/// never races the call that created its order. Orders accepted through
/// this brokerage are recorded here before the lock is released, so their
/// fills match even while the host has not yet seen the broker id. No
/// deduplication: a redelivered execution produces a second event.
pub struct FillReconciler {
    orders: Arc<dyn OrderProvider>,
    placed: std::sync::Mutex<HashMap<String, Order>>,
    events: EventSink,
    order_lock: Arc<Mutex<()>>,
}

impl FillReconciler {
    pub fn new(
        orders: Arc<dyn OrderProvider>,
        events: EventSink,
        order_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            orders,
            placed: std::sync::Mutex::new(HashMap::new()),
            events,
            order_lock,
        }
    }

    /// Remember an order the exchange just accepted under `broker_id`.
    /// Call with the order lock held.
    pub fn track(&self, broker_id: String, order: &Order) {
        let mut order = order.clone();
        order.broker_ids = vec![broker_id.clone()];
        self.placed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(broker_id, order);
    }

    /// Drop the record of an order that can no longer fill.
    pub fn forget(&self, broker_ids: &[String]) {
        let mut placed = self.placed.lock().unwrap_or_else(PoisonError::into_inner);
        for id in broker_ids {
            placed.remove(id);
        }
    }

    pub fn tracked(&self) -> usize {
        self.placed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub async fn on_execution(&self, execution: &Execution) -> Option<OrderEvent> {
        let _guard = self.order_lock.lock().await;
        let event = self.reconcile(execution)?;
        self.events.order(event.clone());
        Some(event)
    }

    /// Host order event for an execution, or `None` when the order is not
    /// one the host placed.
    pub fn reconcile(&self, execution: &Execution) -> Option<OrderEvent> {
        let Some(order) = self.find_order(execution) else {
            error!(
                order_id = %execution.order_id,
                algo_id = ?execution.algo_order_id,
                symbol = %execution.symbol,
                "fill for unknown order dropped"
            );
            return None;
        };

        let direction = match parse_side(&execution.side) {
            Ok(direction) => direction,
            Err(e) => {
                error!(order_id = order.id, "unreadable fill: {}", e);
                return None;
            }
        };

        debug!(
            order_id = order.id,
            broker_id = %execution.order_id,
            status = %execution.order_status,
            "execution reconciled"
        );

        let status = convert_order_status(&execution.order_status);
        if matches!(
            status,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Invalid
        ) {
            self.forget(&order.broker_ids);
        }

        Some(OrderEvent {
            order_id: order.id,
            instrument: order.instrument,
            time: millis_to_datetime(execution.transaction_time),
            status,
            direction,
            fill_price: execution.last_price,
            fill_quantity: direction.signed(execution.last_quantity),
            fee: execution.fee,
            fee_currency: execution.fee_currency.clone(),
            message: String::new(),
        })
    }

    /// Conditional orders are booked under their algo id; the fill carries
    /// the id of the order the trigger spawned as well.
    fn find_order(&self, execution: &Execution) -> Option<Order> {
        let algo_id = execution.real_algo_id();
        {
            let placed = self.placed.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(order) = algo_id
                .and_then(|id| placed.get(id))
                .or_else(|| placed.get(&execution.order_id))
            {
                return Some(order.clone());
            }
        }
        algo_id
            .and_then(|id| self.orders.order_by_broker_id(id))
            .or_else(|| self.orders.order_by_broker_id(&execution.order_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{
        BrokerageEvent, Instrument, OrderDirection, OrderKind, OrderStatus,
    };
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    struct Book(HashMap<String, Order>);

    impl OrderProvider for Book {
        fn order_by_broker_id(&self, broker_id: &str) -> Option<Order> {
            self.0.get(broker_id).cloned()
        }
    }

    fn execution(order_id: &str, algo: Option<&str>, side: &str) -> Execution {
        Execution {
            order_id: order_id.to_string(),
            algo_order_id: algo.map(str::to_string),
            symbol: "BTCUSDT".to_string(),
            execution_type: "TRADE".to_string(),
            order_status: "PARTIALLY_FILLED".to_string(),
            transaction_time: 1_700_000_000_000,
            last_price: dec!(100),
            last_quantity: dec!(0.25),
            side: side.to_string(),
            fee: Decimal::ZERO,
            fee_currency: None,
        }
    }

    fn reconciler(orders: Vec<Order>) -> (FillReconciler, tokio::sync::mpsc::UnboundedReceiver<BrokerageEvent>) {
        let book = orders
            .into_iter()
            .map(|o| (o.broker_ids[0].clone(), o))
            .collect();
        let (events, rx) = EventSink::channel();
        (
            FillReconciler::new(Arc::new(Book(book)), events, Arc::new(Mutex::new(()))),
            rx,
        )
    }

    #[tokio::test]
    async fn test_sell_fill_is_negative_with_zero_fee() {
        let order = Order::market(7, Instrument::crypto("BTCUSDT"), OrderDirection::Sell, dec!(1))
            .with_broker_id("111");
        let (reconciler, mut rx) = reconciler(vec![order]);

        let event = reconciler
            .on_execution(&execution("111", None, "SELL"))
            .await
            .unwrap();
        assert_eq!(event.order_id, 7);
        assert_eq!(event.fill_quantity, dec!(-0.25));
        assert_eq!(event.fee, Decimal::ZERO);
        assert_eq!(event.status, OrderStatus::PartiallyFilled);
        assert!(matches!(rx.try_recv().unwrap(), BrokerageEvent::Order(_)));
    }

    #[tokio::test]
    async fn test_algo_fill_found_by_algo_id() {
        let order = Order::new(
            9,
            Instrument::crypto_future("BTCUSDT"),
            OrderDirection::Buy,
            dec!(1),
            OrderKind::StopMarket { stop_price: dec!(110) },
        )
        .with_broker_id("3000000000123");
        let (reconciler, _rx) = reconciler(vec![order]);

        let event = reconciler
            .on_execution(&execution("555", Some("3000000000123"), "BUY"))
            .await
            .unwrap();
        assert_eq!(event.order_id, 9);
        assert_eq!(event.fill_quantity, dec!(0.25));
    }

    #[tokio::test]
    async fn test_tracked_order_matches_before_host_knows_it() {
        let (reconciler, mut rx) = reconciler(vec![]);
        let order = Order::market(11, Instrument::crypto("BTCUSDT"), OrderDirection::Buy, dec!(1));
        reconciler.track("900".to_string(), &order);

        let mut fill = execution("900", None, "BUY");
        fill.order_status = "FILLED".to_string();
        let event = reconciler.on_execution(&fill).await.unwrap();

        assert_eq!(event.order_id, 11);
        assert_eq!(event.status, OrderStatus::Filled);
        assert!(matches!(rx.try_recv().unwrap(), BrokerageEvent::Order(_)));
        assert_eq!(reconciler.tracked(), 0);
    }

    #[tokio::test]
    async fn test_partial_fill_keeps_order_tracked() {
        let (reconciler, _rx) = reconciler(vec![]);
        let order = Order::market(12, Instrument::crypto("BTCUSDT"), OrderDirection::Sell, dec!(1));
        reconciler.track("901".to_string(), &order);

        assert!(reconciler.on_execution(&execution("901", None, "SELL")).await.is_some());
        assert_eq!(reconciler.tracked(), 1);
        reconciler.forget(&["901".to_string()]);
        assert_eq!(reconciler.tracked(), 0);
    }

    #[tokio::test]
    async fn test_unknown_order_is_dropped() {
        let (reconciler, mut rx) = reconciler(vec![]);
        assert!(reconciler
            .on_execution(&execution("404", Some("0"), "BUY"))
            .await
            .is_none());
        assert!(rx.try_recv().is_err());
    }
}
