use super::BinanceBrokerage;
use crate::core::errors::ExchangeError;
use crate::core::types::{Order, OrderDirection};
use rust_decimal::Decimal;
use tracing::instrument;

impl BinanceBrokerage {
    /// Place an order under the order lock. Stops are classified against the
    /// ask for buys and the bid for sells. An accepted order is recorded for
    /// fill matching before the lock is released.
    #[instrument(skip(self, order), fields(order_id = order.id))]
    pub async fn place_order(&self, order: &Order) -> Result<bool, ExchangeError> {
        let _guard = self.order_lock.lock().await;
        let reference = self.reference_price(order);
        match self.client.place_order(order, reference).await? {
            Some(broker_id) => {
                self.reconciler.track(broker_id, order);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    #[instrument(skip(self, order), fields(order_id = order.id))]
    pub async fn cancel_order(&self, order: &Order) -> Result<bool, ExchangeError> {
        let _guard = self.order_lock.lock().await;
        let canceled = self.client.cancel_order(order).await?;
        if canceled {
            self.reconciler.forget(&order.broker_ids);
        }
        Ok(canceled)
    }

    /// Binance has no amend for the order types the host sends.
    pub async fn update_order(&self, order: &Order) -> Result<bool, ExchangeError> {
        Err(ExchangeError::Unsupported(format!(
            "Order {} cannot be updated; cancel and resubmit",
            order.id
        )))
    }

    fn reference_price(&self, order: &Order) -> Option<Decimal> {
        let quote = self.securities.reference_price(&order.instrument)?;
        Some(match order.direction {
            OrderDirection::Buy => quote.ask,
            OrderDirection::Sell => quote.bid,
        })
    }
}
