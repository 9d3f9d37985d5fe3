use crate::core::types::{BrokerageEvent, OrderEvent};
use tokio::sync::mpsc;
use tracing::{error, trace, warn};

/// Outbound channel to the host. Cheap to clone; every component that
/// reports to the host holds one.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<BrokerageEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<BrokerageEvent>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiving end the host drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BrokerageEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: BrokerageEvent) {
        if self.tx.send(event).is_err() {
            trace!("event receiver dropped");
        }
    }

    pub fn order(&self, event: OrderEvent) {
        self.emit(BrokerageEvent::Order(event));
    }

    pub fn order_id_changed(&self, order_id: u64, broker_ids: Vec<String>) {
        self.emit(BrokerageEvent::OrderIdChanged {
            order_id,
            broker_ids,
        });
    }

    /// Log and forward a warning.
    pub fn warning(&self, code: &str, text: impl Into<String>) {
        let text = text.into();
        warn!(code, "{}", text);
        self.emit(BrokerageEvent::warning(code, text));
    }

    /// Log and forward an error.
    pub fn error(&self, code: &str, text: impl Into<String>) {
        let text = text.into();
        error!(code, "{}", text);
        self.emit(BrokerageEvent::error(code, text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::MessageKind;

    #[test]
    fn test_warning_reaches_receiver() {
        let (sink, mut rx) = EventSink::channel();
        sink.warning("Test", "something odd");
        match rx.try_recv().unwrap() {
            BrokerageEvent::Message { kind, code, text } => {
                assert_eq!(kind, MessageKind::Warning);
                assert_eq!(code, "Test");
                assert_eq!(text, "something odd");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_dropped_receiver_is_not_an_error() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.error("Test", "nobody listening");
    }
}
