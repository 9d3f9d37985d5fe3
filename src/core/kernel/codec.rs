use crate::core::errors::ExchangeError;
use tokio_tungstenite::tungstenite::Message;

/// Converts between raw WebSocket frames and an exchange's typed messages.
pub trait WsCodec: Send + Sync + 'static {
    /// The type representing parsed messages from this exchange
    type Message: Send + Sync;

    /// Control frame subscribing to the given stream names
    fn encode_subscription(
        &self,
        streams: &[impl AsRef<str> + Send + Sync],
    ) -> Result<Message, ExchangeError>;

    /// Control frame unsubscribing from the given stream names
    fn encode_unsubscription(
        &self,
        streams: &[impl AsRef<str> + Send + Sync],
    ) -> Result<Message, ExchangeError>;

    /// Decode a data frame.
    ///
    /// Ping, pong and close frames never reach the codec.
    ///
    /// # Returns
    /// - `Ok(Some(message))` - Successfully decoded message
    /// - `Ok(None)` - Frame carries nothing the caller needs (acks, unknown events)
    /// - `Err(error)` - Malformed frame; fatal to this frame only
    fn decode_message(&self, message: Message) -> Result<Option<Self::Message>, ExchangeError>;
}

/// Text payload of a data frame, accepting UTF-8 binary frames too.
pub fn frame_text(message: Message) -> Result<Option<String>, ExchangeError> {
    match message {
        Message::Text(text) => Ok(Some(text)),
        Message::Binary(data) => String::from_utf8(data).map(Some).map_err(|e| {
            ExchangeError::DeserializationError(format!("Invalid UTF-8 in binary message: {}", e))
        }),
        _ => Ok(None),
    }
}
