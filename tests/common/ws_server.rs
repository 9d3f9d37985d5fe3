use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

/// What the local exchange socket saw, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Connected { id: usize, path: String },
    Text { id: usize, text: String },
    Closed { id: usize },
}

/// SUBSCRIBE / UNSUBSCRIBE frame as received.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlFrame {
    pub connection: usize,
    pub method: String,
    pub params: Vec<String>,
}

type Outbound = Arc<Mutex<HashMap<usize, mpsc::UnboundedSender<Message>>>>;

/// Plain-text WebSocket endpoint on 127.0.0.1 standing in for the exchange.
pub struct WsServer {
    pub url: String,
    log: Arc<Mutex<Vec<ServerEvent>>>,
    outbound: Outbound,
    task: JoinHandle<()>,
}

impl WsServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let log = Arc::new(Mutex::new(Vec::new()));
        let outbound = Outbound::default();
        let task = tokio::spawn(accept_loop(listener, Arc::clone(&log), Arc::clone(&outbound)));
        Self {
            url,
            log,
            outbound,
            task,
        }
    }

    pub fn events(&self) -> Vec<ServerEvent> {
        self.log.lock().unwrap().clone()
    }

    /// Request paths of every accepted connection, by connection id.
    pub fn connections(&self) -> Vec<(usize, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::Connected { id, path } => Some((id, path)),
                _ => None,
            })
            .collect()
    }

    pub fn control_frames(&self) -> Vec<ControlFrame> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::Text { id, text } => {
                    let value: Value = serde_json::from_str(&text).ok()?;
                    Some(ControlFrame {
                        connection: id,
                        method: value["method"].as_str()?.to_string(),
                        params: value["params"]
                            .as_array()?
                            .iter()
                            .filter_map(|p| p.as_str().map(str::to_string))
                            .collect(),
                    })
                }
                _ => None,
            })
            .collect()
    }

    pub fn frames_with(&self, method: &str) -> Vec<ControlFrame> {
        self.control_frames()
            .into_iter()
            .filter(|f| f.method == method)
            .collect()
    }

    /// Poll until `done` holds, failing the test after five seconds.
    pub async fn wait_until(&self, what: &str, done: impl Fn(&Self) -> bool) {
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            while !done(self) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "timed out waiting for {}: {:?}", what, self.events());
    }

    /// Push a text frame to one connection.
    pub fn send(&self, connection: usize, text: impl Into<String>) {
        let outbound = self.outbound.lock().unwrap();
        let tx = outbound.get(&connection).expect("connection is open");
        tx.send(Message::Text(text.into())).unwrap();
    }

    /// Close one connection from the server side.
    pub fn drop_connection(&self, connection: usize) {
        self.outbound.lock().unwrap().remove(&connection);
    }
}

impl Drop for WsServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(listener: TcpListener, log: Arc<Mutex<Vec<ServerEvent>>>, outbound: Outbound) {
    let mut next_id = 0;
    while let Ok((stream, _)) = listener.accept().await {
        tokio::spawn(serve(stream, next_id, Arc::clone(&log), Arc::clone(&outbound)));
        next_id += 1;
    }
}

async fn serve(stream: TcpStream, id: usize, log: Arc<Mutex<Vec<ServerEvent>>>, outbound: Outbound) {
    let path = Arc::new(Mutex::new(String::new()));
    let captured = Arc::clone(&path);
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        *captured.lock().unwrap() = request.uri().path().to_string();
        Ok(response)
    };
    let Ok(socket) = accept_hdr_async(stream, callback).await else {
        return;
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    outbound.lock().unwrap().insert(id, tx);
    let path = path.lock().unwrap().clone();
    log.lock().unwrap().push(ServerEvent::Connected { id, path });

    let (mut write, mut read) = socket.split();
    loop {
        tokio::select! {
            outgoing = rx.recv() => match outgoing {
                Some(message) => {
                    if write.send(message).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    log.lock().unwrap().push(ServerEvent::Text { id, text });
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    outbound.lock().unwrap().remove(&id);
    log.lock().unwrap().push(ServerEvent::Closed { id });
}
