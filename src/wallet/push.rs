//! Balance push channel
//!
//! A WebSocket on the wallet server carrying one JSON message per text frame.
//! The client subscribes with `{"type":"subscribe","userId":...}` and receives
//! `{"type":"balance_update","balance":...}`. Dropped connections are retried
//! on a fixed interval until the subscription is cancelled.

use super::{BalanceCallback, BalanceFeed, FeedSubscription};
use crate::config::Config;
use futures::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type PushSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Messages on the push channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    Subscribe {
        #[serde(rename = "userId")]
        user_id: String,
    },
    BalanceUpdate {
        #[serde(with = "rust_decimal::serde::float")]
        balance: Decimal,
    },
}

impl PushMessage {
    /// Parse one frame's text; anything unrecognized is `None`
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text.trim()).ok()
    }
}

/// Reconnecting WebSocket feed
#[derive(Debug, Clone)]
pub struct PushFeed {
    url: String,
    reconnect_delay: Duration,
}

impl PushFeed {
    pub fn new(url: &str, reconnect_delay: Duration) -> Self {
        Self {
            url: url.to_string(),
            reconnect_delay,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.push_url,
            Duration::from_millis(config.reconnect_delay_ms),
        )
    }

    async fn connect(&self) -> Result<PushSocket, tungstenite::Error> {
        let strategy = FixedInterval::new(self.reconnect_delay);
        Retry::start(strategy, || async {
            connect_async(self.url.as_str())
                .await
                .map(|(socket, _)| socket)
                .map_err(|e| {
                    debug!("Push channel connect to {} failed: {}", self.url, e);
                    e
                })
        })
        .await
    }

    /// Deliver updates from one connection until it closes
    async fn pump(
        &self,
        mut socket: PushSocket,
        user_id: &str,
        on_balance: &BalanceCallback,
    ) -> Result<(), tungstenite::Error> {
        let subscribe = serde_json::to_string(&PushMessage::Subscribe {
            user_id: user_id.to_string(),
        })
        .map_err(|e| tungstenite::Error::Io(e.into()))?;
        socket.send(Message::Text(subscribe.into())).await?;
        info!("🔌 Subscribed to balance updates for {}", user_id);

        while let Some(frame) = socket.next().await {
            match frame? {
                Message::Text(text) => match PushMessage::parse(&text) {
                    Some(PushMessage::BalanceUpdate { balance }) => {
                        debug!("Pushed balance: {}", balance);
                        on_balance(balance);
                    }
                    _ => debug!("Ignoring push message: {}", text.trim()),
                },
                Message::Close(_) => break,
                // Pings are answered by the socket itself
                _ => {}
            }
        }
        Ok(())
    }

    async fn run(self, user_id: String, on_balance: BalanceCallback) {
        loop {
            match self.connect().await {
                Ok(socket) => {
                    if let Err(e) = self.pump(socket, &user_id, &on_balance).await {
                        warn!("⚠️ Push channel error: {}", e);
                    } else {
                        debug!("Push channel closed by server");
                    }
                }
                Err(e) => warn!("⚠️ Push channel unavailable: {}", e),
            }
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }
}

impl BalanceFeed for PushFeed {
    fn subscribe(&self, user_id: &str, on_balance: BalanceCallback) -> FeedSubscription {
        FeedSubscription::new(tokio::spawn(
            self.clone().run(user_id.to_string(), on_balance),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_tungstenite::accept_async;

    #[test]
    fn test_message_wire_format() {
        let json = serde_json::to_string(&PushMessage::Subscribe {
            user_id: "65a1".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"subscribe","userId":"65a1"}"#);

        assert_eq!(
            PushMessage::parse(r#"{"type":"balance_update","balance":13300}"#),
            Some(PushMessage::BalanceUpdate {
                balance: Decimal::from(13_300)
            })
        );
        assert_eq!(PushMessage::parse(r#"{"type":"hello"}"#), None);
        assert_eq!(PushMessage::parse("garbage"), None);
    }

    /// Accept one WebSocket client, read its subscribe frame, push a balance and hang up
    async fn serve_once(listener: &TcpListener, balance: i64) -> String {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        let subscribe = match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => text.to_string(),
            other => panic!("expected a text frame, got {:?}", other),
        };
        ws.send(Message::Text(r#"{"type":"noise"}"#.into()))
            .await
            .unwrap();
        ws.send(Message::Binary(vec![1, 2, 3].into())).await.unwrap();
        let update = format!(r#"{{"type":"balance_update","balance":{}}}"#, balance);
        ws.send(Message::Text(update.into())).await.unwrap();
        ws.close(None).await.unwrap();
        subscribe
    }

    #[tokio::test]
    async fn test_reconnects_after_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let feed = PushFeed::new(&format!("ws://{}", addr), Duration::from_millis(20));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = feed.subscribe(
            "65a1",
            Arc::new(move |balance| {
                let _ = tx.send(balance);
            }),
        );

        let first = serve_once(&listener, 100).await;
        assert!(first.contains(r#""userId":"65a1""#));
        assert_eq!(rx.recv().await, Some(Decimal::from(100)));

        // First connection closed above; the feed comes back on its own
        let second = serve_once(&listener, 250).await;
        assert!(second.contains(r#""type":"subscribe""#));
        assert_eq!(rx.recv().await, Some(Decimal::from(250)));
        assert!(sub.is_active());
    }

    #[tokio::test]
    async fn test_rejected_upgrade_is_an_error() {
        // A server that rejects the upgrade, as a bare HTTP endpoint would
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let (mut tcp, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = tcp.read(&mut request).await.unwrap();
            tcp.write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n")
                .await
                .unwrap();
        });

        let feed = PushFeed::new(&format!("ws://{}", addr), Duration::from_millis(10));
        let err = tokio::time::timeout(Duration::from_millis(500), async {
            connect_async(feed.url.as_str()).await
        })
        .await
        .unwrap()
        .unwrap_err();
        assert!(matches!(err, tungstenite::Error::Http(_)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_stops_reconnecting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let feed = PushFeed::new(&format!("ws://{}", addr), Duration::from_millis(10));
        let mut sub = feed.subscribe("65a1", Arc::new(|_| {}));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(sub.is_active());

        sub.cancel();
        assert!(!sub.is_active());
    }
}
