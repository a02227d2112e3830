//! Integration tests for downstream connections, the news hub and the monitor relay.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use gateway_api::websocket::{
    spawn_connection, BroadcastHub, ConnectionConfig, FeedSource, HubSettings, PONG_FRAME,
};
use gateway_api::{create_api_router, AppState, FetchError};
use gateway_core::{FeedItem, FeedPayload, GatewayConfig};
use gateway_exchange::{
    ExchangeError, ExchangeResult, SnapshotFetcher, UpstreamDialer, UpstreamSocket,
};
use serde_json::{json, Value};
use tokio::io::DuplexStream;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;

const ADDRESS: &str = "0x1234567890abcdef1234567890abcdef12345678";

type ClientSocket = WebSocketStream<DuplexStream>;

/// Source that counts fetches and always returns one item.
struct CountingSource {
    calls: AtomicUsize,
}

#[async_trait]
impl FeedSource for CountingSource {
    fn key(&self) -> &str {
        "wire"
    }

    async fn fetch(&self) -> Result<Vec<FeedItem>, FetchError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![FeedItem {
            link: Some(format!("https://wire/{}", n)),
            ..FeedItem::new("wire")
        }])
    }
}

fn counting_source() -> Arc<dyn FeedSource> {
    Arc::new(CountingSource {
        calls: AtomicUsize::new(0),
    })
}

/// Dialer that never connects.
struct OfflineDialer;

#[async_trait]
impl UpstreamDialer for OfflineDialer {
    fn name(&self) -> &str {
        "offline"
    }

    async fn dial(&self) -> ExchangeResult<UpstreamSocket> {
        Err(ExchangeError::NetworkError("offline".to_string()))
    }

    fn subscription_messages(&self, _address: &str) -> Vec<String> {
        Vec::new()
    }

    fn ping_message(&self) -> String {
        "{}".to_string()
    }
}

/// Fetcher with a single snapshot channel.
struct StaticFetcher;

#[async_trait]
impl SnapshotFetcher for StaticFetcher {
    fn channels(&self) -> Vec<String> {
        vec!["openOrders".to_string()]
    }

    async fn fetch(&self, _channel: &str, address: &str) -> ExchangeResult<Value> {
        Ok(json!([{"oid": 42, "user": address}]))
    }
}

fn connection_config() -> ConnectionConfig {
    ConnectionConfig {
        queue_capacity: 16,
        write_deadline: Duration::from_secs(1),
        read_deadline: Duration::from_secs(5),
        ping_interval: Duration::from_secs(3),
    }
}

fn hub_settings() -> HubSettings {
    HubSettings {
        channel: "news".to_string(),
        interval: Duration::from_secs(3600),
        idle_grace: Duration::from_millis(50),
        source_timeout: Duration::from_secs(1),
        max_items_per_source: 10,
    }
}

/// Accept an in-memory socket as a downstream connection.
async fn downstream_pair(
    config: ConnectionConfig,
) -> (gateway_api::Downstream, ClientSocket) {
    let (client_io, server_io) = tokio::io::duplex(1 << 16);
    let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
    let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
    (spawn_connection(server, config), client)
}

/// Next text frame, skipping protocol control frames.
async fn next_text<S>(socket: &mut S) -> String
where
    S: futures::Stream<Item = Result<Message, WsError>> + Unpin,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => return text,
                Some(Ok(_)) => continue,
                other => panic!("socket ended: {:?}", other),
            }
        }
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_ping_gets_pong() {
    let (_downstream, mut client) = downstream_pair(connection_config()).await;

    client
        .send(Message::Text(r#"{"action":"ping"}"#.to_string()))
        .await
        .unwrap();
    assert_eq!(next_text(&mut client).await, PONG_FRAME);

    // method 키도 같은 명령
    client
        .send(Message::Text(r#"{"method":"ping"}"#.to_string()))
        .await
        .unwrap();
    assert_eq!(next_text(&mut client).await, PONG_FRAME);
}

#[tokio::test]
async fn test_queued_messages_written_in_order() {
    let (downstream, mut client) = downstream_pair(connection_config()).await;

    for i in 0..5 {
        assert!(downstream.send(format!("m{}", i)));
    }
    for i in 0..5 {
        assert_eq!(next_text(&mut client).await, format!("m{}", i));
    }
}

#[tokio::test]
async fn test_server_sends_protocol_pings() {
    let (_downstream, mut client) = downstream_pair(ConnectionConfig {
        ping_interval: Duration::from_millis(30),
        ..connection_config()
    })
    .await;

    let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(matches!(frame, Message::Ping(_)));
}

#[tokio::test]
async fn test_read_deadline_closes_silent_client() {
    let (downstream, _client) = downstream_pair(ConnectionConfig {
        read_deadline: Duration::from_millis(50),
        ping_interval: Duration::from_secs(60),
        ..connection_config()
    })
    .await;

    tokio::time::timeout(Duration::from_secs(2), downstream.closed())
        .await
        .unwrap();
    assert!(!downstream.send("late"));
}

#[tokio::test]
async fn test_client_close_ends_connection() {
    let (downstream, mut client) = downstream_pair(connection_config()).await;

    client.close(None).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), downstream.closed())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_refresh_command_triggers_hub_round() {
    let source = Arc::new(CountingSource {
        calls: AtomicUsize::new(0),
    });
    let hub = BroadcastHub::new(hub_settings(), vec![source.clone() as Arc<dyn FeedSource>]);
    let (downstream, mut client) = downstream_pair(connection_config()).await;

    hub.subscribe(&downstream);
    let first: FeedPayload = serde_json::from_str(&next_text(&mut client).await).unwrap();
    assert_eq!(first.items("wire").unwrap()[0].link.as_deref(), Some("https://wire/0"));

    client
        .send(Message::Text(r#"{"action":"refresh"}"#.to_string()))
        .await
        .unwrap();
    let second: FeedPayload = serde_json::from_str(&next_text(&mut client).await).unwrap();
    assert_eq!(second.items("wire").unwrap()[0].link.as_deref(), Some("https://wire/1"));
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_hub_stops_after_last_connection_closes() {
    let hub = BroadcastHub::new(hub_settings(), vec![counting_source()]);
    let (downstream, mut client) = downstream_pair(connection_config()).await;

    let attached = tokio::spawn({
        let hub = hub.clone();
        let downstream = downstream.clone();
        async move { hub.attach(downstream).await }
    });
    next_text(&mut client).await;
    assert_eq!(hub.subscriber_count(), 1);

    client.close(None).await.unwrap();
    attached.await.unwrap();
    assert_eq!(hub.subscriber_count(), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!hub.is_active());
}

/// Serve the API router on an ephemeral port.
async fn serve(hub: BroadcastHub) -> std::net::SocketAddr {
    let state = Arc::new(AppState::new(
        GatewayConfig::default(),
        hub,
        Arc::new(OfflineDialer),
        Arc::new(StaticFetcher),
    ));
    let app = create_api_router().with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn test_news_endpoint_streams_hub_payload() {
    let hub = BroadcastHub::new(hub_settings(), vec![counting_source()]);
    let addr = serve(hub).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws/news", addr))
        .await
        .unwrap();
    let payload: FeedPayload = serde_json::from_str(&next_text(&mut ws).await).unwrap();
    assert_eq!(payload.channel, "news");
    assert_eq!(payload.items("wire").map(|i| i.len()), Some(1));
}

#[tokio::test]
async fn test_monitor_endpoint_sends_snapshots() {
    let addr = serve(BroadcastHub::new(hub_settings(), Vec::new())).await;

    let (mut ws, _) =
        tokio_tungstenite::connect_async(format!("ws://{}/ws/monitor/{}", addr, ADDRESS))
            .await
            .unwrap();
    let frame: Value = serde_json::from_str(&next_text(&mut ws).await).unwrap();
    assert_eq!(frame["channel"], "openOrders");
    assert_eq!(frame["address"], ADDRESS);
    assert_eq!(frame["data"][0]["oid"], 42);
}

#[tokio::test]
async fn test_monitor_endpoint_rejects_bad_address() {
    let addr = serve(BroadcastHub::new(hub_settings(), Vec::new())).await;

    let result =
        tokio_tungstenite::connect_async(format!("ws://{}/ws/monitor/not-an-address", addr)).await;
    match result {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 400),
        other => panic!("expected HTTP 400, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let addr = serve(BroadcastHub::new(hub_settings(), Vec::new())).await;

    let body: Value = reqwest::get(format!("http://{}/health/ready", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["components"]["news_hub"]["status"], "idle");
}
