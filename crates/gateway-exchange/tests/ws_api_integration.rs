//! Integration tests for the signed WebSocket API client against an in-memory venue.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::future::join_all;
use futures::{SinkExt, StreamExt};
use gateway_exchange::signing::{canonicalize, HmacSigner, ParamMap};
use gateway_exchange::ws_api::{CancelOrderParams, OrderSide, PlaceOrderParams};
use gateway_exchange::{
    ApiCredentials, ExchangeError, SessionState, SignedClientConfig, SignedWsClient,
};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const API_KEY: &str = "test-api-key-0001";
const SECRET: &str = "test-secret";

type VenueSocket = WebSocketStream<DuplexStream>;

fn test_config() -> SignedClientConfig {
    SignedClientConfig {
        url: "ws://in-memory".to_string(),
        request_timeout: Duration::from_secs(5),
        keepalive_interval: Duration::from_secs(3600),
        read_deadline: Duration::from_secs(3600),
        write_timeout: Duration::from_secs(5),
    }
}

/// Connect a client to an in-memory venue socket.
async fn connect_pair() -> (SignedWsClient, VenueSocket) {
    let (client_io, venue_io) = tokio::io::duplex(1 << 20);
    let client_ws = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
    let venue_ws = WebSocketStream::from_raw_socket(venue_io, Role::Server, None).await;

    let client = SignedWsClient::from_stream(
        client_ws,
        test_config(),
        ApiCredentials::hmac(API_KEY, SECRET),
    );
    (client, venue_ws)
}

/// Run a venue that answers each request frame with the frames returned by `handler`.
fn spawn_venue<F>(mut venue: VenueSocket, mut handler: F) -> tokio::task::JoinHandle<()>
where
    F: FnMut(Value) -> Vec<String> + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(Ok(msg)) = venue.next().await {
            if let Message::Text(text) = msg {
                let request: Value = serde_json::from_str(&text).unwrap();
                for reply in handler(request) {
                    if venue.send(Message::Text(reply)).await.is_err() {
                        return;
                    }
                }
            }
        }
    })
}

fn ok_reply(request: &Value, result: Value) -> String {
    json!({"id": request["id"], "status": 200, "result": result}).to_string()
}

#[tokio::test]
async fn test_signed_request_carries_valid_hmac_signature() {
    let (client, venue) = connect_pair().await;
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

    spawn_venue(venue, move |req| {
        seen_tx.send(req.clone()).unwrap();
        vec![ok_reply(&req, json!({"orderId": 1}))]
    });

    let params = PlaceOrderParams::limit("BTCUSDT", OrderSide::Buy, dec!(0.5), dec!(60000));
    let result = client.place_order(&params).await.unwrap();
    assert_eq!(result["orderId"], 1);

    let request = seen_rx.recv().await.unwrap();
    assert_eq!(request["method"], "order.place");

    let sent: ParamMap = serde_json::from_value::<BTreeMap<String, Value>>(request["params"].clone())
        .unwrap();
    assert_eq!(sent["apiKey"], API_KEY);
    assert!(sent["timestamp"].is_i64());

    let expected = HmacSigner::new(SECRET).sign(&canonicalize(&sent)).unwrap();
    assert_eq!(sent["signature"], json!(expected));
}

#[tokio::test]
async fn test_concurrent_requests_routed_with_permuted_responses() {
    const N: usize = 50;
    let (client, venue) = connect_pair().await;

    // Buffer all requests, then answer them in reverse order.
    let mut buffered = Vec::new();
    spawn_venue(venue, move |req| {
        buffered.push(req);
        if buffered.len() < N {
            return Vec::new();
        }
        buffered
            .drain(..)
            .rev()
            .map(|r| {
                let n = r["params"]["n"].clone();
                ok_reply(&r, json!({ "n": n }))
            })
            .collect()
    });

    let calls = (0..N).map(|i| {
        let client = &client;
        async move {
            let mut params = ParamMap::new();
            params.insert("n".to_string(), json!(i));
            let result = client.request_unsigned("echo", params, None).await.unwrap();
            (i, result["n"].as_u64().unwrap() as usize)
        }
    });

    for (sent, received) in join_all(calls).await {
        assert_eq!(sent, received);
    }
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn test_timeouts_leave_pending_table_empty() {
    let (client, venue) = connect_pair().await;
    spawn_venue(venue, |_| Vec::new());

    let calls = (0..1000).map(|_| {
        client.request_unsigned("never.answered", ParamMap::new(), Some(Duration::from_millis(20)))
    });
    let results = join_all(calls).await;

    assert!(results
        .iter()
        .all(|r| matches!(r, Err(ExchangeError::Timeout(_)))));
    assert_eq!(client.pending_count(), 0);
    assert_eq!(client.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_remote_error_is_structured() {
    let (client, venue) = connect_pair().await;
    spawn_venue(venue, |req| {
        vec![json!({
            "id": req["id"],
            "status": 400,
            "error": {"code": -2011, "msg": "Unknown order sent."}
        })
        .to_string()]
    });

    let err = client
        .cancel_order(&CancelOrderParams::by_id("BTCUSDT", 42))
        .await
        .unwrap_err();

    match err {
        ExchangeError::ApiError { code, message } => {
            assert_eq!(code, -2011);
            assert_eq!(message, "Unknown order sent.");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(client.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_invalid_params_rejected_before_sending() {
    let (client, venue) = connect_pair().await;
    spawn_venue(venue, |_| panic!("nothing should be sent"));

    let mut params = CancelOrderParams::by_id("BTCUSDT", 1);
    params.order_id = None;
    assert!(matches!(
        client.cancel_order(&params).await,
        Err(ExchangeError::InvalidParams(_))
    ));
}

#[tokio::test]
async fn test_logon_rejected_surfaces_unauthorized() {
    let (client, venue) = connect_pair().await;
    spawn_venue(venue, |req| {
        vec![json!({
            "id": req["id"],
            "status": 401,
            "error": {"code": -1002, "msg": "unauthorized"}
        })
        .to_string()]
    });

    let err = client.logon().await.unwrap_err();
    assert!(err.is_auth_error());
    assert_eq!(client.state(), SessionState::Connected);
    assert!(!client.is_closed());
}

#[tokio::test]
async fn test_logon_timestamp_rejection_is_unauthorized() {
    let (client, venue) = connect_pair().await;
    spawn_venue(venue, |req| {
        vec![json!({
            "id": req["id"],
            "status": 400,
            "error": {"code": -1021, "msg": "Timestamp for this request is outside of the recvWindow."}
        })
        .to_string()]
    });

    let err = client.logon().await.unwrap_err();
    assert!(matches!(err, ExchangeError::Unauthorized(ref msg) if msg.contains("-1021")));
    assert_eq!(client.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_logon_accepted_authenticates_session() {
    let (client, venue) = connect_pair().await;
    spawn_venue(venue, |req| {
        assert_eq!(req["method"], "session.logon");
        assert!(req["params"]["signature"].is_string());
        vec![json!({
            "id": req["id"],
            "status": 200,
            "result": {"apiKey": API_KEY},
            "rateLimits": [{"rateLimitType": "REQUEST_WEIGHT", "count": 5}]
        })
        .to_string()]
    });

    assert_eq!(client.state(), SessionState::Connected);
    client.logon().await.unwrap();
    assert_eq!(client.state(), SessionState::Authenticated);
    assert_eq!(client.last_rate_limits().unwrap()[0]["count"], 5);
}

#[tokio::test]
async fn test_unmatched_and_malformed_frames_are_ignored() {
    let (client, venue) = connect_pair().await;
    spawn_venue(venue, |req| {
        vec![
            "not json at all".to_string(),
            json!({"id": "ghost", "status": 200, "result": {}}).to_string(),
            json!({"status": 200, "result": {}}).to_string(),
            ok_reply(&req, json!({"ok": true})),
        ]
    });

    let result = client
        .request_unsigned("session.status", ParamMap::new(), None)
        .await
        .unwrap();
    assert_eq!(result["ok"], true);
    assert!(!client.is_closed());
}

#[tokio::test]
async fn test_close_releases_waiters_and_is_idempotent() {
    let (client, venue) = connect_pair().await;
    spawn_venue(venue, |_| Vec::new());

    let (result, _) = tokio::join!(
        client.request_unsigned("slow", ParamMap::new(), Some(Duration::from_secs(30))),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            client.close().await;
            client.close().await;
        }
    );

    assert!(matches!(result, Err(ExchangeError::Closed)));
    assert_eq!(client.state(), SessionState::Closed);
    assert_eq!(client.pending_count(), 0);
    assert!(matches!(
        client.request_unsigned("after", ParamMap::new(), None).await,
        Err(ExchangeError::Closed)
    ));
}

#[tokio::test]
async fn test_transport_failure_closes_client_terminally() {
    let (client, venue) = connect_pair().await;

    let (result, _) = tokio::join!(
        client.request_unsigned("doomed", ParamMap::new(), Some(Duration::from_secs(30))),
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(venue);
        }
    );

    assert!(matches!(result, Err(ExchangeError::Closed)));
    tokio::time::timeout(Duration::from_secs(1), client.closed())
        .await
        .unwrap();
    assert_eq!(client.state(), SessionState::Closed);
}
