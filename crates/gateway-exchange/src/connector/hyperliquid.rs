//! Hyperliquid 사용자 피드 커넥터.
//!
//! 주소 단위 실시간 피드(WebSocket)와 REST info 스냅샷을 제공합니다.
//!
//! # 구독 채널
//!
//! - `orderUpdates`: 주문 상태 변경
//! - `userFills`: 체결
//! - `userEvents`: 청산/펀딩 등 계정 이벤트
//!
//! # 스냅샷 채널
//!
//! - `openOrders`, `historicalOrders`, `userFills` (POST `/info`)

use std::time::Duration;

use async_trait::async_trait;
use gateway_core::VenueConfig;
use reqwest::Client;
use serde_json::{json, Value};
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info};

use crate::traits::{SnapshotFetcher, UpstreamDialer, UpstreamSocket};
use crate::{ExchangeError, ExchangeResult};

/// 실시간 구독 채널 종류.
pub const SUBSCRIPTION_KINDS: [&str; 3] = ["orderUpdates", "userFills", "userEvents"];

/// 미체결 주문 스냅샷 채널
pub const CHANNEL_OPEN_ORDERS: &str = "openOrders";
/// 주문 이력 스냅샷 채널
pub const CHANNEL_HISTORICAL_ORDERS: &str = "historicalOrders";
/// 체결 이력 스냅샷 채널
pub const CHANNEL_USER_FILLS: &str = "userFills";

/// 사용자 피드 설정.
#[derive(Debug, Clone)]
pub struct UserFeedConfig {
    /// 실시간 피드 WebSocket URL
    pub ws_url: String,
    /// REST info URL
    pub info_url: String,
    /// 연결/HTTP 타임아웃
    pub timeout: Duration,
}

impl Default for UserFeedConfig {
    fn default() -> Self {
        Self::from(&VenueConfig::default())
    }
}

impl From<&VenueConfig> for UserFeedConfig {
    fn from(venue: &VenueConfig) -> Self {
        Self {
            ws_url: venue.user_feed_url.clone(),
            info_url: venue.info_url.clone(),
            timeout: venue.request_timeout(),
        }
    }
}

/// 주소 형식 검증 (`0x` + 40자리 hex).
pub fn is_valid_address(address: &str) -> bool {
    address
        .strip_prefix("0x")
        .map(|hex| hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false)
}

/// 주소에 대한 구독 요청 프레임.
pub fn subscription_messages(address: &str) -> Vec<String> {
    SUBSCRIPTION_KINDS
        .iter()
        .map(|kind| {
            json!({
                "method": "subscribe",
                "subscription": { "type": kind, "user": address },
            })
            .to_string()
        })
        .collect()
}

/// 애플리케이션 수준 ping 프레임.
pub fn ping_message() -> String {
    json!({ "method": "ping" }).to_string()
}

/// 실시간 사용자 피드 연결자.
#[derive(Debug, Clone)]
pub struct HyperliquidFeed {
    config: UserFeedConfig,
}

impl HyperliquidFeed {
    /// 새 연결자 생성.
    pub fn new(config: UserFeedConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl UpstreamDialer for HyperliquidFeed {
    fn name(&self) -> &str {
        "hyperliquid"
    }

    async fn dial(&self) -> ExchangeResult<UpstreamSocket> {
        debug!(url = %self.config.ws_url, "사용자 피드 연결 중");

        let (ws, _) = tokio::time::timeout(self.config.timeout, connect_async(self.config.ws_url.as_str()))
            .await
            .map_err(|_| ExchangeError::Timeout(format!("connect {}", self.config.ws_url)))?
            .map_err(|e| ExchangeError::NetworkError(e.to_string()))?;

        Ok(UpstreamSocket::new(ws))
    }

    fn subscription_messages(&self, address: &str) -> Vec<String> {
        subscription_messages(address)
    }

    fn ping_message(&self) -> String {
        ping_message()
    }
}

/// REST info 클라이언트.
#[derive(Debug, Clone)]
pub struct InfoClient {
    client: Client,
    info_url: String,
}

impl InfoClient {
    /// 새 클라이언트 생성.
    pub fn new(config: &UserFeedConfig) -> ExchangeResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ExchangeError::NetworkError(format!("HTTP 클라이언트 생성 실패: {}", e)))?;

        info!(url = %config.info_url, "info 클라이언트 생성");
        Ok(Self {
            client,
            info_url: config.info_url.clone(),
        })
    }

    /// 미체결 주문 조회.
    pub async fn open_orders(&self, address: &str) -> ExchangeResult<Value> {
        self.post_info(CHANNEL_OPEN_ORDERS, address).await
    }

    /// 주문 이력 조회.
    pub async fn historical_orders(&self, address: &str) -> ExchangeResult<Value> {
        self.post_info(CHANNEL_HISTORICAL_ORDERS, address).await
    }

    /// 체결 이력 조회.
    pub async fn user_fills(&self, address: &str) -> ExchangeResult<Value> {
        self.post_info(CHANNEL_USER_FILLS, address).await
    }

    async fn post_info(&self, kind: &str, address: &str) -> ExchangeResult<Value> {
        let response = self
            .client
            .post(&self.info_url)
            .json(&json!({ "type": kind, "user": address }))
            .send()
            .await?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExchangeError::NetworkError(e.to_string()))?;

        if status.is_success() {
            serde_json::from_str(&body).map_err(|e| {
                error!(kind, error = %e, "info 응답 파싱 실패");
                ExchangeError::ParseError(e.to_string())
            })
        } else {
            Err(ExchangeError::ApiError {
                code: i64::from(status.as_u16()),
                message: body,
            })
        }
    }
}

#[async_trait]
impl SnapshotFetcher for InfoClient {
    fn channels(&self) -> Vec<String> {
        [CHANNEL_OPEN_ORDERS, CHANNEL_HISTORICAL_ORDERS, CHANNEL_USER_FILLS]
            .iter()
            .map(|c| c.to_string())
            .collect()
    }

    async fn fetch(&self, channel: &str, address: &str) -> ExchangeResult<Value> {
        match channel {
            CHANNEL_OPEN_ORDERS => self.open_orders(address).await,
            CHANNEL_HISTORICAL_ORDERS => self.historical_orders(address).await,
            CHANNEL_USER_FILLS => self.user_fills(address).await,
            other => Err(ExchangeError::InvalidParams(format!(
                "unknown snapshot channel: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDRESS: &str = "0x1234567890abcdef1234567890abcdef12345678";

    fn info_client(url: String) -> InfoClient {
        InfoClient::new(&UserFeedConfig {
            ws_url: "ws://unused".to_string(),
            info_url: url,
            timeout: Duration::from_secs(2),
        })
        .unwrap()
    }

    #[test]
    fn test_address_validation() {
        assert!(is_valid_address(ADDRESS));
        assert!(!is_valid_address("1234567890abcdef1234567890abcdef12345678"));
        assert!(!is_valid_address("0x1234"));
        assert!(!is_valid_address("0xzz34567890abcdef1234567890abcdef12345678"));
    }

    #[test]
    fn test_subscription_messages() {
        let msgs = subscription_messages(ADDRESS);
        assert_eq!(msgs.len(), 3);

        let kinds: Vec<String> = msgs
            .iter()
            .map(|m| {
                let v: Value = serde_json::from_str(m).unwrap();
                assert_eq!(v["method"], "subscribe");
                assert_eq!(v["subscription"]["user"], ADDRESS);
                v["subscription"]["type"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(kinds, vec!["orderUpdates", "userFills", "userEvents"]);
    }

    #[test]
    fn test_ping_message() {
        let v: Value = serde_json::from_str(&ping_message()).unwrap();
        assert_eq!(v, json!({"method": "ping"}));
    }

    #[tokio::test]
    async fn test_open_orders_posts_info_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/info")
            .match_body(mockito::Matcher::Json(json!({"type": "openOrders", "user": ADDRESS})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"coin":"BTC","oid":1}]"#)
            .create_async()
            .await;

        let client = info_client(format!("{}/info", server.url()));
        let value = client.fetch(CHANNEL_OPEN_ORDERS, ADDRESS).await.unwrap();

        assert_eq!(value[0]["coin"], "BTC");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_is_api_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/info")
            .with_status(422)
            .with_body("bad user")
            .create_async()
            .await;

        let client = info_client(format!("{}/info", server.url()));
        let err = client.user_fills(ADDRESS).await.unwrap_err();
        assert!(matches!(err, ExchangeError::ApiError { code: 422, .. }));
    }

    #[tokio::test]
    async fn test_unknown_channel() {
        let client = info_client("http://127.0.0.1:9/info".to_string());
        assert!(matches!(
            client.fetch("nope", ADDRESS).await,
            Err(ExchangeError::InvalidParams(_))
        ));
    }
}
