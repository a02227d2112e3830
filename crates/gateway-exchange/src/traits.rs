//! 업스트림 피드 trait 정의.
//!
//! 릴레이는 구체적인 거래소가 아니라 이 trait들에만 의존하므로
//! 테스트에서 가짜 구현으로 교체할 수 있습니다.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream, StreamExt};
use serde_json::Value;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::ExchangeResult;

/// 업스트림 쓰기 절반.
pub type UpstreamSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// 업스트림 읽기 절반.
pub type UpstreamStream = Pin<Box<dyn Stream<Item = Result<Message, WsError>> + Send>>;

/// 연결된 업스트림 소켓 (읽기/쓰기 분리).
pub struct UpstreamSocket {
    pub sink: UpstreamSink,
    pub stream: UpstreamStream,
}

impl UpstreamSocket {
    /// WebSocket 스트림을 읽기/쓰기로 분리해 감쌉니다.
    pub fn new<S>(ws: S) -> Self
    where
        S: Stream<Item = Result<Message, WsError>>
            + Sink<Message, Error = WsError>
            + Send
            + 'static,
    {
        let (sink, stream) = ws.split();
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

/// 신원(주소) 단위 업스트림 피드 연결자.
#[async_trait]
pub trait UpstreamDialer: Send + Sync {
    /// 피드 이름 (로그용).
    fn name(&self) -> &str;

    /// 업스트림 소켓을 엽니다.
    async fn dial(&self) -> ExchangeResult<UpstreamSocket>;

    /// 연결 직후 보낼 구독 요청 프레임들.
    fn subscription_messages(&self, address: &str) -> Vec<String>;

    /// 애플리케이션 수준 ping 프레임.
    fn ping_message(&self) -> String;
}

/// 신원 단위 REST 스냅샷 조회자.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    /// 스냅샷 채널 이름 목록. 채널마다 독립 호출됩니다.
    fn channels(&self) -> Vec<String>;

    /// 채널 하나의 스냅샷을 조회합니다.
    async fn fetch(&self, channel: &str, address: &str) -> ExchangeResult<Value>;
}
