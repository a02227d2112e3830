//! 서명 기반 WebSocket API 클라이언트.
//!
//! 하나의 영속 연결 위에서 여러 호출자의 요청을 동시에 처리합니다.
//!
//! # 구조
//!
//! - 요청마다 고유 상관 ID를 만들고 대기 테이블에 응답 채널을 등록합니다.
//! - 쓰기는 쓰기 뮤텍스 아래에서만 일어납니다 (소켓당 단일 writer).
//! - 단일 읽기 태스크가 상관 ID로 응답을 분배합니다.
//! - keepalive 태스크가 주기적으로 ping 프레임을 보냅니다.
//!
//! 전송 계층 에러가 나면 클라이언트는 `Closed` 상태가 되며 스스로 재연결하지
//! 않습니다. 교체는 바깥의 감독 계층이 담당합니다.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::{Sink, SinkExt, Stream, StreamExt};
use gateway_core::VenueConfig;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::messages::*;
use super::params::*;
use crate::signing::{to_param_map, ApiCredentials, ParamMap, SignatureScheme};
use crate::{ExchangeError, ExchangeResult};

type BoxedSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// 세션 상태.
///
/// `Disconnected → Connected → Authenticated → Closed` 순서로만 진행하며
/// `Closed`는 종료 상태입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Authenticated,
    Closed,
}

/// 클라이언트 설정.
#[derive(Debug, Clone)]
pub struct SignedClientConfig {
    /// WebSocket API URL
    pub url: String,
    /// 기본 요청 타임아웃 (연결 타임아웃에도 사용)
    pub request_timeout: Duration,
    /// keepalive ping 간격
    pub keepalive_interval: Duration,
    /// 읽기 데드라인 (프레임 수신마다 갱신)
    pub read_deadline: Duration,
    /// 프레임당 쓰기 데드라인
    pub write_timeout: Duration,
}

impl Default for SignedClientConfig {
    fn default() -> Self {
        Self::from(&VenueConfig::default())
    }
}

impl From<&VenueConfig> for SignedClientConfig {
    fn from(venue: &VenueConfig) -> Self {
        Self {
            url: venue.ws_api_url.clone(),
            request_timeout: venue.request_timeout(),
            keepalive_interval: venue.keepalive_interval(),
            read_deadline: venue.read_deadline(),
            write_timeout: venue.request_timeout(),
        }
    }
}

/// 응답 대기 중인 요청.
struct PendingRequest {
    tx: oneshot::Sender<ExchangeResult<Value>>,
    method: String,
    created_at: Instant,
}

/// 읽기/쓰기/keepalive 태스크가 공유하는 상태.
struct Shared {
    writer: tokio::sync::Mutex<BoxedSink>,
    pending: Mutex<HashMap<String, PendingRequest>>,
    state: Mutex<SessionState>,
    rate_limits: Mutex<Option<Value>>,
    shutdown: CancellationToken,
    write_timeout: Duration,
}

/// 뮤텍스 잠금 (poison 시 복구).
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    /// 쓰기 뮤텍스 아래에서 프레임 하나를 보냅니다. 실패 시 클라이언트를 닫습니다.
    async fn write(&self, msg: Message) -> ExchangeResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(ExchangeError::Closed);
        }

        let mut writer = self.writer.lock().await;
        match tokio::time::timeout(self.write_timeout, writer.send(msg)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                drop(writer);
                self.fail(&format!("write failed: {}", e));
                Err(ExchangeError::WebSocket(e.to_string()))
            }
            Err(_) => {
                drop(writer);
                self.fail("write deadline exceeded");
                Err(ExchangeError::Disconnected("write deadline exceeded".to_string()))
            }
        }
    }

    /// 수신 프레임을 상관 ID로 대기자에게 전달합니다.
    ///
    /// 파싱 실패나 매칭되지 않는 ID는 로그만 남기고 버립니다.
    fn dispatch(&self, text: &str) {
        let response: WsApiResponse = match serde_json::from_str(text) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "응답 프레임 파싱 실패, 무시");
                return;
            }
        };

        if let Some(limits) = &response.rate_limits {
            *lock(&self.rate_limits) = Some(limits.clone());
        }

        let Some(id) = response.id.clone() else {
            debug!("상관 ID 없는 프레임 무시");
            return;
        };

        let entry = lock(&self.pending).remove(&id);
        match entry {
            Some(pending) => {
                trace!(
                    id = %id,
                    method = %pending.method,
                    elapsed_ms = pending.created_at.elapsed().as_millis() as u64,
                    "응답 수신"
                );
                // 대기자가 이미 떠났으면 결과는 버려집니다.
                let _ = pending.tx.send(response.into_result());
            }
            None => {
                warn!(id = %id, "매칭되는 요청 없음 (지연 응답), 무시");
            }
        }
    }

    /// `Closed`로 전환하고 모든 대기자를 해제합니다. 최초 호출에서만 `true`.
    fn shutdown(&self) -> bool {
        {
            let mut state = lock(&self.state);
            if *state == SessionState::Closed {
                return false;
            }
            *state = SessionState::Closed;
        }

        self.shutdown.cancel();

        let drained: Vec<PendingRequest> = lock(&self.pending).drain().map(|(_, p)| p).collect();
        for pending in drained {
            let _ = pending.tx.send(Err(ExchangeError::Closed));
        }
        true
    }

    /// 전송 계층 실패로 종료.
    fn fail(&self, reason: &str) {
        if self.shutdown() {
            warn!(reason = %reason, "WebSocket API 연결 종료 (재연결은 감독 계층 담당)");
        }
    }

    fn set_state(&self, next: SessionState) {
        let mut state = lock(&self.state);
        if *state != SessionState::Closed {
            debug!(from = ?*state, to = ?next, "세션 상태 전환");
            *state = next;
        }
    }
}

/// 요청 대기 항목 정리 가드.
///
/// 응답, 타임아웃, 호출자 취소 중 어떤 경로로 끝나도 대기 테이블에서 제거합니다.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(&self.shared.pending).remove(&self.id);
    }
}

/// 서명 기반 WebSocket API 클라이언트.
pub struct SignedWsClient {
    shared: Arc<Shared>,
    credentials: ApiCredentials,
    config: SignedClientConfig,
}

impl fmt::Debug for SignedWsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedWsClient")
            .field("url", &self.config.url)
            .field("credentials", &self.credentials)
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl SignedWsClient {
    /// 거래소에 연결합니다 (`Connected` 상태로 반환).
    pub async fn connect(
        config: SignedClientConfig,
        credentials: ApiCredentials,
    ) -> ExchangeResult<Self> {
        info!(url = %config.url, scheme = ?credentials.scheme(), "WebSocket API 연결 중");

        let (ws, _) = tokio::time::timeout(config.request_timeout, connect_async(config.url.as_str()))
            .await
            .map_err(|_| ExchangeError::Timeout(format!("connect {}", config.url)))?
            .map_err(|e| ExchangeError::NetworkError(e.to_string()))?;

        info!("WebSocket API 연결 완료");
        Ok(Self::from_stream(ws, config, credentials))
    }

    /// 이미 연결된 전송 계층으로 클라이언트를 만듭니다.
    ///
    /// 읽기 태스크와 keepalive 태스크를 즉시 시작하므로 Tokio 런타임 안에서
    /// 호출해야 합니다.
    pub fn from_stream<S>(ws: S, config: SignedClientConfig, credentials: ApiCredentials) -> Self
    where
        S: Stream<Item = Result<Message, WsError>>
            + Sink<Message, Error = WsError>
            + Send
            + Unpin
            + 'static,
    {
        let (write, read) = ws.split();

        let shared = Arc::new(Shared {
            writer: tokio::sync::Mutex::new(Box::pin(write)),
            pending: Mutex::new(HashMap::new()),
            state: Mutex::new(SessionState::Disconnected),
            rate_limits: Mutex::new(None),
            shutdown: CancellationToken::new(),
            write_timeout: config.write_timeout,
        });

        tokio::spawn(read_loop(shared.clone(), read, config.read_deadline));
        tokio::spawn(keepalive_loop(shared.clone(), config.keepalive_interval));
        shared.set_state(SessionState::Connected);

        Self {
            shared,
            credentials,
            config,
        }
    }

    /// 현재 세션 상태.
    pub fn state(&self) -> SessionState {
        *lock(&self.shared.state)
    }

    /// 인증 완료 여부.
    pub fn is_authenticated(&self) -> bool {
        self.state() == SessionState::Authenticated
    }

    /// 종료 여부.
    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// 클라이언트가 닫힐 때까지 대기합니다.
    pub async fn closed(&self) {
        self.shared.shutdown.cancelled().await
    }

    /// 대기 중인 요청 수.
    pub fn pending_count(&self) -> usize {
        lock(&self.shared.pending).len()
    }

    /// 마지막으로 관측한 `rateLimits` 값.
    pub fn last_rate_limits(&self) -> Option<Value> {
        lock(&self.shared.rate_limits).clone()
    }

    /// 서명 방식.
    pub fn scheme(&self) -> SignatureScheme {
        self.credentials.scheme()
    }

    /// 연결을 닫습니다. 여러 번 호출해도 안전합니다.
    ///
    /// 대기 중인 모든 요청은 `Closed` 에러로 해제됩니다.
    pub async fn close(&self) {
        if !self.shared.shutdown() {
            return;
        }
        info!("WebSocket API 연결 종료 요청");

        let mut writer = self.shared.writer.lock().await;
        let _ = tokio::time::timeout(self.shared.write_timeout, writer.send(Message::Close(None)))
            .await;
    }

    /// 세션 로그온 (`Connected → Authenticated`).
    ///
    /// 거래소가 거부하면 `Unauthorized`를 반환하며 연결은 유지됩니다.
    pub async fn logon(&self) -> ExchangeResult<Value> {
        self.logon_with(&LogonParams::default()).await
    }

    /// 파라미터를 지정한 세션 로그온.
    pub async fn logon_with(&self, params: &LogonParams) -> ExchangeResult<Value> {
        let result = self
            .request(METHOD_SESSION_LOGON, to_param_map(params)?, None)
            .await;

        match result {
            Ok(value) => {
                self.shared.set_state(SessionState::Authenticated);
                info!(api_key = %self.credentials.masked_key(), "세션 인증 완료");
                Ok(value)
            }
            Err(
                e @ (ExchangeError::ApiError { .. }
                | ExchangeError::Unauthorized(_)
                | ExchangeError::TimestampError(_)
                | ExchangeError::RateLimited),
            ) => {
                warn!(error = %e, "세션 로그온 거부");
                Err(e.into_logon_rejection())
            }
            Err(e) => {
                warn!(error = %e, "세션 로그온 실패");
                Err(e)
            }
        }
    }

    /// 세션 상태 조회.
    pub async fn session_status(&self) -> ExchangeResult<Value> {
        self.request_unsigned(METHOD_SESSION_STATUS, ParamMap::new(), None)
            .await
    }

    /// 세션 로그아웃 (`Authenticated → Connected`).
    pub async fn logout(&self) -> ExchangeResult<Value> {
        let value = self
            .request_unsigned(METHOD_SESSION_LOGOUT, ParamMap::new(), None)
            .await?;
        self.shared.set_state(SessionState::Connected);
        Ok(value)
    }

    /// 신규 주문.
    pub async fn place_order(&self, params: &PlaceOrderParams) -> ExchangeResult<Value> {
        params.validate()?;
        info!(
            symbol = %params.symbol,
            side = ?params.side,
            order_type = ?params.order_type,
            "주문 전송"
        );
        self.request(METHOD_ORDER_PLACE, to_param_map(params)?, None)
            .await
    }

    /// 주문 정정.
    pub async fn modify_order(&self, params: &ModifyOrderParams) -> ExchangeResult<Value> {
        params.validate()?;
        self.request(METHOD_ORDER_MODIFY, to_param_map(params)?, None)
            .await
    }

    /// 주문 취소.
    pub async fn cancel_order(&self, params: &CancelOrderParams) -> ExchangeResult<Value> {
        params.validate()?;
        info!(symbol = %params.symbol, order_id = ?params.order_id, "주문 취소");
        self.request(METHOD_ORDER_CANCEL, to_param_map(params)?, None)
            .await
    }

    /// 주문 조회.
    pub async fn query_order(&self, params: &QueryOrderParams) -> ExchangeResult<Value> {
        params.validate()?;
        self.request(METHOD_ORDER_STATUS, to_param_map(params)?, None)
            .await
    }

    /// 포지션 조회.
    pub async fn positions(&self, params: &PositionParams) -> ExchangeResult<Value> {
        self.request(METHOD_ACCOUNT_POSITION, to_param_map(params)?, None)
            .await
    }

    /// 조건부 주문 생성.
    pub async fn place_algo_order(&self, params: &PlaceAlgoOrderParams) -> ExchangeResult<Value> {
        params.validate()?;
        info!(
            symbol = %params.symbol,
            side = ?params.side,
            trigger_price = %params.trigger_price,
            "조건부 주문 전송"
        );
        self.request(METHOD_ALGO_ORDER_PLACE, to_param_map(params)?, None)
            .await
    }

    /// 조건부 주문 취소.
    pub async fn cancel_algo_order(
        &self,
        params: &CancelAlgoOrderParams,
    ) -> ExchangeResult<Value> {
        params.validate()?;
        self.request(METHOD_ALGO_ORDER_CANCEL, to_param_map(params)?, None)
            .await
    }

    /// 서명된 요청을 보내고 응답을 기다립니다.
    ///
    /// `timeout`이 `None`이면 설정의 기본 타임아웃을 사용합니다.
    pub async fn request(
        &self,
        method: &str,
        mut params: ParamMap,
        timeout: Option<Duration>,
    ) -> ExchangeResult<Value> {
        self.credentials
            .sign_params(&mut params, Utc::now().timestamp_millis())?;
        self.send_request(method, params, timeout).await
    }

    /// 서명 없이 요청을 보내고 응답을 기다립니다.
    pub async fn request_unsigned(
        &self,
        method: &str,
        params: ParamMap,
        timeout: Option<Duration>,
    ) -> ExchangeResult<Value> {
        self.send_request(method, params, timeout).await
    }

    async fn send_request(
        &self,
        method: &str,
        params: ParamMap,
        timeout: Option<Duration>,
    ) -> ExchangeResult<Value> {
        if self.is_closed() {
            return Err(ExchangeError::Closed);
        }

        let id = Uuid::new_v4().to_string();
        let frame = serde_json::to_string(&WsApiRequest {
            id: id.clone(),
            method: method.to_string(),
            params,
        })?;

        let (tx, rx) = oneshot::channel();
        lock(&self.shared.pending).insert(
            id.clone(),
            PendingRequest {
                tx,
                method: method.to_string(),
                created_at: Instant::now(),
            },
        );
        let _guard = PendingGuard {
            shared: &self.shared,
            id: id.clone(),
        };

        self.shared.write(Message::Text(frame)).await?;

        let timeout = timeout.unwrap_or(self.config.request_timeout);
        tokio::select! {
            biased;

            result = rx => result.unwrap_or(Err(ExchangeError::Closed)),
            _ = self.shared.shutdown.cancelled() => Err(ExchangeError::Closed),
            _ = tokio::time::sleep(timeout) => {
                debug!(id = %id, method = %method, "요청 타임아웃");
                Err(ExchangeError::Timeout(format!(
                    "{} ({} ms)",
                    method,
                    timeout.as_millis()
                )))
            }
        }
    }
}

impl Drop for SignedWsClient {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

/// 단일 읽기 태스크.
async fn read_loop<R>(shared: Arc<Shared>, mut read: R, read_deadline: Duration)
where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            next = tokio::time::timeout(read_deadline, read.next()) => next,
        };

        match next {
            Err(_) => {
                shared.fail("read deadline exceeded");
                break;
            }
            Ok(None) => {
                shared.fail("connection closed by venue");
                break;
            }
            Ok(Some(Err(e))) => {
                shared.fail(&format!("read failed: {}", e));
                break;
            }
            Ok(Some(Ok(msg))) => match msg {
                Message::Text(text) => shared.dispatch(&text),
                Message::Binary(data) => match std::str::from_utf8(&data) {
                    Ok(text) => shared.dispatch(text),
                    Err(_) => warn!(len = data.len(), "UTF-8이 아닌 바이너리 프레임 무시"),
                },
                Message::Ping(_) | Message::Pong(_) => trace!("제어 프레임 수신"),
                Message::Close(frame) => {
                    shared.fail(&format!("close frame received: {:?}", frame));
                    break;
                }
                Message::Frame(_) => {}
            },
        }
    }
}

/// keepalive 태스크. 쓰기 실패는 `Shared::write`가 클라이언트를 닫습니다.
async fn keepalive_loop(shared: Arc<Shared>, interval: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if shared.write(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
                trace!("keepalive ping 전송");
            }
        }
    }
}
