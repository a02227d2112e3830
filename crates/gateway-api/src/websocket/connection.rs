//! 다운스트림 WebSocket 연결.
//!
//! 수락한 소켓 하나를 감싸고 읽기/쓰기 펌프를 별도 태스크로 돌립니다.
//!
//! - 송신 큐는 고정 용량이며 가득 차면 **새 메시지를 버립니다** (호출자는 대기하지 않음).
//! - 쓰기 펌프만 소켓에 씁니다. 메시지마다 쓰기 데드라인을 적용하고 실패하면 연결을 닫습니다.
//! - 읽기 펌프는 프레임을 받을 때마다 읽기 데드라인을 갱신하고 `ping`/`refresh` 제어 명령을 처리합니다.
//!
//! 펌프는 axum과 tungstenite 어느 쪽 소켓이든 `WsFrame`만 구현되어 있으면 동작합니다.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::extract::ws::Message as AxumMessage;
use futures::{Sink, SinkExt, Stream, StreamExt};
use gateway_core::{connection_span, DownstreamConfig};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn, Instrument};

use super::messages::{ControlCommand, PONG_FRAME};
use crate::metrics::{decrement_websocket_connections, increment_websocket_connections, record_dropped_message};

/// 수신 프레임 분류.
#[derive(Debug)]
pub enum FrameKind<'a> {
    Text(&'a str),
    Binary(&'a [u8]),
    Ping,
    Pong,
    Close,
    Other,
}

/// 펌프가 다룰 수 있는 WebSocket 메시지 타입.
pub trait WsFrame: Send + Unpin + 'static {
    /// 텍스트 프레임 생성.
    fn text(text: String) -> Self;
    /// 프로토콜 ping 프레임 생성.
    fn ping() -> Self;
    /// close 프레임 생성.
    fn close() -> Self;
    /// 수신 프레임 분류.
    fn kind(&self) -> FrameKind<'_>;
}

impl WsFrame for AxumMessage {
    fn text(text: String) -> Self {
        AxumMessage::Text(text.into())
    }

    fn ping() -> Self {
        AxumMessage::Ping(Default::default())
    }

    fn close() -> Self {
        AxumMessage::Close(None)
    }

    fn kind(&self) -> FrameKind<'_> {
        match self {
            AxumMessage::Text(text) => FrameKind::Text(text.as_str()),
            AxumMessage::Binary(data) => FrameKind::Binary(data),
            AxumMessage::Ping(_) => FrameKind::Ping,
            AxumMessage::Pong(_) => FrameKind::Pong,
            AxumMessage::Close(_) => FrameKind::Close,
        }
    }
}

impl WsFrame for TungsteniteMessage {
    fn text(text: String) -> Self {
        TungsteniteMessage::Text(text)
    }

    fn ping() -> Self {
        TungsteniteMessage::Ping(Vec::new())
    }

    fn close() -> Self {
        TungsteniteMessage::Close(None)
    }

    fn kind(&self) -> FrameKind<'_> {
        match self {
            TungsteniteMessage::Text(text) => FrameKind::Text(text),
            TungsteniteMessage::Binary(data) => FrameKind::Binary(data),
            TungsteniteMessage::Ping(_) => FrameKind::Ping,
            TungsteniteMessage::Pong(_) => FrameKind::Pong,
            TungsteniteMessage::Close(_) => FrameKind::Close,
            TungsteniteMessage::Frame(_) => FrameKind::Other,
        }
    }
}

/// 다운스트림 연결 설정.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// 송신 큐 용량
    pub queue_capacity: usize,
    /// 메시지당 쓰기 데드라인
    pub write_deadline: Duration,
    /// 읽기 데드라인
    pub read_deadline: Duration,
    /// 서버 ping 간격 (읽기 데드라인보다 짧아야 함)
    pub ping_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from(&DownstreamConfig::default())
    }
}

impl From<&DownstreamConfig> for ConnectionConfig {
    fn from(config: &DownstreamConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity.max(1),
            write_deadline: config.write_deadline(),
            read_deadline: config.read_deadline(),
            ping_interval: config.ping_interval(),
        }
    }
}

/// `refresh` 명령 수신 시 호출되는 훅.
pub type RefreshHook = Arc<dyn Fn() + Send + Sync>;

struct DownstreamInner {
    id: String,
    tx: mpsc::Sender<String>,
    token: CancellationToken,
    refresh_hook: Mutex<Option<RefreshHook>>,
    dropped: AtomicU64,
}

/// 다운스트림 연결 핸들.
///
/// 복제 가능하며 모든 메서드는 동시에 호출해도 안전합니다.
#[derive(Clone)]
pub struct Downstream {
    inner: Arc<DownstreamInner>,
}

impl fmt::Debug for Downstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Downstream")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .field("dropped", &self.dropped_count())
            .finish()
    }
}

impl Downstream {
    /// 소켓 없이 핸들과 송신 큐 수신 측을 만듭니다.
    ///
    /// `spawn_connection`이 내부에서 사용하며, 테스트에서는 큐를 직접 관찰할 때 씁니다.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let inner = DownstreamInner {
            id: uuid::Uuid::new_v4().to_string(),
            tx,
            token: CancellationToken::new(),
            refresh_hook: Mutex::new(None),
            dropped: AtomicU64::new(0),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    /// 연결 ID.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// 메시지를 송신 큐에 넣습니다. 대기하지 않습니다.
    ///
    /// 큐가 가득 찼거나 연결이 닫혔으면 메시지를 버리고 `false`를 반환합니다.
    pub fn send(&self, message: impl Into<String>) -> bool {
        if self.is_closed() {
            return false;
        }

        match self.inner.tx.try_send(message.into()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                record_dropped_message();
                debug!(conn_id = %self.inner.id, dropped, "송신 큐 가득 참, 메시지 버림");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// 연결을 닫습니다. 여러 번, 동시에 호출해도 안전합니다.
    pub fn close(&self) {
        self.inner.token.cancel();
    }

    /// 닫힘 여부.
    pub fn is_closed(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// 연결이 닫힐 때까지 대기합니다.
    pub async fn closed(&self) {
        self.inner.token.cancelled().await
    }

    /// 연결 종료 토큰 (종료 관찰용 복제본).
    pub fn close_token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// 큐가 가득 차서 버린 메시지 수.
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// `refresh`/`snapshot` 명령을 받을 때 호출할 훅을 등록합니다 (기존 훅 교체).
    pub fn set_refresh_hook<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut slot = self
            .inner
            .refresh_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Arc::new(hook));
    }

    fn fire_refresh(&self) {
        let hook = self
            .inner
            .refresh_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match hook {
            Some(hook) => hook(),
            None => trace!(conn_id = %self.inner.id, "refresh 훅 없음, 무시"),
        }
    }

    /// 수신 텍스트 프레임 처리.
    fn handle_text(&self, text: &str) {
        match ControlCommand::parse(text) {
            Some(ControlCommand::Ping) => {
                self.send(PONG_FRAME);
            }
            Some(ControlCommand::Refresh) => self.fire_refresh(),
            None => trace!(conn_id = %self.inner.id, "제어 명령이 아닌 프레임 무시"),
        }
    }
}

/// 소켓에 대한 다운스트림 연결을 시작합니다.
///
/// 읽기/쓰기 펌프 태스크를 띄우고 핸들을 반환합니다. 어느 펌프든 끝나면
/// 연결이 닫히고 다른 펌프도 곧바로 종료됩니다.
pub fn spawn_connection<S, M, E>(socket: S, config: ConnectionConfig) -> Downstream
where
    S: Stream<Item = Result<M, E>> + Sink<M> + Send + 'static,
    <S as Sink<M>>::Error: fmt::Display,
    M: WsFrame,
    E: fmt::Display + Send + 'static,
{
    let (downstream, rx) = Downstream::channel(config.queue_capacity);
    let (sink, stream) = socket.split::<M>();

    increment_websocket_connections();
    info!(conn_id = %downstream.id(), "다운스트림 연결 수립");

    let span = connection_span!("downstream", downstream.id());
    tokio::spawn(
        write_pump(downstream.clone(), sink, rx, config.clone()).instrument(span.clone()),
    );
    tokio::spawn(read_pump(downstream.clone(), stream, config.read_deadline).instrument(span));

    let watcher = downstream.clone();
    tokio::spawn(async move {
        watcher.closed().await;
        decrement_websocket_connections();
        info!(conn_id = %watcher.id(), dropped = watcher.dropped_count(), "다운스트림 연결 종료");
    });

    downstream
}

/// 쓰기 펌프 (소켓의 유일한 writer).
async fn write_pump<K, M>(
    downstream: Downstream,
    mut sink: K,
    mut rx: mpsc::Receiver<String>,
    config: ConnectionConfig,
) where
    K: Sink<M> + Unpin,
    K::Error: fmt::Display,
    M: WsFrame,
{
    let token = downstream.close_token();
    let mut ping = tokio::time::interval_at(
        tokio::time::Instant::now() + config.ping_interval,
        config.ping_interval,
    );

    loop {
        let frame = tokio::select! {
            biased;

            _ = token.cancelled() => break,
            next = rx.recv() => match next {
                Some(text) => M::text(text),
                None => break,
            },
            _ = ping.tick() => M::ping(),
        };

        match tokio::time::timeout(config.write_deadline, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "쓰기 실패, 연결 종료");
                break;
            }
            Err(_) => {
                warn!("쓰기 데드라인 초과, 연결 종료");
                break;
            }
        }
    }

    downstream.close();
    let _ = tokio::time::timeout(config.write_deadline, sink.send(M::close())).await;
    debug!("쓰기 펌프 종료");
}

/// 읽기 펌프.
async fn read_pump<R, M, E>(downstream: Downstream, mut stream: R, read_deadline: Duration)
where
    R: Stream<Item = Result<M, E>> + Unpin,
    M: WsFrame,
    E: fmt::Display,
{
    let token = downstream.close_token();

    loop {
        let next = tokio::select! {
            _ = token.cancelled() => break,
            next = tokio::time::timeout(read_deadline, stream.next()) => next,
        };

        let frame = match next {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                debug!(error = %e, "읽기 실패");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                debug!("읽기 데드라인 초과");
                break;
            }
        };

        match frame.kind() {
            FrameKind::Text(text) => downstream.handle_text(text),
            FrameKind::Binary(data) => match std::str::from_utf8(data) {
                Ok(text) => downstream.handle_text(text),
                Err(_) => trace!("UTF-8이 아닌 바이너리 프레임 무시"),
            },
            FrameKind::Ping | FrameKind::Pong => trace!("제어 프레임 수신, 데드라인 갱신"),
            FrameKind::Close => break,
            FrameKind::Other => {}
        }
    }

    downstream.close();
    debug!("읽기 펌프 종료");
}
