//! 주소 모니터링 릴레이.
//!
//! 다운스트림 연결 하나마다 세션 하나를 띄웁니다. 세션은 두 개의 태스크로 구성됩니다:
//!
//! - 포워딩: 업스트림 사용자 피드에 연결해 구독 요청을 보내고, 받은 텍스트 프레임을
//!   그대로 다운스트림에 전달합니다. 연결이 끊기면 고정 대기 후 재연결합니다.
//! - 스냅샷: 주기적으로 (또는 `refresh` 명령 시) REST 스냅샷을 채널별로 병렬 조회해
//!   성공한 채널마다 프레임을 보냅니다. 모두 실패하면 합성 에러 프레임 하나를 보냅니다.
//!
//! 두 태스크 모두 다운스트림 종료 토큰을 관찰하며, 연결이 닫히면 대기 중이던
//! 재연결 시도까지 포함해 곧바로 멈춥니다. 업스트림 쓰기도 종료 토큰과 쓰기 제한
//! 시간에 묶여 있어, 읽지 않는 업스트림 때문에 세션이 남지 않습니다.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::{SinkExt, StreamExt};
use gateway_core::{connection_span, RelayConfig};
use gateway_exchange::{
    ExchangeError, SnapshotFetcher, UpstreamDialer, UpstreamSink, UpstreamSocket,
};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::connection::Downstream;
use super::messages::{SnapshotErrorFrame, SnapshotFrame, SourceError};
use super::trigger::{CoalescedTrigger, TriggerReceiver};
use crate::metrics::record_relay_reconnect;

/// 릴레이 동작 설정.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// 재연결 고정 대기 시간
    pub backoff: Duration,
    /// 업스트림 ping 간격
    pub keepalive_interval: Duration,
    /// 스냅샷 갱신 간격
    pub snapshot_interval: Duration,
    /// REST 호출별 타임아웃
    pub call_timeout: Duration,
    /// 업스트림 프레임 쓰기 제한 시간
    pub write_timeout: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

impl From<&RelayConfig> for RelaySettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            backoff: config.backoff(),
            keepalive_interval: config.keepalive_interval(),
            snapshot_interval: config.snapshot_interval(),
            call_timeout: config.call_timeout(),
            write_timeout: config.write_timeout(),
        }
    }
}

/// 세션 통계.
#[derive(Debug, Default)]
struct RelayStats {
    dial_attempts: AtomicU64,
    backoff_waits: AtomicU64,
    snapshot_rounds: AtomicU64,
}

/// 업스트림 연결이 끝난 이유.
enum UpstreamEnd {
    /// 다운스트림이 닫힘 (재연결하지 않음)
    DownstreamClosed,
    /// 업스트림 쪽 문제 (재연결)
    Lost(String),
}

/// 주소 하나에 대한 릴레이 세션 핸들.
#[derive(Clone)]
pub struct RelaySession {
    address: Arc<str>,
    downstream: Downstream,
    refresh: CoalescedTrigger,
    stats: Arc<RelayStats>,
}

impl std::fmt::Debug for RelaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySession")
            .field("address", &self.address)
            .field("conn_id", &self.downstream.id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RelaySession {
    /// 세션을 시작합니다.
    ///
    /// 다운스트림의 `refresh` 명령은 즉시 스냅샷 라운드를 요청합니다.
    pub fn spawn(
        address: impl Into<String>,
        downstream: Downstream,
        dialer: Arc<dyn UpstreamDialer>,
        fetcher: Arc<dyn SnapshotFetcher>,
        settings: RelaySettings,
    ) -> Self {
        let address: Arc<str> = Arc::from(address.into());
        let (refresh, refresh_rx) = CoalescedTrigger::new();
        let stats = Arc::new(RelayStats::default());

        let hook = refresh.clone();
        downstream.set_refresh_hook(move || {
            hook.fire();
        });

        info!(address = %address, conn_id = %downstream.id(), upstream = dialer.name(), "릴레이 세션 시작");

        let span = connection_span!("relay", downstream.id(), &*address);
        tokio::spawn(
            forward_loop(
                address.clone(),
                downstream.clone(),
                dialer,
                settings.clone(),
                stats.clone(),
            )
            .instrument(span.clone()),
        );
        tokio::spawn(
            snapshot_loop(
                address.clone(),
                downstream.clone(),
                fetcher,
                settings,
                refresh_rx,
                stats.clone(),
            )
            .instrument(span),
        );

        Self {
            address,
            downstream,
            refresh,
            stats,
        }
    }

    /// 모니터링 대상 주소.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// 스냅샷 라운드를 앞당깁니다. 이미 대기 중이면 `false`.
    pub fn refresh(&self) -> bool {
        self.refresh.fire()
    }

    /// 세션을 닫습니다 (다운스트림 연결도 함께 닫힘).
    pub fn close(&self) {
        self.downstream.close();
    }

    /// 닫힘 여부.
    pub fn is_closed(&self) -> bool {
        self.downstream.is_closed()
    }

    /// 세션이 닫힐 때까지 대기합니다.
    pub async fn closed(&self) {
        self.downstream.closed().await
    }

    /// 업스트림 연결 시도 횟수.
    pub fn dial_attempts(&self) -> u64 {
        self.stats.dial_attempts.load(Ordering::SeqCst)
    }

    /// 재연결 대기 횟수.
    pub fn backoff_waits(&self) -> u64 {
        self.stats.backoff_waits.load(Ordering::SeqCst)
    }

    /// 완료된 스냅샷 라운드 수.
    pub fn snapshot_rounds(&self) -> u64 {
        self.stats.snapshot_rounds.load(Ordering::SeqCst)
    }
}

/// 업스트림 연결/재연결 루프.
async fn forward_loop(
    address: Arc<str>,
    downstream: Downstream,
    dialer: Arc<dyn UpstreamDialer>,
    settings: RelaySettings,
    stats: Arc<RelayStats>,
) {
    let token = downstream.close_token();

    loop {
        stats.dial_attempts.fetch_add(1, Ordering::SeqCst);
        let dialed = tokio::select! {
            biased;

            _ = token.cancelled() => break,
            dialed = dialer.dial() => dialed,
        };

        match dialed {
            Ok(socket) => {
                debug!(upstream = dialer.name(), "업스트림 연결됨");
                match pump_upstream(&address, &downstream, dialer.as_ref(), socket, &settings).await {
                    UpstreamEnd::DownstreamClosed => break,
                    UpstreamEnd::Lost(reason) => warn!(reason = %reason, "업스트림 연결 끊김"),
                }
            }
            Err(e) => warn!(error = %e, "업스트림 연결 실패"),
        }

        stats.backoff_waits.fetch_add(1, Ordering::SeqCst);
        record_relay_reconnect();
        tokio::select! {
            biased;

            _ = token.cancelled() => break,
            _ = tokio::time::sleep(settings.backoff) => {}
        }
    }

    debug!("포워딩 루프 종료");
}

/// 연결된 업스트림에서 다운스트림으로 프레임을 전달합니다.
async fn pump_upstream(
    address: &str,
    downstream: &Downstream,
    dialer: &dyn UpstreamDialer,
    socket: UpstreamSocket,
    settings: &RelaySettings,
) -> UpstreamEnd {
    let UpstreamSocket {
        mut sink,
        mut stream,
    } = socket;
    let token = downstream.close_token();

    for subscription in dialer.subscription_messages(address) {
        let sent = send_upstream(
            &mut sink,
            Message::Text(subscription),
            &token,
            settings.write_timeout,
            "subscribe",
        );
        if let Err(end) = sent.await {
            return end;
        }
    }

    let mut keepalive = tokio::time::interval_at(
        tokio::time::Instant::now() + settings.keepalive_interval,
        settings.keepalive_interval,
    );
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            // sink/stream을 드롭하면 업스트림 소켓이 닫힘
            _ = token.cancelled() => return UpstreamEnd::DownstreamClosed,
            _ = keepalive.tick() => {
                let sent = send_upstream(
                    &mut sink,
                    Message::Text(dialer.ping_message()),
                    &token,
                    settings.write_timeout,
                    "keepalive",
                );
                if let Err(end) = sent.await {
                    return end;
                }
            }
            next = stream.next() => match next {
                Some(Ok(Message::Text(text))) => {
                    downstream.send(text);
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => {
                        downstream.send(text);
                    }
                    Err(e) => debug!(len = e.as_bytes().len(), "UTF-8이 아닌 바이너리 프레임 무시"),
                },
                Some(Ok(Message::Close(frame))) => {
                    return UpstreamEnd::Lost(format!("closed by peer: {:?}", frame));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return UpstreamEnd::Lost(e.to_string()),
                None => return UpstreamEnd::Lost("stream ended".to_string()),
            },
        }
    }
}

/// 업스트림에 프레임 하나를 씁니다.
///
/// 다운스트림이 닫히면 쓰기를 버리고 `DownstreamClosed`, 제한 시간을 넘기면 `Lost`.
async fn send_upstream(
    sink: &mut UpstreamSink,
    message: Message,
    token: &CancellationToken,
    deadline: Duration,
    what: &str,
) -> Result<(), UpstreamEnd> {
    tokio::select! {
        biased;

        _ = token.cancelled() => Err(UpstreamEnd::DownstreamClosed),
        sent = tokio::time::timeout(deadline, sink.send(message)) => match sent {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(UpstreamEnd::Lost(format!("{}: {}", what, e))),
            Err(_) => Err(UpstreamEnd::Lost(format!(
                "{}: write timed out after {} ms",
                what,
                deadline.as_millis()
            ))),
        },
    }
}

/// REST 스냅샷 루프.
async fn snapshot_loop(
    address: Arc<str>,
    downstream: Downstream,
    fetcher: Arc<dyn SnapshotFetcher>,
    settings: RelaySettings,
    mut refresh: TriggerReceiver,
    stats: Arc<RelayStats>,
) {
    let token = downstream.close_token();
    let mut ticker = tokio::time::interval(settings.snapshot_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
            Some(()) = refresh.recv() => debug!("스냅샷 새로고침 요청"),
        }

        tokio::select! {
            biased;

            _ = token.cancelled() => break,
            _ = snapshot_round(&address, &downstream, fetcher.as_ref(), settings.call_timeout) => {
                stats.snapshot_rounds.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    debug!("스냅샷 루프 종료");
}

/// 모든 스냅샷 채널을 병렬 조회해 결과를 보냅니다.
async fn snapshot_round(
    address: &str,
    downstream: &Downstream,
    fetcher: &dyn SnapshotFetcher,
    call_timeout: Duration,
) {
    let channels = fetcher.channels();

    let results = join_all(channels.iter().map(|channel| async move {
        match tokio::time::timeout(call_timeout, fetcher.fetch(channel, address)).await {
            Ok(result) => result,
            Err(_) => Err(ExchangeError::Timeout(format!(
                "{} after {} ms",
                channel,
                call_timeout.as_millis()
            ))),
        }
    }))
    .await;

    let mut failures = Vec::new();
    for (channel, result) in channels.iter().zip(results) {
        let frame = result.and_then(|data| {
            serde_json::to_string(&SnapshotFrame::new(channel, address, &data))
                .map_err(ExchangeError::from)
        });

        match frame {
            Ok(frame) => {
                downstream.send(frame);
            }
            Err(e) => {
                warn!(channel = %channel, error = %e, "스냅샷 조회 실패");
                failures.push(SourceError::new(channel.as_str(), e));
            }
        }
    }

    if !channels.is_empty() && failures.len() == channels.len() {
        match serde_json::to_string(&SnapshotErrorFrame::new(address, &failures)) {
            Ok(frame) => {
                downstream.send(frame);
            }
            Err(e) => warn!(error = %e, "스냅샷 에러 프레임 직렬화 실패"),
        }
    }

    debug!(
        channels = channels.len(),
        failed = failures.len(),
        "스냅샷 라운드 완료"
    );
}
