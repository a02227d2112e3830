//! 브로드캐스트 허브.
//!
//! 여러 업스트림 소스를 공유 일정으로 수집해 하나의 스냅샷으로 합치고,
//! 모든 구독자에게 내보냅니다. 구독자 수와 무관하게 수집은 라운드당 한 번입니다.
//!
//! # 수명 주기
//!
//! - `Idle`: 구독자 0명, 백그라운드 루프 없음
//! - `Active`: 첫 구독자가 들어오면 루프 시작 (즉시 1회 수집)
//! - 마지막 구독자가 나가면 유예 시간 후 다시 확인해 여전히 비어 있으면 `Idle`
//!
//! 구독자 집합과 캐시된 스냅샷은 하나의 잠금으로 보호되며, 잠금은 I/O 대기 중에
//! 잡고 있지 않습니다.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use gateway_core::{FeedItem, FeedPayload, HubConfig};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::connection::Downstream;
use super::trigger::{CoalescedTrigger, TriggerReceiver};
use crate::error::FetchError;
use crate::metrics::{record_hub_round, set_hub_subscribers};
use crate::news::normalize_items;

/// 허브가 수집하는 업스트림 소스.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// 페이로드에서 사용할 소스 키.
    fn key(&self) -> &str;

    /// 항목 목록을 가져옵니다.
    async fn fetch(&self) -> Result<Vec<FeedItem>, FetchError>;
}

/// 허브 동작 설정.
#[derive(Debug, Clone)]
pub struct HubSettings {
    /// 채널 태그
    pub channel: String,
    /// 정기 수집 간격
    pub interval: Duration,
    /// 구독자 0명 이후 유예 시간
    pub idle_grace: Duration,
    /// 소스별 타임아웃
    pub source_timeout: Duration,
    /// 소스별 최대 항목 수
    pub max_items_per_source: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self::from(&HubConfig::default())
    }
}

impl From<&HubConfig> for HubSettings {
    fn from(config: &HubConfig) -> Self {
        Self {
            channel: config.channel.clone(),
            interval: config.interval(),
            idle_grace: config.idle_grace(),
            source_timeout: config.source_timeout(),
            max_items_per_source: config.max_items_per_source,
        }
    }
}

/// 캐시된 스냅샷 (페이로드 + 직렬화된 프레임).
struct Snapshot {
    payload: Arc<FeedPayload>,
    frame: String,
}

/// 실행 중인 루프의 제어 신호.
struct ActiveLoop {
    token: CancellationToken,
    trigger: CoalescedTrigger,
}

struct HubState {
    subscribers: HashMap<String, Downstream>,
    snapshot: Option<Snapshot>,
    active: Option<ActiveLoop>,
    /// 구독자가 0명이 될 때마다 증가 (오래된 유예 타이머 무시용)
    idle_epoch: u64,
    loop_starts: u64,
}

struct HubInner {
    settings: HubSettings,
    sources: Vec<Arc<dyn FeedSource>>,
    state: Mutex<HubState>,
}

/// 브로드캐스트 허브 핸들. 복제해서 공유합니다.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("channel", &self.inner.settings.channel)
            .field("sources", &self.inner.sources.len())
            .field("subscribers", &self.subscriber_count())
            .field("active", &self.is_active())
            .finish()
    }
}

impl BroadcastHub {
    /// `Idle` 상태의 허브를 생성합니다.
    pub fn new(settings: HubSettings, sources: Vec<Arc<dyn FeedSource>>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                settings,
                sources,
                state: Mutex::new(HubState {
                    subscribers: HashMap::new(),
                    snapshot: None,
                    active: None,
                    idle_epoch: 0,
                    loop_starts: 0,
                }),
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, HubState> {
        self.inner.lock_state()
    }

    /// 채널 태그.
    pub fn channel(&self) -> &str {
        &self.inner.settings.channel
    }

    /// 구독자를 추가합니다.
    ///
    /// 첫 구독자면 루프를 시작하고, 캐시된 스냅샷이 있으면 즉시 보냅니다.
    /// 연결의 `refresh` 명령은 이 허브의 수집 트리거로 연결됩니다.
    pub fn subscribe(&self, downstream: &Downstream) {
        let weak = Arc::downgrade(&self.inner);
        downstream.set_refresh_hook(move || {
            if let Some(inner) = weak.upgrade() {
                BroadcastHub { inner }.trigger_refresh();
            }
        });

        let count = {
            let mut state = self.lock_state();
            state
                .subscribers
                .insert(downstream.id().to_string(), downstream.clone());

            if state.active.is_none() {
                self.start_loop(&mut state);
            }
            if let Some(snapshot) = &state.snapshot {
                downstream.send(snapshot.frame.clone());
            }
            state.subscribers.len()
        };

        set_hub_subscribers(self.channel(), count);
        debug!(channel = %self.channel(), conn_id = %downstream.id(), subscribers = count, "구독 추가");
    }

    /// 구독자를 제거합니다. 집합이 비면 유예 타이머를 시작합니다.
    pub fn unsubscribe(&self, conn_id: &str) {
        let count = {
            let mut state = self.lock_state();
            if state.subscribers.remove(conn_id).is_none() {
                return;
            }

            if state.subscribers.is_empty() && state.active.is_some() {
                state.idle_epoch += 1;
                let epoch = state.idle_epoch;
                let hub = self.clone();
                let grace = self.inner.settings.idle_grace;
                tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    hub.stop_if_idle(epoch);
                });
            }
            state.subscribers.len()
        };

        set_hub_subscribers(self.channel(), count);
        debug!(channel = %self.channel(), conn_id = %conn_id, subscribers = count, "구독 해제");
    }

    /// 연결이 닫힐 때까지 구독을 유지합니다.
    pub async fn attach(&self, downstream: Downstream) {
        self.subscribe(&downstream);
        downstream.closed().await;
        self.unsubscribe(downstream.id());
    }

    /// 일정 밖의 수집을 요청합니다.
    ///
    /// 소비 전 요청은 하나로 합쳐지며, `Idle` 상태면 아무 일도 하지 않고 `false`.
    pub fn trigger_refresh(&self) -> bool {
        self.lock_state()
            .active
            .as_ref()
            .map(|active| active.trigger.fire())
            .unwrap_or(false)
    }

    /// 루프 실행 여부.
    pub fn is_active(&self) -> bool {
        self.lock_state().active.is_some()
    }

    /// 현재 구독자 수.
    pub fn subscriber_count(&self) -> usize {
        self.lock_state().subscribers.len()
    }

    /// 마지막으로 브로드캐스트한 스냅샷.
    pub fn last_snapshot(&self) -> Option<Arc<FeedPayload>> {
        self.lock_state()
            .snapshot
            .as_ref()
            .map(|s| s.payload.clone())
    }

    /// 지금까지 루프를 시작한 횟수.
    pub fn loop_starts(&self) -> u64 {
        self.lock_state().loop_starts
    }

    /// 구독자와 무관하게 루프를 멈춥니다 (프로세스 종료 시).
    pub fn shutdown(&self) {
        if let Some(active) = self.lock_state().active.take() {
            active.token.cancel();
            info!(channel = %self.channel(), "허브 루프 종료");
        }
    }

    fn start_loop(&self, state: &mut HubState) {
        let token = CancellationToken::new();
        let (trigger, trigger_rx) = CoalescedTrigger::new();

        state.active = Some(ActiveLoop {
            token: token.clone(),
            trigger,
        });
        state.loop_starts += 1;

        info!(channel = %self.channel(), sources = self.inner.sources.len(), "허브 루프 시작");
        tokio::spawn(run_loop(self.inner.clone(), token, trigger_rx));
    }

    fn stop_if_idle(&self, epoch: u64) {
        let mut state = self.lock_state();
        if !state.subscribers.is_empty() || state.idle_epoch != epoch {
            return;
        }

        if let Some(active) = state.active.take() {
            active.token.cancel();
            info!(channel = %self.channel(), "구독자 없음, 허브 루프 중지");
        }
    }
}

impl HubInner {
    fn lock_state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 모든 소스를 동시에 수집해 페이로드를 만듭니다.
    async fn fetch_round(&self) -> FeedPayload {
        let timeout = self.settings.source_timeout;

        let outcomes = join_all(self.sources.iter().map(|source| async move {
            let outcome = match tokio::time::timeout(timeout, source.fetch()).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(timeout.as_millis())),
            };
            (source.key().to_string(), outcome)
        }))
        .await;

        let mut data = BTreeMap::new();
        let mut failures = Vec::new();
        for (key, outcome) in outcomes {
            match outcome {
                Ok(items) => {
                    data.insert(key, normalize_items(items, self.settings.max_items_per_source));
                }
                Err(e) => {
                    warn!(channel = %self.settings.channel, source = %key, error = %e, "소스 수집 실패");
                    data.insert(key.clone(), Vec::new());
                    failures.push(key);
                }
            }
        }

        record_hub_round(&self.settings.channel, failures.len());
        FeedPayload::from_round(self.settings.channel.clone(), data, failures)
    }

    /// 스냅샷을 교체하고 모든 구독자에게 보냅니다.
    fn publish(&self, payload: FeedPayload) {
        let frame = match payload.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "페이로드 직렬화 실패");
                return;
            }
        };

        let targets: Vec<Downstream> = {
            let mut state = self.lock_state();
            state.snapshot = Some(Snapshot {
                payload: Arc::new(payload),
                frame: frame.clone(),
            });
            state.subscribers.values().cloned().collect()
        };

        let delivered = targets
            .iter()
            .filter(|downstream| downstream.send(frame.clone()))
            .count();

        debug!(
            channel = %self.settings.channel,
            subscribers = targets.len(),
            delivered,
            "브로드캐스트 완료"
        );
    }
}

/// 허브 백그라운드 루프.
async fn run_loop(inner: Arc<HubInner>, token: CancellationToken, mut trigger: TriggerReceiver) {
    let mut ticker = tokio::time::interval(inner.settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
            Some(()) = trigger.recv() => debug!(channel = %inner.settings.channel, "수집 트리거 수신"),
        }

        let payload = tokio::select! {
            biased;

            _ = token.cancelled() => break,
            payload = inner.fetch_round() => payload,
        };
        inner.publish(payload);
    }

    debug!(channel = %inner.settings.channel, "허브 루프 종료");
}
