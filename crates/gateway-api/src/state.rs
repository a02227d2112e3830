//! 모든 핸들러에서 공유되는 애플리케이션 상태.
//!
//! AppState는 Arc로 래핑되어 여러 요청 간에 안전하게 공유됩니다.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use gateway_core::GatewayConfig;
use gateway_exchange::{SnapshotFetcher, UpstreamDialer};

use crate::services::ClientSupervisor;
use crate::websocket::{BroadcastHub, ConnectionConfig, RelaySettings};

/// 애플리케이션 공유 상태.
#[derive(Clone)]
pub struct AppState {
    /// 로드된 설정
    pub config: Arc<GatewayConfig>,

    /// 뉴스 브로드캐스트 허브 (프로세스당 하나)
    pub hub: BroadcastHub,

    /// 주소 모니터링용 실시간 피드 연결자
    pub dialer: Arc<dyn UpstreamDialer>,

    /// 주소 모니터링용 REST 스냅샷 조회자
    pub fetcher: Arc<dyn SnapshotFetcher>,

    /// 서명 클라이언트 감독자 (자격증명이 없으면 None)
    pub supervisor: Option<Arc<ClientSupervisor>>,

    /// 서버 시작 시간
    pub started_at: DateTime<Utc>,

    /// 애플리케이션 버전
    pub version: String,
}

impl AppState {
    /// 새 상태 생성.
    pub fn new(
        config: GatewayConfig,
        hub: BroadcastHub,
        dialer: Arc<dyn UpstreamDialer>,
        fetcher: Arc<dyn SnapshotFetcher>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            hub,
            dialer,
            fetcher,
            supervisor: None,
            started_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// 서명 클라이언트 감독자 설정.
    pub fn with_supervisor(mut self, supervisor: Arc<ClientSupervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    /// 서버 업타임(초).
    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }

    /// 다운스트림 연결 설정.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::from(&self.config.downstream)
    }

    /// 릴레이 설정.
    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings::from(&self.config.relay)
    }
}

/// 테스트용 AppState 생성.
///
/// 소스 없는 허브와 기본 설정의 업스트림 커넥터를 사용합니다 (연결은 하지 않음).
#[cfg(any(test, feature = "test-utils"))]
pub fn create_test_state() -> AppState {
    use crate::websocket::HubSettings;
    use gateway_exchange::{HyperliquidFeed, InfoClient, UserFeedConfig};

    let config = GatewayConfig::default();
    let feed = UserFeedConfig::from(&config.venue);
    let fetcher = InfoClient::new(&feed).expect("Failed to create InfoClient for test");

    AppState::new(
        config,
        BroadcastHub::new(HubSettings::default(), Vec::new()),
        Arc::new(HyperliquidFeed::new(feed)),
        Arc::new(fetcher),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::HubSettings;
    use gateway_exchange::{HyperliquidFeed, InfoClient, UserFeedConfig};

    #[test]
    fn test_state_derives_settings_from_config() {
        let mut config = GatewayConfig::default();
        config.downstream.queue_capacity = 8;
        config.relay.backoff_secs = 2;

        let feed = UserFeedConfig::from(&config.venue);
        let state = AppState::new(
            config,
            BroadcastHub::new(HubSettings::default(), Vec::new()),
            Arc::new(HyperliquidFeed::new(feed.clone())),
            Arc::new(InfoClient::new(&feed).unwrap()),
        );

        assert_eq!(state.connection_config().queue_capacity, 8);
        assert_eq!(state.relay_settings().backoff.as_secs(), 2);
        assert!(state.supervisor.is_none());
        assert!(state.uptime_secs() >= 0);
    }
}
