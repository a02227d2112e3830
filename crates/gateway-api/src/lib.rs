//! 다운스트림 WebSocket 서버.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - 뉴스 브로드캐스트 허브 (공유 수집 일정, 유휴 시 자동 중지)
//! - 주소 단위 업스트림 릴레이 (재연결 + REST 스냅샷)
//! - 서명 WebSocket API 클라이언트 감독
//! - 헬스 체크 엔드포인트
//! - Prometheus 메트릭
//!
//! # 모듈 구성
//!
//! - [`state`]: 애플리케이션 공유 상태 (AppState)
//! - [`routes`]: HTTP 엔드포인트
//! - [`websocket`]: 다운스트림 연결, 허브, 릴레이
//! - [`news`]: 뉴스 소스와 항목 정규화
//! - [`services`]: 백그라운드 서비스
//! - [`metrics`]: Prometheus 메트릭 수집
//! - [`middleware`]: HTTP 미들웨어

pub mod error;
pub mod metrics;
pub mod middleware;
pub mod news;
pub mod routes;
pub mod services;
pub mod state;
pub mod websocket;

pub use error::{ApiErrorResponse, ApiResult, FetchError};
pub use metrics::setup_metrics_recorder;
pub use middleware::metrics_layer;
pub use routes::*;
pub use services::{ClientFactory, ClientSupervisor, VenueClientFactory};
pub use state::AppState;
pub use websocket::{
    spawn_connection, BroadcastHub, ConnectionConfig, Downstream, FeedSource, HubSettings,
    RelaySession, RelaySettings,
};

#[cfg(any(test, feature = "test-utils"))]
pub use state::create_test_state;
