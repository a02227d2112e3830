//! API 라우트.
//!
//! # 라우트 구조
//!
//! - `/health` - 헬스 체크 (liveness)
//! - `/health/ready` - 상세 헬스 체크 (readiness)
//! - `/ws/news` - 뉴스 브로드캐스트 구독
//! - `/ws/monitor/{address}` - 주소 모니터링 릴레이

pub mod health;

pub use health::{health_router, ComponentHealth, ComponentStatus, HealthResponse};

use axum::Router;
use std::sync::Arc;

use crate::state::AppState;
use crate::websocket::websocket_router;

/// 전체 API 라우터 생성.
///
/// `/metrics`와 미들웨어는 바이너리에서 붙입니다.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/health", health_router())
        .nest("/ws", websocket_router())
}
