//! 헬스 체크 endpoint.
//!
//! 로드밸런서나 오케스트레이션 시스템(Kubernetes 등)에서 사용됩니다.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::state::AppState;

/// 헬스 체크 응답 구조체.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// 전체 서비스 상태 ("healthy" | "degraded")
    pub status: String,

    /// API 버전
    pub version: String,

    /// 서버 업타임(초)
    pub uptime_secs: i64,

    /// 현재 시간 (ISO 8601)
    pub timestamp: String,

    /// 개별 컴포넌트 상태
    pub components: ComponentHealth,
}

/// 개별 컴포넌트 상태.
#[derive(Debug, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// 뉴스 허브 상태
    pub news_hub: ComponentStatus,

    /// 서명 클라이언트 상태
    pub signed_client: ComponentStatus,
}

/// 컴포넌트 상태.
#[derive(Debug, Serialize, Deserialize)]
pub struct ComponentStatus {
    /// 상태 ("up" | "down" | "idle" | "not_configured")
    pub status: String,

    /// 추가 정보 (선택적)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentStatus {
    fn new(status: &str, message: Option<String>) -> Self {
        Self {
            status: status.to_string(),
            message,
        }
    }

    /// 정상 상태.
    pub fn up(message: impl Into<String>) -> Self {
        Self::new("up", Some(message.into()))
    }

    /// 비정상 상태.
    pub fn down(message: impl Into<String>) -> Self {
        Self::new("down", Some(message.into()))
    }

    /// 유휴 상태.
    pub fn idle() -> Self {
        Self::new("idle", None)
    }

    /// 미설정 상태.
    pub fn not_configured() -> Self {
        Self::new("not_configured", None)
    }
}

/// 간단한 헬스 체크 (liveness 확인용).
///
/// GET /health
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// 상세 헬스 체크 (readiness 확인용).
///
/// GET /health/ready
pub async fn health_ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let news_hub = if state.hub.is_active() {
        ComponentStatus::up(format!("{} subscribers", state.hub.subscriber_count()))
    } else {
        ComponentStatus::idle()
    };

    // 서명 클라이언트 재구성 중이면 degraded
    let mut overall_status = "healthy";
    let signed_client = match &state.supervisor {
        None => ComponentStatus::not_configured(),
        Some(supervisor) => match supervisor.current() {
            Some(client) if client.is_authenticated() => {
                ComponentStatus::up(format!("{} pending requests", client.pending_count()))
            }
            Some(client) => ComponentStatus::down(format!("session {:?}", client.state())),
            None => {
                overall_status = "degraded";
                ComponentStatus::down(format!("rebuilding (attempt {})", supervisor.attempts()))
            }
        },
    };

    let response = HealthResponse {
        status: overall_status.to_string(),
        version: state.version.clone(),
        uptime_secs: state.uptime_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        components: ComponentHealth {
            news_hub,
            signed_client,
        },
    };

    (StatusCode::OK, Json(response))
}

/// 헬스 체크 라우터 생성.
pub fn health_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(health_check))
        .route("/ready", get(health_ready))
}
