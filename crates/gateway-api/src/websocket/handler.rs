//! WebSocket 업그레이드 handler.
//!
//! # 엔드포인트
//!
//! - `GET /ws/news`: 뉴스 브로드캐스트 허브 구독
//! - `GET /ws/monitor/{address}`: 주소 단위 실시간 피드 + 스냅샷 릴레이

use std::sync::Arc;

use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use gateway_exchange::is_valid_address;
use tracing::{debug, info};

use super::connection::spawn_connection;
use super::relay::RelaySession;
use crate::error::{bad_request, ApiResult};
use crate::state::AppState;

/// 뉴스 채널 업그레이드 핸들러.
pub async fn news_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_news(socket, state))
}

async fn serve_news(socket: WebSocket, state: Arc<AppState>) {
    let downstream = spawn_connection(socket, state.connection_config());
    let conn_id = downstream.id().to_string();

    state.hub.attach(downstream).await;
    debug!(conn_id = %conn_id, "뉴스 구독 종료");
}

/// 주소 모니터링 업그레이드 핸들러.
///
/// 주소 형식이 틀리면 업그레이드 없이 400을 반환합니다.
pub async fn monitor_handler(
    Path(address): Path<String>,
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Response> {
    if !is_valid_address(&address) {
        return Err(bad_request(
            "INVALID_ADDRESS",
            format!("주소 형식이 올바르지 않습니다: {}", address),
        ));
    }

    Ok(ws
        .on_upgrade(move |socket| serve_monitor(socket, address, state))
        .into_response())
}

async fn serve_monitor(socket: WebSocket, address: String, state: Arc<AppState>) {
    let downstream = spawn_connection(socket, state.connection_config());
    let session = RelaySession::spawn(
        address,
        downstream,
        state.dialer.clone(),
        state.fetcher.clone(),
        state.relay_settings(),
    );

    session.closed().await;
    info!(
        address = %session.address(),
        reconnects = session.backoff_waits(),
        snapshots = session.snapshot_rounds(),
        "모니터링 세션 종료"
    );
}

/// WebSocket 라우터 생성 (`/ws` 아래에 중첩).
pub fn websocket_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/news", get(news_handler))
        .route("/monitor/{address}", get(monitor_handler))
}
