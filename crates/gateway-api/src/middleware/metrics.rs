//! HTTP 요청 metrics middleware.
//!
//! 일반 요청은 요청/응답/처리 시간을 기록하고, WebSocket 업그레이드 요청은
//! 처리 시간 대신 업그레이드 수락/거부를 기록합니다. 연결 수명은
//! `websocket_connections_active` 게이지가 따로 추적합니다.

use axum::{
    extract::{MatchedPath, Request},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use crate::metrics::{
    normalize_path, record_http_duration, record_http_request, record_http_response,
    record_websocket_upgrade,
};

/// 라벨용 라우트 이름. 매칭된 라우트 패턴이 없으면 경로를 정규화합니다.
fn route_label(request: &Request) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| normalize_path(request.uri().path()))
}

/// `Upgrade: websocket` 요청인지 확인.
fn is_websocket_upgrade(request: &Request) -> bool {
    request
        .headers()
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
}

/// HTTP 메트릭을 수집하는 미들웨어 레이어.
pub async fn metrics_layer(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let route = route_label(&request);
    let upgrade = is_websocket_upgrade(&request);

    record_http_request(&method, &route);
    let response = next.run(request).await;
    let status = response.status();
    record_http_response(&method, &route, status.as_u16());

    if upgrade {
        record_websocket_upgrade(&route, status == StatusCode::SWITCHING_PROTOCOLS);
    } else {
        record_http_duration(&method, &route, start.elapsed().as_secs_f64());
    }

    response
}
