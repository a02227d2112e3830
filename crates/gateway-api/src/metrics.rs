//! Prometheus 메트릭 설정 및 유틸리티.
//!
//! 다운스트림 연결, 허브 브로드캐스트, 릴레이 재연결 메트릭을 수집하고
//! `/metrics` 엔드포인트로 노출합니다.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Prometheus 메트릭 레코더를 설치하고 핸들을 반환합니다.
///
/// 레코더가 이미 설치되어 있으면 에러를 반환합니다.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

// ============================================================================
// HTTP
// ============================================================================

/// HTTP 요청 카운터 증가.
pub fn record_http_request(method: &str, path: &str) {
    counter!("http_requests_total", "method" => method.to_string(), "path" => path.to_string())
        .increment(1);
}

/// HTTP 응답 카운터 증가.
pub fn record_http_response(method: &str, path: &str, status: u16) {
    counter!(
        "http_responses_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// HTTP 요청 처리 시간 기록.
///
/// WebSocket 업그레이드 요청은 기록하지 않습니다 (`record_websocket_upgrade` 참고).
pub fn record_http_duration(method: &str, path: &str, duration_secs: f64) {
    histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(duration_secs);
}

/// WebSocket 업그레이드 결과 기록.
///
/// `accepted`는 101 응답 여부이며, 거부(예: 잘못된 주소의 400)도 함께 셉니다.
pub fn record_websocket_upgrade(route: &str, accepted: bool) {
    counter!(
        "websocket_upgrades_total",
        "route" => route.to_string(),
        "result" => if accepted { "accepted" } else { "rejected" }
    )
    .increment(1);
}

/// 메트릭 라벨용 경로 정규화.
///
/// 주소(`0x...`)와 숫자 세그먼트를 자리표시자로 바꿔 라벨 카디널리티를 제한합니다.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if segment.starts_with("0x") && segment.len() > 2 {
                ":address"
            } else if !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()) {
                ":id"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

// ============================================================================
// 다운스트림 연결
// ============================================================================

/// WebSocket 연결 수 증가.
pub fn increment_websocket_connections() {
    gauge!("websocket_connections_active").increment(1.0);
}

/// WebSocket 연결 수 감소.
pub fn decrement_websocket_connections() {
    gauge!("websocket_connections_active").decrement(1.0);
}

/// 송신 큐 가득 참으로 버린 메시지 카운터 증가.
pub fn record_dropped_message() {
    counter!("websocket_messages_dropped_total").increment(1);
}

// ============================================================================
// 허브 / 릴레이
// ============================================================================

/// 허브 구독자 수 설정.
pub fn set_hub_subscribers(channel: &str, count: usize) {
    gauge!("hub_subscribers", "channel" => channel.to_string()).set(count as f64);
}

/// 허브 수집 라운드 기록.
pub fn record_hub_round(channel: &str, failed_sources: usize) {
    counter!("hub_rounds_total", "channel" => channel.to_string()).increment(1);
    if failed_sources > 0 {
        counter!("hub_source_failures_total", "channel" => channel.to_string())
            .increment(failed_sources as u64);
    }
}

/// 릴레이 업스트림 재연결 카운터 증가.
pub fn record_relay_reconnect() {
    counter!("relay_reconnects_total").increment(1);
}

/// 서명 클라이언트 재구성 카운터 증가.
pub fn record_client_rebuild(success: bool) {
    counter!(
        "signed_client_rebuilds_total",
        "result" => if success { "ok" } else { "error" }
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_address() {
        assert_eq!(
            normalize_path("/ws/monitor/0x1234567890abcdef1234567890abcdef12345678"),
            "/ws/monitor/:address"
        );
        // 형식이 틀린 주소도 같은 라벨
        assert_eq!(normalize_path("/ws/monitor/0xzz"), "/ws/monitor/:address");
    }

    #[test]
    fn test_normalize_path_plain() {
        assert_eq!(normalize_path("/ws/news"), "/ws/news");
        assert_eq!(normalize_path("/health"), "/health");
        assert_eq!(normalize_path("/items/42"), "/items/:id");
    }
}
