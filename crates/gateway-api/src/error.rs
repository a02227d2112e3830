//! API 에러 응답과 소스 수집 에러.

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

/// HTTP 에러 응답.
///
/// ```json
/// {"code": "INVALID_ADDRESS", "message": "...", "timestamp": 1738300800}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// 에러 코드 (예: "INVALID_ADDRESS")
    pub code: String,
    /// 사람이 읽을 수 있는 에러 메시지
    pub message: String,
    /// 에러 발생 타임스탬프 (Unix timestamp)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl ApiErrorResponse {
    /// 타임스탬프를 포함한 에러 생성.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            timestamp: Some(chrono::Utc::now().timestamp()),
        }
    }
}

impl std::fmt::Display for ApiErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiErrorResponse {}

/// API 핸들러 Result 타입 별칭.
pub type ApiResult<T> = Result<T, (StatusCode, Json<ApiErrorResponse>)>;

/// 잘못된 요청 응답 생성.
pub fn bad_request(code: &str, message: impl Into<String>) -> (StatusCode, Json<ApiErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiErrorResponse::new(code, message)),
    )
}

/// 업스트림 소스 한 곳의 수집 실패 원인.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// 요청 전송 실패
    #[error("request failed: {0}")]
    Http(String),
    /// 성공이 아닌 HTTP 상태
    #[error("unexpected status {0}")]
    Status(u16),
    /// 응답 해석 실패
    #[error("decode failed: {0}")]
    Decode(String),
    /// 소스별 타임아웃 초과
    #[error("timed out after {0} ms")]
    Timeout(u128),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else {
            FetchError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Decode(err.to_string())
    }
}
