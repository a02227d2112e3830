//! 거래소 에러 타입.
//!
//! 전송 계층(연결/읽기/쓰기), 프로토콜(파싱/매칭 실패), 인증, 타임아웃,
//! 원격 에러 코드를 구분합니다.

use thiserror::Error;

/// 거래소 관련 에러.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// 네트워크/연결 에러
    #[error("Network error: {0}")]
    NetworkError(String),

    /// 거래소 연결 끊김
    #[error("Disconnected: {0}")]
    Disconnected(String),

    /// 인증/권한 에러 (서명된 핸드셰이크 거부 포함)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// 요청 한도 초과
    #[error("Rate limit exceeded")]
    RateLimited,

    /// API 에러 코드
    #[error("API error {code}: {message}")]
    ApiError { code: i64, message: String },

    /// 파싱/역직렬화 에러
    #[error("Parse error: {0}")]
    ParseError(String),

    /// 타임스탬프 동기화 에러
    #[error("Timestamp error: {0}")]
    TimestampError(String),

    /// 요청 파라미터 검증 실패
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// 서명 생성 실패
    #[error("Signing error: {0}")]
    Signing(String),

    /// WebSocket 에러
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// 타임아웃
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// 클라이언트가 이미 닫힘
    #[error("Client closed")]
    Closed,
}

/// 거래소 작업을 위한 Result 타입.
pub type ExchangeResult<T> = Result<T, ExchangeError>;

impl ExchangeError {
    /// 원격 에러 코드를 에러로 변환합니다.
    ///
    /// 한도 초과, 타임스탬프, 키/서명 거부 코드는 전용 변형으로 분류합니다.
    pub fn from_api(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            -1003 | -1015 => ExchangeError::RateLimited,
            -1021 => ExchangeError::TimestampError(format!("{}: {}", code, message)),
            -1022 | -2014 | -2015 | -4056 | -4057 => {
                ExchangeError::Unauthorized(format!("{}: {}", code, message))
            }
            _ => ExchangeError::ApiError { code, message },
        }
    }

    /// 재시도 가능한 에러인지 확인.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::NetworkError(_)
                | ExchangeError::Disconnected(_)
                | ExchangeError::RateLimited
                | ExchangeError::Timeout(_)
                | ExchangeError::WebSocket(_)
                | ExchangeError::TimestampError(_)
        )
    }

    /// 권장 재시도 대기 시간(밀리초) 반환.
    pub fn retry_delay_ms(&self) -> Option<u64> {
        match self {
            ExchangeError::RateLimited => Some(60000),
            ExchangeError::NetworkError(_) => Some(1000),
            ExchangeError::Disconnected(_) => Some(5000),
            ExchangeError::Timeout(_) => Some(500),
            ExchangeError::WebSocket(_) => Some(2000),
            ExchangeError::TimestampError(_) => Some(100),
            _ => None,
        }
    }

    /// 인증 에러인지 확인.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, ExchangeError::Unauthorized(_))
    }

    /// 전송 계층 에러인지 확인 (연결 교체가 필요).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ExchangeError::NetworkError(_)
                | ExchangeError::Disconnected(_)
                | ExchangeError::WebSocket(_)
                | ExchangeError::Closed
        )
    }

    /// 재시도하면 안 되는 치명적 에러인지 확인.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExchangeError::Unauthorized(_)
                | ExchangeError::InvalidParams(_)
                | ExchangeError::Signing(_)
        )
    }

    /// 로그온 응답의 원격 거부를 `Unauthorized`로 모읍니다.
    ///
    /// 원격 코드와 메시지는 유지하고, 전송/타임아웃 에러는 그대로 둡니다.
    pub fn into_logon_rejection(self) -> Self {
        match self {
            ExchangeError::ApiError { code, message } => {
                ExchangeError::Unauthorized(format!("{}: {}", code, message))
            }
            ExchangeError::TimestampError(message) => ExchangeError::Unauthorized(message),
            ExchangeError::RateLimited => {
                ExchangeError::Unauthorized("logon rate limited".to_string())
            }
            other => other,
        }
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExchangeError::Timeout(err.to_string())
        } else if err.is_connect() {
            ExchangeError::NetworkError(err.to_string())
        } else if err.is_decode() {
            ExchangeError::ParseError(err.to_string())
        } else {
            ExchangeError::NetworkError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::ParseError(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ExchangeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ExchangeError::WebSocket(err.to_string())
    }
}
