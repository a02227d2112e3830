//! 게이트웨이 공통 에러 타입.

use thiserror::Error;

/// 게이트웨이 핵심 에러.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// 설정 로드 에러
    #[error("설정 에러: {0}")]
    Config(String),

    /// 설정 값 검증 실패
    #[error("잘못된 입력: {0}")]
    InvalidInput(String),
}

/// 게이트웨이 작업을 위한 Result 타입.
pub type GatewayResult<T> = Result<T, GatewayError>;

impl From<config::ConfigError> for GatewayError {
    fn from(err: config::ConfigError) -> Self {
        GatewayError::Config(err.to_string())
    }
}
