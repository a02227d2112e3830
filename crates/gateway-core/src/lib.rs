//! # Gateway Core
//!
//! 트레이딩 게이트웨이의 실시간 통신 계층이 공유하는 기반 타입을 제공합니다:
//! - 설정 관리 (파일 + 환경 변수)
//! - 로깅 인프라
//! - 공통 에러 타입
//! - 브로드캐스트 피드 페이로드

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::*;
pub use error::*;
pub use logging::*;
pub use types::*;
