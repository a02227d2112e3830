//! 거래소 WebSocket API (서명 요청/응답).
//!
//! - `client`: 영속 연결 위의 요청 다중화 클라이언트
//! - `messages`: 요청/응답 프레임과 메서드 이름
//! - `params`: 작업별 파라미터 구조체

pub mod client;
pub mod messages;
pub mod params;

pub use client::{SessionState, SignedClientConfig, SignedWsClient};
pub use messages::{WsApiErrorBody, WsApiRequest, WsApiResponse};
pub use params::*;
