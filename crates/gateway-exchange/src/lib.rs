//! 거래소 연결 계층.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - 요청 파라미터 정규화와 서명 (HMAC-SHA256, Ed25519)
//! - 서명 기반 WebSocket API 클라이언트 (요청 다중화, 세션 로그온)
//! - 주소 단위 사용자 피드 커넥터 (실시간 WebSocket + REST 스냅샷)

pub mod connector;
pub mod error;
pub mod signing;
pub mod traits;
pub mod ws_api;

pub use connector::{is_valid_address, HyperliquidFeed, InfoClient, UserFeedConfig};
pub use error::*;
pub use signing::{
    canonicalize, to_param_map, ApiCredentials, Ed25519Signer, HmacSigner, ParamMap,
    RequestSigner, SignatureScheme,
};
pub use traits::*;
pub use ws_api::{SessionState, SignedClientConfig, SignedWsClient};
