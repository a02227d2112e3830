//! WebSocket API 요청/응답 프레임.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::signing::ParamMap;
use crate::{ExchangeError, ExchangeResult};

/// 세션 로그온
pub const METHOD_SESSION_LOGON: &str = "session.logon";
/// 세션 상태 조회
pub const METHOD_SESSION_STATUS: &str = "session.status";
/// 세션 로그아웃
pub const METHOD_SESSION_LOGOUT: &str = "session.logout";
/// 주문 생성
pub const METHOD_ORDER_PLACE: &str = "order.place";
/// 주문 정정
pub const METHOD_ORDER_MODIFY: &str = "order.modify";
/// 주문 취소
pub const METHOD_ORDER_CANCEL: &str = "order.cancel";
/// 주문 조회
pub const METHOD_ORDER_STATUS: &str = "order.status";
/// 포지션 조회
pub const METHOD_ACCOUNT_POSITION: &str = "account.position";
/// 조건부 주문 생성
pub const METHOD_ALGO_ORDER_PLACE: &str = "algoOrder.place";
/// 조건부 주문 취소
pub const METHOD_ALGO_ORDER_CANCEL: &str = "algoOrder.cancel";

/// 클라이언트 → 거래소 요청 프레임.
#[derive(Debug, Clone, Serialize)]
pub struct WsApiRequest {
    pub id: String,
    pub method: String,
    pub params: ParamMap,
}

/// 원격 에러 본문.
#[derive(Debug, Clone, Deserialize)]
pub struct WsApiErrorBody {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
}

/// 거래소 → 클라이언트 응답 프레임.
///
/// `id`가 없는 프레임은 어떤 요청과도 매칭되지 않습니다.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsApiResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<i64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<WsApiErrorBody>,
    #[serde(default)]
    pub rate_limits: Option<Value>,
}

impl WsApiResponse {
    /// 응답을 결과 값 또는 구조화된 원격 에러로 변환합니다.
    pub fn into_result(self) -> ExchangeResult<Value> {
        if let Some(err) = self.error {
            return Err(ExchangeError::from_api(err.code, err.msg));
        }

        match self.status {
            Some(status) if !(200..300).contains(&status) => Err(ExchangeError::ApiError {
                code: status,
                message: format!("request failed with status {}", status),
            }),
            _ => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}
