//! 작업별 요청 파라미터.
//!
//! 모든 구조체는 같은 정규화 단계(`signing::to_param_map` → `canonicalize`)를
//! 거쳐 서명됩니다. `None` 필드는 요청에서 빠집니다.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::{ExchangeError, ExchangeResult};

/// 주문 방향.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// 주문 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
    Stop,
    StopMarket,
    TakeProfit,
    TakeProfitMarket,
    TrailingStopMarket,
}

impl OrderType {
    /// 지정가 계열(가격 필수)인지 여부.
    pub fn requires_price(&self) -> bool {
        matches!(self, OrderType::Limit | OrderType::Stop | OrderType::TakeProfit)
    }

    /// 트리거 가격이 필요한 조건부 유형인지 여부.
    pub fn is_conditional(&self) -> bool {
        !matches!(self, OrderType::Limit | OrderType::Market)
    }
}

/// 주문 유효 기간.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
    Gtx,
}

/// 포지션 방향 (헤지 모드).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Both,
    Long,
    Short,
}

/// 트리거 가격 기준.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkingType {
    MarkPrice,
    ContractPrice,
}

/// `session.logon` 파라미터. 신원 키와 타임스탬프는 서명 단계에서 채워집니다.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogonParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recv_window: Option<u64>,
}

/// `order.place` 파라미터.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderParams {
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_side: Option<PositionSide>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<TimeInForce>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reduce_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_client_order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recv_window: Option<u64>,
}

impl PlaceOrderParams {
    /// 시장가 주문.
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            position_side: None,
            quantity: Some(quantity),
            price: None,
            stop_price: None,
            time_in_force: None,
            reduce_only: None,
            new_client_order_id: None,
            recv_window: None,
        }
    }

    /// GTC 지정가 주문.
    pub fn limit(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            order_type: OrderType::Limit,
            price: Some(price),
            time_in_force: Some(TimeInForce::Gtc),
            ..Self::market(symbol, side, quantity)
        }
    }

    /// 포지션 축소 전용으로 설정.
    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = Some(true);
        self
    }

    /// 클라이언트 주문 ID 설정.
    pub fn with_client_id(mut self, id: impl Into<String>) -> Self {
        self.new_client_order_id = Some(id.into());
        self
    }

    /// 전송 전 필수 필드 검증.
    pub fn validate(&self) -> ExchangeResult<()> {
        if self.symbol.is_empty() {
            return Err(ExchangeError::InvalidParams("symbol is required".to_string()));
        }
        if self.quantity.is_none() {
            return Err(ExchangeError::InvalidParams("quantity is required".to_string()));
        }
        if self.order_type.requires_price() && self.price.is_none() {
            return Err(ExchangeError::InvalidParams(format!(
                "{:?} order requires price",
                self.order_type
            )));
        }
        if self.order_type.is_conditional() && self.stop_price.is_none() {
            return Err(ExchangeError::InvalidParams(format!(
                "{:?} order requires stopPrice",
                self.order_type
            )));
        }
        Ok(())
    }
}

/// 주문 식별자 (거래소 ID 또는 클라이언트 ID 중 하나 필수).
fn require_order_ref(order_id: Option<i64>, client_id: Option<&String>) -> ExchangeResult<()> {
    if order_id.is_none() && client_id.is_none() {
        return Err(ExchangeError::InvalidParams(
            "orderId or origClientOrderId is required".to_string(),
        ));
    }
    Ok(())
}

/// `order.modify` 파라미터.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyOrderParams {
    pub symbol: String,
    pub side: OrderSide,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orig_client_order_id: Option<String>,
    pub quantity: Decimal,
    pub price: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recv_window: Option<u64>,
}

impl ModifyOrderParams {
    /// 전송 전 필수 필드 검증.
    pub fn validate(&self) -> ExchangeResult<()> {
        require_order_ref(self.order_id, self.orig_client_order_id.as_ref())
    }
}

/// `order.cancel` 파라미터.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderParams {
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orig_client_order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recv_window: Option<u64>,
}

impl CancelOrderParams {
    /// 거래소 주문 ID로 취소.
    pub fn by_id(symbol: impl Into<String>, order_id: i64) -> Self {
        Self {
            symbol: symbol.into(),
            order_id: Some(order_id),
            orig_client_order_id: None,
            recv_window: None,
        }
    }

    /// 클라이언트 주문 ID로 취소.
    pub fn by_client_id(symbol: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            order_id: None,
            orig_client_order_id: Some(client_id.into()),
            recv_window: None,
        }
    }

    /// 전송 전 필수 필드 검증.
    pub fn validate(&self) -> ExchangeResult<()> {
        require_order_ref(self.order_id, self.orig_client_order_id.as_ref())
    }
}

/// `order.status` 파라미터. 취소와 같은 식별 규칙을 따릅니다.
pub type QueryOrderParams = CancelOrderParams;

/// `account.position` 파라미터.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recv_window: Option<u64>,
}

/// `algoOrder.place` 파라미터 (조건부 주문).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceAlgoOrderParams {
    pub symbol: String,
    pub side: OrderSide,
    /// 항상 `CONDITIONAL`
    pub algo_type: String,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub trigger_price: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_side: Option<PositionSide>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_position: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_type: Option<WorkingType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_algo_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recv_window: Option<u64>,
}

impl PlaceAlgoOrderParams {
    /// 트리거 가격 도달 시 실행되는 조건부 주문.
    pub fn conditional(
        symbol: impl Into<String>,
        side: OrderSide,
        order_type: OrderType,
        trigger_price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            algo_type: "CONDITIONAL".to_string(),
            order_type,
            trigger_price,
            position_side: None,
            quantity: None,
            price: None,
            close_position: None,
            working_type: None,
            client_algo_id: None,
            recv_window: None,
        }
    }

    /// 전송 전 필수 필드 검증.
    pub fn validate(&self) -> ExchangeResult<()> {
        if !self.order_type.is_conditional() {
            return Err(ExchangeError::InvalidParams(format!(
                "{:?} is not a conditional order type",
                self.order_type
            )));
        }
        if self.quantity.is_none() && self.close_position != Some(true) {
            return Err(ExchangeError::InvalidParams(
                "quantity or closePosition is required".to_string(),
            ));
        }
        if self.order_type.requires_price() && self.price.is_none() {
            return Err(ExchangeError::InvalidParams(format!(
                "{:?} order requires price",
                self.order_type
            )));
        }
        Ok(())
    }
}

/// `algoOrder.cancel` 파라미터.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelAlgoOrderParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algo_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_algo_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recv_window: Option<u64>,
}

impl CancelAlgoOrderParams {
    /// 전송 전 필수 필드 검증.
    pub fn validate(&self) -> ExchangeResult<()> {
        if self.algo_id.is_none() && self.client_algo_id.is_none() {
            return Err(ExchangeError::InvalidParams(
                "algoId or clientAlgoId is required".to_string(),
            ));
        }
        Ok(())
    }
}
