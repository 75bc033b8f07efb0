//! 주문 및 체결 타입.
//!
//! 이 모듈은 주문 생명주기 관련 타입을 정의합니다:
//! - `Side` - 주문 방향
//! - `OrderType` - 주문 유형 (시장가/지정가)
//! - `OrderState` - 주문 상태 머신
//! - `TimeInForce` - 주문 유효 기간
//! - `Order` - 주문 엔티티
//! - `Fill` - 개별 체결

use crate::types::{Price, Quantity, Symbol};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 주문 방향 (매수 또는 매도).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// 매수
    Buy,
    /// 매도
    Sell,
}

impl Side {
    /// 반대 방향을 반환합니다.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// 주문 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// 시장가 주문
    Market,
    /// 지정가 주문
    Limit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
        }
    }
}

/// 주문 유효 기간.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    /// 당일 유효
    Day,
    /// 즉시 체결 또는 취소
    Ioc,
    /// 전량 체결 또는 취소
    Fok,
}

/// 주문 상태.
///
/// 상태 전이: `New → Queued → Submitted → (Partial | Filled | Cancelled |
/// Rejected | Failed)`. 최종 상태 이후에는 이력 이동 외의 전이가 없습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// 생성됨 (아직 큐에 들어가지 않음)
    New,
    /// 우선순위 큐 대기 중
    Queued,
    /// 브로커에 제출됨
    Submitted,
    /// 부분 체결됨
    Partial,
    /// 전량 체결됨
    Filled,
    /// 취소됨
    Cancelled,
    /// 리스크/브로커에 의해 거부됨
    Rejected,
    /// 제출 실패 또는 만료
    Failed,
}

impl OrderState {
    /// 최종 상태인지 확인합니다.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Cancelled | OrderState::Rejected | OrderState::Failed
        )
    }

    /// 미체결(활성) 상태인지 확인합니다.
    pub fn is_in_flight(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderState::New => "new",
            OrderState::Queued => "queued",
            OrderState::Submitted => "submitted",
            OrderState::Partial => "partial",
            OrderState::Filled => "filled",
            OrderState::Cancelled => "cancelled",
            OrderState::Rejected => "rejected",
            OrderState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// 주문 엔티티.
///
/// 불변 조건: `filled_qty ≤ quantity`. 정본 레코드는 주문 엔진이
/// 소유하며, 다른 컴포넌트는 버스 이벤트 또는 읽기 전용 조회로 접근합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// 내부 주문 ID (브로커 제출 시 멱등 클라이언트 ID로 재사용)
    pub id: Uuid,
    /// 종목 코드
    pub symbol: Symbol,
    /// 주문 방향
    pub side: Side,
    /// 주문 유형
    pub order_type: OrderType,
    /// 주문 수량
    pub quantity: Quantity,
    /// 지정가 (지정가 주문에 필수)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Price>,
    /// 주문 유효 기간
    pub time_in_force: TimeInForce,
    /// 현재 상태
    pub state: OrderState,
    /// 체결된 수량
    pub filled_qty: Quantity,
    /// 평균 체결 가격
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_fill_price: Option<Price>,
    /// 지불한 총 수수료/세금
    pub commission_paid: Decimal,
    /// 브로커 주문 ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker_order_id: Option<String>,
    /// 이 주문을 생성한 전략
    pub strategy_name: String,
    /// 리스크 청산 발원 여부 (중복 억제 면제 판단용)
    #[serde(default)]
    pub is_liquidation: bool,
    /// 생성 시각
    pub created_ts: DateTime<Utc>,
    /// 마지막 업데이트 시각
    pub updated_ts: DateTime<Utc>,
}

impl Order {
    /// 시장가 주문을 생성합니다.
    pub fn market(symbol: Symbol, side: Side, quantity: Quantity, strategy_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            symbol,
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            time_in_force: TimeInForce::Day,
            state: OrderState::New,
            filled_qty: Decimal::ZERO,
            avg_fill_price: None,
            commission_paid: Decimal::ZERO,
            broker_order_id: None,
            strategy_name: strategy_name.into(),
            is_liquidation: false,
            created_ts: now,
            updated_ts: now,
        }
    }

    /// 지정가 주문을 생성합니다.
    pub fn limit(
        symbol: Symbol,
        side: Side,
        quantity: Quantity,
        price: Price,
        strategy_name: impl Into<String>,
    ) -> Self {
        let mut order = Self::market(symbol, side, quantity, strategy_name);
        order.order_type = OrderType::Limit;
        order.price = Some(price);
        order
    }

    /// 리스크 청산 주문으로 표시합니다.
    pub fn as_liquidation(mut self) -> Self {
        self.is_liquidation = true;
        self
    }

    /// 남은 수량을 반환합니다.
    pub fn remaining_qty(&self) -> Quantity {
        self.quantity - self.filled_qty
    }

    /// 주문의 명목 금액을 반환합니다. 시장가 주문은 기준가를 받아 계산합니다.
    pub fn notional(&self, mark_price: Price) -> Decimal {
        self.price.unwrap_or(mark_price) * self.quantity
    }

    /// 상태를 전이시킵니다. 최종 상태에서의 전이는 거부됩니다.
    pub fn transition(&mut self, next: OrderState) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = next;
        self.updated_ts = Utc::now();
        true
    }
}

/// 개별 체결. 불변 값입니다.
///
/// 한 주문의 체결 합이 `filled_qty`와 `avg_fill_price`를 결정합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    /// 체결 ID
    pub fill_id: String,
    /// 대상 주문 ID
    pub order_id: Uuid,
    /// 종목 코드
    pub symbol: Symbol,
    /// 방향
    pub side: Side,
    /// 체결 수량
    pub qty: Quantity,
    /// 체결 가격
    pub price: Price,
    /// 이 체결에 부과된 수수료/세금
    pub commission: Decimal,
    /// 체결 시각
    pub ts: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn symbol() -> Symbol {
        Symbol::canonicalize("005930").unwrap()
    }

    #[test]
    fn test_order_builders() {
        let market = Order::market(symbol(), Side::Sell, dec!(10), "ma_1m5m");
        assert_eq!(market.order_type, OrderType::Market);
        assert_eq!(market.state, OrderState::New);
        assert!(market.price.is_none());

        let limit = Order::limit(symbol(), Side::Buy, dec!(13), dec!(75100), "ma_1m5m");
        assert_eq!(limit.order_type, OrderType::Limit);
        assert_eq!(limit.price, Some(dec!(75100)));
        assert_eq!(limit.notional(dec!(0)), dec!(976300));
    }

    #[test]
    fn test_terminal_state_locks_transitions() {
        let mut order = Order::market(symbol(), Side::Buy, dec!(5), "ma_1m5m");
        assert!(order.transition(OrderState::Queued));
        assert!(order.transition(OrderState::Submitted));
        assert!(order.transition(OrderState::Filled));

        // 최종 상태 이후 전이 금지
        assert!(!order.transition(OrderState::Cancelled));
        assert_eq!(order.state, OrderState::Filled);
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }
}
