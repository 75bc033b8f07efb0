//! 이벤트 토픽 정의.
//!
//! 토픽 집합은 닫혀 있으며, 각 토픽은 하나의 봉투 페이로드 유형만
//! 운반합니다. 토픽 문자열 이름은 시스템 간 계약입니다.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 시스템 이벤트 토픽.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// 품질 게이트를 통과한 틱
    MarketDataReceived,
    /// 캔들 버킷 마감
    CandleClosed,
    /// 지표 스냅샷 갱신
    IndicatorsUpdated,
    /// 매매 신호
    TradingSignal,
    /// 주문 접수 (큐 진입)
    OrderPlaced,
    /// 주문 부분 체결
    OrderPartiallyExecuted,
    /// 주문 전량 체결
    OrderFullyExecuted,
    /// 주문 실패/거부
    OrderFailed,
    /// 주문 취소
    OrderCancelled,
    /// 포지션 변경
    PositionUpdated,
    /// 리스크 경보
    RiskAlert,
    /// 비상 정지 상태 변경
    EmergencyStop,
    /// 컴포넌트 하트비트
    Heartbeat,
    /// 컴포넌트 생명주기/상태
    SystemStatus,
    /// 전략 활성화
    StrategyActivated,
    /// 전략 비활성화
    StrategyDeactivated,
}

impl Topic {
    /// 모든 토픽을 반환합니다.
    pub fn all() -> &'static [Topic] {
        &[
            Topic::MarketDataReceived,
            Topic::CandleClosed,
            Topic::IndicatorsUpdated,
            Topic::TradingSignal,
            Topic::OrderPlaced,
            Topic::OrderPartiallyExecuted,
            Topic::OrderFullyExecuted,
            Topic::OrderFailed,
            Topic::OrderCancelled,
            Topic::PositionUpdated,
            Topic::RiskAlert,
            Topic::EmergencyStop,
            Topic::Heartbeat,
            Topic::SystemStatus,
            Topic::StrategyActivated,
            Topic::StrategyDeactivated,
        ]
    }

    /// 계약상의 토픽 이름을 반환합니다.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::MarketDataReceived => "market_data_received",
            Topic::CandleClosed => "candle_closed",
            Topic::IndicatorsUpdated => "indicators_updated",
            Topic::TradingSignal => "trading_signal",
            Topic::OrderPlaced => "order_placed",
            Topic::OrderPartiallyExecuted => "order_partially_executed",
            Topic::OrderFullyExecuted => "order_fully_executed",
            Topic::OrderFailed => "order_failed",
            Topic::OrderCancelled => "order_cancelled",
            Topic::PositionUpdated => "position_updated",
            Topic::RiskAlert => "risk_alert",
            Topic::EmergencyStop => "emergency_stop",
            Topic::Heartbeat => "heartbeat",
            Topic::SystemStatus => "system_status",
            Topic::StrategyActivated => "strategy_activated",
            Topic::StrategyDeactivated => "strategy_deactivated",
        }
    }

    /// 브로커 전송 시 사용하는 채널 이름을 반환합니다.
    pub fn channel(&self) -> String {
        format!("kquant:event:{}", self.as_str())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::all()
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown topic: {}", s))
    }
}
