//! 전략의 매매 신호.
//!
//! 이 모듈은 전략이 생성하는 매매 신호 관련 타입을 정의합니다:
//! - `SignalAction` - 신호 유형 (매수, 매도, 장마감 강제청산)
//! - `SignalOrigin` - 신호 발원지 (전략 / 리스크 모니터)
//! - `TradingSignal` - 매매 신호 엔티티

use crate::types::{Price, Symbol};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// 수행할 액션의 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalAction {
    /// 매수
    Buy,
    /// 매도
    Sell,
    /// 장마감 강제청산 (시장가 매도)
    HoldExit,
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalAction::Buy => write!(f, "BUY"),
            SignalAction::Sell => write!(f, "SELL"),
            SignalAction::HoldExit => write!(f, "HOLD_EXIT"),
        }
    }
}

/// 신호 발원지.
///
/// 리스크 발원 청산 신호는 주문 엔진에서 중복 주문 억제 규칙을
/// 면제받습니다 (대기 중인 매수가 청산을 막아서는 안 됨).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalOrigin {
    /// 전략 엔진
    Strategy,
    /// 리스크 엔진 자동 손절/익절 모니터
    RiskStopLoss,
}

/// 전략 또는 리스크 모니터가 생성한 매매 신호.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSignal {
    /// 고유 신호 ID
    pub id: Uuid,
    /// 이 신호를 생성한 전략 이름
    pub strategy_name: String,
    /// 종목 코드
    pub symbol: Symbol,
    /// 액션
    pub action: SignalAction,
    /// 신호 신뢰도 (0.0 ~ 1.0)
    pub confidence: f64,
    /// 제안 가격 (지정가 주문용)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_price: Option<Price>,
    /// 신호 사유
    pub reason: String,
    /// 신호 생성 시각
    pub ts: DateTime<Utc>,
    /// 발원지
    pub origin: SignalOrigin,
    /// 추가 메타데이터
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TradingSignal {
    /// 새 전략 신호를 생성합니다.
    pub fn new(
        strategy_name: impl Into<String>,
        symbol: Symbol,
        action: SignalAction,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy_name: strategy_name.into(),
            symbol,
            action,
            confidence: 1.0,
            suggested_price: None,
            reason: reason.into(),
            ts: Utc::now(),
            origin: SignalOrigin::Strategy,
            metadata: HashMap::new(),
        }
    }

    /// 신뢰도를 설정합니다. [0, 1] 범위로 클램프됩니다.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// 제안 가격을 설정합니다.
    pub fn with_price(mut self, price: Price) -> Self {
        self.suggested_price = Some(price);
        self
    }

    /// 리스크 발원 신호로 표시합니다.
    pub fn from_risk_monitor(mut self) -> Self {
        self.origin = SignalOrigin::RiskStopLoss;
        self
    }

    /// 메타데이터를 추가합니다.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// 강제청산 신호인지 확인합니다.
    pub fn is_forced_exit(&self) -> bool {
        self.action == SignalAction::HoldExit
    }

    /// 청산(매도 계열) 신호인지 확인합니다.
    pub fn is_liquidation(&self) -> bool {
        matches!(self.action, SignalAction::Sell | SignalAction::HoldExit)
            || self.origin == SignalOrigin::RiskStopLoss
    }
}
