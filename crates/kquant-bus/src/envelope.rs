//! 이벤트 봉투 및 페이로드.
//!
//! 모든 버스 메시지는 `Envelope`로 감싸여 흐릅니다. 봉투는 자기 기술적
//! JSON으로 직렬화되며 버전 필드를 포함하므로 브로커 전송 시에도
//! 동일한 형식을 사용합니다.

use crate::topic::Topic;
use chrono::{DateTime, Utc};
use kquant_core::{Candle, IndicatorSnapshot, MarketTick, Order, Position, TradingSignal};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 봉투 직렬화 형식 버전.
pub const ENVELOPE_VERSION: u8 = 1;

/// 리스크 경보 심각도.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskAlertSeverity {
    /// 경고 임계값 초과
    Warning,
    /// 위험 임계값 초과
    Critical,
}

/// 토픽별 페이로드.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    /// 정규화된 틱
    MarketTick(MarketTick),
    /// 마감된 캔들
    Candle(Candle),
    /// 지표 스냅샷 (전략이 캐시를 재조회할 필요가 없도록 전체 포함)
    Indicators(IndicatorSnapshot),
    /// 매매 신호
    Signal(TradingSignal),
    /// 주문 생명주기 (상태는 주문 엔티티에 포함)
    Order {
        /// 주문 스냅샷
        order: Box<Order>,
        /// 실패/취소 사유
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// 포지션 스냅샷
    Position(Position),
    /// 리스크 경보
    RiskAlert {
        /// 심각도
        severity: RiskAlertSeverity,
        /// 경보를 발생시킨 지표 이름
        metric: String,
        /// 관측 값
        value: String,
        /// 임계값
        threshold: String,
        /// 설명
        message: String,
    },
    /// 비상 정지 상태 변경
    EmergencyStop {
        /// 발동 여부
        armed: bool,
        /// 발동/해제 사유
        reason: String,
    },
    /// 하트비트
    Heartbeat,
    /// 컴포넌트 상태
    SystemStatus {
        /// 컴포넌트 이름
        component: String,
        /// 상태 (started / stopped / degraded / error)
        status: String,
        /// 부가 설명
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// 전략 생명주기
    StrategyLifecycle {
        /// 전략 이름
        name: String,
        /// 사유 (예: "timeout", "manual")
        reason: String,
    },
}

impl Payload {
    /// 이 페이로드가 주어진 토픽에서 운반될 수 있는지 확인합니다.
    pub fn compatible_with(&self, topic: Topic) -> bool {
        matches!(
            (self, topic),
            (Payload::MarketTick(_), Topic::MarketDataReceived)
                | (Payload::Candle(_), Topic::CandleClosed)
                | (Payload::Indicators(_), Topic::IndicatorsUpdated)
                | (Payload::Signal(_), Topic::TradingSignal)
                | (
                    Payload::Order { .. },
                    Topic::OrderPlaced
                        | Topic::OrderPartiallyExecuted
                        | Topic::OrderFullyExecuted
                        | Topic::OrderFailed
                        | Topic::OrderCancelled
                )
                | (Payload::Position(_), Topic::PositionUpdated)
                | (Payload::RiskAlert { .. }, Topic::RiskAlert)
                | (Payload::EmergencyStop { .. }, Topic::EmergencyStop)
                | (Payload::Heartbeat, Topic::Heartbeat)
                | (Payload::SystemStatus { .. }, Topic::SystemStatus)
                | (
                    Payload::StrategyLifecycle { .. },
                    Topic::StrategyActivated | Topic::StrategyDeactivated
                )
        )
    }
}

/// 이벤트 봉투.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// 직렬화 형식 버전
    pub version: u8,
    /// 봉투 고유 ID (핸들러 실패 로그 및 추적용)
    pub id: Uuid,
    /// 토픽
    pub topic: Topic,
    /// 발행 컴포넌트 식별자
    pub source_id: String,
    /// 발행 시각
    pub ts: DateTime<Utc>,
    /// 요청-응답 상관관계 ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    /// 페이로드
    pub payload: Payload,
}

impl Envelope {
    /// 새 봉투를 생성합니다.
    pub fn new(topic: Topic, source_id: impl Into<String>, payload: Payload) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            id: Uuid::new_v4(),
            topic,
            source_id: source_id.into(),
            ts: Utc::now(),
            correlation_id: None,
            payload,
        }
    }

    /// 상관관계 ID를 부여합니다.
    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// JSON으로 직렬화합니다.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// JSON에서 역직렬화합니다.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kquant_core::{Symbol, TickSource};
    use rust_decimal_macros::dec;

    fn tick() -> MarketTick {
        MarketTick::quote(
            Symbol::canonicalize("005930").unwrap(),
            Utc::now(),
            dec!(75000),
            dec!(120),
            TickSource::BrokerWebsocket,
        )
    }

    #[test]
    fn test_envelope_json_roundtrip() {
        let envelope = Envelope::new(
            Topic::MarketDataReceived,
            "pipeline",
            Payload::MarketTick(tick()),
        )
        .with_correlation(Uuid::new_v4());

        let json = envelope.to_json().unwrap();
        let decoded = Envelope::from_json(&json).unwrap();

        assert_eq!(decoded.version, ENVELOPE_VERSION);
        assert_eq!(decoded.id, envelope.id);
        assert_eq!(decoded.topic, Topic::MarketDataReceived);
        assert_eq!(decoded.source_id, "pipeline");
        assert_eq!(decoded.correlation_id, envelope.correlation_id);
        match decoded.payload {
            Payload::MarketTick(t) => assert_eq!(t.close, dec!(75000)),
            _ => panic!("wrong payload kind"),
        }
    }

    #[test]
    fn test_payload_topic_compatibility() {
        let payload = Payload::MarketTick(tick());
        assert!(payload.compatible_with(Topic::MarketDataReceived));
        assert!(!payload.compatible_with(Topic::TradingSignal));

        let status = Payload::SystemStatus {
            component: "risk_engine".to_string(),
            status: "started".to_string(),
            detail: None,
        };
        assert!(status.compatible_with(Topic::SystemStatus));

        let lifecycle = Payload::StrategyLifecycle {
            name: "ma_1m5m".to_string(),
            reason: "timeout".to_string(),
        };
        assert!(lifecycle.compatible_with(Topic::StrategyActivated));
        assert!(lifecycle.compatible_with(Topic::StrategyDeactivated));
    }
}
