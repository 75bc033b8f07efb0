//! # KQuant Risk
//!
//! 리스크 관리 시스템.
//!
//! 두 하위 시스템으로 구성됩니다:
//! - **동기 판정**: 주문 엔진의 `risk_check` RPC에 순서가 고정된 규칙
//!   체인으로 승인/조정/거부를 응답합니다.
//! - **비동기 모니터**: 자동 손절/익절, 비상 정지 조건 감시,
//!   포트폴리오 리스크 지표 계산 및 경보 발행.

pub mod context;
pub mod emergency;
pub mod monitor;
pub mod rules;
pub mod service;
pub mod sizing;
pub mod stop_loss;

pub use context::RiskContext;
pub use emergency::EmergencyStop;
pub use monitor::{RiskMetricsReport, RiskMonitor};
pub use rules::{evaluate_chain, RuleOutcome};
pub use service::RiskEngine;
pub use sizing::PositionSizer;
pub use stop_loss::{StopLossConfig, StopLossMonitor};
