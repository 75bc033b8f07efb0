//! # KQuant Bus
//!
//! 프로세스 내부 및 (Redis pub/sub 경유) 프로세스 간 이벤트 버스.
//!
//! 제공 기능:
//! - 고정된 토픽 집합에 대한 타입드 발행/구독
//! - 토픽별 순서 보장, 구독자별 유한 버퍼와 지연 마커
//! - 구독자 핸들러 워커 풀 (핸들러 예외 격리)
//! - risk_check를 위한 요청/응답 채널 (타임아웃 필수)
//! - 토픽별 발행/전달/유실/핸들러 실패 카운터

pub mod bus;
pub mod envelope;
pub mod metrics;
pub mod rpc;
pub mod topic;
pub mod transport;

pub use bus::{BusSubscription, Delivery, EventBus};
pub use envelope::{Envelope, Payload, RiskAlertSeverity, ENVELOPE_VERSION};
pub use metrics::{BusMetrics, TopicStats};
pub use rpc::{RiskCheckClient, RiskCheckServer, RiskDecision, RpcError};
pub use topic::Topic;
pub use transport::RedisTransport;
