//! risk_check 요청/응답 채널.
//!
//! 주문 엔진은 상관관계 ID가 부여된 요청을 보내고 전용 응답 채널
//! (`oneshot`)에서 회신을 기다립니다. 타임아웃은 필수이며(기본 500ms),
//! 타임아웃이나 서비스 부재는 호출자 측에서 거부로 취급해야 합니다.

use kquant_core::{Order, Quantity};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;
use uuid::Uuid;

/// 기본 risk_check 타임아웃.
pub const DEFAULT_RISK_CHECK_TIMEOUT: Duration = Duration::from_millis(500);

/// 리스크 판정.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RiskDecision {
    /// 승인
    Approve,
    /// 수량 조정 후 승인
    Adjust {
        /// 조정된 수량
        adjusted_quantity: Quantity,
        /// 조정 사유
        reasons: Vec<String>,
    },
    /// 거부
    Reject {
        /// 거부 사유
        reasons: Vec<String>,
    },
}

impl RiskDecision {
    /// 주문 진행이 가능한 판정인지 확인합니다.
    pub fn is_actionable(&self) -> bool {
        !matches!(self, RiskDecision::Reject { .. })
    }

    /// 거부 판정을 단일 사유로 생성합니다.
    pub fn reject(reason: impl Into<String>) -> Self {
        RiskDecision::Reject {
            reasons: vec![reason.into()],
        }
    }
}

/// risk_check 요청.
#[derive(Debug, Clone)]
pub struct RiskCheckRequest {
    /// 상관관계 ID
    pub correlation_id: Uuid,
    /// 검사 대상 주문
    pub order: Order,
    /// 평가 기준가 (시장가 주문의 명목 금액 계산용)
    pub mark_price: kquant_core::Price,
}

/// RPC 호출 에러.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RpcError {
    /// 응답 시간 초과. 호출자는 거부로 취급해야 합니다.
    #[error("risk_check 타임아웃")]
    Timeout,
    /// 리스크 엔진이 내려가 있음. 호출자는 거부로 취급해야 합니다.
    #[error("리스크 엔진 응답 채널 닫힘")]
    ServiceUnavailable,
}

type RequestWithReply = (RiskCheckRequest, oneshot::Sender<RiskDecision>);

/// risk_check 클라이언트 (주문 엔진 측).
#[derive(Clone)]
pub struct RiskCheckClient {
    tx: mpsc::Sender<RequestWithReply>,
    timeout: Duration,
}

/// risk_check 서버 수신부 (리스크 엔진 측).
pub struct RiskCheckServer {
    rx: mpsc::Receiver<RequestWithReply>,
}

/// 클라이언트/서버 쌍을 생성합니다.
pub fn risk_check_channel(capacity: usize, timeout: Duration) -> (RiskCheckClient, RiskCheckServer) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (RiskCheckClient { tx, timeout }, RiskCheckServer { rx })
}

impl RiskCheckClient {
    /// 리스크 체크를 요청하고 회신을 기다립니다.
    ///
    /// 타임아웃 또는 서비스 부재 시 에러를 반환하며, 호출자는 이를
    /// 거부와 동일하게 취급해야 합니다.
    pub async fn check(
        &self,
        order: Order,
        mark_price: kquant_core::Price,
    ) -> Result<RiskDecision, RpcError> {
        let correlation_id = Uuid::new_v4();
        let (reply_tx, reply_rx) = oneshot::channel();

        let request = RiskCheckRequest {
            correlation_id,
            order,
            mark_price,
        };

        if self.tx.send((request, reply_tx)).await.is_err() {
            return Err(RpcError::ServiceUnavailable);
        }

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(decision)) => Ok(decision),
            Ok(Err(_)) => Err(RpcError::ServiceUnavailable),
            Err(_) => {
                warn!(correlation_id = %correlation_id, "risk_check timed out");
                Err(RpcError::Timeout)
            }
        }
    }
}

impl RiskCheckServer {
    /// 다음 요청을 수신합니다. 채널이 닫히면 `None`을 반환합니다.
    pub async fn next(&mut self) -> Option<(RiskCheckRequest, oneshot::Sender<RiskDecision>)> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kquant_core::{Side, Symbol};
    use rust_decimal_macros::dec;

    fn order() -> Order {
        Order::limit(
            Symbol::canonicalize("005930").unwrap(),
            Side::Buy,
            dec!(10),
            dec!(75000),
            "ma_1m5m",
        )
    }

    #[tokio::test]
    async fn test_request_response_roundtrip() {
        let (client, mut server) = risk_check_channel(8, Duration::from_millis(200));

        tokio::spawn(async move {
            while let Some((request, reply)) = server.next().await {
                assert_eq!(request.order.quantity, dec!(10));
                let _ = reply.send(RiskDecision::Adjust {
                    adjusted_quantity: dec!(6),
                    reasons: vec!["position_size".to_string()],
                });
            }
        });

        let decision = client.check(order(), dec!(75000)).await.unwrap();
        match decision {
            RiskDecision::Adjust { adjusted_quantity, .. } => {
                assert_eq!(adjusted_quantity, dec!(6))
            }
            _ => panic!("expected adjust"),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_surfaced() {
        let (client, mut server) = risk_check_channel(8, Duration::from_millis(50));

        // 응답하지 않는 서버
        tokio::spawn(async move {
            while let Some((_request, reply)) = server.next().await {
                tokio::time::sleep(Duration::from_millis(500)).await;
                let _ = reply.send(RiskDecision::Approve);
            }
        });

        let result = client.check(order(), dec!(75000)).await;
        assert_eq!(result.unwrap_err(), RpcError::Timeout);
    }

    #[tokio::test]
    async fn test_service_unavailable_when_server_dropped() {
        let (client, server) = risk_check_channel(8, Duration::from_millis(50));
        drop(server);

        let result = client.check(order(), dec!(75000)).await;
        assert_eq!(result.unwrap_err(), RpcError::ServiceUnavailable);
    }

    #[test]
    fn test_decision_actionable() {
        assert!(RiskDecision::Approve.is_actionable());
        assert!(RiskDecision::Adjust {
            adjusted_quantity: dec!(1),
            reasons: vec![]
        }
        .is_actionable());
        assert!(!RiskDecision::reject("daily_loss_limit").is_actionable());
    }
}
