//! 트레이딩 시스템의 에러 타입.
//!
//! 이 모듈은 시스템 전반에서 사용되는 에러 타입을 정의합니다.
//! 에러는 재시도 가능 여부와 치명도에 따라 분류됩니다.

use thiserror::Error;

/// 핵심 트레이딩 에러.
#[derive(Debug, Error)]
pub enum KquantError {
    /// 설정 에러
    #[error("설정 에러: {0}")]
    Config(String),

    /// 브로커 연동 에러
    #[error("브로커 에러: {0}")]
    Broker(String),

    /// 주문 에러
    #[error("주문 에러: {0}")]
    Order(String),

    /// 포지션 에러
    #[error("포지션 에러: {0}")]
    Position(String),

    /// 리스크 관리 에러
    #[error("리스크 에러: {0}")]
    Risk(String),

    /// 전략 에러
    #[error("전략 에러: {0}")]
    Strategy(String),

    /// 시장 데이터 에러
    #[error("데이터 에러: {0}")]
    Data(String),

    /// 검증 실패 (입력 거부, 재시도 금지)
    #[error("검증 실패: {0}")]
    Validation(String),

    /// 요청 한도 초과
    #[error("요청 한도 초과: {0}")]
    RateLimit(String),

    /// 네트워크 에러
    #[error("네트워크 에러: {0}")]
    Network(String),

    /// 타임아웃
    #[error("타임아웃: {0}")]
    Timeout(String),

    /// 직렬화 에러
    #[error("직렬화 에러: {0}")]
    Serialization(String),

    /// 캐시 에러
    #[error("캐시 에러: {0}")]
    Cache(String),

    /// 불변 조건 위반 (해당 컴포넌트 쓰기 중단 대상)
    #[error("불변 조건 위반: {0}")]
    InvariantViolation(String),

    /// 찾을 수 없음
    #[error("찾을 수 없음: {0}")]
    NotFound(String),

    /// 내부 에러
    #[error("내부 에러: {0}")]
    Internal(String),
}

/// 트레이딩 작업을 위한 Result 타입.
pub type KquantResult<T> = Result<T, KquantError>;

impl KquantError {
    /// 재시도 가능한 에러인지 확인합니다.
    ///
    /// 일시적 I/O 에러(네트워크, 한도 초과, 타임아웃, 캐시 순단)만
    /// 백오프 후 재시도 대상입니다. 검증/정책 에러는 재시도하지 않습니다.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KquantError::Network(_)
                | KquantError::RateLimit(_)
                | KquantError::Timeout(_)
                | KquantError::Cache(_)
        )
    }

    /// 치명적인 에러인지 확인합니다.
    ///
    /// 불변 조건 위반은 해당 컴포넌트를 격리 상태로 전환시킵니다.
    pub fn is_critical(&self) -> bool {
        matches!(self, KquantError::InvariantViolation(_))
    }
}

impl From<serde_json::Error> for KquantError {
    fn from(err: serde_json::Error) -> Self {
        KquantError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        let network_err = KquantError::Network("connection reset".to_string());
        assert!(network_err.is_retryable());

        let validation_err = KquantError::Validation("quantity < 1".to_string());
        assert!(!validation_err.is_retryable());

        let timeout_err = KquantError::Timeout("risk_check 500ms".to_string());
        assert!(timeout_err.is_retryable());
    }

    #[test]
    fn test_error_critical() {
        let invariant_err = KquantError::InvariantViolation("filled_qty > quantity".to_string());
        assert!(invariant_err.is_critical());
        assert!(!invariant_err.is_retryable());

        let order_err = KquantError::Order("unknown symbol".to_string());
        assert!(!order_err.is_critical());
    }
}
