//! 데이터 계층 에러 타입.

use thiserror::Error;

/// 데이터 수집 에러.
#[derive(Debug, Error)]
pub enum DataError {
    /// 연결 실패
    #[error("연결 에러: {0}")]
    Connection(String),

    /// WebSocket 에러
    #[error("WebSocket 에러: {0}")]
    WebSocket(String),

    /// HTTP 에러
    #[error("HTTP 에러: {0}")]
    Http(String),

    /// 파싱 실패
    #[error("파싱 에러: {0}")]
    Parse(String),

    /// 재연결 한도 소진
    #[error("어댑터 실패: {0}")]
    AdapterFailed(String),

    /// 캐시 에러
    #[error("캐시 에러: {0}")]
    Cache(String),

    /// 버스 에러
    #[error("버스 에러: {0}")]
    Bus(String),
}

/// 데이터 작업을 위한 Result 타입.
pub type DataResult<T> = Result<T, DataError>;

impl From<kquant_core::KquantError> for DataError {
    fn from(err: kquant_core::KquantError) -> Self {
        match err {
            kquant_core::KquantError::Cache(msg) => DataError::Cache(msg),
            other => DataError::Bus(other.to_string()),
        }
    }
}
