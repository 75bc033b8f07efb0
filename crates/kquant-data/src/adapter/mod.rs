//! 시장 데이터 어댑터.
//!
//! 어댑터는 교체 가능합니다. 연결 관리와 재시도는 어댑터 내부에서
//! 처리하고, 정규화된 `MarketTick`을 파이프라인 방향 채널로 밀어
//! 넣습니다. 상태 변화는 health 콜백 채널로 보고합니다.

pub mod polled;
pub mod streaming;

pub use polled::{PolledAdapter, PolledConfig, QuoteFetcher};
pub use streaming::{StreamCodec, StreamingAdapter, StreamingConfig};

use crate::error::DataResult;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use kquant_core::Symbol;
use std::time::Duration;

/// 어댑터 상태 보고.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterHealth {
    /// 주기 신호
    Heartbeat,
    /// 연결 끊김
    Disconnected,
    /// 재연결 성공
    Reconnected,
    /// 재시도 한도 소진, 어댑터 중단
    Failed(String),
}

/// 시장 데이터 어댑터 인터페이스.
#[async_trait]
pub trait MarketAdapter: Send + Sync {
    /// 어댑터 이름.
    fn name(&self) -> &str;

    /// 연결을 시작합니다. 백오프 재시도는 내부에서 수행합니다.
    async fn connect(&mut self) -> DataResult<()>;

    /// 종목 구독을 추가합니다.
    async fn subscribe(&mut self, symbol: &Symbol) -> DataResult<()>;

    /// 종목 구독을 해제합니다.
    async fn unsubscribe(&mut self, symbol: &Symbol) -> DataResult<()>;
}

/// 지수 백오프 재연결 정책.
///
/// 초기 1초, 배수 2, 상한 60초. 10분 창 안에서 5회를 초과하면
/// `adapter_failed`로 전환합니다.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// 초기 대기 시간
    pub initial: Duration,
    /// 배수
    pub multiplier: u32,
    /// 대기 상한
    pub cap: Duration,
    /// 창 내 최대 시도 횟수
    pub max_attempts: u32,
    /// 시도 집계 창
    pub window: Duration,
    attempts: Vec<DateTime<Utc>>,
    current: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            multiplier: 2,
            cap: Duration::from_secs(60),
            max_attempts: 5,
            window: Duration::from_secs(600),
            attempts: Vec::new(),
            current: Duration::from_secs(1),
        }
    }
}

impl BackoffPolicy {
    /// 다음 재시도 대기 시간을 반환합니다.
    ///
    /// 창 내 시도 한도를 초과하면 `None`을 반환하며, 호출자는
    /// `adapter_failed`를 표면화해야 합니다.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let now = Utc::now();
        let window = ChronoDuration::from_std(self.window).unwrap_or(ChronoDuration::seconds(600));
        self.attempts.retain(|t| now - *t < window);

        if self.attempts.len() as u32 >= self.max_attempts {
            return None;
        }

        self.attempts.push(now);
        let delay = self.current;
        self.current = (self.current * self.multiplier).min(self.cap);
        Some(delay)
    }

    /// 연결 성공 시 백오프를 초기화합니다.
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_progression() {
        let mut policy = BackoffPolicy::default();

        assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(4)));
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(8)));
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(16)));

        // 창 내 6번째 시도는 실패로 전환
        assert_eq!(policy.next_delay(), None);
    }

    #[test]
    fn test_backoff_cap() {
        let mut policy = BackoffPolicy {
            max_attempts: 20,
            ..Default::default()
        };

        let mut last = Duration::ZERO;
        for _ in 0..10 {
            last = policy.next_delay().unwrap();
        }
        assert_eq!(last, Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_reset() {
        let mut policy = BackoffPolicy::default();
        policy.next_delay();
        policy.next_delay();

        policy.reset();
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
    }
}
