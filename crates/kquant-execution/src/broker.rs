//! 브로커 클라이언트 인터페이스.
//!
//! 브로커 API 바인딩은 외부 협력자입니다. 코어는 주문 제출/취소와
//! 체결 푸시 채널만 봅니다. 제출은 클라이언트 생성 주문 ID를
//! 멱등 키로 사용하며, 재시도에도 같은 ID를 재사용합니다.
//!
//! 네트워크 에러와 429/5xx는 지수 백오프(지터 포함)로 최대 3회
//! 재시도하고, 그 외 에러는 즉시 실패입니다. 모든 호출은 토큰 버킷
//! 속도 제한기를 거칩니다 (기본 18 rps, 브로커 한도 20 rps 아래).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kquant_core::{Order, Price, Quantity, Symbol};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

/// 브로커 에러.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// 요청 한도 초과 (HTTP 429)
    #[error("요청 한도 초과")]
    RateLimited,

    /// 브로커 서버 에러 (HTTP 5xx)
    #[error("브로커 서버 에러: {0}")]
    Server(String),

    /// 네트워크 에러
    #[error("네트워크 에러: {0}")]
    Network(String),

    /// 주문 거부 (재시도 금지)
    #[error("주문 거부: {0}")]
    Rejected(String),
}

impl BrokerError {
    /// 재시도 가능한 에러인지 확인합니다.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BrokerError::RateLimited | BrokerError::Server(_) | BrokerError::Network(_)
        )
    }
}

/// 체결 통지 (브로커 푸시 채널).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillNotification {
    /// 클라이언트 주문 ID
    pub order_id: Uuid,
    /// 브로커 주문 ID
    pub broker_order_id: String,
    /// 체결 ID
    pub fill_id: String,
    /// 종목
    pub symbol: Symbol,
    /// 체결 수량
    pub qty: Quantity,
    /// 체결 가격
    pub price: Price,
    /// 체결 시각
    pub ts: DateTime<Utc>,
}

/// 브로커 클라이언트 인터페이스.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// 주문을 제출하고 브로커 주문 ID를 반환합니다.
    ///
    /// `order.id`가 멱등 클라이언트 주문 ID입니다. 같은 ID의 재제출은
    /// 새 주문을 만들지 않아야 합니다.
    async fn place(&self, order: &Order) -> Result<String, BrokerError>;

    /// 주문을 취소합니다.
    async fn cancel(&self, broker_order_id: &str) -> Result<(), BrokerError>;
}

/// 토큰 버킷 속도 제한기.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// 초당 `rate`개 토큰의 버킷을 생성합니다.
    pub fn new(rate: u32) -> Self {
        let rate = rate.max(1) as f64;
        Self {
            capacity: rate,
            tokens: rate,
            refill_per_sec: rate,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let elapsed = self.last_refill.elapsed().as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = Instant::now();
    }

    /// 토큰 하나를 소비합니다. 토큰이 없으면 필요한 만큼 기다립니다.
    pub async fn acquire(&mut self) {
        loop {
            self.refill();
            if self.tokens >= 1.0 {
                self.tokens -= 1.0;
                return;
            }
            let wait = (1.0 - self.tokens) / self.refill_per_sec;
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        }
    }

    /// 즉시 획득을 시도합니다.
    pub fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// 재시도/속도 제한 래퍼.
pub struct RetryingBroker<B: BrokerClient> {
    inner: B,
    bucket: Arc<Mutex<TokenBucket>>,
    max_attempts: u32,
}

impl<B: BrokerClient> RetryingBroker<B> {
    /// 래퍼를 생성합니다.
    pub fn new(inner: B, rate_limit: u32) -> Self {
        Self {
            inner,
            bucket: Arc::new(Mutex::new(TokenBucket::new(rate_limit))),
            max_attempts: 3,
        }
    }

    fn backoff_delay(attempt: u32) -> Duration {
        let base = 100u64 * 2u64.pow(attempt);
        let jitter = rand::thread_rng().gen_range(0..=base / 2);
        Duration::from_millis(base + jitter)
    }

    /// 내부 클라이언트 참조 (테스트 검증용).
    pub fn inner_ref(&self) -> &B {
        &self.inner
    }
}

#[async_trait]
impl<B: BrokerClient> BrokerClient for RetryingBroker<B> {
    async fn place(&self, order: &Order) -> Result<String, BrokerError> {
        let mut last_error = BrokerError::Network("no attempt made".to_string());

        for attempt in 0..self.max_attempts {
            self.bucket.lock().await.acquire().await;

            // 같은 클라이언트 주문 ID로 재시도 (멱등)
            match self.inner.place(order).await {
                Ok(broker_order_id) => {
                    debug!(order_id = %order.id, broker_order_id = %broker_order_id, "Order placed");
                    return Ok(broker_order_id);
                }
                Err(e) if e.is_retryable() => {
                    warn!(order_id = %order.id, attempt, error = %e, "Place failed, retrying");
                    last_error = e;
                    tokio::time::sleep(Self::backoff_delay(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error)
    }

    async fn cancel(&self, broker_order_id: &str) -> Result<(), BrokerError> {
        let mut last_error = BrokerError::Network("no attempt made".to_string());

        for attempt in 0..self.max_attempts {
            self.bucket.lock().await.acquire().await;
            match self.inner.cancel(broker_order_id).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() => {
                    warn!(broker_order_id, attempt, error = %e, "Cancel failed, retrying");
                    last_error = e;
                    tokio::time::sleep(Self::backoff_delay(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error)
    }
}

/// 테스트용 모의 브로커.
///
/// 제출된 주문을 기록하고, 지정된 체결 계획에 따라 체결 통지를
/// 푸시합니다. 같은 클라이언트 주문 ID의 재제출은 새 주문을 만들지
/// 않습니다 (멱등).
pub struct MockBroker {
    /// 제출된 (클라이언트 ID → 브로커 ID)
    placed: Mutex<Vec<(Uuid, String)>>,
    /// 취소된 브로커 주문 ID
    cancelled: Mutex<Vec<String>>,
    /// 체결 통지 송신측
    fill_tx: mpsc::Sender<FillNotification>,
    /// 제출 시 자동 체결 비율 (1.0 = 전량)
    auto_fill_ratio: f64,
    /// 처음 N회 호출을 실패시키는 계획
    failures: Mutex<Vec<BrokerError>>,
}

impl MockBroker {
    /// 모의 브로커와 체결 수신 채널을 생성합니다.
    pub fn new(auto_fill_ratio: f64) -> (Self, mpsc::Receiver<FillNotification>) {
        let (fill_tx, fill_rx) = mpsc::channel(256);
        (
            Self {
                placed: Mutex::new(Vec::new()),
                cancelled: Mutex::new(Vec::new()),
                fill_tx,
                auto_fill_ratio,
                failures: Mutex::new(Vec::new()),
            },
            fill_rx,
        )
    }

    /// 다음 호출들을 실패시킬 에러를 계획합니다.
    pub async fn plan_failures(&self, errors: Vec<BrokerError>) {
        *self.failures.lock().await = errors;
    }

    /// 제출 호출 수를 반환합니다.
    pub async fn place_count(&self) -> usize {
        self.placed.lock().await.len()
    }

    /// 고유 주문 수를 반환합니다 (멱등 확인용).
    pub async fn unique_orders(&self) -> usize {
        let placed = self.placed.lock().await;
        let mut ids: Vec<Uuid> = placed.iter().map(|(id, _)| *id).collect();
        ids.sort();
        ids.dedup();
        ids.len()
    }

    /// 취소된 주문 ID 목록.
    pub async fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().await.clone()
    }

    /// 수동으로 체결을 푸시합니다.
    pub async fn push_fill(&self, fill: FillNotification) {
        let _ = self.fill_tx.send(fill).await;
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    async fn place(&self, order: &Order) -> Result<String, BrokerError> {
        if let Some(error) = self.failures.lock().await.pop() {
            return Err(error);
        }

        let broker_order_id = format!("MOCK-{}", order.id.simple());
        self.placed.lock().await.push((order.id, broker_order_id.clone()));

        if self.auto_fill_ratio > 0.0 {
            let fill_qty = order.quantity
                * rust_decimal::Decimal::try_from(self.auto_fill_ratio)
                    .unwrap_or(rust_decimal::Decimal::ONE);
            let price = order.price.unwrap_or_else(|| rust_decimal::Decimal::ZERO);
            let _ = self
                .fill_tx
                .send(FillNotification {
                    order_id: order.id,
                    broker_order_id: broker_order_id.clone(),
                    fill_id: format!("F-{}", order.id.simple()),
                    symbol: order.symbol.clone(),
                    qty: fill_qty.floor(),
                    price,
                    ts: Utc::now(),
                })
                .await;
        }

        Ok(broker_order_id)
    }

    async fn cancel(&self, broker_order_id: &str) -> Result<(), BrokerError> {
        self.cancelled.lock().await.push(broker_order_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kquant_core::Side;
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
    async fn test_retry_on_server_error_then_success() {
        let (mock, _fills) = MockBroker::new(0.0);
        mock.plan_failures(vec![BrokerError::Server("503".to_string())])
            .await;
        let broker = RetryingBroker::new(mock, 100);

        let order = order();
        let broker_id = broker.place(&order).await.unwrap();
        assert!(broker_id.starts_with("MOCK-"));
        // 재시도에도 클라이언트 ID는 하나 → 브로커 주문도 하나
        assert_eq!(broker.inner.unique_orders().await, 1);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let (mock, _fills) = MockBroker::new(0.0);
        mock.plan_failures(vec![BrokerError::Rejected("account closed".to_string())])
            .await;
        let broker = RetryingBroker::new(mock, 100);

        let result = broker.place(&order()).await;
        assert_eq!(
            result.unwrap_err(),
            BrokerError::Rejected("account closed".to_string())
        );
        assert_eq!(broker.inner.place_count().await, 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail() {
        let (mock, _fills) = MockBroker::new(0.0);
        mock.plan_failures(vec![
            BrokerError::RateLimited,
            BrokerError::RateLimited,
            BrokerError::RateLimited,
        ])
        .await;
        let broker = RetryingBroker::new(mock, 100);

        let result = broker.place(&order()).await;
        assert_eq!(result.unwrap_err(), BrokerError::RateLimited);
    }

    #[tokio::test]
    async fn test_token_bucket_limits_rate() {
        let mut bucket = TokenBucket::new(5);

        // 용량만큼 즉시 획득
        for _ in 0..5 {
            assert!(bucket.try_acquire());
        }
        // 고갈
        assert!(!bucket.try_acquire());

        // 리필 후 다시 획득 가능
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(bucket.try_acquire());
    }

    #[tokio::test]
    async fn test_mock_auto_fill() {
        let (mock, mut fills) = MockBroker::new(1.0);
        let order = order();
        mock.place(&order).await.unwrap();

        let fill = fills.recv().await.unwrap();
        assert_eq!(fill.order_id, order.id);
        assert_eq!(fill.qty, dec!(10));
        assert_eq!(fill.price, dec!(75000));
    }
}
