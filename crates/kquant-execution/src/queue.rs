//! 주문 우선순위 큐.
//!
//! 우선순위 키(낮을수록 먼저): 기본 100, 시장가 −20, 매도 −5,
//! 전략별 보정 ±10. 같은 키는 생성 시각 FIFO입니다.
//!
//! 추가 불변 조건:
//! - 미체결 주문과 (종목, 방향, 전략)이 같은 신규 주문은
//!   `duplicate_in_flight`로 거부. 단, 리스크 청산 주문은 면제.
//! - `priority_timeout` 내에 제출되지 못한 주문은 만료.
//! - 동시 제출 한도 초과분은 큐에서 대기.
//! - 내구 상태는 캐시에 미러링되어 재시작 시 비최종 주문을 복원.

use chrono::{DateTime, Duration, Utc};
use kquant_cache::MarketStore;
use kquant_core::{KquantResult, Order, OrderConfig, OrderState, OrderType, Side, Symbol};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// 큐 에러.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// 동일 (종목, 방향, 전략) 주문이 이미 진행 중
    #[error("duplicate_in_flight")]
    DuplicateInFlight,

    /// 큐 크기 한도 초과
    #[error("큐 가득 참 ({0})")]
    Full(usize),
}

/// 큐 미러 키.
const QUEUE_MIRROR_KEY: &str = "orders:queue";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueueSnapshot {
    pending: Vec<Order>,
    processing: Vec<Order>,
}

#[derive(Debug, Clone)]
struct Entry {
    priority: i32,
    created_ts: DateTime<Utc>,
    seq: u64,
    order: Order,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority
            && self.created_ts == other.created_ts
            && self.seq == other.seq
    }
}
impl Eq for Entry {}

impl Ord for Entry {
    // BinaryHeap은 최대 힙이므로 역순 비교로 최소 힙을 만든다
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.created_ts.cmp(&self.created_ts))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// 주문 우선순위 큐.
pub struct OrderQueue {
    heap: BinaryHeap<Entry>,
    /// 진행 중(큐 대기 + 제출 중) 주문의 중복 억제 키
    in_flight_keys: HashSet<(Symbol, Side, String)>,
    /// 제출 중 주문
    processing: HashMap<Uuid, Order>,
    config: OrderConfig,
    store: Arc<dyn MarketStore>,
    seq: u64,
}

impl OrderQueue {
    /// 새 큐를 생성합니다.
    pub fn new(config: OrderConfig, store: Arc<dyn MarketStore>) -> Self {
        Self {
            heap: BinaryHeap::new(),
            in_flight_keys: HashSet::new(),
            processing: HashMap::new(),
            config,
            store,
            seq: 0,
        }
    }

    /// 캐시 미러에서 비최종 주문을 복원합니다.
    pub async fn restore(&mut self) -> KquantResult<usize> {
        let Some(json) = self.store.get_json(QUEUE_MIRROR_KEY).await? else {
            return Ok(0);
        };
        let snapshot: QueueSnapshot =
            serde_json::from_str(&json).map_err(|e| kquant_core::KquantError::Serialization(e.to_string()))?;

        let mut restored = 0;
        for order in snapshot.pending.into_iter().chain(snapshot.processing) {
            if order.state.is_terminal() {
                continue;
            }
            // 복원된 제출 중 주문도 다시 큐 대기로
            let mut order = order;
            order.state = OrderState::Queued;
            if self.push_internal(order) {
                restored += 1;
            }
        }
        info!(restored, "Order queue restored from cache mirror");
        self.mirror().await?;
        Ok(restored)
    }

    /// 주문의 우선순위 키를 계산합니다.
    pub fn priority_of(&self, order: &Order) -> i32 {
        let mut priority = 100;
        if order.order_type == OrderType::Market {
            priority -= 20;
        }
        if order.side == Side::Sell {
            priority -= 5;
        }
        if let Some(&adjust) = self.config.strategy_priorities.get(&order.strategy_name) {
            priority += adjust.clamp(-10, 10);
        }
        priority.max(1)
    }

    /// 주문을 큐에 추가합니다.
    pub async fn enqueue(&mut self, mut order: Order) -> Result<(), QueueError> {
        let key = (
            order.symbol.clone(),
            order.side,
            order.strategy_name.clone(),
        );

        // 청산 주문은 중복 억제를 면제 (대기 중 매수가 청산을 막지 않도록)
        if !order.is_liquidation && self.in_flight_keys.contains(&key) {
            return Err(QueueError::DuplicateInFlight);
        }
        if self.heap.len() >= self.config.max_queue_size {
            return Err(QueueError::Full(self.config.max_queue_size));
        }

        order.transition(OrderState::Queued);
        self.push_internal(order);
        if let Err(e) = self.mirror().await {
            warn!(error = %e, "Queue mirror write failed");
        }
        Ok(())
    }

    fn push_internal(&mut self, order: Order) -> bool {
        let key = (
            order.symbol.clone(),
            order.side,
            order.strategy_name.clone(),
        );
        self.in_flight_keys.insert(key);
        self.seq += 1;
        self.heap.push(Entry {
            priority: self.priority_of(&order),
            created_ts: order.created_ts,
            seq: self.seq,
            order,
        });
        true
    }

    /// 만료된 대기 주문을 수거합니다. 반환된 주문은 `Failed` 상태입니다.
    pub async fn collect_expired(&mut self, now: DateTime<Utc>) -> Vec<Order> {
        let timeout = Duration::seconds(self.config.priority_timeout_secs as i64);
        let mut keep = BinaryHeap::new();
        let mut expired = Vec::new();

        for mut entry in std::mem::take(&mut self.heap).into_sorted_vec() {
            if now - entry.order.created_ts > timeout {
                entry.order.transition(OrderState::Failed);
                self.release_key(&entry.order);
                expired.push(entry.order);
            } else {
                keep.push(entry);
            }
        }
        self.heap = keep;

        if !expired.is_empty() {
            if let Err(e) = self.mirror().await {
                warn!(error = %e, "Queue mirror write failed");
            }
        }
        expired
    }

    /// 다음 제출 대상 주문을 반환합니다.
    ///
    /// 동시 제출 한도에 도달했으면 `None`을 반환하고, 꺼낸 주문은
    /// 제출 중 상태로 이동합니다.
    pub async fn next(&mut self) -> Option<Order> {
        if self.processing.len() >= self.config.max_concurrent_submissions {
            return None;
        }

        let entry = self.heap.pop()?;
        let order = entry.order;
        self.processing.insert(order.id, order.clone());
        if let Err(e) = self.mirror().await {
            warn!(error = %e, "Queue mirror write failed");
        }
        Some(order)
    }

    /// 주문 종결(최종 상태 도달)을 반영합니다.
    pub async fn complete(&mut self, order: &Order) {
        self.processing.remove(&order.id);
        self.release_key(order);
        if let Err(e) = self.mirror().await {
            warn!(error = %e, "Queue mirror write failed");
        }
    }

    fn release_key(&mut self, order: &Order) {
        self.in_flight_keys.remove(&(
            order.symbol.clone(),
            order.side,
            order.strategy_name.clone(),
        ));
    }

    /// 대기 중 주문 수.
    pub fn pending_len(&self) -> usize {
        self.heap.len()
    }

    /// 제출 중 주문 수.
    pub fn processing_len(&self) -> usize {
        self.processing.len()
    }

    async fn mirror(&self) -> KquantResult<()> {
        let snapshot = QueueSnapshot {
            pending: self.heap.iter().map(|e| e.order.clone()).collect(),
            processing: self.processing.values().cloned().collect(),
        };
        let json = serde_json::to_string(&snapshot)
            .map_err(|e| kquant_core::KquantError::Serialization(e.to_string()))?;
        self.store.set_json(QUEUE_MIRROR_KEY, &json, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kquant_cache::MemoryStore;
    use rust_decimal_macros::dec;

    fn symbol() -> Symbol {
        Symbol::canonicalize("005930").unwrap()
    }

    fn queue() -> OrderQueue {
        OrderQueue::new(OrderConfig::default(), Arc::new(MemoryStore::new()))
    }

    fn limit_buy(strategy: &str) -> Order {
        Order::limit(symbol(), Side::Buy, dec!(10), dec!(75000), strategy)
    }

    #[tokio::test]
    async fn test_priority_ordering() {
        let mut queue = queue();

        let limit_buy_order = limit_buy("a"); // 100
        let market_sell = Order::market(symbol(), Side::Sell, dec!(10), "b"); // 75
        let limit_sell = Order::limit(symbol(), Side::Sell, dec!(10), dec!(75000), "c"); // 95
        let market_buy = Order::market(symbol(), Side::Buy, dec!(10), "d"); // 80

        for order in [&limit_buy_order, &market_sell, &limit_sell, &market_buy] {
            queue.enqueue(order.clone()).await.unwrap();
        }

        // 시장가 매도 < 시장가 매수 < 지정가 매도 < 지정가 매수
        assert_eq!(queue.next().await.unwrap().id, market_sell.id);
        assert_eq!(queue.next().await.unwrap().id, market_buy.id);
        assert_eq!(queue.next().await.unwrap().id, limit_sell.id);
        assert_eq!(queue.next().await.unwrap().id, limit_buy_order.id);
    }

    #[tokio::test]
    async fn test_fifo_on_equal_priority() {
        let mut queue = queue();

        let mut first = limit_buy("a");
        first.created_ts = Utc::now() - Duration::seconds(10);
        let second = {
            let mut o = Order::limit(
                Symbol::canonicalize("000660").unwrap(),
                Side::Buy,
                dec!(10),
                dec!(75000),
                "a",
            );
            o.created_ts = Utc::now();
            o
        };

        // 나중 주문을 먼저 넣어도 생성 시각 순서로 나온다
        queue.enqueue(second.clone()).await.unwrap();
        queue.enqueue(first.clone()).await.unwrap();

        assert_eq!(queue.next().await.unwrap().id, first.id);
        assert_eq!(queue.next().await.unwrap().id, second.id);
    }

    #[tokio::test]
    async fn test_duplicate_in_flight_rejected() {
        let mut queue = queue();

        queue.enqueue(limit_buy("maX")).await.unwrap();
        let result = queue.enqueue(limit_buy("maX")).await;
        assert_eq!(result.unwrap_err(), QueueError::DuplicateInFlight);

        // 제출 중으로 이동해도 여전히 중복
        let order = queue.next().await.unwrap();
        assert_eq!(
            queue.enqueue(limit_buy("maX")).await.unwrap_err(),
            QueueError::DuplicateInFlight
        );

        // 종결 후에는 허용
        let mut done = order;
        done.transition(OrderState::Filled);
        queue.complete(&done).await;
        assert!(queue.enqueue(limit_buy("maX")).await.is_ok());
    }

    #[tokio::test]
    async fn test_liquidation_exempt_from_duplicate_rule() {
        let mut queue = queue();

        let sell = Order::market(symbol(), Side::Sell, dec!(10), "risk.stop_loss");
        queue.enqueue(sell).await.unwrap();

        // 같은 키의 청산 주문은 허용
        let liquidation =
            Order::market(symbol(), Side::Sell, dec!(10), "risk.stop_loss").as_liquidation();
        assert!(queue.enqueue(liquidation).await.is_ok());
    }

    #[tokio::test]
    async fn test_expiry_collects_and_fails() {
        let mut queue = queue();

        let mut stale = limit_buy("a");
        stale.created_ts = Utc::now() - Duration::seconds(301);
        queue.enqueue(stale.clone()).await.unwrap();
        queue.enqueue(limit_buy("b")).await.unwrap();

        let expired = queue.collect_expired(Utc::now()).await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, stale.id);
        assert_eq!(expired[0].state, OrderState::Failed);
        assert_eq!(queue.pending_len(), 1);
    }

    #[tokio::test]
    async fn test_concurrency_cap() {
        let mut queue = OrderQueue::new(
            OrderConfig {
                max_concurrent_submissions: 2,
                ..OrderConfig::default()
            },
            Arc::new(MemoryStore::new()),
        );

        for strategy in ["a", "b", "c"] {
            queue.enqueue(limit_buy(strategy)).await.unwrap();
        }

        assert!(queue.next().await.is_some());
        assert!(queue.next().await.is_some());
        // 한도 도달 → 대기
        assert!(queue.next().await.is_none());
        assert_eq!(queue.pending_len(), 1);

        // 하나 종결되면 다음 주문 제출 가능
        let mut done = limit_buy("a");
        done.transition(OrderState::Filled);
        // processing에서 실제로 꺼낸 주문으로 종결해야 함
        let processing: Vec<Order> = queue.processing.values().cloned().collect();
        queue.complete(&processing[0]).await;
        assert!(queue.next().await.is_some());
    }

    #[tokio::test]
    async fn test_restore_from_mirror() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());

        {
            let mut queue = OrderQueue::new(OrderConfig::default(), store.clone());
            queue.enqueue(limit_buy("a")).await.unwrap();
            queue.enqueue(limit_buy("b")).await.unwrap();
            // 하나는 제출 중 상태로
            queue.next().await.unwrap();
        }

        // 재시작 시뮬레이션
        let mut restored = OrderQueue::new(OrderConfig::default(), store);
        let count = restored.restore().await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(restored.pending_len(), 2);
    }
}
