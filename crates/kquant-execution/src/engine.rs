//! 주문 엔진.
//!
//! `trading_signal` 구독 → 주문 변환 → 검증 → 동기 risk_check →
//! 우선순위 큐 → 브로커 제출 → 체결 추적 → 포지션/손익 갱신의
//! 전체 생명주기를 담당합니다.
//!
//! 주문 유형 결정: 장마감 강제청산과 리스크 손절 발원 신호는 시장가,
//! 그 외에는 신호의 제안 가격을 사용하는 지정가입니다. risk_check
//! 타임아웃은 거부와 동일하게 취급합니다.

use crate::broker::{BrokerClient, FillNotification};
use crate::commission::CommissionCalculator;
use crate::positions::PositionBook;
use crate::queue::{OrderQueue, QueueError};
use crate::tracker::{ExecutionTracker, FillOutcome, StallStatus, TrackerError};
use chrono::{Duration as ChronoDuration, Utc};
use kquant_bus::{
    Delivery, Envelope, EventBus, Payload, RiskCheckClient, RiskDecision, Topic,
};
use kquant_cache::MarketStore;
use kquant_core::{
    CommissionConfig, Fill, KquantResult, Order, OrderConfig, OrderState, Price, SignalAction,
    Symbol, TradingSignal,
};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 주문 엔진 설정.
#[derive(Debug, Clone)]
pub struct OrderEngineConfig {
    /// 큐/제출 설정
    pub order: OrderConfig,
    /// 수수료 설정
    pub commission: CommissionConfig,
    /// 매수 주문 1건의 목표 예산 (기본 로트 사이징)
    pub lot_budget: Decimal,
    /// 거래 허용 종목
    pub known_symbols: HashSet<Symbol>,
}

impl OrderEngineConfig {
    /// 종목 목록으로 설정을 생성합니다.
    pub fn new(order: OrderConfig, commission: CommissionConfig, symbols: &[Symbol]) -> Self {
        Self {
            order,
            commission,
            lot_budget: Decimal::new(1_000_000, 0),
            known_symbols: symbols.iter().cloned().collect(),
        }
    }
}

/// 주문 엔진.
pub struct OrderEngine {
    bus: Arc<EventBus>,
    store: Arc<dyn MarketStore>,
    risk: RiskCheckClient,
    broker: Arc<dyn BrokerClient>,
    queue: OrderQueue,
    positions: PositionBook,
    commission: CommissionCalculator,
    config: OrderEngineConfig,
    /// 정본 주문 레코드 (이 엔진이 소유)
    orders: HashMap<Uuid, Order>,
    trackers: HashMap<Uuid, ExecutionTracker>,
    /// 정체 경고를 이미 낸 주문
    stall_notified: HashSet<Uuid>,
}

impl OrderEngine {
    /// 새 주문 엔진을 생성합니다.
    pub fn new(
        bus: Arc<EventBus>,
        store: Arc<dyn MarketStore>,
        risk: RiskCheckClient,
        broker: Arc<dyn BrokerClient>,
        config: OrderEngineConfig,
    ) -> Self {
        let queue = OrderQueue::new(config.order.clone(), Arc::clone(&store));
        let positions = PositionBook::new(Arc::clone(&bus), Arc::clone(&store));
        let commission = CommissionCalculator::new(config.commission.clone());
        Self {
            bus,
            store,
            risk,
            broker,
            queue,
            positions,
            commission,
            config,
            orders: HashMap::new(),
            trackers: HashMap::new(),
            stall_notified: HashSet::new(),
        }
    }

    /// 캐시 미러에서 큐를 복원합니다 (재시작 시).
    pub async fn restore_queue(&mut self) -> KquantResult<usize> {
        self.queue.restore().await
    }

    /// 주문 조회 (읽기 전용).
    pub fn order(&self, id: Uuid) -> Option<&Order> {
        self.orders.get(&id)
    }

    /// 포지션 장부 (읽기 전용).
    pub fn positions(&self) -> &PositionBook {
        &self.positions
    }

    /// 매매 신호 하나를 처리합니다.
    pub async fn handle_signal(&mut self, signal: TradingSignal) {
        debug!(
            strategy = %signal.strategy_name,
            symbol = %signal.symbol,
            action = %signal.action,
            "Signal received"
        );

        // 1. 신호 → 주문 변환
        let Some(order) = self.build_order(&signal).await else {
            return;
        };

        // 2. 검증
        if let Err(reason) = self.validate(&order) {
            self.fail_order(order, &reason).await;
            return;
        }

        // 3. 평가 기준가
        let Some(mark_price) = self.mark_price(&order).await else {
            self.fail_order(order, "context_unavailable").await;
            return;
        };

        // 4. 동기 risk_check (타임아웃 ⇒ 거부)
        let decision = match self.risk.check(order.clone(), mark_price).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "risk_check failed");
                self.fail_order(order, &format!("risk_check_failed: {}", e)).await;
                return;
            }
        };

        let mut order = order;
        match decision {
            RiskDecision::Approve => {}
            RiskDecision::Adjust {
                adjusted_quantity,
                reasons,
            } => {
                info!(
                    order_id = %order.id,
                    original = %order.quantity,
                    adjusted = %adjusted_quantity,
                    reasons = ?reasons,
                    "Quantity adjusted by risk"
                );
                order.quantity = adjusted_quantity;
            }
            RiskDecision::Reject { reasons } => {
                self.fail_order(order, &reasons.join(", ")).await;
                return;
            }
        }

        // 5. 큐 진입
        match self.queue.enqueue(order.clone()).await {
            Ok(()) => {
                order.state = OrderState::Queued;
                self.orders.insert(order.id, order.clone());
                let _ = self.bus.publish(Envelope::new(
                    Topic::OrderPlaced,
                    "order_engine",
                    Payload::Order {
                        order: Box::new(order),
                        reason: None,
                    },
                ));
            }
            Err(QueueError::DuplicateInFlight) => {
                self.fail_order(order, "duplicate_in_flight").await;
            }
            Err(e) => {
                self.fail_order(order, &e.to_string()).await;
            }
        }
    }

    async fn build_order(&self, signal: &TradingSignal) -> Option<Order> {
        match signal.action {
            SignalAction::Buy => {
                let price = match signal.suggested_price {
                    Some(p) => p,
                    None => self.latest_close(&signal.symbol).await?,
                };
                if price <= Decimal::ZERO {
                    return None;
                }
                let qty = (self.config.lot_budget / price).floor();
                Some(
                    Order::limit(signal.symbol.clone(), kquant_core::Side::Buy, qty, price,
                        signal.strategy_name.clone()),
                )
            }
            SignalAction::Sell | SignalAction::HoldExit => {
                let held = self.positions.held_qty(&signal.symbol);
                if held < Decimal::ONE {
                    debug!(symbol = %signal.symbol, "No position to liquidate, signal ignored");
                    return None;
                }

                // 강제청산과 리스크 손절은 시장가이며, 이 두 경우만
                // 중복 주문 억제 면제 대상인 청산 주문으로 표시한다.
                // 일반 전략 매도는 중복 억제를 그대로 적용받는다.
                let forced = signal.is_forced_exit()
                    || signal.origin == kquant_core::SignalOrigin::RiskStopLoss;
                let mut order = if forced {
                    Order::market(signal.symbol.clone(), kquant_core::Side::Sell, held,
                        signal.strategy_name.clone())
                } else {
                    let price = match signal.suggested_price {
                        Some(p) => p,
                        None => self.latest_close(&signal.symbol).await?,
                    };
                    Order::limit(signal.symbol.clone(), kquant_core::Side::Sell, held, price,
                        signal.strategy_name.clone())
                };
                if forced {
                    order = order.as_liquidation();
                }
                Some(order)
            }
        }
    }

    fn validate(&self, order: &Order) -> Result<(), String> {
        if !self.config.known_symbols.contains(&order.symbol) {
            return Err(format!("unknown symbol: {}", order.symbol));
        }
        if order.quantity < Decimal::ONE {
            return Err("quantity below 1".to_string());
        }
        if order.quantity != order.quantity.floor() {
            return Err("quantity must be integral".to_string());
        }
        if order.order_type == kquant_core::OrderType::Limit
            && order.price.unwrap_or(Decimal::ZERO) <= Decimal::ZERO
        {
            return Err("limit order requires positive price".to_string());
        }
        Ok(())
    }

    async fn latest_close(&self, symbol: &Symbol) -> Option<Price> {
        self.store.latest_tick(symbol).await.ok().flatten().map(|t| t.close)
    }

    async fn mark_price(&self, order: &Order) -> Option<Price> {
        match order.price {
            Some(p) => Some(p),
            None => self.latest_close(&order.symbol).await,
        }
    }

    async fn fail_order(&mut self, mut order: Order, reason: &str) {
        warn!(order_id = %order.id, reason, "Order failed");
        order.transition(OrderState::Failed);
        self.orders.insert(order.id, order.clone());
        let _ = self.bus.publish(Envelope::new(
            Topic::OrderFailed,
            "order_engine",
            Payload::Order {
                order: Box::new(order),
                reason: Some(reason.to_string()),
            },
        ));
    }

    /// 큐에서 만료 주문을 수거하고, 동시 제출 한도 안에서 제출합니다.
    pub async fn pump(&mut self) {
        for expired in self.queue.collect_expired(Utc::now()).await {
            self.orders.insert(expired.id, expired.clone());
            let _ = self.bus.publish(Envelope::new(
                Topic::OrderFailed,
                "order_engine",
                Payload::Order {
                    order: Box::new(expired),
                    reason: Some("expired".to_string()),
                },
            ));
        }

        while let Some(mut order) = self.queue.next().await {
            order.transition(OrderState::Submitted);

            match self.broker.place(&order).await {
                Ok(broker_order_id) => {
                    info!(order_id = %order.id, broker_order_id = %broker_order_id, "Order submitted");
                    order.broker_order_id = Some(broker_order_id);
                    self.trackers.insert(
                        order.id,
                        ExecutionTracker::new(
                            order.id,
                            order.quantity,
                            self.config.order.max_fills_per_order,
                        ),
                    );
                    self.orders.insert(order.id, order);
                }
                Err(e) => {
                    warn!(order_id = %order.id, error = %e, "Broker submission failed");
                    order.transition(OrderState::Failed);
                    self.queue.complete(&order).await;
                    self.orders.insert(order.id, order.clone());
                    let _ = self.bus.publish(Envelope::new(
                        Topic::OrderFailed,
                        "order_engine",
                        Payload::Order {
                            order: Box::new(order),
                            reason: Some(e.to_string()),
                        },
                    ));
                }
            }
        }
    }

    /// 브로커 체결 통지를 처리합니다.
    pub async fn handle_fill(&mut self, notification: FillNotification) {
        let Some(order) = self.orders.get(&notification.order_id).cloned() else {
            warn!(order_id = %notification.order_id, "Fill for unknown order");
            return;
        };
        if order.state.is_terminal() {
            warn!(order_id = %order.id, "Fill for terminal order ignored");
            return;
        }

        let commission = self
            .commission
            .total(order.side, notification.price, notification.qty);
        let fill = Fill {
            fill_id: notification.fill_id.clone(),
            order_id: order.id,
            symbol: order.symbol.clone(),
            side: order.side,
            qty: notification.qty,
            price: notification.price,
            commission,
            ts: notification.ts,
        };

        let Some(tracker) = self.trackers.get_mut(&order.id) else {
            warn!(order_id = %order.id, "Fill without tracker ignored");
            return;
        };

        let outcome = match tracker.apply_fill(fill.clone()) {
            Ok(outcome) => outcome,
            Err(TrackerError::FillCapExceeded(cap)) => {
                warn!(order_id = %order.id, cap, "Anomalous fill excluded");
                return;
            }
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "Fill rejected");
                return;
            }
        };

        // 정본 주문 갱신
        let mut updated = order;
        updated.filled_qty = tracker.filled_qty;
        updated.avg_fill_price = tracker.avg_fill_price;
        updated.commission_paid = tracker.commission_total;

        match outcome {
            FillOutcome::Partial => {
                updated.transition(OrderState::Partial);
                self.orders.insert(updated.id, updated.clone());
                let _ = self.bus.publish(Envelope::new(
                    Topic::OrderPartiallyExecuted,
                    "order_engine",
                    Payload::Order {
                        order: Box::new(updated),
                        reason: None,
                    },
                ));
            }
            FillOutcome::Complete => {
                updated.transition(OrderState::Filled);
                self.queue.complete(&updated).await;
                self.trackers.remove(&updated.id);
                self.stall_notified.remove(&updated.id);
                self.orders.insert(updated.id, updated.clone());
                let _ = self.bus.publish(Envelope::new(
                    Topic::OrderFullyExecuted,
                    "order_engine",
                    Payload::Order {
                        order: Box::new(updated),
                        reason: None,
                    },
                ));
            }
        }

        if let Err(e) = self.positions.apply_fill(&fill).await {
            warn!(error = %e, "Position update failed");
        }
    }

    /// 부분 체결 정체 감시.
    ///
    /// 임계 시간 초과 시 `partial_fill_stalled`를 알리고, 2배 초과 시
    /// 잔량을 취소합니다.
    pub async fn watchdog(&mut self) {
        let threshold =
            ChronoDuration::seconds(self.config.order.max_partial_fill_time_secs as i64);
        let now = Utc::now();

        let mut to_cancel = Vec::new();
        for (order_id, tracker) in &self.trackers {
            match tracker.stall_status(now, threshold) {
                StallStatus::Healthy => {}
                StallStatus::Stalled => {
                    if self.stall_notified.insert(*order_id) {
                        warn!(order_id = %order_id, "Partial fill stalled");
                        let _ = self.bus.publish(Envelope::new(
                            Topic::SystemStatus,
                            "order_engine",
                            Payload::SystemStatus {
                                component: "order_engine".to_string(),
                                status: "partial_fill_stalled".to_string(),
                                detail: Some(order_id.to_string()),
                            },
                        ));
                    }
                }
                StallStatus::CancelDue => to_cancel.push(*order_id),
            }
        }

        for order_id in to_cancel {
            self.cancel_remainder(order_id).await;
        }
    }

    async fn cancel_remainder(&mut self, order_id: Uuid) {
        let Some(mut order) = self.orders.get(&order_id).cloned() else {
            return;
        };
        let Some(broker_order_id) = order.broker_order_id.clone() else {
            return;
        };

        info!(
            order_id = %order_id,
            filled = %order.filled_qty,
            remaining = %order.remaining_qty(),
            "Cancelling stalled remainder"
        );
        if let Err(e) = self.broker.cancel(&broker_order_id).await {
            warn!(order_id = %order_id, error = %e, "Cancel failed");
            return;
        }

        order.transition(OrderState::Cancelled);
        self.queue.complete(&order).await;
        self.trackers.remove(&order_id);
        self.stall_notified.remove(&order_id);
        self.orders.insert(order_id, order.clone());
        let _ = self.bus.publish(Envelope::new(
            Topic::OrderCancelled,
            "order_engine",
            Payload::Order {
                order: Box::new(order),
                reason: Some("partial_fill_stalled".to_string()),
            },
        ));
    }

    /// 엔진 구동 루프.
    pub async fn run(
        mut self,
        mut fill_rx: mpsc::Receiver<FillNotification>,
        shutdown: CancellationToken,
    ) {
        info!("OrderEngine started");
        let mut signal_sub = self.bus.subscribe(Topic::TradingSignal);
        let mut tick_sub = self.bus.subscribe(Topic::MarketDataReceived);
        let mut pump_interval = tokio::time::interval(std::time::Duration::from_millis(200));
        pump_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut watchdog_interval = tokio::time::interval(std::time::Duration::from_secs(5));
        watchdog_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                delivery = signal_sub.recv() => {
                    match delivery {
                        Some(Delivery::Event(envelope)) => {
                            if let Payload::Signal(signal) = envelope.payload {
                                self.handle_signal(signal).await;
                                self.pump().await;
                            }
                        }
                        Some(Delivery::Lagged(n)) => {
                            warn!(skipped = n, "Order engine lagged behind signal stream");
                        }
                        None => break,
                    }
                }
                notification = fill_rx.recv() => {
                    match notification {
                        Some(notification) => self.handle_fill(notification).await,
                        None => break,
                    }
                }
                delivery = tick_sub.recv() => {
                    if let Some(Delivery::Event(envelope)) = delivery {
                        if let Payload::MarketTick(tick) = envelope.payload {
                            if let Err(e) = self.positions.mark(&tick.symbol, tick.close).await {
                                warn!(error = %e, "Mark-to-market failed");
                            }
                        }
                    }
                }
                _ = pump_interval.tick() => {
                    self.pump().await;
                }
                _ = watchdog_interval.tick() => {
                    self.watchdog().await;
                }
            }
        }
        info!("OrderEngine stopped");
    }
}
