//! 리스크 엔진.
//!
//! 동기 `risk_check` RPC를 서비스하고, 버스 이벤트로 일일 상태
//! (실현 손익, 주문 수, 연속 손실, 포지션 뷰)를 유지하며, 자동
//! 손절/익절 모니터와 비상 정지 조건을 구동합니다.
//!
//! 포지션 정본은 주문 엔진이 소유합니다. 리스크 엔진은
//! `position_updated` 이벤트로 읽기 전용 뷰만 유지합니다.

use crate::context::RiskContext;
use crate::emergency::EmergencyStop;
use crate::rules::{evaluate_chain, RuleOutcome};
use crate::stop_loss::{StopLossConfig, StopLossMonitor};
use chrono::{DateTime, Datelike, Utc};
use kquant_bus::{
    Delivery, Envelope, EventBus, Payload, RiskCheckServer, RiskDecision, Topic,
};
use kquant_core::{MarketTick, Position, RiskLimitsConfig, Symbol};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 일일/월간 롤링 상태.
struct RiskState {
    cash: Decimal,
    positions: HashMap<Symbol, Position>,
    /// 종목별 직전 누적 실현 손익 (델타 계산용)
    last_realized: HashMap<Symbol, Decimal>,
    realized_pnl_today: Decimal,
    realized_pnl_month: Decimal,
    orders_today: u32,
    consecutive_losses: u32,
    open_order_notional: Decimal,
    current_day: DateTime<Utc>,
}

/// 리스크 엔진.
pub struct RiskEngine {
    bus: Arc<EventBus>,
    limits: RiskLimitsConfig,
    emergency: Arc<EmergencyStop>,
    stop_monitor: StopLossMonitor,
    sector_map: HashMap<Symbol, String>,
    state: RiskState,
}

impl RiskEngine {
    /// 새 리스크 엔진을 생성합니다.
    pub fn new(
        bus: Arc<EventBus>,
        limits: RiskLimitsConfig,
        emergency: Arc<EmergencyStop>,
        stop_config: StopLossConfig,
        initial_cash: Decimal,
        sector_map: HashMap<Symbol, String>,
    ) -> Self {
        Self {
            bus,
            limits,
            emergency,
            stop_monitor: StopLossMonitor::new(stop_config),
            sector_map,
            state: RiskState {
                cash: initial_cash,
                positions: HashMap::new(),
                last_realized: HashMap::new(),
                realized_pnl_today: Decimal::ZERO,
                realized_pnl_month: Decimal::ZERO,
                orders_today: 0,
                consecutive_losses: 0,
                open_order_notional: Decimal::ZERO,
                current_day: Utc::now(),
            },
        }
    }

    /// 현재 판정 컨텍스트를 구성합니다.
    pub fn context(&self) -> RiskContext {
        RiskContext {
            cash: self.state.cash,
            realized_pnl_today: self.state.realized_pnl_today,
            realized_pnl_month: self.state.realized_pnl_month,
            open_order_notional: self.state.open_order_notional,
            positions: self.state.positions.clone(),
            orders_today: self.state.orders_today,
            consecutive_losses: self.state.consecutive_losses,
            emergency_armed: self.emergency.is_armed(),
            sector_map: self.sector_map.clone(),
        }
    }

    /// risk_check 요청 하나를 판정합니다.
    pub fn decide(&mut self, order: &kquant_core::Order, mark_price: Decimal) -> RiskDecision {
        self.rollover(Utc::now());

        if mark_price <= Decimal::ZERO {
            return RiskDecision::reject("context_unavailable");
        }

        let ctx = self.context();
        match evaluate_chain(order, mark_price, &ctx, &self.limits) {
            RuleOutcome::Approve => RiskDecision::Approve,
            RuleOutcome::Adjust { quantity, reason } => RiskDecision::Adjust {
                adjusted_quantity: quantity,
                reasons: vec![reason],
            },
            RuleOutcome::Reject { reason } => RiskDecision::Reject {
                reasons: vec![reason],
            },
        }
    }

    /// 포지션 이벤트를 반영합니다.
    pub fn on_position_updated(&mut self, position: Position) {
        let symbol = position.symbol.clone();

        // 누적 실현 손익 델타로 일일/월간 손익과 연속 손실 갱신
        let last = self
            .state
            .last_realized
            .get(&symbol)
            .copied()
            .unwrap_or(Decimal::ZERO);
        let delta = position.realized_pnl - last;
        if !delta.is_zero() {
            self.state.realized_pnl_today += delta;
            self.state.realized_pnl_month += delta;
            if delta < Decimal::ZERO {
                self.state.consecutive_losses += 1;
            } else {
                self.state.consecutive_losses = 0;
            }
            self.check_loss_conditions();
        }
        self.state.last_realized.insert(symbol.clone(), position.realized_pnl);

        if !position.is_open() {
            self.stop_monitor.on_position_closed(&symbol);
        }
        self.state.positions.insert(symbol, position);
    }

    /// 주문 생명주기 이벤트를 반영합니다.
    pub fn on_order_event(&mut self, topic: Topic, order: &kquant_core::Order) {
        match topic {
            Topic::OrderPlaced => {
                self.state.orders_today += 1;
                let reference = self.reference_price(&order.symbol);
                self.state.open_order_notional += order.notional(reference);
            }
            Topic::OrderFullyExecuted
            | Topic::OrderFailed
            | Topic::OrderCancelled => {
                // 미체결 명목에서 제거하고 현금 반영
                let reference = self.reference_price(&order.symbol);
                let filled_notional =
                    order.avg_fill_price.unwrap_or(Decimal::ZERO) * order.filled_qty;
                self.state.open_order_notional =
                    (self.state.open_order_notional - order.notional(reference))
                        .max(Decimal::ZERO);

                if topic == Topic::OrderFullyExecuted {
                    match order.side {
                        kquant_core::Side::Buy => {
                            self.state.cash -= filled_notional + order.commission_paid;
                        }
                        kquant_core::Side::Sell => {
                            self.state.cash += filled_notional - order.commission_paid;
                        }
                    }
                }
            }
            _ => {}
        }
    }

    /// 시장가 주문의 명목 금액 계산에 쓰는 기준가.
    ///
    /// 포지션의 최근 평가 가격을 사용하고, 포지션이 없으면 0입니다.
    /// `avg_fill_price`는 체결 전에는 비어 있으므로 쓰지 않습니다.
    fn reference_price(&self, symbol: &Symbol) -> Decimal {
        self.state
            .positions
            .get(symbol)
            .map(|p| p.last_mark_price)
            .unwrap_or_default()
    }

    /// 시세 틱을 손절/익절 모니터에 전달합니다.
    pub fn on_market_tick(&mut self, tick: &MarketTick) {
        let Some(position) = self.state.positions.get(&tick.symbol).cloned() else {
            return;
        };

        // 최신가로 평가한 포지션 뷰로 판정
        let mut marked = position;
        marked.mark(tick.close);

        if let Some(signal) = self.stop_monitor.evaluate(&marked, tick.close) {
            info!(symbol = %tick.symbol, reason = %signal.reason, "Stop monitor triggered");
            let _ = self.bus.publish(Envelope::new(
                Topic::TradingSignal,
                "risk_engine",
                Payload::Signal(signal),
            ));
        }
    }

    /// 일일/월간 손실 한도 및 연속 손실 조건으로 비상 정지를 발동합니다.
    fn check_loss_conditions(&self) {
        if self.state.realized_pnl_today <= -self.limits.max_daily_loss {
            self.emergency.arm(format!(
                "daily loss {} exceeded limit {}",
                self.state.realized_pnl_today, self.limits.max_daily_loss
            ));
        }
        if self.state.consecutive_losses >= self.limits.max_consecutive_losses {
            self.emergency.arm(format!(
                "{} consecutive losing trades",
                self.state.consecutive_losses
            ));
        }
    }

    /// 날짜가 바뀌면 일일 카운터를, 달이 바뀌면 월간 손익을 초기화합니다.
    fn rollover(&mut self, now: DateTime<Utc>) {
        if now.date_naive() != self.state.current_day.date_naive() {
            debug!("Daily risk counters reset");
            self.state.realized_pnl_today = Decimal::ZERO;
            self.state.orders_today = 0;
            if now.month() != self.state.current_day.month()
                || now.year() != self.state.current_day.year()
            {
                self.state.realized_pnl_month = Decimal::ZERO;
            }
            self.state.current_day = now;
        }
    }

    /// 엔진 구동 루프.
    ///
    /// RPC 서버와 버스 구독(포지션, 주문 생명주기, 시세)을 동시에
    /// 처리합니다. 판정은 유한 시간 안에 완료되며, 응답 실패는
    /// 호출자 타임아웃으로 거부 처리됩니다.
    pub async fn run(mut self, mut server: RiskCheckServer, shutdown: CancellationToken) {
        info!("RiskEngine started");
        let _ = self.bus.publish(Envelope::new(
            Topic::SystemStatus,
            "risk_engine",
            Payload::SystemStatus {
                component: "risk_engine".to_string(),
                status: "started".to_string(),
                detail: None,
            },
        ));

        let mut position_sub = self.bus.subscribe(Topic::PositionUpdated);
        let mut placed_sub = self.bus.subscribe(Topic::OrderPlaced);
        let mut executed_sub = self.bus.subscribe(Topic::OrderFullyExecuted);
        let mut tick_sub = self.bus.subscribe(Topic::MarketDataReceived);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                request = server.next() => {
                    match request {
                        Some((request, reply)) => {
                            let decision = self.decide(&request.order, request.mark_price);
                            debug!(
                                correlation_id = %request.correlation_id,
                                symbol = %request.order.symbol,
                                ?decision,
                                "risk_check decided"
                            );
                            if reply.send(decision).is_err() {
                                warn!("risk_check reply dropped (caller timed out)");
                            }
                        }
                        None => break,
                    }
                }
                delivery = position_sub.recv() => {
                    if let Some(Delivery::Event(envelope)) = delivery {
                        if let Payload::Position(position) = envelope.payload {
                            self.on_position_updated(position);
                        }
                    }
                }
                delivery = placed_sub.recv() => {
                    if let Some(Delivery::Event(envelope)) = delivery {
                        if let Payload::Order { order, .. } = envelope.payload {
                            self.on_order_event(Topic::OrderPlaced, &order);
                        }
                    }
                }
                delivery = executed_sub.recv() => {
                    if let Some(Delivery::Event(envelope)) = delivery {
                        if let Payload::Order { order, .. } = envelope.payload {
                            self.on_order_event(Topic::OrderFullyExecuted, &order);
                        }
                    }
                }
                delivery = tick_sub.recv() => {
                    if let Some(Delivery::Event(envelope)) = delivery {
                        if let Payload::MarketTick(tick) = envelope.payload {
                            self.on_market_tick(&tick);
                        }
                    }
                }
            }
        }

        let _ = self.bus.publish(Envelope::new(
            Topic::SystemStatus,
            "risk_engine",
            Payload::SystemStatus {
                component: "risk_engine".to_string(),
                status: "stopped".to_string(),
                detail: None,
            },
        ));
        info!("RiskEngine stopped");
    }
}
