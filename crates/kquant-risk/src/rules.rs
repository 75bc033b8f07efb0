//! 리스크 규칙 체인.
//!
//! 규칙은 아래 고정 순서로 평가되며, 처음으로 승인 이외의 결과를 낸
//! 규칙이 최종 판정을 결정합니다. 규칙이 안전하다고 선언한 경우에만
//! 거부 대신 수량 하향 조정이 허용됩니다. 규칙 평가는 절대 panic하지
//! 않으며 태그된 결과를 반환합니다.
//!
//! 경계 규약: 포지션 비율 상한은 포함(≤), 손실 한도는 음수 한도보다
//! 엄격히 커야(>) 통과입니다.

use crate::context::RiskContext;
use kquant_core::{Order, Price, RiskLimitsConfig, Side};
use rust_decimal::Decimal;

/// 규칙 하나의 평가 결과.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    /// 통과
    Approve,
    /// 수량 하향 조정 후 통과
    Adjust {
        /// 조정 수량
        quantity: Decimal,
        /// 사유
        reason: String,
    },
    /// 거부
    Reject {
        /// 사유
        reason: String,
    },
}

/// 규칙 체인을 순서대로 평가합니다.
///
/// 조정이 일어나면 후속 규칙은 조정된 수량으로 평가됩니다.
pub fn evaluate_chain(
    order: &Order,
    mark_price: Price,
    ctx: &RiskContext,
    limits: &RiskLimitsConfig,
) -> RuleOutcome {
    let mut quantity = order.quantity;
    let mut adjust_reasons: Vec<String> = Vec::new();

    let rules: [(&str, RuleFn); 10] = [
        ("position_size", position_size),
        ("sector_exposure", sector_exposure),
        ("daily_loss", daily_loss),
        ("monthly_loss", monthly_loss),
        ("cash_reserve", cash_reserve),
        ("trade_frequency", trade_frequency),
        ("consecutive_loss", consecutive_loss),
        ("total_exposure", total_exposure),
        ("order_value_bounds", order_value_bounds),
        ("emergency_stop", emergency_stop),
    ];

    for (_name, rule) in rules {
        match rule(order, quantity, mark_price, ctx, limits) {
            RuleOutcome::Approve => {}
            RuleOutcome::Adjust { quantity: q, reason } => {
                quantity = q;
                adjust_reasons.push(reason);
            }
            reject @ RuleOutcome::Reject { .. } => return reject,
        }
    }

    if quantity != order.quantity {
        RuleOutcome::Adjust {
            quantity,
            reason: adjust_reasons.join(", "),
        }
    } else {
        RuleOutcome::Approve
    }
}

type RuleFn = fn(&Order, Decimal, Price, &RiskContext, &RiskLimitsConfig) -> RuleOutcome;

fn order_price(order: &Order, mark_price: Price) -> Price {
    order.price.unwrap_or(mark_price)
}

/// 규칙 1: 종목당 포지션 비율 (상한 포함 ≤). 위반 시 수량 하향 조정,
/// 조정 결과가 1주 미만이면 거부.
fn position_size(
    order: &Order,
    quantity: Decimal,
    mark_price: Price,
    ctx: &RiskContext,
    limits: &RiskLimitsConfig,
) -> RuleOutcome {
    if order.side == Side::Sell {
        return RuleOutcome::Approve;
    }

    let price = order_price(order, mark_price);
    let portfolio = ctx.portfolio_value();
    if portfolio <= Decimal::ZERO || price <= Decimal::ZERO {
        return RuleOutcome::Reject {
            reason: "context_unavailable".to_string(),
        };
    }

    let existing = ctx.position_notional(&order.symbol);
    let new_notional = existing + price * quantity;
    if new_notional / portfolio <= limits.max_position_ratio {
        return RuleOutcome::Approve;
    }

    // 상한까지 허용되는 수량으로 하향 조정
    let allowed_notional = limits.max_position_ratio * portfolio - existing;
    let adjusted = (allowed_notional / price).floor();
    if adjusted < Decimal::ONE {
        RuleOutcome::Reject {
            reason: "position_size_limit".to_string(),
        }
    } else {
        RuleOutcome::Adjust {
            quantity: adjusted,
            reason: "position_size_limit".to_string(),
        }
    }
}

/// 규칙 2: 섹터 노출 비율.
fn sector_exposure(
    order: &Order,
    quantity: Decimal,
    mark_price: Price,
    ctx: &RiskContext,
    limits: &RiskLimitsConfig,
) -> RuleOutcome {
    if order.side == Side::Sell {
        return RuleOutcome::Approve;
    }

    let portfolio = ctx.portfolio_value();
    if portfolio <= Decimal::ZERO {
        return RuleOutcome::Reject {
            reason: "context_unavailable".to_string(),
        };
    }

    let price = order_price(order, mark_price);
    let sector_total = ctx.sector_notional(&order.symbol) + price * quantity;
    if sector_total / portfolio <= limits.max_sector_ratio {
        RuleOutcome::Approve
    } else {
        RuleOutcome::Reject {
            reason: "sector_exposure_limit".to_string(),
        }
    }
}

/// 규칙 3: 일일 손실 한도 (엄격히 초과해야 통과).
fn daily_loss(
    _order: &Order,
    _quantity: Decimal,
    _mark_price: Price,
    ctx: &RiskContext,
    limits: &RiskLimitsConfig,
) -> RuleOutcome {
    if ctx.realized_pnl_today > -limits.max_daily_loss {
        RuleOutcome::Approve
    } else {
        RuleOutcome::Reject {
            reason: "daily_loss_limit".to_string(),
        }
    }
}

/// 규칙 4: 월간 손실 한도.
fn monthly_loss(
    _order: &Order,
    _quantity: Decimal,
    _mark_price: Price,
    ctx: &RiskContext,
    limits: &RiskLimitsConfig,
) -> RuleOutcome {
    if ctx.realized_pnl_month > -limits.max_monthly_loss {
        RuleOutcome::Approve
    } else {
        RuleOutcome::Reject {
            reason: "monthly_loss_limit".to_string(),
        }
    }
}

/// 규칙 5: 현금 예비율. 위반 시 하향 조정, 불가하면 거부.
fn cash_reserve(
    order: &Order,
    quantity: Decimal,
    mark_price: Price,
    ctx: &RiskContext,
    limits: &RiskLimitsConfig,
) -> RuleOutcome {
    if order.side == Side::Sell {
        return RuleOutcome::Approve;
    }

    let price = order_price(order, mark_price);
    let portfolio = ctx.portfolio_value();
    let required_reserve = limits.min_cash_reserve_ratio * portfolio;
    let notional = price * quantity;

    if ctx.cash - notional >= required_reserve {
        return RuleOutcome::Approve;
    }

    let available = ctx.cash - required_reserve;
    let adjusted = if price > Decimal::ZERO {
        (available / price).floor()
    } else {
        Decimal::ZERO
    };
    if adjusted < Decimal::ONE {
        RuleOutcome::Reject {
            reason: "cash_reserve".to_string(),
        }
    } else {
        RuleOutcome::Adjust {
            quantity: adjusted,
            reason: "cash_reserve".to_string(),
        }
    }
}

/// 규칙 6: 일일 거래 횟수.
fn trade_frequency(
    _order: &Order,
    _quantity: Decimal,
    _mark_price: Price,
    ctx: &RiskContext,
    limits: &RiskLimitsConfig,
) -> RuleOutcome {
    if ctx.orders_today < limits.max_orders_per_day {
        RuleOutcome::Approve
    } else {
        RuleOutcome::Reject {
            reason: "trade_frequency_limit".to_string(),
        }
    }
}

/// 규칙 7: 연속 손실 횟수.
fn consecutive_loss(
    _order: &Order,
    _quantity: Decimal,
    _mark_price: Price,
    ctx: &RiskContext,
    limits: &RiskLimitsConfig,
) -> RuleOutcome {
    if ctx.consecutive_losses < limits.max_consecutive_losses {
        RuleOutcome::Approve
    } else {
        RuleOutcome::Reject {
            reason: "consecutive_loss_limit".to_string(),
        }
    }
}

/// 규칙 8: 총 노출 비율.
fn total_exposure(
    order: &Order,
    quantity: Decimal,
    mark_price: Price,
    ctx: &RiskContext,
    limits: &RiskLimitsConfig,
) -> RuleOutcome {
    if order.side == Side::Sell {
        return RuleOutcome::Approve;
    }

    let portfolio = ctx.portfolio_value();
    if portfolio <= Decimal::ZERO {
        return RuleOutcome::Reject {
            reason: "context_unavailable".to_string(),
        };
    }

    let price = order_price(order, mark_price);
    let exposure = ctx.gross_exposure() + price * quantity;
    if exposure / portfolio <= limits.max_total_exposure {
        RuleOutcome::Approve
    } else {
        RuleOutcome::Reject {
            reason: "total_exposure_limit".to_string(),
        }
    }
}

/// 규칙 9: 주문 금액 범위 (양끝 포함).
fn order_value_bounds(
    order: &Order,
    quantity: Decimal,
    mark_price: Price,
    _ctx: &RiskContext,
    limits: &RiskLimitsConfig,
) -> RuleOutcome {
    let notional = order_price(order, mark_price) * quantity;
    if notional < limits.min_order_value || notional > limits.max_order_value {
        RuleOutcome::Reject {
            reason: "order_value_bounds".to_string(),
        }
    } else {
        RuleOutcome::Approve
    }
}

/// 규칙 10: 비상 정지.
fn emergency_stop(
    _order: &Order,
    _quantity: Decimal,
    _mark_price: Price,
    ctx: &RiskContext,
    _limits: &RiskLimitsConfig,
) -> RuleOutcome {
    if ctx.emergency_armed {
        RuleOutcome::Reject {
            reason: "emergency_stop".to_string(),
        }
    } else {
        RuleOutcome::Approve
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kquant_core::Symbol;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn symbol() -> Symbol {
        Symbol::canonicalize("005930").unwrap()
    }

    fn ctx() -> RiskContext {
        RiskContext {
            cash: dec!(10_000_000),
            realized_pnl_today: Decimal::ZERO,
            realized_pnl_month: Decimal::ZERO,
            open_order_notional: Decimal::ZERO,
            positions: HashMap::new(),
            orders_today: 0,
            consecutive_losses: 0,
            emergency_armed: false,
            sector_map: HashMap::new(),
        }
    }

    fn limits() -> RiskLimitsConfig {
        RiskLimitsConfig::default()
    }

    fn buy(qty: Decimal, price: Decimal) -> Order {
        Order::limit(symbol(), Side::Buy, qty, price, "ma_1m5m")
    }

    #[test]
    fn test_approve_within_all_limits() {
        // 750,000 = 포트폴리오의 7.5%, 한도 10% → 승인
        let order = buy(dec!(10), dec!(75000));
        let outcome = evaluate_chain(&order, dec!(75000), &ctx(), &limits());
        assert_eq!(outcome, RuleOutcome::Approve);
    }

    #[test]
    fn test_position_size_adjusts_to_cap() {
        // 시나리오 4: 한도 5%, 포트폴리오 10,000,000 → 상한 500,000
        // 75,000 × 10 = 750,000 → 6주(450,000)로 조정
        let mut limits = limits();
        limits.max_position_ratio = dec!(0.05);

        let order = buy(dec!(10), dec!(75000));
        match evaluate_chain(&order, dec!(75000), &ctx(), &limits) {
            RuleOutcome::Adjust { quantity, reason } => {
                assert_eq!(quantity, dec!(6));
                assert!(reason.contains("position_size_limit"));
            }
            other => panic!("expected adjust, got {:?}", other),
        }
    }

    #[test]
    fn test_position_size_cap_is_inclusive() {
        // 정확히 10% = 1,000,000 → 포함 경계이므로 승인
        let mut context = ctx();
        context.cash = dec!(10_000_000);
        let mut limits = limits();
        limits.max_position_ratio = dec!(0.10);
        limits.max_order_value = dec!(1_000_000);

        let order = buy(dec!(10), dec!(100000));
        let outcome = evaluate_chain(&order, dec!(100000), &context, &limits);
        assert_eq!(outcome, RuleOutcome::Approve);
    }

    #[test]
    fn test_position_size_rejects_when_adjusted_below_one() {
        let mut context = ctx();
        context.cash = dec!(100_000);
        let mut limits = limits();
        limits.max_position_ratio = dec!(0.05);
        // 상한 5,000원 미만으로는 1주(75,000)도 못 삼 → 거부

        let order = buy(dec!(1), dec!(75000));
        match evaluate_chain(&order, dec!(75000), &context, &limits) {
            RuleOutcome::Reject { reason } => assert_eq!(reason, "position_size_limit"),
            other => panic!("expected reject, got {:?}", other),
        }
    }

    #[test]
    fn test_daily_loss_boundary_is_strict() {
        let mut context = ctx();
        let limits = limits(); // max_daily_loss = 500,000

        // 정확히 한도면 거부 (엄격히 커야 통과)
        context.realized_pnl_today = dec!(-500_000);
        let order = buy(dec!(2), dec!(75000));
        match evaluate_chain(&order, dec!(75000), &context, &limits) {
            RuleOutcome::Reject { reason } => assert_eq!(reason, "daily_loss_limit"),
            other => panic!("expected reject, got {:?}", other),
        }

        // 한도 1원 직전이면 통과
        context.realized_pnl_today = dec!(-499_999);
        assert_eq!(
            evaluate_chain(&order, dec!(75000), &context, &limits),
            RuleOutcome::Approve
        );
    }

    #[test]
    fn test_daily_loss_scenario_rejects_past_limit() {
        // 시나리오 3: realized_pnl_today = −500,001 → daily_loss_limit 거부
        let mut context = ctx();
        context.realized_pnl_today = dec!(-500_001);

        let order = buy(dec!(2), dec!(75000));
        match evaluate_chain(&order, dec!(75000), &context, &limits()) {
            RuleOutcome::Reject { reason } => assert_eq!(reason, "daily_loss_limit"),
            other => panic!("expected reject, got {:?}", other),
        }
    }

    #[test]
    fn test_trade_frequency_limit() {
        let mut context = ctx();
        context.orders_today = 20;

        let order = buy(dec!(2), dec!(75000));
        match evaluate_chain(&order, dec!(75000), &context, &limits()) {
            RuleOutcome::Reject { reason } => assert_eq!(reason, "trade_frequency_limit"),
            other => panic!("expected reject, got {:?}", other),
        }
    }

    #[test]
    fn test_order_value_bounds() {
        // 최소 미만
        let order = buy(dec!(1), dec!(5000));
        match evaluate_chain(&order, dec!(5000), &ctx(), &limits()) {
            RuleOutcome::Reject { reason } => assert_eq!(reason, "order_value_bounds"),
            other => panic!("expected reject, got {:?}", other),
        }
    }

    #[test]
    fn test_emergency_stop_rejects_all() {
        let mut context = ctx();
        context.emergency_armed = true;

        let order = buy(dec!(2), dec!(75000));
        match evaluate_chain(&order, dec!(75000), &context, &limits()) {
            RuleOutcome::Reject { reason } => assert_eq!(reason, "emergency_stop"),
            other => panic!("expected reject, got {:?}", other),
        }
    }

    #[test]
    fn test_sell_passes_exposure_rules() {
        let mut context = ctx();
        let mut position = kquant_core::Position::empty(symbol());
        position.apply_buy(dec!(100), dec!(75000), Decimal::ZERO);
        context.positions.insert(symbol(), position);

        // 노출 규칙은 매도에 적용되지 않음
        let order = Order::market(symbol(), Side::Sell, dec!(100), "ma_1m5m").as_liquidation();
        let outcome = evaluate_chain(&order, dec!(75000), &context, &limits());
        // 7,500,000 노출이지만 매도이므로 금액 범위만 본다 → 최대 금액 초과
        match outcome {
            RuleOutcome::Reject { reason } => assert_eq!(reason, "order_value_bounds"),
            other => panic!("expected order_value_bounds, got {:?}", other),
        }
    }
}
