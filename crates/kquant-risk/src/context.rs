//! 리스크 판정 컨텍스트.
//!
//! 판정마다 포지션, 당일 실현 손익, 미체결 주문 금액, 설정 한도에서
//! 파생됩니다. 필요한 데이터가 없으면 판정은 `context_unavailable`
//! 사유의 거부입니다.

use kquant_core::{Position, Price, Symbol};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// 리스크 판정 입력 컨텍스트.
#[derive(Debug, Clone)]
pub struct RiskContext {
    /// 현금 잔고
    pub cash: Decimal,
    /// 당일 실현 손익
    pub realized_pnl_today: Decimal,
    /// 당월 실현 손익
    pub realized_pnl_month: Decimal,
    /// 미체결 주문 명목 금액
    pub open_order_notional: Decimal,
    /// 현재 포지션 (종목별)
    pub positions: HashMap<Symbol, Position>,
    /// 당일 주문 수
    pub orders_today: u32,
    /// 연속 손실 거래 수
    pub consecutive_losses: u32,
    /// 비상 정지 발동 여부
    pub emergency_armed: bool,
    /// 종목 → 섹터 매핑
    pub sector_map: HashMap<Symbol, String>,
}

impl RiskContext {
    /// 포트폴리오 총 가치 (현금 + 포지션 평가액).
    pub fn portfolio_value(&self) -> Decimal {
        self.cash + self.total_position_notional()
    }

    /// 포지션 평가액 합계.
    pub fn total_position_notional(&self) -> Decimal {
        self.positions.values().map(|p| p.notional()).sum()
    }

    /// 특정 종목의 현재 평가액.
    pub fn position_notional(&self, symbol: &Symbol) -> Decimal {
        self.positions
            .get(symbol)
            .map(|p| p.notional())
            .unwrap_or(Decimal::ZERO)
    }

    /// 특정 종목의 보유 수량.
    pub fn position_qty(&self, symbol: &Symbol) -> Decimal {
        self.positions
            .get(symbol)
            .map(|p| p.qty)
            .unwrap_or(Decimal::ZERO)
    }

    /// 해당 종목과 같은 섹터의 평가액 합계.
    pub fn sector_notional(&self, symbol: &Symbol) -> Decimal {
        let Some(sector) = self.sector_map.get(symbol) else {
            return self.position_notional(symbol);
        };
        self.positions
            .iter()
            .filter(|(s, _)| self.sector_map.get(*s) == Some(sector))
            .map(|(_, p)| p.notional())
            .sum()
    }

    /// 총 노출 (포지션 + 미체결 주문).
    pub fn gross_exposure(&self) -> Decimal {
        self.total_position_notional() + self.open_order_notional
    }

    /// 종목의 평가 기준가를 반환합니다.
    pub fn mark_price(&self, symbol: &Symbol) -> Option<Price> {
        self.positions.get(symbol).map(|p| p.last_mark_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn symbol(code: &str) -> Symbol {
        Symbol::canonicalize(code).unwrap()
    }

    fn position(code: &str, qty: Decimal, price: Decimal) -> (Symbol, Position) {
        let mut p = Position::empty(symbol(code));
        p.apply_buy(qty, price, Decimal::ZERO);
        (symbol(code), p)
    }

    fn context() -> RiskContext {
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

    #[test]
    fn test_portfolio_value() {
        let mut ctx = context();
        let (s, p) = position("005930", dec!(10), dec!(75000));
        ctx.positions.insert(s, p);

        assert_eq!(ctx.total_position_notional(), dec!(750000));
        assert_eq!(ctx.portfolio_value(), dec!(10_750_000));
    }

    #[test]
    fn test_sector_notional_groups_by_sector() {
        let mut ctx = context();
        let (s1, p1) = position("005930", dec!(10), dec!(75000));
        let (s2, p2) = position("000660", dec!(5), dec!(200000));
        let (s3, p3) = position("035720", dec!(20), dec!(50000));
        ctx.positions.insert(s1.clone(), p1);
        ctx.positions.insert(s2.clone(), p2);
        ctx.positions.insert(s3, p3);
        ctx.sector_map.insert(s1.clone(), "semiconductor".to_string());
        ctx.sector_map.insert(s2, "semiconductor".to_string());

        // 반도체 섹터 = 750,000 + 1,000,000
        assert_eq!(ctx.sector_notional(&s1), dec!(1_750_000));
    }
}
