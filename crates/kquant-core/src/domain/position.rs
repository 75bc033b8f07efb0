//! 포지션 추적.
//!
//! 종목당 하나의 포지션을 유지합니다. 매수 평균단가는 수수료를 포함하고,
//! 매도 시 실현 손익이 누적됩니다. 수량이 0이 되면 평균단가는 초기화됩니다.

use crate::types::{Price, Quantity, Symbol};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 종목당 하나 유지되는 포지션.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// 종목 코드
    pub symbol: Symbol,
    /// 보유 수량 (0 허용, 이력 보존용)
    pub qty: Quantity,
    /// 수수료 포함 평균 매입 단가
    pub avg_cost: Price,
    /// 실현 손익 (수수료 차감)
    pub realized_pnl: Decimal,
    /// 미실현 손익 (최근 시세 기준)
    pub unrealized_pnl: Decimal,
    /// 마지막 평가 가격
    pub last_mark_price: Price,
    /// 진입 이후 최고 평가 가격 (트레일링 스탑 기준)
    pub high_watermark: Price,
    /// 최초 진입 시각
    pub opened_ts: DateTime<Utc>,
    /// 마지막 업데이트 시각
    pub last_updated: DateTime<Utc>,
}

impl Position {
    /// 빈 포지션을 생성합니다.
    pub fn empty(symbol: Symbol) -> Self {
        let now = Utc::now();
        Self {
            symbol,
            qty: Decimal::ZERO,
            avg_cost: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            last_mark_price: Decimal::ZERO,
            high_watermark: Decimal::ZERO,
            opened_ts: now,
            last_updated: now,
        }
    }

    /// 매수 체결을 반영합니다.
    ///
    /// `avg_cost = (old_qty·old_avg + fill_qty·fill_price + commission) / (old_qty + fill_qty)`
    pub fn apply_buy(&mut self, qty: Quantity, price: Price, commission: Decimal) {
        if self.qty.is_zero() {
            self.opened_ts = Utc::now();
            self.high_watermark = price;
        }
        let total_cost = self.avg_cost * self.qty + price * qty + commission;
        self.qty += qty;
        if !self.qty.is_zero() {
            self.avg_cost = total_cost / self.qty;
        }
        self.mark(price);
    }

    /// 매도 체결을 반영하고 실현 손익을 반환합니다.
    ///
    /// `pnl = (fill_price − avg_cost)·fill_qty − commission`.
    /// 평균단가는 수량이 0이 될 때까지 유지되고, 0이 되면 초기화됩니다.
    pub fn apply_sell(&mut self, qty: Quantity, price: Price, commission: Decimal) -> Decimal {
        let sell_qty = qty.min(self.qty);
        let pnl = (price - self.avg_cost) * sell_qty - commission;
        self.qty -= sell_qty;
        self.realized_pnl += pnl;

        if self.qty.is_zero() {
            self.avg_cost = Decimal::ZERO;
            self.high_watermark = Decimal::ZERO;
            self.unrealized_pnl = Decimal::ZERO;
            self.last_mark_price = price;
            self.last_updated = Utc::now();
        } else {
            self.mark(price);
        }
        pnl
    }

    /// 최신 시세로 미실현 손익을 재계산합니다.
    pub fn mark(&mut self, price: Price) {
        self.last_mark_price = price;
        self.unrealized_pnl = (price - self.avg_cost) * self.qty;
        if price > self.high_watermark {
            self.high_watermark = price;
        }
        self.last_updated = Utc::now();
    }

    /// 포지션의 평가 금액을 반환합니다.
    pub fn notional(&self) -> Decimal {
        self.last_mark_price * self.qty
    }

    /// 보유 중인지 확인합니다.
    pub fn is_open(&self) -> bool {
        self.qty > Decimal::ZERO
    }
}
