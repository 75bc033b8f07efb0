//! 포지션 크기 권고.
//!
//! 세 가지 방식을 제공합니다:
//! - 고정 비율: `risk_per_trade = portfolio · r`, 수량 = 리스크 / (진입가 − 손절가)
//! - 변동성 기반: ATR에 반비례하는 수량
//! - Kelly: 승률과 손익비 기반, 상한으로 제한
//!
//! 전략이 요청할 때 사용되며, 스스로 주문을 내지 않습니다.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// 포지션 크기 계산기.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    /// Kelly 비중 상한
    pub kelly_cap: f64,
}

impl Default for PositionSizer {
    fn default() -> Self {
        Self { kelly_cap: 0.2 }
    }
}

impl PositionSizer {
    /// 고정 비율 방식.
    ///
    /// `risk_fraction`은 거래당 감수할 포트폴리오 비율입니다.
    /// 손절 폭이 0 이하이면 0을 반환합니다.
    pub fn fixed_fractional(
        &self,
        portfolio_value: Decimal,
        risk_fraction: Decimal,
        entry_price: Decimal,
        stop_price: Decimal,
    ) -> Decimal {
        let risk_per_share = entry_price - stop_price;
        if risk_per_share <= Decimal::ZERO || portfolio_value <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let risk_budget = portfolio_value * risk_fraction;
        (risk_budget / risk_per_share).floor()
    }

    /// 변동성 기반 방식. 수량은 ATR에 반비례합니다.
    ///
    /// `atr_multiplier`는 손절 폭으로 취급할 ATR 배수입니다.
    pub fn volatility_based(
        &self,
        portfolio_value: Decimal,
        risk_fraction: Decimal,
        entry_price: Decimal,
        atr: Decimal,
        atr_multiplier: Decimal,
    ) -> Decimal {
        let stop_distance = atr * atr_multiplier;
        if stop_distance <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.fixed_fractional(
            portfolio_value,
            risk_fraction,
            entry_price,
            entry_price - stop_distance,
        )
    }

    /// Kelly 비중. `f = W − (1−W)/R`을 [0, cap]으로 제한합니다.
    ///
    /// `win_rate`는 롤링 승률, `payoff_ratio`는 평균이익/평균손실입니다.
    pub fn kelly_fraction(&self, win_rate: f64, payoff_ratio: f64) -> f64 {
        if payoff_ratio <= 0.0 {
            return 0.0;
        }
        let f = win_rate - (1.0 - win_rate) / payoff_ratio;
        f.clamp(0.0, self.kelly_cap)
    }

    /// Kelly 비중으로 수량을 계산합니다.
    pub fn kelly_size(
        &self,
        portfolio_value: Decimal,
        entry_price: Decimal,
        win_rate: f64,
        payoff_ratio: f64,
    ) -> Decimal {
        if entry_price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let fraction = self.kelly_fraction(win_rate, payoff_ratio);
        let budget = portfolio_value.to_f64().unwrap_or(0.0) * fraction;
        let shares = budget / entry_price.to_f64().unwrap_or(1.0);
        Decimal::from(shares.floor() as i64)
    }
}
