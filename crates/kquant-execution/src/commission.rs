//! 한국 주식 수수료/세금 계산.
//!
//! 체결 명목 금액 `N = price × qty`에 대해:
//! - 위탁수수료: `max(N × brokerage_rate, min_brokerage_fee)`
//! - 거래소수수료: `N × exchange_rate`
//! - 청산결제수수료: `N × clearing_rate`
//! - 매도 시에만: 증권거래세 `N × tx_tax_rate`, 농어촌특별세 `N × rural_tax_rate`
//!
//! 합계는 뱅커스 라운딩으로 원 단위 반올림합니다.

use kquant_core::{CommissionConfig, Price, Quantity, Side};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

/// 수수료 상세 내역.
#[derive(Debug, Clone, Serialize)]
pub struct CommissionBreakdown {
    /// 위탁수수료
    pub brokerage: Decimal,
    /// 거래소수수료
    pub exchange: Decimal,
    /// 청산결제수수료
    pub clearing: Decimal,
    /// 증권거래세 (매도 시)
    pub tx_tax: Decimal,
    /// 농어촌특별세 (매도 시)
    pub rural_tax: Decimal,
    /// 합계 (원 단위 뱅커스 라운딩)
    pub total: Decimal,
}

/// 수수료 계산기.
#[derive(Debug, Clone)]
pub struct CommissionCalculator {
    config: CommissionConfig,
}

impl CommissionCalculator {
    /// 새 계산기를 생성합니다.
    pub fn new(config: CommissionConfig) -> Self {
        Self { config }
    }

    /// 체결 한 건의 수수료를 계산합니다.
    pub fn calculate(&self, side: Side, price: Price, qty: Quantity) -> CommissionBreakdown {
        let notional = price * qty;

        let brokerage = (notional * self.config.brokerage_rate).max(self.config.min_brokerage_fee);
        let exchange = notional * self.config.exchange_rate;
        let clearing = notional * self.config.clearing_rate;

        let (tx_tax, rural_tax) = match side {
            Side::Sell => (
                notional * self.config.tx_tax_rate,
                notional * self.config.rural_tax_rate,
            ),
            Side::Buy => (Decimal::ZERO, Decimal::ZERO),
        };

        let total = (brokerage + exchange + clearing + tx_tax + rural_tax)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);

        CommissionBreakdown {
            brokerage,
            exchange,
            clearing,
            tx_tax,
            rural_tax,
            total,
        }
    }

    /// 합계만 반환합니다.
    pub fn total(&self, side: Side, price: Price, qty: Quantity) -> Decimal {
        self.calculate(side, price, qty).total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn calculator() -> CommissionCalculator {
        CommissionCalculator::new(CommissionConfig::default())
    }

    #[test]
    fn test_buy_commission_formula() {
        // N = 75,100 × 13 = 976,300
        let breakdown = calculator().calculate(Side::Buy, dec!(75100), dec!(13));

        // 위탁 976,300 × 0.00015 = 146.445 (최소 100 이상)
        assert_eq!(breakdown.brokerage, dec!(146.44500));
        // 매수에는 세금 없음
        assert_eq!(breakdown.tx_tax, Decimal::ZERO);
        assert_eq!(breakdown.rural_tax, Decimal::ZERO);

        // 합계 = 146.445 + 7.8104 + 15.035 ≈ 169.29 → 169
        assert_eq!(breakdown.total, dec!(169));
    }

    #[test]
    fn test_sell_includes_taxes() {
        let breakdown = calculator().calculate(Side::Sell, dec!(75100), dec!(13));

        // 거래세 976,300 × 0.0023 = 2245.49
        assert_eq!(breakdown.tx_tax, dec!(2245.4900));
        // 농특세 = 거래세의 20% = 976,300 × 0.00046
        assert_eq!(breakdown.rural_tax, dec!(449.09800));

        // 합계 = 169.29 + 2245.49 + 449.098 ≈ 2863.88 → 2864
        assert_eq!(breakdown.total, dec!(2864));
    }

    #[test]
    fn test_min_brokerage_fee_applies() {
        // N = 10,000 → 위탁 1.5원 < 최소 100원
        let breakdown = calculator().calculate(Side::Buy, dec!(10000), dec!(1));
        assert_eq!(breakdown.brokerage, dec!(100));
    }

    #[test]
    fn test_bankers_rounding_to_won() {
        // 합계가 정확히 .5가 되도록 구성한 요율
        let config = CommissionConfig {
            brokerage_rate: Decimal::ZERO,
            min_brokerage_fee: dec!(100.5),
            exchange_rate: Decimal::ZERO,
            clearing_rate: Decimal::ZERO,
            tx_tax_rate: Decimal::ZERO,
            rural_tax_rate: Decimal::ZERO,
        };
        let calculator = CommissionCalculator::new(config);

        // 100.5 → 짝수인 100으로 (뱅커스)
        assert_eq!(calculator.total(Side::Buy, dec!(1000), dec!(1)), dec!(100));

        let config2 = CommissionConfig {
            min_brokerage_fee: dec!(101.5),
            brokerage_rate: Decimal::ZERO,
            exchange_rate: Decimal::ZERO,
            clearing_rate: Decimal::ZERO,
            tx_tax_rate: Decimal::ZERO,
            rural_tax_rate: Decimal::ZERO,
        };
        // 101.5 → 짝수인 102로
        assert_eq!(
            CommissionCalculator::new(config2).total(Side::Buy, dec!(1000), dec!(1)),
            dec!(102)
        );
    }

    #[test]
    fn test_commission_within_one_won_of_formula() {
        let calculator = calculator();
        let config = CommissionConfig::default();

        for (price, qty) in [(dec!(75000), dec!(10)), (dec!(123456), dec!(7)), (dec!(501), dec!(333))] {
            let n = price * qty;
            let expected = (n * config.brokerage_rate).max(config.min_brokerage_fee)
                + n * config.exchange_rate
                + n * config.clearing_rate
                + n * config.tx_tax_rate
                + n * config.rural_tax_rate;
            let actual = calculator.total(Side::Sell, price, qty);
            assert!((actual - expected).abs() <= Decimal::ONE, "price={} qty={}", price, qty);
        }
    }
}
