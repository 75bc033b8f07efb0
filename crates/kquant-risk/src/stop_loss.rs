//! 자동 손절/익절 모니터.
//!
//! `market_data_received`와 `position_updated`를 구독해 보유 포지션마다
//! 다음을 평가합니다:
//! - *고정*: 손절 `entry·(1−stop_pct)`, 익절 `entry·(1+take_pct)`
//! - *트레일링*: 진입 후 최고가에서 오프셋만큼 하락 시 손절
//! - *본전*: 수익이 임계 이상이면 손절선을 진입가로 상향
//!
//! 발동 시 보유 수량 전량의 시장가 매도 신호를
//! `source=risk.stop_loss`로 발행합니다. 이 신호도 다른 신호처럼
//! 동기 리스크 체크를 거칩니다.

use kquant_core::{Position, Price, SignalAction, Symbol, TradingSignal};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

/// 손절/익절 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopLossConfig {
    /// 고정 손절 비율
    pub stop_pct: Decimal,
    /// 고정 익절 비율
    pub take_pct: Decimal,
    /// 트레일링 오프셋 비율
    pub trailing_offset_pct: Decimal,
    /// 트레일링 활성화
    pub enable_trailing: bool,
    /// 본전 스탑 전환 수익 임계 비율
    pub break_even_threshold_pct: Decimal,
    /// 본전 스탑 활성화
    pub enable_break_even: bool,
}

impl Default for StopLossConfig {
    fn default() -> Self {
        Self {
            stop_pct: Decimal::new(3, 2),            // 3%
            take_pct: Decimal::new(5, 2),            // 5%
            trailing_offset_pct: Decimal::new(2, 2), // 2%
            enable_trailing: true,
            break_even_threshold_pct: Decimal::new(2, 2),
            enable_break_even: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct StopState {
    /// 본전 스탑으로 전환됨
    break_even_armed: bool,
}

/// 자동 손절/익절 모니터.
pub struct StopLossMonitor {
    config: StopLossConfig,
    states: HashMap<Symbol, StopState>,
}

impl StopLossMonitor {
    /// 새 모니터를 생성합니다.
    pub fn new(config: StopLossConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
        }
    }

    /// 포지션 청산(수량 0) 시 상태를 정리합니다.
    pub fn on_position_closed(&mut self, symbol: &Symbol) {
        self.states.remove(symbol);
    }

    /// 새 시세로 포지션을 평가하고, 발동 시 청산 신호를 반환합니다.
    pub fn evaluate(&mut self, position: &Position, mark: Price) -> Option<TradingSignal> {
        if !position.is_open() || position.avg_cost.is_zero() {
            return None;
        }

        let entry = position.avg_cost;
        let state = self.states.entry(position.symbol.clone()).or_default();

        // 본전 스탑 전환
        if self.config.enable_break_even && !state.break_even_armed {
            let threshold = entry * (Decimal::ONE + self.config.break_even_threshold_pct);
            if mark >= threshold {
                state.break_even_armed = true;
                info!(symbol = %position.symbol, entry = %entry, "Break-even stop armed");
            }
        }

        // 유효 손절가: 고정/트레일링/본전 중 가장 높은 것
        let mut stop_price = entry * (Decimal::ONE - self.config.stop_pct);
        if self.config.enable_trailing {
            let trailing =
                position.high_watermark * (Decimal::ONE - self.config.trailing_offset_pct);
            stop_price = stop_price.max(trailing);
        }
        let break_even_armed = state.break_even_armed;
        if break_even_armed {
            stop_price = stop_price.max(entry);
        }

        let take_price = entry * (Decimal::ONE + self.config.take_pct);

        if mark <= stop_price {
            let reason = if break_even_armed && stop_price == entry {
                format!("break-even stop at {} (entry {})", stop_price, entry)
            } else {
                format!("stop loss at {} (entry {})", stop_price, entry)
            };
            return Some(self.liquidation_signal(position, reason));
        }

        if mark >= take_price {
            let reason = format!("take profit at {} (entry {})", take_price, entry);
            return Some(self.liquidation_signal(position, reason));
        }

        None
    }

    fn liquidation_signal(&mut self, position: &Position, reason: String) -> TradingSignal {
        self.states.remove(&position.symbol);
        TradingSignal::new(
            "risk.stop_loss",
            position.symbol.clone(),
            SignalAction::Sell,
            reason,
        )
        .with_confidence(1.0)
        .from_risk_monitor()
        .with_metadata("qty", serde_json::json!(position.qty.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kquant_core::SignalOrigin;
    use rust_decimal_macros::dec;

    fn symbol() -> Symbol {
        Symbol::canonicalize("005930").unwrap()
    }

    fn position(entry: Decimal) -> Position {
        let mut p = Position::empty(symbol());
        p.apply_buy(dec!(10), entry, Decimal::ZERO);
        p
    }

    fn monitor() -> StopLossMonitor {
        StopLossMonitor::new(StopLossConfig {
            enable_trailing: false,
            enable_break_even: false,
            ..StopLossConfig::default()
        })
    }

    #[test]
    fn test_fixed_stop_triggers() {
        let mut monitor = monitor();
        let mut p = position(dec!(75000));

        // 손절선 72,750 위에서는 신호 없음
        p.mark(dec!(73000));
        assert!(monitor.evaluate(&p, dec!(73000)).is_none());

        // 손절선 이하 → 리스크 발원 전량 매도 신호
        p.mark(dec!(72750));
        let signal = monitor.evaluate(&p, dec!(72750)).expect("stop signal");
        assert_eq!(signal.action, SignalAction::Sell);
        assert_eq!(signal.origin, SignalOrigin::RiskStopLoss);
        assert_eq!(signal.strategy_name, "risk.stop_loss");
        assert!(signal.is_liquidation());
    }

    #[test]
    fn test_fixed_take_profit_triggers() {
        let mut monitor = monitor();
        let mut p = position(dec!(75000));

        p.mark(dec!(78750)); // +5%
        let signal = monitor.evaluate(&p, dec!(78750)).expect("take profit");
        assert!(signal.reason.contains("take profit"));
    }

    #[test]
    fn test_trailing_stop_follows_high_watermark() {
        let mut monitor = StopLossMonitor::new(StopLossConfig {
            enable_break_even: false,
            ..StopLossConfig::default()
        });
        let mut p = position(dec!(75000));

        // 고점 76,500 형성 (익절선 78,750 미만)
        p.mark(dec!(76500));
        assert!(monitor.evaluate(&p, dec!(76500)).is_none());

        // 고점 대비 2% 하락 74,970 → 트레일링 발동 (고정 손절선 72,750보다 높음)
        p.mark(dec!(74970));
        let signal = monitor.evaluate(&p, dec!(74970)).expect("trailing stop");
        assert!(signal.reason.contains("stop loss"));
    }

    #[test]
    fn test_break_even_stop_moves_to_entry() {
        let mut monitor = StopLossMonitor::new(StopLossConfig {
            enable_trailing: false,
            ..StopLossConfig::default()
        });
        let mut p = position(dec!(75000));

        // +2% 도달 → 본전 스탑 전환
        p.mark(dec!(76500));
        assert!(monitor.evaluate(&p, dec!(76500)).is_none());

        // 진입가까지 되돌림 → 본전 스탑 발동
        p.mark(dec!(75000));
        let signal = monitor.evaluate(&p, dec!(75000)).expect("break-even stop");
        assert!(signal.reason.contains("break-even"));
    }

    #[test]
    fn test_closed_position_ignored() {
        let mut monitor = monitor();
        let mut p = position(dec!(75000));
        p.apply_sell(dec!(10), dec!(70000), Decimal::ZERO);

        assert!(monitor.evaluate(&p, dec!(60000)).is_none());
    }
}
