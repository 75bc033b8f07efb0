//! 전략 성과 추적.
//!
//! 전략별로 신호와 후속 체결을 짝지어 보관하고, 조회 시 승률, 총수익,
//! 최대 낙폭, 일별 집계 기반 샤프 지수를 계산합니다. 핫 패스에서는
//! 기록만 하고 파생 지표는 조회 시점에만 계산합니다.

use chrono::{DateTime, NaiveDate, Utc};
use kquant_core::{SignalAction, Symbol, TradingSignal};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// 완결된 거래 기록 (신호 → 체결 → 실현 손익).
#[derive(Debug, Clone, Serialize)]
pub struct TradeRecord {
    /// 발원 신호 ID
    pub signal_id: Uuid,
    /// 종목
    pub symbol: Symbol,
    /// 액션
    pub action: SignalAction,
    /// 신호 시각
    pub signal_ts: DateTime<Utc>,
    /// 체결 가격
    pub fill_price: Option<Decimal>,
    /// 실현 손익 (청산 체결일 때만)
    pub realized_pnl: Option<Decimal>,
}

/// 전략 성과 요약.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyPerformance {
    /// 신호 수
    pub signals: usize,
    /// 체결된 거래 수
    pub filled: usize,
    /// 이긴 청산 수
    pub wins: usize,
    /// 진 청산 수
    pub losses: usize,
    /// 승률 (청산 기준)
    pub win_rate: f64,
    /// 총 실현 손익
    pub total_return: Decimal,
    /// 최대 낙폭 (누적 손익 기준)
    pub max_drawdown: Decimal,
    /// 일별 손익 기반 샤프 지수 (연율화)
    pub sharpe: Option<f64>,
}

/// 전략별 성과 추적기.
#[derive(Default)]
pub struct PerformanceTracker {
    records: HashMap<String, Vec<TradeRecord>>,
    daily_pnl: HashMap<String, BTreeMap<NaiveDate, Decimal>>,
}

impl PerformanceTracker {
    /// 새 추적기를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 신호 발행을 기록합니다.
    pub fn record_signal(&mut self, signal: &TradingSignal) {
        self.records
            .entry(signal.strategy_name.clone())
            .or_default()
            .push(TradeRecord {
                signal_id: signal.id,
                symbol: signal.symbol.clone(),
                action: signal.action,
                signal_ts: signal.ts,
                fill_price: None,
                realized_pnl: None,
            });
    }

    /// 신호에 대응하는 체결을 기록합니다.
    ///
    /// `realized_pnl`은 청산(매도) 체결일 때만 전달합니다.
    pub fn record_fill(
        &mut self,
        strategy_name: &str,
        signal_id: Uuid,
        fill_price: Decimal,
        fill_ts: DateTime<Utc>,
        realized_pnl: Option<Decimal>,
    ) {
        if let Some(records) = self.records.get_mut(strategy_name) {
            if let Some(record) = records.iter_mut().find(|r| r.signal_id == signal_id) {
                record.fill_price = Some(fill_price);
                record.realized_pnl = realized_pnl;
            }
        }
        if let Some(pnl) = realized_pnl {
            *self
                .daily_pnl
                .entry(strategy_name.to_string())
                .or_default()
                .entry(fill_ts.date_naive())
                .or_insert(Decimal::ZERO) += pnl;
        }
    }

    /// 전략 성과를 계산합니다.
    pub fn performance(&self, strategy_name: &str) -> StrategyPerformance {
        let records = self.records.get(strategy_name).cloned().unwrap_or_default();

        let signals = records.len();
        let filled = records.iter().filter(|r| r.fill_price.is_some()).count();

        let closed: Vec<Decimal> = records.iter().filter_map(|r| r.realized_pnl).collect();
        let wins = closed.iter().filter(|p| **p > Decimal::ZERO).count();
        let losses = closed.iter().filter(|p| **p < Decimal::ZERO).count();
        let win_rate = if closed.is_empty() {
            0.0
        } else {
            wins as f64 / closed.len() as f64
        };
        let total_return: Decimal = closed.iter().sum();

        // 누적 손익 곡선에서 최대 낙폭
        let mut peak = Decimal::ZERO;
        let mut cumulative = Decimal::ZERO;
        let mut max_drawdown = Decimal::ZERO;
        for pnl in &closed {
            cumulative += *pnl;
            if cumulative > peak {
                peak = cumulative;
            }
            let drawdown = peak - cumulative;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
            }
        }

        StrategyPerformance {
            signals,
            filled,
            wins,
            losses,
            win_rate,
            total_return,
            max_drawdown,
            sharpe: self.sharpe(strategy_name),
        }
    }

    /// 일별 손익 집계에서 샤프 지수를 계산합니다 (연율화, 252일).
    fn sharpe(&self, strategy_name: &str) -> Option<f64> {
        let daily = self.daily_pnl.get(strategy_name)?;
        if daily.len() < 2 {
            return None;
        }

        let values: Vec<f64> = daily.values().filter_map(|v| v.to_f64()).collect();
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let std = variance.sqrt();
        if std == 0.0 {
            return None;
        }
        Some(mean / std * 252f64.sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn symbol() -> Symbol {
        Symbol::canonicalize("005930").unwrap()
    }

    fn signal(action: SignalAction) -> TradingSignal {
        TradingSignal::new("ma_1m5m", symbol(), action, "test")
    }

    #[test]
    fn test_win_rate_and_total_return() {
        let mut tracker = PerformanceTracker::new();
        let day1 = Utc.with_ymd_and_hms(2025, 3, 4, 6, 0, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2025, 3, 5, 6, 0, 0).unwrap();

        let buy = signal(SignalAction::Buy);
        tracker.record_signal(&buy);
        tracker.record_fill("ma_1m5m", buy.id, dec!(75000), day1, None);

        let sell_win = signal(SignalAction::Sell);
        tracker.record_signal(&sell_win);
        tracker.record_fill("ma_1m5m", sell_win.id, dec!(76000), day1, Some(dec!(10000)));

        let sell_loss = signal(SignalAction::Sell);
        tracker.record_signal(&sell_loss);
        tracker.record_fill("ma_1m5m", sell_loss.id, dec!(74000), day2, Some(dec!(-4000)));

        let perf = tracker.performance("ma_1m5m");
        assert_eq!(perf.signals, 3);
        assert_eq!(perf.filled, 3);
        assert_eq!(perf.wins, 1);
        assert_eq!(perf.losses, 1);
        assert_eq!(perf.win_rate, 0.5);
        assert_eq!(perf.total_return, dec!(6000));
        assert!(perf.sharpe.is_some());
    }

    #[test]
    fn test_max_drawdown() {
        let mut tracker = PerformanceTracker::new();
        let ts = Utc::now();

        // +10000, -15000, +5000 → 고점 10000, 저점 -5000 → 낙폭 15000
        for pnl in [dec!(10000), dec!(-15000), dec!(5000)] {
            let s = signal(SignalAction::Sell);
            tracker.record_signal(&s);
            tracker.record_fill("ma_1m5m", s.id, dec!(75000), ts, Some(pnl));
        }

        let perf = tracker.performance("ma_1m5m");
        assert_eq!(perf.max_drawdown, dec!(15000));
    }

    #[test]
    fn test_unknown_strategy_is_empty() {
        let tracker = PerformanceTracker::new();
        let perf = tracker.performance("nope");
        assert_eq!(perf.signals, 0);
        assert_eq!(perf.win_rate, 0.0);
        assert!(perf.sharpe.is_none());
    }
}
