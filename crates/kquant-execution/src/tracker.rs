//! 체결 추적.
//!
//! 주문별로 체결 이력, 체결 수량, 규모 가중 평균 체결가를 유지합니다.
//! 부분 체결 정체 감시와 주문당 체결 수 하드 캡을 제공합니다.

use chrono::{DateTime, Duration, Utc};
use kquant_core::{Fill, Price, Quantity};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

/// 추적 에러.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackerError {
    /// 체결 합이 주문 수량을 초과
    #[error("초과 체결: filled {0} + {1} > quantity {2}")]
    Overfill(Decimal, Decimal, Decimal),

    /// 주문당 체결 수 하드 캡 초과 (회계에서 제외되는 이상 징후)
    #[error("주문당 체결 수 한도 초과 ({0})")]
    FillCapExceeded(usize),
}

/// 체결 반영 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// 부분 체결 상태
    Partial,
    /// 전량 체결 완료
    Complete,
}

/// 정체 감시 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallStatus {
    /// 정상
    Healthy,
    /// 마지막 체결 이후 임계 시간 초과
    Stalled,
    /// 임계의 2배 초과, 잔량 취소 대상
    CancelDue,
}

/// 주문 하나의 체결 추적기.
#[derive(Debug)]
pub struct ExecutionTracker {
    /// 대상 주문 ID
    pub order_id: Uuid,
    /// 주문 수량
    pub quantity: Quantity,
    /// 체결 이력
    fills: Vec<Fill>,
    /// 체결 수량 합
    pub filled_qty: Quantity,
    /// 규모 가중 평균 체결가
    pub avg_fill_price: Option<Price>,
    /// 수수료 합
    pub commission_total: Decimal,
    /// 마지막 체결 시각
    last_fill_ts: Option<DateTime<Utc>>,
    /// 체결 수 하드 캡
    max_fills: usize,
    /// 캡 초과로 회계에서 제외된 체결 수
    pub anomalous_fills: u64,
}

impl ExecutionTracker {
    /// 새 추적기를 생성합니다.
    pub fn new(order_id: Uuid, quantity: Quantity, max_fills: usize) -> Self {
        Self {
            order_id,
            quantity,
            fills: Vec::new(),
            filled_qty: Decimal::ZERO,
            avg_fill_price: None,
            commission_total: Decimal::ZERO,
            last_fill_ts: None,
            max_fills,
            anomalous_fills: 0,
        }
    }

    /// 체결을 반영합니다.
    ///
    /// 캡 초과 체결은 로그 후 회계에서 제외됩니다. 초과 체결
    /// (합이 주문 수량 초과)은 불변 조건 위반으로 거부됩니다.
    pub fn apply_fill(&mut self, fill: Fill) -> Result<FillOutcome, TrackerError> {
        if self.fills.len() >= self.max_fills {
            self.anomalous_fills += 1;
            warn!(
                order_id = %self.order_id,
                fill_id = %fill.fill_id,
                cap = self.max_fills,
                "Fill cap exceeded, excluded from accounting"
            );
            return Err(TrackerError::FillCapExceeded(self.max_fills));
        }

        let new_total = self.filled_qty + fill.qty;
        if new_total > self.quantity {
            return Err(TrackerError::Overfill(self.filled_qty, fill.qty, self.quantity));
        }

        // 규모 가중 평균
        let prev_value = self.avg_fill_price.unwrap_or(Decimal::ZERO) * self.filled_qty;
        self.avg_fill_price = Some((prev_value + fill.price * fill.qty) / new_total);
        self.filled_qty = new_total;
        self.commission_total += fill.commission;
        self.last_fill_ts = Some(fill.ts);
        self.fills.push(fill);

        if self.filled_qty == self.quantity {
            Ok(FillOutcome::Complete)
        } else {
            Ok(FillOutcome::Partial)
        }
    }

    /// 체결 이력을 반환합니다.
    pub fn fills(&self) -> &[Fill] {
        &self.fills
    }

    /// 부분 체결 여부.
    pub fn is_partial(&self) -> bool {
        self.filled_qty > Decimal::ZERO && self.filled_qty < self.quantity
    }

    /// 남은 수량.
    pub fn remaining(&self) -> Quantity {
        self.quantity - self.filled_qty
    }

    /// 정체 상태를 판정합니다.
    ///
    /// 부분 체결 주문에서 마지막 체결 이후 `threshold`가 지나면
    /// `Stalled`, 2배가 지나면 `CancelDue`입니다.
    pub fn stall_status(&self, now: DateTime<Utc>, threshold: Duration) -> StallStatus {
        if !self.is_partial() {
            return StallStatus::Healthy;
        }
        let Some(last) = self.last_fill_ts else {
            return StallStatus::Healthy;
        };

        let silence = now - last;
        if silence > threshold * 2 {
            StallStatus::CancelDue
        } else if silence > threshold {
            StallStatus::Stalled
        } else {
            StallStatus::Healthy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kquant_core::{Side, Symbol};
    use rust_decimal_macros::dec;

    fn fill(qty: Decimal, price: Decimal, seconds_ago: i64) -> Fill {
        Fill {
            fill_id: format!("F-{}-{}", qty, price),
            order_id: Uuid::nil(),
            symbol: Symbol::canonicalize("005930").unwrap(),
            side: Side::Buy,
            qty,
            price,
            commission: dec!(10),
            ts: Utc::now() - Duration::seconds(seconds_ago),
        }
    }

    #[test]
    fn test_size_weighted_average() {
        let mut tracker = ExecutionTracker::new(Uuid::nil(), dec!(100), 100);

        assert_eq!(
            tracker.apply_fill(fill(dec!(40), dec!(75000), 0)).unwrap(),
            FillOutcome::Partial
        );
        assert_eq!(
            tracker.apply_fill(fill(dec!(60), dec!(75500), 0)).unwrap(),
            FillOutcome::Complete
        );

        // (40×75000 + 60×75500) / 100 = 75300
        assert_eq!(tracker.avg_fill_price, Some(dec!(75300)));
        assert_eq!(tracker.filled_qty, dec!(100));
        assert_eq!(tracker.commission_total, dec!(20));

        // 불변 조건: sum(fills.qty) == filled_qty
        let sum: Decimal = tracker.fills().iter().map(|f| f.qty).sum();
        assert_eq!(sum, tracker.filled_qty);
    }

    #[test]
    fn test_overfill_rejected() {
        let mut tracker = ExecutionTracker::new(Uuid::nil(), dec!(10), 100);
        tracker.apply_fill(fill(dec!(8), dec!(75000), 0)).unwrap();

        let result = tracker.apply_fill(fill(dec!(5), dec!(75000), 0));
        assert!(matches!(result, Err(TrackerError::Overfill(_, _, _))));
        assert_eq!(tracker.filled_qty, dec!(8));
    }

    #[test]
    fn test_fill_cap_excludes_from_accounting() {
        let mut tracker = ExecutionTracker::new(Uuid::nil(), dec!(1000), 3);

        for _ in 0..3 {
            tracker.apply_fill(fill(dec!(1), dec!(75000), 0)).unwrap();
        }
        let result = tracker.apply_fill(fill(dec!(1), dec!(75000), 0));
        assert_eq!(result.unwrap_err(), TrackerError::FillCapExceeded(3));
        assert_eq!(tracker.filled_qty, dec!(3));
        assert_eq!(tracker.anomalous_fills, 1);
    }

    #[test]
    fn test_stall_detection() {
        let threshold = Duration::seconds(300);
        let mut tracker = ExecutionTracker::new(Uuid::nil(), dec!(100), 100);

        // 체결 없음 → 정상
        assert_eq!(tracker.stall_status(Utc::now(), threshold), StallStatus::Healthy);

        // 방금 부분 체결 → 정상
        tracker.apply_fill(fill(dec!(40), dec!(75000), 0)).unwrap();
        assert_eq!(tracker.stall_status(Utc::now(), threshold), StallStatus::Healthy);

        // 마지막 체결 후 301초 → 정체
        let mut stale = ExecutionTracker::new(Uuid::nil(), dec!(100), 100);
        stale.apply_fill(fill(dec!(40), dec!(75000), 301)).unwrap();
        assert_eq!(stale.stall_status(Utc::now(), threshold), StallStatus::Stalled);

        // 601초 → 잔량 취소 대상
        let mut dead = ExecutionTracker::new(Uuid::nil(), dec!(100), 100);
        dead.apply_fill(fill(dec!(40), dec!(75000), 601)).unwrap();
        assert_eq!(dead.stall_status(Utc::now(), threshold), StallStatus::CancelDue);

        // 전량 체결이면 감시 대상 아님
        let mut done = ExecutionTracker::new(Uuid::nil(), dec!(40), 100);
        done.apply_fill(fill(dec!(40), dec!(75000), 601)).unwrap();
        assert_eq!(done.stall_status(Utc::now(), threshold), StallStatus::Healthy);
    }
}
