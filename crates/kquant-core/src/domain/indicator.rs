//! 기술적 지표 스냅샷.

use crate::types::{Symbol, Timeframe};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 특정 (종목, 타임프레임)의 지표 계산 결과.
///
/// 윈도우가 부족한 지표는 맵에 존재하지 않습니다 (0이 아님).
/// 전략은 지표 부재를 허용해야 합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    /// 종목 코드
    pub symbol: Symbol,
    /// 타임프레임
    pub timeframe: Timeframe,
    /// 기준 캔들의 버킷 시작 시각
    pub ts: DateTime<Utc>,
    /// 지표 이름 → 값 (예: `sma_5`, `rsi_14`, `bb_upper`)
    pub values: HashMap<String, Decimal>,
}

impl IndicatorSnapshot {
    /// 빈 스냅샷을 생성합니다.
    pub fn new(symbol: Symbol, timeframe: Timeframe, ts: DateTime<Utc>) -> Self {
        Self {
            symbol,
            timeframe,
            ts,
            values: HashMap::new(),
        }
    }

    /// 지표 값을 추가합니다.
    pub fn insert(&mut self, name: impl Into<String>, value: Decimal) {
        self.values.insert(name.into(), value);
    }

    /// 값이 있으면 추가합니다. 윈도우 부족으로 None인 지표는 기록하지 않습니다.
    pub fn insert_opt(&mut self, name: impl Into<String>, value: Option<Decimal>) {
        if let Some(v) = value {
            self.values.insert(name.into(), v);
        }
    }

    /// 지표 값을 조회합니다.
    pub fn get(&self, name: &str) -> Option<Decimal> {
        self.values.get(name).copied()
    }

    /// 필요한 지표가 모두 존재하는지 확인합니다.
    pub fn contains_all<'a, I: IntoIterator<Item = &'a str>>(&self, names: I) -> bool {
        names.into_iter().all(|n| self.values.contains_key(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_snapshot_absent_means_missing() {
        let symbol = Symbol::canonicalize("005930").unwrap();
        let mut snapshot = IndicatorSnapshot::new(symbol, Timeframe::M1, Utc::now());

        snapshot.insert("sma_5", dec!(75000));
        snapshot.insert_opt("rsi_14", None);

        assert_eq!(snapshot.get("sma_5"), Some(dec!(75000)));
        assert_eq!(snapshot.get("rsi_14"), None);
        assert!(snapshot.contains_all(["sma_5"]));
        assert!(!snapshot.contains_all(["sma_5", "rsi_14"]));
    }
}
