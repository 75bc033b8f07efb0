//! 데이터 품질 게이트.
//!
//! 수신 틱은 아래 순서의 게이트를 통과하며, 첫 번째 실패가 결과를
//! 결정합니다:
//!
//! 1. 필수 필드 존재 — critical, 폐기
//! 2. 타입/범위 (`close > 0`, `volume ≥ 0`, 설정 가격 범위) — critical, 폐기
//! 3. OHLC 일관성 — high, 틱 폐기 (캔들 조립은 계속)
//! 4. 신선도 (기본 5분) — high, 경고 후 통과
//! 5. 중복 (직전 수락 틱과 동일한 (ts, close)) — 무음 폐기
//! 6. 가격 이상치 (최근 20개 종가 대비 z-점수 > 8) — high, 경고 후 통과.
//!    거래량 이상치는 경고만.

use chrono::{Duration, Utc};
use kquant_core::{MarketTick, Price, Symbol};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

/// 게이트 실패 심각도.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualitySeverity {
    /// 경고 (통과)
    Warning,
    /// 높음
    High,
    /// 치명적 (폐기)
    Critical,
}

/// 게이트 실패 보고.
#[derive(Debug, Clone, Serialize)]
pub struct QualityIssue {
    /// 실패한 게이트 이름
    pub gate: &'static str,
    /// 심각도
    pub severity: QualitySeverity,
    /// 설명
    pub message: String,
}

/// 품질 검사 결과.
#[derive(Debug)]
pub enum QualityVerdict {
    /// 통과 (경고 목록 포함 가능)
    Accept(Vec<QualityIssue>),
    /// 폐기, `quality_issue` 보고 대상
    Drop(QualityIssue),
    /// 중복으로 무음 폐기
    DropSilently,
}

impl QualityVerdict {
    /// 통과 여부.
    pub fn is_accepted(&self) -> bool {
        matches!(self, QualityVerdict::Accept(_))
    }
}

/// 품질 게이트 설정.
#[derive(Debug, Clone)]
pub struct QualityConfig {
    /// 허용 최저 가격
    pub min_price: Price,
    /// 허용 최고 가격
    pub max_price: Price,
    /// 신선도 임계 (초)
    pub staleness_threshold_secs: i64,
    /// 이상치 z-점수 임계
    pub outlier_z: f64,
    /// 종목당 종가 이력 크기
    pub history_size: usize,
    /// 거래량 이상치 배수 (평균 대비)
    pub volume_outlier_factor: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_price: Decimal::ONE,
            max_price: Decimal::new(10_000_000, 0),
            staleness_threshold_secs: 300,
            outlier_z: 8.0,
            history_size: 20,
            volume_outlier_factor: 10.0,
        }
    }
}

/// 게이트 통계.
#[derive(Debug, Default, Clone, Serialize)]
pub struct QualityStats {
    /// 검사한 틱 수
    pub checked: u64,
    /// 통과한 틱 수
    pub accepted: u64,
    /// 폐기한 틱 수
    pub dropped: u64,
    /// 중복으로 무음 폐기한 틱 수
    pub duplicates: u64,
    /// 경고 수
    pub warnings: u64,
}

#[derive(Default)]
struct SymbolHistory {
    closes: VecDeque<Decimal>,
    volumes: VecDeque<Decimal>,
    last_accepted: Option<(chrono::DateTime<Utc>, Decimal)>,
}

/// 데이터 품질 검사기.
pub struct DataQualityChecker {
    config: QualityConfig,
    history: HashMap<Symbol, SymbolHistory>,
    stats: QualityStats,
}

impl DataQualityChecker {
    /// 새 검사기를 생성합니다.
    pub fn new(config: QualityConfig) -> Self {
        Self {
            config,
            history: HashMap::new(),
            stats: QualityStats::default(),
        }
    }

    /// 틱을 게이트 순서대로 검사합니다.
    pub fn check(&mut self, tick: &MarketTick) -> QualityVerdict {
        self.stats.checked += 1;
        let mut warnings = Vec::new();

        // 1. 필수 필드
        if tick.symbol.as_str().is_empty() {
            return self.drop_with(QualityIssue {
                gate: "required_fields",
                severity: QualitySeverity::Critical,
                message: "missing symbol".to_string(),
            });
        }

        // 2. 타입/범위
        if tick.close <= Decimal::ZERO {
            return self.drop_with(QualityIssue {
                gate: "range",
                severity: QualitySeverity::Critical,
                message: format!("non-positive close: {}", tick.close),
            });
        }
        if tick.volume < Decimal::ZERO {
            return self.drop_with(QualityIssue {
                gate: "range",
                severity: QualitySeverity::Critical,
                message: format!("negative volume: {}", tick.volume),
            });
        }
        if tick.close < self.config.min_price || tick.close > self.config.max_price {
            return self.drop_with(QualityIssue {
                gate: "range",
                severity: QualitySeverity::Critical,
                message: format!(
                    "close {} outside [{}, {}]",
                    tick.close, self.config.min_price, self.config.max_price
                ),
            });
        }

        // 3. OHLC 일관성 (전체 OHLC가 제공된 경우만)
        if tick.has_full_ohlc() {
            let open = tick.open.unwrap_or(tick.close);
            let high = tick.high.unwrap_or(tick.close);
            let low = tick.low.unwrap_or(tick.close);
            if low > open.min(tick.close) || high < open.max(tick.close) {
                return self.drop_with(QualityIssue {
                    gate: "ohlc_consistency",
                    severity: QualitySeverity::High,
                    message: format!(
                        "inconsistent ohlc: o={} h={} l={} c={}",
                        open, high, low, tick.close
                    ),
                });
            }
        }

        // 4. 신선도
        let age = Utc::now() - tick.ts;
        if age > Duration::seconds(self.config.staleness_threshold_secs) {
            warnings.push(QualityIssue {
                gate: "staleness",
                severity: QualitySeverity::High,
                message: format!("tick is {}s old", age.num_seconds()),
            });
        }

        // 5. 중복 (직전 수락 틱과 동일한 ts/close)
        let entry = self.history.entry(tick.symbol.clone()).or_default();
        if let Some((last_ts, last_close)) = entry.last_accepted {
            if last_ts == tick.ts && last_close == tick.close {
                self.stats.duplicates += 1;
                return QualityVerdict::DropSilently;
            }
        }

        // 6. 이상치
        if let Some(z) = Self::z_score(&entry.closes, tick.close) {
            if z.abs() > self.config.outlier_z {
                warnings.push(QualityIssue {
                    gate: "price_outlier",
                    severity: QualitySeverity::High,
                    message: format!("z-score {:.1} exceeds {}", z, self.config.outlier_z),
                });
            }
        }
        if let Some(avg_volume) = Self::mean(&entry.volumes) {
            let volume = tick.volume.to_f64().unwrap_or(0.0);
            if avg_volume > 0.0 && volume > avg_volume * self.config.volume_outlier_factor {
                warnings.push(QualityIssue {
                    gate: "volume_outlier",
                    severity: QualitySeverity::Warning,
                    message: format!("volume {:.0} vs avg {:.0}", volume, avg_volume),
                });
            }
        }

        // 이력 갱신
        entry.last_accepted = Some((tick.ts, tick.close));
        entry.closes.push_back(tick.close);
        entry.volumes.push_back(tick.volume);
        while entry.closes.len() > self.config.history_size {
            entry.closes.pop_front();
        }
        while entry.volumes.len() > self.config.history_size {
            entry.volumes.pop_front();
        }

        self.stats.accepted += 1;
        self.stats.warnings += warnings.len() as u64;
        QualityVerdict::Accept(warnings)
    }

    /// 게이트 통계를 반환합니다.
    pub fn stats(&self) -> &QualityStats {
        &self.stats
    }

    fn drop_with(&mut self, issue: QualityIssue) -> QualityVerdict {
        self.stats.dropped += 1;
        QualityVerdict::Drop(issue)
    }

    fn mean(values: &VecDeque<Decimal>) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let sum: f64 = values.iter().filter_map(|v| v.to_f64()).sum();
        Some(sum / values.len() as f64)
    }

    fn z_score(closes: &VecDeque<Decimal>, value: Decimal) -> Option<f64> {
        if closes.len() < 2 {
            return None;
        }
        let mean = Self::mean(closes)?;
        let variance: f64 = closes
            .iter()
            .filter_map(|v| v.to_f64())
            .map(|v| (v - mean).powi(2))
            .sum::<f64>()
            / closes.len() as f64;
        let std = variance.sqrt();
        if std == 0.0 {
            return None;
        }
        Some((value.to_f64()? - mean) / std)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kquant_core::TickSource;
    use rust_decimal_macros::dec;

    fn tick(close: Decimal) -> MarketTick {
        MarketTick::quote(
            Symbol::canonicalize("005930").unwrap(),
            Utc::now(),
            close,
            dec!(100),
            TickSource::BrokerWebsocket,
        )
    }

    #[test]
    fn test_accepts_normal_tick() {
        let mut checker = DataQualityChecker::new(QualityConfig::default());
        assert!(checker.check(&tick(dec!(75000))).is_accepted());
        assert_eq!(checker.stats().accepted, 1);
    }

    #[test]
    fn test_drops_non_positive_close() {
        let mut checker = DataQualityChecker::new(QualityConfig::default());
        match checker.check(&tick(dec!(0))) {
            QualityVerdict::Drop(issue) => {
                assert_eq!(issue.gate, "range");
                assert_eq!(issue.severity, QualitySeverity::Critical);
            }
            _ => panic!("expected drop"),
        }
    }

    #[test]
    fn test_drops_inconsistent_ohlc() {
        let mut checker = DataQualityChecker::new(QualityConfig::default());
        let mut bad = tick(dec!(75000));
        bad.open = Some(dec!(75000));
        bad.high = Some(dec!(74000)); // high < close
        bad.low = Some(dec!(74000));

        match checker.check(&bad) {
            QualityVerdict::Drop(issue) => assert_eq!(issue.gate, "ohlc_consistency"),
            _ => panic!("expected drop"),
        }
    }

    #[test]
    fn test_stale_tick_warns_but_passes() {
        let mut checker = DataQualityChecker::new(QualityConfig::default());
        let mut stale = tick(dec!(75000));
        stale.ts = Utc::now() - Duration::seconds(600);

        match checker.check(&stale) {
            QualityVerdict::Accept(warnings) => {
                assert_eq!(warnings.len(), 1);
                assert_eq!(warnings[0].gate, "staleness");
            }
            _ => panic!("expected accept with warning"),
        }
    }

    #[test]
    fn test_duplicate_dropped_silently() {
        let mut checker = DataQualityChecker::new(QualityConfig::default());
        let t = tick(dec!(75000));

        assert!(checker.check(&t).is_accepted());
        match checker.check(&t) {
            QualityVerdict::DropSilently => {}
            _ => panic!("expected silent drop"),
        }
        assert_eq!(checker.stats().duplicates, 1);

        // 재발행(리플레이)도 링을 바꾸지 않음
        match checker.check(&t) {
            QualityVerdict::DropSilently => {}
            _ => panic!("expected silent drop"),
        }
    }

    #[test]
    fn test_price_outlier_warns_but_passes() {
        let mut config = QualityConfig::default();
        config.outlier_z = 3.0;
        let mut checker = DataQualityChecker::new(config);

        // 안정된 이력 구축
        for i in 0..20 {
            let mut t = tick(dec!(75000) + Decimal::from(i % 3));
            t.ts = Utc::now() - Duration::seconds(20 - i);
            assert!(checker.check(&t).is_accepted());
        }

        // 급등 틱
        match checker.check(&tick(dec!(90000))) {
            QualityVerdict::Accept(warnings) => {
                assert!(warnings.iter().any(|w| w.gate == "price_outlier"));
            }
            _ => panic!("outlier must pass with warning"),
        }
    }
}
