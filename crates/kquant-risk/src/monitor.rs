//! 포트폴리오 리스크 모니터.
//!
//! 고정 주기(기본 30초)로 포트폴리오 지표를 계산·캐시하고, 경고/위험
//! 임계값을 넘으면 심각도를 붙여 `risk_alert`를 발행합니다.
//!
//! 지표: 포트폴리오 가치, 총 노출, 현금 비율, 집중도(명목 비중
//! Herfindahl), 상위 5종목 집중도, 역사적 VaR(95%), 평균 쌍별 상관,
//! 섹터 분산도.

use crate::context::RiskContext;
use kquant_bus::{Envelope, EventBus, Payload, RiskAlertSeverity, Topic};
use kquant_core::Position;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// 지표 임계값.
#[derive(Debug, Clone)]
pub struct MonitorThresholds {
    /// 총 노출 비율 경고/위험
    pub exposure_warning: f64,
    /// 총 노출 비율 위험
    pub exposure_critical: f64,
    /// 집중도(HHI) 경고
    pub concentration_warning: f64,
    /// 집중도(HHI) 위험
    pub concentration_critical: f64,
    /// 현금 비율 하한 경고
    pub cash_ratio_warning: f64,
    /// VaR / 포트폴리오 비율 경고
    pub var_ratio_warning: f64,
}

impl Default for MonitorThresholds {
    fn default() -> Self {
        Self {
            exposure_warning: 0.8,
            exposure_critical: 0.9,
            concentration_warning: 0.4,
            concentration_critical: 0.6,
            cash_ratio_warning: 0.1,
            var_ratio_warning: 0.05,
        }
    }
}

/// 계산된 포트폴리오 리스크 지표.
#[derive(Debug, Clone, Serialize)]
pub struct RiskMetricsReport {
    /// 포트폴리오 가치
    pub portfolio_value: Decimal,
    /// 총 노출 금액
    pub gross_exposure: Decimal,
    /// 현금 비율
    pub cash_ratio: f64,
    /// Herfindahl 집중도 (명목 비중 제곱합)
    pub herfindahl: f64,
    /// 상위 5종목 비중 합
    pub top5_concentration: f64,
    /// 역사적 VaR (95%, 1일, 금액)
    pub var_95: Decimal,
    /// 평균 쌍별 수익률 상관
    pub avg_pairwise_correlation: Option<f64>,
    /// 섹터별 비중 표준편차
    pub sector_dispersion: Option<f64>,
}

/// 포트폴리오 리스크 모니터.
pub struct RiskMonitor {
    bus: Arc<EventBus>,
    thresholds: MonitorThresholds,
}

impl RiskMonitor {
    /// 새 모니터를 생성합니다.
    pub fn new(bus: Arc<EventBus>, thresholds: MonitorThresholds) -> Self {
        Self { bus, thresholds }
    }

    /// 지표를 계산합니다.
    ///
    /// `returns`는 종목별 일별 수익률 시계열 (VaR/상관 계산용)입니다.
    pub fn compute(
        &self,
        ctx: &RiskContext,
        returns: &HashMap<kquant_core::Symbol, Vec<f64>>,
    ) -> RiskMetricsReport {
        let portfolio_value = ctx.portfolio_value();
        let gross_exposure = ctx.gross_exposure();
        let portfolio_f64 = portfolio_value.to_f64().unwrap_or(0.0);

        let cash_ratio = if portfolio_f64 > 0.0 {
            ctx.cash.to_f64().unwrap_or(0.0) / portfolio_f64
        } else {
            0.0
        };

        let positions: Vec<&Position> =
            ctx.positions.values().filter(|p| p.is_open()).collect();

        // 명목 비중
        let total_notional = ctx.total_position_notional().to_f64().unwrap_or(0.0);
        let mut weights: Vec<f64> = positions
            .iter()
            .filter_map(|p| p.notional().to_f64())
            .map(|n| if total_notional > 0.0 { n / total_notional } else { 0.0 })
            .collect();
        weights.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

        let herfindahl = weights.iter().map(|w| w * w).sum();
        let top5_concentration = weights.iter().take(5).sum();

        let var_95 = self.historical_var(ctx, returns, 0.95);
        let avg_pairwise_correlation = Self::avg_correlation(returns);
        let sector_dispersion = Self::sector_dispersion(ctx, total_notional);

        RiskMetricsReport {
            portfolio_value,
            gross_exposure,
            cash_ratio,
            herfindahl,
            top5_concentration,
            var_95,
            avg_pairwise_correlation,
            sector_dispersion,
        }
    }

    /// 지표를 평가하고 임계값 초과 시 경보를 발행합니다.
    pub fn publish_alerts(&self, report: &RiskMetricsReport) {
        let portfolio = report.portfolio_value.to_f64().unwrap_or(0.0);
        if portfolio <= 0.0 {
            return;
        }

        let exposure_ratio = report.gross_exposure.to_f64().unwrap_or(0.0) / portfolio;
        if exposure_ratio > self.thresholds.exposure_critical {
            self.alert(
                RiskAlertSeverity::Critical,
                "gross_exposure_ratio",
                exposure_ratio,
                self.thresholds.exposure_critical,
            );
        } else if exposure_ratio > self.thresholds.exposure_warning {
            self.alert(
                RiskAlertSeverity::Warning,
                "gross_exposure_ratio",
                exposure_ratio,
                self.thresholds.exposure_warning,
            );
        }

        if report.herfindahl > self.thresholds.concentration_critical {
            self.alert(
                RiskAlertSeverity::Critical,
                "herfindahl",
                report.herfindahl,
                self.thresholds.concentration_critical,
            );
        } else if report.herfindahl > self.thresholds.concentration_warning {
            self.alert(
                RiskAlertSeverity::Warning,
                "herfindahl",
                report.herfindahl,
                self.thresholds.concentration_warning,
            );
        }

        if report.cash_ratio < self.thresholds.cash_ratio_warning {
            self.alert(
                RiskAlertSeverity::Warning,
                "cash_ratio",
                report.cash_ratio,
                self.thresholds.cash_ratio_warning,
            );
        }

        let var_ratio = report.var_95.to_f64().unwrap_or(0.0) / portfolio;
        if var_ratio > self.thresholds.var_ratio_warning {
            self.alert(
                RiskAlertSeverity::Warning,
                "var_95_ratio",
                var_ratio,
                self.thresholds.var_ratio_warning,
            );
        }
    }

    fn alert(&self, severity: RiskAlertSeverity, metric: &str, value: f64, threshold: f64) {
        warn!(metric, value, threshold, ?severity, "Risk alert");
        let _ = self.bus.publish(Envelope::new(
            Topic::RiskAlert,
            "risk_monitor",
            Payload::RiskAlert {
                severity,
                metric: metric.to_string(),
                value: format!("{:.4}", value),
                threshold: format!("{:.4}", threshold),
                message: format!("{} {:.4} exceeds {:.4}", metric, value, threshold),
            },
        ));
    }

    /// 역사적 VaR: 포트폴리오 가중 일별 수익률 분포의 하위 분위수.
    fn historical_var(
        &self,
        ctx: &RiskContext,
        returns: &HashMap<kquant_core::Symbol, Vec<f64>>,
        confidence: f64,
    ) -> Decimal {
        let total = ctx.total_position_notional().to_f64().unwrap_or(0.0);
        if total <= 0.0 || returns.is_empty() {
            return Decimal::ZERO;
        }

        // 날짜별 포트폴리오 수익률 (공통 길이 기준)
        let min_len = returns.values().map(|r| r.len()).min().unwrap_or(0);
        if min_len < 2 {
            return Decimal::ZERO;
        }

        let mut portfolio_returns = vec![0.0f64; min_len];
        for (symbol, series) in returns {
            let weight = ctx
                .position_notional(symbol)
                .to_f64()
                .unwrap_or(0.0)
                / total;
            for (i, r) in series.iter().rev().take(min_len).enumerate() {
                portfolio_returns[i] += weight * r;
            }
        }

        portfolio_returns.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let index = ((1.0 - confidence) * min_len as f64).floor() as usize;
        let quantile = portfolio_returns[index.min(min_len - 1)];

        let loss = (-quantile).max(0.0) * total;
        Decimal::try_from(loss).unwrap_or(Decimal::ZERO)
    }

    /// 평균 쌍별 상관.
    fn avg_correlation(returns: &HashMap<kquant_core::Symbol, Vec<f64>>) -> Option<f64> {
        let series: Vec<&Vec<f64>> = returns.values().filter(|r| r.len() >= 2).collect();
        if series.len() < 2 {
            return None;
        }

        let min_len = series.iter().map(|r| r.len()).min()?;
        let mut sum = 0.0;
        let mut count = 0usize;
        for i in 0..series.len() {
            for j in (i + 1)..series.len() {
                if let Some(corr) =
                    Self::correlation(&series[i][..min_len], &series[j][..min_len])
                {
                    sum += corr;
                    count += 1;
                }
            }
        }
        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }

    fn correlation(a: &[f64], b: &[f64]) -> Option<f64> {
        let n = a.len() as f64;
        if n < 2.0 {
            return None;
        }
        let mean_a = a.iter().sum::<f64>() / n;
        let mean_b = b.iter().sum::<f64>() / n;
        let cov: f64 = a
            .iter()
            .zip(b)
            .map(|(x, y)| (x - mean_a) * (y - mean_b))
            .sum::<f64>();
        let var_a: f64 = a.iter().map(|x| (x - mean_a).powi(2)).sum();
        let var_b: f64 = b.iter().map(|y| (y - mean_b).powi(2)).sum();
        let denom = (var_a * var_b).sqrt();
        if denom == 0.0 {
            None
        } else {
            Some(cov / denom)
        }
    }

    /// 섹터별 비중 표준편차.
    fn sector_dispersion(ctx: &RiskContext, total_notional: f64) -> Option<f64> {
        if total_notional <= 0.0 {
            return None;
        }
        let mut sector_weights: HashMap<&str, f64> = HashMap::new();
        for (symbol, position) in &ctx.positions {
            if !position.is_open() {
                continue;
            }
            let sector = ctx
                .sector_map
                .get(symbol)
                .map(|s| s.as_str())
                .unwrap_or("unknown");
            *sector_weights.entry(sector).or_insert(0.0) +=
                position.notional().to_f64().unwrap_or(0.0) / total_notional;
        }
        if sector_weights.len() < 2 {
            return None;
        }
        let n = sector_weights.len() as f64;
        let mean = sector_weights.values().sum::<f64>() / n;
        let variance = sector_weights
            .values()
            .map(|w| (w - mean).powi(2))
            .sum::<f64>()
            / n;
        Some(variance.sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kquant_core::Symbol;
    use rust_decimal_macros::dec;

    fn symbol(code: &str) -> Symbol {
        Symbol::canonicalize(code).unwrap()
    }

    fn context_with_positions() -> RiskContext {
        let mut positions = HashMap::new();
        for (code, qty, price) in [
            ("005930", dec!(10), dec!(75000)),
            ("000660", dec!(5), dec!(200000)),
        ] {
            let mut p = Position::empty(symbol(code));
            p.apply_buy(qty, price, Decimal::ZERO);
            positions.insert(symbol(code), p);
        }

        RiskContext {
            cash: dec!(8_250_000),
            realized_pnl_today: Decimal::ZERO,
            realized_pnl_month: Decimal::ZERO,
            open_order_notional: Decimal::ZERO,
            positions,
            orders_today: 0,
            consecutive_losses: 0,
            emergency_armed: false,
            sector_map: HashMap::new(),
        }
    }

    #[test]
    fn test_compute_basic_metrics() {
        let bus = Arc::new(EventBus::new(16));
        let monitor = RiskMonitor::new(bus, MonitorThresholds::default());
        let ctx = context_with_positions();

        let report = monitor.compute(&ctx, &HashMap::new());

        // 750,000 + 1,000,000 + 8,250,000 = 10,000,000
        assert_eq!(report.portfolio_value, dec!(10_000_000));
        assert_eq!(report.gross_exposure, dec!(1_750_000));
        assert!((report.cash_ratio - 0.825).abs() < 1e-9);

        // 비중 (750/1750)² + (1000/1750)² ≈ 0.5102
        assert!((report.herfindahl - 0.5102).abs() < 0.001);
        assert!((report.top5_concentration - 1.0).abs() < 1e-9);
        assert_eq!(report.var_95, Decimal::ZERO);
    }

    #[test]
    fn test_var_with_history() {
        let bus = Arc::new(EventBus::new(16));
        let monitor = RiskMonitor::new(bus, MonitorThresholds::default());
        let ctx = context_with_positions();

        let mut returns = HashMap::new();
        // 100일 중 가장 나쁜 5% 수익률이 -3% 부근이 되도록 구성
        let mut series: Vec<f64> = vec![0.001; 95];
        series.extend([-0.05, -0.04, -0.035, -0.03, -0.02]);
        returns.insert(symbol("005930"), series.clone());
        returns.insert(symbol("000660"), series);

        let report = monitor.compute(&ctx, &returns);
        assert!(report.var_95 > Decimal::ZERO);
        assert!(report.avg_pairwise_correlation.is_some());
    }

    #[tokio::test]
    async fn test_alert_published_on_concentration() {
        let bus = Arc::new(EventBus::new(16));
        let mut subscription = bus.subscribe(Topic::RiskAlert);
        let monitor = RiskMonitor::new(Arc::clone(&bus), MonitorThresholds::default());

        let report = RiskMetricsReport {
            portfolio_value: dec!(10_000_000),
            gross_exposure: dec!(1_000_000),
            cash_ratio: 0.9,
            herfindahl: 0.7,
            top5_concentration: 1.0,
            var_95: Decimal::ZERO,
            avg_pairwise_correlation: None,
            sector_dispersion: None,
        };
        monitor.publish_alerts(&report);

        match subscription.recv().await.unwrap() {
            kquant_bus::Delivery::Event(envelope) => match envelope.payload {
                Payload::RiskAlert { severity, metric, .. } => {
                    assert_eq!(severity, RiskAlertSeverity::Critical);
                    assert_eq!(metric, "herfindahl");
                }
                _ => panic!("wrong payload"),
            },
            _ => panic!("expected alert"),
        }
    }
}
