//! 1분봉-5분평균 교차 전략.
//!
//! 1분봉 종가와 최근 5개 1분봉 종가 평균을 비교합니다:
//! - 종가 > 평균, 미보유 → 매수
//! - 종가 ≤ 평균, 보유 → 매도
//! - 장마감 시각(기본 15:20 KST) 도달, 보유 → 강제청산 (시장가)
//!
//! 보유 중 추가 매수는 하지 않습니다. 거래대금 필터가 켜져 있으면
//! 5일 평균 거래대금이 하한 미만인 종목은 건너뜁니다.

use crate::register_strategy;
use crate::traits::{ParamSpec, ParamType, Strategy, StrategySnapshot};
use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Asia::Seoul;
use kquant_core::{
    KquantError, KquantResult, Price, SignalAction, Symbol, Timeframe, TradingSignal,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, info};

/// 전략 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Ma1m5mConfig {
    /// 이동평균 기간 (1분봉 개수)
    #[serde(default = "default_ma_period")]
    pub ma_period: usize,

    /// 신뢰도 스케일: confidence = clamp(((p−m)/m) / k, 0, 1)
    #[serde(default = "default_confidence_scale")]
    pub confidence_scale: Decimal,

    /// 장마감 강제청산 시각 (KST, "HH:MM")
    #[serde(default = "default_session_close")]
    pub session_close_time: String,

    /// 강제청산 활성화
    #[serde(default = "default_true")]
    pub enable_forced_sell: bool,

    /// 5일 평균 거래대금 하한 (원)
    #[serde(default = "default_min_turnover")]
    pub min_turnover: Decimal,

    /// 거래대금 필터 활성화
    #[serde(default = "default_true")]
    pub enable_volume_filter: bool,
}

fn default_ma_period() -> usize {
    5
}
fn default_confidence_scale() -> Decimal {
    dec!(0.01)
}
fn default_session_close() -> String {
    "15:20".to_string()
}
fn default_true() -> bool {
    true
}
fn default_min_turnover() -> Decimal {
    Decimal::new(30_000_000_000, 0)
}

impl Default for Ma1m5mConfig {
    fn default() -> Self {
        Self {
            ma_period: default_ma_period(),
            confidence_scale: default_confidence_scale(),
            session_close_time: default_session_close(),
            enable_forced_sell: default_true(),
            min_turnover: default_min_turnover(),
            enable_volume_filter: default_true(),
        }
    }
}

#[derive(Debug, Clone)]
struct Holding {
    entry_price: Price,
    entry_ts: DateTime<Utc>,
}

/// 1분봉-5분평균 교차 전략.
pub struct Ma1m5mStrategy {
    config: Ma1m5mConfig,
    close_time: NaiveTime,
    /// 종목별 보유 상태 (이 인스턴스에 한정)
    holdings: HashMap<Symbol, Holding>,
}

impl Default for Ma1m5mStrategy {
    fn default() -> Self {
        let config = Ma1m5mConfig::default();
        let close_time = Self::parse_close_time(&config.session_close_time);
        Self {
            config,
            close_time,
            holdings: HashMap::new(),
        }
    }
}

impl Ma1m5mStrategy {
    fn parse_close_time(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap_or_else(|_| {
            NaiveTime::from_hms_opt(15, 20, 0).expect("valid fallback time")
        })
    }

    fn sma_name(&self) -> String {
        format!("sma_{}", self.config.ma_period)
    }

    /// KST 기준으로 장마감 시각에 도달했는지 확인합니다.
    fn is_session_close(&self, ts: DateTime<Utc>) -> bool {
        ts.with_timezone(&Seoul).time() >= self.close_time
    }

    fn confidence(&self, price: Price, ma: Price) -> f64 {
        if ma.is_zero() || self.config.confidence_scale.is_zero() {
            return 0.0;
        }
        let deviation = ((price - ma).abs() / ma) / self.config.confidence_scale;
        deviation.to_f64().unwrap_or(0.0).clamp(0.0, 1.0)
    }
}

#[async_trait]
impl Strategy for Ma1m5mStrategy {
    fn name(&self) -> &str {
        "ma_1m5m"
    }

    fn required_indicators(&self) -> Vec<String> {
        vec![self.sma_name()]
    }

    fn parameter_schema(&self) -> HashMap<String, ParamSpec> {
        HashMap::from([
            (
                "ma_period".to_string(),
                ParamSpec {
                    param_type: ParamType::Integer,
                    default: json!(5),
                    min: Some(2.0),
                    max: Some(60.0),
                    desc: "이동평균 기간 (1분봉 개수)".to_string(),
                },
            ),
            (
                "confidence_scale".to_string(),
                ParamSpec {
                    param_type: ParamType::Decimal,
                    default: json!("0.01"),
                    min: Some(0.0001),
                    max: Some(1.0),
                    desc: "신뢰도 스케일 (괴리율 나눗수)".to_string(),
                },
            ),
            (
                "session_close_time".to_string(),
                ParamSpec {
                    param_type: ParamType::String,
                    default: json!("15:20"),
                    min: None,
                    max: None,
                    desc: "장마감 강제청산 시각 (KST)".to_string(),
                },
            ),
            (
                "min_turnover".to_string(),
                ParamSpec {
                    param_type: ParamType::Decimal,
                    default: json!("30000000000"),
                    min: Some(0.0),
                    max: None,
                    desc: "5일 평균 거래대금 하한 (원)".to_string(),
                },
            ),
        ])
    }

    fn configure(&mut self, params: Value) -> KquantResult<()> {
        let config: Ma1m5mConfig =
            serde_json::from_value(params).map_err(|e| KquantError::Strategy(e.to_string()))?;

        if config.ma_period < 2 {
            return Err(KquantError::Strategy(
                "ma_period must be >= 2".to_string(),
            ));
        }

        self.close_time = Self::parse_close_time(&config.session_close_time);
        self.config = config;
        info!(
            ma_period = self.config.ma_period,
            close_time = %self.config.session_close_time,
            "ma_1m5m configured"
        );
        Ok(())
    }

    async fn analyze(&mut self, snapshot: &StrategySnapshot) -> Option<TradingSignal> {
        // 1분봉에서만 동작
        if snapshot.indicators.timeframe != Timeframe::M1 {
            return None;
        }

        let price = snapshot.candle.as_ref()?.close;
        let ma = snapshot.indicators.get(&self.sma_name())?;
        let holding = self.holdings.get(&snapshot.symbol).cloned();

        // 장마감 강제청산이 다른 조건보다 우선
        if self.config.enable_forced_sell && self.is_session_close(snapshot.ts) {
            return match holding {
                Some(entry) => {
                    self.holdings.remove(&snapshot.symbol);
                    Some(
                        TradingSignal::new(
                            self.name(),
                            snapshot.symbol.clone(),
                            SignalAction::HoldExit,
                            format!(
                                "session close, entry {} at {}",
                                entry.entry_price, entry.entry_ts
                            ),
                        )
                        .with_confidence(1.0),
                    )
                }
                None => None,
            };
        }

        // 거래대금 필터
        if self.config.enable_volume_filter {
            if let Some(turnover) = snapshot.indicators.get("turnover_5d") {
                if turnover < self.config.min_turnover {
                    debug!(symbol = %snapshot.symbol, %turnover, "Below turnover floor, skipped");
                    return None;
                }
            }
        }

        if price > ma {
            if holding.is_none() {
                self.holdings.insert(
                    snapshot.symbol.clone(),
                    Holding {
                        entry_price: price,
                        entry_ts: snapshot.ts,
                    },
                );
                return Some(
                    TradingSignal::new(
                        self.name(),
                        snapshot.symbol.clone(),
                        SignalAction::Buy,
                        format!("close {} above {} {}", price, self.sma_name(), ma),
                    )
                    .with_confidence(self.confidence(price, ma))
                    .with_price(price),
                );
            }
            // 이미 보유 중 → 홀딩
            None
        } else {
            if holding.is_some() {
                self.holdings.remove(&snapshot.symbol);
                return Some(
                    TradingSignal::new(
                        self.name(),
                        snapshot.symbol.clone(),
                        SignalAction::Sell,
                        format!("close {} at/below {} {}", price, self.sma_name(), ma),
                    )
                    .with_confidence(self.confidence(price, ma))
                    .with_price(price),
                );
            }
            None
        }
    }

    async fn on_stop(&mut self) -> KquantResult<()> {
        self.holdings.clear();
        Ok(())
    }
}

register_strategy! {
    id: "ma_1m5m",
    aliases: ["1m5m", "moving_average_1m5m"],
    name: "1분봉-5분평균 교차",
    description: "1분봉 종가와 5분 이동평균 교차 매매, 장마감 강제청산",
    timeframe: "1m",
    type: Ma1m5mStrategy
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kquant_core::{Candle, IndicatorSnapshot};

    fn symbol() -> Symbol {
        Symbol::canonicalize("005930").unwrap()
    }

    /// KST 10:00 (장중)의 UTC 시각
    fn intraday_ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 4, 1, 0, 0).unwrap()
    }

    /// KST 15:20 (장마감)의 UTC 시각
    fn close_ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 4, 6, 20, 0).unwrap()
    }

    fn snapshot(price: Decimal, ma: Decimal, ts: DateTime<Utc>) -> StrategySnapshot {
        let candle = Candle::new(
            symbol(),
            Timeframe::M1,
            ts,
            price,
            price,
            price,
            price,
            dec!(100),
        );
        let mut indicators = IndicatorSnapshot::new(symbol(), Timeframe::M1, ts);
        indicators.insert("sma_5", ma);
        StrategySnapshot {
            symbol: symbol(),
            ts,
            candle: Some(candle),
            indicators,
        }
    }

    fn strategy_without_volume_filter() -> Ma1m5mStrategy {
        let mut strategy = Ma1m5mStrategy::default();
        strategy.config.enable_volume_filter = false;
        strategy
    }

    #[tokio::test]
    async fn test_buy_on_cross_up_then_hold() {
        let mut strategy = strategy_without_volume_filter();

        let signal = strategy
            .analyze(&snapshot(dec!(75100), dec!(75000), intraday_ts()))
            .await
            .expect("buy signal");
        assert_eq!(signal.action, SignalAction::Buy);
        assert!(signal.confidence > 0.0);
        assert_eq!(signal.suggested_price, Some(dec!(75100)));

        // 보유 중 재매수 없음
        assert!(strategy
            .analyze(&snapshot(dec!(75200), dec!(75000), intraday_ts()))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_sell_on_cross_down_only_when_holding() {
        let mut strategy = strategy_without_volume_filter();

        // 미보유 상태에서 하향 교차 → 관망
        assert!(strategy
            .analyze(&snapshot(dec!(74900), dec!(75000), intraday_ts()))
            .await
            .is_none());

        // 매수 후 하향 교차 → 매도
        strategy
            .analyze(&snapshot(dec!(75100), dec!(75000), intraday_ts()))
            .await
            .unwrap();
        let signal = strategy
            .analyze(&snapshot(dec!(74900), dec!(75000), intraday_ts()))
            .await
            .expect("sell signal");
        assert_eq!(signal.action, SignalAction::Sell);
    }

    #[tokio::test]
    async fn test_forced_exit_at_session_close() {
        let mut strategy = strategy_without_volume_filter();

        strategy
            .analyze(&snapshot(dec!(75100), dec!(75000), intraday_ts()))
            .await
            .unwrap();

        // 장마감 시각에는 가격 조건과 무관하게 강제청산
        let signal = strategy
            .analyze(&snapshot(dec!(76000), dec!(75000), close_ts()))
            .await
            .expect("forced exit");
        assert_eq!(signal.action, SignalAction::HoldExit);
        assert!(signal.is_forced_exit());

        // 미보유 시 장마감에도 신호 없음
        assert!(strategy
            .analyze(&snapshot(dec!(76000), dec!(75000), close_ts()))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_volume_filter_skips_thin_symbols() {
        let mut strategy = Ma1m5mStrategy::default();

        let mut snap = snapshot(dec!(75100), dec!(75000), intraday_ts());
        snap.indicators.insert("turnover_5d", dec!(1_000_000_000));

        assert!(strategy.analyze(&snap).await.is_none());

        // 하한 이상이면 매수
        snap.indicators.insert("turnover_5d", dec!(50_000_000_000));
        assert!(strategy.analyze(&snap).await.is_some());
    }

    #[tokio::test]
    async fn test_confidence_scaling() {
        let mut strategy = strategy_without_volume_filter();
        strategy.config.confidence_scale = dec!(0.01);

        // 괴리율 0.1333% / 1% ≈ 0.1333
        let signal = strategy
            .analyze(&snapshot(dec!(75100), dec!(75000), intraday_ts()))
            .await
            .unwrap();
        assert!((signal.confidence - 0.1333).abs() < 0.001);

        // 큰 괴리는 1.0으로 클램프
        let mut strategy = strategy_without_volume_filter();
        let signal = strategy
            .analyze(&snapshot(dec!(90000), dec!(75000), intraday_ts()))
            .await
            .unwrap();
        assert_eq!(signal.confidence, 1.0);
    }

    #[test]
    fn test_required_indicators_follow_period() {
        let mut strategy = Ma1m5mStrategy::default();
        assert_eq!(strategy.required_indicators(), vec!["sma_5".to_string()]);

        strategy
            .configure(json!({"ma_period": 10, "enable_volume_filter": false}))
            .unwrap();
        assert_eq!(strategy.required_indicators(), vec!["sma_10".to_string()]);
    }
}
