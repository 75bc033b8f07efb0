//! Strategy trait 정의.
//!
//! 전략은 엔진이 소유하는 인스턴스이며, 종목별 보유 상태 등 내부
//! 상태는 인스턴스에 한정됩니다. 전략 간 상태 공유는 없습니다.

use async_trait::async_trait;
use kquant_core::{Candle, IndicatorSnapshot, KquantResult, Symbol, TradingSignal};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// 파라미터 타입.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    /// 정수
    Integer,
    /// 십진수
    Decimal,
    /// 불리언
    Boolean,
    /// 문자열
    String,
}

/// 파라미터 명세.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    /// 타입
    pub param_type: ParamType,
    /// 기본값
    pub default: Value,
    /// 최솟값 (수치 타입)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// 최댓값 (수치 타입)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// 설명
    pub desc: String,
}

/// analyze에 전달되는 입력 스냅샷.
#[derive(Debug, Clone)]
pub struct StrategySnapshot {
    /// 종목 코드
    pub symbol: Symbol,
    /// 기준 시각 (캔들 버킷 시작)
    pub ts: chrono::DateTime<chrono::Utc>,
    /// 기준 캔들 (링 머리)
    pub candle: Option<Candle>,
    /// 지표 스냅샷
    pub indicators: IndicatorSnapshot,
}

/// 트레이딩 전략 plugin trait.
///
/// 모든 전략은 엔진에서 로드되기 위해 이 trait를 구현해야 합니다.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// 전략 이름 (고유).
    fn name(&self) -> &str;

    /// 엔진이 호출 전에 존재를 보장해야 하는 지표 이름들.
    fn required_indicators(&self) -> Vec<String>;

    /// 파라미터 명세 (검증 및 UI용).
    fn parameter_schema(&self) -> HashMap<String, ParamSpec>;

    /// JSON 파라미터로 전략을 설정합니다.
    fn configure(&mut self, params: Value) -> KquantResult<()>;

    /// 지표 갱신 시 호출됩니다. 매매 신호가 있으면 반환합니다.
    async fn analyze(&mut self, snapshot: &StrategySnapshot) -> Option<TradingSignal>;

    /// 활성화 훅.
    async fn on_start(&mut self) -> KquantResult<()> {
        Ok(())
    }

    /// 비활성화 훅.
    async fn on_stop(&mut self) -> KquantResult<()> {
        Ok(())
    }
}
