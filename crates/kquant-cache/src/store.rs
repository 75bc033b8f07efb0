//! 캐시 저장소 인터페이스.

use async_trait::async_trait;
use kquant_core::{
    Candle, Fill, IndicatorSnapshot, KquantResult, MarketTick, Position, Price, Quantity, Symbol,
    Timeframe,
};
use serde::{Deserialize, Serialize};

/// 호가 한 사이드.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSide {
    /// (가격, 수량) 레벨. 매수는 내림차순, 매도는 오름차순 정렬.
    pub levels: Vec<(Price, Quantity)>,
}

/// 시장 데이터 저장소 인터페이스.
///
/// 키 단위 쓰기는 원자적입니다. 여러 키에 걸친 갱신은 원자적이지
/// 않으므로 소비자는 키 간 일관성을 가정해서는 안 됩니다.
#[async_trait]
pub trait MarketStore: Send + Sync {
    /// 최신 틱을 저장합니다 (TTL 24시간).
    async fn set_latest_tick(&self, tick: &MarketTick) -> KquantResult<()>;

    /// 최신 틱을 조회합니다.
    async fn latest_tick(&self, symbol: &Symbol) -> KquantResult<Option<MarketTick>>;

    /// 마감된 캔들을 링에 추가합니다.
    ///
    /// 최신이 머리에 오며, 크기 상한 적용은 쓰기의 일부입니다
    /// (추가 후 별도 트림이 아님).
    async fn push_candle(&self, candle: &Candle, cap: usize) -> KquantResult<()>;

    /// 링에서 최신 `limit`개의 캔들을 반환합니다 (최신 먼저).
    async fn candles(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        limit: usize,
    ) -> KquantResult<Vec<Candle>>;

    /// 링 머리의 캔들을 반환합니다.
    async fn head_candle(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> KquantResult<Option<Candle>>;

    /// 지표 스냅샷을 저장합니다 (TTL 1시간).
    async fn set_indicators(&self, snapshot: &IndicatorSnapshot) -> KquantResult<()>;

    /// 지표 스냅샷을 조회합니다.
    async fn indicators(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> KquantResult<Option<IndicatorSnapshot>>;

    /// 포지션을 저장합니다.
    async fn set_position(&self, position: &Position) -> KquantResult<()>;

    /// 포지션을 조회합니다.
    async fn position(&self, symbol: &Symbol) -> KquantResult<Option<Position>>;

    /// 호가 한 사이드를 저장합니다 (TTL 5분).
    async fn set_orderbook(
        &self,
        symbol: &Symbol,
        side: &str,
        book: &OrderBookSide,
    ) -> KquantResult<()>;

    /// 호가 한 사이드를 조회합니다.
    async fn orderbook(&self, symbol: &Symbol, side: &str) -> KquantResult<Option<OrderBookSide>>;

    /// 최근 체결을 추가합니다 (크기 상한 100, 쓰기의 일부로 적용).
    async fn push_trade(&self, fill: &Fill) -> KquantResult<()>;

    /// 최근 체결을 반환합니다 (최신 먼저).
    async fn trades(&self, symbol: &Symbol) -> KquantResult<Vec<Fill>>;

    /// 임의 키에 JSON 값을 저장합니다 (주문 큐 미러 등 내구 상태용).
    async fn set_json(&self, key: &str, json: &str, ttl_secs: Option<u64>) -> KquantResult<()>;

    /// 임의 키의 JSON 값을 조회합니다.
    async fn get_json(&self, key: &str) -> KquantResult<Option<String>>;

    /// 임의 키를 삭제합니다.
    async fn delete(&self, key: &str) -> KquantResult<bool>;

    /// 저장소 상태를 확인합니다. 시작 시 실패는 기동 중단 사유입니다.
    async fn health_check(&self) -> KquantResult<bool>;
}
