//! 시장 데이터 타입 및 구조체.
//!
//! 이 모듈은 시장 데이터 관련 타입을 정의합니다:
//! - `TickSource` - 데이터 출처
//! - `MarketTick` - 어댑터가 방출하는 정규화된 시세 스냅샷
//! - `Candle` - OHLCV 캔들 데이터

use crate::types::{Price, Quantity, Symbol, Timeframe};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 시장 데이터 출처.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickSource {
    /// 증권사 실시간 WebSocket
    BrokerWebsocket,
    /// 증권사 REST 폴링
    BrokerRest,
    /// 포털 시세 폴링
    WebQuote,
    /// 시뮬레이션/백필
    Synthetic,
}

impl std::fmt::Display for TickSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TickSource::BrokerWebsocket => write!(f, "broker_ws"),
            TickSource::BrokerRest => write!(f, "broker_rest"),
            TickSource::WebQuote => write!(f, "web_quote"),
            TickSource::Synthetic => write!(f, "synthetic"),
        }
    }
}

/// 어댑터가 방출하는 정규화된 시세 스냅샷.
///
/// 불변 값입니다. 파이프라인이 소비한 뒤에는 코어에 보존되지 않습니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketTick {
    /// 종목 코드
    pub symbol: Symbol,
    /// 체결 시각 (UTC)
    pub ts: DateTime<Utc>,
    /// 시가 (소스가 제공하는 경우)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open: Option<Price>,
    /// 고가 (소스가 제공하는 경우)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high: Option<Price>,
    /// 저가 (소스가 제공하는 경우)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low: Option<Price>,
    /// 현재가/종가
    pub close: Price,
    /// 거래량
    pub volume: Quantity,
    /// 데이터 출처
    pub source: TickSource,
}

impl MarketTick {
    /// 종가만 있는 틱을 생성합니다.
    pub fn quote(symbol: Symbol, ts: DateTime<Utc>, close: Price, volume: Quantity, source: TickSource) -> Self {
        Self {
            symbol,
            ts,
            open: None,
            high: None,
            low: None,
            close,
            volume,
            source,
        }
    }

    /// OHLC가 모두 채워져 있는지 확인합니다.
    pub fn has_full_ohlc(&self) -> bool {
        self.open.is_some() && self.high.is_some() && self.low.is_some()
    }
}

/// OHLCV 캔들 데이터.
///
/// 불변 조건: `low ≤ open, close ≤ high`, `volume ≥ 0`,
/// `ts`는 타임프레임 버킷 경계에 정렬되어 있습니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// 종목 코드
    pub symbol: Symbol,
    /// 타임프레임
    pub timeframe: Timeframe,
    /// 버킷 시작 시각 (경계 정렬)
    pub ts: DateTime<Utc>,
    /// 시가
    pub open: Price,
    /// 고가
    pub high: Price,
    /// 저가
    pub low: Price,
    /// 종가
    pub close: Price,
    /// 거래량
    pub volume: Quantity,
}

impl Candle {
    /// 새 캔들을 생성합니다. 타임스탬프는 버킷 경계로 정렬됩니다.
    pub fn new(
        symbol: Symbol,
        timeframe: Timeframe,
        ts: DateTime<Utc>,
        open: Price,
        high: Price,
        low: Price,
        close: Price,
        volume: Quantity,
    ) -> Self {
        Self {
            symbol,
            timeframe,
            ts: timeframe.align(ts),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// 첫 틱으로부터 진행 중 캔들을 시작합니다.
    pub fn open_from_tick(tick: &MarketTick, timeframe: Timeframe) -> Self {
        let price = tick.close;
        Self::new(
            tick.symbol.clone(),
            timeframe,
            tick.ts,
            tick.open.unwrap_or(price),
            tick.high.unwrap_or(price),
            tick.low.unwrap_or(price),
            price,
            tick.volume,
        )
    }

    /// 같은 버킷의 후속 틱을 반영합니다.
    pub fn absorb(&mut self, tick: &MarketTick) {
        let price = tick.close;
        if let Some(high) = tick.high {
            self.high = self.high.max(high);
        }
        self.high = self.high.max(price);
        if let Some(low) = tick.low {
            self.low = self.low.min(low);
        }
        self.low = self.low.min(price);
        self.close = price;
        self.volume += tick.volume;
    }

    /// OHLC 일관성을 검사합니다.
    pub fn is_consistent(&self) -> bool {
        self.low <= self.open.min(self.close)
            && self.high >= self.open.max(self.close)
            && self.volume >= Decimal::ZERO
    }

    /// 양봉(종가 > 시가)인지 확인합니다.
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    /// 캔들 범위(고가 - 저가)를 반환합니다.
    pub fn range(&self) -> Decimal {
        self.high - self.low
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

    #[test]
    fn test_candle_from_tick_and_absorb() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 4, 0, 31, 12).unwrap();
        let tick = MarketTick::quote(symbol(), ts, dec!(75000), dec!(100), TickSource::BrokerWebsocket);

        let mut candle = Candle::open_from_tick(&tick, Timeframe::M1);
        assert_eq!(candle.ts, Utc.with_ymd_and_hms(2025, 3, 4, 0, 31, 0).unwrap());
        assert_eq!(candle.open, dec!(75000));

        let tick2 = MarketTick::quote(
            symbol(),
            ts + chrono::Duration::seconds(20),
            dec!(75100),
            dec!(50),
            TickSource::BrokerWebsocket,
        );
        candle.absorb(&tick2);

        assert_eq!(candle.high, dec!(75100));
        assert_eq!(candle.low, dec!(75000));
        assert_eq!(candle.close, dec!(75100));
        assert_eq!(candle.volume, dec!(150));
        assert!(candle.is_consistent());
    }

    #[test]
    fn test_candle_consistency() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 4, 0, 31, 0).unwrap();
        let candle = Candle::new(
            symbol(),
            Timeframe::M1,
            ts,
            dec!(75000),
            dec!(74000), // high < open
            dec!(74000),
            dec!(74500),
            dec!(10),
        );
        assert!(!candle.is_consistent());
    }
}
