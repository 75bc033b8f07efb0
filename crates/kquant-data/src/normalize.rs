//! 소스별 필드 정규화.
//!
//! 소스마다 다른 필드 이름과 문자열 숫자 표기를 `MarketTick`으로
//! 변환합니다. 필수 필드가 채워지지 않는 입력은 어댑터 단계에서
//! 거부됩니다.

use crate::error::{DataError, DataResult};
use chrono::{DateTime, Utc};
use kquant_core::{MarketTick, Price, Symbol, TickSource};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;

/// 소스에서 막 수신한 원시 틱.
///
/// 필드 이름은 소스별 매핑을 거친 뒤의 공통 표기입니다.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTick {
    /// 소스 표기 종목 코드 (예: "005930.KS", "A005930")
    pub symbol: String,
    /// 체결 시각 (epoch millis 또는 RFC3339)
    pub ts: serde_json::Value,
    /// 현재가 (문자열 허용)
    pub close: Option<String>,
    /// 시가
    #[serde(default)]
    pub open: Option<String>,
    /// 고가
    #[serde(default)]
    pub high: Option<String>,
    /// 저가
    #[serde(default)]
    pub low: Option<String>,
    /// 거래량
    #[serde(default)]
    pub volume: Option<String>,
}

/// 소스별 필드 이름 매핑이 적용된 정규화기.
pub struct Normalizer {
    source: TickSource,
    /// 소스 필드 이름 → 공통 필드 이름
    field_map: HashMap<String, String>,
}

impl Normalizer {
    /// 정규화기를 생성합니다.
    pub fn new(source: TickSource) -> Self {
        Self {
            source,
            field_map: HashMap::new(),
        }
    }

    /// 소스 필드 이름 매핑을 추가합니다 (예: "stck_prpr" → "close").
    pub fn with_field(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.field_map.insert(from.into(), to.into());
        self
    }

    /// 소스 JSON 객체의 필드 이름을 공통 표기로 바꿉니다.
    pub fn rename_fields(&self, raw: &serde_json::Map<String, serde_json::Value>) -> serde_json::Map<String, serde_json::Value> {
        raw.iter()
            .map(|(k, v)| {
                let key = self.field_map.get(k).cloned().unwrap_or_else(|| k.clone());
                (key, v.clone())
            })
            .collect()
    }

    /// 원시 틱을 정규화된 `MarketTick`으로 변환합니다.
    ///
    /// 필수 필드(symbol, ts, close)가 없거나 해석 불가능하면 거부합니다.
    pub fn normalize(&self, raw: &RawTick) -> DataResult<MarketTick> {
        let symbol = Symbol::canonicalize(&raw.symbol)
            .ok_or_else(|| DataError::Parse(format!("invalid symbol: {}", raw.symbol)))?;

        let ts = Self::parse_ts(&raw.ts)?;

        let close = raw
            .close
            .as_deref()
            .ok_or_else(|| DataError::Parse("missing close".to_string()))
            .and_then(Self::parse_decimal)?;

        let volume = match raw.volume.as_deref() {
            Some(v) => Self::parse_decimal(v)?,
            None => Decimal::ZERO,
        };

        Ok(MarketTick {
            symbol,
            ts,
            open: Self::parse_opt(&raw.open)?,
            high: Self::parse_opt(&raw.high)?,
            low: Self::parse_opt(&raw.low)?,
            close,
            volume,
            source: self.source,
        })
    }

    fn parse_opt(value: &Option<String>) -> DataResult<Option<Price>> {
        match value.as_deref() {
            Some(s) => Self::parse_decimal(s).map(Some),
            None => Ok(None),
        }
    }

    fn parse_decimal(s: &str) -> DataResult<Decimal> {
        // 천 단위 구분자 제거
        let cleaned = s.replace(',', "");
        Decimal::from_str(cleaned.trim())
            .map_err(|e| DataError::Parse(format!("invalid number {:?}: {}", s, e)))
    }

    fn parse_ts(value: &serde_json::Value) -> DataResult<DateTime<Utc>> {
        match value {
            serde_json::Value::Number(n) => {
                let millis = n
                    .as_i64()
                    .ok_or_else(|| DataError::Parse(format!("invalid ts: {}", n)))?;
                DateTime::<Utc>::from_timestamp_millis(millis)
                    .ok_or_else(|| DataError::Parse(format!("ts out of range: {}", millis)))
            }
            serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| DataError::Parse(format!("invalid ts {:?}: {}", s, e))),
            other => Err(DataError::Parse(format!("unsupported ts value: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn raw(symbol: &str, close: Option<&str>) -> RawTick {
        RawTick {
            symbol: symbol.to_string(),
            ts: serde_json::json!(1_741_050_000_000i64),
            close: close.map(|s| s.to_string()),
            open: None,
            high: None,
            low: None,
            volume: Some("1,234".to_string()),
        }
    }

    #[test]
    fn test_normalize_strips_suffix_and_parses_numbers() {
        let normalizer = Normalizer::new(TickSource::WebQuote);
        let tick = normalizer.normalize(&raw("005930.KS", Some("75,000"))).unwrap();

        assert_eq!(tick.symbol.as_str(), "005930");
        assert_eq!(tick.close, dec!(75000));
        assert_eq!(tick.volume, dec!(1234));
        assert_eq!(tick.source, TickSource::WebQuote);
    }

    #[test]
    fn test_normalize_rejects_missing_close() {
        let normalizer = Normalizer::new(TickSource::WebQuote);
        assert!(normalizer.normalize(&raw("005930", None)).is_err());
    }

    #[test]
    fn test_normalize_rejects_bad_symbol() {
        let normalizer = Normalizer::new(TickSource::WebQuote);
        assert!(normalizer.normalize(&raw("??", Some("100"))).is_err());
    }

    #[test]
    fn test_rfc3339_timestamp() {
        let normalizer = Normalizer::new(TickSource::BrokerRest);
        let mut tick = raw("005930", Some("75000"));
        tick.ts = serde_json::json!("2025-03-04T09:31:00+09:00");

        let normalized = normalizer.normalize(&tick).unwrap();
        assert_eq!(normalized.ts.to_rfc3339(), "2025-03-04T00:31:00+00:00");
    }

    #[test]
    fn test_field_renaming() {
        let normalizer = Normalizer::new(TickSource::BrokerWebsocket)
            .with_field("stck_prpr", "close")
            .with_field("acml_vol", "volume");

        let mut source_fields = serde_json::Map::new();
        source_fields.insert("stck_prpr".to_string(), serde_json::json!("75000"));
        source_fields.insert("acml_vol".to_string(), serde_json::json!("100"));

        let renamed = normalizer.rename_fields(&source_fields);
        assert!(renamed.contains_key("close"));
        assert!(renamed.contains_key("volume"));
        assert!(!renamed.contains_key("stck_prpr"));
    }
}
