//! 인메모리 캐시 구현.
//!
//! Redis 없이 단일 프로세스로 구동하거나 테스트할 때 사용합니다.
//! 항목은 JSON 문자열로 보관하며 근사 바이트 크기로 메모리 예산을
//! 집행합니다. 퇴거는 만료(TTL) 우선, 그다음 LRU 순서입니다.

use crate::keys;
use crate::store::{MarketStore, OrderBookSide};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use kquant_core::{
    Candle, Fill, IndicatorSnapshot, KquantError, KquantResult, MarketTick, Position, Symbol,
    Timeframe,
};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

struct Entry {
    json: String,
    expires_at: Option<DateTime<Utc>>,
    last_access: DateTime<Utc>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|e| e <= now).unwrap_or(false)
    }

    fn size(&self, key: &str) -> usize {
        key.len() + self.json.len()
    }
}

/// 인메모리 캐시.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    /// 메모리 예산 (바이트)
    budget_bytes: usize,
}

impl MemoryStore {
    /// 기본 예산(150MB)으로 생성합니다.
    pub fn new() -> Self {
        Self::with_budget_mb(150)
    }

    /// 지정한 예산(MB)으로 생성합니다.
    pub fn with_budget_mb(budget_mb: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            budget_bytes: budget_mb * 1024 * 1024,
        }
    }

    fn put<T: Serialize>(&self, key: String, value: &T, ttl_secs: Option<u64>) -> KquantResult<()> {
        let json = serde_json::to_string(value)
            .map_err(|e| KquantError::Serialization(e.to_string()))?;
        self.put_raw(key, json, ttl_secs);
        Ok(())
    }

    fn put_raw(&self, key: String, json: String, ttl_secs: Option<u64>) {
        let now = Utc::now();
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.insert(
            key,
            Entry {
                json,
                expires_at: ttl_secs.map(|s| now + Duration::seconds(s as i64)),
                last_access: now,
            },
        );
        self.enforce_budget(&mut entries, now);
    }

    fn fetch<T: DeserializeOwned>(&self, key: &str) -> KquantResult<Option<T>> {
        match self.fetch_raw(key) {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| KquantError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    fn fetch_raw(&self, key: &str) -> Option<String> {
        let now = Utc::now();
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get_mut(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => {
                entry.last_access = now;
                Some(entry.json.clone())
            }
            None => None,
        }
    }

    /// 예산 초과 시 퇴거: 만료 항목 먼저, 그다음 LRU.
    fn enforce_budget(&self, entries: &mut HashMap<String, Entry>, now: DateTime<Utc>) {
        let mut used: usize = entries.iter().map(|(k, e)| e.size(k)).sum();
        if used <= self.budget_bytes {
            return;
        }

        // 1단계: 만료된 항목 제거
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            if let Some(entry) = entries.remove(&key) {
                used = used.saturating_sub(entry.size(&key));
            }
        }

        // 2단계: LRU 순서로 제거
        while used > self.budget_bytes {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    if let Some(entry) = entries.remove(&key) {
                        used = used.saturating_sub(entry.size(&key));
                    }
                }
                None => break,
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketStore for MemoryStore {
    async fn set_latest_tick(&self, tick: &MarketTick) -> KquantResult<()> {
        self.put(keys::market(&tick.symbol), tick, Some(keys::MARKET_TTL_SECS))
    }

    async fn latest_tick(&self, symbol: &Symbol) -> KquantResult<Option<MarketTick>> {
        self.fetch(&keys::market(symbol))
    }

    async fn push_candle(&self, candle: &Candle, cap: usize) -> KquantResult<()> {
        let key = keys::candles(&candle.symbol, candle.timeframe);
        let mut ring: Vec<Candle> = self.fetch(&key)?.unwrap_or_default();

        // 같은 버킷이면 머리를 교체, 아니면 머리에 삽입
        if ring.first().map(|c| c.ts == candle.ts).unwrap_or(false) {
            ring[0] = candle.clone();
        } else {
            ring.insert(0, candle.clone());
        }
        ring.truncate(cap);

        self.put(key, &ring, None)
    }

    async fn candles(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        limit: usize,
    ) -> KquantResult<Vec<Candle>> {
        let ring: Vec<Candle> = self
            .fetch(&keys::candles(symbol, timeframe))?
            .unwrap_or_default();
        Ok(ring.into_iter().take(limit).collect())
    }

    async fn head_candle(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> KquantResult<Option<Candle>> {
        let ring: Vec<Candle> = self
            .fetch(&keys::candles(symbol, timeframe))?
            .unwrap_or_default();
        Ok(ring.into_iter().next())
    }

    async fn set_indicators(&self, snapshot: &IndicatorSnapshot) -> KquantResult<()> {
        self.put(
            keys::indicators(&snapshot.symbol, snapshot.timeframe),
            snapshot,
            Some(keys::INDICATORS_TTL_SECS),
        )
    }

    async fn indicators(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> KquantResult<Option<IndicatorSnapshot>> {
        self.fetch(&keys::indicators(symbol, timeframe))
    }

    async fn set_position(&self, position: &Position) -> KquantResult<()> {
        self.put(keys::position(&position.symbol), position, None)
    }

    async fn position(&self, symbol: &Symbol) -> KquantResult<Option<Position>> {
        self.fetch(&keys::position(symbol))
    }

    async fn set_orderbook(
        &self,
        symbol: &Symbol,
        side: &str,
        book: &OrderBookSide,
    ) -> KquantResult<()> {
        self.put(
            keys::orderbook(symbol, side),
            book,
            Some(keys::ORDERBOOK_TTL_SECS),
        )
    }

    async fn orderbook(&self, symbol: &Symbol, side: &str) -> KquantResult<Option<OrderBookSide>> {
        self.fetch(&keys::orderbook(symbol, side))
    }

    async fn push_trade(&self, fill: &Fill) -> KquantResult<()> {
        let key = keys::trades(&fill.symbol);
        let mut trades: Vec<Fill> = self.fetch(&key)?.unwrap_or_default();
        trades.insert(0, fill.clone());
        trades.truncate(keys::TRADES_CAP);
        self.put(key, &trades, None)
    }

    async fn trades(&self, symbol: &Symbol) -> KquantResult<Vec<Fill>> {
        Ok(self.fetch(&keys::trades(symbol))?.unwrap_or_default())
    }

    async fn set_json(&self, key: &str, json: &str, ttl_secs: Option<u64>) -> KquantResult<()> {
        self.put_raw(key.to_string(), json.to_string(), ttl_secs);
        Ok(())
    }

    async fn get_json(&self, key: &str) -> KquantResult<Option<String>> {
        Ok(self.fetch_raw(key))
    }

    async fn delete(&self, key: &str) -> KquantResult<bool> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        Ok(entries.remove(key).is_some())
    }

    async fn health_check(&self) -> KquantResult<bool> {
        Ok(true)
    }
}
