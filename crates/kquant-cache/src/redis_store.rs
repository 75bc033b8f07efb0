//! Redis 캐시 구현.
//!
//! 자주 접근하는 시장 데이터에 대한 공유 캐시 레이어를 제공합니다.
//! 캔들 링은 LPUSH+LTRIM을 원자적 파이프라인으로 묶어 크기 상한이
//! 쓰기의 일부로 적용되도록 합니다.

use crate::keys;
use crate::store::{MarketStore, OrderBookSide};
use async_trait::async_trait;
use kquant_core::{
    Candle, Fill, IndicatorSnapshot, KquantError, KquantResult, MarketTick, Position, Symbol,
    Timeframe,
};
use redis::{aio::MultiplexedConnection, AsyncCommands};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Redis 연결 래퍼.
#[derive(Clone)]
pub struct RedisStore {
    connection: Arc<RwLock<MultiplexedConnection>>,
}

impl RedisStore {
    /// 새로운 Redis 캐시 연결을 생성합니다.
    ///
    /// 시작 시 연결 실패는 기동 중단 사유입니다.
    pub async fn connect(url: &str) -> KquantResult<Self> {
        info!("Connecting to Redis...");

        let client = redis::Client::open(url).map_err(|e| KquantError::Cache(e.to_string()))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| KquantError::Cache(e.to_string()))?;

        info!("Redis connection established");

        Ok(Self {
            connection: Arc::new(RwLock::new(connection)),
        })
    }

    async fn set_value<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: Option<u64>,
    ) -> KquantResult<()> {
        let json =
            serde_json::to_string(value).map_err(|e| KquantError::Serialization(e.to_string()))?;
        let mut conn = self.connection.write().await;
        match ttl_secs {
            Some(ttl) => {
                let _: () = conn
                    .set_ex(key, json, ttl)
                    .await
                    .map_err(|e| KquantError::Cache(e.to_string()))?;
            }
            None => {
                let _: () = conn
                    .set(key, json)
                    .await
                    .map_err(|e| KquantError::Cache(e.to_string()))?;
            }
        }
        Ok(())
    }

    async fn get_value<T: DeserializeOwned>(&self, key: &str) -> KquantResult<Option<T>> {
        let mut conn = self.connection.write().await;
        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| KquantError::Cache(e.to_string()))?;

        match value {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| KquantError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl MarketStore for RedisStore {
    async fn set_latest_tick(&self, tick: &MarketTick) -> KquantResult<()> {
        self.set_value(&keys::market(&tick.symbol), tick, Some(keys::MARKET_TTL_SECS))
            .await
    }

    async fn latest_tick(&self, symbol: &Symbol) -> KquantResult<Option<MarketTick>> {
        self.get_value(&keys::market(symbol)).await
    }

    async fn push_candle(&self, candle: &Candle, cap: usize) -> KquantResult<()> {
        let key = keys::candles(&candle.symbol, candle.timeframe);
        let json =
            serde_json::to_string(candle).map_err(|e| KquantError::Serialization(e.to_string()))?;

        // LPUSH + LTRIM을 하나의 원자적 파이프라인으로 실행
        let mut conn = self.connection.write().await;
        let _: () = redis::pipe()
            .atomic()
            .lpush(&key, json)
            .ltrim(&key, 0, cap.saturating_sub(1) as isize)
            .query_async(&mut *conn)
            .await
            .map_err(|e| KquantError::Cache(e.to_string()))?;
        Ok(())
    }

    async fn candles(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        limit: usize,
    ) -> KquantResult<Vec<Candle>> {
        let key = keys::candles(symbol, timeframe);
        let mut conn = self.connection.write().await;
        let entries: Vec<String> = conn
            .lrange(&key, 0, limit.saturating_sub(1) as isize)
            .await
            .map_err(|e| KquantError::Cache(e.to_string()))?;

        entries
            .iter()
            .map(|json| {
                serde_json::from_str(json).map_err(|e| KquantError::Serialization(e.to_string()))
            })
            .collect()
    }

    async fn head_candle(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> KquantResult<Option<Candle>> {
        let key = keys::candles(symbol, timeframe);
        let mut conn = self.connection.write().await;
        let head: Option<String> = conn
            .lindex(&key, 0)
            .await
            .map_err(|e| KquantError::Cache(e.to_string()))?;

        match head {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| KquantError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    async fn set_indicators(&self, snapshot: &IndicatorSnapshot) -> KquantResult<()> {
        self.set_value(
            &keys::indicators(&snapshot.symbol, snapshot.timeframe),
            snapshot,
            Some(keys::INDICATORS_TTL_SECS),
        )
        .await
    }

    async fn indicators(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> KquantResult<Option<IndicatorSnapshot>> {
        self.get_value(&keys::indicators(symbol, timeframe)).await
    }

    async fn set_position(&self, position: &Position) -> KquantResult<()> {
        self.set_value(&keys::position(&position.symbol), position, None)
            .await
    }

    async fn position(&self, symbol: &Symbol) -> KquantResult<Option<Position>> {
        self.get_value(&keys::position(symbol)).await
    }

    async fn set_orderbook(
        &self,
        symbol: &Symbol,
        side: &str,
        book: &OrderBookSide,
    ) -> KquantResult<()> {
        self.set_value(
            &keys::orderbook(symbol, side),
            book,
            Some(keys::ORDERBOOK_TTL_SECS),
        )
        .await
    }

    async fn orderbook(&self, symbol: &Symbol, side: &str) -> KquantResult<Option<OrderBookSide>> {
        self.get_value(&keys::orderbook(symbol, side)).await
    }

    async fn push_trade(&self, fill: &Fill) -> KquantResult<()> {
        let key = keys::trades(&fill.symbol);
        let json =
            serde_json::to_string(fill).map_err(|e| KquantError::Serialization(e.to_string()))?;

        let mut conn = self.connection.write().await;
        let _: () = redis::pipe()
            .atomic()
            .lpush(&key, json)
            .ltrim(&key, 0, keys::TRADES_CAP as isize - 1)
            .query_async(&mut *conn)
            .await
            .map_err(|e| KquantError::Cache(e.to_string()))?;
        Ok(())
    }

    async fn trades(&self, symbol: &Symbol) -> KquantResult<Vec<Fill>> {
        let key = keys::trades(symbol);
        let mut conn = self.connection.write().await;
        let entries: Vec<String> = conn
            .lrange(&key, 0, keys::TRADES_CAP as isize - 1)
            .await
            .map_err(|e| KquantError::Cache(e.to_string()))?;

        entries
            .iter()
            .map(|json| {
                serde_json::from_str(json).map_err(|e| KquantError::Serialization(e.to_string()))
            })
            .collect()
    }

    async fn set_json(&self, key: &str, json: &str, ttl_secs: Option<u64>) -> KquantResult<()> {
        let mut conn = self.connection.write().await;
        match ttl_secs {
            Some(ttl) => {
                let _: () = conn
                    .set_ex(key, json, ttl)
                    .await
                    .map_err(|e| KquantError::Cache(e.to_string()))?;
            }
            None => {
                let _: () = conn
                    .set(key, json)
                    .await
                    .map_err(|e| KquantError::Cache(e.to_string()))?;
            }
        }
        Ok(())
    }

    async fn get_json(&self, key: &str) -> KquantResult<Option<String>> {
        let mut conn = self.connection.write().await;
        conn.get(key)
            .await
            .map_err(|e| KquantError::Cache(e.to_string()))
    }

    async fn delete(&self, key: &str) -> KquantResult<bool> {
        let mut conn = self.connection.write().await;
        let deleted: i64 = conn
            .del(key)
            .await
            .map_err(|e| KquantError::Cache(e.to_string()))?;
        Ok(deleted > 0)
    }

    async fn health_check(&self) -> KquantResult<bool> {
        let mut conn = self.connection.write().await;
        let result: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| KquantError::Cache(e.to_string()))?;
        Ok(result == "PONG")
    }
}
