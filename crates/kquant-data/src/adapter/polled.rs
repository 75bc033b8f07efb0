//! 폴링 어댑터.
//!
//! 종목별로 설정된 간격마다 HTTP 소스를 조회합니다. 조회 시점은
//! ±10% 지터를 적용해 동기화된 버스트를 피합니다.

use crate::adapter::{AdapterHealth, MarketAdapter};
use crate::error::{DataError, DataResult};
use async_trait::async_trait;
use kquant_core::{MarketTick, Symbol};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 시세 조회 구현.
///
/// 소스별 엔드포인트와 응답 해석은 외부 협력자이며, 어댑터는
/// 정규화된 틱만 받습니다.
#[async_trait]
pub trait QuoteFetcher: Send + Sync + 'static {
    /// 한 종목의 현재 시세를 조회합니다.
    async fn fetch(&self, client: &reqwest::Client, symbol: &Symbol) -> DataResult<MarketTick>;
}

/// 폴링 어댑터 설정.
#[derive(Debug, Clone)]
pub struct PolledConfig {
    /// 종목당 폴링 간격
    pub interval: Duration,
    /// 연결 타임아웃
    pub connect_timeout: Duration,
    /// 읽기 타임아웃
    pub read_timeout: Duration,
}

impl Default for PolledConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
        }
    }
}

/// 폴링 어댑터.
pub struct PolledAdapter {
    name: String,
    config: PolledConfig,
    client: reqwest::Client,
    fetcher: Arc<dyn QuoteFetcher>,
    tick_tx: mpsc::Sender<MarketTick>,
    health_tx: mpsc::Sender<AdapterHealth>,
    pollers: HashMap<Symbol, CancellationToken>,
}

impl PolledAdapter {
    /// 새 폴링 어댑터를 생성합니다.
    pub fn new(
        name: impl Into<String>,
        config: PolledConfig,
        fetcher: Arc<dyn QuoteFetcher>,
        tick_tx: mpsc::Sender<MarketTick>,
        health_tx: mpsc::Sender<AdapterHealth>,
    ) -> DataResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .build()
            .map_err(|e| DataError::Http(e.to_string()))?;

        Ok(Self {
            name: name.into(),
            config,
            client,
            fetcher,
            tick_tx,
            health_tx,
            pollers: HashMap::new(),
        })
    }

    /// 간격에 ±10% 지터를 적용합니다.
    fn jittered(interval: Duration) -> Duration {
        let base = interval.as_millis() as f64;
        let factor = rand::thread_rng().gen_range(0.9..=1.1);
        Duration::from_millis((base * factor) as u64)
    }
}

#[async_trait]
impl MarketAdapter for PolledAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> DataResult<()> {
        // 폴링 어댑터는 상시 연결이 없음. 구독 시 폴러가 시작됩니다.
        Ok(())
    }

    async fn subscribe(&mut self, symbol: &Symbol) -> DataResult<()> {
        if self.pollers.contains_key(symbol) {
            return Ok(());
        }

        let token = CancellationToken::new();
        self.pollers.insert(symbol.clone(), token.clone());

        let client = self.client.clone();
        let fetcher = Arc::clone(&self.fetcher);
        let tick_tx = self.tick_tx.clone();
        let health_tx = self.health_tx.clone();
        let interval = self.config.interval;
        let symbol = symbol.clone();
        let adapter_name = self.name.clone();

        tokio::spawn(async move {
            debug!(adapter = %adapter_name, symbol = %symbol, "Poller started");
            loop {
                let delay = PolledAdapter::jittered(interval);
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {
                        match fetcher.fetch(&client, &symbol).await {
                            Ok(tick) => {
                                let _ = health_tx.send(AdapterHealth::Heartbeat).await;
                                if tick_tx.send(tick).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(adapter = %adapter_name, symbol = %symbol, error = %e, "Poll failed");
                            }
                        }
                    }
                }
            }
            debug!(adapter = %adapter_name, symbol = %symbol, "Poller stopped");
        });

        Ok(())
    }

    async fn unsubscribe(&mut self, symbol: &Symbol) -> DataResult<()> {
        if let Some(token) = self.pollers.remove(symbol) {
            token.cancel();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_within_ten_percent() {
        let interval = Duration::from_millis(1000);
        for _ in 0..100 {
            let jittered = PolledAdapter::jittered(interval);
            assert!(jittered >= Duration::from_millis(900));
            assert!(jittered <= Duration::from_millis(1100));
        }
    }
}
