//! 전략 실행 엔진.
//!
//! 전략 생명주기를 관리하고, `indicators_updated` 이벤트를 종목별
//! 구독 전략에 라우팅하며, 반환된 신호를 `trading_signal` 토픽으로
//! 발행합니다.
//!
//! `analyze` 호출은 전략별 타임아웃(기본 200ms)으로 제한됩니다.
//! 연속 3회 타임아웃이면 전략은 자동 비활성화되고
//! `strategy_deactivated(reason=timeout)`이 발행됩니다.

use crate::registry::StrategyRegistry;
use crate::traits::{Strategy, StrategySnapshot};
use kquant_bus::{Delivery, Envelope, EventBus, Payload, Topic};
use kquant_cache::MarketStore;
use kquant_core::{IndicatorSnapshot, StrategyEngineConfig, Symbol};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 전략 엔진 에러.
#[derive(Debug, Error)]
pub enum StrategyEngineError {
    /// 레지스트리에 없는 전략
    #[error("전략을 찾을 수 없음: {0}")]
    NotFound(String),

    /// 이미 활성화된 전략
    #[error("전략이 이미 활성화됨: {0}")]
    AlreadyActive(String),

    /// 활성화되지 않은 전략
    #[error("전략이 활성화되어 있지 않음: {0}")]
    NotActive(String),

    /// 파라미터/초기화 실패
    #[error("전략 초기화 실패: {0}")]
    InitFailed(String),
}

/// 전략 인스턴스 상태.
struct ActiveStrategy {
    strategy: Box<dyn Strategy>,
    /// 구독 종목
    symbols: HashSet<Symbol>,
    /// 설정 파라미터 (핫 리로드용)
    params: Value,
    /// 연속 타임아웃 수
    consecutive_timeouts: u32,
    /// 생성된 신호 수
    signals_emitted: u64,
    /// 건너뛴 호출 수 (지표 부재)
    skipped_missing_indicators: u64,
}

/// 전략 실행 엔진.
pub struct StrategyEngine {
    bus: Arc<EventBus>,
    store: Arc<dyn MarketStore>,
    config: StrategyEngineConfig,
    active: HashMap<String, ActiveStrategy>,
}

impl StrategyEngine {
    /// 새 전략 엔진을 생성합니다.
    pub fn new(
        bus: Arc<EventBus>,
        store: Arc<dyn MarketStore>,
        config: StrategyEngineConfig,
    ) -> Self {
        Self {
            bus,
            store,
            config,
            active: HashMap::new(),
        }
    }

    /// 레지스트리에서 전략을 만들어 활성화합니다.
    pub async fn activate(
        &mut self,
        id: &str,
        params: Value,
        symbols: Vec<Symbol>,
    ) -> Result<(), StrategyEngineError> {
        if self.active.contains_key(id) {
            return Err(StrategyEngineError::AlreadyActive(id.to_string()));
        }

        let mut strategy = StrategyRegistry::create_instance(id)
            .map_err(StrategyEngineError::NotFound)?;
        strategy
            .configure(params.clone())
            .map_err(|e| StrategyEngineError::InitFailed(e.to_string()))?;
        strategy
            .on_start()
            .await
            .map_err(|e| StrategyEngineError::InitFailed(e.to_string()))?;

        info!(strategy = id, symbols = symbols.len(), "Strategy activated");
        self.active.insert(
            id.to_string(),
            ActiveStrategy {
                strategy,
                symbols: symbols.into_iter().collect(),
                params,
                consecutive_timeouts: 0,
                signals_emitted: 0,
                skipped_missing_indicators: 0,
            },
        );

        let _ = self.bus.publish(Envelope::new(
            Topic::StrategyActivated,
            "strategy_engine",
            Payload::StrategyLifecycle {
                name: id.to_string(),
                reason: "manual".to_string(),
            },
        ));
        Ok(())
    }

    /// 전략을 비활성화합니다.
    pub async fn deactivate(&mut self, id: &str, reason: &str) -> Result<(), StrategyEngineError> {
        let mut entry = self
            .active
            .remove(id)
            .ok_or_else(|| StrategyEngineError::NotActive(id.to_string()))?;

        if let Err(e) = entry.strategy.on_stop().await {
            warn!(strategy = id, error = %e, "on_stop failed");
        }

        info!(strategy = id, reason, "Strategy deactivated");
        let _ = self.bus.publish(Envelope::new(
            Topic::StrategyDeactivated,
            "strategy_engine",
            Payload::StrategyLifecycle {
                name: id.to_string(),
                reason: reason.to_string(),
            },
        ));
        Ok(())
    }

    /// 전략을 핫 리로드합니다 (중지 후 재활성화).
    ///
    /// `params`가 `None`이면 기존 파라미터를 유지합니다.
    pub async fn reload(
        &mut self,
        id: &str,
        params: Option<Value>,
    ) -> Result<(), StrategyEngineError> {
        let entry = self
            .active
            .get(id)
            .ok_or_else(|| StrategyEngineError::NotActive(id.to_string()))?;
        let symbols: Vec<Symbol> = entry.symbols.iter().cloned().collect();
        let params = params.unwrap_or_else(|| entry.params.clone());

        self.deactivate(id, "reload").await?;
        self.activate(id, params, symbols).await
    }

    /// 활성 전략 ID 목록.
    pub fn active_ids(&self) -> Vec<String> {
        self.active.keys().cloned().collect()
    }

    /// 지표 갱신 이벤트를 처리합니다.
    pub async fn on_indicators(&mut self, indicators: IndicatorSnapshot) {
        let symbol = indicators.symbol.clone();
        let candle = self
            .store
            .head_candle(&symbol, indicators.timeframe)
            .await
            .ok()
            .flatten();

        let snapshot = StrategySnapshot {
            symbol: symbol.clone(),
            ts: indicators.ts,
            candle,
            indicators,
        };

        let timeout = Duration::from_millis(self.config.strategy_timeout_ms);
        let mut to_deactivate = Vec::new();

        for (id, entry) in self.active.iter_mut() {
            if !entry.symbols.contains(&symbol) {
                continue;
            }

            // 필수 지표 사전 점검
            let required = entry.strategy.required_indicators();
            if !snapshot
                .indicators
                .contains_all(required.iter().map(|s| s.as_str()))
            {
                entry.skipped_missing_indicators += 1;
                debug!(strategy = %id, symbol = %symbol, "Required indicators missing, skipped");
                continue;
            }

            match tokio::time::timeout(timeout, entry.strategy.analyze(&snapshot)).await {
                Ok(Some(signal)) => {
                    entry.consecutive_timeouts = 0;
                    entry.signals_emitted += 1;

                    let mut signal = signal;
                    signal.strategy_name = id.clone();
                    let envelope = Envelope::new(
                        Topic::TradingSignal,
                        "strategy_engine",
                        Payload::Signal(signal),
                    )
                    .with_correlation(Uuid::new_v4());

                    if let Err(e) = self.bus.publish(envelope) {
                        warn!(strategy = %id, error = %e, "Signal publish failed");
                    }
                }
                Ok(None) => {
                    entry.consecutive_timeouts = 0;
                }
                Err(_) => {
                    entry.consecutive_timeouts += 1;
                    warn!(
                        strategy = %id,
                        symbol = %symbol,
                        consecutive = entry.consecutive_timeouts,
                        "Strategy analyze timed out"
                    );
                    if entry.consecutive_timeouts >= self.config.max_consecutive_timeouts {
                        to_deactivate.push(id.clone());
                    }
                }
            }
        }

        for id in to_deactivate {
            let _ = self.deactivate(&id, "timeout").await;
        }
    }

    /// 엔진 구동 루프. `indicators_updated`를 구독합니다.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("StrategyEngine started");
        let mut subscription = self.bus.subscribe(Topic::IndicatorsUpdated);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                delivery = subscription.recv() => {
                    match delivery {
                        Some(Delivery::Event(envelope)) => {
                            if let Payload::Indicators(snapshot) = envelope.payload {
                                self.on_indicators(snapshot).await;
                            }
                        }
                        Some(Delivery::Lagged(n)) => {
                            warn!(skipped = n, "Strategy engine lagged behind indicator stream");
                        }
                        None => break,
                    }
                }
            }
        }

        // 종료 시 활성 전략 정리
        let ids = self.active_ids();
        for id in ids {
            let _ = self.deactivate(&id, "shutdown").await;
        }
        info!("StrategyEngine stopped");
    }
}
