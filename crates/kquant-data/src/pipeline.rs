//! 시장 데이터 파이프라인.
//!
//! 어댑터 팬인 채널에서 틱을 받아 품질 게이트를 거친 뒤, (종목, 간격)
//! 별로 캔들을 조립하고 링을 갱신하며 이벤트를 발행합니다.
//!
//! 파이프라인은 (종목, 간격)당 단일 작성자이므로 링 추가에 외부 잠금이
//! 필요 없습니다. 어댑터 채널이 유한하므로 하류가 밀리면 어댑터의
//! `send`가 대기하게 되어 명시적 속도 신호로 작동합니다.

use crate::quality::{DataQualityChecker, QualityConfig, QualityVerdict};
use kquant_bus::{Envelope, EventBus, Payload, Topic};
use kquant_cache::MarketStore;
use kquant_core::{Candle, KquantResult, MarketTick, Symbol, Timeframe};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 파이프라인 설정.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// 조립할 타임프레임
    pub timeframes: Vec<Timeframe>,
    /// 링 크기
    pub ring_size: usize,
    /// 품질 게이트 설정
    pub quality: QualityConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timeframes: vec![Timeframe::M1, Timeframe::M5],
            ring_size: 200,
            quality: QualityConfig::default(),
        }
    }
}

/// 시장 데이터 파이프라인.
pub struct MarketDataPipeline {
    bus: Arc<EventBus>,
    store: Arc<dyn MarketStore>,
    config: PipelineConfig,
    quality: DataQualityChecker,
    /// 조립 중인 캔들
    building: HashMap<(Symbol, Timeframe), Candle>,
}

impl MarketDataPipeline {
    /// 새 파이프라인을 생성합니다.
    pub fn new(bus: Arc<EventBus>, store: Arc<dyn MarketStore>, config: PipelineConfig) -> Self {
        let quality = DataQualityChecker::new(config.quality.clone());
        Self {
            bus,
            store,
            config,
            quality,
            building: HashMap::new(),
        }
    }

    /// 틱 하나를 처리합니다.
    ///
    /// 게이트 통과 틱마다 `market_data_received`가, 버킷이 닫힐 때만
    /// `candle_closed`가 발행됩니다.
    pub async fn process_tick(&mut self, tick: MarketTick) -> KquantResult<()> {
        match self.quality.check(&tick) {
            QualityVerdict::Accept(warnings) => {
                for warning in &warnings {
                    warn!(
                        symbol = %tick.symbol,
                        gate = warning.gate,
                        message = %warning.message,
                        "Quality warning"
                    );
                }
            }
            QualityVerdict::Drop(issue) => {
                warn!(
                    symbol = %tick.symbol,
                    gate = issue.gate,
                    message = %issue.message,
                    "Tick dropped by quality gate"
                );
                self.bus.publish(Envelope::new(
                    Topic::SystemStatus,
                    "pipeline",
                    Payload::SystemStatus {
                        component: "pipeline".to_string(),
                        status: "quality_issue".to_string(),
                        detail: Some(format!("{}: {}", issue.gate, issue.message)),
                    },
                ))?;
                return Ok(());
            }
            QualityVerdict::DropSilently => return Ok(()),
        }

        // 캔들 조립
        for timeframe in self.config.timeframes.clone() {
            self.assemble(&tick, timeframe).await?;
        }

        // 최신 틱 캐시 갱신 후 발행
        self.store.set_latest_tick(&tick).await?;
        self.bus.publish(Envelope::new(
            Topic::MarketDataReceived,
            "pipeline",
            Payload::MarketTick(tick),
        ))?;
        Ok(())
    }

    /// 벽시계가 버킷 경계를 지난 캔들을 마감합니다.
    ///
    /// 다음 버킷 틱이 오지 않아도 주기 타이머가 호출해 마감을 보장합니다.
    pub async fn flush_expired(&mut self, now: chrono::DateTime<chrono::Utc>) -> KquantResult<()> {
        let expired: Vec<(Symbol, Timeframe)> = self
            .building
            .iter()
            .filter(|((_, tf), candle)| tf.next_boundary(candle.ts) <= now)
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            if let Some(candle) = self.building.remove(&key) {
                self.close_candle(candle).await?;
            }
        }
        Ok(())
    }

    async fn assemble(&mut self, tick: &MarketTick, timeframe: Timeframe) -> KquantResult<()> {
        let bucket = timeframe.align(tick.ts);
        let key = (tick.symbol.clone(), timeframe);

        match self.building.get_mut(&key) {
            Some(current) if current.ts == bucket => {
                current.absorb(tick);
            }
            Some(current) if current.ts < bucket => {
                // 다음 버킷 틱 도착 → 이전 캔들 마감
                let closed = std::mem::replace(current, Candle::open_from_tick(tick, timeframe));
                self.close_candle(closed).await?;
            }
            Some(current) => {
                // 이미 마감된 버킷의 지각 틱
                debug!(
                    symbol = %tick.symbol,
                    timeframe = %timeframe,
                    tick_ts = %tick.ts,
                    current_bucket = %current.ts,
                    "Late tick ignored for candle assembly"
                );
            }
            None => {
                self.building
                    .insert(key, Candle::open_from_tick(tick, timeframe));
            }
        }
        Ok(())
    }

    async fn close_candle(&mut self, candle: Candle) -> KquantResult<()> {
        debug!(
            symbol = %candle.symbol,
            timeframe = %candle.timeframe,
            ts = %candle.ts,
            close = %candle.close,
            "Candle closed"
        );
        self.store.push_candle(&candle, self.config.ring_size).await?;
        self.bus.publish(Envelope::new(
            Topic::CandleClosed,
            "pipeline",
            Payload::Candle(candle),
        ))?;
        Ok(())
    }

    /// 파이프라인 구동 루프.
    ///
    /// 어댑터 팬인 채널을 소비하고, 1초 주기로 만료 버킷을 마감합니다.
    pub async fn run(mut self, mut tick_rx: mpsc::Receiver<MarketTick>, shutdown: CancellationToken) {
        info!("MarketDataPipeline started");
        let mut flush_interval = tokio::time::interval(std::time::Duration::from_secs(1));
        flush_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                tick = tick_rx.recv() => {
                    match tick {
                        Some(tick) => {
                            if let Err(e) = self.process_tick(tick).await {
                                warn!(error = %e, "Tick processing failed");
                            }
                        }
                        None => break,
                    }
                }
                _ = flush_interval.tick() => {
                    if let Err(e) = self.flush_expired(chrono::Utc::now()).await {
                        warn!(error = %e, "Candle flush failed");
                    }
                }
            }
        }
        info!("MarketDataPipeline stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kquant_bus::Delivery;
    use kquant_cache::MemoryStore;
    use kquant_core::TickSource;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn symbol() -> Symbol {
        Symbol::canonicalize("005930").unwrap()
    }

    fn tick_at(min: u32, sec: u32, close: Decimal) -> MarketTick {
        MarketTick::quote(
            symbol(),
            chrono::Utc.with_ymd_and_hms(2025, 3, 4, 0, min, sec).unwrap(),
            close,
            dec!(10),
            TickSource::BrokerWebsocket,
        )
    }

    fn pipeline_with_quality() -> (Arc<EventBus>, Arc<MemoryStore>, MarketDataPipeline) {
        let bus = Arc::new(EventBus::new(64));
        let store = Arc::new(MemoryStore::new());
        // 테스트 틱은 과거 시각이므로 신선도 경고는 무시
        let config = PipelineConfig {
            timeframes: vec![Timeframe::M1],
            ring_size: 5,
            quality: QualityConfig::default(),
        };
        let pipeline = MarketDataPipeline::new(Arc::clone(&bus), store.clone(), config);
        (bus, store, pipeline)
    }

    #[tokio::test]
    async fn test_candle_closes_on_next_bucket_tick() {
        let (bus, store, mut pipeline) = pipeline_with_quality();
        let mut candle_sub = bus.subscribe(Topic::CandleClosed);
        let mut tick_sub = bus.subscribe(Topic::MarketDataReceived);

        pipeline.process_tick(tick_at(31, 10, dec!(75000))).await.unwrap();
        pipeline.process_tick(tick_at(31, 40, dec!(75100))).await.unwrap();
        // 다음 버킷 틱 → 31분 캔들 마감
        pipeline.process_tick(tick_at(32, 5, dec!(75200))).await.unwrap();

        match candle_sub.recv().await.unwrap() {
            Delivery::Event(envelope) => match envelope.payload {
                Payload::Candle(candle) => {
                    assert_eq!(candle.open, dec!(75000));
                    assert_eq!(candle.close, dec!(75100));
                    assert_eq!(candle.volume, dec!(20));
                }
                _ => panic!("wrong payload"),
            },
            _ => panic!("expected candle"),
        }

        // 게이트 통과 틱마다 market_data_received 발행
        for _ in 0..3 {
            assert!(matches!(tick_sub.recv().await, Some(Delivery::Event(_))));
        }

        // 링에는 마감된 캔들만 존재
        let ring = store.candles(&symbol(), Timeframe::M1, 10).await.unwrap();
        assert_eq!(ring.len(), 1);
        assert_eq!(ring[0].close, dec!(75100));
    }

    #[tokio::test]
    async fn test_flush_expired_closes_on_clock() {
        let (bus, store, mut pipeline) = pipeline_with_quality();
        let _sub = bus.subscribe(Topic::CandleClosed);

        pipeline.process_tick(tick_at(31, 10, dec!(75000))).await.unwrap();

        // 경계 전에는 마감 없음
        let before = chrono::Utc.with_ymd_and_hms(2025, 3, 4, 0, 31, 59).unwrap();
        pipeline.flush_expired(before).await.unwrap();
        assert!(store.candles(&symbol(), Timeframe::M1, 10).await.unwrap().is_empty());

        // 경계 통과 후 마감
        let after = chrono::Utc.with_ymd_and_hms(2025, 3, 4, 0, 32, 0).unwrap();
        pipeline.flush_expired(after).await.unwrap();
        let ring = store.candles(&symbol(), Timeframe::M1, 10).await.unwrap();
        assert_eq!(ring.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_tick_does_not_change_ring() {
        let (_bus, store, mut pipeline) = pipeline_with_quality();

        let t = tick_at(31, 10, dec!(75000));
        pipeline.process_tick(t.clone()).await.unwrap();
        pipeline.process_tick(t.clone()).await.unwrap();
        pipeline.process_tick(tick_at(32, 0, dec!(75100))).await.unwrap();

        let ring = store.candles(&symbol(), Timeframe::M1, 10).await.unwrap();
        assert_eq!(ring.len(), 1);
        // 중복 틱이 수락되었다면 volume이 20이었을 것
        assert_eq!(ring[0].volume, dec!(10));
    }

    #[tokio::test]
    async fn test_dropped_tick_publishes_quality_issue() {
        let (bus, _store, mut pipeline) = pipeline_with_quality();
        let mut status_sub = bus.subscribe(Topic::SystemStatus);

        pipeline.process_tick(tick_at(31, 10, dec!(0))).await.unwrap();

        match status_sub.recv().await.unwrap() {
            Delivery::Event(envelope) => match envelope.payload {
                Payload::SystemStatus { status, .. } => assert_eq!(status, "quality_issue"),
                _ => panic!("wrong payload"),
            },
            _ => panic!("expected status event"),
        }
    }
}
