//! 기술적 분석기.
//!
//! `candle_closed`를 구독해 링에서 최근 N개 캔들을 읽고 설정된 지표
//! 집합을 재계산한 뒤, 스냅샷을 캐시에 기록하고 `indicators_updated`를
//! 발행합니다. 발행 스냅샷은 전체 값을 포함하므로 전략이 캐시를
//! 재조회할 필요가 없습니다.

pub mod indicators;

use crate::analyzer::indicators as ind;
use chrono::{DateTime, Utc};
use kquant_bus::{Delivery, Envelope, EventBus, Payload, Topic};
use kquant_cache::MarketStore;
use kquant_core::{Candle, IndicatorSnapshot, KquantResult, Symbol, Timeframe};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 지표 파라미터.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// SMA 윈도우 집합
    pub sma_windows: Vec<usize>,
    /// EMA 단기/장기
    pub ema_short: usize,
    /// EMA 장기
    pub ema_long: usize,
    /// RSI 기간
    pub rsi_period: usize,
    /// MACD 시그널 기간
    pub macd_signal: usize,
    /// 볼린저 기간
    pub bb_period: usize,
    /// 볼린저 표준편차 배수
    pub bb_std: Decimal,
    /// 스토캐스틱 %K 기간
    pub stoch_k: usize,
    /// 스토캐스틱 %D 기간
    pub stoch_d: usize,
    /// ATR 기간
    pub atr_period: usize,
    /// 링에서 읽을 캔들 수
    pub lookback: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            sma_windows: vec![5, 20, 60],
            ema_short: 12,
            ema_long: 26,
            rsi_period: 14,
            macd_signal: 9,
            bb_period: 20,
            bb_std: Decimal::TWO,
            stoch_k: 14,
            stoch_d: 3,
            atr_period: 14,
            lookback: 200,
        }
    }
}

impl AnalyzerConfig {
    /// 설정 맵(`indicator_periods`)을 적용합니다.
    pub fn apply_periods(mut self, periods: &HashMap<String, u32>) -> Self {
        if let Some(&p) = periods.get("rsi") {
            self.rsi_period = p as usize;
        }
        if let Some(&p) = periods.get("atr") {
            self.atr_period = p as usize;
        }
        if let Some(&p) = periods.get("bb") {
            self.bb_period = p as usize;
        }
        self
    }

    /// 파라미터 지문 (메모이제이션 키의 일부).
    fn params_fingerprint(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.sma_windows.hash(&mut hasher);
        self.ema_short.hash(&mut hasher);
        self.ema_long.hash(&mut hasher);
        self.rsi_period.hash(&mut hasher);
        self.macd_signal.hash(&mut hasher);
        self.bb_period.hash(&mut hasher);
        self.stoch_k.hash(&mut hasher);
        self.stoch_d.hash(&mut hasher);
        self.atr_period.hash(&mut hasher);
        hasher.finish()
    }
}

#[derive(Clone)]
struct MemoEntry {
    head_ts: DateTime<Utc>,
    head_close: Decimal,
    params: u64,
    snapshot: IndicatorSnapshot,
}

/// 기술적 분석기.
pub struct TechnicalAnalyzer {
    bus: Arc<EventBus>,
    store: Arc<dyn MarketStore>,
    config: AnalyzerConfig,
    /// 입력 머리 지문이 같으면 재계산을 생략하기 위한 메모
    memo: HashMap<(Symbol, Timeframe), MemoEntry>,
}

impl TechnicalAnalyzer {
    /// 새 분석기를 생성합니다.
    pub fn new(bus: Arc<EventBus>, store: Arc<dyn MarketStore>, config: AnalyzerConfig) -> Self {
        Self {
            bus,
            store,
            config,
            memo: HashMap::new(),
        }
    }

    /// 캔들 마감 하나를 처리합니다.
    pub async fn on_candle_closed(&mut self, candle: &Candle) -> KquantResult<()> {
        let key = (candle.symbol.clone(), candle.timeframe);
        let params = self.config.params_fingerprint();

        // 머리 지문이 같으면 캐시된 스냅샷 재사용
        if let Some(entry) = self.memo.get(&key) {
            if entry.head_ts == candle.ts && entry.head_close == candle.close && entry.params == params
            {
                debug!(symbol = %candle.symbol, timeframe = %candle.timeframe, "Fingerprint unchanged, reusing snapshot");
                self.publish_snapshot(entry.snapshot.clone()).await?;
                return Ok(());
            }
        }

        // 링에서 최근 N개 로드 (최신 먼저) 후 과거→현재 순으로 뒤집기
        let mut ring = self
            .store
            .candles(&candle.symbol, candle.timeframe, self.config.lookback)
            .await?;
        ring.reverse();

        let snapshot = self.compute(candle, &ring).await;

        self.memo.insert(
            key,
            MemoEntry {
                head_ts: candle.ts,
                head_close: candle.close,
                params,
                snapshot: snapshot.clone(),
            },
        );

        self.store.set_indicators(&snapshot).await?;
        self.publish_snapshot(snapshot).await?;
        Ok(())
    }

    async fn compute(&self, candle: &Candle, ring: &[Candle]) -> IndicatorSnapshot {
        let closes: Vec<Decimal> = ring.iter().map(|c| c.close).collect();
        let mut snapshot = IndicatorSnapshot::new(candle.symbol.clone(), candle.timeframe, candle.ts);

        for &window in &self.config.sma_windows {
            snapshot.insert_opt(format!("sma_{}", window), ind::sma(&closes, window));
        }
        snapshot.insert_opt(
            format!("ema_{}", self.config.ema_short),
            ind::ema(&closes, self.config.ema_short),
        );
        snapshot.insert_opt(
            format!("ema_{}", self.config.ema_long),
            ind::ema(&closes, self.config.ema_long),
        );
        snapshot.insert_opt(
            format!("rsi_{}", self.config.rsi_period),
            ind::rsi(&closes, self.config.rsi_period),
        );

        if let Some(macd) = ind::macd(
            &closes,
            self.config.ema_short,
            self.config.ema_long,
            self.config.macd_signal,
        ) {
            snapshot.insert("macd", macd.macd);
            snapshot.insert("macd_signal", macd.signal);
            snapshot.insert("macd_histogram", macd.histogram);
        }

        if let Some(bands) = ind::bollinger(&closes, self.config.bb_period, self.config.bb_std) {
            snapshot.insert("bb_upper", bands.upper);
            snapshot.insert("bb_mid", bands.middle);
            snapshot.insert("bb_lower", bands.lower);
        }

        if let Some(stoch) = ind::stochastic(ring, self.config.stoch_k, self.config.stoch_d) {
            snapshot.insert("stoch_k", stoch.k);
            snapshot.insert("stoch_d", stoch.d);
        }

        snapshot.insert_opt(
            format!("atr_{}", self.config.atr_period),
            ind::atr(ring, self.config.atr_period),
        );

        // 5일 평균 거래대금 (일봉 링이 있을 때만)
        if let Ok(daily) = self.store.candles(&candle.symbol, Timeframe::D1, 5).await {
            if daily.len() == 5 {
                let turnover: Decimal = daily.iter().map(|c| c.close * c.volume).sum();
                snapshot.insert("turnover_5d", turnover / Decimal::from(5));
            }
        }

        snapshot
    }

    async fn publish_snapshot(&self, snapshot: IndicatorSnapshot) -> KquantResult<()> {
        self.bus.publish(Envelope::new(
            Topic::IndicatorsUpdated,
            "analyzer",
            Payload::Indicators(snapshot),
        ))?;
        Ok(())
    }

    /// 분석기 구동 루프. `candle_closed`를 구독합니다.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("TechnicalAnalyzer started");
        let mut subscription = self.bus.subscribe(Topic::CandleClosed);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                delivery = subscription.recv() => {
                    match delivery {
                        Some(Delivery::Event(envelope)) => {
                            if let Payload::Candle(candle) = envelope.payload {
                                if let Err(e) = self.on_candle_closed(&candle).await {
                                    warn!(error = %e, "Indicator computation failed");
                                }
                            }
                        }
                        Some(Delivery::Lagged(n)) => {
                            warn!(skipped = n, "Analyzer lagged behind candle stream");
                        }
                        None => break,
                    }
                }
            }
        }
        info!("TechnicalAnalyzer stopped");
    }
}
