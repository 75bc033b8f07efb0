//! 설정 관리.
//!
//! 이 모듈은 애플리케이션 설정을 정의하고 관리합니다.
//! 설정은 TOML 파일과 `KQUANT__` 접두사의 환경 변수에서 로드됩니다.
//! 프로세스 시작 시 한 번 로드되는 불변 상태이며, 변경 시 영향 받는
//! 컴포넌트의 재시작으로 반영됩니다.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// 애플리케이션 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// 추적할 종목 목록 (6자리 코드)
    pub symbols: Vec<String>,
    /// 유지할 캔들 간격 (예: "1m", "5m")
    #[serde(default = "default_intervals")]
    pub intervals: Vec<String>,
    /// 캔들 링 크기 ((종목, 간격)당 보관 캔들 수)
    #[serde(default = "default_ring_size")]
    pub ring_size: usize,
    /// 지표별 파라미터 (예: "rsi" → 14)
    #[serde(default)]
    pub indicator_periods: HashMap<String, u32>,
    /// 장마감 강제청산 시각 (KST, "HH:MM")
    #[serde(default = "default_session_close")]
    pub session_close_time: String,

    /// 로깅 설정
    #[serde(default)]
    pub logging: LoggingConfig,
    /// 이벤트 버스 설정
    #[serde(default)]
    pub bus: BusConfig,
    /// 캐시 설정
    #[serde(default)]
    pub cache: CacheConfig,
    /// 리스크 한도 설정
    #[serde(default)]
    pub risk: RiskLimitsConfig,
    /// 주문 엔진 설정
    #[serde(default)]
    pub order: OrderConfig,
    /// 수수료/세금 설정
    #[serde(default)]
    pub commission_rates: CommissionConfig,
    /// 전략 엔진 설정
    #[serde(default)]
    pub strategy: StrategyEngineConfig,
}

fn default_intervals() -> Vec<String> {
    vec!["1m".to_string(), "5m".to_string()]
}
fn default_ring_size() -> usize {
    200
}
fn default_session_close() -> String {
    "15:20".to_string()
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// 로그 레벨
    pub level: String,
    /// 로그 형식 (pretty, json, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// 이벤트 버스 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BusConfig {
    /// 구독당 버퍼 크기
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
    /// 종료 시 드레인 유예 시간 (초)
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
    /// 하트비트 발행 간격 (초)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// risk_check RPC 타임아웃 (밀리초)
    #[serde(default = "default_risk_check_timeout")]
    pub risk_check_timeout_ms: u64,
}

fn default_subscriber_buffer() -> usize {
    1024
}
fn default_shutdown_grace() -> u64 {
    5
}
fn default_heartbeat_interval() -> u64 {
    30
}
fn default_risk_check_timeout() -> u64 {
    500
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: default_subscriber_buffer(),
            shutdown_grace_secs: default_shutdown_grace(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            risk_check_timeout_ms: default_risk_check_timeout(),
        }
    }
}

/// 캐시 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Redis URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// 메모리 예산 (MB)
    #[serde(default = "default_memory_budget")]
    pub memory_budget_mb: usize,
}

fn default_redis_url() -> String {
    "redis://localhost:6379/0".to_string()
}
fn default_memory_budget() -> usize {
    150
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            memory_budget_mb: default_memory_budget(),
        }
    }
}

/// 리스크 한도 설정. 기본값은 운영 기본 정책입니다.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RiskLimitsConfig {
    /// 종목당 최대 투자 비율 (포트폴리오 대비)
    pub max_position_ratio: Decimal,
    /// 섹터별 최대 투자 비율
    pub max_sector_ratio: Decimal,
    /// 전체 최대 투자 비율 (현금 제외)
    pub max_total_exposure: Decimal,
    /// 최소 현금 보유 비율
    pub min_cash_reserve_ratio: Decimal,
    /// 일일 최대 손실 금액 (원)
    pub max_daily_loss: Decimal,
    /// 월간 최대 손실 금액 (원)
    pub max_monthly_loss: Decimal,
    /// 최대 연속 손실 횟수
    pub max_consecutive_losses: u32,
    /// 하루 최대 주문 횟수
    pub max_orders_per_day: u32,
    /// 최소 주문 금액 (원)
    pub min_order_value: Decimal,
    /// 최대 주문 금액 (원)
    pub max_order_value: Decimal,
    /// 기본 손절 비율
    pub stop_loss_pct: Decimal,
    /// 기본 익절 비율
    pub take_profit_pct: Decimal,
    /// 트레일링 스탑 오프셋 비율
    pub trailing_offset_pct: Decimal,
    /// 리스크 모니터링 주기 (초)
    pub monitoring_interval_secs: u64,
}

impl Default for RiskLimitsConfig {
    fn default() -> Self {
        Self {
            max_position_ratio: Decimal::new(10, 2),     // 0.10
            max_sector_ratio: Decimal::new(30, 2),       // 0.30
            max_total_exposure: Decimal::new(90, 2),     // 0.90
            min_cash_reserve_ratio: Decimal::new(10, 2), // 0.10
            max_daily_loss: Decimal::new(500_000, 0),
            max_monthly_loss: Decimal::new(5_000_000, 0),
            max_consecutive_losses: 5,
            max_orders_per_day: 20,
            min_order_value: Decimal::new(10_000, 0),
            max_order_value: Decimal::new(1_000_000, 0),
            stop_loss_pct: Decimal::new(3, 2),        // 0.03
            take_profit_pct: Decimal::new(5, 2),      // 0.05
            trailing_offset_pct: Decimal::new(2, 2),  // 0.02
            monitoring_interval_secs: 30,
        }
    }
}

/// 주문 엔진 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrderConfig {
    /// 큐 대기 제한 시간 (초), 초과 시 만료
    pub priority_timeout_secs: u64,
    /// 동시 제출 한도
    pub max_concurrent_submissions: usize,
    /// 큐 최대 크기
    pub max_queue_size: usize,
    /// 부분 체결 정체 임계 시간 (초)
    pub max_partial_fill_time_secs: u64,
    /// 주문당 최대 체결 수 (하드 캡)
    pub max_fills_per_order: usize,
    /// 브로커 초당 요청 한도
    pub broker_rate_limit: u32,
    /// 전략별 우선순위 조정 (±10)
    #[serde(default)]
    pub strategy_priorities: HashMap<String, i32>,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            priority_timeout_secs: 300,
            max_concurrent_submissions: 10,
            max_queue_size: 1000,
            max_partial_fill_time_secs: 300,
            max_fills_per_order: 100,
            broker_rate_limit: 18,
            strategy_priorities: HashMap::new(),
        }
    }
}

/// 한국 주식 수수료/세금 설정.
///
/// 기본값은 한국투자증권 위탁 거래 기준입니다.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommissionConfig {
    /// 위탁수수료율
    pub brokerage_rate: Decimal,
    /// 최소 위탁수수료 (원)
    pub min_brokerage_fee: Decimal,
    /// 거래소수수료율
    pub exchange_rate: Decimal,
    /// 청산결제수수료율
    pub clearing_rate: Decimal,
    /// 증권거래세율 (매도 시)
    pub tx_tax_rate: Decimal,
    /// 농어촌특별세율 (매도 시, 거래대금 대비 실효율)
    pub rural_tax_rate: Decimal,
}

impl Default for CommissionConfig {
    fn default() -> Self {
        Self {
            brokerage_rate: Decimal::new(15, 5),    // 0.015%
            min_brokerage_fee: Decimal::new(100, 0),
            exchange_rate: Decimal::new(8, 6),      // 0.0008%
            clearing_rate: Decimal::new(154, 7),    // 0.00154%
            tx_tax_rate: Decimal::new(23, 4),       // 0.23%
            rural_tax_rate: Decimal::new(46, 5),    // 0.046% (= 거래세의 20%)
        }
    }
}

/// 전략 엔진 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyEngineConfig {
    /// analyze 호출 타임아웃 (밀리초)
    pub strategy_timeout_ms: u64,
    /// 연속 타임아웃 자동 비활성화 임계치
    pub max_consecutive_timeouts: u32,
}

impl Default for StrategyEngineConfig {
    fn default() -> Self {
        Self {
            strategy_timeout_ms: 200,
            max_consecutive_timeouts: 3,
        }
    }
}

impl AppConfig {
    /// TOML 파일과 환경 변수에서 설정을 로드합니다.
    ///
    /// 환경 변수는 `KQUANT__` 접두사와 `__` 구분자를 사용합니다
    /// (예: `KQUANT__RISK__MAX_DAILY_LOSS=300000`).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix("KQUANT").separator("__"))
            .build()?;
        settings.try_deserialize()
    }

    /// 기본 경로에서 설정을 로드합니다.
    pub fn load_default() -> Result<Self, config::ConfigError> {
        Self::load("config/default.toml")
    }

    /// 설정 값의 유효성을 검증합니다.
    ///
    /// CLI 래퍼는 검증 실패 시 0이 아닌 종료 코드로 종료해야 합니다.
    pub fn validate(&self) -> Result<(), String> {
        if self.symbols.is_empty() {
            return Err("symbols must not be empty".to_string());
        }
        for s in &self.symbols {
            if crate::types::Symbol::canonicalize(s).is_none() {
                return Err(format!("invalid symbol: {}", s));
            }
        }
        for i in &self.intervals {
            if crate::types::Timeframe::from_interval(i).is_none() {
                return Err(format!("invalid interval: {}", i));
            }
        }
        if self.ring_size == 0 {
            return Err("ring_size must be >= 1".to_string());
        }
        if self.session_close_time.split(':').count() != 2 {
            return Err(format!(
                "invalid session_close_time: {}",
                self.session_close_time
            ));
        }
        if self.risk.max_position_ratio <= Decimal::ZERO
            || self.risk.max_position_ratio > Decimal::ONE
        {
            return Err("max_position_ratio must be in (0, 1]".to_string());
        }
        if self.risk.min_order_value > self.risk.max_order_value {
            return Err("min_order_value must be <= max_order_value".to_string());
        }
        if self.order.broker_rate_limit == 0 {
            return Err("broker_rate_limit must be >= 1".to_string());
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["005930".to_string()],
            intervals: default_intervals(),
            ring_size: default_ring_size(),
            indicator_periods: HashMap::new(),
            session_close_time: default_session_close(),
            logging: LoggingConfig::default(),
            bus: BusConfig::default(),
            cache: CacheConfig::default(),
            risk: RiskLimitsConfig::default(),
            order: OrderConfig::default(),
            commission_rates: CommissionConfig::default(),
            strategy: StrategyEngineConfig::default(),
        }
    }
}
