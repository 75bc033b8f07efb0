//! # KQuant Data
//!
//! 시장 데이터 수집 계층.
//!
//! 제공 기능:
//! - 스트리밍/폴링 어댑터와 재연결/백오프 정책
//! - 소스별 필드 정규화 및 종목 코드 표준화
//! - 순서가 보장된 품질 게이트 (필수 필드, 범위, OHLC 일관성,
//!   신선도, 중복, 이상치)
//! - (종목, 간격) 단일 작성자 캔들 조립 및 링 유지
//! - 캔들 마감 구독 기반 기술적 지표 계산기

pub mod adapter;
pub mod analyzer;
pub mod error;
pub mod normalize;
pub mod pipeline;
pub mod quality;

pub use adapter::{AdapterHealth, BackoffPolicy, MarketAdapter, PolledAdapter, StreamingAdapter};
pub use analyzer::{AnalyzerConfig, TechnicalAnalyzer};
pub use error::{DataError, DataResult};
pub use normalize::{Normalizer, RawTick};
pub use pipeline::{MarketDataPipeline, PipelineConfig};
pub use quality::{DataQualityChecker, QualityConfig, QualityIssue, QualitySeverity, QualityVerdict};
