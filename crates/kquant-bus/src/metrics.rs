//! 버스 메트릭.
//!
//! 토픽별 발행/전달/유실/핸들러 실패 카운터를 유지합니다.
//! 카운터는 원자적으로 갱신되며 스냅샷으로 조회합니다.

use crate::topic::Topic;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// 토픽 하나의 카운터.
#[derive(Debug, Default)]
pub struct TopicCounters {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    handler_failures: AtomicU64,
}

/// 토픽 하나의 카운터 스냅샷.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct TopicStats {
    /// 발행된 메시지 수
    pub published: u64,
    /// 구독자에게 전달된 메시지 수
    pub delivered: u64,
    /// 구독자 버퍼 오버플로로 유실된 메시지 수
    pub dropped: u64,
    /// 핸들러 실행 실패 수
    pub handler_failures: u64,
}

/// 전체 버스 메트릭.
#[derive(Debug)]
pub struct BusMetrics {
    counters: HashMap<Topic, TopicCounters>,
}

impl BusMetrics {
    /// 모든 토픽의 카운터를 초기화합니다.
    pub fn new() -> Self {
        let counters = Topic::all()
            .iter()
            .map(|t| (*t, TopicCounters::default()))
            .collect();
        Self { counters }
    }

    /// 발행 카운터를 증가시킵니다.
    pub fn record_published(&self, topic: Topic) {
        if let Some(c) = self.counters.get(&topic) {
            c.published.fetch_add(1, Ordering::Relaxed);
        }
        metrics::counter!("bus_published_total", "topic" => topic.as_str()).increment(1);
    }

    /// 전달 카운터를 증가시킵니다.
    pub fn record_delivered(&self, topic: Topic) {
        if let Some(c) = self.counters.get(&topic) {
            c.delivered.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// 유실 카운터를 증가시킵니다 (구독자 지연).
    pub fn record_dropped(&self, topic: Topic, count: u64) {
        if let Some(c) = self.counters.get(&topic) {
            c.dropped.fetch_add(count, Ordering::Relaxed);
        }
        metrics::counter!("bus_subscriber_lagged_total", "topic" => topic.as_str()).increment(count);
    }

    /// 핸들러 실패 카운터를 증가시킵니다.
    pub fn record_handler_failure(&self, topic: Topic) {
        if let Some(c) = self.counters.get(&topic) {
            c.handler_failures.fetch_add(1, Ordering::Relaxed);
        }
        metrics::counter!("bus_handler_failures_total", "topic" => topic.as_str()).increment(1);
    }

    /// 핸들러 지연 시간을 기록합니다.
    pub fn record_handler_latency(&self, topic: Topic, elapsed_ms: f64) {
        metrics::histogram!("bus_handler_latency_ms", "topic" => topic.as_str()).record(elapsed_ms);
    }

    /// 토픽 하나의 스냅샷을 반환합니다.
    pub fn topic_stats(&self, topic: Topic) -> TopicStats {
        let c = &self.counters[&topic];
        TopicStats {
            published: c.published.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            handler_failures: c.handler_failures.load(Ordering::Relaxed),
        }
    }

    /// 전체 스냅샷을 반환합니다.
    pub fn snapshot(&self) -> HashMap<Topic, TopicStats> {
        Topic::all()
            .iter()
            .map(|t| (*t, self.topic_stats(*t)))
            .collect()
    }
}

impl Default for BusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = BusMetrics::new();
        metrics.record_published(Topic::TradingSignal);
        metrics.record_published(Topic::TradingSignal);
        metrics.record_delivered(Topic::TradingSignal);
        metrics.record_dropped(Topic::TradingSignal, 3);
        metrics.record_handler_failure(Topic::TradingSignal);

        let stats = metrics.topic_stats(Topic::TradingSignal);
        assert_eq!(stats.published, 2);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.dropped, 3);
        assert_eq!(stats.handler_failures, 1);

        // 다른 토픽은 영향 없음
        let other = metrics.topic_stats(Topic::Heartbeat);
        assert_eq!(other.published, 0);
    }
}
