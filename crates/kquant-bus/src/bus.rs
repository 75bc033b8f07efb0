//! 프로세스 내부 이벤트 버스.
//!
//! 토픽마다 broadcast 채널 하나를 유지합니다. 발행은 비차단이며 현재
//! 구독자 전원에게 팬아웃됩니다. 느린 구독자는 자신의 버퍼에서 가장
//! 오래된 메시지부터 잃고, 다음 수신 시 지연 마커를 받습니다. 다른
//! 구독자나 발행자는 차단되지 않습니다.

use crate::envelope::{Envelope, Payload};
use crate::metrics::BusMetrics;
use crate::topic::Topic;
use kquant_core::{KquantError, KquantResult};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 구독 수신 결과.
#[derive(Debug)]
pub enum Delivery {
    /// 정상 수신한 이벤트
    Event(Envelope),
    /// 버퍼 오버플로로 `n`개를 건너뛰었음을 알리는 지연 마커
    Lagged(u64),
}

/// 토픽 하나에 대한 구독.
///
/// 버퍼는 유한하며, 오버플로 시 가장 오래된 메시지가 유실되고
/// 다음 `recv()`가 `Delivery::Lagged`를 반환합니다.
pub struct BusSubscription {
    topic: Topic,
    receiver: broadcast::Receiver<Envelope>,
    metrics: Arc<BusMetrics>,
}

impl BusSubscription {
    /// 다음 이벤트를 수신합니다. 버스가 닫히면 `None`을 반환합니다.
    pub async fn recv(&mut self) -> Option<Delivery> {
        match self.receiver.recv().await {
            Ok(envelope) => {
                self.metrics.record_delivered(self.topic);
                Some(Delivery::Event(envelope))
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                self.metrics.record_dropped(self.topic, n);
                Some(Delivery::Lagged(n))
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// 구독 중인 토픽을 반환합니다.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

/// 프로세스 내부 이벤트 버스.
pub struct EventBus {
    senders: HashMap<Topic, broadcast::Sender<Envelope>>,
    metrics: Arc<BusMetrics>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown_grace: Duration,
}

impl EventBus {
    /// 주어진 구독자 버퍼 크기로 버스를 생성합니다.
    pub fn new(subscriber_buffer: usize) -> Self {
        let senders = Topic::all()
            .iter()
            .map(|t| {
                let (tx, _) = broadcast::channel(subscriber_buffer.max(1));
                (*t, tx)
            })
            .collect();

        Self {
            senders,
            metrics: Arc::new(BusMetrics::new()),
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
            shutdown_grace: Duration::from_secs(5),
        }
    }

    /// 종료 유예 시간을 설정합니다.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// 봉투를 발행합니다. 비차단이며 현재 구독자 전원에게 전달됩니다.
    ///
    /// 페이로드 유형이 토픽과 맞지 않으면 검증 에러를 반환합니다.
    /// 구독자가 없으면 메시지는 버려지고 0을 반환합니다.
    pub fn publish(&self, envelope: Envelope) -> KquantResult<usize> {
        if !envelope.payload.compatible_with(envelope.topic) {
            return Err(KquantError::Validation(format!(
                "payload kind does not match topic {}",
                envelope.topic
            )));
        }

        let topic = envelope.topic;
        let sender = self
            .senders
            .get(&topic)
            .ok_or_else(|| KquantError::Internal(format!("unknown topic {}", topic)))?;

        self.metrics.record_published(topic);
        match sender.send(envelope) {
            Ok(n) => Ok(n),
            // 구독자 없음은 에러가 아님
            Err(_) => Ok(0),
        }
    }

    /// 토픽을 구독합니다.
    pub fn subscribe(&self, topic: Topic) -> BusSubscription {
        let receiver = self.senders[&topic].subscribe();
        BusSubscription {
            topic,
            receiver,
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// 구독 핸들러를 워커 태스크로 등록합니다.
    ///
    /// 핸들러 에러는 토픽/봉투 정보와 함께 로그로 남기고 카운트하며,
    /// 다른 구독자나 발행자에게 전파되지 않습니다.
    pub async fn spawn_handler<F, Fut>(&self, name: &str, topic: Topic, handler: F)
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = KquantResult<()>> + Send,
    {
        let mut subscription = self.subscribe(topic);
        let metrics = Arc::clone(&self.metrics);
        let shutdown = self.shutdown.clone();
        let worker_name = name.to_string();

        let handle = tokio::spawn(async move {
            debug!(worker = %worker_name, topic = %topic, "Handler worker started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    delivery = subscription.recv() => {
                        match delivery {
                            Some(Delivery::Event(envelope)) => {
                                let started = std::time::Instant::now();
                                let envelope_id = envelope.id;
                                if let Err(e) = handler(envelope).await {
                                    metrics.record_handler_failure(topic);
                                    error!(
                                        worker = %worker_name,
                                        topic = %topic,
                                        envelope_id = %envelope_id,
                                        error = %e,
                                        "Handler failed"
                                    );
                                }
                                metrics.record_handler_latency(
                                    topic,
                                    started.elapsed().as_secs_f64() * 1000.0,
                                );
                            }
                            Some(Delivery::Lagged(n)) => {
                                warn!(worker = %worker_name, topic = %topic, skipped = n, "Subscriber lagged");
                            }
                            None => break,
                        }
                    }
                }
            }
            debug!(worker = %worker_name, topic = %topic, "Handler worker stopped");
        });

        self.workers.lock().await.push(handle);
    }

    /// 하트비트 발행 태스크를 시작합니다.
    pub async fn start_heartbeat(self: &Arc<Self>, source_id: &str, interval: Duration) {
        let bus = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        let source = source_id.to_string();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let envelope = Envelope::new(Topic::Heartbeat, source.clone(), Payload::Heartbeat);
                        if let Err(e) = bus.publish(envelope) {
                            warn!(error = %e, "Heartbeat publish failed");
                        }
                    }
                }
            }
        });

        self.workers.lock().await.push(handle);
    }

    /// 버스를 정지합니다.
    ///
    /// 유예 시간 동안 워커의 잔여 전달 처리를 기다린 뒤 강제 종료합니다.
    pub async fn stop(&self) {
        info!("EventBus stopping");
        self.shutdown.cancel();

        let mut workers = self.workers.lock().await;
        let drain = async {
            for handle in workers.iter_mut() {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(self.shutdown_grace, drain).await.is_err() {
            warn!("EventBus drain grace expired, aborting workers");
            for handle in workers.iter() {
                handle.abort();
            }
        }
        workers.clear();
        info!("EventBus stopped");
    }

    /// 메트릭 핸들을 반환합니다.
    pub fn metrics(&self) -> Arc<BusMetrics> {
        Arc::clone(&self.metrics)
    }

    /// 종료 토큰을 반환합니다 (컴포넌트 협조 종료용).
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
