//! Redis pub/sub 브리지.
//!
//! 프로세스 간 배포 시 로컬 버스를 Redis 채널에 연결합니다. 봉투는
//! 버전 필드가 포함된 JSON으로 직렬화됩니다.
//!
//! 순환 방지 규약: 외부로 나가는 봉투는 `source_id`에 `@{node_id}`
//! 접미사를 붙여 발행하고, `@`가 이미 붙은(원격 유입) 봉투는 다시
//! 내보내지 않습니다. 수신 측은 자기 노드 접미사의 봉투를 무시합니다.
//! 코어 엔진은 이 브리지의 존재 여부를 알지 못합니다.

use crate::bus::{Delivery, EventBus};
use crate::envelope::Envelope;
use crate::topic::Topic;
use futures_util::StreamExt;
use kquant_core::{KquantError, KquantResult};
use redis::AsyncCommands;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Redis pub/sub 전송 브리지.
pub struct RedisTransport {
    client: redis::Client,
    /// 이 노드의 식별자
    node_id: String,
}

impl RedisTransport {
    /// Redis에 연결합니다.
    pub fn connect(url: &str, node_id: impl Into<String>) -> KquantResult<Self> {
        let client = redis::Client::open(url).map_err(|e| KquantError::Cache(e.to_string()))?;
        Ok(Self {
            client,
            node_id: node_id.into(),
        })
    }

    /// 봉투 하나를 노드 접미사를 붙여 Redis 채널로 발행합니다.
    pub async fn publish(&self, envelope: &Envelope) -> KquantResult<()> {
        let mut tagged = envelope.clone();
        tagged.source_id = format!("{}@{}", envelope.source_id, self.node_id);

        let json = tagged
            .to_json()
            .map_err(|e| KquantError::Serialization(e.to_string()))?;
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| KquantError::Cache(e.to_string()))?;
        let _: () = conn
            .publish(tagged.topic.channel(), json)
            .await
            .map_err(|e| KquantError::Cache(e.to_string()))?;
        Ok(())
    }

    /// 로컬 버스 → Redis 전달 태스크를 시작합니다.
    ///
    /// 원격에서 유입되어 로컬로 재발행된 봉투(`@` 접미사 포함)는 다시
    /// 내보내지 않습니다.
    pub fn spawn_outbound(
        self: &Arc<Self>,
        bus: &Arc<EventBus>,
        topics: Vec<Topic>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for topic in topics {
            let transport = Arc::clone(self);
            let mut subscription = bus.subscribe(topic);
            handles.push(tokio::spawn(async move {
                while let Some(delivery) = subscription.recv().await {
                    match delivery {
                        Delivery::Event(envelope) => {
                            // 원격 유입 봉투는 재전송하지 않음
                            if envelope.source_id.contains('@') {
                                continue;
                            }
                            if let Err(e) = transport.publish(&envelope).await {
                                warn!(topic = %topic, error = %e, "Outbound bridge publish failed");
                            }
                        }
                        Delivery::Lagged(n) => {
                            warn!(topic = %topic, skipped = n, "Outbound bridge lagged");
                        }
                    }
                }
            }));
        }
        handles
    }

    /// Redis → 로컬 버스 수신 태스크를 시작합니다.
    pub async fn spawn_inbound(
        self: &Arc<Self>,
        bus: Arc<EventBus>,
        topics: Vec<Topic>,
    ) -> KquantResult<JoinHandle<()>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| KquantError::Cache(e.to_string()))?;

        for topic in &topics {
            pubsub
                .subscribe(topic.channel())
                .await
                .map_err(|e| KquantError::Cache(e.to_string()))?;
        }
        info!(topics = topics.len(), "Inbound bridge subscribed");

        let own_suffix = format!("@{}", self.node_id);
        Ok(tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(message) = stream.next().await {
                let payload: String = match message.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        error!(error = %e, "Inbound bridge payload read failed");
                        continue;
                    }
                };
                match Envelope::from_json(&payload) {
                    Ok(envelope) => {
                        // 자기 노드가 내보낸 메시지는 무시
                        if envelope.source_id.ends_with(&own_suffix) {
                            continue;
                        }
                        debug!(topic = %envelope.topic, source = %envelope.source_id, "Inbound envelope");
                        if let Err(e) = bus.publish(envelope) {
                            error!(error = %e, "Inbound bridge republish failed");
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Inbound envelope decode failed");
                    }
                }
            }
        }))
    }
}
