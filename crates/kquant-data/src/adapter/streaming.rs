//! 스트리밍 (WebSocket) 어댑터.
//!
//! 장기 연결을 유지하며, 끊기면 백오프 재연결 후 전체 종목을
//! 재구독합니다. 와이어 프로토콜은 브로커마다 다르므로 프레임
//! 해석과 구독 메시지 생성은 `StreamCodec`에 위임합니다.

use crate::adapter::{AdapterHealth, BackoffPolicy, MarketAdapter};
use crate::error::{DataError, DataResult};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use kquant_core::{MarketTick, Symbol};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// 브로커 와이어 프로토콜 코덱.
///
/// 수신 프레임을 정규화된 틱으로 해석하고, 구독/해제 요청 프레임을
/// 생성합니다. 구현체는 브로커별 외부 협력자입니다.
pub trait StreamCodec: Send + Sync + 'static {
    /// 수신 텍스트 프레임을 틱으로 해석합니다.
    ///
    /// 시세가 아닌 프레임(핑, 구독 확인 등)은 `None`을 반환합니다.
    fn decode(&self, frame: &str) -> Option<MarketTick>;

    /// 구독 요청 프레임을 생성합니다.
    fn subscribe_frame(&self, symbol: &Symbol) -> String;

    /// 구독 해제 요청 프레임을 생성합니다.
    fn unsubscribe_frame(&self, symbol: &Symbol) -> String;
}

/// 스트리밍 어댑터 설정.
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// WebSocket 엔드포인트 URL
    pub url: String,
    /// ping 전송 간격
    pub ping_interval: Duration,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            url: "wss://localhost:9443/ws".to_string(),
            ping_interval: Duration::from_secs(30),
        }
    }
}

enum Command {
    Subscribe(Symbol),
    Unsubscribe(Symbol),
}

/// 스트리밍 어댑터.
pub struct StreamingAdapter {
    name: String,
    config: StreamingConfig,
    command_tx: Option<mpsc::Sender<Command>>,
    codec: std::sync::Arc<dyn StreamCodec>,
    tick_tx: mpsc::Sender<MarketTick>,
    health_tx: mpsc::Sender<AdapterHealth>,
}

impl StreamingAdapter {
    /// 새 스트리밍 어댑터를 생성합니다.
    pub fn new(
        name: impl Into<String>,
        config: StreamingConfig,
        codec: std::sync::Arc<dyn StreamCodec>,
        tick_tx: mpsc::Sender<MarketTick>,
        health_tx: mpsc::Sender<AdapterHealth>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            command_tx: None,
            codec,
            tick_tx,
            health_tx,
        }
    }

    /// 연결 태스크를 구동합니다.
    ///
    /// 연결이 끊기면 백오프 후 재연결하고 구독 중이던 전 종목을
    /// 재구독합니다. 백오프 한도를 소진하면 `Failed`를 보고하고
    /// 종료합니다.
    async fn run_connection_loop(
        name: String,
        config: StreamingConfig,
        codec: std::sync::Arc<dyn StreamCodec>,
        tick_tx: mpsc::Sender<MarketTick>,
        health_tx: mpsc::Sender<AdapterHealth>,
        mut command_rx: mpsc::Receiver<Command>,
    ) {
        let mut backoff = BackoffPolicy::default();
        let mut subscribed: HashSet<Symbol> = HashSet::new();
        let mut first_connect = true;

        loop {
            let (ws_stream, _) = match connect_async(&config.url).await {
                Ok(ok) => ok,
                Err(e) => {
                    warn!(adapter = %name, error = %e, "WebSocket connect failed");
                    match backoff.next_delay() {
                        Some(delay) => {
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        None => {
                            let reason = format!("reconnect budget exhausted: {}", e);
                            error!(adapter = %name, "{}", reason);
                            let _ = health_tx.send(AdapterHealth::Failed(reason)).await;
                            return;
                        }
                    }
                }
            };

            backoff.reset();
            if first_connect {
                first_connect = false;
            } else {
                let _ = health_tx.send(AdapterHealth::Reconnected).await;
            }
            info!(adapter = %name, url = %config.url, "WebSocket connected");

            let (mut writer, mut reader) = ws_stream.split();

            // 재연결 시 전체 종목 재구독
            for symbol in &subscribed {
                let frame = codec.subscribe_frame(symbol);
                if let Err(e) = writer.send(Message::Text(frame)).await {
                    warn!(adapter = %name, symbol = %symbol, error = %e, "Resubscribe failed");
                }
            }

            let mut ping_interval = tokio::time::interval(config.ping_interval);
            ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            let disconnected = loop {
                tokio::select! {
                    frame = reader.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                if let Some(tick) = codec.decode(&text) {
                                    if tick_tx.send(tick).await.is_err() {
                                        debug!(adapter = %name, "Tick channel closed, stopping");
                                        return;
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                let _ = writer.send(Message::Pong(data)).await;
                            }
                            Some(Ok(Message::Close(_))) | None => break true,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!(adapter = %name, error = %e, "WebSocket read error");
                                break true;
                            }
                        }
                    }
                    _ = ping_interval.tick() => {
                        if writer.send(Message::Ping(Vec::new())).await.is_err() {
                            break true;
                        }
                        let _ = health_tx.send(AdapterHealth::Heartbeat).await;
                    }
                    command = command_rx.recv() => {
                        match command {
                            Some(Command::Subscribe(symbol)) => {
                                let frame = codec.subscribe_frame(&symbol);
                                subscribed.insert(symbol);
                                if writer.send(Message::Text(frame)).await.is_err() {
                                    break true;
                                }
                            }
                            Some(Command::Unsubscribe(symbol)) => {
                                let frame = codec.unsubscribe_frame(&symbol);
                                subscribed.remove(&symbol);
                                if writer.send(Message::Text(frame)).await.is_err() {
                                    break true;
                                }
                            }
                            None => return,
                        }
                    }
                }
            };

            if disconnected {
                warn!(adapter = %name, "WebSocket disconnected");
                let _ = health_tx.send(AdapterHealth::Disconnected).await;
            }
        }
    }
}

#[async_trait]
impl MarketAdapter for StreamingAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> DataResult<()> {
        if self.command_tx.is_some() {
            return Ok(());
        }
        let (command_tx, command_rx) = mpsc::channel(64);
        self.command_tx = Some(command_tx);

        tokio::spawn(Self::run_connection_loop(
            self.name.clone(),
            self.config.clone(),
            std::sync::Arc::clone(&self.codec),
            self.tick_tx.clone(),
            self.health_tx.clone(),
            command_rx,
        ));
        Ok(())
    }

    async fn subscribe(&mut self, symbol: &Symbol) -> DataResult<()> {
        let tx = self
            .command_tx
            .as_ref()
            .ok_or_else(|| DataError::Connection("not connected".to_string()))?;
        tx.send(Command::Subscribe(symbol.clone()))
            .await
            .map_err(|_| DataError::Connection("adapter task stopped".to_string()))
    }

    async fn unsubscribe(&mut self, symbol: &Symbol) -> DataResult<()> {
        let tx = self
            .command_tx
            .as_ref()
            .ok_or_else(|| DataError::Connection("not connected".to_string()))?;
        tx.send(Command::Unsubscribe(symbol.clone()))
            .await
            .map_err(|_| DataError::Connection("adapter task stopped".to_string()))
    }
}
