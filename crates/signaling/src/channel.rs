//! 信令通道
//!
//! 每条连接有一个读循环和一个写任务：写任务独占 sink，保证发往同一 peer 的消息保持发送顺序。
//! 连接断开后由 supervisor 按指数退避重连，每次重连都重新获取令牌。

use crate::error::SignalingError;
use crate::event::SignalEvent;
use crate::message::{Frame, Signal};
use async_trait::async_trait;
use auth::CredentialManager;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use sessioncast_common::config::SignalingConfig;
use sessioncast_common::{Backoff, NetworkId, PeerId};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Outbound = Arc<Mutex<mpsc::Receiver<Message>>>;

const OUTBOUND_CAPACITY: usize = 256;
const EVENT_CAPACITY: usize = 1024;

/// 信令发送抽象，peer 管理器只依赖此 trait
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn send_signal(&self, peer: PeerId, signal: Signal) -> Result<(), SignalingError>;
}

/// 信令通道
pub struct SignalingChannel {
    network_id: NetworkId,
    outbound: mpsc::Sender<Message>,
    connected: Arc<AtomicBool>,
    events: std::sync::Mutex<Option<mpsc::Receiver<SignalEvent>>>,
    cancel: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl SignalingChannel {
    /// 建立首条连接并启动后台 supervisor
    ///
    /// 首次连接失败直接返回错误；之后的断线由 supervisor 自动重连。
    pub async fn connect(
        config: &SignalingConfig,
        network_id: NetworkId,
        credentials: Arc<CredentialManager>,
        parent: &CancellationToken,
    ) -> Result<Self, SignalingError> {
        let url = format!("{}/{}", config.endpoint.trim_end_matches('/'), network_id);
        let ws = open(&url, &credentials).await?;
        info!("Signaling channel connected as network id {}", network_id);

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let connected = Arc::new(AtomicBool::new(true));
        let cancel = parent.child_token();

        let supervisor = Supervisor {
            url,
            credentials,
            reconnect_initial: config.reconnect_initial(),
            reconnect_max: config.reconnect_max(),
            ping_interval: config.ping_interval(),
            outbound: Arc::new(Mutex::new(outbound_rx)),
            events: events_tx,
            connected: connected.clone(),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(supervisor.run(ws));

        Ok(Self {
            network_id,
            outbound: outbound_tx,
            connected,
            events: std::sync::Mutex::new(Some(events_rx)),
            cancel,
            supervisor: Mutex::new(Some(handle)),
        })
    }

    pub fn network_id(&self) -> NetworkId {
        self.network_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// 取走入站事件流，只能调用一次
    pub fn receive(&self) -> Result<ReceiverStream<SignalEvent>, SignalingError> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| SignalingError::EventsTaken)?;
        events
            .take()
            .map(ReceiverStream::new)
            .ok_or(SignalingError::EventsTaken)
    }

    /// 向指定 peer 发送信令；未连接时返回 [`SignalingError::Disconnected`] 并丢弃消息
    pub async fn send(&self, peer: PeerId, signal: &Signal) -> Result<(), SignalingError> {
        if !self.is_connected() {
            return Err(SignalingError::Disconnected);
        }
        let text = Frame::signal(peer.as_u64(), signal).to_json()?;
        debug!("-> {}: {}", peer, signal_kind(signal));
        self.outbound
            .send(Message::text(text))
            .await
            .map_err(|_| SignalingError::Disconnected)
    }

    /// 关闭通道：发送 Close 帧并等待后台任务退出
    pub async fn close(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.supervisor.lock().await.take()
            && let Err(e) = handle.await
        {
            warn!("Signaling supervisor ended abnormally: {}", e);
        }
        info!("Signaling channel closed");
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl SignalSink for SignalingChannel {
    async fn send_signal(&self, peer: PeerId, signal: Signal) -> Result<(), SignalingError> {
        self.send(peer, &signal).await
    }
}

fn signal_kind(signal: &Signal) -> &'static str {
    match signal {
        Signal::ConnectRequest { .. } => "CONNECTREQUEST",
        Signal::ConnectResponse { .. } => "CONNECTRESPONSE",
        Signal::CandidateAdd { .. } => "CANDIDATEADD",
        Signal::ConnectError { .. } => "CONNECTERROR",
    }
}

/// 以当前令牌打开 WebSocket
async fn open(url: &str, credentials: &CredentialManager) -> Result<WsStream, SignalingError> {
    let token = credentials.current_token().await?;

    let mut request = url.into_client_request()?;
    let auth = HeaderValue::from_str(token.authorization())
        .map_err(|e| SignalingError::connect(format!("invalid authorization header: {e}")))?;
    request.headers_mut().insert("Authorization", auth);

    let (ws, _response) = connect_async(request)
        .await
        .map_err(|e| SignalingError::connect(e.to_string()))?;
    Ok(ws)
}

struct Supervisor {
    url: String,
    credentials: Arc<CredentialManager>,
    reconnect_initial: Duration,
    reconnect_max: Duration,
    ping_interval: Duration,
    outbound: Outbound,
    events: mpsc::Sender<SignalEvent>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Supervisor {
    async fn run(self, first: WsStream) {
        let mut backoff = Backoff::new(self.reconnect_initial, self.reconnect_max);
        let mut ws = first;

        loop {
            let reason = self.serve(ws).await;
            self.connected.store(false, Ordering::SeqCst);
            let dropped = self.drain_outbound().await;

            if self.cancel.is_cancelled() {
                break;
            }

            warn!(
                "Signaling connection lost: {} ({} queued messages dropped)",
                reason, dropped
            );
            self.emit(SignalEvent::Disconnected).await;

            backoff.reset();
            ws = match self.reconnect(&mut backoff).await {
                Some(ws) => ws,
                None => break,
            };
            self.connected.store(true, Ordering::SeqCst);
            self.emit(SignalEvent::Reconnected).await;
        }

        debug!("Signaling supervisor stopped");
    }

    async fn serve(&self, ws: WsStream) -> String {
        let (sink, stream) = ws.split();
        let conn = self.cancel.child_token();

        let writer = tokio::spawn(write_loop(
            sink,
            self.outbound.clone(),
            self.ping_interval,
            conn.clone(),
        ));
        let reason = read_loop(stream, &self.events, &conn).await;

        conn.cancel();
        if let Err(e) = writer.await {
            error!("Signaling writer task failed: {}", e);
        }
        reason
    }

    async fn reconnect(&self, backoff: &mut Backoff) -> Option<WsStream> {
        loop {
            let delay = backoff.next_delay();
            debug!("Reconnecting signaling in {:?}", delay);

            let attempt = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                result = async {
                    tokio::time::sleep(delay).await;
                    open(&self.url, &self.credentials).await
                } => result,
            };

            match attempt {
                Ok(ws) => {
                    info!("Signaling reconnected after {} attempts", backoff.attempts());
                    return Some(ws);
                }
                Err(e) if e.severity().is_fatal() => {
                    error!("Signaling reconnect attempt failed: {}", e);
                }
                Err(e) => warn!("Signaling reconnect attempt failed: {}", e),
            }
        }
    }

    async fn emit(&self, event: SignalEvent) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.events.send(event) => {}
        }
    }

    async fn drain_outbound(&self) -> usize {
        let mut outbound = self.outbound.lock().await;
        let mut dropped = 0;
        while outbound.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    outbound: Outbound,
    ping_interval: Duration,
    conn: CancellationToken,
) {
    let mut outbound = outbound.lock().await;
    let mut ping = tokio::time::interval(ping_interval);
    ping.tick().await;

    loop {
        let message = tokio::select! {
            _ = conn.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            _ = ping.tick() => match Frame::ping().to_json() {
                Ok(text) => Message::text(text),
                Err(_) => continue,
            },
            next = outbound.recv() => match next {
                Some(message) => message,
                None => break,
            },
        };

        if let Err(e) = sink.send(message).await {
            warn!("Signaling write failed: {}", e);
            conn.cancel();
            break;
        }
    }
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    events: &mpsc::Sender<SignalEvent>,
    conn: &CancellationToken,
) -> String {
    loop {
        let next = tokio::select! {
            _ = conn.cancelled() => return "connection cancelled".to_string(),
            next = stream.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                match Frame::parse(&text).and_then(SignalEvent::from_frame) {
                    Ok(Some(event)) => {
                        tokio::select! {
                            _ = conn.cancelled() => return "connection cancelled".to_string(),
                            sent = events.send(event) => if sent.is_err() {
                                return "event receiver dropped".to_string();
                            },
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Dropping signaling frame: {}", e),
                }
            }
            Some(Ok(Message::Close(frame))) => return format!("closed by server: {frame:?}"),
            Some(Ok(_)) => {}
            Some(Err(e)) => return e.to_string(),
            None => return "stream ended".to_string(),
        }
    }
}
