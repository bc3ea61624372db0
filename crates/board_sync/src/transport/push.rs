use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::{
    domain::UserId,
    protocol::{PushClientFrame, PushEnvelope, PushServerFrame},
};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use super::PushChannel;

struct PushShared {
    connected: AtomicBool,
    topics: Mutex<HashMap<String, broadcast::Sender<PushEnvelope>>>,
    capacity: usize,
}

impl PushShared {
    async fn dispatch(&self, text: &str) {
        let frame = match serde_json::from_str::<PushServerFrame>(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("push: ignoring malformed frame: {err}");
                return;
            }
        };
        let topics = self.topics.lock().await;
        match topics.get(&frame.topic) {
            Some(sender) => {
                let _ = sender.send(frame.message);
            }
            None => debug!(topic = %frame.topic, "push: frame for unsubscribed topic"),
        }
    }
}

/// WebSocket push channel. Connects once in the background; when the socket
/// closes every topic receiver is closed and readiness stays false.
pub struct WsPushChannel {
    shared: Arc<PushShared>,
    outbound: mpsc::UnboundedSender<PushClientFrame>,
    task: JoinHandle<()>,
}

impl WsPushChannel {
    pub fn connect(push_url: &str, user_id: UserId, capacity: usize) -> Result<Arc<Self>> {
        let mut url =
            Url::parse(push_url).with_context(|| format!("invalid push url: {push_url}"))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => bail!("push url must use ws:// or wss://, got {other}://"),
        }
        url.query_pairs_mut()
            .append_pair("user_id", &user_id.0.to_string());

        let shared = Arc::new(PushShared {
            connected: AtomicBool::new(false),
            topics: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        });
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_connection(
            url.to_string(),
            Arc::clone(&shared),
            outbound_rx,
        ));
        Ok(Arc::new(Self {
            shared,
            outbound,
            task,
        }))
    }
}

impl Drop for WsPushChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_connection(
    url: String,
    shared: Arc<PushShared>,
    mut outbound: mpsc::UnboundedReceiver<PushClientFrame>,
) {
    let (stream, _) = match connect_async(&url).await {
        Ok(connected) => connected,
        Err(err) => {
            warn!("push: failed to connect websocket {url}: {err}");
            return;
        }
    };
    let (mut writer, mut reader) = stream.split();
    shared.connected.store(true, Ordering::Release);
    info!("push: connected to {url}");

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!("push: failed to encode frame: {err}");
                        continue;
                    }
                };
                if let Err(err) = writer.send(Message::Text(text)).await {
                    warn!("push: send failed: {err}");
                    break;
                }
            }
            message = reader.next() => match message {
                Some(Ok(Message::Text(text))) => shared.dispatch(&text).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!("push: receive failed: {err}");
                    break;
                }
            },
        }
    }

    shared.connected.store(false, Ordering::Release);
    shared.topics.lock().await.clear();
    warn!("push: disconnected; boards keep their last known state");
}

#[async_trait]
impl PushChannel for WsPushChannel {
    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    async fn subscribe(&self, topic: &str) -> Result<broadcast::Receiver<PushEnvelope>> {
        if !self.is_connected() {
            return Err(anyhow!("push channel is not connected; cannot subscribe to {topic}"));
        }
        let mut topics = self.shared.topics.lock().await;
        if let Some(sender) = topics.get(topic) {
            return Ok(sender.subscribe());
        }
        let (sender, receiver) = broadcast::channel(self.shared.capacity);
        self.outbound
            .send(PushClientFrame::Subscribe {
                topic: topic.to_string(),
            })
            .map_err(|_| anyhow!("push channel closed while subscribing to {topic}"))?;
        topics.insert(topic.to_string(), sender);
        Ok(receiver)
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        if self.shared.topics.lock().await.remove(topic).is_none() {
            return Ok(());
        }
        // A closed socket has no server-side subscription left to cancel.
        let _ = self.outbound.send(PushClientFrame::Unsubscribe {
            topic: topic.to_string(),
        });
        Ok(())
    }
}
