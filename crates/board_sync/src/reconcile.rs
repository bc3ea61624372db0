//! Push-channel listener that turns remote change notices into refetches.
//!
//! Payloads are never merged into the model; a notice only marks the board
//! stale so the loader pulls server truth through the normalizer.

use std::{collections::HashMap, sync::Arc, time::Duration};

use shared::{domain::BoardId, domain::UserId, protocol::PushEnvelope};
use tokio::{
    sync::{broadcast, broadcast::error::RecvError, Mutex},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use crate::{loader::BoardLoader, transport::PushChannel, SyncEvent};

pub struct ReconciliationSubscriber {
    push: Arc<dyn PushChannel>,
    loader: Arc<BoardLoader>,
    events: broadcast::Sender<SyncEvent>,
    local_user: UserId,
    poll_interval: Duration,
    active: Mutex<HashMap<BoardId, JoinHandle<()>>>,
}

impl ReconciliationSubscriber {
    pub fn new(
        push: Arc<dyn PushChannel>,
        loader: Arc<BoardLoader>,
        events: broadcast::Sender<SyncEvent>,
        local_user: UserId,
        poll_interval: Duration,
    ) -> Self {
        Self {
            push,
            loader,
            events,
            local_user,
            poll_interval,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Starts listening on the board's topic. Mounting an already mounted
    /// board replaces its subscription, so there is never more than one.
    pub async fn mount(&self, board_id: BoardId) {
        let listener = TopicListener {
            push: Arc::clone(&self.push),
            loader: Arc::clone(&self.loader),
            events: self.events.clone(),
            local_user: self.local_user,
            poll_interval: self.poll_interval,
            board_id,
        };
        let task = tokio::spawn(listener.run());
        let previous = self.active.lock().await.insert(board_id, task);
        if let Some(previous) = previous {
            debug!(board_id = board_id.0, "reconcile: replacing existing subscription");
            previous.abort();
        }
    }

    /// Stops listening for this board only.
    pub async fn unmount(&self, board_id: BoardId) -> bool {
        let Some(task) = self.active.lock().await.remove(&board_id) else {
            return false;
        };
        task.abort();
        if let Err(err) = self.push.unsubscribe(&board_id.topic()).await {
            warn!(board_id = board_id.0, "reconcile: unsubscribe failed: {err:#}");
        }
        true
    }

    /// True while the board's listener is alive. A listener whose topic
    /// closed or whose subscribe failed no longer counts.
    pub async fn is_mounted(&self, board_id: BoardId) -> bool {
        self.active
            .lock()
            .await
            .get(&board_id)
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for ReconciliationSubscriber {
    fn drop(&mut self) {
        for (_, task) in self.active.get_mut().drain() {
            task.abort();
        }
    }
}

struct TopicListener {
    push: Arc<dyn PushChannel>,
    loader: Arc<BoardLoader>,
    events: broadcast::Sender<SyncEvent>,
    local_user: UserId,
    poll_interval: Duration,
    board_id: BoardId,
}

impl TopicListener {
    async fn run(self) {
        let board_id = self.board_id;
        let topic = board_id.topic();

        if !self.push.is_connected() {
            debug!(board_id = board_id.0, "reconcile: push channel not ready; polling");
            let mut ready = tokio::time::interval(self.poll_interval);
            ready.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ready.tick().await;
                if self.push.is_connected() {
                    break;
                }
            }
        }

        let mut notices = match self.push.subscribe(&topic).await {
            Ok(notices) => notices,
            Err(err) => {
                warn!(
                    board_id = board_id.0,
                    "reconcile: subscribe failed; board keeps its last known state: {err:#}"
                );
                let _ = self.events.send(SyncEvent::PushDisconnected { board_id });
                return;
            }
        };
        info!(board_id = board_id.0, %topic, "reconcile: subscribed");

        loop {
            match notices.recv().await {
                Ok(envelope) => self.on_notice(envelope).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(board_id = board_id.0, skipped, "reconcile: missed change notices; refetching");
                    self.loader.invalidate(board_id).await;
                }
                Err(RecvError::Closed) => {
                    warn!(
                        board_id = board_id.0,
                        "reconcile: push channel closed; board keeps its last known state"
                    );
                    let _ = self.events.send(SyncEvent::PushDisconnected { board_id });
                    return;
                }
            }
        }
    }

    async fn on_notice(&self, envelope: PushEnvelope) {
        let board_id = self.board_id;
        if envelope.sender_id == self.local_user {
            debug!(board_id = board_id.0, kind = %envelope.kind, "reconcile: ignoring own change");
            return;
        }
        debug!(
            board_id = board_id.0,
            kind = %envelope.kind,
            sender_id = envelope.sender_id.0,
            "reconcile: remote change; refetching"
        );
        let _ = self.events.send(SyncEvent::RemoteChange {
            board_id,
            kind: envelope.kind,
        });
        self.loader.invalidate(board_id).await;
    }
}

#[cfg(test)]
#[path = "tests/reconcile_tests.rs"]
mod tests;
