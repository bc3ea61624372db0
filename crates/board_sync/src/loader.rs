//! Fetch-normalize-install for one board, with refetch coalescing.
//!
//! At most one fetch per board is in flight. Refetch requests arriving while
//! one runs collapse into a single rerun once it finishes, so the model ends
//! on server truth no matter how many completions asked for it.

use std::{collections::HashMap, sync::Arc};

use anyhow::anyhow;
use shared::domain::BoardId;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::{
    cache::{BoardCache, LoadOutcome},
    error::SyncError,
    model::BoardView,
    normalizer::normalize_board,
    transport::BoardApi,
};

struct InflightRefetch {
    rerun: bool,
}

pub struct BoardLoader {
    api: Arc<dyn BoardApi>,
    cache: Arc<BoardCache>,
    inflight: Mutex<HashMap<BoardId, InflightRefetch>>,
    idle: Notify,
}

impl BoardLoader {
    pub fn new(api: Arc<dyn BoardApi>, cache: Arc<BoardCache>) -> Arc<Self> {
        Arc::new(Self {
            api,
            cache,
            inflight: Mutex::new(HashMap::new()),
            idle: Notify::new(),
        })
    }

    /// Fetches the board now and installs the normalized model, creating the
    /// cache entry if the board is not open yet.
    pub async fn load(&self, board_id: BoardId) -> Result<Arc<BoardView>, SyncError> {
        let started_revision = self.cache.begin_load(board_id).await;
        self.fetch_and_install(board_id, started_revision).await
    }

    /// Refetches a board that is still open. Returns `None` when it was
    /// closed; the check and the move to loading happen under one lock.
    pub async fn reload_if_open(
        &self,
        board_id: BoardId,
    ) -> Option<Result<Arc<BoardView>, SyncError>> {
        let started_revision = self.cache.begin_refetch(board_id).await?;
        Some(self.fetch_and_install(board_id, started_revision).await)
    }

    async fn fetch_and_install(
        &self,
        board_id: BoardId,
        started_revision: u64,
    ) -> Result<Arc<BoardView>, SyncError> {
        let fetched = self.api.fetch_full_board(board_id).await.and_then(|dto| {
            if dto.board_id != board_id {
                return Err(anyhow!(
                    "requested board {} but the server returned board {}",
                    board_id.0,
                    dto.board_id.0
                ));
            }
            Ok(dto)
        });

        let dto = match fetched {
            Ok(dto) => dto,
            Err(source) => {
                warn!(board_id = board_id.0, "loader: fetch failed: {source:#}");
                self.cache
                    .fail_load(board_id, format!("{source:#}"))
                    .await;
                return Err(SyncError::Load { board_id, source });
            }
        };

        match self
            .cache
            .complete_load(board_id, normalize_board(&dto), started_revision)
            .await
        {
            LoadOutcome::Installed(view) => {
                debug!(
                    board_id = board_id.0,
                    lists = view.list_order.len(),
                    cards = view.card_count(),
                    "loader: board installed"
                );
                Ok(view)
            }
            LoadOutcome::Superseded(current) => {
                debug!(
                    board_id = board_id.0,
                    "loader: local write landed during fetch; keeping the newer model"
                );
                Ok(current)
            }
            LoadOutcome::Closed => {
                info!(board_id = board_id.0, "loader: board closed while loading");
                Err(SyncError::NotLoaded(board_id))
            }
        }
    }

    /// Marks the board stale and schedules a background refetch.
    pub async fn invalidate(self: &Arc<Self>, board_id: BoardId) {
        if self.cache.invalidate(board_id).await {
            self.schedule_refetch(board_id).await;
        }
    }

    pub async fn schedule_refetch(self: &Arc<Self>, board_id: BoardId) {
        {
            let mut inflight = self.inflight.lock().await;
            if let Some(pending) = inflight.get_mut(&board_id) {
                pending.rerun = true;
                debug!(board_id = board_id.0, "loader: refetch coalesced");
                return;
            }
            inflight.insert(board_id, InflightRefetch { rerun: false });
        }

        let loader = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                // Failures are already recorded on the cache entry.
                if loader.reload_if_open(board_id).await.is_none() {
                    debug!(board_id = board_id.0, "loader: board closed; refetch dropped");
                }

                let mut inflight = loader.inflight.lock().await;
                match inflight.get_mut(&board_id) {
                    Some(pending) if pending.rerun => pending.rerun = false,
                    _ => {
                        inflight.remove(&board_id);
                        loader.idle.notify_waiters();
                        break;
                    }
                }
            }
        });
    }

    pub async fn is_refetching(&self, board_id: BoardId) -> bool {
        self.inflight.lock().await.contains_key(&board_id)
    }

    /// Resolves once no refetch for the board is running or queued.
    pub async fn wait_idle(&self, board_id: BoardId) {
        loop {
            let idle = self.idle.notified();
            if !self.inflight.lock().await.contains_key(&board_id) {
                return;
            }
            idle.await;
        }
    }
}

#[cfg(test)]
#[path = "tests/loader_tests.rs"]
mod tests;
