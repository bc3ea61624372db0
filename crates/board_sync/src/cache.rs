//! Per-board keyed holder of the current view model.
//!
//! Every write replaces the whole `Arc<BoardView>` under the entry lock, so a
//! reader sees either a complete model or nothing. Each replace bumps the
//! entry's revision, which the loader and the mutation engine use to detect
//! that a newer model landed while they were waiting on the network.

use std::{collections::HashMap, sync::Arc};

use shared::domain::BoardId;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::{error::SyncError, model::BoardView};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Loading,
    Ready,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Replaced { board_id: BoardId, revision: u64 },
    Invalidated { board_id: BoardId },
    LoadFailed { board_id: BoardId, message: String },
    Removed { board_id: BoardId },
}

struct CacheEntry {
    status: LoadStatus,
    model: Option<Arc<BoardView>>,
    revision: u64,
}

impl CacheEntry {
    fn loading() -> Self {
        Self {
            status: LoadStatus::Loading,
            model: None,
            revision: 0,
        }
    }
}

/// Result of an optimistic [`BoardCache::update`].
#[derive(Debug, Clone)]
pub struct Applied {
    pub snapshot: Arc<BoardView>,
    pub next: Arc<BoardView>,
    pub revision: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LoadOutcome {
    Installed(Arc<BoardView>),
    /// A local write replaced the model after the fetch started.
    Superseded(Arc<BoardView>),
    /// The board was closed while the fetch was in flight.
    Closed,
}

pub struct BoardCache {
    entries: RwLock<HashMap<BoardId, CacheEntry>>,
    events: broadcast::Sender<CacheEvent>,
}

impl BoardCache {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            entries: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    pub async fn get(&self, board_id: BoardId) -> Option<Arc<BoardView>> {
        self.entries
            .read()
            .await
            .get(&board_id)
            .and_then(|entry| entry.model.clone())
    }

    /// `None` means the board is absent from the cache.
    pub async fn status(&self, board_id: BoardId) -> Option<LoadStatus> {
        self.entries
            .read()
            .await
            .get(&board_id)
            .map(|entry| entry.status.clone())
    }

    pub async fn revision(&self, board_id: BoardId) -> Option<u64> {
        self.entries
            .read()
            .await
            .get(&board_id)
            .map(|entry| entry.revision)
    }

    /// Whole replace; creates the entry when absent.
    pub async fn set(&self, board_id: BoardId, model: BoardView) -> u64 {
        let revision = {
            let mut entries = self.entries.write().await;
            let entry = entries.entry(board_id).or_insert_with(CacheEntry::loading);
            install(entry, Arc::new(model))
        };
        let _ = self
            .events
            .send(CacheEvent::Replaced { board_id, revision });
        revision
    }

    /// Computes the next model from the current one and installs it. The
    /// transform runs under the entry lock, so two updates against the same
    /// board never interleave.
    pub async fn update<F>(&self, board_id: BoardId, transform: F) -> Result<Applied, SyncError>
    where
        F: FnOnce(&BoardView) -> Result<BoardView, SyncError>,
    {
        let applied = {
            let mut entries = self.entries.write().await;
            let entry = entries
                .get_mut(&board_id)
                .ok_or(SyncError::NotLoaded(board_id))?;
            let snapshot = entry.model.clone().ok_or(SyncError::NotLoaded(board_id))?;
            let next = Arc::new(transform(&snapshot)?);
            let revision = install(entry, Arc::clone(&next));
            Applied {
                snapshot,
                next,
                revision,
            }
        };
        let _ = self.events.send(CacheEvent::Replaced {
            board_id,
            revision: applied.revision,
        });
        Ok(applied)
    }

    /// Marks the entry stale. The last complete model stays readable until
    /// the refetch replaces it.
    pub async fn invalidate(&self, board_id: BoardId) -> bool {
        let invalidated = {
            let mut entries = self.entries.write().await;
            match entries.get_mut(&board_id) {
                Some(entry) => {
                    entry.status = LoadStatus::Loading;
                    true
                }
                None => false,
            }
        };
        if invalidated {
            let _ = self.events.send(CacheEvent::Invalidated { board_id });
        }
        invalidated
    }

    /// Drops the entry; the board returns to the absent state.
    pub async fn remove(&self, board_id: BoardId) -> bool {
        let removed = self.entries.write().await.remove(&board_id).is_some();
        if removed {
            let _ = self.events.send(CacheEvent::Removed { board_id });
        }
        removed
    }

    /// Puts `snapshot` back if the entry is still at `expected_revision`.
    pub async fn restore(
        &self,
        board_id: BoardId,
        snapshot: Arc<BoardView>,
        expected_revision: u64,
    ) -> bool {
        let revision = {
            let mut entries = self.entries.write().await;
            let Some(entry) = entries.get_mut(&board_id) else {
                return false;
            };
            if entry.revision != expected_revision {
                debug!(
                    board_id = board_id.0,
                    expected_revision,
                    current_revision = entry.revision,
                    "cache: newer model present; snapshot not restored"
                );
                return false;
            }
            install(entry, snapshot)
        };
        let _ = self
            .events
            .send(CacheEvent::Replaced { board_id, revision });
        true
    }

    /// Enters the loading state and returns the revision the fetch starts from.
    pub(crate) async fn begin_load(&self, board_id: BoardId) -> u64 {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(board_id).or_insert_with(CacheEntry::loading);
        entry.status = LoadStatus::Loading;
        entry.revision
    }

    /// Like [`Self::begin_load`], but only for a board that is still open.
    /// Returns `None` without creating an entry once the board was removed.
    pub(crate) async fn begin_refetch(&self, board_id: BoardId) -> Option<u64> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&board_id)?;
        entry.status = LoadStatus::Loading;
        Some(entry.revision)
    }

    pub(crate) async fn complete_load(
        &self,
        board_id: BoardId,
        model: BoardView,
        started_revision: u64,
    ) -> LoadOutcome {
        let (outcome, revision) = {
            let mut entries = self.entries.write().await;
            let Some(entry) = entries.get_mut(&board_id) else {
                return LoadOutcome::Closed;
            };
            match entry.model.clone() {
                Some(current) if entry.revision != started_revision => {
                    entry.status = LoadStatus::Ready;
                    return LoadOutcome::Superseded(current);
                }
                _ => {
                    let model = Arc::new(model);
                    let revision = install(entry, Arc::clone(&model));
                    (LoadOutcome::Installed(model), revision)
                }
            }
        };
        let _ = self
            .events
            .send(CacheEvent::Replaced { board_id, revision });
        outcome
    }

    pub(crate) async fn fail_load(&self, board_id: BoardId, message: String) {
        {
            let mut entries = self.entries.write().await;
            let Some(entry) = entries.get_mut(&board_id) else {
                return;
            };
            entry.status = LoadStatus::Error(message.clone());
        }
        let _ = self
            .events
            .send(CacheEvent::LoadFailed { board_id, message });
    }
}

fn install(entry: &mut CacheEntry, model: Arc<BoardView>) -> u64 {
    entry.model = Some(model);
    entry.status = LoadStatus::Ready;
    entry.revision += 1;
    entry.revision
}

#[cfg(test)]
#[path = "tests/cache_tests.rs"]
mod tests;
