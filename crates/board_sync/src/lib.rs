//! Board state synchronization.
//!
//! Keeps a normalized view model per open board, applies local writes
//! optimistically with rollback, and refetches when collaborators change the
//! board. [`BoardSync`] wires the pieces together; each piece is usable on
//! its own against the [`transport`] traits.

pub mod cache;
pub mod comment_tree;
pub mod config;
pub mod error;
pub mod loader;
pub mod model;
pub mod mutation;
pub mod normalizer;
pub mod reconcile;
pub mod reducers;
pub mod reorder;
pub mod transport;

use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use shared::domain::{BoardId, CardId, UserId};
use tokio::sync::broadcast;
use tracing::info;

pub use cache::{BoardCache, CacheEvent, LoadStatus};
pub use config::{load_settings, SyncSettings};
pub use error::{Notice, NoticeCategory, ReduceError, SyncError};
pub use loader::BoardLoader;
pub use model::{select_card, BoardView, CardView, CommentNode, ListView};
pub use mutation::{MutationEngine, MutationKind};
pub use reconcile::ReconciliationSubscriber;
pub use reorder::{
    DragItem, DragOutcome, DragSurface, DropContainer, DropLocation, NoopDragSurface,
    ReorderCoordinator, ReorderPlan,
};
pub use transport::{BoardApi, HttpBoardApi, MissingPushChannel, PushChannel, WsPushChannel};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A mutation failed; the board was rolled back or is being refetched.
    Notice(Notice),
    /// Another collaborator changed the board; a refetch is underway.
    RemoteChange { board_id: BoardId, kind: String },
    /// The board's push subscription ended. It keeps its last known state
    /// until refetched or reopened.
    PushDisconnected { board_id: BoardId },
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub readiness_poll: Duration,
    pub event_capacity: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from(&SyncSettings::default())
    }
}

impl From<&SyncSettings> for SyncOptions {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            readiness_poll: settings.readiness_poll_interval(),
            event_capacity: settings.event_capacity,
        }
    }
}

pub struct BoardSync {
    cache: Arc<BoardCache>,
    loader: Arc<BoardLoader>,
    engine: Arc<MutationEngine>,
    reorder: ReorderCoordinator,
    subscriber: ReconciliationSubscriber,
    events: broadcast::Sender<SyncEvent>,
    local_user: UserId,
}

impl BoardSync {
    pub fn new(
        api: Arc<dyn BoardApi>,
        push: Arc<dyn PushChannel>,
        local_user: UserId,
        options: SyncOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        let cache = Arc::new(BoardCache::new(options.event_capacity));
        let loader = BoardLoader::new(Arc::clone(&api), Arc::clone(&cache));
        let engine = Arc::new(MutationEngine::new(
            api,
            Arc::clone(&cache),
            Arc::clone(&loader),
            events.clone(),
            local_user,
        ));
        let reorder = ReorderCoordinator::new(
            Arc::clone(&engine),
            Arc::clone(&cache),
            Arc::new(NoopDragSurface),
        );
        let subscriber = ReconciliationSubscriber::new(
            push,
            Arc::clone(&loader),
            events.clone(),
            local_user,
            options.readiness_poll,
        );
        Self {
            cache,
            loader,
            engine,
            reorder,
            subscriber,
            events,
            local_user,
        }
    }

    /// HTTP Board API plus WebSocket push channel, both from settings.
    pub fn connect(settings: &SyncSettings) -> Result<Self> {
        let user_id = settings
            .user_id
            .ok_or_else(|| anyhow!("no user id configured; set user_id or APP__USER_ID"))?;
        let api = HttpBoardApi::with_timeout(
            settings.server_url.clone(),
            user_id,
            settings.request_timeout(),
        )?;
        let push = WsPushChannel::connect(&settings.push_url()?, user_id, settings.event_capacity)?;
        Ok(Self::new(
            Arc::new(api),
            push,
            user_id,
            SyncOptions::from(settings),
        ))
    }

    pub fn with_drag_surface(mut self, surface: Arc<dyn DragSurface>) -> Self {
        self.reorder = ReorderCoordinator::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.cache),
            surface,
        );
        self
    }

    pub fn local_user(&self) -> UserId {
        self.local_user
    }

    /// Subscribes to the board's push topic and loads it. A failed load
    /// leaves the board in [`LoadStatus::Error`]; call [`Self::refetch`] to
    /// retry.
    pub async fn open_board(&self, board_id: BoardId) -> Result<Arc<BoardView>, SyncError> {
        info!(board_id = board_id.0, "sync: opening board");
        self.subscriber.mount(board_id).await;
        self.loader.load(board_id).await
    }

    /// Ends the board's subscription and drops its model.
    pub async fn close_board(&self, board_id: BoardId) {
        info!(board_id = board_id.0, "sync: closing board");
        self.subscriber.unmount(board_id).await;
        self.cache.remove(board_id).await;
    }

    pub async fn refetch(&self, board_id: BoardId) -> Result<Arc<BoardView>, SyncError> {
        self.loader.load(board_id).await
    }

    pub async fn view(&self, board_id: BoardId) -> Option<Arc<BoardView>> {
        self.cache.get(board_id).await
    }

    pub async fn status(&self, board_id: BoardId) -> Option<LoadStatus> {
        self.cache.status(board_id).await
    }

    /// The open card, read from the current model.
    pub async fn select_card(&self, board_id: BoardId, card_id: CardId) -> Option<CardView> {
        let view = self.cache.get(board_id).await?;
        select_card(&view, card_id).cloned()
    }

    pub fn engine(&self) -> &MutationEngine {
        &self.engine
    }

    pub fn reorder(&self) -> &ReorderCoordinator {
        &self.reorder
    }

    pub async fn handle_drag(
        &self,
        board_id: BoardId,
        outcome: DragOutcome,
    ) -> Result<ReorderPlan, SyncError> {
        self.reorder.handle(board_id, outcome).await
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_cache(&self) -> broadcast::Receiver<CacheEvent> {
        self.cache.subscribe()
    }

    pub async fn is_subscribed(&self, board_id: BoardId) -> bool {
        self.subscriber.is_mounted(board_id).await
    }

    /// Resolves once no refetch for the board is running or queued.
    pub async fn wait_idle(&self, board_id: BoardId) {
        self.loader.wait_idle(board_id).await
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
