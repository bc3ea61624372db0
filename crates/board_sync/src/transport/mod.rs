//! Seams to the two external collaborators: the Board API and the push
//! channel. Both are traits so the engine can run against fakes.

mod http;
mod push;

pub use http::HttpBoardApi;
pub use push::WsPushChannel;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::{BoardId, CardId, ChecklistItemId, CommentId, FileId, ListId},
    protocol::{
        AttachFileRequest, BoardDto, CardDto, CardPatch, ChecklistItemDto, ChecklistItemPatch,
        CommentDto, CreateCardRequest, CreateChecklistItemRequest, CreateCommentRequest,
        CreateListRequest, FileDto, ListDto, MoveCardRequest, PushEnvelope, RenameListRequest,
        ReorderListsRequest, UpdateCommentRequest,
    },
};
use tokio::sync::broadcast;

#[async_trait]
pub trait BoardApi: Send + Sync {
    async fn fetch_full_board(&self, board_id: BoardId) -> Result<BoardDto>;

    async fn create_list(&self, board_id: BoardId, request: CreateListRequest) -> Result<ListDto>;
    async fn rename_list(
        &self,
        board_id: BoardId,
        list_id: ListId,
        request: RenameListRequest,
    ) -> Result<()>;
    async fn delete_list(&self, board_id: BoardId, list_id: ListId) -> Result<()>;
    async fn reorder_lists(&self, board_id: BoardId, request: ReorderListsRequest) -> Result<()>;

    async fn create_card(&self, board_id: BoardId, request: CreateCardRequest) -> Result<CardDto>;
    async fn update_card(&self, board_id: BoardId, card_id: CardId, patch: CardPatch)
        -> Result<()>;
    async fn move_card(
        &self,
        board_id: BoardId,
        card_id: CardId,
        request: MoveCardRequest,
    ) -> Result<()>;
    async fn delete_card(&self, board_id: BoardId, card_id: CardId) -> Result<()>;

    async fn create_comment(
        &self,
        board_id: BoardId,
        card_id: CardId,
        request: CreateCommentRequest,
    ) -> Result<CommentDto>;
    async fn update_comment(
        &self,
        board_id: BoardId,
        card_id: CardId,
        comment_id: CommentId,
        request: UpdateCommentRequest,
    ) -> Result<()>;
    async fn delete_comment(
        &self,
        board_id: BoardId,
        card_id: CardId,
        comment_id: CommentId,
    ) -> Result<()>;

    async fn create_checklist_item(
        &self,
        board_id: BoardId,
        card_id: CardId,
        request: CreateChecklistItemRequest,
    ) -> Result<ChecklistItemDto>;
    async fn update_checklist_item(
        &self,
        board_id: BoardId,
        card_id: CardId,
        item_id: ChecklistItemId,
        patch: ChecklistItemPatch,
    ) -> Result<()>;
    async fn delete_checklist_item(
        &self,
        board_id: BoardId,
        card_id: CardId,
        item_id: ChecklistItemId,
    ) -> Result<()>;

    async fn attach_file(
        &self,
        board_id: BoardId,
        card_id: CardId,
        request: AttachFileRequest,
    ) -> Result<FileDto>;
    async fn detach_file(&self, board_id: BoardId, card_id: CardId, file_id: FileId)
        -> Result<()>;
}

/// Topic-scoped change notices from other collaborators.
#[async_trait]
pub trait PushChannel: Send + Sync {
    fn is_connected(&self) -> bool;
    async fn subscribe(&self, topic: &str) -> Result<broadcast::Receiver<PushEnvelope>>;
    async fn unsubscribe(&self, topic: &str) -> Result<()>;
}

/// Push channel that never connects; boards only change through local writes
/// and explicit refetches.
pub struct MissingPushChannel;

#[async_trait]
impl PushChannel for MissingPushChannel {
    fn is_connected(&self) -> bool {
        false
    }

    async fn subscribe(&self, topic: &str) -> Result<broadcast::Receiver<PushEnvelope>> {
        Err(anyhow!("push channel is unavailable; cannot subscribe to {topic}"))
    }

    async fn unsubscribe(&self, _topic: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
#[path = "../tests/transport_tests.rs"]
mod tests;
