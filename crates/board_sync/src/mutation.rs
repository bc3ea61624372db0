//! Optimistic writes.
//!
//! Every action follows the same path: check permission, install the
//! reducer's next model, issue the remote write, then either patch server ids
//! in and schedule a refetch, or put the snapshot back and report a
//! [`Notice`]. All of it runs through [`MutationEngine::run`], so no action
//! can skip a step.

use std::{
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};

use anyhow::anyhow;
use chrono::Utc;
use shared::{
    domain::{BoardId, CardId, ChecklistItemId, CommentId, FileId, ListId, UserId},
    protocol::{
        AttachFileRequest, CardDto, CardPatch, ChecklistItemDto, ChecklistItemPatch, CommentDto,
        CreateCardRequest, CreateChecklistItemRequest, CreateCommentRequest, CreateListRequest,
        FileDto, ListDto, RenameListRequest, UpdateCommentRequest,
    },
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    cache::BoardCache,
    error::{Notice, ReduceError, SyncError},
    loader::BoardLoader,
    model::{Attachment, BoardView, CommentNode},
    normalizer::normalize_file,
    reducers,
    transport::BoardApi,
    SyncEvent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    MoveCard,
    UpdateCard,
    CompleteCard,
    CreateCard,
    DeleteCard,
    ReorderLists,
    CreateList,
    RenameList,
    DeleteList,
    CreateComment,
    UpdateComment,
    DeleteComment,
    CreateChecklistItem,
    UpdateChecklistItem,
    DeleteChecklistItem,
    AttachFile,
    DetachFile,
}

impl MutationKind {
    /// Verb phrase for notices: "Could not {describe}".
    pub fn describe(self) -> &'static str {
        match self {
            Self::MoveCard => "move the card",
            Self::UpdateCard => "update the card",
            Self::CompleteCard => "change the card's completion",
            Self::CreateCard => "create the card",
            Self::DeleteCard => "delete the card",
            Self::ReorderLists => "reorder the lists",
            Self::CreateList => "create the list",
            Self::RenameList => "rename the list",
            Self::DeleteList => "delete the list",
            Self::CreateComment => "post the comment",
            Self::UpdateComment => "edit the comment",
            Self::DeleteComment => "delete the comment",
            Self::CreateChecklistItem => "add the checklist item",
            Self::UpdateChecklistItem => "update the checklist item",
            Self::DeleteChecklistItem => "remove the checklist item",
            Self::AttachFile => "attach the file",
            Self::DetachFile => "remove the file",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MoveCard => "move_card",
            Self::UpdateCard => "update_card",
            Self::CompleteCard => "complete_card",
            Self::CreateCard => "create_card",
            Self::DeleteCard => "delete_card",
            Self::ReorderLists => "reorder_lists",
            Self::CreateList => "create_list",
            Self::RenameList => "rename_list",
            Self::DeleteList => "delete_list",
            Self::CreateComment => "create_comment",
            Self::UpdateComment => "update_comment",
            Self::DeleteComment => "delete_comment",
            Self::CreateChecklistItem => "create_checklist_item",
            Self::UpdateChecklistItem => "update_checklist_item",
            Self::DeleteChecklistItem => "delete_checklist_item",
            Self::AttachFile => "attach_file",
            Self::DetachFile => "detach_file",
        }
    }

    fn permitted(self, view: &BoardView, actor: UserId) -> bool {
        match self {
            Self::CreateComment | Self::UpdateComment | Self::DeleteComment => {
                view.can_comment(actor)
            }
            _ => view.can_edit(actor),
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Patches server-assigned ids into the optimistic model after a create.
type Confirm<R> = Box<dyn FnOnce(&BoardView, &R) -> Result<BoardView, ReduceError> + Send>;

fn confirm<R>(
    patch: impl FnOnce(&BoardView, &R) -> Result<BoardView, ReduceError> + Send + 'static,
) -> Option<Confirm<R>> {
    Some(Box::new(patch))
}

fn settled(placeholder: bool, entity: impl FnOnce() -> String) -> Result<(), ReduceError> {
    if placeholder {
        return Err(ReduceError::PendingPlaceholder(entity()));
    }
    Ok(())
}

fn pending_list(list_id: ListId) -> bool {
    list_id.is_placeholder() && !list_id.is_completed_list()
}

/// List currently holding the card, for confirms that run after a move.
fn holding_list(view: &BoardView, card_id: CardId, hint: ListId) -> ListId {
    view.find_card(card_id)
        .map(|(list_id, _)| list_id)
        .unwrap_or(hint)
}

pub struct MutationEngine {
    api: Arc<dyn BoardApi>,
    cache: Arc<BoardCache>,
    loader: Arc<BoardLoader>,
    events: broadcast::Sender<SyncEvent>,
    actor: UserId,
    next_placeholder: AtomicI64,
}

impl MutationEngine {
    pub fn new(
        api: Arc<dyn BoardApi>,
        cache: Arc<BoardCache>,
        loader: Arc<BoardLoader>,
        events: broadcast::Sender<SyncEvent>,
        actor: UserId,
    ) -> Self {
        Self {
            api,
            cache,
            loader,
            events,
            actor,
            // -1 is the completed list.
            next_placeholder: AtomicI64::new(-2),
        }
    }

    pub fn actor(&self) -> UserId {
        self.actor
    }

    fn allocate_placeholder(&self) -> i64 {
        self.next_placeholder.fetch_sub(1, Ordering::Relaxed)
    }

    async fn run<R, Fut>(
        &self,
        board_id: BoardId,
        kind: MutationKind,
        reduce: impl FnOnce(&BoardView) -> Result<BoardView, ReduceError>,
        remote: impl FnOnce(Arc<BoardView>) -> Fut,
        confirm: Option<Confirm<R>>,
    ) -> Result<R, SyncError>
    where
        Fut: Future<Output = anyhow::Result<R>>,
    {
        let actor = self.actor;
        let applied = match self
            .cache
            .update(board_id, |view| {
                if !kind.permitted(view, actor) {
                    return Err(SyncError::Forbidden {
                        board_id,
                        user_id: actor,
                        action: kind.describe(),
                    });
                }
                Ok(reduce(view)?)
            })
            .await
        {
            Ok(applied) => applied,
            Err(err) => {
                self.report(board_id, kind, &err, false);
                return Err(err);
            }
        };
        debug!(
            board_id = board_id.0,
            %kind,
            revision = applied.revision,
            "mutation: optimistic model installed"
        );

        match remote(Arc::clone(&applied.next)).await {
            Ok(response) => {
                if let Some(confirm) = confirm {
                    let patched = self
                        .cache
                        .update(board_id, |view| Ok(confirm(view, &response)?))
                        .await;
                    if let Err(err) = patched {
                        // The refetch below brings the server id in anyway.
                        debug!(board_id = board_id.0, %kind, "mutation: server id not patched: {err}");
                    }
                }
                self.loader.schedule_refetch(board_id).await;
                Ok(response)
            }
            Err(source) => {
                let rolled_back = self
                    .cache
                    .restore(board_id, applied.snapshot, applied.revision)
                    .await;
                if rolled_back {
                    info!(board_id = board_id.0, %kind, "mutation: remote write failed; snapshot restored");
                } else {
                    info!(
                        board_id = board_id.0,
                        %kind,
                        "mutation: remote write failed after a newer change; refetching instead of restoring"
                    );
                }
                let err = SyncError::Remote { kind, source };
                self.report(board_id, kind, &err, rolled_back);
                self.loader.schedule_refetch(board_id).await;
                Err(err)
            }
        }
    }

    fn report(&self, board_id: BoardId, kind: MutationKind, err: &SyncError, rolled_back: bool) {
        let message = match err {
            SyncError::Remote { source, .. } | SyncError::Load { source, .. } => {
                format!("{source:#}")
            }
            other => other.to_string(),
        };
        let notice = Notice {
            board_id,
            kind,
            category: err.category(),
            message,
            rolled_back,
        };
        warn!(board_id = board_id.0, %kind, "mutation: {}: {}", notice.headline(), notice.message);
        let _ = self.events.send(SyncEvent::Notice(notice));
    }

    /// Moves a card to `index` of list `to`. `from` is where the caller last
    /// saw the card; a card completed since is found in the completed list.
    pub async fn move_card(
        &self,
        board_id: BoardId,
        card_id: CardId,
        from: ListId,
        to: ListId,
        index: usize,
    ) -> Result<(), SyncError> {
        if let Some(view) = self.cache.get(board_id).await {
            if view.locate_card(from, card_id) == Some((to, index)) {
                debug!(board_id = board_id.0, card_id = card_id.0, "mutation: card already in place");
                return Ok(());
            }
        }
        let api = Arc::clone(&self.api);
        self.run(
            board_id,
            MutationKind::MoveCard,
            |view| {
                settled(card_id.is_placeholder(), || format!("card {card_id}"))?;
                settled(pending_list(to), || format!("list {to}"))?;
                reducers::move_card(view, card_id, from, to, index)
            },
            move |next| async move {
                let request = reducers::move_card_request(&next, card_id)
                    .ok_or_else(|| anyhow!("card {card_id} is missing from the optimistic model"))?;
                api.move_card(board_id, card_id, request).await
            },
            None,
        )
        .await
    }

    pub async fn update_card(
        &self,
        board_id: BoardId,
        hint: ListId,
        card_id: CardId,
        patch: CardPatch,
    ) -> Result<(), SyncError> {
        if patch.is_empty() {
            return Ok(());
        }
        self.patch_card(board_id, MutationKind::UpdateCard, hint, card_id, patch)
            .await
    }

    pub async fn set_card_complete(
        &self,
        board_id: BoardId,
        hint: ListId,
        card_id: CardId,
        is_complete: bool,
    ) -> Result<(), SyncError> {
        self.patch_card(
            board_id,
            MutationKind::CompleteCard,
            hint,
            card_id,
            CardPatch::complete(is_complete),
        )
        .await
    }

    async fn patch_card(
        &self,
        board_id: BoardId,
        kind: MutationKind,
        hint: ListId,
        card_id: CardId,
        patch: CardPatch,
    ) -> Result<(), SyncError> {
        let api = Arc::clone(&self.api);
        let local = patch.clone();
        self.run(
            board_id,
            kind,
            |view| {
                settled(card_id.is_placeholder(), || format!("card {card_id}"))?;
                reducers::update_card(view, hint, card_id, &local)
            },
            move |_| async move { api.update_card(board_id, card_id, patch).await },
            None,
        )
        .await
    }

    /// Appends a card to a real list. Returns the server-assigned id.
    pub async fn create_card(
        &self,
        board_id: BoardId,
        list_id: ListId,
        title: &str,
    ) -> Result<CardId, SyncError> {
        let placeholder = CardId(self.allocate_placeholder());
        let api = Arc::clone(&self.api);
        let remote_title = title.to_string();
        let created: CardDto = self
            .run(
                board_id,
                MutationKind::CreateCard,
                |view| {
                    settled(pending_list(list_id), || format!("list {list_id}"))?;
                    reducers::create_card(view, list_id, placeholder, title)
                },
                move |next| async move {
                    let order_index = next
                        .list(list_id)
                        .and_then(|list| list.position_of(placeholder))
                        .unwrap_or_default() as i64;
                    api.create_card(
                        board_id,
                        CreateCardRequest {
                            list_id,
                            title: remote_title,
                            order_index,
                        },
                    )
                    .await
                },
                confirm(move |view: &BoardView, card: &CardDto| {
                    reducers::replace_card_id(view, placeholder, card.card_id)
                }),
            )
            .await?;
        Ok(created.card_id)
    }

    pub async fn delete_card(
        &self,
        board_id: BoardId,
        hint: ListId,
        card_id: CardId,
    ) -> Result<(), SyncError> {
        let api = Arc::clone(&self.api);
        self.run(
            board_id,
            MutationKind::DeleteCard,
            |view| {
                settled(card_id.is_placeholder(), || format!("card {card_id}"))?;
                reducers::delete_card(view, hint, card_id)
            },
            move |_| async move { api.delete_card(board_id, card_id).await },
            None,
        )
        .await
    }

    /// Moves `list_id` to position `to` of the column order. The list's current
    /// position is read from the cached model at apply time. The remote payload
    /// carries the resulting positions of every real list.
    pub async fn reorder_lists(
        &self,
        board_id: BoardId,
        list_id: ListId,
        to: usize,
    ) -> Result<(), SyncError> {
        if let Some(view) = self.cache.get(board_id).await {
            if view.list_order.get(to) == Some(&list_id) {
                debug!(board_id = board_id.0, list_id = list_id.0, "mutation: list already in place");
                return Ok(());
            }
        }
        let api = Arc::clone(&self.api);
        self.run(
            board_id,
            MutationKind::ReorderLists,
            |view| {
                if let Some(pending) = view.real_list_ids().find(|id| id.is_placeholder()) {
                    return Err(ReduceError::PendingPlaceholder(format!("list {pending}")));
                }
                reducers::reorder_lists(view, list_id, to)
            },
            move |next| async move {
                api.reorder_lists(board_id, reducers::list_order_request(&next))
                    .await
            },
            None,
        )
        .await
    }

    pub async fn create_list(&self, board_id: BoardId, title: &str) -> Result<ListId, SyncError> {
        let placeholder = ListId(self.allocate_placeholder());
        let api = Arc::clone(&self.api);
        let remote_title = title.to_string();
        let created: ListDto = self
            .run(
                board_id,
                MutationKind::CreateList,
                |view| reducers::create_list(view, placeholder, title),
                move |next| async move {
                    let order_index = next
                        .list(placeholder)
                        .map(|list| list.order_index)
                        .unwrap_or_default();
                    api.create_list(
                        board_id,
                        CreateListRequest {
                            title: remote_title,
                            order_index,
                        },
                    )
                    .await
                },
                confirm(move |view: &BoardView, list: &ListDto| {
                    reducers::replace_list_id(view, placeholder, list.list_id)
                }),
            )
            .await?;
        Ok(created.list_id)
    }

    pub async fn rename_list(
        &self,
        board_id: BoardId,
        list_id: ListId,
        title: &str,
    ) -> Result<(), SyncError> {
        let api = Arc::clone(&self.api);
        let request = RenameListRequest {
            title: title.to_string(),
        };
        self.run(
            board_id,
            MutationKind::RenameList,
            |view| {
                settled(pending_list(list_id), || format!("list {list_id}"))?;
                reducers::rename_list(view, list_id, title)
            },
            move |_| async move { api.rename_list(board_id, list_id, request).await },
            None,
        )
        .await
    }

    pub async fn delete_list(&self, board_id: BoardId, list_id: ListId) -> Result<(), SyncError> {
        let api = Arc::clone(&self.api);
        self.run(
            board_id,
            MutationKind::DeleteList,
            |view| {
                settled(pending_list(list_id), || format!("list {list_id}"))?;
                reducers::delete_list(view, list_id)
            },
            move |_| async move { api.delete_list(board_id, list_id).await },
            None,
        )
        .await
    }

    /// Posts a comment, as a reply when `parent_id` is set.
    pub async fn create_comment(
        &self,
        board_id: BoardId,
        hint: ListId,
        card_id: CardId,
        parent_id: Option<CommentId>,
        content: &str,
    ) -> Result<CommentId, SyncError> {
        let placeholder = CommentId(self.allocate_placeholder());
        let node = CommentNode {
            comment_id: placeholder,
            content: content.to_string(),
            writer_id: self.actor,
            parent_id,
            created_at: Some(Utc::now()),
            replies: Vec::new(),
        };
        let api = Arc::clone(&self.api);
        let request = CreateCommentRequest {
            content: content.to_string(),
            parent_id,
        };
        let created: CommentDto = self
            .run(
                board_id,
                MutationKind::CreateComment,
                |view| {
                    settled(card_id.is_placeholder(), || format!("card {card_id}"))?;
                    if let Some(parent) = parent_id {
                        settled(parent.is_placeholder(), || format!("comment {parent}"))?;
                    }
                    reducers::create_comment(view, hint, card_id, parent_id, node)
                },
                move |_| async move { api.create_comment(board_id, card_id, request).await },
                confirm(move |view: &BoardView, comment: &CommentDto| {
                    reducers::replace_comment_id(
                        view,
                        holding_list(view, card_id, hint),
                        card_id,
                        placeholder,
                        comment.comment_id,
                    )
                }),
            )
            .await?;
        Ok(created.comment_id)
    }

    pub async fn update_comment(
        &self,
        board_id: BoardId,
        hint: ListId,
        card_id: CardId,
        comment_id: CommentId,
        content: &str,
    ) -> Result<(), SyncError> {
        let api = Arc::clone(&self.api);
        let request = UpdateCommentRequest {
            content: content.to_string(),
        };
        self.run(
            board_id,
            MutationKind::UpdateComment,
            |view| {
                settled(comment_id.is_placeholder(), || format!("comment {comment_id}"))?;
                reducers::update_comment(view, hint, card_id, comment_id, content)
            },
            move |_| async move {
                api.update_comment(board_id, card_id, comment_id, request)
                    .await
            },
            None,
        )
        .await
    }

    /// Deletes the comment together with every reply beneath it.
    pub async fn delete_comment(
        &self,
        board_id: BoardId,
        hint: ListId,
        card_id: CardId,
        comment_id: CommentId,
    ) -> Result<(), SyncError> {
        let api = Arc::clone(&self.api);
        self.run(
            board_id,
            MutationKind::DeleteComment,
            |view| {
                settled(comment_id.is_placeholder(), || format!("comment {comment_id}"))?;
                reducers::delete_comment(view, hint, card_id, comment_id)
            },
            move |_| async move { api.delete_comment(board_id, card_id, comment_id).await },
            None,
        )
        .await
    }

    pub async fn create_checklist_item(
        &self,
        board_id: BoardId,
        hint: ListId,
        card_id: CardId,
        title: &str,
    ) -> Result<ChecklistItemId, SyncError> {
        let placeholder = ChecklistItemId(self.allocate_placeholder());
        let api = Arc::clone(&self.api);
        let request = CreateChecklistItemRequest {
            title: title.to_string(),
        };
        let created: ChecklistItemDto = self
            .run(
                board_id,
                MutationKind::CreateChecklistItem,
                |view| {
                    settled(card_id.is_placeholder(), || format!("card {card_id}"))?;
                    reducers::create_checklist_item(view, hint, card_id, placeholder, title)
                },
                move |_| async move {
                    api.create_checklist_item(board_id, card_id, request)
                        .await
                },
                confirm(move |view: &BoardView, item: &ChecklistItemDto| {
                    reducers::replace_checklist_item_id(
                        view,
                        holding_list(view, card_id, hint),
                        card_id,
                        placeholder,
                        item.item_id,
                    )
                }),
            )
            .await?;
        Ok(created.item_id)
    }

    pub async fn update_checklist_item(
        &self,
        board_id: BoardId,
        hint: ListId,
        card_id: CardId,
        item_id: ChecklistItemId,
        patch: ChecklistItemPatch,
    ) -> Result<(), SyncError> {
        let api = Arc::clone(&self.api);
        let local = patch.clone();
        self.run(
            board_id,
            MutationKind::UpdateChecklistItem,
            |view| {
                settled(item_id.is_placeholder(), || format!("checklist item {item_id}"))?;
                reducers::update_checklist_item(view, hint, card_id, item_id, &local)
            },
            move |_| async move {
                api.update_checklist_item(board_id, card_id, item_id, patch)
                    .await
            },
            None,
        )
        .await
    }

    pub async fn delete_checklist_item(
        &self,
        board_id: BoardId,
        hint: ListId,
        card_id: CardId,
        item_id: ChecklistItemId,
    ) -> Result<(), SyncError> {
        let api = Arc::clone(&self.api);
        self.run(
            board_id,
            MutationKind::DeleteChecklistItem,
            |view| {
                settled(item_id.is_placeholder(), || format!("checklist item {item_id}"))?;
                reducers::delete_checklist_item(view, hint, card_id, item_id)
            },
            move |_| async move {
                api.delete_checklist_item(board_id, card_id, item_id)
                    .await
            },
            None,
        )
        .await
    }

    /// Records an already-uploaded file on the card.
    pub async fn attach_file(
        &self,
        board_id: BoardId,
        hint: ListId,
        card_id: CardId,
        request: AttachFileRequest,
    ) -> Result<FileId, SyncError> {
        let placeholder = FileId(self.allocate_placeholder());
        let attachment = Attachment {
            file_id: placeholder,
            filename: request.filename.clone(),
            url: request.url.clone(),
            size_bytes: request.size_bytes,
            mime_type: request.mime_type.clone(),
        };
        let api = Arc::clone(&self.api);
        let stored: FileDto = self
            .run(
                board_id,
                MutationKind::AttachFile,
                |view| {
                    settled(card_id.is_placeholder(), || format!("card {card_id}"))?;
                    reducers::attach_file(view, hint, card_id, attachment)
                },
                move |_| async move { api.attach_file(board_id, card_id, request).await },
                confirm(move |view: &BoardView, file: &FileDto| {
                    reducers::replace_file_id(
                        view,
                        holding_list(view, card_id, hint),
                        card_id,
                        placeholder,
                        normalize_file(file),
                    )
                }),
            )
            .await?;
        Ok(stored.file_id)
    }

    pub async fn detach_file(
        &self,
        board_id: BoardId,
        hint: ListId,
        card_id: CardId,
        file_id: FileId,
    ) -> Result<(), SyncError> {
        let api = Arc::clone(&self.api);
        self.run(
            board_id,
            MutationKind::DetachFile,
            |view| {
                settled(file_id.is_placeholder(), || format!("file {file_id}"))?;
                reducers::detach_file(view, hint, card_id, file_id)
            },
            move |_| async move { api.detach_file(board_id, card_id, file_id).await },
            None,
        )
        .await
    }
}

#[cfg(test)]
#[path = "tests/mutation_tests.rs"]
mod tests;
