//! Client-resident view model of a single board.
//!
//! Lists and cards sit behind `Arc` so that a reducer cloning a [`BoardView`]
//! copies pointers only; `Arc::make_mut` then clones exactly the list or card
//! being changed.

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use shared::domain::{
    BoardId, CardId, ChecklistItemId, CommentId, FileId, ListId, Member, PermissionSettings,
    Priority, Role, UserId, Visibility,
};

pub const COMPLETED_LIST_TITLE: &str = "Completed";
/// Sort key of the completed list; it always renders after every real list.
pub const COMPLETED_LIST_ORDER: i64 = i64::MAX;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardMeta {
    pub title: String,
    pub description: Option<String>,
    pub visibility: Visibility,
    pub permissions: PermissionSettings,
    pub members: Vec<Member>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardView {
    pub board_id: BoardId,
    pub meta: BoardMeta,
    pub lists: BTreeMap<ListId, Arc<ListView>>,
    /// Render order of the columns; the completed list, when present, is last.
    pub list_order: Vec<ListId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListView {
    pub list_id: ListId,
    pub title: String,
    pub order_index: i64,
    pub is_virtual: bool,
    pub cards: Vec<Arc<CardView>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardView {
    pub card_id: CardId,
    /// List currently holding the card, which may be [`ListId::COMPLETED`].
    pub list_id: ListId,
    /// Real list the card belongs to on the server; restored when the card
    /// leaves the completed list.
    pub home_list_id: ListId,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub label: Option<String>,
    pub label_color: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub is_complete: bool,
    pub order_index: i64,
    pub assignee_id: Option<UserId>,
    pub checklist: Vec<ChecklistItem>,
    pub comments: Vec<CommentNode>,
    pub files: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentNode {
    pub comment_id: CommentId,
    pub content: String,
    pub writer_id: UserId,
    pub parent_id: Option<CommentId>,
    pub created_at: Option<DateTime<Utc>>,
    pub replies: Vec<CommentNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChecklistItem {
    pub item_id: ChecklistItemId,
    pub title: String,
    pub done: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub file_id: FileId,
    pub filename: String,
    pub url: Option<String>,
    pub size_bytes: u64,
    pub mime_type: Option<String>,
}

impl ListView {
    pub fn completed() -> Self {
        Self {
            list_id: ListId::COMPLETED,
            title: COMPLETED_LIST_TITLE.to_string(),
            order_index: COMPLETED_LIST_ORDER,
            is_virtual: true,
            cards: Vec::new(),
        }
    }

    pub fn position_of(&self, card_id: CardId) -> Option<usize> {
        self.cards.iter().position(|card| card.card_id == card_id)
    }

    pub fn card_mut(&mut self, index: usize) -> Option<&mut CardView> {
        self.cards.get_mut(index).map(Arc::make_mut)
    }

    /// Rewrites card order indexes to match their positions. The completed
    /// list keeps each card's home-list index instead.
    pub(crate) fn reindex_cards(&mut self) {
        if self.is_virtual {
            return;
        }
        for (index, card) in self.cards.iter_mut().enumerate() {
            let index = index as i64;
            if card.order_index != index {
                Arc::make_mut(card).order_index = index;
            }
        }
    }
}

impl BoardView {
    pub fn list(&self, list_id: ListId) -> Option<&ListView> {
        self.lists.get(&list_id).map(Arc::as_ref)
    }

    pub fn list_mut(&mut self, list_id: ListId) -> Option<&mut ListView> {
        self.lists.get_mut(&list_id).map(Arc::make_mut)
    }

    pub fn has_completed_list(&self) -> bool {
        self.lists.contains_key(&ListId::COMPLETED)
    }

    /// Columns in render order.
    pub fn columns(&self) -> impl Iterator<Item = &ListView> {
        self.list_order.iter().filter_map(|id| self.list(*id))
    }

    pub fn real_list_ids(&self) -> impl Iterator<Item = ListId> + '_ {
        self.list_order
            .iter()
            .copied()
            .filter(|id| !id.is_completed_list())
    }

    pub fn real_list_count(&self) -> usize {
        self.real_list_ids().count()
    }

    pub fn card_count(&self) -> usize {
        self.lists.values().map(|list| list.cards.len()).sum()
    }

    pub fn card_ids(&self) -> Vec<CardId> {
        self.columns()
            .flat_map(|list| list.cards.iter().map(|card| card.card_id))
            .collect()
    }

    /// Finds a card in the list the caller believes holds it, falling back to
    /// the completed list when the card has since been completed.
    pub fn locate_card(&self, hint: ListId, card_id: CardId) -> Option<(ListId, usize)> {
        [hint, ListId::COMPLETED]
            .into_iter()
            .find_map(|list_id| Some((list_id, self.list(list_id)?.position_of(card_id)?)))
    }

    pub fn find_card(&self, card_id: CardId) -> Option<(ListId, usize)> {
        self.lists
            .values()
            .find_map(|list| Some((list.list_id, list.position_of(card_id)?)))
    }

    pub(crate) fn materialize_completed_list(&mut self) {
        if self.has_completed_list() {
            return;
        }
        self.lists
            .insert(ListId::COMPLETED, Arc::new(ListView::completed()));
        self.list_order.push(ListId::COMPLETED);
    }

    pub(crate) fn dematerialize_completed_list_if_empty(&mut self) {
        let empty = self
            .list(ListId::COMPLETED)
            .is_some_and(|list| list.cards.is_empty());
        if empty {
            self.lists.remove(&ListId::COMPLETED);
            self.list_order.retain(|id| !id.is_completed_list());
        }
    }

    /// Rewrites real list order indexes to dense zero-based positions.
    pub(crate) fn reindex_lists(&mut self) {
        let order: Vec<ListId> = self.real_list_ids().collect();
        for (index, list_id) in order.into_iter().enumerate() {
            if let Some(list) = self.lists.get_mut(&list_id) {
                if list.order_index != index as i64 {
                    Arc::make_mut(list).order_index = index as i64;
                }
            }
        }
    }

    pub fn role_of(&self, user_id: UserId) -> Option<Role> {
        self.meta
            .members
            .iter()
            .find(|member| member.user_id == user_id)
            .map(|member| member.role)
    }

    pub fn can_edit(&self, user_id: UserId) -> bool {
        match self.role_of(user_id) {
            Some(Role::Owner) => true,
            Some(Role::Member) => !self.meta.permissions.only_owner_can_edit,
            Some(Role::Viewer) | None => false,
        }
    }

    pub fn can_comment(&self, user_id: UserId) -> bool {
        match self.role_of(user_id) {
            Some(Role::Owner | Role::Member) => true,
            Some(Role::Viewer) => self.meta.permissions.viewers_can_comment,
            None => false,
        }
    }
}

/// The open-card view: always read through the current board model so it
/// can never drift from the canonical data.
pub fn select_card(view: &BoardView, card_id: CardId) -> Option<&CardView> {
    let (list_id, index) = view.find_card(card_id)?;
    view.list(list_id)?.cards.get(index).map(Arc::as_ref)
}
