//! Drag-gesture outcomes to engine calls.
//!
//! A gesture produces at most one mutation. Planning is pure so renderers
//! can ask up front whether a drop would be accepted.

use std::{collections::HashSet, sync::Arc};

use shared::domain::{BoardId, CardId, ListId, UserId};
use tokio::sync::RwLock;
use tracing::debug;

use crate::{cache::BoardCache, error::SyncError, model::BoardView, mutation::MutationEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropContainer {
    /// The column strip; lists are dragged within it.
    Board,
    List(ListId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropLocation {
    pub container: DropContainer,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragItem {
    List(ListId),
    Card(CardId),
}

/// What the drag library reports when a gesture ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DragOutcome {
    pub item: DragItem,
    pub source: DropLocation,
    /// `None` when the item was dropped outside any container.
    pub destination: Option<DropLocation>,
}

impl DragOutcome {
    pub fn crosses_containers(&self) -> bool {
        self.destination
            .is_some_and(|destination| destination.container != self.source.container)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NoDestination,
    Unchanged,
    ReadOnly,
    /// The completed list cannot be dragged or displaced.
    CompletedListPinned,
    DropDisabled,
    CompletedListInternalReorder,
    MismatchedContainer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderPlan {
    MoveList {
        list_id: ListId,
        from: usize,
        to: usize,
    },
    MoveCard {
        card_id: CardId,
        from: ListId,
        to: ListId,
        index: usize,
    },
    Ignore(IgnoreReason),
}

/// Per-list card-drop switches. Lists accept drops unless disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DropPolicy {
    disabled: HashSet<ListId>,
}

impl DropPolicy {
    pub fn set_card_drop_enabled(&mut self, list_id: ListId, enabled: bool) {
        if enabled {
            self.disabled.remove(&list_id);
        } else {
            self.disabled.insert(list_id);
        }
    }

    pub fn accepts_cards(&self, list_id: ListId) -> bool {
        !self.disabled.contains(&list_id)
    }
}

/// The drag library's visual state. A cross-container drop has already moved
/// the dragged node in the rendered tree; it must go back to its source
/// before the next model render, or the node shows up twice.
pub trait DragSurface: Send + Sync {
    fn restore_to_source(&self, outcome: &DragOutcome);
}

pub struct NoopDragSurface;

impl DragSurface for NoopDragSurface {
    fn restore_to_source(&self, _outcome: &DragOutcome) {}
}

pub fn plan(
    view: &BoardView,
    actor: UserId,
    policy: &DropPolicy,
    outcome: &DragOutcome,
) -> ReorderPlan {
    let Some(destination) = outcome.destination else {
        return ReorderPlan::Ignore(IgnoreReason::NoDestination);
    };
    if !view.can_edit(actor) {
        return ReorderPlan::Ignore(IgnoreReason::ReadOnly);
    }
    match outcome.item {
        DragItem::List(list_id) => plan_list(view, list_id, outcome.source, destination),
        DragItem::Card(card_id) => plan_card(policy, card_id, outcome.source, destination),
    }
}

fn plan_list(
    view: &BoardView,
    list_id: ListId,
    source: DropLocation,
    destination: DropLocation,
) -> ReorderPlan {
    if source.container != DropContainer::Board || destination.container != DropContainer::Board
    {
        return ReorderPlan::Ignore(IgnoreReason::MismatchedContainer);
    }
    if list_id.is_completed_list() {
        return ReorderPlan::Ignore(IgnoreReason::CompletedListPinned);
    }
    let Some(from) = view.list_order.iter().position(|id| *id == list_id) else {
        return ReorderPlan::Ignore(IgnoreReason::MismatchedContainer);
    };
    if destination.index >= view.real_list_count() {
        return ReorderPlan::Ignore(IgnoreReason::CompletedListPinned);
    }
    if from == destination.index {
        return ReorderPlan::Ignore(IgnoreReason::Unchanged);
    }
    ReorderPlan::MoveList {
        list_id,
        from,
        to: destination.index,
    }
}

fn plan_card(
    policy: &DropPolicy,
    card_id: CardId,
    source: DropLocation,
    destination: DropLocation,
) -> ReorderPlan {
    let (DropContainer::List(from), DropContainer::List(to)) =
        (source.container, destination.container)
    else {
        return ReorderPlan::Ignore(IgnoreReason::MismatchedContainer);
    };
    if from == to {
        if to.is_completed_list() {
            return ReorderPlan::Ignore(IgnoreReason::CompletedListInternalReorder);
        }
        if source.index == destination.index {
            return ReorderPlan::Ignore(IgnoreReason::Unchanged);
        }
    }
    if !policy.accepts_cards(to) {
        return ReorderPlan::Ignore(IgnoreReason::DropDisabled);
    }
    ReorderPlan::MoveCard {
        card_id,
        from,
        to,
        index: destination.index,
    }
}

pub struct ReorderCoordinator {
    engine: Arc<MutationEngine>,
    cache: Arc<BoardCache>,
    surface: Arc<dyn DragSurface>,
    policy: RwLock<DropPolicy>,
}

impl ReorderCoordinator {
    pub fn new(
        engine: Arc<MutationEngine>,
        cache: Arc<BoardCache>,
        surface: Arc<dyn DragSurface>,
    ) -> Self {
        Self {
            engine,
            cache,
            surface,
            policy: RwLock::new(DropPolicy::default()),
        }
    }

    pub async fn set_card_drop_enabled(&self, list_id: ListId, enabled: bool) {
        self.policy
            .write()
            .await
            .set_card_drop_enabled(list_id, enabled);
    }

    pub async fn policy(&self) -> DropPolicy {
        self.policy.read().await.clone()
    }

    /// Reverts any cross-container visual move, then issues the single engine
    /// call the gesture maps to. Returns the plan that was acted on.
    pub async fn handle(
        &self,
        board_id: BoardId,
        outcome: DragOutcome,
    ) -> Result<ReorderPlan, SyncError> {
        if outcome.crosses_containers() {
            self.surface.restore_to_source(&outcome);
        }

        let view = self
            .cache
            .get(board_id)
            .await
            .ok_or(SyncError::NotLoaded(board_id))?;
        let plan = {
            let policy = self.policy.read().await;
            plan(&view, self.engine.actor(), &policy, &outcome)
        };

        match plan {
            ReorderPlan::MoveList { list_id, to, .. } => {
                self.engine.reorder_lists(board_id, list_id, to).await?;
            }
            ReorderPlan::MoveCard {
                card_id,
                from,
                to,
                index,
            } => {
                self.engine
                    .move_card(board_id, card_id, from, to, index)
                    .await?;
            }
            ReorderPlan::Ignore(reason) => {
                debug!(board_id = board_id.0, ?reason, "reorder: gesture ignored");
            }
        }
        Ok(plan)
    }
}

#[cfg(test)]
#[path = "tests/reorder_tests.rs"]
mod tests;
