use std::sync::Arc;

use shared::{
    domain::ListId,
    protocol::{ListOrderEntry, ReorderListsRequest},
};

use crate::{
    error::ReduceError,
    model::{BoardView, ListView},
};

/// Standard array move: remove at `from`, reinsert at `to`.
pub fn array_move<T>(items: &mut Vec<T>, from: usize, to: usize) -> Result<(), ReduceError> {
    let len = items.len();
    if from >= len {
        return Err(ReduceError::IndexOutOfRange { index: from, len });
    }
    if to >= len {
        return Err(ReduceError::IndexOutOfRange { index: to, len });
    }
    let item = items.remove(from);
    items.insert(to, item);
    Ok(())
}

/// Moves `list_id` to position `to` of `list_order`, resolving its current
/// position against `view` itself. The completed list can neither be moved
/// nor displaced.
pub fn reorder_lists(view: &BoardView, list_id: ListId, to: usize) -> Result<BoardView, ReduceError> {
    if list_id.is_completed_list() {
        return Err(ReduceError::CompletedListRestricted("cannot be reordered"));
    }
    let from = view
        .list_order
        .iter()
        .position(|id| *id == list_id)
        .ok_or(ReduceError::ListNotFound(list_id))?;
    let real = view.real_list_count();
    if to >= real {
        return Err(ReduceError::CompletedListRestricted(
            "is not a valid reorder target",
        ));
    }
    if from == to {
        return Ok(view.clone());
    }

    let mut next = view.clone();
    array_move(&mut next.list_order, from, to)?;
    next.reindex_lists();
    Ok(next)
}

/// Dense zero-based positions over real lists only.
pub fn list_order_request(view: &BoardView) -> ReorderListsRequest {
    ReorderListsRequest {
        lists: view
            .real_list_ids()
            .enumerate()
            .map(|(index, list_id)| ListOrderEntry {
                list_id,
                order_index: index as i64,
            })
            .collect(),
    }
}

/// Appends a new real list just before the completed list.
pub fn create_list(
    view: &BoardView,
    placeholder: ListId,
    title: &str,
) -> Result<BoardView, ReduceError> {
    let mut next = view.clone();
    let order_index = next.real_list_count();
    next.lists.insert(
        placeholder,
        Arc::new(ListView {
            list_id: placeholder,
            title: title.to_string(),
            order_index: order_index as i64,
            is_virtual: false,
            cards: Vec::new(),
        }),
    );
    next.list_order.insert(order_index, placeholder);
    Ok(next)
}

pub fn rename_list(view: &BoardView, list_id: ListId, title: &str) -> Result<BoardView, ReduceError> {
    if list_id.is_completed_list() {
        return Err(ReduceError::CompletedListRestricted("cannot be renamed"));
    }
    let mut next = view.clone();
    next.list_mut(list_id)
        .ok_or(ReduceError::ListNotFound(list_id))?
        .title = title.to_string();
    Ok(next)
}

/// Drops the list, its open cards, and any completed cards whose home it was.
pub fn delete_list(view: &BoardView, list_id: ListId) -> Result<BoardView, ReduceError> {
    if list_id.is_completed_list() {
        return Err(ReduceError::CompletedListRestricted("cannot be deleted"));
    }
    if view.list(list_id).is_none() {
        return Err(ReduceError::ListNotFound(list_id));
    }
    let mut next = view.clone();
    next.lists.remove(&list_id);
    next.list_order.retain(|id| *id != list_id);
    if let Some(completed) = next.list_mut(ListId::COMPLETED) {
        completed.cards.retain(|card| card.home_list_id != list_id);
    }
    next.dematerialize_completed_list_if_empty();
    next.reindex_lists();
    Ok(next)
}

pub fn replace_list_id(
    view: &BoardView,
    placeholder: ListId,
    assigned: ListId,
) -> Result<BoardView, ReduceError> {
    let mut next = view.clone();
    let mut list = next
        .lists
        .remove(&placeholder)
        .ok_or(ReduceError::ListNotFound(placeholder))?;
    let list_mut = Arc::make_mut(&mut list);
    list_mut.list_id = assigned;
    for card in &mut list_mut.cards {
        let card = Arc::make_mut(card);
        card.list_id = assigned;
        card.home_list_id = assigned;
    }
    next.lists.insert(assigned, list);
    for id in &mut next.list_order {
        if *id == placeholder {
            *id = assigned;
        }
    }
    if let Some(completed) = next.list_mut(ListId::COMPLETED) {
        for card in &mut completed.cards {
            if card.home_list_id == placeholder {
                Arc::make_mut(card).home_list_id = assigned;
            }
        }
    }
    Ok(next)
}
