use std::sync::Arc;

use shared::{
    domain::{CardId, ListId},
    protocol::{CardPatch, MoveCardRequest},
};

use super::lists::array_move;
use crate::{
    error::ReduceError,
    model::{BoardView, CardView},
};

/// Moves a card between lists. This is the only place that materializes or
/// dematerializes the completed list, and both drag moves and completion
/// toggles go through it.
pub fn relocate_card(
    next: &mut BoardView,
    card_id: CardId,
    source: ListId,
    source_index: usize,
    destination: ListId,
    index: usize,
) -> Result<(), ReduceError> {
    if destination.is_completed_list() {
        next.materialize_completed_list();
    } else if next.list(destination).is_none() {
        return Err(ReduceError::ListNotFound(destination));
    }

    let source_list = next
        .list_mut(source)
        .ok_or(ReduceError::ListNotFound(source))?;
    if source_index >= source_list.cards.len() {
        return Err(ReduceError::CardNotFound {
            card_id,
            list_id: source,
        });
    }
    let mut card = source_list.cards.remove(source_index);
    source_list.reindex_cards();

    let moved = Arc::make_mut(&mut card);
    if destination.is_completed_list() {
        moved.is_complete = true;
        moved.list_id = ListId::COMPLETED;
        if !source.is_completed_list() {
            moved.home_list_id = source;
        }
    } else {
        moved.is_complete = false;
        moved.list_id = destination;
        moved.home_list_id = destination;
    }

    let destination_list = next
        .list_mut(destination)
        .ok_or(ReduceError::ListNotFound(destination))?;
    let index = index.min(destination_list.cards.len());
    destination_list.cards.insert(index, card);
    destination_list.reindex_cards();

    if source.is_completed_list() {
        next.dematerialize_completed_list_if_empty();
    }
    Ok(())
}

pub fn move_card(
    view: &BoardView,
    card_id: CardId,
    from: ListId,
    to: ListId,
    index: usize,
) -> Result<BoardView, ReduceError> {
    let (source, source_index) =
        view.locate_card(from, card_id)
            .ok_or(ReduceError::CardNotFound {
                card_id,
                list_id: from,
            })?;
    let mut next = view.clone();

    if source == to {
        if source.is_completed_list() {
            return Err(ReduceError::CompletedListRestricted(
                "does not allow manual reordering",
            ));
        }
        let list = next.list_mut(source).ok_or(ReduceError::ListNotFound(source))?;
        let index = index.min(list.cards.len().saturating_sub(1));
        array_move(&mut list.cards, source_index, index)?;
        list.reindex_cards();
        return Ok(next);
    }

    relocate_card(&mut next, card_id, source, source_index, to, index)?;
    Ok(next)
}

/// Where a completed card goes back to: its home list when that still
/// exists, otherwise the first real list.
fn restore_target(view: &BoardView, home: ListId) -> Result<ListId, ReduceError> {
    if view.list(home).is_some_and(|list| !list.is_virtual) {
        return Ok(home);
    }
    view.real_list_ids()
        .next()
        .ok_or(ReduceError::ListNotFound(home))
}

fn sorted_position(view: &BoardView, list_id: ListId, card: &CardView) -> usize {
    view.list(list_id)
        .map(|list| {
            list.cards
                .iter()
                .position(|other| {
                    (other.order_index, other.card_id) > (card.order_index, card.card_id)
                })
                .unwrap_or(list.cards.len())
        })
        .unwrap_or(0)
}

/// Shallow field merge. A change of `is_complete` relocates the card through
/// [`relocate_card`] first: completing appends it to the completed list,
/// reopening returns it to its home list near its previous position.
pub fn update_card(
    view: &BoardView,
    hint: ListId,
    card_id: CardId,
    patch: &CardPatch,
) -> Result<BoardView, ReduceError> {
    let not_found = ReduceError::CardNotFound {
        card_id,
        list_id: hint,
    };
    let (mut list_id, mut index) = view.locate_card(hint, card_id).ok_or(not_found.clone())?;
    let mut next = view.clone();

    let current = next
        .list(list_id)
        .and_then(|list| list.cards.get(index))
        .cloned()
        .ok_or(not_found.clone())?;
    if let Some(complete) = patch.is_complete.filter(|flag| *flag != current.is_complete) {
        let destination = if complete {
            ListId::COMPLETED
        } else {
            restore_target(&next, current.home_list_id)?
        };
        let at = if complete {
            next.list(ListId::COMPLETED)
                .map(|list| list.cards.len())
                .unwrap_or(0)
        } else {
            sorted_position(&next, destination, &current)
        };
        relocate_card(&mut next, card_id, list_id, index, destination, at)?;
        list_id = destination;
        index = next
            .list(destination)
            .and_then(|list| list.position_of(card_id))
            .ok_or(not_found.clone())?;
    }

    let card = next
        .list_mut(list_id)
        .and_then(|list| list.card_mut(index))
        .ok_or(not_found)?;
    if let Some(title) = &patch.title {
        card.title = title.clone();
    }
    if let Some(description) = &patch.description {
        card.description = description.clone();
    }
    if let Some(priority) = patch.priority {
        card.priority = priority;
    }
    if let Some(label) = &patch.label {
        card.label = label.clone();
    }
    if let Some(label_color) = &patch.label_color {
        card.label_color = label_color.clone();
    }
    if let Some(start_date) = patch.start_date {
        card.start_date = start_date;
    }
    if let Some(due_date) = patch.due_date {
        card.due_date = due_date;
    }
    if let Some(assignee_id) = patch.assignee_id {
        card.assignee_id = assignee_id;
    }
    Ok(next)
}

pub fn create_card(
    view: &BoardView,
    list_id: ListId,
    placeholder: CardId,
    title: &str,
) -> Result<BoardView, ReduceError> {
    if list_id.is_completed_list() {
        return Err(ReduceError::CompletedListRestricted("does not accept new cards"));
    }
    let mut next = view.clone();
    let list = next
        .list_mut(list_id)
        .ok_or(ReduceError::ListNotFound(list_id))?;
    let order_index = list.cards.len() as i64;
    list.cards.push(Arc::new(CardView {
        card_id: placeholder,
        list_id,
        home_list_id: list_id,
        title: title.to_string(),
        description: None,
        priority: Default::default(),
        label: None,
        label_color: None,
        start_date: None,
        due_date: None,
        is_complete: false,
        order_index,
        assignee_id: None,
        checklist: Vec::new(),
        comments: Vec::new(),
        files: Vec::new(),
    }));
    Ok(next)
}

pub fn delete_card(
    view: &BoardView,
    hint: ListId,
    card_id: CardId,
) -> Result<BoardView, ReduceError> {
    let (list_id, index) = view
        .locate_card(hint, card_id)
        .ok_or(ReduceError::CardNotFound {
            card_id,
            list_id: hint,
        })?;
    let mut next = view.clone();
    let list = next
        .list_mut(list_id)
        .ok_or(ReduceError::ListNotFound(list_id))?;
    list.cards.remove(index);
    list.reindex_cards();
    if list_id.is_completed_list() {
        next.dematerialize_completed_list_if_empty();
    }
    Ok(next)
}

pub fn replace_card_id(
    view: &BoardView,
    placeholder: CardId,
    assigned: CardId,
) -> Result<BoardView, ReduceError> {
    let (list_id, _) = view
        .find_card(placeholder)
        .ok_or(ReduceError::CardNotFound {
            card_id: placeholder,
            list_id: ListId::COMPLETED,
        })?;
    super::edit_card(view, list_id, placeholder, |card| {
        card.card_id = assigned;
        Ok(())
    })
}

/// Remote payload describing where `card_id` sits in `view`.
pub fn move_card_request(view: &BoardView, card_id: CardId) -> Option<MoveCardRequest> {
    let (list_id, index) = view.find_card(card_id)?;
    let card = view.list(list_id)?.cards.get(index)?;
    Some(if list_id.is_completed_list() {
        MoveCardRequest {
            list_id: card.home_list_id,
            order_index: card.order_index,
            is_complete: true,
        }
    } else {
        MoveCardRequest {
            list_id,
            order_index: index as i64,
            is_complete: false,
        }
    })
}
