use shared::{
    domain::{CardId, ChecklistItemId, ListId},
    protocol::ChecklistItemPatch,
};

use super::edit_card;
use crate::{
    error::ReduceError,
    model::{BoardView, ChecklistItem},
};

pub fn create_checklist_item(
    view: &BoardView,
    hint: ListId,
    card_id: CardId,
    placeholder: ChecklistItemId,
    title: &str,
) -> Result<BoardView, ReduceError> {
    edit_card(view, hint, card_id, |card| {
        card.checklist.push(ChecklistItem {
            item_id: placeholder,
            title: title.to_string(),
            done: false,
        });
        Ok(())
    })
}

pub fn update_checklist_item(
    view: &BoardView,
    hint: ListId,
    card_id: CardId,
    item_id: ChecklistItemId,
    patch: &ChecklistItemPatch,
) -> Result<BoardView, ReduceError> {
    edit_card(view, hint, card_id, |card| {
        let item = card
            .checklist
            .iter_mut()
            .find(|item| item.item_id == item_id)
            .ok_or(ReduceError::ChecklistItemNotFound(item_id))?;
        if let Some(title) = &patch.title {
            item.title = title.clone();
        }
        if let Some(done) = patch.done {
            item.done = done;
        }
        Ok(())
    })
}

pub fn delete_checklist_item(
    view: &BoardView,
    hint: ListId,
    card_id: CardId,
    item_id: ChecklistItemId,
) -> Result<BoardView, ReduceError> {
    edit_card(view, hint, card_id, |card| {
        let before = card.checklist.len();
        card.checklist.retain(|item| item.item_id != item_id);
        if card.checklist.len() == before {
            return Err(ReduceError::ChecklistItemNotFound(item_id));
        }
        Ok(())
    })
}

pub fn replace_checklist_item_id(
    view: &BoardView,
    hint: ListId,
    card_id: CardId,
    placeholder: ChecklistItemId,
    assigned: ChecklistItemId,
) -> Result<BoardView, ReduceError> {
    edit_card(view, hint, card_id, |card| {
        card.checklist
            .iter_mut()
            .find(|item| item.item_id == placeholder)
            .map(|item| item.item_id = assigned)
            .ok_or(ReduceError::ChecklistItemNotFound(placeholder))
    })
}
