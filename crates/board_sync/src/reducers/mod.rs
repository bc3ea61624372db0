//! Pure reducers: `&BoardView` in, next `BoardView` out.
//!
//! None of these perform I/O. Each clones the board shallowly and copies on
//! write only the lists and cards it touches.

mod cards;
mod checklist;
mod comments;
mod files;
mod lists;

pub use cards::{
    create_card, delete_card, move_card, move_card_request, relocate_card, replace_card_id,
    update_card,
};
pub use checklist::{
    create_checklist_item, delete_checklist_item, replace_checklist_item_id,
    update_checklist_item,
};
pub use comments::{create_comment, delete_comment, replace_comment_id, update_comment};
pub use files::{attach_file, detach_file, replace_file_id};
pub use lists::{
    array_move, create_list, delete_list, list_order_request, rename_list, reorder_lists,
    replace_list_id,
};

use shared::domain::{CardId, ListId};

use crate::{
    error::ReduceError,
    model::{BoardView, CardView},
};

/// Copy-on-write edit of one card, located through [`BoardView::locate_card`].
pub(crate) fn edit_card(
    view: &BoardView,
    hint: ListId,
    card_id: CardId,
    edit: impl FnOnce(&mut CardView) -> Result<(), ReduceError>,
) -> Result<BoardView, ReduceError> {
    let (list_id, index) = view
        .locate_card(hint, card_id)
        .ok_or(ReduceError::CardNotFound {
            card_id,
            list_id: hint,
        })?;
    let mut next = view.clone();
    let card = next
        .list_mut(list_id)
        .and_then(|list| list.card_mut(index))
        .ok_or(ReduceError::CardNotFound {
            card_id,
            list_id: hint,
        })?;
    edit(card)?;
    Ok(next)
}

#[cfg(test)]
#[path = "../tests/reducers_tests.rs"]
mod tests;
