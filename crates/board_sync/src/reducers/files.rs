use shared::domain::{CardId, FileId, ListId};

use super::edit_card;
use crate::{
    error::ReduceError,
    model::{Attachment, BoardView},
};

pub fn attach_file(
    view: &BoardView,
    hint: ListId,
    card_id: CardId,
    attachment: Attachment,
) -> Result<BoardView, ReduceError> {
    edit_card(view, hint, card_id, |card| {
        card.files.push(attachment);
        Ok(())
    })
}

pub fn detach_file(
    view: &BoardView,
    hint: ListId,
    card_id: CardId,
    file_id: FileId,
) -> Result<BoardView, ReduceError> {
    edit_card(view, hint, card_id, |card| {
        let index = card
            .files
            .iter()
            .position(|file| file.file_id == file_id)
            .ok_or(ReduceError::FileNotFound(file_id))?;
        card.files.remove(index);
        Ok(())
    })
}

/// Swaps the placeholder for the stored file record returned by the server.
pub fn replace_file_id(
    view: &BoardView,
    hint: ListId,
    card_id: CardId,
    placeholder: FileId,
    stored: Attachment,
) -> Result<BoardView, ReduceError> {
    edit_card(view, hint, card_id, |card| {
        let file = card
            .files
            .iter_mut()
            .find(|file| file.file_id == placeholder)
            .ok_or(ReduceError::FileNotFound(placeholder))?;
        *file = stored;
        Ok(())
    })
}
