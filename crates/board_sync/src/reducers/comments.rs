use shared::domain::{CardId, CommentId, ListId};

use super::edit_card;
use crate::{comment_tree, error::ReduceError, model::BoardView, model::CommentNode};

pub fn create_comment(
    view: &BoardView,
    hint: ListId,
    card_id: CardId,
    parent_id: Option<CommentId>,
    node: CommentNode,
) -> Result<BoardView, ReduceError> {
    edit_card(view, hint, card_id, |card| {
        comment_tree::insert_comment(&mut card.comments, parent_id, node)
    })
}

pub fn update_comment(
    view: &BoardView,
    hint: ListId,
    card_id: CardId,
    comment_id: CommentId,
    content: &str,
) -> Result<BoardView, ReduceError> {
    edit_card(view, hint, card_id, |card| {
        comment_tree::update_comment(&mut card.comments, comment_id, |node| {
            node.content = content.to_string();
        })
    })
}

/// Removes the comment and its whole reply subtree.
pub fn delete_comment(
    view: &BoardView,
    hint: ListId,
    card_id: CardId,
    comment_id: CommentId,
) -> Result<BoardView, ReduceError> {
    edit_card(view, hint, card_id, |card| {
        comment_tree::remove_subtree(&mut card.comments, comment_id).map(|_| ())
    })
}

pub fn replace_comment_id(
    view: &BoardView,
    hint: ListId,
    card_id: CardId,
    placeholder: CommentId,
    assigned: CommentId,
) -> Result<BoardView, ReduceError> {
    edit_card(view, hint, card_id, |card| {
        comment_tree::replace_comment_id(&mut card.comments, placeholder, assigned)
    })
}
