//! Server board DTO to view model.
//!
//! Pure and deterministic: normalizing the same DTO twice yields equal
//! models. Anomalous input is repaired, never rejected.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use shared::{
    domain::ListId,
    protocol::{BoardDto, CardDto, FileDto, ListDto},
};
use tracing::warn;

use crate::{
    comment_tree::build_forest,
    model::{Attachment, BoardMeta, BoardView, CardView, ChecklistItem, ListView},
};

pub fn normalize_board(dto: &BoardDto) -> BoardView {
    let (reserved, mut lists): (Vec<&ListDto>, Vec<&ListDto>) = dto
        .lists
        .iter()
        .partition(|list| list.list_id.is_completed_list());
    lists.sort_by_key(|list| (list.order_index, list.list_id));

    // Duplicate list ids are folded into their first occurrence so that no
    // card is lost.
    let mut grouped: Vec<(&ListDto, Vec<&CardDto>)> = Vec::with_capacity(lists.len());
    let mut slot_of: HashMap<ListId, usize> = HashMap::new();
    for list in lists {
        match slot_of.get(&list.list_id) {
            Some(slot) => {
                warn!(
                    board_id = dto.board_id.0,
                    list_id = list.list_id.0,
                    "normalize: duplicate list id; merging its cards into the first occurrence"
                );
                grouped[*slot].1.extend(list.cards.iter());
            }
            None => {
                slot_of.insert(list.list_id, grouped.len());
                grouped.push((list, list.cards.iter().collect()));
            }
        }
    }

    // A list carrying the reserved completed-list id is dropped; its cards
    // are re-homed by their own list id, else into the first real list.
    for list in reserved {
        warn!(
            board_id = dto.board_id.0,
            cards = list.cards.len(),
            "normalize: server sent a list with the reserved completed-list id; re-homing its cards"
        );
        for card in &list.cards {
            let slot = slot_of
                .get(&card.list_id)
                .copied()
                .or_else(|| (!grouped.is_empty()).then_some(0));
            match slot {
                Some(slot) => grouped[slot].1.push(card),
                None => warn!(
                    board_id = dto.board_id.0,
                    card_id = card.card_id.0,
                    "normalize: no real list to re-home card into; dropping it"
                ),
            }
        }
    }

    let mut seen_cards = HashSet::new();
    let mut views = BTreeMap::new();
    let mut list_order = Vec::with_capacity(grouped.len() + 1);
    let mut completed = Vec::new();

    for (list, mut cards) in grouped {
        cards.sort_by_key(|card| (card.order_index, card.card_id));

        let mut open = Vec::with_capacity(cards.len());
        for card in cards {
            if !seen_cards.insert(card.card_id) {
                warn!(
                    board_id = dto.board_id.0,
                    card_id = card.card_id.0,
                    "normalize: card listed twice; keeping the first occurrence"
                );
                continue;
            }
            let view = normalize_card(card, list.list_id);
            if view.is_complete {
                completed.push(Arc::new(view));
            } else {
                open.push(Arc::new(view));
            }
        }

        list_order.push(list.list_id);
        views.insert(
            list.list_id,
            Arc::new(ListView {
                list_id: list.list_id,
                title: list.title.clone(),
                order_index: list.order_index,
                is_virtual: false,
                cards: open,
            }),
        );
    }

    if !completed.is_empty() {
        let mut virtual_list = ListView::completed();
        virtual_list.cards = completed;
        views.insert(ListId::COMPLETED, Arc::new(virtual_list));
        list_order.push(ListId::COMPLETED);
    }

    BoardView {
        board_id: dto.board_id,
        meta: BoardMeta {
            title: dto.title.clone(),
            description: dto.description.clone(),
            visibility: dto.visibility,
            permissions: dto.permissions,
            members: dto.members.clone(),
        },
        lists: views,
        list_order,
    }
}

/// The enclosing list wins over the card's own `list_id` field when the two
/// disagree.
pub fn normalize_card(card: &CardDto, home_list_id: ListId) -> CardView {
    CardView {
        card_id: card.card_id,
        list_id: if card.is_complete {
            ListId::COMPLETED
        } else {
            home_list_id
        },
        home_list_id,
        title: card.title.clone(),
        description: card.description.clone(),
        priority: card.priority,
        label: card.label.clone(),
        label_color: card.label_color.clone(),
        start_date: card.start_date,
        due_date: card.due_date,
        is_complete: card.is_complete,
        order_index: card.order_index,
        assignee_id: card.assignee_id,
        checklist: card
            .checklist
            .iter()
            .map(|item| ChecklistItem {
                item_id: item.item_id,
                title: item.title.clone(),
                done: item.done,
            })
            .collect(),
        comments: build_forest(&card.comments),
        files: card.files.iter().map(normalize_file).collect(),
    }
}

pub fn normalize_file(file: &FileDto) -> Attachment {
    Attachment {
        file_id: file.file_id,
        filename: file.filename.clone(),
        url: file.url.clone(),
        size_bytes: file.size_bytes,
        mime_type: file.mime_type.clone(),
    }
}

#[cfg(test)]
#[path = "tests/normalizer_tests.rs"]
mod tests;
