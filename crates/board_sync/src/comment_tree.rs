//! Comment forest helpers.
//!
//! Comments arrive flat with a nullable `parent_id`. Everything here walks
//! with an explicit stack so that a deeply nested thread cannot exhaust the
//! call stack.

use std::collections::HashMap;

use shared::{domain::CommentId, protocol::CommentDto};

use crate::{error::ReduceError, model::CommentNode};

/// Builds the reply forest from flat records.
///
/// A record whose parent does not resolve, or that points at itself, becomes
/// a root. Records caught in a parent cycle are promoted too, earliest input
/// first, so every input record appears exactly once in the output.
pub fn build_forest(flat: &[CommentDto]) -> Vec<CommentNode> {
    let mut index: HashMap<CommentId, usize> = HashMap::with_capacity(flat.len());
    let mut nodes: Vec<Option<CommentNode>> = Vec::with_capacity(flat.len());
    for (position, record) in flat.iter().enumerate() {
        index.entry(record.comment_id).or_insert(position);
        nodes.push(Some(CommentNode {
            comment_id: record.comment_id,
            content: record.content.clone(),
            writer_id: record.writer_id,
            parent_id: record.parent_id,
            created_at: record.created_at,
            replies: Vec::new(),
        }));
    }

    let mut parent_of: Vec<Option<usize>> = flat
        .iter()
        .enumerate()
        .map(|(position, record)| {
            record
                .parent_id
                .and_then(|parent| index.get(&parent).copied())
                .filter(|parent| *parent != position)
        })
        .collect();

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); flat.len()];
    for (position, parent) in parent_of.iter().enumerate() {
        if let Some(parent) = parent {
            children[*parent].push(position);
        }
    }

    let mut roots: Vec<usize> = (0..flat.len())
        .filter(|position| parent_of[*position].is_none())
        .collect();
    let mut reached = vec![false; flat.len()];
    for root in &roots {
        mark_reachable(*root, &children, &mut reached);
    }
    for position in 0..flat.len() {
        if reached[position] {
            continue;
        }
        if let Some(parent) = parent_of[position].take() {
            children[parent].retain(|child| *child != position);
        }
        roots.push(position);
        mark_reachable(position, &children, &mut reached);
    }
    roots.sort_unstable();

    let mut post_order = Vec::with_capacity(flat.len());
    for root in &roots {
        let mut stack = vec![(*root, false)];
        while let Some((position, expanded)) = stack.pop() {
            if expanded {
                post_order.push(position);
                continue;
            }
            stack.push((position, true));
            for child in children[position].iter().rev() {
                stack.push((*child, false));
            }
        }
    }
    for position in post_order {
        let replies: Vec<CommentNode> = children[position]
            .iter()
            .filter_map(|child| nodes[*child].take())
            .collect();
        if let Some(node) = nodes[position].as_mut() {
            node.replies = replies;
        }
    }

    roots
        .into_iter()
        .filter_map(|root| nodes[root].take())
        .collect()
}

fn mark_reachable(start: usize, children: &[Vec<usize>], reached: &mut [bool]) {
    let mut stack = vec![start];
    while let Some(position) = stack.pop() {
        if reached[position] {
            continue;
        }
        reached[position] = true;
        stack.extend(children[position].iter().copied());
    }
}

pub fn count_nodes(roots: &[CommentNode]) -> usize {
    let mut count = 0;
    let mut stack: Vec<&CommentNode> = roots.iter().collect();
    while let Some(node) = stack.pop() {
        count += 1;
        stack.extend(node.replies.iter());
    }
    count
}

/// Comment ids in depth-first display order.
pub fn flatten_ids(roots: &[CommentNode]) -> Vec<CommentId> {
    let mut ids = Vec::new();
    let mut stack: Vec<&CommentNode> = roots.iter().rev().collect();
    while let Some(node) = stack.pop() {
        ids.push(node.comment_id);
        stack.extend(node.replies.iter().rev());
    }
    ids
}

/// Index path from the roots down to the comment.
fn find_path(roots: &[CommentNode], comment_id: CommentId) -> Option<Vec<usize>> {
    let mut stack: Vec<(&CommentNode, Vec<usize>)> = roots
        .iter()
        .enumerate()
        .map(|(index, node)| (node, vec![index]))
        .collect();
    while let Some((node, path)) = stack.pop() {
        if node.comment_id == comment_id {
            return Some(path);
        }
        for (index, reply) in node.replies.iter().enumerate() {
            let mut child_path = path.clone();
            child_path.push(index);
            stack.push((reply, child_path));
        }
    }
    None
}

fn node_at_mut<'a>(roots: &'a mut [CommentNode], path: &[usize]) -> Option<&'a mut CommentNode> {
    let (first, rest) = path.split_first()?;
    let mut node = roots.get_mut(*first)?;
    for index in rest {
        node = node.replies.get_mut(*index)?;
    }
    Some(node)
}

pub fn find_comment(roots: &[CommentNode], comment_id: CommentId) -> Option<&CommentNode> {
    let path = find_path(roots, comment_id)?;
    let (first, rest) = path.split_first()?;
    let mut node = roots.get(*first)?;
    for index in rest {
        node = node.replies.get(*index)?;
    }
    Some(node)
}

/// Appends `node` to the replies of `parent_id`, or to the roots.
pub fn insert_comment(
    roots: &mut Vec<CommentNode>,
    parent_id: Option<CommentId>,
    node: CommentNode,
) -> Result<(), ReduceError> {
    let Some(parent_id) = parent_id else {
        roots.push(node);
        return Ok(());
    };
    let path = find_path(roots, parent_id).ok_or(ReduceError::CommentNotFound(parent_id))?;
    let parent =
        node_at_mut(roots, &path).ok_or(ReduceError::CommentNotFound(parent_id))?;
    parent.replies.push(node);
    Ok(())
}

/// Applies `edit` to the matching comment wherever it sits in the forest.
pub fn update_comment(
    roots: &mut [CommentNode],
    comment_id: CommentId,
    edit: impl FnOnce(&mut CommentNode),
) -> Result<(), ReduceError> {
    let path = find_path(roots, comment_id).ok_or(ReduceError::CommentNotFound(comment_id))?;
    let node = node_at_mut(roots, &path).ok_or(ReduceError::CommentNotFound(comment_id))?;
    edit(node);
    Ok(())
}

/// Removes the comment together with all of its replies.
pub fn remove_subtree(
    roots: &mut Vec<CommentNode>,
    comment_id: CommentId,
) -> Result<CommentNode, ReduceError> {
    let path = find_path(roots, comment_id).ok_or(ReduceError::CommentNotFound(comment_id))?;
    let (last, parent_path) = path
        .split_last()
        .ok_or(ReduceError::CommentNotFound(comment_id))?;
    let siblings = if parent_path.is_empty() {
        roots
    } else {
        &mut node_at_mut(roots, parent_path)
            .ok_or(ReduceError::CommentNotFound(comment_id))?
            .replies
    };
    if *last >= siblings.len() {
        return Err(ReduceError::CommentNotFound(comment_id));
    }
    Ok(siblings.remove(*last))
}

/// Swaps a placeholder id for the server-assigned one, including the
/// `parent_id` of any replies already attached to it.
pub fn replace_comment_id(
    roots: &mut [CommentNode],
    placeholder: CommentId,
    assigned: CommentId,
) -> Result<(), ReduceError> {
    update_comment(roots, placeholder, |node| {
        node.comment_id = assigned;
        for reply in &mut node.replies {
            reply.parent_id = Some(assigned);
        }
    })
}

#[cfg(test)]
#[path = "tests/comment_tree_tests.rs"]
mod tests;
