use shared::{
    domain::{BoardId, CardId, ChecklistItemId, CommentId, FileId, ListId, UserId},
    error::{ApiException, ErrorCode},
};
use thiserror::Error;

use crate::mutation::MutationKind;

/// A reducer refused to produce a next model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReduceError {
    #[error("list {0} not found")]
    ListNotFound(ListId),
    #[error("card {card_id} not found in list {list_id} or the completed list")]
    CardNotFound { card_id: CardId, list_id: ListId },
    #[error("comment {0} not found")]
    CommentNotFound(CommentId),
    #[error("checklist item {0} not found")]
    ChecklistItemNotFound(ChecklistItemId),
    #[error("file {0} not found")]
    FileNotFound(FileId),
    #[error("the completed list {0}")]
    CompletedListRestricted(&'static str),
    #[error("index {index} out of range for {len} entries")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("{0} is still waiting for its server id")]
    PendingPlaceholder(String),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("board {0} is not loaded")]
    NotLoaded(BoardId),
    #[error("failed to load board {board_id}: {source}")]
    Load {
        board_id: BoardId,
        #[source]
        source: anyhow::Error,
    },
    #[error("user {user_id} may not {action} on board {board_id}")]
    Forbidden {
        board_id: BoardId,
        user_id: UserId,
        action: &'static str,
    },
    #[error(transparent)]
    Reduce(#[from] ReduceError),
    #[error("{kind} failed: {source}")]
    Remote {
        kind: MutationKind,
        #[source]
        source: anyhow::Error,
    },
}

impl SyncError {
    pub fn category(&self) -> NoticeCategory {
        match self {
            Self::Forbidden { .. } => NoticeCategory::Permission,
            Self::Reduce(_) => NoticeCategory::Validation,
            Self::Load { source, .. } | Self::Remote { source, .. } => {
                NoticeCategory::classify(source)
            }
            Self::NotLoaded(_) => NoticeCategory::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeCategory {
    Permission,
    Validation,
    Transport,
    Unknown,
}

impl NoticeCategory {
    pub fn classify(err: &anyhow::Error) -> Self {
        if let Some(api) = err.downcast_ref::<ApiException>() {
            return match api.code {
                ErrorCode::Unauthorized | ErrorCode::Forbidden => Self::Permission,
                ErrorCode::Validation | ErrorCode::NotFound | ErrorCode::Conflict => {
                    Self::Validation
                }
                ErrorCode::RateLimited | ErrorCode::Internal => Self::Transport,
            };
        }
        if let Some(http) = err.downcast_ref::<reqwest::Error>() {
            if http.is_timeout() || http.is_connect() || http.is_request() {
                return Self::Transport;
            }
        }

        let lower = format!("{err:#}").to_ascii_lowercase();
        if lower.contains("forbidden") || lower.contains("unauthorized") {
            Self::Permission
        } else if lower.contains("invalid") || lower.contains("validation") {
            Self::Validation
        } else if lower.contains("timeout")
            || lower.contains("timed out")
            || lower.contains("connection")
            || lower.contains("network")
            || lower.contains("unavailable")
        {
            Self::Transport
        } else {
            Self::Unknown
        }
    }
}

/// User-visible report of a failed mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub board_id: BoardId,
    pub kind: MutationKind,
    pub category: NoticeCategory,
    pub message: String,
    /// Whether the pre-mutation snapshot was put back. When a newer local
    /// change landed first the board is refetched instead.
    pub rolled_back: bool,
}

impl Notice {
    pub fn headline(&self) -> String {
        let reason = match self.category {
            NoticeCategory::Permission => "you do not have permission for this change",
            NoticeCategory::Validation => "the server rejected the change",
            NoticeCategory::Transport => "the server could not be reached",
            NoticeCategory::Unknown => "an unexpected error occurred",
        };
        format!("Could not {}: {reason}", self.kind.describe())
    }
}
