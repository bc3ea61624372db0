use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Negative ids are handed out locally for optimistic creates and
            /// never come from the server.
            pub fn is_placeholder(self) -> bool {
                self.0 < 0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(BoardId);
id_newtype!(ListId);
id_newtype!(CardId);
id_newtype!(CommentId);
id_newtype!(ChecklistItemId);
id_newtype!(FileId);

impl ListId {
    /// Reserved id of the client-only list that gathers completed cards.
    pub const COMPLETED: ListId = ListId(-1);

    pub fn is_completed_list(self) -> bool {
        self == Self::COMPLETED
    }
}

impl BoardId {
    /// Push channel topic carrying change notices for this board.
    pub fn topic(self) -> String {
        format!("board:{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Visibility {
    #[default]
    Private,
    Team,
    Public,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Owner,
    Member,
    Viewer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

/// Board-level switches that narrow what members may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSettings {
    #[serde(default)]
    pub only_owner_can_edit: bool,
    #[serde(default = "default_true")]
    pub viewers_can_comment: bool,
}

impl Default for PermissionSettings {
    fn default() -> Self {
        Self {
            only_owner_can_edit: false,
            viewers_can_comment: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub user_id: UserId,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}
