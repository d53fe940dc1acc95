use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::user::Author;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Like {
    pub id: i64,
    pub user_id: i64,
    pub post_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub user_id: i64,
    pub post_id: i64,
    pub comment: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewComment {
    pub post_id: i64,
    pub user_id: i64,
    pub comment: String,
}

/// A comment as embedded in a post, with its author resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentView {
    pub id: i64,
    pub comment: String,
    pub user: Author,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Result of flipping a like. Repeating the call alternates between the two.
#[derive(Debug, Clone)]
pub enum LikeToggle {
    Liked(Like),
    Unliked,
}

impl LikeToggle {
    pub fn is_liked(&self) -> bool {
        matches!(self, Self::Liked(_))
    }
}
