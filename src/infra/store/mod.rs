//! Entity store: the persistence boundary for users, sessions, posts, tags,
//! comments and likes.
//!
//! Reads hand back fully materialized value objects (`PostView` carries its
//! author, tags, comments and like count), so nothing downstream ever goes
//! back to the store while serializing a response.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::engagement::{Comment, LikeToggle, NewComment};
use crate::domain::post::{NewPost, Post, PostPage, PostQuery, PostView};
use crate::domain::tag::{Tag, TagSync};
use crate::domain::user::{Credentials, NewUser, Session, User};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const USERS_EMAIL_KEY: &str = "users_email_key";
pub const TAGS_NAME_KEY: &str = "tags_name_key";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unique constraint violated: {constraint}")]
    Conflict { constraint: String },
    #[error(transparent)]
    Database(sqlx::Error),
}

impl StoreError {
    pub fn is_conflict_on(&self, name: &str) -> bool {
        matches!(self, Self::Conflict { constraint } if constraint == name)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.code().as_deref() == Some("23505") {
                return Self::Conflict {
                    constraint: db_err.constraint().unwrap_or_default().to_string(),
                };
            }
        }
        Self::Database(err)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;

    async fn insert_user(&self, user: NewUser) -> StoreResult<User>;
    async fn find_user(&self, user_id: i64) -> StoreResult<Option<User>>;
    async fn find_credentials(&self, email: &str) -> StoreResult<Option<Credentials>>;
    async fn email_taken(&self, email: &str) -> StoreResult<bool>;

    async fn insert_session(&self, session: &Session) -> StoreResult<()>;
    async fn find_session(&self, session_id: Uuid) -> StoreResult<Option<Session>>;
    async fn delete_session(&self, session_id: Uuid) -> StoreResult<bool>;

    async fn insert_post(&self, post: NewPost) -> StoreResult<Post>;
    async fn find_post(&self, post_id: i64) -> StoreResult<Option<Post>>;
    /// Updates title and content. The owner is never touched.
    async fn update_post(&self, post_id: i64, title: &str, content: &str)
        -> StoreResult<Option<Post>>;
    /// Deletes the post together with its comments, likes and tag links.
    async fn delete_post(&self, post_id: i64) -> StoreResult<bool>;
    async fn post_view(&self, post_id: i64) -> StoreResult<Option<PostView>>;
    async fn list_post_views(&self, query: &PostQuery) -> StoreResult<PostPage>;

    async fn insert_tag(&self, name: &str) -> StoreResult<Tag>;
    async fn tag_name_taken(&self, name: &str) -> StoreResult<bool>;
    /// Returns the subset of `tag_ids` that exist.
    async fn existing_tag_ids(&self, tag_ids: &[i64]) -> StoreResult<Vec<i64>>;
    /// Deletes the tag and its post links. `None` when the tag does not
    /// exist, otherwise the ids of the posts that carried it.
    async fn delete_tag(&self, tag_id: i64) -> StoreResult<Option<Vec<i64>>>;
    async fn sync_post_tags(&self, post_id: i64, tag_ids: &[i64], mode: TagSync)
        -> StoreResult<()>;

    /// Removes the caller's like if present, otherwise inserts one. Runs as a
    /// single atomic step per (post, user) pair.
    async fn toggle_like(&self, post_id: i64, user_id: i64) -> StoreResult<LikeToggle>;
    async fn like_count(&self, post_id: i64) -> StoreResult<i64>;

    async fn insert_comment(&self, comment: NewComment) -> StoreResult<Comment>;
    async fn find_comment(&self, comment_id: i64) -> StoreResult<Option<Comment>>;
    async fn delete_comment(&self, comment_id: i64) -> StoreResult<bool>;
}

/// Escapes `%`, `_` and `\` so user text is matched literally by `LIKE`.
pub(crate) fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
