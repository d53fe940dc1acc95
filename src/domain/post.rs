use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::engagement::CommentView;
use crate::domain::tag::Tag;
use crate::domain::user::Author;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub owner_id: i64,
    pub title: String,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub owner_id: i64,
    pub title: String,
    pub content: String,
}

/// A post with everything a reader sees attached: author, tags, comments and
/// the like count. This is also the shape stored in the read cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostView {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub likes_count: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub author: Author,
    pub tags: Vec<Tag>,
    pub comments: Vec<CommentView>,
}

impl PostView {
    pub fn tag_ids(&self) -> Vec<i64> {
        self.tags.iter().map(|tag| tag.id).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostQuery {
    pub page: u32,
    pub per_page: u32,
    pub search: Option<String>,
    pub tag_id: Option<i64>,
}

impl PostQuery {
    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.per_page)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostPage {
    pub posts: Vec<PostView>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
    pub last_page: u32,
}

impl PostPage {
    pub fn new(posts: Vec<PostView>, query: &PostQuery, total: i64) -> Self {
        let per_page = i64::from(query.per_page.max(1));
        let last_page = ((total + per_page - 1) / per_page).max(1);
        Self {
            posts,
            page: query.page,
            per_page: query.per_page,
            total,
            last_page: u32::try_from(last_page).unwrap_or(u32::MAX),
        }
    }
}
