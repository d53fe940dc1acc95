//! In-memory entity store.
//!
//! Backs the test suite and local runs without Postgres. One async mutex
//! guards every table, so each trait method (including `toggle_like`) is
//! atomic with respect to the others. Data is lost on process restart.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::engagement::{Comment, CommentView, Like, LikeToggle, NewComment};
use crate::domain::post::{NewPost, Post, PostPage, PostQuery, PostView};
use crate::domain::tag::{Tag, TagSync};
use crate::domain::user::{Author, Credentials, NewUser, Session, User};
use crate::infra::store::{
    EntityStore, StoreError, StoreResult, TAGS_NAME_KEY, USERS_EMAIL_KEY,
};

#[derive(Default)]
struct Tables {
    next_id: i64,
    users: BTreeMap<i64, Credentials>,
    sessions: HashMap<Uuid, Session>,
    posts: BTreeMap<i64, Post>,
    tags: BTreeMap<i64, Tag>,
    post_tags: BTreeSet<(i64, i64)>,
    comments: BTreeMap<i64, Comment>,
    likes: BTreeMap<i64, Like>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn author(&self, user_id: i64) -> Author {
        match self.users.get(&user_id) {
            Some(credentials) => Author::from(&credentials.user),
            None => Author {
                id: user_id,
                name: String::new(),
            },
        }
    }

    fn view(&self, post: &Post) -> PostView {
        let tags = self
            .post_tags
            .range((post.id, i64::MIN)..=(post.id, i64::MAX))
            .filter_map(|(_, tag_id)| self.tags.get(tag_id).cloned())
            .collect();

        let mut comments: Vec<&Comment> = self
            .comments
            .values()
            .filter(|comment| comment.post_id == post.id)
            .collect();
        comments.sort_by_key(|comment| (comment.created_at, comment.id));

        let likes_count = self
            .likes
            .values()
            .filter(|like| like.post_id == post.id)
            .count();

        PostView {
            id: post.id,
            title: post.title.clone(),
            content: post.content.clone(),
            likes_count: likes_count as i64,
            created_at: post.created_at,
            author: self.author(post.owner_id),
            tags,
            comments: comments
                .into_iter()
                .map(|comment| CommentView {
                    id: comment.id,
                    comment: comment.comment.clone(),
                    user: self.author(comment.user_id),
                    created_at: comment.created_at,
                })
                .collect(),
        }
    }

    fn matches(&self, post: &Post, query: &PostQuery) -> bool {
        if let Some(term) = &query.search {
            let term = term.to_lowercase();
            if !post.title.to_lowercase().contains(&term)
                && !post.content.to_lowercase().contains(&term)
            {
                return false;
            }
        }
        match query.tag_id {
            Some(tag_id) => self.post_tags.contains(&(post.id, tag_id)),
            None => true,
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of like rows for the pair; at most one while the toggle holds.
    pub async fn like_rows(&self, post_id: i64, user_id: i64) -> usize {
        let tables = self.tables.lock().await;
        tables
            .likes
            .values()
            .filter(|like| like.post_id == post_id && like.user_id == user_id)
            .count()
    }

    pub async fn post_tag_ids(&self, post_id: i64) -> Vec<i64> {
        let tables = self.tables.lock().await;
        tables
            .post_tags
            .range((post_id, i64::MIN)..=(post_id, i64::MAX))
            .map(|(_, tag_id)| *tag_id)
            .collect()
    }

    pub async fn comment_count(&self, post_id: i64) -> usize {
        let tables = self.tables.lock().await;
        tables
            .comments
            .values()
            .filter(|comment| comment.post_id == post_id)
            .count()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        let mut tables = self.tables.lock().await;
        if tables.users.values().any(|c| c.user.email == user.email) {
            return Err(StoreError::Conflict {
                constraint: USERS_EMAIL_KEY.to_string(),
            });
        }

        let created = User {
            id: tables.next_id(),
            name: user.name,
            email: user.email,
            created_at: OffsetDateTime::now_utc(),
        };
        tables.users.insert(
            created.id,
            Credentials {
                user: created.clone(),
                password_hash: user.password_hash,
            },
        );
        Ok(created)
    }

    async fn find_user(&self, user_id: i64) -> StoreResult<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables.users.get(&user_id).map(|c| c.user.clone()))
    }

    async fn find_credentials(&self, email: &str) -> StoreResult<Option<Credentials>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|c| c.user.email == email)
            .cloned())
    }

    async fn email_taken(&self, email: &str) -> StoreResult<bool> {
        let tables = self.tables.lock().await;
        Ok(tables.users.values().any(|c| c.user.email == email))
    }

    async fn insert_session(&self, session: &Session) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn find_session(&self, session_id: Uuid) -> StoreResult<Option<Session>> {
        let tables = self.tables.lock().await;
        Ok(tables.sessions.get(&session_id).cloned())
    }

    async fn delete_session(&self, session_id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        Ok(tables.sessions.remove(&session_id).is_some())
    }

    async fn insert_post(&self, post: NewPost) -> StoreResult<Post> {
        let mut tables = self.tables.lock().await;
        let now = OffsetDateTime::now_utc();
        let created = Post {
            id: tables.next_id(),
            owner_id: post.owner_id,
            title: post.title,
            content: post.content,
            created_at: now,
            updated_at: now,
        };
        tables.posts.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_post(&self, post_id: i64) -> StoreResult<Option<Post>> {
        let tables = self.tables.lock().await;
        Ok(tables.posts.get(&post_id).cloned())
    }

    async fn update_post(
        &self,
        post_id: i64,
        title: &str,
        content: &str,
    ) -> StoreResult<Option<Post>> {
        let mut tables = self.tables.lock().await;
        let Some(post) = tables.posts.get_mut(&post_id) else {
            return Ok(None);
        };
        post.title = title.to_string();
        post.content = content.to_string();
        post.updated_at = OffsetDateTime::now_utc();
        Ok(Some(post.clone()))
    }

    async fn delete_post(&self, post_id: i64) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        if tables.posts.remove(&post_id).is_none() {
            return Ok(false);
        }
        tables.comments.retain(|_, comment| comment.post_id != post_id);
        tables.likes.retain(|_, like| like.post_id != post_id);
        tables.post_tags.retain(|(linked_post, _)| *linked_post != post_id);
        Ok(true)
    }

    async fn post_view(&self, post_id: i64) -> StoreResult<Option<PostView>> {
        let tables = self.tables.lock().await;
        Ok(tables.posts.get(&post_id).map(|post| tables.view(post)))
    }

    async fn list_post_views(&self, query: &PostQuery) -> StoreResult<PostPage> {
        let tables = self.tables.lock().await;
        let mut matching: Vec<&Post> = tables
            .posts
            .values()
            .filter(|post| tables.matches(post, query))
            .collect();
        matching.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        let total = matching.len() as i64;
        let posts = matching
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.per_page as usize)
            .map(|post| tables.view(post))
            .collect();

        Ok(PostPage::new(posts, query, total))
    }

    async fn insert_tag(&self, name: &str) -> StoreResult<Tag> {
        let mut tables = self.tables.lock().await;
        if tables.tags.values().any(|tag| tag.name == name) {
            return Err(StoreError::Conflict {
                constraint: TAGS_NAME_KEY.to_string(),
            });
        }
        let tag = Tag {
            id: tables.next_id(),
            name: name.to_string(),
        };
        tables.tags.insert(tag.id, tag.clone());
        Ok(tag)
    }

    async fn tag_name_taken(&self, name: &str) -> StoreResult<bool> {
        let tables = self.tables.lock().await;
        Ok(tables.tags.values().any(|tag| tag.name == name))
    }

    async fn existing_tag_ids(&self, tag_ids: &[i64]) -> StoreResult<Vec<i64>> {
        let tables = self.tables.lock().await;
        Ok(tag_ids
            .iter()
            .copied()
            .filter(|id| tables.tags.contains_key(id))
            .collect())
    }

    async fn delete_tag(&self, tag_id: i64) -> StoreResult<Option<Vec<i64>>> {
        let mut tables = self.tables.lock().await;
        if tables.tags.remove(&tag_id).is_none() {
            return Ok(None);
        }
        let post_ids: Vec<i64> = tables
            .post_tags
            .iter()
            .filter(|(_, linked_tag)| *linked_tag == tag_id)
            .map(|(post_id, _)| *post_id)
            .collect();
        tables.post_tags.retain(|(_, linked_tag)| *linked_tag != tag_id);
        Ok(Some(post_ids))
    }

    async fn sync_post_tags(
        &self,
        post_id: i64,
        tag_ids: &[i64],
        mode: TagSync,
    ) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        match mode {
            TagSync::Replace => {
                tables
                    .post_tags
                    .retain(|(linked_post, tag_id)| {
                        *linked_post != post_id || tag_ids.contains(tag_id)
                    });
                tables
                    .post_tags
                    .extend(tag_ids.iter().map(|tag_id| (post_id, *tag_id)));
            }
            TagSync::Append => {
                tables
                    .post_tags
                    .extend(tag_ids.iter().map(|tag_id| (post_id, *tag_id)));
            }
            TagSync::Detach => {
                for tag_id in tag_ids {
                    tables.post_tags.remove(&(post_id, *tag_id));
                }
            }
        }
        Ok(())
    }

    async fn toggle_like(&self, post_id: i64, user_id: i64) -> StoreResult<LikeToggle> {
        let mut tables = self.tables.lock().await;
        let existing = tables
            .likes
            .values()
            .find(|like| like.post_id == post_id && like.user_id == user_id)
            .map(|like| like.id);

        if let Some(like_id) = existing {
            tables.likes.remove(&like_id);
            return Ok(LikeToggle::Unliked);
        }

        let like = Like {
            id: tables.next_id(),
            user_id,
            post_id,
            created_at: OffsetDateTime::now_utc(),
        };
        tables.likes.insert(like.id, like.clone());
        Ok(LikeToggle::Liked(like))
    }

    async fn like_count(&self, post_id: i64) -> StoreResult<i64> {
        let tables = self.tables.lock().await;
        Ok(tables
            .likes
            .values()
            .filter(|like| like.post_id == post_id)
            .count() as i64)
    }

    async fn insert_comment(&self, comment: NewComment) -> StoreResult<Comment> {
        let mut tables = self.tables.lock().await;
        let created = Comment {
            id: tables.next_id(),
            user_id: comment.user_id,
            post_id: comment.post_id,
            comment: comment.comment,
            created_at: OffsetDateTime::now_utc(),
        };
        tables.comments.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_comment(&self, comment_id: i64) -> StoreResult<Option<Comment>> {
        let tables = self.tables.lock().await;
        Ok(tables.comments.get(&comment_id).cloned())
    }

    async fn delete_comment(&self, comment_id: i64) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        Ok(tables.comments.remove(&comment_id).is_some())
    }
}
