use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::engagement::{Comment, CommentView, Like, LikeToggle, NewComment};
use crate::domain::post::{NewPost, Post, PostPage, PostQuery, PostView};
use crate::domain::tag::{Tag, TagSync};
use crate::domain::user::{Author, Credentials, NewUser, Session, User};
use crate::infra::db::Db;
use crate::infra::store::{escape_like, EntityStore, StoreResult};

const POST_VIEW_COLUMNS: &str = "p.id, p.user_id, p.title, p.content, p.created_at, \
                                 u.name AS author_name";

#[derive(Clone)]
pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Attaches tags, comments and like counts to a batch of post rows with
    /// one query per relation.
    async fn hydrate(&self, rows: Vec<PgRow>) -> StoreResult<Vec<PostView>> {
        let ids: Vec<i64> = rows.iter().map(|row| row.get("id")).collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let tag_rows = sqlx::query(
            "SELECT pt.post_id, t.id, t.name \
             FROM post_tag pt \
             JOIN tags t ON t.id = pt.tag_id \
             WHERE pt.post_id = ANY($1) \
             ORDER BY t.id",
        )
        .bind(&ids)
        .fetch_all(self.db.pool())
        .await?;

        let mut tags: HashMap<i64, Vec<Tag>> = HashMap::new();
        for row in tag_rows {
            tags.entry(row.get("post_id")).or_default().push(Tag {
                id: row.get("id"),
                name: row.get("name"),
            });
        }

        let comment_rows = sqlx::query(
            "SELECT c.id, c.post_id, c.comment, c.created_at, c.user_id, u.name AS user_name \
             FROM comments c \
             JOIN users u ON u.id = c.user_id \
             WHERE c.post_id = ANY($1) \
             ORDER BY c.created_at, c.id",
        )
        .bind(&ids)
        .fetch_all(self.db.pool())
        .await?;

        let mut comments: HashMap<i64, Vec<CommentView>> = HashMap::new();
        for row in comment_rows {
            comments
                .entry(row.get("post_id"))
                .or_default()
                .push(CommentView {
                    id: row.get("id"),
                    comment: row.get("comment"),
                    user: Author {
                        id: row.get("user_id"),
                        name: row.get("user_name"),
                    },
                    created_at: row.get("created_at"),
                });
        }

        let like_rows = sqlx::query(
            "SELECT post_id, COUNT(*) AS likes_count \
             FROM likes \
             WHERE post_id = ANY($1) \
             GROUP BY post_id",
        )
        .bind(&ids)
        .fetch_all(self.db.pool())
        .await?;

        let likes: HashMap<i64, i64> = like_rows
            .into_iter()
            .map(|row| (row.get("post_id"), row.get("likes_count")))
            .collect();

        let views = rows
            .into_iter()
            .map(|row| {
                let id: i64 = row.get("id");
                PostView {
                    id,
                    title: row.get("title"),
                    content: row.get("content"),
                    likes_count: likes.get(&id).copied().unwrap_or(0),
                    created_at: row.get("created_at"),
                    author: Author {
                        id: row.get("user_id"),
                        name: row.get("author_name"),
                    },
                    tags: tags.remove(&id).unwrap_or_default(),
                    comments: comments.remove(&id).unwrap_or_default(),
                }
            })
            .collect();

        Ok(views)
    }
}

fn user_from_row(row: &PgRow) -> User {
    User {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        created_at: row.get("created_at"),
    }
}

fn post_from_row(row: &PgRow) -> Post {
    Post {
        id: row.get("id"),
        owner_id: row.get("user_id"),
        title: row.get("title"),
        content: row.get("content"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn like_from_row(row: &PgRow) -> Like {
    Like {
        id: row.get("id"),
        user_id: row.get("user_id"),
        post_id: row.get("post_id"),
        created_at: row.get("created_at"),
    }
}

fn comment_from_row(row: &PgRow) -> Comment {
    Comment {
        id: row.get("id"),
        user_id: row.get("user_id"),
        post_id: row.get("post_id"),
        comment: row.get("comment"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl EntityStore for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(self.db.pool()).await?;
        Ok(())
    }

    async fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        let row = sqlx::query(
            "INSERT INTO users (name, email, password_hash) \
             VALUES ($1, $2, $3) \
             RETURNING id, name, email, created_at",
        )
        .bind(user.name)
        .bind(user.email)
        .bind(user.password_hash)
        .fetch_one(self.db.pool())
        .await?;

        Ok(user_from_row(&row))
    }

    async fn find_user(&self, user_id: i64) -> StoreResult<Option<User>> {
        let row = sqlx::query("SELECT id, name, email, created_at FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(row.as_ref().map(user_from_row))
    }

    async fn find_credentials(&self, email: &str) -> StoreResult<Option<Credentials>> {
        let row = sqlx::query(
            "SELECT id, name, email, created_at, password_hash FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(|row| Credentials {
            user: user_from_row(&row),
            password_hash: row.get("password_hash"),
        }))
    }

    async fn email_taken(&self, email: &str) -> StoreResult<bool> {
        let taken: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
            .bind(email)
            .fetch_one(self.db.pool())
            .await?;
        Ok(taken)
    }

    async fn insert_session(&self, session: &Session) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO sessions (id, user_id, token_hash, expires_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(&session.token_hash)
        .bind(session.expires_at)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn find_session(&self, session_id: Uuid) -> StoreResult<Option<Session>> {
        let row = sqlx::query(
            "SELECT id, user_id, token_hash, expires_at FROM sessions WHERE id = $1",
        )
        .bind(session_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(|row| Session {
            id: row.get("id"),
            user_id: row.get("user_id"),
            token_hash: row.get("token_hash"),
            expires_at: row.get("expires_at"),
        }))
    }

    async fn delete_session(&self, session_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(session_id)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_post(&self, post: NewPost) -> StoreResult<Post> {
        let row = sqlx::query(
            "INSERT INTO posts (user_id, title, content) \
             VALUES ($1, $2, $3) \
             RETURNING id, user_id, title, content, created_at, updated_at",
        )
        .bind(post.owner_id)
        .bind(post.title)
        .bind(post.content)
        .fetch_one(self.db.pool())
        .await?;

        Ok(post_from_row(&row))
    }

    async fn find_post(&self, post_id: i64) -> StoreResult<Option<Post>> {
        let row = sqlx::query(
            "SELECT id, user_id, title, content, created_at, updated_at FROM posts WHERE id = $1",
        )
        .bind(post_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.as_ref().map(post_from_row))
    }

    async fn update_post(
        &self,
        post_id: i64,
        title: &str,
        content: &str,
    ) -> StoreResult<Option<Post>> {
        let row = sqlx::query(
            "UPDATE posts \
             SET title = $2, content = $3, updated_at = now() \
             WHERE id = $1 \
             RETURNING id, user_id, title, content, created_at, updated_at",
        )
        .bind(post_id)
        .bind(title)
        .bind(content)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.as_ref().map(post_from_row))
    }

    async fn delete_post(&self, post_id: i64) -> StoreResult<bool> {
        // comments, likes and post_tag rows go with it (ON DELETE CASCADE)
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(post_id)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn post_view(&self, post_id: i64) -> StoreResult<Option<PostView>> {
        let row = sqlx::query(&format!(
            "SELECT {POST_VIEW_COLUMNS} \
             FROM posts p \
             JOIN users u ON u.id = p.user_id \
             WHERE p.id = $1"
        ))
        .bind(post_id)
        .fetch_optional(self.db.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut views = self.hydrate(vec![row]).await?;
        Ok(views.pop())
    }

    async fn list_post_views(&self, query: &PostQuery) -> StoreResult<PostPage> {
        let pattern = query
            .search
            .as_deref()
            .map(|term| format!("%{}%", escape_like(term)));

        let filter = "($1::text IS NULL OR p.title ILIKE $1 OR p.content ILIKE $1) \
                      AND ($2::bigint IS NULL OR EXISTS ( \
                          SELECT 1 FROM post_tag pt WHERE pt.post_id = p.id AND pt.tag_id = $2 \
                      ))";

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM posts p WHERE {filter}"))
            .bind(&pattern)
            .bind(query.tag_id)
            .fetch_one(self.db.pool())
            .await?;

        let rows = sqlx::query(&format!(
            "SELECT {POST_VIEW_COLUMNS} \
             FROM posts p \
             JOIN users u ON u.id = p.user_id \
             WHERE {filter} \
             ORDER BY p.created_at DESC, p.id DESC \
             LIMIT $3 OFFSET $4"
        ))
        .bind(&pattern)
        .bind(query.tag_id)
        .bind(i64::from(query.per_page))
        .bind(query.offset())
        .fetch_all(self.db.pool())
        .await?;

        let posts = self.hydrate(rows).await?;
        Ok(PostPage::new(posts, query, total))
    }

    async fn insert_tag(&self, name: &str) -> StoreResult<Tag> {
        let row = sqlx::query("INSERT INTO tags (name) VALUES ($1) RETURNING id, name")
            .bind(name)
            .fetch_one(self.db.pool())
            .await?;

        Ok(Tag {
            id: row.get("id"),
            name: row.get("name"),
        })
    }

    async fn tag_name_taken(&self, name: &str) -> StoreResult<bool> {
        let taken: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tags WHERE name = $1)")
            .bind(name)
            .fetch_one(self.db.pool())
            .await?;
        Ok(taken)
    }

    async fn existing_tag_ids(&self, tag_ids: &[i64]) -> StoreResult<Vec<i64>> {
        if tag_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM tags WHERE id = ANY($1)")
            .bind(tag_ids)
            .fetch_all(self.db.pool())
            .await?;
        Ok(ids)
    }

    async fn delete_tag(&self, tag_id: i64) -> StoreResult<Option<Vec<i64>>> {
        let mut tx = self.db.pool().begin().await?;

        let post_ids: Vec<i64> =
            sqlx::query_scalar("SELECT post_id FROM post_tag WHERE tag_id = $1 ORDER BY post_id")
                .bind(tag_id)
                .fetch_all(&mut *tx)
                .await?;

        let result = sqlx::query("DELETE FROM tags WHERE id = $1")
            .bind(tag_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        tx.commit().await?;
        Ok(Some(post_ids))
    }

    async fn sync_post_tags(
        &self,
        post_id: i64,
        tag_ids: &[i64],
        mode: TagSync,
    ) -> StoreResult<()> {
        let mut tx = self.db.pool().begin().await?;

        match mode {
            TagSync::Replace => {
                sqlx::query("DELETE FROM post_tag WHERE post_id = $1 AND NOT (tag_id = ANY($2))")
                    .bind(post_id)
                    .bind(tag_ids)
                    .execute(&mut *tx)
                    .await?;
                insert_post_tags(&mut tx, post_id, tag_ids).await?;
            }
            TagSync::Append => {
                insert_post_tags(&mut tx, post_id, tag_ids).await?;
            }
            TagSync::Detach => {
                sqlx::query("DELETE FROM post_tag WHERE post_id = $1 AND tag_id = ANY($2)")
                    .bind(post_id)
                    .bind(tag_ids)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn toggle_like(&self, post_id: i64, user_id: i64) -> StoreResult<LikeToggle> {
        let mut tx = self.db.pool().begin().await?;

        // Serializes toggles of one (post, user) pair until commit.
        sqlx::query(
            "SELECT pg_advisory_xact_lock(hashtextextended(format('like:%s:%s', $1::bigint, $2::bigint), 0))",
        )
        .bind(post_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let removed = sqlx::query("DELETE FROM likes WHERE post_id = $1 AND user_id = $2")
            .bind(post_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        if removed.rows_affected() > 0 {
            tx.commit().await?;
            return Ok(LikeToggle::Unliked);
        }

        let row = sqlx::query(
            "INSERT INTO likes (post_id, user_id) VALUES ($1, $2) \
             RETURNING id, user_id, post_id, created_at",
        )
        .bind(post_id)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(LikeToggle::Liked(like_from_row(&row)))
    }

    async fn like_count(&self, post_id: i64) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM likes WHERE post_id = $1")
            .bind(post_id)
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }

    async fn insert_comment(&self, comment: NewComment) -> StoreResult<Comment> {
        let row = sqlx::query(
            "INSERT INTO comments (post_id, user_id, comment) VALUES ($1, $2, $3) \
             RETURNING id, user_id, post_id, comment, created_at",
        )
        .bind(comment.post_id)
        .bind(comment.user_id)
        .bind(comment.comment)
        .fetch_one(self.db.pool())
        .await?;

        Ok(comment_from_row(&row))
    }

    async fn find_comment(&self, comment_id: i64) -> StoreResult<Option<Comment>> {
        let row = sqlx::query(
            "SELECT id, user_id, post_id, comment, created_at FROM comments WHERE id = $1",
        )
        .bind(comment_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.as_ref().map(comment_from_row))
    }

    async fn delete_comment(&self, comment_id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM comments WHERE id = $1")
            .bind(comment_id)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

async fn insert_post_tags(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    post_id: i64,
    tag_ids: &[i64],
) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO post_tag (post_id, tag_id) \
         SELECT $1, UNNEST($2::bigint[]) \
         ON CONFLICT DO NOTHING",
    )
    .bind(post_id)
    .bind(tag_ids)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
