use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::app::error::{check_text, ServiceError, ServiceResult, ValidationErrors};
use crate::app::feed::{invalidate_listings, invalidate_post};
use crate::app::tags::{ensure_tags_exist, parse_flag, parse_tag_ids};
use crate::domain::post::{NewPost, Post, PostView};
use crate::domain::tag::TagSync;
use crate::infra::cache::CacheLayer;
use crate::infra::store::EntityStore;

pub const TITLE_MAX: usize = 255;
pub const CONTENT_MAX: usize = 1000;

/// Raw post body. `tags` and `append_tags` are kept loose here and
/// normalized by [`parse_tag_ids`] and [`parse_flag`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostInput {
    pub title: Option<String>,
    pub content: Option<String>,
    #[serde(default)]
    pub tags: Option<Value>,
    #[serde(default)]
    pub append_tags: Option<Value>,
}

struct ValidPost {
    title: String,
    content: String,
    tags: Option<Vec<i64>>,
    append_tags: bool,
}

#[derive(Clone)]
pub struct PostService {
    store: Arc<dyn EntityStore>,
    cache: CacheLayer,
}

impl PostService {
    pub fn new(store: Arc<dyn EntityStore>, cache: CacheLayer) -> Self {
        Self { store, cache }
    }

    pub async fn create_post(&self, owner_id: i64, input: PostInput) -> ServiceResult<PostView> {
        let valid = self.validate(input).await?;

        let post = self
            .store
            .insert_post(NewPost {
                owner_id,
                title: valid.title,
                content: valid.content,
            })
            .await?;

        if let Some(tag_ids) = valid.tags {
            self.store
                .sync_post_tags(post.id, &tag_ids, TagSync::Replace)
                .await?;
        }

        invalidate_listings(&self.cache).await;
        tracing::info!(post_id = post.id, owner_id, "post created");
        self.view(post.id).await
    }

    pub async fn edit_post(
        &self,
        post_id: i64,
        caller_id: i64,
        input: PostInput,
    ) -> ServiceResult<PostView> {
        let valid = self.validate(input).await?;
        self.owned_post(post_id, caller_id).await?;

        self.store
            .update_post(post_id, &valid.title, &valid.content)
            .await?
            .ok_or(ServiceError::NotFound("Post not found."))?;

        if let Some(tag_ids) = valid.tags {
            let mode = if valid.append_tags {
                TagSync::Append
            } else {
                TagSync::Replace
            };
            self.store.sync_post_tags(post_id, &tag_ids, mode).await?;
        }

        invalidate_post(&self.cache, post_id).await;
        self.view(post_id).await
    }

    pub async fn delete_post(&self, post_id: i64, caller_id: i64) -> ServiceResult<()> {
        self.owned_post(post_id, caller_id).await?;

        if !self.store.delete_post(post_id).await? {
            return Err(ServiceError::NotFound("Post not found."));
        }

        invalidate_post(&self.cache, post_id).await;
        tracing::info!(post_id, caller_id, "post deleted");
        Ok(())
    }

    pub async fn attach_tags(
        &self,
        post_id: i64,
        caller_id: i64,
        tags: Option<&Value>,
    ) -> ServiceResult<PostView> {
        self.change_tags(post_id, caller_id, tags, TagSync::Append)
            .await
    }

    pub async fn detach_tags(
        &self,
        post_id: i64,
        caller_id: i64,
        tags: Option<&Value>,
    ) -> ServiceResult<PostView> {
        self.change_tags(post_id, caller_id, tags, TagSync::Detach)
            .await
    }

    async fn change_tags(
        &self,
        post_id: i64,
        caller_id: i64,
        tags: Option<&Value>,
        mode: TagSync,
    ) -> ServiceResult<PostView> {
        let tag_ids = match parse_tag_ids(tags)? {
            Some(ids) if !ids.is_empty() => ids,
            _ => return Err(ServiceError::validation("tags", "The tags field is required.")),
        };
        ensure_tags_exist(self.store.as_ref(), &tag_ids).await?;
        self.owned_post(post_id, caller_id).await?;

        self.store.sync_post_tags(post_id, &tag_ids, mode).await?;

        invalidate_post(&self.cache, post_id).await;
        self.view(post_id).await
    }

    /// Loads the post and checks the caller owns it: missing posts are
    /// reported before foreign ones.
    async fn owned_post(&self, post_id: i64, caller_id: i64) -> ServiceResult<Post> {
        let post = self
            .store
            .find_post(post_id)
            .await?
            .ok_or(ServiceError::NotFound("Post not found."))?;
        if post.owner_id != caller_id {
            return Err(ServiceError::Unauthorized);
        }
        Ok(post)
    }

    async fn view(&self, post_id: i64) -> ServiceResult<PostView> {
        self.store
            .post_view(post_id)
            .await?
            .ok_or(ServiceError::NotFound("Post not found."))
    }

    async fn validate(&self, input: PostInput) -> ServiceResult<ValidPost> {
        let mut errors = ValidationErrors::new();
        check_text(&mut errors, "title", input.title.as_deref(), TITLE_MAX);
        check_text(&mut errors, "content", input.content.as_deref(), CONTENT_MAX);

        let tags = match parse_tag_ids(input.tags.as_ref()) {
            Ok(tags) => tags,
            Err(ServiceError::Validation(tag_errors)) => {
                errors.merge(tag_errors);
                None
            }
            Err(err) => return Err(err),
        };
        let append_tags = match parse_flag("append_tags", input.append_tags.as_ref()) {
            Ok(flag) => flag,
            Err(ServiceError::Validation(flag_errors)) => {
                errors.merge(flag_errors);
                false
            }
            Err(err) => return Err(err),
        };
        errors.into_result()?;

        if let Some(tag_ids) = &tags {
            ensure_tags_exist(self.store.as_ref(), tag_ids).await?;
        }

        Ok(ValidPost {
            title: input.title.unwrap_or_default(),
            content: input.content.unwrap_or_default(),
            tags,
            append_tags,
        })
    }
}
