use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::app::error::{ServiceError, ServiceResult};
use crate::domain::post::{PostPage, PostQuery, PostView};
use crate::infra::cache::CacheLayer;
use crate::infra::store::EntityStore;

/// Cache group holding every paginated listing key.
pub const POSTS_PAGES_GROUP: &str = "posts:pages";

pub fn post_cache_key(post_id: i64) -> String {
    format!("post_{}", post_id)
}

/// Listing keys hash the full filter tuple, so distinct filters never share
/// an entry and identical filters always do.
pub fn listing_cache_key(query: &PostQuery) -> String {
    #[derive(Serialize)]
    struct Filters<'a> {
        page: u32,
        per_page: u32,
        search: Option<&'a str>,
        tag_id: Option<i64>,
    }

    let filters = Filters {
        page: query.page,
        per_page: query.per_page,
        search: query.search.as_deref(),
        tag_id: query.tag_id,
    };
    let encoded = serde_json::to_vec(&filters).unwrap_or_default();
    let digest = Sha256::digest(&encoded);
    format!("posts_page_{}", hex::encode(digest))
}

pub(crate) async fn invalidate_listings(cache: &CacheLayer) {
    cache.forget_group(POSTS_PAGES_GROUP).await;
}

/// Drops the cached copy of one post and every listing page.
pub(crate) async fn invalidate_post(cache: &CacheLayer, post_id: i64) {
    cache.forget(&post_cache_key(post_id)).await;
    invalidate_listings(cache).await;
}

#[derive(Clone)]
pub struct FeedService {
    store: Arc<dyn EntityStore>,
    cache: CacheLayer,
    per_page: u32,
}

impl FeedService {
    pub fn new(store: Arc<dyn EntityStore>, cache: CacheLayer, per_page: u32) -> Self {
        Self {
            store,
            cache,
            per_page,
        }
    }

    pub fn build_query(&self, page: Option<u32>, search: Option<&str>, tag_id: Option<i64>) -> PostQuery {
        let search = search
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(str::to_string);
        PostQuery {
            page: page.unwrap_or(1).max(1),
            per_page: self.per_page.max(1),
            search,
            tag_id,
        }
    }

    pub async fn list_posts(&self, query: PostQuery) -> ServiceResult<PostPage> {
        let key = listing_cache_key(&query);
        let store = self.store.clone();
        self.cache
            .remember(&key, Some(POSTS_PAGES_GROUP), || async move {
                let page = store.list_post_views(&query).await?;
                Ok::<_, ServiceError>(page)
            })
            .await
    }

    pub async fn get_post(&self, post_id: i64) -> ServiceResult<PostView> {
        let store = self.store.clone();
        self.cache
            .remember(&post_cache_key(post_id), None, || async move {
                store
                    .post_view(post_id)
                    .await?
                    .ok_or(ServiceError::NotFound("Post not found."))
            })
            .await
    }
}
