use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use crate::app::error::{check_text, ServiceError, ServiceResult, ValidationErrors};
use crate::app::feed::invalidate_post;
use crate::domain::engagement::{CommentView, LikeToggle, NewComment};
use crate::domain::post::Post;
use crate::infra::broadcast::{post_channel, Broadcaster, COMMENT_ADDED, POST_LIKED};
use crate::infra::cache::CacheLayer;
use crate::infra::store::EntityStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LikeOutcome {
    pub liked: bool,
    pub likes_count: i64,
}

#[derive(Clone)]
pub struct EngagementService {
    store: Arc<dyn EntityStore>,
    cache: CacheLayer,
    broadcaster: Arc<dyn Broadcaster>,
}

impl EngagementService {
    pub fn new(
        store: Arc<dyn EntityStore>,
        cache: CacheLayer,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            store,
            cache,
            broadcaster,
        }
    }

    /// Likes the post, or removes the caller's like if one exists.
    pub async fn toggle_like(&self, post_id: i64, user_id: i64) -> ServiceResult<LikeOutcome> {
        let post = self.existing_post(post_id).await?;

        let toggle = self.store.toggle_like(post_id, user_id).await?;
        invalidate_post(&self.cache, post_id).await;

        if let LikeToggle::Liked(like) = &toggle {
            self.publish(
                post_id,
                POST_LIKED,
                json!({ "like": like, "post_owner_id": post.owner_id }),
            )
            .await;
        }

        let likes_count = self.store.like_count(post_id).await?;
        Ok(LikeOutcome {
            liked: toggle.is_liked(),
            likes_count,
        })
    }

    pub async fn add_comment(
        &self,
        post_id: i64,
        user_id: i64,
        text: Option<&str>,
    ) -> ServiceResult<CommentView> {
        let mut errors = ValidationErrors::new();
        check_text(&mut errors, "comment", text, usize::MAX);
        errors.into_result()?;
        let text = text.map(str::trim).unwrap_or_default().to_string();

        self.existing_post(post_id).await?;

        let comment = self
            .store
            .insert_comment(NewComment {
                post_id,
                user_id,
                comment: text,
            })
            .await?;
        let author = self
            .store
            .find_user(user_id)
            .await?
            .ok_or(ServiceError::Unauthenticated("Unauthenticated."))?;

        let view = CommentView {
            id: comment.id,
            comment: comment.comment,
            user: (&author).into(),
            created_at: comment.created_at,
        };

        invalidate_post(&self.cache, post_id).await;
        self.publish(post_id, COMMENT_ADDED, json!({ "comment": &view, "post_id": post_id }))
            .await;

        Ok(view)
    }

    pub async fn delete_comment(&self, comment_id: i64, caller_id: i64) -> ServiceResult<()> {
        let comment = self
            .store
            .find_comment(comment_id)
            .await?
            .ok_or(ServiceError::NotFound("Comment not found."))?;
        if comment.user_id != caller_id {
            return Err(ServiceError::Unauthorized);
        }

        if !self.store.delete_comment(comment_id).await? {
            return Err(ServiceError::NotFound("Comment not found."));
        }
        invalidate_post(&self.cache, comment.post_id).await;
        Ok(())
    }

    async fn existing_post(&self, post_id: i64) -> ServiceResult<Post> {
        self.store
            .find_post(post_id)
            .await?
            .ok_or(ServiceError::NotFound("Post not found."))
    }

    async fn publish(&self, post_id: i64, event: &str, payload: serde_json::Value) {
        let channel = post_channel(post_id);
        if let Err(err) = self.broadcaster.publish(&channel, event, payload).await {
            tracing::warn!(error = ?err, post_id, event, "failed to publish event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::post::NewPost;
    use crate::domain::user::NewUser;
    use crate::infra::broadcast::MemoryBroadcaster;
    use crate::infra::cache::MemoryCache;
    use crate::infra::store::MemoryStore;
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;

    struct Fixture {
        store: Arc<MemoryStore>,
        broadcaster: Arc<MemoryBroadcaster>,
        service: EngagementService,
        owner: i64,
        reader: i64,
        post_id: i64,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let broadcaster = Arc::new(MemoryBroadcaster::default());
        let cache = CacheLayer::new(Arc::new(MemoryCache::new()), Duration::from_secs(60));

        let mut ids = Vec::new();
        for (name, email) in [("Ada", "ada@example.com"), ("Bob", "bob@example.com")] {
            let user = store
                .insert_user(NewUser {
                    name: name.to_string(),
                    email: email.to_string(),
                    password_hash: "x".to_string(),
                })
                .await
                .unwrap();
            ids.push(user.id);
        }
        let post = store
            .insert_post(NewPost {
                owner_id: ids[0],
                title: "T".to_string(),
                content: "C".to_string(),
            })
            .await
            .unwrap();

        Fixture {
            service: EngagementService::new(store.clone(), cache, broadcaster.clone()),
            store,
            broadcaster,
            owner: ids[0],
            reader: ids[1],
            post_id: post.id,
        }
    }

    #[tokio::test]
    async fn toggling_twice_returns_to_not_liked() {
        let fx = fixture().await;

        let first = fx.service.toggle_like(fx.post_id, fx.reader).await.unwrap();
        assert_eq!(first, LikeOutcome { liked: true, likes_count: 1 });

        let second = fx.service.toggle_like(fx.post_id, fx.reader).await.unwrap();
        assert_eq!(second, LikeOutcome { liked: false, likes_count: 0 });
        assert_eq!(fx.store.like_rows(fx.post_id, fx.reader).await, 0);
    }

    #[tokio::test]
    async fn only_new_likes_are_broadcast() {
        let fx = fixture().await;
        let mut rx = fx.broadcaster.subscribe();

        fx.service.toggle_like(fx.post_id, fx.reader).await.unwrap();
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.channel, post_channel(fx.post_id));
        assert_eq!(envelope.event, POST_LIKED);
        assert_eq!(envelope.data["post_owner_id"], fx.owner);

        fx.service.toggle_like(fx.post_id, fx.reader).await.unwrap();
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn concurrent_toggles_like_then_unlike() {
        let fx = fixture().await;
        let mut rx = fx.broadcaster.subscribe();

        let (a, b) = tokio::join!(
            fx.service.toggle_like(fx.post_id, fx.reader),
            fx.service.toggle_like(fx.post_id, fx.reader),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.liked, b.liked);
        assert_eq!(fx.store.like_rows(fx.post_id, fx.reader).await, 0);

        assert_eq!(rx.recv().await.unwrap().event, POST_LIKED);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn liking_a_missing_post_is_not_found() {
        let fx = fixture().await;
        let err = fx.service.toggle_like(fx.post_id + 100, fx.reader).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn comments_are_trimmed_and_broadcast() {
        let fx = fixture().await;
        let mut rx = fx.broadcaster.subscribe();

        let view = fx
            .service
            .add_comment(fx.post_id, fx.reader, Some("  nice post  "))
            .await
            .unwrap();
        assert_eq!(view.comment, "nice post");
        assert_eq!(view.user.name, "Bob");

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.event, COMMENT_ADDED);
        assert_eq!(envelope.data["comment"]["id"], view.id);
    }

    #[tokio::test]
    async fn blank_comments_are_rejected() {
        let fx = fixture().await;
        let err = fx
            .service
            .add_comment(fx.post_id, fx.reader, Some("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert_eq!(fx.store.comment_count(fx.post_id).await, 0);
    }

    #[tokio::test]
    async fn only_the_author_deletes_a_comment() {
        let fx = fixture().await;
        let view = fx
            .service
            .add_comment(fx.post_id, fx.reader, Some("mine"))
            .await
            .unwrap();

        let err = fx.service.delete_comment(view.id, fx.owner).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized));
        assert_eq!(fx.store.comment_count(fx.post_id).await, 1);

        fx.service.delete_comment(view.id, fx.reader).await.unwrap();
        assert_eq!(fx.store.comment_count(fx.post_id).await, 0);

        let missing = fx.service.delete_comment(view.id, fx.reader).await.unwrap_err();
        assert!(matches!(missing, ServiceError::NotFound(_)));
    }
}
