use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::app::auth::{AuthGrant, RegisterInput};
use crate::app::engagement::EngagementService;
use crate::app::error::{ServiceError, ValidationErrors};
use crate::app::feed::FeedService;
use crate::app::posts::{PostInput, PostService};
use crate::app::tags::TagService;
use crate::domain::engagement::CommentView;
use crate::domain::post::{PostPage, PostView};
use crate::domain::tag::Tag;
use crate::domain::user::User;
use crate::http::{ApiJson, ApiPath, ApiQuery, AppError, AuthUser};
use crate::AppState;

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let db = state.store.ping().await.is_ok();
    let cache = state.cache.ping().await.is_ok();
    let status = if db && cache { "ok" } else { "degraded" };

    Json(HealthResponse { status })
}

fn post_service(state: &AppState) -> PostService {
    PostService::new(state.store.clone(), state.cache_layer())
}

fn engagement_service(state: &AppState) -> EngagementService {
    EngagementService::new(
        state.store.clone(),
        state.cache_layer(),
        state.broadcaster.clone(),
    )
}

pub async fn register(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RegisterInput>,
) -> Result<(StatusCode, Json<AuthGrant>), AppError> {
    let grant = state
        .auth_service()
        .register(payload)
        .await
        .map_err(|err| AppError::from_service(err, "failed to register user"))?;

    Ok((StatusCode::CREATED, Json(grant)))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> Result<Json<AuthGrant>, AppError> {
    let mut errors = ValidationErrors::new();
    if payload.email.as_deref().map_or(true, |email| email.trim().is_empty()) {
        errors.add("email", "The email field is required.");
    }
    if payload.password.as_deref().map_or(true, str::is_empty) {
        errors.add("password", "The password field is required.");
    }
    errors
        .into_result()
        .map_err(|err| AppError::from_service(err, "failed to login"))?;

    let grant = state
        .auth_service()
        .login(
            payload.email.as_deref().unwrap_or_default(),
            payload.password.as_deref().unwrap_or_default(),
        )
        .await
        .map_err(|err| AppError::from_service(err, "failed to login"))?;

    Ok(Json(grant))
}

pub async fn logout(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<MessageResponse>, AppError> {
    state
        .auth_service()
        .logout(auth.into())
        .await
        .map_err(|err| AppError::from_service(err, "failed to logout"))?;

    Ok(Json(MessageResponse {
        message: "Logged out successfully.",
    }))
}

pub async fn current_user(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<User>, AppError> {
    let user = state
        .auth_service()
        .current_user(auth.user_id)
        .await
        .map_err(|err| AppError::from_service(err, "failed to load user"))?;

    Ok(Json(user))
}

#[derive(Deserialize)]
pub struct ListPostsQuery {
    pub page: Option<String>,
    pub search: Option<String>,
    pub tag_id: Option<String>,
}

pub async fn list_posts(
    ApiQuery(query): ApiQuery<ListPostsQuery>,
    State(state): State<AppState>,
) -> Result<Json<PostPage>, AppError> {
    // Unparseable pages fall back to the first one.
    let page = query
        .page
        .as_deref()
        .and_then(|page| page.trim().parse::<i64>().ok())
        .map(|page| page.clamp(1, i64::from(u32::MAX)) as u32);
    let tag_id = match query.tag_id.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(raw.parse::<i64>().map_err(|_| {
            AppError::from_service(
                ServiceError::validation("tag_id", "The tag_id field must be an integer."),
                "failed to list posts",
            )
        })?),
    };

    let service = FeedService::new(state.store.clone(), state.cache_layer(), state.posts_per_page);
    let query = service.build_query(page, query.search.as_deref(), tag_id);
    let page = service
        .list_posts(query)
        .await
        .map_err(|err| AppError::from_service(err, "failed to list posts"))?;

    Ok(Json(page))
}

#[derive(Serialize)]
pub struct PostResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    pub post: PostView,
}

pub async fn get_post(
    ApiPath(id): ApiPath<i64>,
    State(state): State<AppState>,
) -> Result<Json<PostResponse>, AppError> {
    let service = FeedService::new(state.store.clone(), state.cache_layer(), state.posts_per_page);
    let post = service
        .get_post(id)
        .await
        .map_err(|err| AppError::from_service(err, "failed to fetch post"))?;

    Ok(Json(PostResponse {
        message: None,
        post,
    }))
}

pub async fn create_post(
    auth: AuthUser,
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<PostInput>,
) -> Result<(StatusCode, Json<PostResponse>), AppError> {
    let post = post_service(&state)
        .create_post(auth.user_id, payload)
        .await
        .map_err(|err| AppError::from_service(err, "failed to create post"))?;

    Ok((
        StatusCode::CREATED,
        Json(PostResponse {
            message: Some("Post created successfully."),
            post,
        }),
    ))
}

pub async fn edit_post(
    ApiPath(id): ApiPath<i64>,
    auth: AuthUser,
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<PostInput>,
) -> Result<Json<PostResponse>, AppError> {
    let post = post_service(&state)
        .edit_post(id, auth.user_id, payload)
        .await
        .map_err(|err| AppError::from_service(err, "failed to update post"))?;

    Ok(Json(PostResponse {
        message: Some("Post updated successfully."),
        post,
    }))
}

pub async fn delete_post(
    ApiPath(id): ApiPath<i64>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<MessageResponse>, AppError> {
    post_service(&state)
        .delete_post(id, auth.user_id)
        .await
        .map_err(|err| AppError::from_service(err, "failed to delete post"))?;

    Ok(Json(MessageResponse {
        message: "Post deleted successfully.",
    }))
}

#[derive(Deserialize)]
pub struct TagsRequest {
    #[serde(default)]
    pub tags: Option<Value>,
}

pub async fn attach_tags(
    ApiPath(id): ApiPath<i64>,
    auth: AuthUser,
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<TagsRequest>,
) -> Result<Json<PostResponse>, AppError> {
    let post = post_service(&state)
        .attach_tags(id, auth.user_id, payload.tags.as_ref())
        .await
        .map_err(|err| AppError::from_service(err, "failed to attach tags"))?;

    Ok(Json(PostResponse {
        message: Some("Tags attached successfully."),
        post,
    }))
}

pub async fn detach_tags(
    ApiPath(id): ApiPath<i64>,
    auth: AuthUser,
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<TagsRequest>,
) -> Result<Json<PostResponse>, AppError> {
    let post = post_service(&state)
        .detach_tags(id, auth.user_id, payload.tags.as_ref())
        .await
        .map_err(|err| AppError::from_service(err, "failed to detach tags"))?;

    Ok(Json(PostResponse {
        message: Some("Tags detached successfully."),
        post,
    }))
}

#[derive(Serialize)]
pub struct LikeResponse {
    pub message: &'static str,
    pub liked: bool,
    pub likes_count: i64,
}

pub async fn toggle_like(
    ApiPath(id): ApiPath<i64>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<LikeResponse>), AppError> {
    let outcome = engagement_service(&state)
        .toggle_like(id, auth.user_id)
        .await
        .map_err(|err| AppError::from_service(err, "failed to toggle like"))?;

    let message = if outcome.liked {
        "Post liked successfully."
    } else {
        "Post unliked successfully."
    };
    Ok((
        StatusCode::CREATED,
        Json(LikeResponse {
            message,
            liked: outcome.liked,
            likes_count: outcome.likes_count,
        }),
    ))
}

#[derive(Deserialize)]
pub struct CommentRequest {
    pub comment: Option<String>,
}

#[derive(Serialize)]
pub struct CommentResponse {
    pub message: &'static str,
    pub comment: CommentView,
}

pub async fn add_comment(
    ApiPath(id): ApiPath<i64>,
    auth: AuthUser,
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<CommentRequest>,
) -> Result<(StatusCode, Json<CommentResponse>), AppError> {
    let comment = engagement_service(&state)
        .add_comment(id, auth.user_id, payload.comment.as_deref())
        .await
        .map_err(|err| AppError::from_service(err, "failed to add comment"))?;

    Ok((
        StatusCode::CREATED,
        Json(CommentResponse {
            message: "Comment added successfully.",
            comment,
        }),
    ))
}

pub async fn delete_comment(
    ApiPath(id): ApiPath<i64>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<MessageResponse>, AppError> {
    engagement_service(&state)
        .delete_comment(id, auth.user_id)
        .await
        .map_err(|err| AppError::from_service(err, "failed to delete comment"))?;

    Ok(Json(MessageResponse {
        message: "Comment deleted successfully.",
    }))
}

#[derive(Deserialize)]
pub struct TagRequest {
    pub name: Option<String>,
}

#[derive(Serialize)]
pub struct TagResponse {
    pub message: &'static str,
    pub tag: Tag,
}

pub async fn create_tag(
    _auth: AuthUser,
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<TagRequest>,
) -> Result<(StatusCode, Json<TagResponse>), AppError> {
    let tag = TagService::new(state.store.clone(), state.cache_layer())
        .create_tag(payload.name.as_deref())
        .await
        .map_err(|err| AppError::from_service(err, "failed to create tag"))?;

    Ok((
        StatusCode::CREATED,
        Json(TagResponse {
            message: "Tag created successfully.",
            tag,
        }),
    ))
}

pub async fn delete_tag(
    ApiPath(id): ApiPath<i64>,
    _auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<MessageResponse>, AppError> {
    TagService::new(state.store.clone(), state.cache_layer())
        .delete_tag(id)
        .await
        .map_err(|err| AppError::from_service(err, "failed to delete tag"))?;

    Ok(Json(MessageResponse {
        message: "Tag deleted successfully.",
    }))
}
