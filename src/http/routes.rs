use axum::{routing::delete, routing::get, routing::post, Router};

use crate::http::handlers;
use crate::AppState;

pub fn health() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health))
}

pub fn auth() -> Router<AppState> {
    Router::new()
        .route("/register", post(handlers::register))
        .route("/login", post(handlers::login))
        .route("/logout", post(handlers::logout))
        .route("/user", get(handlers::current_user))
}

pub fn posts() -> Router<AppState> {
    Router::new()
        .route("/posts/all", get(handlers::list_posts))
        .route("/posts/show/:id", get(handlers::get_post))
        .route("/posts/add", post(handlers::create_post))
        .route("/posts/edit/:id", post(handlers::edit_post))
        .route("/posts/delete/:id", delete(handlers::delete_post))
        .route("/posts/:id/like", post(handlers::toggle_like))
        .route("/posts/:id/tags/attach", post(handlers::attach_tags))
        .route("/posts/:id/tags/detach", post(handlers::detach_tags))
}

pub fn comments() -> Router<AppState> {
    Router::new()
        .route("/comments/add/:id", post(handlers::add_comment))
        .route("/comments/delete/:id", delete(handlers::delete_comment))
}

pub fn tags() -> Router<AppState> {
    Router::new()
        .route("/tags/add", post(handlers::create_tag))
        .route("/tags/delete/:id", delete(handlers::delete_tag))
}
