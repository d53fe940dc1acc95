//! Post CRUD, tag association and listing tests.

mod common;

use axum::http::StatusCode;
use common::{app, tag_ids};
use serde_json::json;

// ===========================================================================
// Creation
// ===========================================================================

#[tokio::test]
async fn create_then_show_returns_the_same_post() {
    let app = app();
    let user = app.create_user("post_create").await;

    let post = app.create_post(&user, "T", None).await;
    assert_eq!(post["likes_count"], 0);
    assert_eq!(post["tags"], json!([]));
    assert_eq!(post["author"]["id"].as_i64().unwrap(), user.id);

    let resp = app.show_post(post["id"].as_i64().unwrap()).await;
    assert_eq!(resp.status, StatusCode::OK);
    let shown = &resp.json()["post"];
    assert_eq!(shown["title"], "T");
    assert_eq!(shown["content"], "T body");
}

#[tokio::test]
async fn create_post_validates_lengths() {
    let app = app();
    let user = app.create_user("post_invalid").await;

    let resp = app
        .post_json(
            "/api/posts/add",
            json!({ "title": "a".repeat(256), "content": "" }),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        resp.field_errors("title"),
        vec!["The title field must not be greater than 255 characters.".to_string()]
    );
    assert_eq!(
        resp.field_errors("content"),
        vec!["The content field is required.".to_string()]
    );
}

#[tokio::test]
async fn create_post_accepts_comma_separated_tags() {
    let app = app();
    let user = app.create_user("post_csv").await;
    let a = app.create_tag(&user, "alpha").await;
    let b = app.create_tag(&user, "beta").await;

    let post = app
        .create_post(&user, "T", Some(json!(format!("{},{}", a, b))))
        .await;
    assert_eq!(tag_ids(&post), vec![a, b]);
}

#[tokio::test]
async fn create_post_rejects_unknown_tags() {
    let app = app();
    let user = app.create_user("post_badtag").await;

    let resp = app
        .post_json(
            "/api/posts/add",
            json!({ "title": "T", "content": "C", "tags": [424242] }),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(!resp.field_errors("tags.0").is_empty());
}

// ===========================================================================
// Editing and deletion
// ===========================================================================

#[tokio::test]
async fn edit_by_non_owner_is_forbidden() {
    let app = app();
    let owner = app.create_user("post_owner").await;
    let other = app.create_user("post_other").await;
    let post = app.create_post(&owner, "T", None).await;
    let id = post["id"].as_i64().unwrap();

    let resp = app
        .post_json(
            &format!("/api/posts/edit/{}", id),
            json!({ "title": "Hijacked", "content": "C" }),
            Some(&other.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.error_message(), "Unauthorized.");

    let shown = app.show_post(id).await.json();
    assert_eq!(shown["post"]["title"], "T");
}

#[tokio::test]
async fn edit_missing_post_is_not_found() {
    let app = app();
    let user = app.create_user("post_missing").await;

    let resp = app
        .post_json(
            "/api/posts/edit/999999",
            json!({ "title": "T", "content": "C" }),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert_eq!(resp.error_message(), "Post not found.");
}

#[tokio::test]
async fn edit_with_append_never_removes_tags() {
    let app = app();
    let user = app.create_user("post_append").await;
    let a = app.create_tag(&user, "alpha").await;
    let b = app.create_tag(&user, "beta").await;
    let post = app.create_post(&user, "T", Some(json!([a]))).await;
    let id = post["id"].as_i64().unwrap();

    let resp = app
        .post_json(
            &format!("/api/posts/edit/{}", id),
            json!({ "title": "T2", "content": "C2", "tags": [b], "append_tags": "true" }),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(tag_ids(&resp.json()["post"]), vec![a, b]);

    let resp = app
        .post_json(
            &format!("/api/posts/edit/{}", id),
            json!({ "title": "T3", "content": "C3", "tags": [b] }),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(tag_ids(&resp.json()["post"]), vec![b]);
}

#[tokio::test]
async fn delete_cascades_comments_and_likes() {
    let app = app();
    let owner = app.create_user("post_cascade").await;
    let reader = app.create_user("post_reader").await;
    let tag = app.create_tag(&owner, "gone").await;
    let post = app.create_post(&owner, "T", Some(json!([tag]))).await;
    let id = post["id"].as_i64().unwrap();

    app.post_json(&format!("/api/posts/{}/like", id), json!({}), Some(&reader.access_token))
        .await;
    app.post_json(
        &format!("/api/comments/add/{}", id),
        json!({ "comment": "hi" }),
        Some(&reader.access_token),
    )
    .await;

    let other = app
        .delete(&format!("/api/posts/delete/{}", id), Some(&reader.access_token))
        .await;
    assert_eq!(other.status, StatusCode::FORBIDDEN);

    let resp = app
        .delete(&format!("/api/posts/delete/{}", id), Some(&owner.access_token))
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["message"], "Post deleted successfully.");

    assert_eq!(app.show_post(id).await.status, StatusCode::NOT_FOUND);
    assert_eq!(app.store.comment_count(id).await, 0);
    assert_eq!(app.store.like_rows(id, reader.id).await, 0);
}

// ===========================================================================
// Tag attach / detach
// ===========================================================================

#[tokio::test]
async fn attach_then_detach_restores_tags() {
    let app = app();
    let user = app.create_user("post_attach").await;
    let a = app.create_tag(&user, "alpha").await;
    let b = app.create_tag(&user, "beta").await;
    let post = app.create_post(&user, "T", Some(json!([a]))).await;
    let id = post["id"].as_i64().unwrap();

    let attached = app
        .post_json(
            &format!("/api/posts/{}/tags/attach", id),
            json!({ "tags": [a, b] }),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(attached.status, StatusCode::OK);
    assert_eq!(tag_ids(&attached.json()["post"]), vec![a, b]);

    let detached = app
        .post_json(
            &format!("/api/posts/{}/tags/detach", id),
            json!({ "tags": [b] }),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(detached.status, StatusCode::OK);
    assert_eq!(tag_ids(&detached.json()["post"]), vec![a]);
}

#[tokio::test]
async fn attach_without_tags_is_rejected() {
    let app = app();
    let user = app.create_user("post_attach_empty").await;
    let post = app.create_post(&user, "T", None).await;

    let resp = app
        .post_json(
            &format!("/api/posts/{}/tags/attach", post["id"]),
            json!({}),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(resp.error_message(), "The tags field is required.");
}

// ===========================================================================
// Listing
// ===========================================================================

#[tokio::test]
async fn listing_is_newest_first_and_paginated() {
    let app = app();
    let user = app.create_user("post_list").await;
    for i in 0..12 {
        app.create_post(&user, &format!("post {}", i), None).await;
    }

    let first = app.get("/api/posts/all", None).await.json();
    assert_eq!(first["total"], 12);
    assert_eq!(first["last_page"], 2);
    assert_eq!(first["posts"].as_array().unwrap().len(), 10);
    assert_eq!(first["posts"][0]["title"], "post 11");

    let second = app.get("/api/posts/all?page=2", None).await.json();
    assert_eq!(second["posts"].as_array().unwrap().len(), 2);
    assert_eq!(second["posts"][1]["title"], "post 0");

    let clamped = app.get("/api/posts/all?page=0", None).await.json();
    assert_eq!(clamped["page"], 1);
}

#[tokio::test]
async fn listing_filters_by_search_and_tag() {
    let app = app();
    let user = app.create_user("post_filter").await;
    let tag = app.create_tag(&user, "rust").await;
    app.create_post(&user, "Learning Rust", Some(json!([tag]))).await;
    app.create_post(&user, "Gardening", None).await;
    app.create_post(&user, "100% effort", None).await;

    let search = app.get("/api/posts/all?search=rUsT", None).await.json();
    assert_eq!(search["total"], 1);
    assert_eq!(search["posts"][0]["title"], "Learning Rust");

    let literal = app.get("/api/posts/all?search=%25", None).await.json();
    assert_eq!(literal["total"], 1);
    assert_eq!(literal["posts"][0]["title"], "100% effort");

    let by_tag = app.get(&format!("/api/posts/all?tag_id={}", tag), None).await.json();
    assert_eq!(by_tag["total"], 1);

    let bad = app.get("/api/posts/all?tag_id=abc", None).await;
    assert_eq!(bad.status, StatusCode::UNPROCESSABLE_ENTITY);
}

// ===========================================================================
// Malformed requests
// ===========================================================================

#[tokio::test]
async fn malformed_bodies_get_json_errors() {
    let app = app();
    let user = app.create_user("malformed").await;

    let syntax = app
        .post_raw("/api/posts/add", "{\"title\": ", &user.access_token)
        .await;
    assert_eq!(syntax.status, StatusCode::BAD_REQUEST);
    assert!(!syntax.error_message().is_empty());

    let wrong_type = app
        .post_json(
            "/api/posts/add",
            json!({ "title": 5, "content": "C" }),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(wrong_type.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(!wrong_type.error_message().is_empty());
}

#[tokio::test]
async fn non_numeric_ids_get_json_errors() {
    let app = app();
    let resp = app.get("/api/posts/show/abc", None).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert!(!resp.error_message().is_empty());
}
