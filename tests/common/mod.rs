#![allow(dead_code)]

use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tower::ServiceExt;

use quillpost::config::AppConfig;
use quillpost::infra::broadcast::{MemoryBroadcaster, RedisBroadcaster};
use quillpost::infra::cache::{Cache, MemoryCache, RedisCache};
use quillpost::infra::db::Db;
use quillpost::infra::store::{MemoryStore, PgStore};
use quillpost::AppState;

// "0123456789abcdef0123456789abcdef"
const TEST_PASETO_ACCESS_KEY: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=";
pub const DEFAULT_PASSWORD: &str = "testpassword123";

pub struct TestApp {
    router: Router,
    pub state: AppState,
}

pub struct TestResponse {
    pub status: StatusCode,
    body_bytes: bytes::Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body_bytes).unwrap_or(Value::Null)
    }

    pub fn error_message(&self) -> String {
        self.json()["error"].as_str().unwrap_or("").to_string()
    }

    pub fn field_errors(&self, field: &str) -> Vec<String> {
        self.json()["fields"][field]
            .as_array()
            .map(|messages| {
                messages
                    .iter()
                    .filter_map(|message| message.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub struct TestUser {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub access_token: String,
}

static SEQ: AtomicUsize = AtomicUsize::new(0);

/// Process-unique suffix for names that hit unique constraints.
pub fn unique(prefix: &str) -> String {
    format!("{}{}", prefix, SEQ.fetch_add(1, Ordering::SeqCst))
}

// ---------------------------------------------------------------------------
// In-memory app: fresh backends per call, tests never share state
// ---------------------------------------------------------------------------

pub struct MemoryApp {
    app: TestApp,
    pub store: Arc<MemoryStore>,
    pub cache: Arc<MemoryCache>,
    pub broadcaster: Arc<MemoryBroadcaster>,
}

impl Deref for MemoryApp {
    type Target = TestApp;

    fn deref(&self) -> &TestApp {
        &self.app
    }
}

pub fn app() -> MemoryApp {
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(MemoryCache::new());
    let broadcaster = Arc::new(MemoryBroadcaster::default());

    let state = AppState {
        store: store.clone(),
        cache: cache.clone(),
        broadcaster: broadcaster.clone(),
        paseto_access_key: *b"0123456789abcdef0123456789abcdef",
        access_ttl_minutes: 60,
        posts_per_page: 10,
        cache_ttl_seconds: 60,
    };

    MemoryApp {
        app: TestApp::new(state),
        store,
        cache,
        broadcaster,
    }
}

// ---------------------------------------------------------------------------
// Postgres + Redis app: only when TEST_DATABASE_URL and TEST_REDIS_URL are set
// ---------------------------------------------------------------------------

pub struct BackendApp {
    app: TestApp,
    pub db: Db,
    pub cache: Arc<RedisCache>,
    pub redis: redis::Client,
}

impl Deref for BackendApp {
    type Target = TestApp;

    fn deref(&self) -> &TestApp {
        &self.app
    }
}

impl BackendApp {
    pub async fn count(&self, sql: &str, id: i64) -> i64 {
        sqlx::query_scalar(sql)
            .bind(id)
            .fetch_one(self.db.pool())
            .await
            .unwrap_or_else(|e| panic!("{} failed: {}", sql, e))
    }

    pub async fn subscribe(&self, channel: &str) -> redis::aio::PubSub {
        let mut pubsub = self
            .redis
            .get_async_pubsub()
            .await
            .expect("cannot open Redis pubsub");
        pubsub.subscribe(channel).await.expect("SUBSCRIBE failed");
        pubsub
    }
}

static BACKEND_CONFIG: OnceCell<Option<AppConfig>> = OnceCell::const_new();

/// Builds an app on the production backends, or `None` when they are not
/// configured. Schema setup and cleanup run once per test binary.
pub async fn backend_app() -> Option<BackendApp> {
    let config = BACKEND_CONFIG
        .get_or_init(|| async { prepare_backends().await })
        .await
        .as_ref()?;

    // Fresh pool per test: each #[tokio::test] runs its own runtime.
    let db = Db::connect(config).await.expect("cannot connect to test database");
    let cache = Arc::new(
        RedisCache::connect(&config.redis_url)
            .await
            .expect("cannot connect to test Redis"),
    );
    let redis = cache.client().clone();

    let state = AppState {
        store: Arc::new(PgStore::new(db.clone())),
        cache: cache.clone(),
        broadcaster: Arc::new(RedisBroadcaster::new(redis.clone())),
        paseto_access_key: config.paseto_access_key,
        access_ttl_minutes: config.access_ttl_minutes,
        posts_per_page: config.posts_per_page,
        cache_ttl_seconds: config.cache_ttl_seconds,
    };

    Some(BackendApp {
        app: TestApp::new(state),
        db,
        cache,
        redis,
    })
}

async fn prepare_backends() -> Option<AppConfig> {
    let (Ok(database_url), Ok(redis_url)) = (
        std::env::var("TEST_DATABASE_URL"),
        std::env::var("TEST_REDIS_URL"),
    ) else {
        eprintln!("TEST_DATABASE_URL or TEST_REDIS_URL not set, skipping backend tests");
        return None;
    };

    std::env::set_var("DATABASE_URL", &database_url);
    std::env::set_var("REDIS_URL", &redis_url);
    std::env::set_var("PASETO_ACCESS_KEY", TEST_PASETO_ACCESS_KEY);
    std::env::set_var("DB_MAX_CONNECTIONS", "5");
    std::env::set_var("DB_CONNECT_TIMEOUT_SECONDS", "30");
    let config = AppConfig::from_env().expect("failed to build AppConfig");

    // ---- Schema and clean tables ----
    let db = Db::connect(&config).await.expect("cannot connect to test database");
    db.migrate().await.expect("migrations failed");
    sqlx::query(
        "TRUNCATE users, sessions, posts, tags, post_tag, comments, likes RESTART IDENTITY CASCADE",
    )
    .execute(db.pool())
    .await
    .expect("failed to truncate tables");
    db.pool().close().await;

    // ---- Empty cache ----
    RedisCache::connect(&config.redis_url)
        .await
        .expect("cannot connect to test Redis")
        .flush()
        .await
        .expect("FLUSHDB failed");

    Some(config)
}

// ---------------------------------------------------------------------------
// Request helpers, shared by both apps
// ---------------------------------------------------------------------------

impl TestApp {
    fn new(state: AppState) -> Self {
        Self {
            router: quillpost::http::router(state.clone()),
            state,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
        TestResponse { status, body_bytes }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> TestResponse {
        self.request(Method::GET, uri, None, token).await
    }

    pub async fn post_json(&self, uri: &str, body: Value, token: Option<&str>) -> TestResponse {
        self.request(Method::POST, uri, Some(body), token).await
    }

    /// Posts `body` verbatim as `application/json`.
    pub async fn post_raw(&self, uri: &str, body: &str, token: &str) -> TestResponse {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    pub async fn delete(&self, uri: &str, token: Option<&str>) -> TestResponse {
        self.request(Method::DELETE, uri, None, token).await
    }

    pub async fn create_user(&self, prefix: &str) -> TestUser {
        let name = unique(&format!("{}_", prefix));
        let email = format!("{}@example.com", name);

        let resp = self
            .post_json(
                "/api/register",
                json!({
                    "name": name,
                    "email": email,
                    "password": DEFAULT_PASSWORD,
                    "password_confirmation": DEFAULT_PASSWORD,
                }),
                None,
            )
            .await;
        assert_eq!(resp.status, StatusCode::CREATED, "register failed: {:?}", resp.json());
        let body = resp.json();

        TestUser {
            id: body["user"]["id"].as_i64().unwrap(),
            name,
            email,
            access_token: body["access_token"].as_str().unwrap().to_string(),
        }
    }

    pub async fn create_tag(&self, user: &TestUser, name: &str) -> i64 {
        let resp = self
            .post_json("/api/tags/add", json!({ "name": name }), Some(&user.access_token))
            .await;
        assert_eq!(resp.status, StatusCode::CREATED, "tag failed: {:?}", resp.json());
        resp.json()["tag"]["id"].as_i64().unwrap()
    }

    pub async fn create_post(&self, user: &TestUser, title: &str, tags: Option<Value>) -> Value {
        let mut body = json!({ "title": title, "content": format!("{} body", title) });
        if let Some(tags) = tags {
            body["tags"] = tags;
        }
        let resp = self
            .post_json("/api/posts/add", body, Some(&user.access_token))
            .await;
        assert_eq!(resp.status, StatusCode::CREATED, "post failed: {:?}", resp.json());
        resp.json()["post"].clone()
    }

    pub async fn show_post(&self, post_id: i64) -> TestResponse {
        self.get(&format!("/api/posts/show/{}", post_id), None).await
    }
}

pub fn tag_ids(post: &Value) -> Vec<i64> {
    post["tags"]
        .as_array()
        .map(|tags| tags.iter().filter_map(|tag| tag["id"].as_i64()).collect())
        .unwrap_or_default()
}
