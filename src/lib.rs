pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod infra;

use std::sync::Arc;
use std::time::Duration;

use crate::app::auth::AuthService;
use crate::infra::{broadcast::Broadcaster, cache::Cache, cache::CacheLayer, store::EntityStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EntityStore>,
    pub cache: Arc<dyn Cache>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub paseto_access_key: [u8; 32],
    pub access_ttl_minutes: u64,
    pub posts_per_page: u32,
    pub cache_ttl_seconds: u64,
}

impl AppState {
    pub fn cache_layer(&self) -> CacheLayer {
        CacheLayer::new(
            self.cache.clone(),
            Duration::from_secs(self.cache_ttl_seconds),
        )
    }

    pub fn auth_service(&self) -> AuthService {
        AuthService::new(
            self.store.clone(),
            self.paseto_access_key,
            self.access_ttl_minutes,
        )
    }
}
