//! Formflow REST Surface
//!
//! Optional async path parallel to the page flow: `POST /forms/:slug/validate`
//! and `POST /forms/:slug/send`, both guarded by the platform CSRF token
//! issued per session. A deployment fronted by real browser sessions would
//! back these with its own `SessionStore`; the bundled registry keeps
//! per-client in-memory sessions keyed by the `X-Session-Id` header.

pub mod models;
pub mod routes;

use axum::routing::{get, post};
use axum::Router;
use dashmap::DashMap;
use formflow_core::{FormFlowController, MemorySessionStore, PageRole, SessionStore};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use models::*;

/// Shared API state
pub struct ApiState {
    pub controller: Arc<FormFlowController>,
    /// Per-client session stores keyed by session id
    sessions: DashMap<String, Arc<MemorySessionStore>>,
    /// `{slug}:{role}` → public URL, for redirect_url in responses
    page_urls: DashMap<String, String>,
}

impl ApiState {
    pub fn new(controller: Arc<FormFlowController>) -> Self {
        Self {
            controller,
            sessions: DashMap::new(),
            page_urls: DashMap::new(),
        }
    }

    /// Register the public URL of one wizard page
    pub fn bind_page_url(&self, slug: &str, role: PageRole, url: &str) {
        self.page_urls
            .insert(page_url_key(slug, role), url.to_string());
    }

    pub(crate) fn url_for(&self, slug: &str, role: PageRole) -> Option<String> {
        self.page_urls.get(&page_url_key(slug, role)).map(|u| u.clone())
    }

    /// Open a fresh session and return its store
    pub(crate) fn open_session(&self) -> Arc<MemorySessionStore> {
        let store = Arc::new(MemorySessionStore::new());
        self.sessions.insert(store.id(), store.clone());
        store
    }

    /// Look up an existing session by client-supplied id
    pub(crate) fn session(&self, id: &str) -> Option<Arc<MemorySessionStore>> {
        self.sessions.get(id).map(|s| s.clone())
    }
}

fn page_url_key(slug: &str, role: PageRole) -> String {
    let step = match role {
        PageRole::Entry => "entry",
        PageRole::Confirm => "confirm",
        PageRole::Complete => "complete",
    };
    format!("{slug}:{step}")
}

/// Build the API router
pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/session", post(routes::session::create_session))
        .nest("/forms", routes::forms::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Install the tracing subscriber for binaries embedding this router
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}
