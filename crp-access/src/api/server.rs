//! Router setup
//!
//! `/health` is public. Every `/api/*` route sits behind [`AuthLayer`].

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::auth_middleware::AuthLayer;
use super::handlers;
use crate::AccessServices;

/// Shared context handed to every handler
#[derive(Clone)]
pub struct AppContext {
    pub services: Arc<AccessServices>,
    /// 0 disables request signing
    pub shared_secret: i64,
}

pub fn create_router(ctx: AppContext) -> Router {
    let shared_secret = ctx.shared_secret;

    Router::new()
        .route("/health", get(handlers::health))
        // Programs
        .route("/api/programs", post(handlers::create_program))
        .route("/api/programs/:id/tier", post(handlers::set_program_tier))
        // Clients
        .route("/api/clients/visible", post(handlers::visible_clients))
        .route("/api/clients/detail", post(handlers::client_detail))
        .route("/api/clients/search", post(handlers::search_clients))
        // Matching and merge
        .route("/api/matching/candidates", post(handlers::match_candidates))
        .route("/api/merge/proposals", post(handlers::merge_proposals))
        // Admin
        .route("/api/admin/list", post(handlers::admin_list))
        .route(
            "/api/admin/programs/:id/headcount",
            post(handlers::program_headcount),
        )
        // Audit
        .route("/api/audit/history", post(handlers::access_history))
        .with_state(ctx)
        .layer(AuthLayer { shared_secret })
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
