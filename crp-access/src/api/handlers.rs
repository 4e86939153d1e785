//! HTTP request handlers
//!
//! Every client-facing handler takes the principal from the request body
//! and delegates to one access-boundary component. Responses carry only
//! what that component returned.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use crp_common::{ClientId, ProgramId, UserId};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::ApiError;
use super::server::AppContext;
use crate::admin::{AdminListing, ProgramHeadcount};
use crate::audit::AccessEvent;
use crate::directory::ClientView;
use crate::matching::{MatchQuery, MatchReport};
use crate::merge::MergeProposal;
use crate::principal::Principal;
use crate::registry::{ComplianceOverride, Program, Tier, TierChange};

type ApiResult<T> = Result<Json<T>, ApiError>;

// ============================================================================
// Request / response bodies
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub git_hash: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateProgramRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct SetTierRequest {
    pub tier: Tier,
    pub confirmed_by: UserId,
    #[serde(default)]
    pub compliance_override: Option<ComplianceOverride>,
}

#[derive(Debug, Deserialize)]
pub struct VisibleClientsRequest {
    pub principal: Principal,
    pub client_ids: Vec<ClientId>,
}

#[derive(Debug, Serialize)]
pub struct VisibleClientsResponse {
    pub client_ids: Vec<ClientId>,
}

#[derive(Debug, Deserialize)]
pub struct ClientRequest {
    pub principal: Principal,
    pub client_id: ClientId,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub principal: Principal,
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct ClientListResponse {
    pub clients: Vec<ClientView>,
}

#[derive(Debug, Deserialize)]
pub struct MatchRequest {
    pub principal: Principal,
    #[serde(flatten)]
    pub query: MatchQuery,
}

#[derive(Debug, Serialize)]
pub struct MergeResponse {
    pub proposals: Vec<MergeProposal>,
}

#[derive(Debug, Deserialize)]
pub struct AdminListRequest {
    pub principal: Principal,
    pub listing: AdminListing,
}

#[derive(Debug, Deserialize)]
pub struct PrincipalRequest {
    pub principal: Principal,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub events: Vec<AccessEvent>,
}

// ============================================================================
// Health
// ============================================================================

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "crp-access".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
    })
}

// ============================================================================
// Programs
// ============================================================================

/// POST /api/programs
pub async fn create_program(
    State(ctx): State<AppContext>,
    Json(req): Json<CreateProgramRequest>,
) -> Result<(StatusCode, Json<Program>), ApiError> {
    let program = ctx.services.registry.create_program(&req.name).await?;
    Ok((StatusCode::CREATED, Json(program)))
}

/// POST /api/programs/:id/tier
pub async fn set_program_tier(
    State(ctx): State<AppContext>,
    Path(program_id): Path<ProgramId>,
    Json(req): Json<SetTierRequest>,
) -> ApiResult<TierChange> {
    let change = ctx
        .services
        .registry
        .set_tier(
            program_id,
            req.tier,
            req.confirmed_by,
            req.compliance_override,
        )
        .await?;
    info!("Tier request for program {}: {:?}", program_id, change);
    Ok(Json(change))
}

// ============================================================================
// Clients
// ============================================================================

/// POST /api/clients/visible
///
/// Opaque ids of the permitted subset.
pub async fn visible_clients(
    State(ctx): State<AppContext>,
    Json(req): Json<VisibleClientsRequest>,
) -> ApiResult<VisibleClientsResponse> {
    let client_ids = ctx
        .services
        .directory
        .visible_ids(&req.principal, &req.client_ids)
        .await?;
    Ok(Json(VisibleClientsResponse { client_ids }))
}

/// POST /api/clients/detail
pub async fn client_detail(
    State(ctx): State<AppContext>,
    Json(req): Json<ClientRequest>,
) -> ApiResult<ClientView> {
    ctx.services
        .directory
        .detail(&req.principal, req.client_id)
        .await?
        .map(Json)
        .ok_or(ApiError::ClientNotFound)
}

/// POST /api/clients/search
pub async fn search_clients(
    State(ctx): State<AppContext>,
    Json(req): Json<SearchRequest>,
) -> ApiResult<ClientListResponse> {
    let clients = ctx
        .services
        .directory
        .search_by_name(&req.principal, &req.query)
        .await?;
    Ok(Json(ClientListResponse { clients }))
}

// ============================================================================
// Matching and merge
// ============================================================================

/// POST /api/matching/candidates
pub async fn match_candidates(
    State(ctx): State<AppContext>,
    Json(req): Json<MatchRequest>,
) -> ApiResult<MatchReport> {
    let report = ctx
        .services
        .matching
        .find_candidates(&req.principal, &req.query)
        .await?;
    Ok(Json(report))
}

/// POST /api/merge/proposals
pub async fn merge_proposals(
    State(ctx): State<AppContext>,
    Json(req): Json<ClientRequest>,
) -> ApiResult<MergeResponse> {
    ctx.services
        .merge_proposals(&req.principal, req.client_id)
        .await?
        .map(|proposals| Json(MergeResponse { proposals }))
        .ok_or(ApiError::ClientNotFound)
}

// ============================================================================
// Admin
// ============================================================================

/// POST /api/admin/list
pub async fn admin_list(
    State(ctx): State<AppContext>,
    Json(req): Json<AdminListRequest>,
) -> ApiResult<ClientListResponse> {
    let clients = ctx
        .services
        .admin
        .list(&req.principal, &req.listing)
        .await?;
    Ok(Json(ClientListResponse { clients }))
}

/// POST /api/admin/programs/:id/headcount
pub async fn program_headcount(
    State(ctx): State<AppContext>,
    Path(program_id): Path<ProgramId>,
    Json(req): Json<PrincipalRequest>,
) -> ApiResult<ProgramHeadcount> {
    let headcount = ctx
        .services
        .admin
        .headcount(&req.principal, program_id)
        .await?;
    Ok(Json(headcount))
}

// ============================================================================
// Audit
// ============================================================================

/// POST /api/audit/history
///
/// Denied and unknown clients are both "client not found".
pub async fn access_history(
    State(ctx): State<AppContext>,
    Json(req): Json<ClientRequest>,
) -> ApiResult<HistoryResponse> {
    ctx.services
        .auditor
        .query_access_history(&req.principal, req.client_id)
        .await?
        .map(|events| Json(HistoryResponse { events }))
        .ok_or(ApiError::ClientNotFound)
}
