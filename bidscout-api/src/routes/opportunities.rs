//! Opportunity REST API Routes
//!
//! Query parameters are accepted under their upstream names or the short
//! aliases the frontend uses (`q`, `dateRange`, `page`). Validation runs
//! before the cache or upstream are touched.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use bidscout_core::{summarize_by_notice_type, DateRangeToken, NoticeTypeCount, SearchParams};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Notice-type breakdown of one result page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryResponse {
    pub success: bool,
    pub data: Vec<NoticeTypeCount>,
    pub total: u64,
    pub from_cache: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpportunityResponse {
    pub success: bool,
    pub data: bidscout_core::Opportunity,
}

fn params_from_query(state: &AppState, pairs: Vec<(String, String)>) -> ApiResult<SearchParams> {
    SearchParams::from_pairs(pairs, state.default_range, state.today()).map_err(ApiError::from)
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /api/v1/opportunities
pub async fn search_opportunities(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<impl IntoResponse> {
    let params = params_from_query(&state, pairs)?;
    let response = state.proxy.query(&params).await?;
    Ok(Json(response))
}

/// GET /api/v1/opportunities/summary
pub async fn summarize_opportunities(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<impl IntoResponse> {
    let params = params_from_query(&state, pairs)?;
    let response = state.proxy.query(&params).await?;
    Ok(Json(SummaryResponse {
        success: true,
        data: summarize_by_notice_type(&response.data),
        total: response.total,
        from_cache: response.from_cache,
    }))
}

/// GET /api/v1/opportunities/:notice_id
///
/// Searches the last year, the widest window the upstream allows.
pub async fn get_opportunity(
    State(state): State<AppState>,
    Path(notice_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let notice_id = notice_id.trim();
    if notice_id.is_empty() {
        return Err(ApiError::missing_field("notice_id"));
    }
    let params = SearchParams::for_range(DateRangeToken::OneYear, state.today()).with_notice_id(notice_id);
    match state.proxy.opportunity(&params).await? {
        Some(opportunity) => Ok(Json(OpportunityResponse {
            success: true,
            data: opportunity,
        })),
        None => Err(ApiError::opportunity_not_found(notice_id)),
    }
}

// ============================================================================
// ROUTER SETUP
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(search_opportunities))
        .route("/summary", get(summarize_opportunities))
        .route("/:notice_id", get(get_opportunity))
}
