//! Reference lists derived from a default search.
//!
//! The upstream has no list endpoints for organizations or set-aside types,
//! so both are collected from one page of recent opportunities. The page goes
//! through the proxy cache like any other query.

use std::collections::{BTreeMap, BTreeSet};

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use bidscout_core::{Opportunity, SearchParams, SetAside};
use serde::{Deserialize, Serialize};

use crate::constants::REFERENCE_LIST_PAGE_SIZE;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse<T> {
    pub success: bool,
    pub data: Vec<T>,
    pub from_cache: bool,
}

/// Distinct department names, sorted.
pub fn collect_organizations(opportunities: &[Opportunity]) -> Vec<String> {
    opportunities
        .iter()
        .filter_map(|o| o.agency.department.as_deref())
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Distinct set-asides by code, sorted by code. The first description seen wins.
pub fn collect_set_asides(opportunities: &[Opportunity]) -> Vec<SetAside> {
    let mut by_code: BTreeMap<String, SetAside> = BTreeMap::new();
    for set_aside in opportunities.iter().filter_map(|o| o.set_aside.as_ref()) {
        by_code
            .entry(set_aside.code.clone())
            .or_insert_with(|| set_aside.clone());
    }
    by_code.into_values().collect()
}

fn reference_params(state: &AppState) -> SearchParams {
    SearchParams::for_range(state.default_range, state.today()).with_limit(REFERENCE_LIST_PAGE_SIZE)
}

/// GET /api/v1/organizations
pub async fn list_organizations(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let response = state.proxy.query(&reference_params(&state)).await?;
    Ok(Json(ListResponse {
        success: true,
        data: collect_organizations(&response.data),
        from_cache: response.from_cache,
    }))
}

/// GET /api/v1/set-asides
pub async fn list_set_asides(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let response = state.proxy.query(&reference_params(&state)).await?;
    Ok(Json(ListResponse {
        success: true,
        data: collect_set_asides(&response.data),
        from_cache: response.from_cache,
    }))
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/organizations", get(list_organizations))
        .route("/set-asides", get(list_set_asides))
}
