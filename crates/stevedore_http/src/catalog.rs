use axum::extract::{Query, State};
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use stevedore_core::registry::RepositoryStoreManager;

use super::access::{RequestInfo, ResourceAction};
use super::errors::Result;
use super::{empty_string_as_none, pagination_link, Distribution};

#[derive(Debug, Deserialize)]
pub(crate) struct CatalogParams {
    #[serde(default, deserialize_with = "empty_string_as_none")]
    n: Option<usize>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    last: Option<String>,
}

#[derive(Serialize)]
struct CatalogBody {
    repositories: Vec<String>,
}

/// GET of `/v2/_catalog`: every repository the registry holds, sorted,
/// with `n`/`last` pagination.
pub(crate) async fn get_catalog<M: RepositoryStoreManager>(
    State(distribution): State<Distribution<M>>,
    Query(params): Query<CatalogParams>,
) -> Result<Response> {
    let info = RequestInfo {
        method: Method::GET,
        path: "/v2/_catalog".to_string(),
    };
    let resources = [ResourceAction {
        resource: "registry",
        name: "catalog".to_string(),
        action: "*",
    }];
    if let Some(response) = distribution.check_access(&info, &resources).await {
        return Ok(response);
    }

    let repositories = distribution
        .manager
        .list(params.n, params.last.as_deref())
        .await?;

    let mut headers = HeaderMap::new();
    if let Some(link) = pagination_link("/v2/_catalog", params.n, &repositories) {
        headers.insert(header::LINK, HeaderValue::from_str(&link)?);
    }

    Ok((
        StatusCode::OK,
        headers,
        Json(CatalogBody { repositories }),
    )
        .into_response())
}
