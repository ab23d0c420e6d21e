use std::collections::HashMap;

use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use oci_spec::distribution::TagListBuilder;

use stevedore_core::registry::{RepositoryStore, TagStore};

use super::errors::{Error, Result};
use super::pagination_link;

/// GET of `/v2/<name>/tags/list`, with `n`/`last` pagination.
pub(crate) async fn get_tags<R: RepositoryStore>(
    repository: &R,
    params: &HashMap<String, String>,
) -> Result<Response> {
    let n = params
        .get("n")
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<usize>().ok());
    let last = params.get("last").filter(|s| !s.is_empty()).cloned();

    let tags = repository
        .get_tag_store()
        .list(n, last.as_deref())
        .await?;

    let mut headers = HeaderMap::new();
    let base = format!("/v2/{}/tags/list", repository.name());
    if let Some(link) = pagination_link(&base, n, &tags) {
        headers.insert(header::LINK, HeaderValue::from_str(&link)?);
    }

    let body = TagListBuilder::default()
        .name(repository.name().as_ref())
        .tags(tags)
        .build()
        .map_err(|e| Error::Internal(format!("building tag list: {e}")))?;

    Ok((StatusCode::OK, headers, Json(body)).into_response())
}
