//! # Stevedore HTTP
//!
//! `stevedore_http` implements the registry protocol of the [OCI
//! Distribution Spec](https://github.com/opencontainers/distribution-spec)
//! and the docker registry v2 API it grew out of, generic over the traits
//! in [`stevedore_core`] and therefore over storage backends.
//!
//! The one structural oddity of the protocol is that repository names may
//! contain `/`: `/v2/foo/bar/manifests/latest` names the repository
//! `foo/bar`. Routing therefore hangs a single wildcard under `/v2/` and
//! parses the path from the right, so that even a repository named
//! `foo/manifests` stays unambiguous.
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use hyper::body::Body;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::{self, TraceLayer};

mod errors;
pub use errors::{Error, Result};

pub mod access;
pub(crate) mod blobs;
mod catalog;
pub(crate) mod headers;
mod manifests;
mod tags;
mod token;

pub use access::{AccessController, AllowAll, Decision, Event, EventSink, LoggingSink};
pub use token::{TokenError, TokenSigner, UploadState};

use access::{RequestInfo, ResourceAction};
use stevedore_core::registry::RepositoryStoreManager;
use stevedore_core::{DistributionErrorCode, RepositoryError, RepositoryName};

/// The distribution API engine: routing, handlers, upload session tokens,
/// and the seams to the access controller and event sink.
///
/// Cheap to clone; all shared state is read-only after construction.
pub struct Distribution<M: RepositoryStoreManager> {
    manager: M,
    tokens: Arc<TokenSigner>,
    access: Arc<dyn AccessController>,
    events: Arc<dyn EventSink>,
}

impl<M: RepositoryStoreManager> Clone for Distribution<M> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            tokens: self.tokens.clone(),
            access: self.access.clone(),
            events: self.events.clone(),
        }
    }
}

impl<M: RepositoryStoreManager> Distribution<M> {
    /// Build an engine over `manager`. Without `secret`, upload session
    /// tokens are minted under an ephemeral key (see
    /// [`TokenSigner::ephemeral`]).
    pub fn new(manager: M, secret: Option<&[u8]>) -> Self {
        Self {
            manager,
            tokens: Arc::new(match secret {
                Some(secret) => TokenSigner::new(secret),
                None => TokenSigner::ephemeral(),
            }),
            access: Arc::new(AllowAll),
            events: Arc::new(LoggingSink),
        }
    }

    pub fn with_access_controller(mut self, controller: impl AccessController) -> Self {
        self.access = Arc::new(controller);
        self
    }

    pub fn with_event_sink(mut self, sink: impl EventSink) -> Self {
        self.events = Arc::new(sink);
        self
    }

    pub(crate) fn tokens(&self) -> &TokenSigner {
        &self.tokens
    }

    /// Deliver an event to the sink. Sink failures are logged and never
    /// fail the request that produced the event.
    pub(crate) async fn notify(&self, event: Event) {
        if let Err(e) = self.events.notify(event).await {
            tracing::warn!("event sink failure: {e}");
        }
    }

    /// Consult the access controller; `Some(response)` means the request
    /// ends here with a challenge or denial.
    pub(crate) async fn check_access(
        &self,
        info: &RequestInfo,
        resources: &[ResourceAction],
    ) -> Option<Response> {
        match self.access.authorized(info, resources).await {
            Decision::Allow => None,
            Decision::Challenge { challenge } => {
                let mut response =
                    Error::Repository(RepositoryError::Unauthorized).into_response();
                if let Ok(value) = HeaderValue::from_str(&challenge) {
                    response
                        .headers_mut()
                        .insert(header::WWW_AUTHENTICATE, value);
                }
                Some(response)
            }
            Decision::Deny => {
                Some(Error::Repository(RepositoryError::Denied).into_response())
            }
        }
    }

    /// Return an [`axum::Router`] serving the distribution API.
    pub fn router(&self) -> Result<Router> {
        let app = Router::new()
            .route("/v2/", get(base_check::<M>))
            .route("/v2/_catalog", get(catalog::get_catalog::<M>))
            .route("/v2/*tail", any(dispatch::<M>))
            .with_state(self.clone())
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(trace::DefaultMakeSpan::new())
                    .on_response(trace::DefaultOnResponse::new())
                    .on_request(trace::DefaultOnRequest::new()),
            )
            .layer(SetResponseHeaderLayer::if_not_present(
                HeaderName::from_str("docker-distribution-api-version")?,
                HeaderValue::from_str("registry/2.0")?,
            ))
            .layer(SetResponseHeaderLayer::if_not_present(
                header::CONTENT_TYPE,
                HeaderValue::from_str("application/json")?,
            ))
            .layer(CatchPanicLayer::custom(render_panic));

        Ok(app)
    }
}

/// A handler panic becomes an UNKNOWN error envelope instead of a dropped
/// connection.
fn render_panic(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| err.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_string());
    tracing::error!("handler panicked: {detail}");
    Error::Code(DistributionErrorCode::Unknown, None).into_response()
}

/// API version check. Returns an empty JSON document once the access
/// controller is satisfied.
async fn base_check<M: RepositoryStoreManager>(
    State(distribution): State<Distribution<M>>,
) -> Result<Response> {
    let info = RequestInfo {
        method: Method::GET,
        path: "/v2/".to_string(),
    };
    if let Some(response) = distribution.check_access(&info, &[]).await {
        return Ok(response);
    }
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str("application/json")?,
    );
    Ok((StatusCode::OK, headers, "{}").into_response())
}

enum RouteKind<'a> {
    Manifest(&'a str),
    Blob(&'a str),
    UploadStart,
    Upload(&'a str),
    TagList,
}

async fn dispatch<M: RepositoryStoreManager>(
    State(distribution): State<Distribution<M>>,
    Path(tail): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    request: Request<Body>,
) -> Result<Response> {
    let method = request.method().clone();
    let headers = request.headers().clone();

    let segments: Vec<&str> = tail.split('/').collect();
    let (name_segments, route) = match segments.as_slice() {
        [name @ .., "manifests", reference] if !name.is_empty() => {
            (name, RouteKind::Manifest(reference))
        }
        [name @ .., "blobs", "uploads"] if !name.is_empty() => (name, RouteKind::UploadStart),
        [name @ .., "blobs", "uploads", rest] if !name.is_empty() && rest.is_empty() => {
            (name, RouteKind::UploadStart)
        }
        [name @ .., "blobs", "uploads", uuid] if !name.is_empty() => {
            (name, RouteKind::Upload(uuid))
        }
        [name @ .., "blobs", digest] if !name.is_empty() && *digest != "uploads" => {
            (name, RouteKind::Blob(digest))
        }
        [name @ .., "tags", "list"] if !name.is_empty() => (name, RouteKind::TagList),
        _ => return Ok((StatusCode::NOT_FOUND, "not found").into_response()),
    };

    let name = name_segments.join("/");
    let repo_name = RepositoryName::try_from(name.as_str())?;

    let info = RequestInfo {
        method: method.clone(),
        path: format!("/v2/{tail}"),
    };
    let resources = route_resources(&name, &method, &params);
    if let Some(response) = distribution.check_access(&info, &resources).await {
        return Ok(response);
    }

    // repositories come into existence implicitly on first write; reads of
    // a repository nothing was ever pushed to are name-unknown
    let repository = match method {
        Method::POST | Method::PUT | Method::PATCH => {
            distribution.manager.create(&repo_name).await?
        }
        _ => distribution
            .manager
            .get(&repo_name)
            .await?
            .ok_or(Error::Repository(RepositoryError::NameUnknown))?,
    };

    match (route, method) {
        (RouteKind::Manifest(reference), Method::GET) => {
            manifests::get_manifest(&repository, reference, &headers, false).await
        }
        (RouteKind::Manifest(reference), Method::HEAD) => {
            manifests::get_manifest(&repository, reference, &headers, true).await
        }
        (RouteKind::Manifest(reference), Method::PUT) => {
            manifests::put_manifest(&distribution, &repository, reference, &headers, request)
                .await
        }
        (RouteKind::Manifest(reference), Method::DELETE) => {
            manifests::delete_manifest(&distribution, &repository, reference).await
        }
        (RouteKind::Blob(digest), Method::GET) => {
            blobs::get_blob(&repository, digest, &headers, false).await
        }
        (RouteKind::Blob(digest), Method::HEAD) => {
            blobs::get_blob(&repository, digest, &headers, true).await
        }
        (RouteKind::Blob(digest), Method::DELETE) => {
            blobs::delete_blob(&repository, digest).await
        }
        (RouteKind::UploadStart, Method::POST) => {
            blobs::uploads_post(&distribution, &repository, &params, &headers, request).await
        }
        (RouteKind::Upload(uuid), Method::PATCH) => {
            blobs::uploads_patch(&distribution, &repository, uuid, &params, &headers, request)
                .await
        }
        (RouteKind::Upload(uuid), Method::PUT) => {
            blobs::uploads_put(&distribution, &repository, uuid, &params, request).await
        }
        (RouteKind::Upload(uuid), Method::GET) => {
            blobs::uploads_get(&distribution, &repository, uuid, &params).await
        }
        (RouteKind::Upload(uuid), Method::DELETE) => {
            blobs::uploads_delete(&distribution, &repository, uuid, &params).await
        }
        (RouteKind::TagList, Method::GET) => tags::get_tags(&repository, &params).await,
        _ => Ok((StatusCode::METHOD_NOT_ALLOWED, "method not allowed").into_response()),
    }
}

/// The resources a route touches, for the access controller.
fn route_resources(
    name: &str,
    method: &Method,
    params: &HashMap<String, String>,
) -> Vec<ResourceAction> {
    let action = match *method {
        Method::GET | Method::HEAD => "pull",
        Method::DELETE => "delete",
        _ => "push",
    };
    let mut resources = vec![ResourceAction {
        resource: "repository",
        name: name.to_string(),
        action,
    }];
    // a cross-repository mount also pulls from the source repository
    if let Some(from) = params.get("from") {
        resources.push(ResourceAction {
            resource: "repository",
            name: from.clone(),
            action: "pull",
        });
    }
    resources
}

/// Serde deserialization decorator to map empty strings to None.
pub(crate) fn empty_string_as_none<'de, D, T>(
    de: D,
) -> std::result::Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    use serde::Deserialize;
    let opt = Option::<String>::deserialize(de)?;
    match opt.as_deref() {
        None | Some("") => Ok(None),
        Some(s) => FromStr::from_str(s)
            .map_err(serde::de::Error::custom)
            .map(Some),
    }
}

/// Helper shared by the paginated listing endpoints: an RFC 5988 `Link`
/// header pointing at the next page when the current one came back full.
pub(crate) fn pagination_link(
    base: &str,
    n: Option<usize>,
    results: &[String],
) -> Option<String> {
    let n = n?;
    if results.len() < n {
        return None;
    }
    let last = results.last()?;
    Some(format!("<{base}?last={last}&n={n}>; rel=\"next\""))
}
