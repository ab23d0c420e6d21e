use std::str::FromStr;

use axum::body::StreamBody;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use hyper::body::Body;

use stevedore_core::registry::{
    ManifestRef, ManifestStore, RepositoryStore, RepositoryStoreManager,
};
use stevedore_core::ManifestError;

use super::access::Event;
use super::errors::{Error, Result};
use super::Distribution;

// matches what real clients push; anything bigger is suspect
const MANIFEST_BYTE_LIMIT: u64 = 4 * 1024 * 1024;

fn docker_content_digest() -> HeaderName {
    HeaderName::from_static("docker-content-digest")
}

/// Does the stored media type satisfy the client's `Accept` set?
///
/// An absent `Accept` header accepts everything, as does `*/*`. When the
/// stored type is not acceptable the manifest is reported unknown rather
/// than converted; this registry does not rewrite between schemas.
fn acceptable(headers: &HeaderMap, stored: Option<&str>) -> bool {
    let Some(stored) = stored else {
        return true;
    };
    let mut saw_accept = false;
    for value in headers.get_all(header::ACCEPT) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for item in value.split(',') {
            saw_accept = true;
            let media_type = item.split(';').next().unwrap_or(item).trim();
            if media_type == stored || media_type == "*/*" {
                return true;
            }
        }
    }
    !saw_accept
}

/// GET and HEAD of `/v2/<name>/manifests/<reference>`. The payload on the
/// wire is byte-for-byte what was pushed; HEAD negotiates the same way GET
/// does.
pub(crate) async fn get_manifest<R: RepositoryStore>(
    repository: &R,
    reference: &str,
    headers: &HeaderMap,
    head_only: bool,
) -> Result<Response> {
    let manifest_ref = ManifestRef::from_str(reference)?;
    let store = repository.get_manifest_store();

    let Some((metadata, body)) = store.get(&manifest_ref).await? else {
        return Err(Error::Manifest(ManifestError::Unknown));
    };
    if !acceptable(headers, metadata.media_type.as_deref()) {
        tracing::debug!(
            reference,
            stored = ?metadata.media_type,
            "stored manifest type not acceptable to client"
        );
        return Err(Error::Manifest(ManifestError::Unknown));
    }

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        docker_content_digest(),
        HeaderValue::from_str(&metadata.digest.to_string())?,
    );
    response_headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&metadata.size.to_string())?,
    );
    if let Some(media_type) = &metadata.media_type {
        response_headers.insert(header::CONTENT_TYPE, HeaderValue::from_str(media_type)?);
    }

    if head_only {
        Ok((StatusCode::OK, response_headers, "").into_response())
    } else {
        Ok((StatusCode::OK, response_headers, StreamBody::new(body)).into_response())
    }
}

/// PUT of `/v2/<name>/manifests/<reference>`.
pub(crate) async fn put_manifest<M: RepositoryStoreManager>(
    distribution: &Distribution<M>,
    repository: &M::RepositoryStore,
    reference: &str,
    headers: &HeaderMap,
    request: Request<Body>,
) -> Result<Response> {
    let manifest_ref = ManifestRef::from_str(reference)?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    if let Some(length) = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
    {
        if length > MANIFEST_BYTE_LIMIT {
            return Err(Error::Manifest(ManifestError::TooBig));
        }
    }

    // the exact bytes are both parsed and stored; digest stability depends
    // on never reserializing them
    let bytes = hyper::body::to_bytes(request.into_body())
        .await
        .map_err(|e| {
            tracing::info!("client went away mid-manifest: {e}");
            Error::ClientClosedRequest
        })?;
    if bytes.len() as u64 > MANIFEST_BYTE_LIMIT {
        return Err(Error::Manifest(ManifestError::TooBig));
    }

    let store = repository.get_manifest_store();
    let metadata = store
        .put(&manifest_ref, content_type.as_deref(), bytes)
        .await?;

    distribution
        .notify(Event {
            action: "push",
            repository: repository.name().to_string(),
            digest: metadata.digest.to_string(),
            media_type: metadata.media_type.clone(),
            size: metadata.size,
        })
        .await;

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::LOCATION,
        HeaderValue::from_str(&format!(
            "/v2/{}/manifests/{reference}",
            repository.name()
        ))?,
    );
    response_headers.insert(
        docker_content_digest(),
        HeaderValue::from_str(&metadata.digest.to_string())?,
    );
    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
    Ok((StatusCode::CREATED, response_headers, "").into_response())
}

/// DELETE of `/v2/<name>/manifests/<reference>`. A digest reference drops
/// the revision (and cascades untag); a tag reference only untags.
pub(crate) async fn delete_manifest<M: RepositoryStoreManager>(
    distribution: &Distribution<M>,
    repository: &M::RepositoryStore,
    reference: &str,
) -> Result<Response> {
    let manifest_ref = ManifestRef::from_str(reference)?;
    let store = repository.get_manifest_store();

    // resolve first so the deletion event can carry the digest
    let existing = store.head(&manifest_ref).await?;
    store.delete(&manifest_ref).await?;

    if let Some(metadata) = existing {
        distribution
            .notify(Event {
                action: "delete",
                repository: repository.name().to_string(),
                digest: metadata.digest.to_string(),
                media_type: metadata.media_type,
                size: metadata.size,
            })
            .await;
    }

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
    Ok((StatusCode::ACCEPTED, headers, "").into_response())
}

#[cfg(test)]
mod test {
    use super::*;

    fn accept(values: &[&str]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for v in values {
            headers.append(header::ACCEPT, HeaderValue::from_str(v).unwrap());
        }
        headers
    }

    #[test]
    fn negotiation() {
        let oci = "application/vnd.oci.image.manifest.v1+json";
        let schema2 = "application/vnd.docker.distribution.manifest.v2+json";

        // no Accept header accepts anything
        assert!(acceptable(&HeaderMap::new(), Some(oci)));
        // exact match, possibly buried in a list
        assert!(acceptable(&accept(&[schema2, oci]), Some(oci)));
        assert!(acceptable(&accept(&[&format!("{oci};q=0.5")]), Some(oci)));
        // wildcard
        assert!(acceptable(&accept(&["*/*"]), Some(oci)));
        // stored type the client did not ask for
        assert!(!acceptable(&accept(&[schema2]), Some(oci)));
        // untyped stored manifests always serve
        assert!(acceptable(&accept(&[schema2]), None));
    }
}
