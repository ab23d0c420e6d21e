use std::collections::HashMap;

use axum::body::StreamBody;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use headers::HeaderMapExt;
use hyper::body::Body;
use uuid::Uuid;

use stevedore_core::registry::{
    BlobStore, BlobWriter, ExpectedDescriptor, RepositoryStore, RepositoryStoreManager,
};
use stevedore_core::{BlobError, ContentDigest, DistributionErrorCode, RepositoryName};

use super::access::Event;
use super::errors::{Error, Result};
use super::headers::{blob_byte_range, upload_range, ContentRange};
use super::token::UploadState;
use super::Distribution;

const OCTET_STREAM: &str = "application/octet-stream";

fn docker_content_digest() -> HeaderName {
    HeaderName::from_static("docker-content-digest")
}

fn docker_upload_uuid() -> HeaderName {
    HeaderName::from_static("docker-upload-uuid")
}

fn content_length_header(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
}

/// GET and HEAD of `/v2/<name>/blobs/<digest>`. Blob GETs honor a single
/// HTTP byte range.
pub(crate) async fn get_blob<R: RepositoryStore>(
    repository: &R,
    digest: &str,
    headers: &HeaderMap,
    head_only: bool,
) -> Result<Response> {
    let digest = ContentDigest::try_from(digest)?;
    let store = repository.get_blob_store();

    if head_only {
        let Some(metadata) = store.head(&digest).await? else {
            return Err(Error::Blob(BlobError::Unknown));
        };
        let mut response_headers = HeaderMap::new();
        response_headers.insert(
            docker_content_digest(),
            HeaderValue::from_str(&metadata.digest.to_string())?,
        );
        response_headers.insert(
            header::CONTENT_LENGTH,
            HeaderValue::from_str(&metadata.size.to_string())?,
        );
        response_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM));
        return Ok((StatusCode::OK, response_headers, "").into_response());
    }

    let range = blob_byte_range(headers);
    let Some((metadata, body)) = store.get(&digest, range).await? else {
        return Err(Error::Blob(BlobError::Unknown));
    };

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        docker_content_digest(),
        HeaderValue::from_str(&metadata.digest.to_string())?,
    );
    response_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM));

    let status = match range.filter(|_| metadata.size > 0) {
        None => {
            response_headers.insert(
                header::CONTENT_LENGTH,
                HeaderValue::from_str(&metadata.size.to_string())?,
            );
            StatusCode::OK
        }
        Some(range) => {
            if range.start >= metadata.size {
                return Err(Error::Blob(BlobError::RangeInvalid {
                    offset: range.start,
                    size: metadata.size,
                }));
            }
            let end = range
                .end
                .map(|e| e.min(metadata.size - 1))
                .unwrap_or(metadata.size - 1);
            response_headers.insert(
                header::CONTENT_LENGTH,
                HeaderValue::from_str(&(end - range.start + 1).to_string())?,
            );
            response_headers.insert(
                header::CONTENT_RANGE,
                HeaderValue::from_str(&format!(
                    "bytes {}-{}/{}",
                    range.start, end, metadata.size
                ))?,
            );
            StatusCode::PARTIAL_CONTENT
        }
    };

    Ok((status, response_headers, StreamBody::new(body)).into_response())
}

/// DELETE of `/v2/<name>/blobs/<digest>`: drops the repository's link.
pub(crate) async fn delete_blob<R: RepositoryStore>(
    repository: &R,
    digest: &str,
) -> Result<Response> {
    let digest = ContentDigest::try_from(digest)?;
    repository.get_blob_store().delete(&digest).await?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
    Ok((StatusCode::ACCEPTED, headers, "").into_response())
}

fn blob_location(name: &RepositoryName, digest: &ContentDigest) -> String {
    format!("/v2/{name}/blobs/{digest}")
}

fn created_response(name: &RepositoryName, digest: &ContentDigest) -> Result<Response> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::LOCATION,
        HeaderValue::from_str(&blob_location(name, digest))?,
    );
    headers.insert(
        docker_content_digest(),
        HeaderValue::from_str(&digest.to_string())?,
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
    Ok((StatusCode::CREATED, headers, "").into_response())
}

/// 202 pointing the client at the upload with a freshly minted state token.
fn accepted_response<M: RepositoryStoreManager, W: BlobWriter>(
    distribution: &Distribution<M>,
    name: &RepositoryName,
    writer: &W,
    status: StatusCode,
) -> Result<Response> {
    let size = writer.size();
    let token = distribution.tokens().sign(&UploadState {
        name: name.to_string(),
        uuid: *writer.uuid(),
        offset: size,
        started_at: writer.started_at(),
    });

    let mut headers = HeaderMap::new();
    headers.insert(
        header::LOCATION,
        HeaderValue::from_str(&format!(
            "/v2/{name}/blobs/uploads/{}?_state={token}",
            writer.uuid()
        ))?,
    );
    headers.insert(
        docker_upload_uuid(),
        HeaderValue::from_str(&writer.uuid().to_string())?,
    );
    headers.insert(
        HeaderName::from_static("range"),
        HeaderValue::from_str(&upload_range(size))?,
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
    Ok((status, headers, "").into_response())
}

/// POST to `/v2/<name>/blobs/uploads/`.
///
/// Three shapes share the route: cross-repository mount
/// (`?mount=<digest>&from=<repo>`), monolithic single-request upload
/// (`?digest=<digest>` plus body), and plain session start.
pub(crate) async fn uploads_post<M: RepositoryStoreManager>(
    distribution: &Distribution<M>,
    repository: &M::RepositoryStore,
    params: &HashMap<String, String>,
    headers: &HeaderMap,
    request: Request<Body>,
) -> Result<Response> {
    let store = repository.get_blob_store();

    if let (Some(mount), Some(from)) = (params.get("mount"), params.get("from")) {
        let digest = ContentDigest::try_from(mount.as_str())?;
        let from = RepositoryName::try_from(from.as_str())?;
        if let Some(metadata) = store.mount(&digest, &from).await? {
            distribution
                .notify(Event {
                    action: "push",
                    repository: repository.name().to_string(),
                    digest: metadata.digest.to_string(),
                    media_type: None,
                    size: metadata.size,
                })
                .await;
            return created_response(repository.name(), &metadata.digest);
        }
        // blob not mountable from the source; fall back to a session the
        // client can upload through
        tracing::debug!(
            digest = %digest,
            from = %from,
            "mount source missing, opening upload session"
        );
    }

    if let Some(digest) = params.get("digest") {
        // monolithic upload: the entire blob is this request's body. An
        // empty body is a legitimate zero-length blob.
        let digest = ContentDigest::try_from(digest.as_str())?;
        let expected_size = content_length_header(headers);

        let mut writer = store.start_upload().await?;
        match writer.append(request.into_body()).await {
            Ok(_) => {}
            Err(BlobError::ClientDisconnect) => return Err(Error::ClientClosedRequest),
            Err(e) => return Err(e.into()),
        }
        let metadata = writer
            .commit(ExpectedDescriptor {
                digest,
                size: expected_size,
            })
            .await?;

        distribution
            .notify(Event {
                action: "push",
                repository: repository.name().to_string(),
                digest: metadata.digest.to_string(),
                media_type: None,
                size: metadata.size,
            })
            .await;
        return created_response(repository.name(), &metadata.digest);
    }

    let writer = store.start_upload().await?;
    accepted_response(distribution, repository.name(), &writer, StatusCode::ACCEPTED)
}

/// Decode, MAC-verify, and bind the `_state` token against the route's
/// repository and upload id.
fn verify_token<M: RepositoryStoreManager>(
    distribution: &Distribution<M>,
    repository: &M::RepositoryStore,
    uuid_str: &str,
    params: &HashMap<String, String>,
) -> Result<(Uuid, UploadState)> {
    let uuid = Uuid::parse_str(uuid_str).map_err(BlobError::from)?;

    let token = params.get("_state").ok_or(Error::Code(
        DistributionErrorCode::BlobUploadInvalid,
        Some("missing upload state token".to_string()),
    ))?;
    let state = distribution.tokens().verify(token).map_err(|e| {
        tracing::debug!("rejecting upload state token: {e}");
        Error::Code(
            DistributionErrorCode::BlobUploadInvalid,
            Some("invalid upload state token".to_string()),
        )
    })?;
    if state.name != repository.name().as_ref() || state.uuid != uuid {
        return Err(Error::Code(
            DistributionErrorCode::BlobUploadInvalid,
            Some("upload state token does not match request".to_string()),
        ));
    }
    Ok((uuid, state))
}

/// Verify the `_state` token, then reopen the session it names. With
/// `check_offset`, the token must describe exactly the bytes the server
/// has -- a stale token is how out-of-order chunks are caught.
async fn resume_verified<M: RepositoryStoreManager>(
    distribution: &Distribution<M>,
    repository: &M::RepositoryStore,
    uuid_str: &str,
    params: &HashMap<String, String>,
    check_offset: bool,
) -> Result<<<M::RepositoryStore as RepositoryStore>::BlobStore as BlobStore>::Writer> {
    let (uuid, state) = verify_token(distribution, repository, uuid_str, params)?;
    let writer = repository.get_blob_store().resume_upload(&uuid).await?;
    if check_offset && writer.size() != state.offset {
        return Err(Error::Blob(BlobError::RangeInvalid {
            offset: state.offset,
            size: writer.size(),
        }));
    }
    Ok(writer)
}

/// PATCH of `/v2/<name>/blobs/uploads/<uuid>`: append one chunk.
pub(crate) async fn uploads_patch<M: RepositoryStoreManager>(
    distribution: &Distribution<M>,
    repository: &M::RepositoryStore,
    uuid: &str,
    params: &HashMap<String, String>,
    headers: &HeaderMap,
    request: Request<Body>,
) -> Result<Response> {
    if let Some(content_type) = headers.get(header::CONTENT_TYPE) {
        if content_type != OCTET_STREAM {
            return Err(Error::Code(
                DistributionErrorCode::BlobUploadInvalid,
                Some(format!(
                    "chunk content type must be {OCTET_STREAM}, got {content_type:?}"
                )),
            ));
        }
    }

    let mut writer = resume_verified(distribution, repository, uuid, params, true).await?;

    let content_length = content_length_header(headers);
    let content_range = headers.typed_try_get::<ContentRange>().map_err(|_| {
        Error::Code(
            DistributionErrorCode::BlobUploadInvalid,
            Some("malformed content range".to_string()),
        )
    })?;
    if let Some(range) = &content_range {
        if range.start != writer.size() {
            return Err(Error::Blob(BlobError::RangeInvalid {
                offset: range.start,
                size: writer.size(),
            }));
        }
        if let Some(length) = content_length {
            if length != 0 && length != range.len() {
                return Err(Error::Blob(BlobError::SizeInvalid {
                    expected: range.len(),
                    received: length,
                }));
            }
        }
    }

    if content_length == Some(0) {
        // zero-length probe: offset stays where it is
        return accepted_response(
            distribution,
            repository.name(),
            &writer,
            StatusCode::ACCEPTED,
        );
    }

    let before = writer.size();
    let appended = match writer.append(request.into_body()).await {
        Ok(new_size) => new_size - before,
        Err(BlobError::ClientDisconnect) => return Err(Error::ClientClosedRequest),
        Err(e) => return Err(e.into()),
    };
    if let Some(length) = content_length {
        if appended != length {
            return Err(Error::Blob(BlobError::SizeInvalid {
                expected: length,
                received: appended,
            }));
        }
    }

    accepted_response(
        distribution,
        repository.name(),
        &writer,
        StatusCode::ACCEPTED,
    )
}

/// PUT of `/v2/<name>/blobs/uploads/<uuid>`: optionally append a final
/// chunk, then verify and commit the blob.
pub(crate) async fn uploads_put<M: RepositoryStoreManager>(
    distribution: &Distribution<M>,
    repository: &M::RepositoryStore,
    uuid: &str,
    params: &HashMap<String, String>,
    request: Request<Body>,
) -> Result<Response> {
    let digest = params.get("digest").ok_or(Error::Code(
        DistributionErrorCode::DigestInvalid,
        Some("digest parameter missing".to_string()),
    ))?;
    let digest = ContentDigest::try_from(digest.as_str())?;

    let mut writer = resume_verified(distribution, repository, uuid, params, true).await?;
    match writer.append(request.into_body()).await {
        Ok(_) => {}
        Err(BlobError::ClientDisconnect) => return Err(Error::ClientClosedRequest),
        Err(e) => return Err(e.into()),
    }

    let metadata = writer
        .commit(ExpectedDescriptor { digest, size: None })
        .await?;

    distribution
        .notify(Event {
            action: "push",
            repository: repository.name().to_string(),
            digest: metadata.digest.to_string(),
            media_type: None,
            size: metadata.size,
        })
        .await;

    let mut response = created_response(repository.name(), &metadata.digest)?;
    response
        .headers_mut()
        .insert(docker_upload_uuid(), HeaderValue::from_str(uuid)?);
    Ok(response)
}

/// GET of `/v2/<name>/blobs/uploads/<uuid>`: report upload progress. The
/// token's MAC and binding are checked but not its offset -- discovering
/// the current offset is what this endpoint is for.
pub(crate) async fn uploads_get<M: RepositoryStoreManager>(
    distribution: &Distribution<M>,
    repository: &M::RepositoryStore,
    uuid: &str,
    params: &HashMap<String, String>,
) -> Result<Response> {
    let writer = resume_verified(distribution, repository, uuid, params, false).await?;
    accepted_response(
        distribution,
        repository.name(),
        &writer,
        StatusCode::NO_CONTENT,
    )
}

/// DELETE of `/v2/<name>/blobs/uploads/<uuid>`: cancel the session.
pub(crate) async fn uploads_delete<M: RepositoryStoreManager>(
    distribution: &Distribution<M>,
    repository: &M::RepositoryStore,
    uuid: &str,
    params: &HashMap<String, String>,
) -> Result<Response> {
    let (uuid, _) = verify_token(distribution, repository, uuid, params)?;
    repository.get_blob_store().cancel_upload(&uuid).await?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
    Ok((StatusCode::NO_CONTENT, headers, "").into_response())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn blob_location_shape() {
        let name = RepositoryName::try_from("lib/app").unwrap();
        let digest = ContentDigest::from_content(b"hello");
        assert_eq!(
            blob_location(&name, &digest),
            format!("/v2/lib/app/blobs/{digest}")
        );
    }
}
