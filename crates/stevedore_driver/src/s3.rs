use async_trait::async_trait;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, TimeZone, Utc};
use futures::{StreamExt, TryStreamExt};
use http::{StatusCode, Uri};
use serde::Deserialize;

use super::errors::{Error, Result};
use super::{check_path, FileInfo, FileReader, FileWriter, StorageDriver};

// S3 rejects non-final multipart parts below 5 MiB at completion time, so
// the writer never flushes a smaller part.
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

fn s3_err(e: impl std::fmt::Debug) -> Error {
    Error::S3(format!("{e:?}"))
}

#[derive(Clone, Deserialize)]
pub struct S3Config {
    secret_key: String,
    access_key: String,
    hostname: String,
    bucket_name: String,
    region: String,
}

impl S3Config {
    pub async fn new_driver(&self) -> Result<S3Driver> {
        let scp = SharedCredentialsProvider::new(
            Credentials::new(
                self.access_key.clone(),
                self.secret_key.clone(),
                None,
                None,
                "stevedore",
            )
            .provide_credentials()
            .await
            .map_err(s3_err)?,
        );

        let uri = Uri::builder()
            .scheme("https")
            .authority(self.hostname.as_str())
            .path_and_query("/")
            .build()
            .map_err(s3_err)?;

        let sdk_config = aws_config::load_from_env().await;

        let config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .region(Region::new(self.region.clone()))
            .credentials_provider(scp)
            .endpoint_url(uri.to_string())
            .build();

        Ok(S3Driver {
            bucket_name: self.bucket_name.clone(),
            client: aws_sdk_s3::Client::from_conf(config),
        })
    }
}

/// Stores objects in an S3-compatible bucket.
///
/// `rename` is emulated with copy-then-delete, which is atomic enough for
/// blob publication because the canonical blob path is never written by two
/// racers with different contents (content addressing). Appendable writers
/// ride on multipart uploads: parts accumulated so far survive between
/// requests server-side until `commit` completes the upload.
#[derive(Clone)]
pub struct S3Driver {
    bucket_name: String,
    client: Client,
}

impl S3Driver {
    fn key(&self, path: &str) -> Result<String> {
        check_path(path)?;
        Ok(path[1..].to_string())
    }

    async fn head_size(&self, key: &str) -> Result<Option<u64>> {
        match self
            .client
            .head_object()
            .key(key)
            .bucket(&self.bucket_name)
            .send()
            .await
        {
            Err(SdkError::ServiceError(e)) => {
                let http = e.raw();
                match StatusCode::from_u16(http.status().as_u16()) {
                    Ok(StatusCode::NOT_FOUND) => Ok(None),
                    _ => Err(s3_err(SdkError::ServiceError(e))),
                }
            }
            Err(e) => Err(s3_err(e)),
            Ok(out) => Ok(Some(out.content_length() as u64)),
        }
    }

    /// Most recent in-flight multipart upload for `key`, if any.
    async fn find_multipart(&self, key: &str) -> Result<Option<String>> {
        let out = self
            .client
            .list_multipart_uploads()
            .bucket(&self.bucket_name)
            .prefix(key)
            .send()
            .await
            .map_err(s3_err)?;
        let upload_id = out
            .uploads()
            .unwrap_or_default()
            .iter()
            .filter(|u| u.key() == Some(key))
            .filter_map(|u| u.upload_id())
            .last()
            .map(String::from);
        Ok(upload_id)
    }
}

fn smithy_time(dt: Option<&aws_sdk_s3::primitives::DateTime>) -> DateTime<Utc> {
    dt.and_then(|t| Utc.timestamp_opt(t.secs(), t.subsec_nanos()).single())
        .unwrap_or_else(Utc::now)
}

#[async_trait]
impl StorageDriver for S3Driver {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn get_content(&self, path: &str) -> Result<Bytes> {
        let key = self.key(path)?;
        let out = match self
            .client
            .get_object()
            .key(&key)
            .bucket(&self.bucket_name)
            .send()
            .await
        {
            Ok(out) => out,
            Err(SdkError::ServiceError(e)) if e.err().is_no_such_key() => {
                return Err(Error::NotFound(path.to_string()))
            }
            Err(e) => return Err(s3_err(e)),
        };
        let data = out.body.collect().await.map_err(s3_err)?;
        Ok(data.into_bytes())
    }

    async fn put_content(&self, path: &str, content: Bytes) -> Result<()> {
        let key = self.key(path)?;
        self.client
            .put_object()
            .key(&key)
            .body(ByteStream::from(content))
            .bucket(&self.bucket_name)
            .send()
            .await
            .map_err(s3_err)?;
        Ok(())
    }

    async fn reader(&self, path: &str, offset: u64) -> Result<FileReader> {
        let key = self.key(path)?;
        if let Some(size) = self.head_size(&key).await? {
            if offset > size {
                return Err(Error::InvalidOffset {
                    path: path.to_string(),
                    offset,
                });
            }
        } else {
            return Err(Error::NotFound(path.to_string()));
        }

        let out = self
            .client
            .get_object()
            .key(&key)
            .range(format!("bytes={offset}-"))
            .bucket(&self.bucket_name)
            .send()
            .await
            .map_err(s3_err)?;
        Ok(out
            .body
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
            .boxed())
    }

    async fn writer(&self, path: &str, append: bool) -> Result<Box<dyn FileWriter>> {
        let key = self.key(path)?;
        let mut writer = S3FileWriter {
            client: self.client.clone(),
            bucket: self.bucket_name.clone(),
            key: key.clone(),
            upload_id: None,
            parts: Vec::new(),
            next_part: 1,
            buffer: BytesMut::new(),
            size: 0,
        };
        if !append {
            return Ok(Box::new(writer));
        }

        if let Some(upload_id) = self.find_multipart(&key).await? {
            let out = self
                .client
                .list_parts()
                .bucket(&self.bucket_name)
                .key(&key)
                .upload_id(&upload_id)
                .send()
                .await
                .map_err(s3_err)?;
            for part in out.parts().unwrap_or_default() {
                writer.size += part.size() as u64;
                writer.next_part = writer.next_part.max(part.part_number() + 1);
                writer.parts.push(
                    CompletedPart::builder()
                        .set_e_tag(part.e_tag().map(String::from))
                        .part_number(part.part_number())
                        .build(),
                );
            }
            writer.upload_id = Some(upload_id);
        } else if let Some(size) = self.head_size(&key).await? {
            if size as usize >= MIN_PART_SIZE {
                // large enough to carry over as a copied first part
                writer.start_multipart().await?;
                let out = self
                    .client
                    .upload_part_copy()
                    .bucket(&self.bucket_name)
                    .key(&key)
                    .copy_source(format!("{}/{}", self.bucket_name, key))
                    .upload_id(writer.upload_id.as_deref().expect("just started"))
                    .part_number(1)
                    .send()
                    .await
                    .map_err(s3_err)?;
                writer.parts.push(
                    CompletedPart::builder()
                        .set_e_tag(out.copy_part_result().and_then(|r| r.e_tag()).map(String::from))
                        .part_number(1)
                        .build(),
                );
                writer.next_part = 2;
                writer.size = size;
            } else {
                // below the part-size floor; buffer the existing bytes instead
                let existing = self.get_content(path).await?;
                writer.size = existing.len() as u64;
                writer.buffer.extend_from_slice(&existing);
            }
        }

        Ok(Box::new(writer))
    }

    async fn stat(&self, path: &str) -> Result<FileInfo> {
        let key = self.key(path)?;
        match self
            .client
            .head_object()
            .key(&key)
            .bucket(&self.bucket_name)
            .send()
            .await
        {
            Ok(out) => {
                return Ok(FileInfo {
                    path: path.to_string(),
                    size: out.content_length() as u64,
                    mtime: smithy_time(out.last_modified()),
                    is_dir: false,
                })
            }
            Err(SdkError::ServiceError(e)) => {
                let http = e.raw();
                if StatusCode::from_u16(http.status().as_u16()).ok() != Some(StatusCode::NOT_FOUND) {
                    return Err(s3_err(SdkError::ServiceError(e)));
                }
            }
            Err(e) => return Err(s3_err(e)),
        }

        // no object at the key; it is a directory if anything lives below it
        let out = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket_name)
            .prefix(format!("{key}/"))
            .max_keys(1)
            .send()
            .await
            .map_err(s3_err)?;
        if out.key_count() > 0 {
            Ok(FileInfo {
                path: path.to_string(),
                size: 0,
                mtime: Utc::now(),
                is_dir: true,
            })
        } else {
            Err(Error::NotFound(path.to_string()))
        }
    }

    async fn list(&self, path: &str) -> Result<Vec<String>> {
        let key = self.key(path)?;
        let prefix = format!("{key}/");
        let mut children = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let out = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket_name)
                .prefix(&prefix)
                .delimiter("/")
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(s3_err)?;
            for cp in out.common_prefixes().unwrap_or_default() {
                if let Some(p) = cp.prefix() {
                    children.push(format!("/{}", p.trim_end_matches('/')));
                }
            }
            for obj in out.contents().unwrap_or_default() {
                if let Some(k) = obj.key() {
                    children.push(format!("/{k}"));
                }
            }
            match out.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        if children.is_empty() {
            return Err(Error::NotFound(path.to_string()));
        }
        children.sort();
        Ok(children)
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let src = self.key(from)?;
        let dst = self.key(to)?;
        self.client
            .copy_object()
            .copy_source(format!("{}/{}", self.bucket_name, src))
            .key(&dst)
            .bucket(&self.bucket_name)
            .send()
            .await
            .map_err(s3_err)?;
        self.client
            .delete_object()
            .key(&src)
            .bucket(&self.bucket_name)
            .send()
            .await
            .map_err(s3_err)?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let key = self.key(path)?;
        let mut doomed = vec![key.clone()];
        let mut continuation: Option<String> = None;
        loop {
            let out = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket_name)
                .prefix(format!("{key}/"))
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(s3_err)?;
            doomed.extend(
                out.contents()
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|o| o.key().map(String::from)),
            );
            match out.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        for key in doomed {
            self.client
                .delete_object()
                .key(&key)
                .bucket(&self.bucket_name)
                .send()
                .await
                .map_err(s3_err)?;
        }
        Ok(())
    }

    async fn walk(&self, path: &str) -> Result<Vec<FileInfo>> {
        let key = self.key(path)?;
        let prefix = format!("{key}/");
        let mut files = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let out = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket_name)
                .prefix(&prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(s3_err)?;
            for obj in out.contents().unwrap_or_default() {
                if let Some(k) = obj.key() {
                    files.push(FileInfo {
                        path: format!("/{k}"),
                        size: obj.size() as u64,
                        mtime: smithy_time(obj.last_modified()),
                        is_dir: false,
                    });
                }
            }
            match out.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }
}

struct S3FileWriter {
    client: Client,
    bucket: String,
    key: String,
    upload_id: Option<String>,
    parts: Vec<CompletedPart>,
    next_part: i32,
    buffer: BytesMut,
    size: u64,
}

impl S3FileWriter {
    async fn start_multipart(&mut self) -> Result<()> {
        if self.upload_id.is_some() {
            return Ok(());
        }
        let out = self
            .client
            .create_multipart_upload()
            .key(&self.key)
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(s3_err)?;
        self.upload_id = Some(
            out.upload_id
                .ok_or(Error::Driver("missing multipart upload id".to_string()))?,
        );
        Ok(())
    }

    async fn flush_part(&mut self) -> Result<()> {
        self.start_multipart().await?;
        let body = self.buffer.split().freeze();
        let out = self
            .client
            .upload_part()
            .upload_id(self.upload_id.as_deref().expect("multipart is started"))
            .part_number(self.next_part)
            .key(&self.key)
            .body(ByteStream::from(body))
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(s3_err)?;
        self.parts.push(
            CompletedPart::builder()
                .set_e_tag(out.e_tag)
                .part_number(self.next_part)
                .build(),
        );
        self.next_part += 1;
        Ok(())
    }
}

#[async_trait]
impl FileWriter for S3FileWriter {
    async fn write(&mut self, data: Bytes) -> Result<()> {
        self.size += data.len() as u64;
        self.buffer.extend_from_slice(&data);
        if self.buffer.len() >= MIN_PART_SIZE {
            self.flush_part().await?;
        }
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        match self.upload_id.clone() {
            None => {
                // never grew past a single part
                self.client
                    .put_object()
                    .key(&self.key)
                    .body(ByteStream::from(self.buffer.split().freeze()))
                    .bucket(&self.bucket)
                    .send()
                    .await
                    .map_err(s3_err)?;
                Ok(())
            }
            Some(upload_id) => {
                if !self.buffer.is_empty() {
                    self.flush_part().await?;
                }
                let mut mpu = CompletedMultipartUpload::builder();
                for part in std::mem::take(&mut self.parts) {
                    mpu = mpu.parts(part);
                }
                self.client
                    .complete_multipart_upload()
                    .multipart_upload(mpu.build())
                    .upload_id(&upload_id)
                    .key(&self.key)
                    .bucket(&self.bucket)
                    .send()
                    .await
                    .map_err(s3_err)?;
                Ok(())
            }
        }
    }

    async fn cancel(self: Box<Self>) -> Result<()> {
        if let Some(upload_id) = &self.upload_id {
            self.client
                .abort_multipart_upload()
                .upload_id(upload_id)
                .key(&self.key)
                .bucket(&self.bucket)
                .send()
                .await
                .map_err(s3_err)?;
        }
        self.client
            .delete_object()
            .key(&self.key)
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(s3_err)?;
        Ok(())
    }
}
