//! The S3 storage backend.
//!
//! Wraps the AWS SDK client behind the [`ObjectStore`] contract, with the
//! endpoint override and path-style addressing needed for S3-compatible
//! targets, optional extra root CA trust, and classified errors.
//!
//! Multipart sequencing lives in [`upload_in_parts`], generic over the
//! small [`MultipartApi`] surface so the part/abort protocol is testable
//! without a network. A failed upload is aborted on a detached task, so
//! the abort releases server-side state even when the caller has been
//! cancelled.

use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::operation::create_bucket::CreateBucketError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::head_bucket::HeadBucketError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::Bytes;

use crate::error::{Error, Result};
use crate::storage::{ObjectReader, ObjectStore};

/// S3 implementation of the [`ObjectStore`] contract.
#[derive(Debug, Clone)]
pub struct S3Backend {
    client: aws_sdk_s3::Client,
    multipart_thresh: usize,
}

impl S3Backend {
    /// Connects to an S3-compatible endpoint.
    ///
    /// With `endpoint` set, requests go to that URL with path-style
    /// addressing (the form S3-compatible stores expect); otherwise the
    /// ambient AWS configuration decides. `ca_cert` adds an extra root
    /// certificate to the trust store for private TLS endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a zero multipart threshold or
    /// an unreadable CA certificate.
    pub async fn connect(
        endpoint: Option<&str>,
        ca_cert: Option<&Path>,
        multipart_thresh: usize,
    ) -> Result<Self> {
        if multipart_thresh == 0 {
            return Err(Error::InvalidInput(
                "multipart threshold must be positive".to_string(),
            ));
        }

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(url) = endpoint {
            loader = loader.endpoint_url(url);
        }
        if let Some(path) = ca_cert {
            loader = loader.http_client(https_client_with_ca(path).await?);
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if endpoint.is_some() {
            builder = builder.force_path_style(true);
        }
        let client = aws_sdk_s3::Client::from_conf(builder.build());

        Ok(Self {
            client,
            multipart_thresh,
        })
    }

    /// The part size used once an object crosses into multipart territory.
    #[must_use]
    pub fn multipart_thresh(&self) -> usize {
        self.multipart_thresh
    }
}

async fn https_client_with_ca(
    path: &Path,
) -> Result<aws_smithy_runtime_api::client::http::SharedHttpClient> {
    use aws_smithy_http_client::tls;

    let pem = tokio::fs::read(path).await.map_err(|e| {
        Error::InvalidInput(format!("failed to read CA certificate {}: {e}", path.display()))
    })?;
    let trust_store = tls::TrustStore::empty().with_pem_certificate(pem);
    let tls_context = tls::TlsContext::builder()
        .with_trust_store(trust_store)
        .build()
        .map_err(|e| Error::InvalidInput(format!("invalid CA certificate: {e}")))?;
    Ok(aws_smithy_http_client::Builder::new()
        .tls_provider(tls::Provider::Rustls(
            tls::rustls_provider::CryptoMode::Ring,
        ))
        .tls_context(tls_context)
        .build_https())
}

#[async_trait]
impl ObjectStore for S3Backend {
    async fn head_bucket(&self, bucket: &str) -> Result<()> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(()),
            Err(err) if err.as_service_error().is_some_and(HeadBucketError::is_not_found) => {
                Err(Error::NotFound {
                    bucket: bucket.to_string(),
                })
            }
            Err(err) => Err(Error::transport_with_source(
                format!("head bucket {bucket} failed"),
                err,
            )),
        }
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        match self.client.create_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(()),
            Err(err)
                if err.as_service_error().is_some_and(|e| {
                    CreateBucketError::is_bucket_already_owned_by_you(e)
                        || CreateBucketError::is_bucket_already_exists(e)
                }) =>
            {
                Err(Error::Conflict {
                    message: format!("bucket {bucket} already exists"),
                })
            }
            Err(err) => Err(Error::transport_with_source(
                format!("create bucket {bucket} failed"),
                err,
            )),
        }
    }

    async fn clear_bucket(&self, bucket: &str, prefix: &str) -> Result<()> {
        loop {
            let keys = self.list_objects(bucket, prefix).await?;
            if keys.is_empty() {
                return Ok(());
            }
            for key in keys {
                self.delete_object(bucket, &key).await?;
            }
        }
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<u32> {
        if body.len() <= self.multipart_thresh {
            self.client
                .put_object()
                .bucket(bucket)
                .key(key)
                .body(ByteStream::from(body))
                .send()
                .await
                .map_err(|err| {
                    Error::transport_with_source(format!("put {bucket}/{key} failed"), err)
                })?;
            return Ok(1);
        }
        upload_in_parts(self, bucket, key, body, self.multipart_thresh).await
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectReader> {
        match self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(Box::new(output.body.into_async_read())),
            Err(err) if err.as_service_error().is_some_and(GetObjectError::is_no_such_key) => {
                Err(Error::NoSuchKey {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
            }
            Err(err) => Err(Error::transport_with_source(
                format!("get {bucket}/{key} failed"),
                err,
            )),
        }
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;
        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix);
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }
            let output = request.send().await.map_err(|err| {
                Error::transport_with_source(format!("list {bucket}/{prefix}* failed"), err)
            })?;
            keys.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(str::to_string)),
            );
            match output.next_continuation_token() {
                Some(token) => continuation_token = Some(token.to_string()),
                None => return Ok(keys),
            }
        }
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                Error::transport_with_source(format!("delete {bucket}/{key} failed"), err)
            })?;
        Ok(())
    }
}

/// The raw multipart surface of the backing store.
///
/// [`upload_in_parts`] sequences these calls; the S3 client implements
/// them directly, and tests stub them to exercise the abort protocol.
#[async_trait]
pub trait MultipartApi: Clone + Send + Sync + 'static {
    /// Starts a multipart upload and returns its upload ID.
    async fn create_upload(&self, bucket: &str, key: &str) -> Result<String>;

    /// Uploads one part (1-based part numbers) and returns its ETag.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String>;

    /// Completes the upload from the accumulated `(part_number, etag)` pairs.
    async fn complete_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<(i32, String)>,
    ) -> Result<()>;

    /// Abandons the upload, releasing server-side part state.
    async fn abort_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()>;
}

#[async_trait]
impl MultipartApi for S3Backend {
    async fn create_upload(&self, bucket: &str, key: &str) -> Result<String> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                Error::transport_with_source(
                    format!("create multipart upload for {bucket}/{key} failed"),
                    err,
                )
            })?;
        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| Error::transport("multipart upload created without an upload ID"))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String> {
        let length = body.len();
        let output = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .content_length(length as i64)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| {
                Error::transport_with_source(
                    format!("upload part {part_number} of {bucket}/{key} failed"),
                    err,
                )
            })?;
        Ok(output.e_tag().unwrap_or_default().to_string())
    }

    async fn complete_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<(i32, String)>,
    ) -> Result<()> {
        let completed = parts
            .into_iter()
            .map(|(part_number, etag)| {
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(etag)
                    .build()
            })
            .collect();
        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|err| {
                Error::transport_with_source(
                    format!("complete multipart upload for {bucket}/{key} failed"),
                    err,
                )
            })?;
        Ok(())
    }

    async fn abort_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|err| {
                Error::transport_with_source(
                    format!("abort multipart upload for {bucket}/{key} failed"),
                    err,
                )
            })?;
        Ok(())
    }
}

/// Uploads `body` as `ceil(len / part_size)` parts of `part_size` bytes
/// and returns the part count.
///
/// On any part or completion failure the upload is aborted and the
/// original error is returned. The abort runs on a spawned task so that a
/// cancelled caller cannot leave part state behind on the server.
///
/// # Errors
///
/// Propagates the first failing [`MultipartApi`] call.
pub async fn upload_in_parts<A: MultipartApi>(
    api: &A,
    bucket: &str,
    key: &str,
    body: Bytes,
    part_size: usize,
) -> Result<u32> {
    let upload_id = api.create_upload(bucket, key).await?;

    let mut parts = Vec::with_capacity(body.len().div_ceil(part_size));
    let mut offset = 0;
    let mut part_number = 1i32;
    while offset < body.len() {
        let end = usize::min(offset + part_size, body.len());
        let part = body.slice(offset..end);
        match api.upload_part(bucket, key, &upload_id, part_number, part).await {
            Ok(etag) => parts.push((part_number, etag)),
            Err(err) => {
                abort_detached(api.clone(), bucket, key, &upload_id).await;
                return Err(err);
            }
        }
        offset = end;
        part_number += 1;
    }

    let part_count = u32::try_from(parts.len())
        .map_err(|_| Error::internal("multipart part count overflow"))?;
    if let Err(err) = api.complete_upload(bucket, key, &upload_id, parts).await {
        abort_detached(api.clone(), bucket, key, &upload_id).await;
        return Err(err);
    }
    Ok(part_count)
}

/// Aborts an upload on a detached task. The spawned task completes even if
/// the awaiting caller is dropped mid-cancellation.
async fn abort_detached<A: MultipartApi>(api: A, bucket: &str, key: &str, upload_id: &str) {
    let bucket = bucket.to_string();
    let key = key.to_string();
    let upload_id = upload_id.to_string();
    let handle = tokio::spawn(async move {
        if let Err(error) = api.abort_upload(&bucket, &key, &upload_id).await {
            tracing::error!(%bucket, %key, %upload_id, %error, "failed to abort multipart upload");
        }
    });
    let _ = handle.await;
}
