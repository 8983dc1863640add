//! S3-compatible blob backend using AWS SDK.

use crate::error::{StorageError, StorageResult};
use crate::traits::{BlobStore, ByteStream};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::future::ProvideCredentials as ProvideCredentialsFuture;
use aws_sdk_s3::Client;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_smithy_http_client::Builder as SmithyHttpClientBuilder;
use bytes::{Bytes, BytesMut};
use depot_core::ContentRef;
use futures::StreamExt;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::io::ReaderStream;
use tracing::instrument;
use uuid::Uuid;

/// Minimum part size for S3 multipart uploads (5 MiB).
/// S3 requires all parts except the last to be at least 5 MB.
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Key namespace for blobs inside the (optionally prefixed) bucket.
const BLOB_PREFIX: &str = "blobs/";

/// User metadata key carrying the percent-encoded upload name.
const NAME_METADATA_KEY: &str = "depot-name";

/// Markers included in lazy-credentials errors so they map to config errors
/// instead of generic transport failures.
const CREDENTIALS_INIT_ERROR_MARKER: &str = "depot-s3-lazy-credentials-init";
const CREDENTIALS_RESOLVE_ERROR_MARKER: &str = "depot-s3-lazy-credentials-resolve";

/// Lazily initializes the AWS default credentials chain on first signed request.
///
/// Keeps backend construction free of TLS/native-root side effects.
#[derive(Debug)]
struct LazyDefaultCredentialsProvider {
    region: String,
    chain: OnceCell<aws_config::default_provider::credentials::DefaultCredentialsChain>,
}

impl LazyDefaultCredentialsProvider {
    fn new(region: String) -> Self {
        Self {
            region,
            chain: OnceCell::new(),
        }
    }

    async fn chain(
        &self,
    ) -> Result<&aws_config::default_provider::credentials::DefaultCredentialsChain, CredentialsError>
    {
        self.chain
            .get_or_try_init(|| async {
                let region = aws_config::Region::new(self.region.clone());
                tokio::task::spawn(async move {
                    aws_config::default_provider::credentials::DefaultCredentialsChain::builder()
                        .region(region)
                        .build()
                        .await
                })
                .await
                .map_err(|join_err| {
                    CredentialsError::provider_error(format!(
                        "{CREDENTIALS_INIT_ERROR_MARKER}: failed to initialize AWS default credential chain: {join_err}"
                    ))
                })
            })
            .await
    }

    async fn credentials(&self) -> aws_credential_types::provider::Result {
        let chain = self.chain().await?;
        chain.provide_credentials().await.map_err(|err| {
            CredentialsError::provider_error(format!(
                "{CREDENTIALS_RESOLVE_ERROR_MARKER}: default AWS credentials resolution failed: {err}"
            ))
        })
    }
}

impl ProvideCredentials for LazyDefaultCredentialsProvider {
    fn provide_credentials<'a>(&'a self) -> ProvideCredentialsFuture<'a>
    where
        Self: 'a,
    {
        ProvideCredentialsFuture::new(self.credentials())
    }
}

fn map_s3_operation_error<E>(err: aws_sdk_s3::error::SdkError<E>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let err_text = err.to_string();
    if err_text.contains(CREDENTIALS_INIT_ERROR_MARKER)
        || err_text.contains(CREDENTIALS_RESOLVE_ERROR_MARKER)
    {
        return StorageError::Config(
            "S3 credential initialization failed. Configure AWS credentials explicitly or ensure ambient AWS credentials and trust roots are available."
                .to_string(),
        );
    }

    StorageError::S3(Box::new(err))
}

fn is_not_found<E>(err: &aws_sdk_s3::error::SdkError<E>) -> bool {
    matches!(
        err,
        aws_sdk_s3::error::SdkError::ServiceError(service_err)
            if service_err.raw().status().as_u16() == 404
    )
}

/// Percent-encode an upload name so it survives as S3 user metadata.
fn encode_name(name: &str) -> String {
    utf8_percent_encode(name, NON_ALPHANUMERIC).to_string()
}

/// S3-compatible blob store.
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: Option<String>,
    endpoint: String,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Create a new S3 backend.
    ///
    /// `force_path_style` selects `endpoint/bucket/key` URLs, which MinIO and
    /// some S3-compatible services require.
    pub async fn new(
        bucket: &str,
        endpoint: Option<String>,
        region: Option<String>,
        prefix: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        force_path_style: bool,
    ) -> StorageResult<Self> {
        if access_key_id.is_some() ^ secret_access_key.is_some() {
            return Err(StorageError::Config(
                "s3 config requires both access_key_id and secret_access_key when either is set"
                    .to_string(),
            ));
        }

        let resolved_region = region.unwrap_or_else(|| "us-east-1".to_string());
        let mut s3_config_builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(resolved_region.clone()));

        if let (Some(key_id), Some(secret)) = (access_key_id, secret_access_key) {
            let credentials =
                aws_sdk_s3::config::Credentials::new(key_id, secret, None, None, "depot-config");
            s3_config_builder = s3_config_builder.credentials_provider(credentials);
        } else {
            s3_config_builder = s3_config_builder
                .credentials_provider(LazyDefaultCredentialsProvider::new(resolved_region.clone()));
        }

        // Bare host:port endpoints (e.g. "minio:9000") get an http:// scheme
        let normalized_endpoint = endpoint.as_ref().map(|endpoint_url| {
            let lower = endpoint_url.to_lowercase();
            if lower.starts_with("http://") || lower.starts_with("https://") {
                endpoint_url.clone()
            } else {
                format!("http://{endpoint_url}")
            }
        });

        if let Some(endpoint_url) = &normalized_endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
            // Plain-http endpoints must not depend on native trust roots
            if endpoint_url.to_ascii_lowercase().starts_with("http://") {
                s3_config_builder =
                    s3_config_builder.http_client(SmithyHttpClientBuilder::new().build_http());
            }
        }

        if force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = Client::from_conf(s3_config_builder.build());

        let stored_endpoint = match &normalized_endpoint {
            Some(url) => url.clone(),
            None => format!("s3.{resolved_region}.amazonaws.com"),
        };

        Ok(Self {
            client,
            bucket: bucket.to_string(),
            prefix: prefix.map(|p| p.trim_end_matches('/').to_string()),
            endpoint: stored_endpoint,
        })
    }

    /// Endpoint the client talks to, after normalization.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Get the full object key for a reference (applies prefix if configured).
    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        }
    }

    /// Strip the configured prefix from a full object key.
    fn strip_prefix(&self, full_key: &str) -> String {
        match &self.prefix {
            Some(prefix) => full_key
                .strip_prefix(&format!("{prefix}/"))
                .unwrap_or(full_key)
                .to_string(),
            None => full_key.to_string(),
        }
    }

    fn object_key(&self, content_ref: &ContentRef) -> StorageResult<String> {
        if !content_ref.as_str().starts_with(BLOB_PREFIX) {
            return Err(StorageError::InvalidRef(format!(
                "not an s3 blob reference: {content_ref}"
            )));
        }
        Ok(self.full_key(content_ref.as_str()))
    }

    async fn put_single(&self, key: &str, name: &str, data: Bytes) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .metadata(NAME_METADATA_KEY, encode_name(name))
            .body(data.into())
            .send()
            .await
            .map_err(map_s3_operation_error)?;
        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            tracing::warn!(
                key = %key,
                upload_id = %upload_id,
                error = %e,
                "failed to abort multipart upload, orphaned parts may remain"
            );
        }
    }
}

/// In-progress multipart upload; started once the first full part is buffered.
struct Multipart {
    upload_id: String,
    parts: Vec<CompletedPart>,
}

impl S3Backend {
    async fn upload_part(
        &self,
        key: &str,
        multipart: &mut Multipart,
        data: Bytes,
    ) -> StorageResult<()> {
        let part_number = i32::try_from(multipart.parts.len() + 1)
            .map_err(|_| StorageError::Config("too many multipart parts".to_string()))?;
        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(&multipart.upload_id)
            .part_number(part_number)
            .body(data.into())
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        multipart.parts.push(
            CompletedPart::builder()
                .e_tag(output.e_tag().unwrap_or_default())
                .part_number(part_number)
                .build(),
        );
        Ok(())
    }

    async fn start_multipart(&self, key: &str, name: &str) -> StorageResult<Multipart> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .metadata(NAME_METADATA_KEY, encode_name(name))
            .send()
            .await
            .map_err(map_s3_operation_error)?;
        let upload_id = output
            .upload_id()
            .ok_or_else(|| StorageError::Config("S3 did not return upload_id".to_string()))?
            .to_string();
        Ok(Multipart {
            upload_id,
            parts: Vec::new(),
        })
    }

    /// Stream `data` to `key`, switching to multipart once a full part is buffered.
    async fn upload_stream(
        &self,
        key: &str,
        name: &str,
        mut data: ByteStream,
        multipart: &mut Option<Multipart>,
    ) -> StorageResult<u64> {
        let mut buffer = BytesMut::with_capacity(MIN_PART_SIZE);
        let mut total = 0u64;

        while let Some(chunk) = data.next().await {
            let chunk = chunk?;
            total += chunk.len() as u64;
            buffer.extend_from_slice(&chunk);

            while buffer.len() >= MIN_PART_SIZE {
                let part = buffer.split_to(MIN_PART_SIZE).freeze();
                if multipart.is_none() {
                    *multipart = Some(self.start_multipart(key, name).await?);
                }
                if let Some(upload) = multipart.as_mut() {
                    self.upload_part(key, upload, part).await?;
                }
            }
        }

        match multipart.as_mut() {
            // Small blob: one PutObject, no multipart bookkeeping
            None => self.put_single(key, name, buffer.freeze()).await?,
            Some(upload) => {
                if !buffer.is_empty() {
                    self.upload_part(key, upload, buffer.freeze()).await?;
                }
                let completed = CompletedMultipartUpload::builder()
                    .set_parts(Some(upload.parts.clone()))
                    .build();
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload.upload_id)
                    .multipart_upload(completed)
                    .send()
                    .await
                    .map_err(map_s3_operation_error)?;
            }
        }

        Ok(total)
    }
}

#[async_trait]
impl BlobStore for S3Backend {
    #[instrument(skip(self, data), fields(backend = "s3"))]
    async fn put(&self, name: &str, data: ByteStream) -> StorageResult<ContentRef> {
        let content_ref = ContentRef::new(format!("{BLOB_PREFIX}{}", Uuid::new_v4().simple()))?;
        let key = self.full_key(content_ref.as_str());

        let mut multipart = None;
        match self.upload_stream(&key, name, data, &mut multipart).await {
            Ok(size) => {
                tracing::debug!(content_ref = %content_ref, size, "blob written");
                Ok(content_ref)
            }
            Err(err) => {
                if let Some(upload) = multipart {
                    self.abort_multipart(&key, &upload.upload_id).await;
                }
                Err(err)
            }
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get(&self, content_ref: &ContentRef) -> StorageResult<ByteStream> {
        let key = self.object_key(content_ref)?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    StorageError::NotFound(content_ref.to_string())
                } else {
                    map_s3_operation_error(e)
                }
            })?;

        let reader_stream = ReaderStream::new(output.body.into_async_read());
        Ok(Box::pin(
            reader_stream.map(|result| result.map_err(StorageError::Io)),
        ))
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, content_ref: &ContentRef) -> StorageResult<()> {
        let key = self.object_key(content_ref)?;
        // DeleteObject succeeds for missing keys
        match self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(map_s3_operation_error(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn exists(&self, content_ref: &ContentRef) -> StorageResult<bool> {
        let key = self.object_key(content_ref)?;
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(map_s3_operation_error(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn list(&self) -> StorageResult<Vec<ContentRef>> {
        let full_prefix = self.full_key(BLOB_PREFIX);
        let mut results = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&full_prefix);
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let output = request.send().await.map_err(map_s3_operation_error)?;
            for obj in output.contents() {
                if let Some(obj_key) = obj.key() {
                    results.push(ContentRef::new(self.strip_prefix(obj_key))?);
                }
            }

            if output.is_truncated() == Some(true) {
                continuation_token = output.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }

        Ok(results)
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn health_check(&self) -> StorageResult<()> {
        const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);
        let marker_key = self.full_key(".depot-health-check");

        let check = async {
            self.put_single(&marker_key, "health-check", Bytes::from_static(b"ok"))
                .await?;
            match self
                .client
                .delete_object()
                .bucket(&self.bucket)
                .key(&marker_key)
                .send()
                .await
            {
                Ok(_) => Ok(()),
                Err(e) if is_not_found(&e) => Ok(()),
                Err(e) => Err(map_s3_operation_error(e)),
            }
        };

        tokio::time::timeout(HEALTH_CHECK_TIMEOUT, check)
            .await
            .map_err(|_| {
                StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "S3 health check timed out after 10 seconds",
                ))
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn make_backend(prefix: Option<String>) -> S3Backend {
        S3Backend::new(
            "test-bucket",
            Some("s3.test".to_string()),
            Some("us-east-1".to_string()),
            prefix,
            Some("access".to_string()),
            Some("secret".to_string()),
            true,
        )
        .await
        .expect("backend should construct for unit tests")
    }

    #[tokio::test]
    async fn test_full_key_and_strip_prefix() {
        let backend = make_backend(Some("depot/".to_string())).await;
        assert_eq!(backend.full_key("blobs/abc"), "depot/blobs/abc");
        assert_eq!(backend.strip_prefix("depot/blobs/abc"), "blobs/abc");
        assert_eq!(backend.strip_prefix("other/path"), "other/path");

        let backend = make_backend(None).await;
        assert_eq!(backend.full_key("blobs/abc"), "blobs/abc");
    }

    #[tokio::test]
    async fn test_rejects_foreign_refs() {
        let backend = make_backend(None).await;
        let foreign = ContentRef::new("chunks/abc").unwrap();
        assert!(matches!(
            backend.object_key(&foreign),
            Err(StorageError::InvalidRef(_))
        ));
    }

    #[tokio::test]
    async fn test_s3_new_requires_complete_credentials() {
        let err = S3Backend::new(
            "bucket",
            None,
            Some("us-east-1".to_string()),
            None,
            Some("access".to_string()),
            None,
            false,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StorageError::Config(_)));
    }

    #[tokio::test]
    async fn test_s3_new_normalizes_endpoint() {
        let backend = S3Backend::new(
            "bucket",
            Some("minio:9000".to_string()),
            None,
            None,
            None,
            None,
            true,
        )
        .await
        .unwrap();
        assert_eq!(backend.endpoint(), "http://minio:9000");

        let backend = S3Backend::new("bucket", None, Some("eu-west-1".to_string()), None, None, None, false)
            .await
            .unwrap();
        assert_eq!(backend.endpoint(), "s3.eu-west-1.amazonaws.com");
    }

    #[test]
    fn test_encode_name_is_ascii() {
        let encoded = encode_name("résumé final.pdf");
        assert!(encoded.is_ascii());
        assert!(!encoded.contains(' '));
    }
}
