use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream as AwsByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CompletedMultipartUpload, CompletedPart, CreateBucketConfiguration,
    MetadataDirective,
};
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use storage_core::{BackendCause, ConnectionDescriptor, StorageError, StorageResult};

use crate::client::{
    content_md5, BucketInfo, ObjectBody, ObjectClient, ObjectHead, ObjectInfo, UploadedPart,
};

const DEFAULT_REGION: &str = "us-east-1";

/// Endpoint and credentials of an S3-compatible service
#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint_url: String,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl S3Config {
    /// `secure=true` selects https; `region` overrides the default region
    pub fn from_descriptor(descriptor: &ConnectionDescriptor) -> Self {
        let scheme = if descriptor.option_flag("secure") { "https" } else { "http" };
        let credentials = descriptor.credentials();

        Self {
            endpoint_url: format!("{}://{}", scheme, descriptor.endpoint()),
            region: descriptor.option("region").unwrap_or(DEFAULT_REGION).to_string(),
            access_key_id: credentials.map(|c| c.user.clone()),
            secret_access_key: credentials.map(|c| c.password.clone()),
        }
    }
}

/// [`ObjectClient`] over the AWS SDK, path-style for MinIO compatibility
pub struct AwsObjectClient {
    config: S3Config,
    session: RwLock<Option<Client>>,
}

impl AwsObjectClient {
    pub fn new(config: S3Config) -> Self {
        Self {
            config,
            session: RwLock::new(None),
        }
    }

    async fn create_client(config: &S3Config) -> Client {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(&config.endpoint_url);

        if let (Some(key), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            let credentials = Credentials::new(key.clone(), secret.clone(), None, None, "storage");
            loader = loader.credentials_provider(credentials);
        }
        let aws_config = loader.load().await;

        Client::from_conf(
            aws_sdk_s3::config::Builder::from(&aws_config)
                .force_path_style(true)
                .build(),
        )
    }

    fn client(&self) -> StorageResult<Client> {
        self.session.read().clone().ok_or_else(StorageError::not_connected)
    }

    fn map_aws_error<E, R>(err: SdkError<E, R>) -> StorageError
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
        R: Debug + Send + Sync + 'static,
    {
        let cause = match &err {
            SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => BackendCause::Connection,
            SdkError::ResponseError(_) => BackendCause::Protocol,
            _ => match err.code() {
                Some("InvalidAccessKeyId" | "SignatureDoesNotMatch" | "AccessDenied") => {
                    BackendCause::Authentication
                }
                _ => BackendCause::Server,
            },
        };

        StorageError::Backend {
            cause,
            message: DisplayErrorContext(&err).to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// Content-MD5 rejections become integrity failures, the rest map as usual
    fn map_upload_error<E, R>(err: SdkError<E, R>, name: &str, md5: &str) -> StorageError
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
        R: Debug + Send + Sync + 'static,
    {
        match digest_rejection(err.code(), name, md5) {
            Some(rejection) => rejection,
            None => Self::map_aws_error(err),
        }
    }
}

fn digest_rejection(code: Option<&str>, name: &str, md5: &str) -> Option<StorageError> {
    match code {
        Some(code @ ("BadDigest" | "InvalidDigest")) => Some(StorageError::Integrity {
            name: name.to_string(),
            local: md5.to_string(),
            remote: format!("{code} from server"),
        }),
        _ => None,
    }
}

#[async_trait]
impl ObjectClient for AwsObjectClient {
    async fn connect(&self) -> StorageResult<()> {
        if self.session.read().is_some() {
            return Ok(());
        }

        let client = Self::create_client(&self.config).await;
        // Cheapest authenticated call; rejects bad endpoints and credentials up front
        client
            .list_buckets()
            .send()
            .await
            .map_err(Self::map_aws_error)?;

        info!("Connected to S3 endpoint {}", self.config.endpoint_url);
        *self.session.write() = Some(client);
        Ok(())
    }

    async fn disconnect(&self) -> StorageResult<()> {
        self.session.write().take();
        Ok(())
    }

    fn endpoint(&self) -> String {
        self.config.endpoint_url.clone()
    }

    fn region(&self) -> String {
        self.config.region.clone()
    }

    async fn server_software(&self) -> StorageResult<Option<String>> {
        let seen = Arc::new(Mutex::new(None));
        let capture = seen.clone();
        self.client()?
            .list_buckets()
            .customize()
            .mutate_response(move |response| {
                *capture.lock() = response.headers().get("server").map(str::to_string);
            })
            .send()
            .await
            .map_err(Self::map_aws_error)?;

        let server = seen.lock().take();
        Ok(server)
    }

    async fn list_buckets(&self) -> StorageResult<Vec<BucketInfo>> {
        let output = self
            .client()?
            .list_buckets()
            .send()
            .await
            .map_err(Self::map_aws_error)?;

        Ok(output
            .buckets()
            .iter()
            .filter_map(|bucket| {
                Some(BucketInfo {
                    name: bucket.name()?.to_string(),
                    created: bucket.creation_date().and_then(to_chrono),
                })
            })
            .collect())
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        match self.client()?.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(false),
            Err(err) => Err(Self::map_aws_error(err)),
        }
    }

    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        let mut request = self.client()?.create_bucket().bucket(bucket);
        if self.config.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.config.region.as_str()))
                    .build(),
            );
        }

        request.send().await.map_err(Self::map_aws_error)?;
        info!("Created bucket {}", bucket);
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.client()?
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(Self::map_aws_error)?;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> StorageResult<Vec<ObjectInfo>> {
        let client = self.client()?;
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let output = client
                .list_objects_v2()
                .bucket(bucket)
                .set_prefix(prefix.map(str::to_string))
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(Self::map_aws_error)?;

            objects.extend(output.contents().iter().filter_map(|object| {
                Some(ObjectInfo {
                    key: object.key()?.to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                    last_modified: object.last_modified().and_then(to_chrono),
                })
            }));

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        debug!("Listed {} object(s) in {}", objects.len(), bucket);
        Ok(objects)
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectHead> {
        let output = match self.client()?.head_object().bucket(bucket).key(key).send().await {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => {
                return Err(StorageError::not_found("object", format!("{bucket}/{key}")))
            }
            Err(err) => return Err(Self::map_aws_error(err)),
        };

        Ok(ObjectHead {
            size: output.content_length().unwrap_or(0).max(0) as u64,
            last_modified: output.last_modified().and_then(to_chrono),
            metadata: output.metadata().cloned().unwrap_or_default(),
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectBody> {
        let output = match self.client()?.get_object().bucket(bucket).key(key).send().await {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                return Err(StorageError::not_found("object", format!("{bucket}/{key}")))
            }
            Err(err) => return Err(Self::map_aws_error(err)),
        };

        let metadata = output.metadata().cloned().unwrap_or_default();
        let body = futures::stream::unfold(output.body, |mut body| async move {
            body.next().await.map(|frame| {
                let frame = frame.map_err(|e| StorageError::backend_with(BackendCause::Connection, e));
                (frame, body)
            })
        });

        Ok(ObjectBody {
            metadata,
            body: Box::pin(body),
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        metadata: HashMap<String, String>,
    ) -> StorageResult<()> {
        let md5 = content_md5(&body);
        self.client()?
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_md5(md5.clone())
            .set_metadata(Some(metadata))
            .body(AwsByteStream::from(body))
            .send()
            .await
            .map_err(|err| Self::map_upload_error(err, key, &md5))?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.client()?
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(Self::map_aws_error)?;
        Ok(())
    }

    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> StorageResult<String> {
        let output = self
            .client()?
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(Self::map_aws_error)?;

        output.upload_id().map(str::to_string).ok_or_else(|| {
            StorageError::backend_message(BackendCause::Protocol, "CreateMultipartUpload returned no upload id")
        })
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StorageResult<String> {
        let md5 = content_md5(&body);
        let output = self
            .client()?
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .content_md5(md5.clone())
            .body(AwsByteStream::from(body))
            .send()
            .await
            .map_err(|err| Self::map_upload_error(err, &format!("{key} part {part_number}"), &md5))?;

        output.e_tag().map(str::to_string).ok_or_else(|| {
            StorageError::backend_message(
                BackendCause::Protocol,
                format!("UploadPart {} of {} returned no ETag", part_number, key),
            )
        })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> StorageResult<()> {
        let completed_parts = parts
            .into_iter()
            .map(|part| {
                CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(part.etag)
                    .build()
            })
            .collect::<Vec<_>>();

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client()?
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(Self::map_aws_error)?;
        Ok(())
    }

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> StorageResult<()> {
        self.client()?
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(Self::map_aws_error)?;
        debug!("Aborted multipart upload {} of {}", upload_id, key);
        Ok(())
    }

    async fn replace_metadata(
        &self,
        bucket: &str,
        key: &str,
        metadata: HashMap<String, String>,
    ) -> StorageResult<()> {
        self.client()?
            .copy_object()
            .bucket(bucket)
            .key(key)
            .copy_source(copy_source(bucket, key))
            .metadata_directive(MetadataDirective::Replace)
            .set_metadata(Some(metadata))
            .send()
            .await
            .map_err(Self::map_aws_error)?;
        Ok(())
    }
}

fn to_chrono(time: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(time.secs(), time.subsec_nanos())
}

/// `bucket/key` with the key percent-encoded, slashes kept
fn copy_source(bucket: &str, key: &str) -> String {
    let encoded: Vec<_> = key.split('/').map(urlencoding::encode).collect();
    format!("{bucket}/{}", encoded.join("/"))
}
