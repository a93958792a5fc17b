use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use url::Url;

use super::{RemoteStore, StorageError};
use crate::config::StorageConfig;

#[derive(Clone)]
pub struct S3Service {
    client: Client,
    bucket_name: String,
    public_base_url: String,
}

impl S3Service {
    pub fn new(client: Client, bucket_name: String, public_base_url: String) -> Self {
        Self {
            client,
            bucket_name,
            public_base_url,
        }
    }

    /// Builds a client for AWS or an S3-compatible provider. Returns `None`
    /// when no bucket is configured, which leaves uploads on local disk.
    pub fn from_config(
        sdk_config: &aws_config::SdkConfig,
        config: &StorageConfig,
    ) -> Option<Self> {
        let bucket_name = config.bucket.clone()?;

        let mut builder = aws_sdk_s3::config::Builder::from(sdk_config);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            builder = builder.credentials_provider(Credentials::new(
                key_id,
                secret,
                None,
                None,
                "oralcare-env",
            ));
        }
        let client = Client::from_conf(builder.build());

        let public_base_url = Self::public_base(
            config.public_base_url.as_ref(),
            config.endpoint_url.as_deref(),
            &bucket_name,
        );
        log::info!(
            "S3 storage enabled: bucket '{}', public base {}",
            bucket_name,
            public_base_url
        );

        Some(Self::new(client, bucket_name, public_base_url))
    }

    /// Base under which `{key}` is publicly reachable, without a trailing slash.
    pub fn public_base(public: Option<&Url>, endpoint: Option<&str>, bucket: &str) -> String {
        match (public, endpoint) {
            (Some(base), _) => format!("{}/{}", base.as_str().trim_end_matches('/'), bucket),
            (None, Some(endpoint)) => format!("{}/{}", endpoint.trim_end_matches('/'), bucket),
            (None, None) => format!("https://{}.s3.amazonaws.com", bucket),
        }
    }
}

#[async_trait]
impl RemoteStore for S3Service {
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        let body = ByteStream::from(data.to_vec());

        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::S3(e.to_string())
                }
            })?;

        let body = result
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?;

        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        let encoded: Vec<String> = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("{}/{}", self.public_base_url, encoded.join("/"))
    }
}
