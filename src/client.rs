//! Remote object-storage client seam, implemented with Apache OpenDAL.

use std::collections::HashMap;
use std::path::PathBuf;

use bytes::Bytes;
use opendal::{Operator, services};

use crate::config::ACL_HEADER;
use crate::credentials::Credentials;
use crate::error::{ClientError, StorageError};

/// Default interoperability endpoint for the Google object store.
pub const INTEROP_ENDPOINT: &str = "https://storage.googleapis.com";

/// How the client treats the per-object ACL header on uploads.
///
/// The S3 interoperability layer does not accept the Google canned-ACL
/// header on writes, so the choice has to be made when the client is
/// built rather than discovered per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AclMode {
    /// Drop the ACL header and rely on the bucket's own access policy.
    /// This is the default: interoperability buckets are expected to
    /// carry a bucket-level policy matching the configured permissions.
    #[default]
    BucketPolicy,
    /// Refuse uploads that carry the ACL header. For deployments where
    /// silently relying on bucket policy would be wrong.
    Reject,
}

/// Object-storage operations the backend needs: put, get (existence
/// probing), delete. Nothing else — no listing, versioning, or multipart.
///
/// Implemented over OpenDAL in production; tests substitute in-memory
/// recordings.
pub trait ObjectClient: Send + Sync {
    /// Store `data` under `key` in `bucket` with the given headers.
    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        headers: &HashMap<String, String>,
    ) -> impl std::future::Future<Output = Result<(), ClientError>> + Send;

    /// Fetch the object at `key`. A clean miss is a [`ClientError`] whose
    /// `is_not_found()` is true, distinct from transport failure.
    fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Bytes, ClientError>> + Send;

    /// Remove the object at `key`.
    fn delete_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> impl std::future::Future<Output = Result<(), ClientError>> + Send;
}

/// Where the OpenDAL operator points.
#[derive(Debug, Clone)]
pub enum StorageProvider {
    /// An S3-compatible interoperability endpoint authenticated with an
    /// HMAC credential pair.
    Interop {
        /// Endpoint URL, e.g. [`INTEROP_ENDPOINT`].
        endpoint: String,
        /// Region hint; `auto` for providers that do not use regions.
        region: String,
    },
    /// Local filesystem (development only).
    LocalFs {
        /// Root directory path.
        root: PathBuf,
    },
}

impl StorageProvider {
    /// The default interoperability endpoint.
    #[must_use]
    pub fn interop() -> Self {
        Self::Interop {
            endpoint: INTEROP_ENDPOINT.to_string(),
            region: "auto".to_string(),
        }
    }

    /// Local filesystem provider (development only).
    #[must_use]
    pub fn local_fs(root: impl Into<PathBuf>) -> Self {
        Self::LocalFs { root: root.into() }
    }
}

/// OpenDAL-backed [`ObjectClient`]. Bound to a single bucket at
/// construction, as the operator carries the bucket binding itself.
pub struct OpendalClient {
    operator: Operator,
    bucket: String,
    acl_mode: AclMode,
}

impl OpendalClient {
    /// Build a client for `bucket` against the given provider.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the operator cannot be built.
    pub fn new(
        provider: &StorageProvider,
        credentials: &Credentials,
        bucket: &str,
        acl_mode: AclMode,
    ) -> Result<Self, StorageError> {
        let operator = match provider {
            StorageProvider::Interop { endpoint, region } => {
                let builder = services::S3::default()
                    .endpoint(endpoint)
                    .bucket(bucket)
                    .access_key_id(&credentials.access_key)
                    .secret_access_key(&credentials.secret_key)
                    .region(region);

                Operator::new(builder)
                    .map_err(|e| StorageError::configuration(e.to_string()))?
                    .finish()
            }
            StorageProvider::LocalFs { root } => {
                let builder = services::Fs::default().root(
                    root.to_str()
                        .ok_or_else(|| StorageError::configuration("invalid root path"))?,
                );

                Operator::new(builder)
                    .map_err(|e| StorageError::configuration(e.to_string()))?
                    .finish()
            }
        };

        Ok(Self {
            operator,
            bucket: bucket.to_string(),
            acl_mode,
        })
    }

    fn check_bucket(&self, bucket: &str) -> Result<(), ClientError> {
        if bucket == self.bucket {
            Ok(())
        } else {
            Err(ClientError::transport(format!(
                "client is bound to bucket '{}' (requested '{bucket}')",
                self.bucket
            )))
        }
    }
}

impl ObjectClient for OpendalClient {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        headers: &HashMap<String, String>,
    ) -> Result<(), ClientError> {
        self.check_bucket(bucket)?;

        let mut write = self.operator.write_with(key, data);
        for (name, value) in headers {
            match name.to_ascii_lowercase().as_str() {
                "content-type" => write = write.content_type(value),
                "cache-control" => write = write.cache_control(value),
                "content-disposition" => write = write.content_disposition(value),
                ACL_HEADER => match self.acl_mode {
                    // Access is governed by the bucket's own policy.
                    AclMode::BucketPolicy => {}
                    AclMode::Reject => {
                        return Err(ClientError::transport(format!(
                            "per-object ACL '{value}' is not supported over the \
                             interoperability layer; set a bucket policy instead"
                        )));
                    }
                },
                other => {
                    return Err(ClientError::transport(format!(
                        "header '{other}' is not supported by the storage layer"
                    )));
                }
            }
        }
        write.await.map(|_| ()).map_err(ClientError::from)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, ClientError> {
        self.check_bucket(bucket)?;
        let buffer = self.operator.read(key).await.map_err(ClientError::from)?;
        Ok(buffer.to_bytes())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ClientError> {
        self.check_bucket(bucket)?;
        self.operator.delete(key).await.map_err(ClientError::from)
    }
}
