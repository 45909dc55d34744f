//! Storage configuration types.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::attachment::Attachment;
use crate::error::StorageError;

/// Upload header carrying the canned access policy.
pub const ACL_HEADER: &str = "x-goog-acl";

/// Canned access policy applied to every stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permissions {
    /// Anyone may read the object.
    PublicRead,
    /// Anyone may read or overwrite the object.
    PublicReadWrite,
    /// Any authenticated account may read the object.
    AuthenticatedRead,
    /// Only the bucket owner may access the object.
    Private,
}

impl Permissions {
    /// The ACL header value sent with each upload.
    #[must_use]
    pub fn header_value(self) -> &'static str {
        match self {
            Self::PublicRead => "public-read",
            Self::PublicReadWrite => "public-read-write",
            Self::AuthenticatedRead => "authenticated-read",
            Self::Private => "private",
        }
    }
}

/// URL scheme for generated object URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// Plain HTTP.
    Http,
    /// HTTPS.
    Https,
}

impl Protocol {
    /// The default protocol for an access policy: plain HTTP only for
    /// world-readable objects, HTTPS for everything else.
    #[must_use]
    pub fn for_permissions(permissions: Permissions) -> Self {
        if permissions == Permissions::PublicRead {
            Self::Http
        } else {
            Self::Https
        }
    }

    /// The URL scheme string.
    #[must_use]
    pub fn scheme(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

/// How the bucket name is determined.
///
/// Either a fixed name, or a function of the attachment evaluated once at
/// adapter construction (so one configuration can serve buckets that vary
/// per deployment or per attachment owner).
#[derive(Clone)]
pub enum Bucket {
    /// A fixed bucket name.
    Fixed(String),
    /// Derived from the attachment when the adapter is constructed. The
    /// function must be deterministic for a given attachment.
    FromAttachment(Arc<dyn Fn(&dyn Attachment) -> String + Send + Sync>),
}

impl Bucket {
    /// Bucket derived from the attachment at adapter construction.
    #[must_use]
    pub fn from_attachment(f: impl Fn(&dyn Attachment) -> String + Send + Sync + 'static) -> Self {
        Self::FromAttachment(Arc::new(f))
    }

    /// The bucket name for `attachment`.
    #[must_use]
    pub fn name_for(&self, attachment: &dyn Attachment) -> String {
        match self {
            Self::Fixed(name) => name.clone(),
            Self::FromAttachment(f) => f(attachment),
        }
    }

    /// The fixed bucket name, when no attachment is needed to produce it.
    #[must_use]
    pub fn fixed_name(&self) -> Option<&str> {
        match self {
            Self::Fixed(name) => Some(name),
            Self::FromAttachment(_) => None,
        }
    }
}

impl fmt::Debug for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(name) => f.debug_tuple("Fixed").field(name).finish(),
            Self::FromAttachment(_) => f.write_str("FromAttachment(..)"),
        }
    }
}

impl From<&str> for Bucket {
    fn from(name: &str) -> Self {
        Self::Fixed(name.to_string())
    }
}

impl From<String> for Bucket {
    fn from(name: String) -> Self {
        Self::Fixed(name)
    }
}

/// Storage backend configuration. Immutable after construction.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Bucket holding the attachment objects.
    pub bucket: Bucket,
    /// Access policy applied to uploads.
    pub permissions: Permissions,
    /// Extra headers sent with each upload.
    pub headers: HashMap<String, String>,
    /// Override for the URL host; the well-known provider host otherwise.
    pub host_alias: Option<String>,
    /// Deadline for each individual remote call.
    pub timeout: Duration,
    protocol: Option<Protocol>,
}

impl StorageConfig {
    /// Default per-call timeout: 30 seconds.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a configuration for `bucket` with default settings.
    #[must_use]
    pub fn new(bucket: impl Into<Bucket>) -> Self {
        Self {
            bucket: bucket.into(),
            permissions: Permissions::PublicRead,
            headers: HashMap::new(),
            host_alias: None,
            timeout: Self::DEFAULT_TIMEOUT,
            protocol: None,
        }
    }

    /// Set the access policy applied to uploads.
    #[must_use]
    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }

    /// Override the URL protocol instead of deriving it from permissions.
    #[must_use]
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Set extra headers sent with each upload.
    #[must_use]
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Serve generated URLs from `host` instead of the provider host.
    #[must_use]
    pub fn with_host_alias(mut self, host: impl Into<String>) -> Self {
        self.host_alias = Some(host.into());
        self
    }

    /// Set the per-call deadline for remote operations.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The effective URL protocol: the explicit override if one was given,
    /// otherwise derived from the access policy.
    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.protocol
            .unwrap_or_else(|| Protocol::for_permissions(self.permissions))
    }

    /// Check the configuration for problems that must surface at
    /// construction time.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the offending field.
    pub fn validate(&self) -> Result<(), StorageError> {
        if let Some(name) = self.bucket.fixed_name()
            && name.trim().is_empty()
        {
            return Err(StorageError::configuration(
                "'bucket' must not be empty (received an empty string)",
            ));
        }
        Ok(())
    }
}
