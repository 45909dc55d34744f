//! The storage adapter composing credentials, queues, and the remote
//! client behind the uniform backend contract.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::time::timeout;

use crate::attachment::{Attachment, InterpolationRegistry, PATH_URL_INTERPOLATION, Style};
use crate::client::{AclMode, ObjectClient, OpendalClient, StorageProvider};
use crate::config::{Bucket, StorageConfig};
use crate::credentials::{CredentialSource, Credentials};
use crate::error::{QueueKind, StorageError};
use crate::key;
use crate::queue::{DeleteQueue, LocalCopy, WriteQueue};

/// Uniform backend contract the host framework drives.
///
/// The host invokes the flush hooks at its own commit boundaries
/// (typically after save and after destroy); the adapter never decides
/// when a commit happens.
pub trait StorageBackend: Send + Sync {
    /// Whether the object for `style` exists remotely.
    ///
    /// A clean miss is `Ok(false)`; only transport-level failure is an
    /// error, so callers can tell "absent" from "unknown".
    fn exists(
        &self,
        style: &Style,
    ) -> impl std::future::Future<Output = Result<bool, StorageError>> + Send;

    /// Local handle for `style`: the staged payload if one is pending, a
    /// fresh empty handle otherwise.
    fn to_local_copy(&self, style: &Style) -> LocalCopy;

    /// Commit every staged write to the remote store.
    fn flush_writes(&self)
    -> impl std::future::Future<Output = Result<(), StorageError>> + Send;

    /// Commit every staged delete to the remote store.
    fn flush_deletes(&self)
    -> impl std::future::Future<Output = Result<(), StorageError>> + Send;

    /// Public URL for `style`.
    fn url(&self, style: &Style) -> String;
}

/// Storage adapter for one attachment.
///
/// Owns its write and delete queues exclusively; attachments needing
/// concurrent handling get one adapter each.
pub struct StorageAdapter<C: ObjectClient, A: Attachment> {
    client: C,
    config: StorageConfig,
    attachment: Arc<A>,
    writes: Mutex<WriteQueue>,
    deletes: Mutex<DeleteQueue>,
    flushing_writes: AtomicBool,
    flushing_deletes: AtomicBool,
}

impl<A: Attachment> StorageAdapter<OpendalClient, A> {
    /// Resolve credentials, build the OpenDAL-backed client, and construct
    /// the adapter.
    ///
    /// All configuration problems surface here, never at first use, and
    /// credentials are read from their source exactly once. An
    /// attachment-derived bucket is resolved against `attachment` here and
    /// stays fixed for the adapter's lifetime. The client elides the
    /// per-object ACL header in favor of bucket policy; build the client
    /// yourself with [`AclMode::Reject`] and [`StorageAdapter::new`] to
    /// refuse such uploads instead.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unusable credential source or
    /// configuration.
    pub fn connect(
        provider: &StorageProvider,
        source: CredentialSource,
        environment: &str,
        config: StorageConfig,
        attachment: Arc<A>,
    ) -> Result<Self, StorageError> {
        let credentials = Credentials::resolve(source, environment)?;
        let bucket = config.bucket.name_for(attachment.as_ref());
        let client = OpendalClient::new(provider, &credentials, &bucket, AclMode::BucketPolicy)?;
        Self::new(client, config, attachment)
    }
}

impl<C: ObjectClient, A: Attachment> StorageAdapter<C, A> {
    /// Construct an adapter over an already built client.
    ///
    /// An attachment-derived bucket is resolved against `attachment` once
    /// here, so every later operation sees a fixed bucket name.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the configuration is invalid.
    pub fn new(
        client: C,
        mut config: StorageConfig,
        attachment: Arc<A>,
    ) -> Result<Self, StorageError> {
        config.bucket = Bucket::Fixed(config.bucket.name_for(attachment.as_ref()));
        config.validate()?;
        Ok(Self {
            client,
            config,
            attachment,
            writes: Mutex::new(WriteQueue::new()),
            deletes: Mutex::new(DeleteQueue::new()),
            flushing_writes: AtomicBool::new(false),
            flushing_deletes: AtomicBool::new(false),
        })
    }

    /// Stage `payload` for `style` until the next write flush. The later
    /// payload wins when a style is staged twice.
    pub fn enqueue_write(&self, style: Style, payload: Bytes) {
        self.lock_writes().enqueue(style, payload);
    }

    /// Stage the object at `key` for removal at the next delete flush.
    pub fn enqueue_delete(&self, key: impl Into<String>) {
        self.lock_deletes().enqueue(key);
    }

    /// Number of writes staged and not yet flushed.
    pub fn pending_writes(&self) -> usize {
        self.lock_writes().len()
    }

    /// Number of deletes staged and not yet flushed.
    pub fn pending_deletes(&self) -> usize {
        self.lock_deletes().len()
    }

    /// The style operations default to when none is given.
    pub fn default_style(&self) -> Style {
        self.attachment.default_style()
    }

    /// Existence probe for [`default_style`](Self::default_style).
    ///
    /// # Errors
    ///
    /// Same contract as [`StorageBackend::exists`].
    pub async fn exists_default(&self) -> Result<bool, StorageError> {
        let style = self.default_style();
        self.exists(&style).await
    }

    /// Local handle for [`default_style`](Self::default_style).
    pub fn to_local_copy_default(&self) -> LocalCopy {
        self.to_local_copy(&self.default_style())
    }

    /// The adapter configuration.
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Register the `storage_path_url` interpolation with the host's URL
    /// registry, so the host can resolve public URLs on its own.
    pub fn register_interpolations(&self, registry: &mut impl InterpolationRegistry)
    where
        A: 'static,
    {
        let attachment = Arc::clone(&self.attachment);
        let config = self.config.clone();
        registry.register(
            PATH_URL_INTERPOLATION,
            Box::new(move |style| key::url_for(attachment.as_ref(), style, &config)),
        );
    }

    fn lock_writes(&self) -> MutexGuard<'_, WriteQueue> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_deletes(&self) -> MutexGuard<'_, DeleteQueue> {
        self.deletes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A queue the adapter stages out of its mutex for the duration of a flush.
trait PendingQueue: Default {
    fn absorb_retained(&mut self, retained: Self);
    fn is_empty(&self) -> bool;
}

impl PendingQueue for WriteQueue {
    fn absorb_retained(&mut self, retained: Self) {
        WriteQueue::absorb_retained(self, retained);
    }

    fn is_empty(&self) -> bool {
        WriteQueue::is_empty(self)
    }
}

impl PendingQueue for DeleteQueue {
    fn absorb_retained(&mut self, retained: Self) {
        DeleteQueue::absorb_retained(self, retained);
    }

    fn is_empty(&self) -> bool {
        DeleteQueue::is_empty(self)
    }
}

/// Holds the staged queue while its mutex is released for the remote
/// calls. On drop, whether the flush returned or its future was dropped
/// mid-await, unflushed entries go back behind anything staged meanwhile
/// and the in-flight flag is cleared.
struct FlushGuard<'a, Q: PendingQueue> {
    queue: &'a Mutex<Q>,
    flag: &'a AtomicBool,
    staged: Q,
}

impl<Q: PendingQueue> Drop for FlushGuard<'_, Q> {
    fn drop(&mut self) {
        let staged = std::mem::take(&mut self.staged);
        if !staged.is_empty() {
            self.queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .absorb_retained(staged);
        }
        self.flag.store(false, Ordering::Release);
    }
}

impl<C: ObjectClient, A: Attachment> StorageBackend for StorageAdapter<C, A> {
    async fn exists(&self, style: &Style) -> Result<bool, StorageError> {
        let key = key::key_for(self.attachment.as_ref(), style);
        let bucket = self.config.bucket.name_for(self.attachment.as_ref());
        let get = self.client.get_object(&bucket, &key);
        match timeout(self.config.timeout, get).await {
            Ok(Ok(_)) => Ok(true),
            Ok(Err(err)) if err.is_not_found() => Ok(false),
            Ok(Err(err)) => Err(StorageError::remote(key, err.to_string())),
            Err(_) => Err(StorageError::remote(
                key,
                format!("timed out after {:?}", self.config.timeout),
            )),
        }
    }

    fn to_local_copy(&self, style: &Style) -> LocalCopy {
        self.lock_writes().materialize(style)
    }

    async fn flush_writes(&self) -> Result<(), StorageError> {
        if self.flushing_writes.swap(true, Ordering::Acquire) {
            return Err(StorageError::QueueBusy {
                queue: QueueKind::Writes,
            });
        }

        let mut guard = FlushGuard {
            queue: &self.writes,
            flag: &self.flushing_writes,
            staged: std::mem::take(&mut *self.lock_writes()),
        };
        guard
            .staged
            .flush(&self.client, &self.config, self.attachment.as_ref())
            .await
    }

    async fn flush_deletes(&self) -> Result<(), StorageError> {
        if self.flushing_deletes.swap(true, Ordering::Acquire) {
            return Err(StorageError::QueueBusy {
                queue: QueueKind::Deletes,
            });
        }

        let mut guard = FlushGuard {
            queue: &self.deletes,
            flag: &self.flushing_deletes,
            staged: std::mem::take(&mut *self.lock_deletes()),
        };
        guard.staged.flush(&self.client, &self.config).await
    }

    fn url(&self, style: &Style) -> String {
        key::url_for(self.attachment.as_ref(), style, &self.config)
    }
}
