//! Deferred-commit object storage backend for file-attachment pipelines.
//!
//! A host attachment framework stages writes and deletes against this
//! backend while it mutates its own records, then commits both at its
//! save/destroy boundaries. The backend presents one narrow contract —
//! exists, local copy, flush writes, flush deletes, URL — regardless of
//! where the objects land.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ host framework                                                │
//! │   enqueue_write / enqueue_delete          flush at commit     │
//! └───────────────┬───────────────────────────────┬───────────────┘
//!                 ▼                               ▼
//!         WriteQueue / DeleteQueue ──────► StorageAdapter
//!                                               │
//!                         ObjectClient (OpenDAL)│ put / get / delete
//!                                               ▼
//!                                        remote object store
//! ```
//!
//! Credentials come from a path, an open reader, or an in-memory mapping,
//! optionally scoped by deployment environment; they are resolved once at
//! adapter construction. Public URLs are synthesized deterministically
//! from the bucket, the computed storage key, and the configured protocol
//! and host.

mod adapter;
mod attachment;
mod client;
mod config;
mod credentials;
mod error;
mod key;
mod queue;

pub use adapter::{StorageAdapter, StorageBackend};
pub use attachment::{Attachment, InterpolationRegistry, PATH_URL_INTERPOLATION, Style};
pub use client::{AclMode, INTEROP_ENDPOINT, ObjectClient, OpendalClient, StorageProvider};
pub use config::{ACL_HEADER, Bucket, Permissions, Protocol, StorageConfig};
pub use credentials::{CredentialSource, Credentials};
pub use error::{ClientError, ClientErrorKind, FlushFailure, QueueKind, StorageError};
pub use key::{STORAGE_HOST, key_for, url_for};
pub use queue::{DeleteQueue, LocalCopy, PendingWrite, WriteQueue};
