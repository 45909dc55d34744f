//! Deferred write and delete queues.
//!
//! Attachments are staged locally and only committed to the remote store
//! when the host framework flushes at its commit boundary. A flush
//! attempts every staged entry in insertion order, removes the successes,
//! and retains the failures for a later attempt.

use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use bytes::Bytes;
use tokio::time::timeout;
use tracing::{error, info};

use crate::attachment::{Attachment, Style};
use crate::client::ObjectClient;
use crate::config::{ACL_HEADER, StorageConfig};
use crate::error::{ClientError, FlushFailure, StorageError};
use crate::key;

/// A write staged for the next commit.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    /// Style the payload belongs to.
    pub style: Style,
    /// The attachment content for that style.
    pub payload: Bytes,
}

/// Locally backed handle over attachment content for one style.
///
/// A pending style materializes over its staged payload bytes; a style
/// with nothing staged gets a fresh, empty, writable handle.
#[derive(Debug)]
pub struct LocalCopy {
    style: Style,
    pending: bool,
    cursor: Cursor<Vec<u8>>,
}

impl LocalCopy {
    fn over_payload(style: Style, payload: &Bytes) -> Self {
        Self {
            style,
            pending: true,
            cursor: Cursor::new(payload.to_vec()),
        }
    }

    fn fresh(style: Style) -> Self {
        Self {
            style,
            pending: false,
            cursor: Cursor::new(Vec::new()),
        }
    }

    /// The style this handle belongs to.
    #[must_use]
    pub fn style(&self) -> &Style {
        &self.style
    }

    /// Whether the handle was materialized from a staged write.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Length of the buffered content in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cursor.get_ref().len()
    }

    /// Whether the buffered content is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cursor.get_ref().is_empty()
    }

    /// Consume the handle, yielding the buffered content.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.cursor.into_inner())
    }
}

impl Read for LocalCopy {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Write for LocalCopy {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.cursor.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.cursor.flush()
    }
}

impl Seek for LocalCopy {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.cursor.seek(pos)
    }
}

/// Styles staged for upload, in insertion order.
#[derive(Debug, Default)]
pub struct WriteQueue {
    entries: Vec<PendingWrite>,
}

impl WriteQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `payload` for `style`.
    ///
    /// A style staged twice keeps its original queue position; the later
    /// payload wins.
    pub fn enqueue(&mut self, style: Style, payload: Bytes) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.style == style) {
            entry.payload = payload;
        } else {
            self.entries.push(PendingWrite { style, payload });
        }
    }

    /// The staged entry for `style`, if any.
    #[must_use]
    pub fn get(&self, style: &Style) -> Option<&PendingWrite> {
        self.entries.iter().find(|e| e.style == *style)
    }

    /// Number of staged entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Local handle for `style`: over the staged payload when pending,
    /// fresh and empty otherwise.
    #[must_use]
    pub fn materialize(&self, style: &Style) -> LocalCopy {
        match self.get(style) {
            Some(entry) => LocalCopy::over_payload(style.clone(), &entry.payload),
            None => LocalCopy::fresh(style.clone()),
        }
    }

    /// Merge entries retained by a flush back in, ahead of anything staged
    /// since; a style staged on both sides keeps the newer payload.
    pub fn absorb_retained(&mut self, mut retained: Self) {
        for entry in self.entries.drain(..) {
            retained.enqueue(entry.style, entry.payload);
        }
        self.entries = retained.entries;
    }

    /// Upload every staged entry in insertion order.
    ///
    /// Successes are removed from the queue; failures are retained for a
    /// later attempt and reported together, each with its storage key.
    /// Entries are independent, so one failure never rolls back another
    /// entry's upload.
    ///
    /// Cancellation safe: an entry leaves the queue only after its upload
    /// completed, so dropping the future mid-flush keeps every entry that
    /// was not confirmed uploaded.
    pub async fn flush<C: ObjectClient>(
        &mut self,
        client: &C,
        config: &StorageConfig,
        attachment: &dyn Attachment,
    ) -> Result<(), StorageError> {
        let mut headers = config.headers.clone();
        headers.insert(
            ACL_HEADER.to_string(),
            config.permissions.header_value().to_string(),
        );
        let bucket = config.bucket.name_for(attachment);

        let mut failures = Vec::new();
        let mut index = 0;

        while index < self.entries.len() {
            let key = key::key_for(attachment, &self.entries[index].style);
            info!("saving {key}");

            let payload = self.entries[index].payload.clone();
            let put = client.put_object(&bucket, &key, payload, &headers);
            match timeout(config.timeout, put).await {
                Ok(Ok(())) => {
                    self.entries.remove(index);
                }
                Ok(Err(err)) => {
                    error!("failed to save {key}: {err}");
                    failures.push(FlushFailure {
                        key,
                        message: err.to_string(),
                    });
                    index += 1;
                }
                Err(_) => {
                    let err = elapsed(config);
                    error!("failed to save {key}: {err}");
                    failures.push(FlushFailure {
                        key,
                        message: err.to_string(),
                    });
                    index += 1;
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(StorageError::FlushIncomplete { failures })
        }
    }
}

/// Storage keys staged for deletion, in insertion order.
#[derive(Debug, Default)]
pub struct DeleteQueue {
    keys: Vec<String>,
}

impl DeleteQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage the object at `key` for removal.
    pub fn enqueue(&mut self, key: impl Into<String>) {
        self.keys.push(key.into());
    }

    /// Number of staged keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Merge keys retained by a flush back in, ahead of anything staged
    /// since.
    pub fn absorb_retained(&mut self, mut retained: Self) {
        retained.keys.append(&mut self.keys);
        self.keys = retained.keys;
    }

    /// Delete every staged key in insertion order.
    ///
    /// Same accounting as [`WriteQueue::flush`]: successes leave the
    /// queue, failures stay and are reported together, and dropping the
    /// future mid-flush keeps every key not confirmed deleted.
    pub async fn flush<C: ObjectClient>(
        &mut self,
        client: &C,
        config: &StorageConfig,
    ) -> Result<(), StorageError> {
        let Some(bucket) = config.bucket.fixed_name() else {
            return Err(StorageError::configuration(
                "attachment-derived bucket is not resolved; construct the adapter first or use a fixed bucket name",
            ));
        };
        let bucket = bucket.to_string();

        let mut failures = Vec::new();
        let mut index = 0;

        while index < self.keys.len() {
            let key = self.keys[index].clone();
            info!("deleting {key}");

            let delete = client.delete_object(&bucket, &key);
            match timeout(config.timeout, delete).await {
                Ok(Ok(())) => {
                    self.keys.remove(index);
                }
                Ok(Err(err)) => {
                    error!("failed to delete {key}: {err}");
                    failures.push(FlushFailure {
                        key,
                        message: err.to_string(),
                    });
                    index += 1;
                }
                Err(_) => {
                    let err = elapsed(config);
                    error!("failed to delete {key}: {err}");
                    failures.push(FlushFailure {
                        key,
                        message: err.to_string(),
                    });
                    index += 1;
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(StorageError::FlushIncomplete { failures })
        }
    }
}

fn elapsed(config: &StorageConfig) -> ClientError {
    ClientError::timeout(format!("timed out after {:?}", config.timeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// Mock client recording calls, with per-key failure injection.
    struct RecordingClient {
        puts: Mutex<Vec<(String, String, Bytes)>>,
        deletes: Mutex<Vec<(String, String)>>,
        headers_seen: Mutex<Vec<HashMap<String, String>>>,
        fail_keys: HashSet<String>,
    }

    impl RecordingClient {
        fn new() -> Self {
            Self::failing_on([])
        }

        fn failing_on<const N: usize>(keys: [&str; N]) -> Self {
            Self {
                puts: Mutex::new(Vec::new()),
                deletes: Mutex::new(Vec::new()),
                headers_seen: Mutex::new(Vec::new()),
                fail_keys: keys.iter().map(ToString::to_string).collect(),
            }
        }

        fn put_keys(&self) -> Vec<String> {
            self.puts
                .lock()
                .unwrap()
                .iter()
                .map(|(_, k, _)| k.clone())
                .collect()
        }

        fn deleted_keys(&self) -> Vec<String> {
            self.deletes
                .lock()
                .unwrap()
                .iter()
                .map(|(_, k)| k.clone())
                .collect()
        }
    }

    impl ObjectClient for RecordingClient {
        async fn put_object(
            &self,
            bucket: &str,
            key: &str,
            data: Bytes,
            headers: &HashMap<String, String>,
        ) -> Result<(), ClientError> {
            if self.fail_keys.contains(key) {
                return Err(ClientError::transport("injected failure"));
            }
            self.headers_seen.lock().unwrap().push(headers.clone());
            self.puts
                .lock()
                .unwrap()
                .push((bucket.to_string(), key.to_string(), data));
            Ok(())
        }

        async fn get_object(&self, _bucket: &str, key: &str) -> Result<Bytes, ClientError> {
            Err(ClientError::not_found(key))
        }

        async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ClientError> {
            if self.fail_keys.contains(key) {
                return Err(ClientError::transport("injected failure"));
            }
            self.deletes
                .lock()
                .unwrap()
                .push((bucket.to_string(), key.to_string()));
            Ok(())
        }
    }

    struct PhotoAttachment;

    impl Attachment for PhotoAttachment {
        fn styles(&self) -> Vec<Style> {
            vec![Style::new("original"), Style::new("thumb")]
        }

        fn default_style(&self) -> Style {
            Style::new("original")
        }

        fn path(&self, style: &Style) -> String {
            format!("photos/1/{style}.jpg")
        }
    }

    fn config() -> StorageConfig {
        StorageConfig::new("assets")
    }

    #[test]
    fn test_last_write_wins_keeps_position() {
        let mut queue = WriteQueue::new();
        queue.enqueue(Style::new("original"), Bytes::from_static(b"first"));
        queue.enqueue(Style::new("thumb"), Bytes::from_static(b"tiny"));
        queue.enqueue(Style::new("original"), Bytes::from_static(b"second"));

        assert_eq!(queue.len(), 2);
        let pending = queue.get(&Style::new("original")).unwrap();
        assert_eq!(pending.payload, Bytes::from_static(b"second"));
    }

    #[test]
    fn test_materialize_pending_carries_payload_bytes() {
        let mut queue = WriteQueue::new();
        queue.enqueue(Style::new("original"), Bytes::from_static(b"jpeg bytes"));

        let mut copy = queue.materialize(&Style::new("original"));
        assert!(copy.is_pending());
        let mut content = Vec::new();
        copy.read_to_end(&mut content).unwrap();
        assert_eq!(content, b"jpeg bytes");
    }

    #[test]
    fn test_materialize_unknown_style_is_fresh_and_writable() {
        let queue = WriteQueue::new();
        let mut copy = queue.materialize(&Style::new("thumb"));
        assert!(!copy.is_pending());
        assert!(copy.is_empty());

        copy.write_all(b"new content").unwrap();
        copy.rewind().unwrap();
        let mut content = Vec::new();
        copy.read_to_end(&mut content).unwrap();
        assert_eq!(content, b"new content");
    }

    #[tokio::test]
    async fn test_flush_uploads_in_order_and_clears() {
        let client = RecordingClient::new();
        let mut queue = WriteQueue::new();
        queue.enqueue(Style::new("original"), Bytes::from_static(b"big"));
        queue.enqueue(Style::new("thumb"), Bytes::from_static(b"small"));

        queue
            .flush(&client, &config(), &PhotoAttachment)
            .await
            .unwrap();

        assert!(queue.is_empty());
        assert_eq!(
            client.put_keys(),
            vec!["photos/1/original.jpg", "photos/1/thumb.jpg"]
        );
    }

    #[tokio::test]
    async fn test_flush_sends_acl_header_and_extra_headers() {
        let client = RecordingClient::new();
        let mut headers = HashMap::new();
        headers.insert("cache-control".to_string(), "max-age=300".to_string());
        let config = StorageConfig::new("assets").with_headers(headers);

        let mut queue = WriteQueue::new();
        queue.enqueue(Style::new("original"), Bytes::from_static(b"big"));
        queue.flush(&client, &config, &PhotoAttachment).await.unwrap();

        let seen = client.headers_seen.lock().unwrap();
        assert_eq!(seen[0].get("x-goog-acl").unwrap(), "public-read");
        assert_eq!(seen[0].get("cache-control").unwrap(), "max-age=300");
    }

    #[tokio::test]
    async fn test_flush_last_write_wins_one_put() {
        let client = RecordingClient::new();
        let mut queue = WriteQueue::new();
        queue.enqueue(Style::new("original"), Bytes::from_static(b"first"));
        queue.enqueue(Style::new("original"), Bytes::from_static(b"second"));

        queue
            .flush(&client, &config(), &PhotoAttachment)
            .await
            .unwrap();

        let puts = client.puts.lock().unwrap();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].2, Bytes::from_static(b"second"));
    }

    #[tokio::test]
    async fn test_partial_failure_retains_only_failed_entries() {
        let client = RecordingClient::failing_on(["photos/1/thumb.jpg"]);
        let mut queue = WriteQueue::new();
        queue.enqueue(Style::new("original"), Bytes::from_static(b"big"));
        queue.enqueue(Style::new("thumb"), Bytes::from_static(b"small"));

        let err = queue
            .flush(&client, &config(), &PhotoAttachment)
            .await
            .unwrap_err();

        assert_eq!(err.failed_keys(), vec!["photos/1/thumb.jpg"]);
        assert_eq!(queue.len(), 1);
        assert!(queue.get(&Style::new("thumb")).is_some());
        assert!(queue.get(&Style::new("original")).is_none());
        assert_eq!(client.put_keys(), vec!["photos/1/original.jpg"]);
    }

    #[tokio::test]
    async fn test_retry_after_partial_failure_succeeds() {
        let failing = RecordingClient::failing_on(["photos/1/thumb.jpg"]);
        let mut queue = WriteQueue::new();
        queue.enqueue(Style::new("original"), Bytes::from_static(b"big"));
        queue.enqueue(Style::new("thumb"), Bytes::from_static(b"small"));

        let _ = queue.flush(&failing, &config(), &PhotoAttachment).await;

        let healthy = RecordingClient::new();
        queue
            .flush(&healthy, &config(), &PhotoAttachment)
            .await
            .unwrap();
        assert!(queue.is_empty());
        assert_eq!(healthy.put_keys(), vec!["photos/1/thumb.jpg"]);
    }

    #[tokio::test]
    async fn test_flush_empty_queue_is_a_no_op() {
        let client = RecordingClient::new();
        let mut queue = WriteQueue::new();
        queue
            .flush(&client, &config(), &PhotoAttachment)
            .await
            .unwrap();
        assert!(client.put_keys().is_empty());
    }

    #[test]
    fn test_absorb_retained_prefers_newer_payload() {
        let mut retained = WriteQueue::new();
        retained.enqueue(Style::new("original"), Bytes::from_static(b"old"));
        retained.enqueue(Style::new("thumb"), Bytes::from_static(b"tiny"));

        let mut queue = WriteQueue::new();
        queue.enqueue(Style::new("original"), Bytes::from_static(b"newer"));
        queue.absorb_retained(retained);

        assert_eq!(queue.len(), 2);
        assert_eq!(
            queue.get(&Style::new("original")).unwrap().payload,
            Bytes::from_static(b"newer")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_timeout_retains_entry() {
        struct StallingClient;

        impl ObjectClient for StallingClient {
            async fn put_object(
                &self,
                _bucket: &str,
                _key: &str,
                _data: Bytes,
                _headers: &HashMap<String, String>,
            ) -> Result<(), ClientError> {
                tokio::time::sleep(std::time::Duration::from_secs(120)).await;
                Ok(())
            }

            async fn get_object(&self, _bucket: &str, key: &str) -> Result<Bytes, ClientError> {
                Err(ClientError::not_found(key))
            }

            async fn delete_object(&self, _bucket: &str, _key: &str) -> Result<(), ClientError> {
                Ok(())
            }
        }

        let config = StorageConfig::new("assets")
            .with_timeout(std::time::Duration::from_secs(1));
        let mut queue = WriteQueue::new();
        queue.enqueue(Style::new("original"), Bytes::from_static(b"big"));

        let err = queue
            .flush(&StallingClient, &config, &PhotoAttachment)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("timed out"));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_flush_in_order_and_clears() {
        let client = RecordingClient::new();
        let mut queue = DeleteQueue::new();
        queue.enqueue("photos/1/original.jpg");
        queue.enqueue("photos/1/thumb.jpg");

        queue.flush(&client, &config()).await.unwrap();

        assert!(queue.is_empty());
        assert_eq!(
            client.deleted_keys(),
            vec!["photos/1/original.jpg", "photos/1/thumb.jpg"]
        );
    }

    #[tokio::test]
    async fn test_delete_partial_failure_retains_failed_key() {
        let client = RecordingClient::failing_on(["photos/1/original.jpg"]);
        let mut queue = DeleteQueue::new();
        queue.enqueue("photos/1/original.jpg");
        queue.enqueue("photos/1/thumb.jpg");

        let err = queue.flush(&client, &config()).await.unwrap_err();

        assert_eq!(err.failed_keys(), vec!["photos/1/original.jpg"]);
        assert_eq!(queue.len(), 1);
        assert_eq!(client.deleted_keys(), vec!["photos/1/thumb.jpg"]);
    }

    #[tokio::test]
    async fn test_flush_resolves_bucket_from_attachment() {
        let client = RecordingClient::new();
        let config = StorageConfig::new(crate::config::Bucket::from_attachment(|_| {
            "per-attachment".to_string()
        }));
        let mut queue = WriteQueue::new();
        queue.enqueue(Style::new("original"), Bytes::from_static(b"big"));

        queue.flush(&client, &config, &PhotoAttachment).await.unwrap();

        let puts = client.puts.lock().unwrap();
        assert_eq!(puts[0].0, "per-attachment");
    }

    #[tokio::test]
    async fn test_delete_flush_requires_fixed_bucket() {
        let client = RecordingClient::new();
        let config = StorageConfig::new(crate::config::Bucket::from_attachment(|_| {
            "per-attachment".to_string()
        }));
        let mut queue = DeleteQueue::new();
        queue.enqueue("photos/1/original.jpg");

        let err = queue.flush(&client, &config).await.unwrap_err();

        assert!(matches!(err, StorageError::Configuration(_)));
        assert_eq!(queue.len(), 1);
        assert!(client.deleted_keys().is_empty());
    }
}
