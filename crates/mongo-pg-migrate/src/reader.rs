//! Batched, forward-only reading of a source collection.

use futures::stream::{self, Stream};
use std::time::Duration;
use tracing::{info, warn};

use crate::connectors::{RejectedDocument, SourceConnector};
use crate::error::Result;
use crate::record::SourceRecord;
use crate::retry::{with_retry, with_timeout, RetryConfig};

/// A page of source documents; the unit of transfer and commit.
#[derive(Debug, Clone)]
pub struct Batch {
    /// 1-based position of the batch in the run.
    pub index: u64,
    /// Number of documents emitted before this batch.
    pub offset: u64,
    /// Documents in source order.
    pub records: Vec<SourceRecord>,
    /// Documents of this page that could not be read as records.
    pub rejected: Vec<RejectedDocument>,
}

impl Batch {
    /// Number of readable documents in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the batch holds no readable documents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Documents read from the source, including rejected ones.
    #[must_use]
    pub fn fetched(&self) -> usize {
        self.records.len() + self.rejected.len()
    }
}

/// Pages through a source in fixed-size batches.
///
/// The sequence ends after a short page or an empty one and cannot be
/// restarted.
pub struct BatchReader<'a> {
    source: &'a dyn SourceConnector,
    batch_size: usize,
    total: u64,
    emitted: u64,
    next_index: u64,
    finished: bool,
    retry: RetryConfig,
    timeout: Duration,
}

impl<'a> BatchReader<'a> {
    /// Opens a reader and takes the total document count.
    ///
    /// # Errors
    ///
    /// Returns an error if the count cannot be obtained.
    pub async fn open(
        source: &'a dyn SourceConnector,
        batch_size: usize,
        retry: RetryConfig,
        timeout: Duration,
    ) -> Result<Self> {
        let total = with_retry(&retry, "count_documents", || {
            with_timeout(timeout, "count_documents", source.count())
        })
        .await?;

        info!("Found {} documents in {} source", total, source.source_type());
        if total == 0 {
            warn!("No documents found in source collection");
        }

        Ok(Self {
            source,
            batch_size: batch_size.max(1),
            total,
            emitted: 0,
            next_index: 1,
            finished: false,
            retry,
            timeout,
        })
    }

    /// Document count taken when the reader was opened.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Documents handed out so far.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Fetches the next batch, or `None` once the collection is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if the page cannot be fetched after retries.
    pub async fn next_batch(&mut self) -> Result<Option<Batch>> {
        if self.finished {
            return Ok(None);
        }

        let source = self.source;
        let skip = self.emitted;
        let limit = self.batch_size;
        let timeout = self.timeout;

        let mut page = with_retry(&self.retry, "fetch_page", || {
            with_timeout(timeout, "fetch_page", source.fetch_page(skip, limit))
        })
        .await?;

        if page.is_empty() {
            self.finished = true;
            return Ok(None);
        }
        if page.len() < limit {
            self.finished = true;
        }
        if page.len() > limit {
            let page_end = skip + limit as u64;
            page.rejected.retain(|r| r.position < page_end);
            page.records.truncate(limit.saturating_sub(page.rejected.len()));
        }

        let batch = Batch {
            index: self.next_index,
            offset: skip,
            records: page.records,
            rejected: page.rejected,
        };
        self.emitted += batch.fetched() as u64;
        self.next_index += 1;

        info!(
            "Processing {} documents. Progress: {}/{}",
            batch.fetched(),
            self.emitted,
            self.total
        );

        Ok(Some(batch))
    }

    /// Turns the reader into a lazy stream of batches.
    pub fn into_stream(self) -> impl Stream<Item = Result<Batch>> + Send + 'a {
        stream::try_unfold(self, |mut reader| async move {
            Ok(reader.next_batch().await?.map(|batch| (batch, reader)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::Page;
    use crate::error::Error;
    use async_trait::async_trait;
    use futures::TryStreamExt;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct VecSource {
        docs: Vec<serde_json::Value>,
        fail_first_fetches: AtomicU32,
    }

    impl VecSource {
        fn with_docs(n: usize) -> Self {
            Self::from_values((0..n).map(|i| serde_json::json!({"_id": format!("doc-{i}")})))
        }

        fn from_values(docs: impl IntoIterator<Item = serde_json::Value>) -> Self {
            Self {
                docs: docs.into_iter().collect(),
                fail_first_fetches: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl SourceConnector for VecSource {
        fn source_type(&self) -> &'static str {
            "vec"
        }

        async fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        async fn count(&self) -> Result<u64> {
            Ok(self.docs.len() as u64)
        }

        async fn fetch_page(&self, skip: u64, limit: usize) -> Result<Page> {
            if self.fail_first_fetches.load(Ordering::SeqCst) > 0 {
                self.fail_first_fetches.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::SourceConnection("connection reset".to_string()));
            }
            let start = (skip as usize).min(self.docs.len());
            let end = (start + limit).min(self.docs.len());
            Ok(Page::from_documents(self.docs[start..end].iter().cloned(), start as u64, "_id"))
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            add_jitter: false,
            ..RetryConfig::default()
        }
    }

    #[tokio::test]
    async fn test_batches_cover_collection_once() {
        let source = VecSource::with_docs(7);
        let reader = BatchReader::open(&source, 3, fast_retry(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(reader.total(), 7);

        let batches: Vec<Batch> = reader.into_stream().try_collect().await.unwrap();

        let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(batches[2].index, 3);
        assert_eq!(batches[2].offset, 6);
        assert_eq!(batches[2].records[0].id.as_deref(), Some("doc-6"));
    }

    #[tokio::test]
    async fn test_exact_multiple_ends_on_empty_page() {
        let source = VecSource::with_docs(4);
        let mut reader = BatchReader::open(&source, 2, fast_retry(), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(reader.next_batch().await.unwrap().unwrap().len(), 2);
        assert_eq!(reader.next_batch().await.unwrap().unwrap().len(), 2);
        assert!(reader.next_batch().await.unwrap().is_none());
        assert!(reader.next_batch().await.unwrap().is_none());
        assert_eq!(reader.emitted(), 4);
    }

    #[tokio::test]
    async fn test_empty_collection_yields_nothing() {
        let source = VecSource::with_docs(0);
        let mut reader = BatchReader::open(&source, 10, fast_retry(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(reader.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transient_fetch_failure_is_retried() {
        let source = VecSource::with_docs(2);
        source.fail_first_fetches.store(2, Ordering::SeqCst);
        let mut reader = BatchReader::open(&source, 5, fast_retry(), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(reader.next_batch().await.unwrap().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_persistent_fetch_failure_is_fatal() {
        let source = VecSource::with_docs(2);
        source.fail_first_fetches.store(10, Ordering::SeqCst);
        let mut reader = BatchReader::open(&source, 5, fast_retry(), Duration::from_secs(5))
            .await
            .unwrap();

        assert!(reader.next_batch().await.is_err());
    }

    #[tokio::test]
    async fn test_rejected_documents_still_advance_paging() {
        let source = VecSource::from_values([
            serde_json::json!({"_id": "a"}),
            serde_json::json!("not a document"),
            serde_json::json!({"_id": "c"}),
            serde_json::json!({"_id": "d"}),
        ]);
        let mut reader = BatchReader::open(&source, 2, fast_retry(), Duration::from_secs(5))
            .await
            .unwrap();

        let first = reader.next_batch().await.unwrap().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first.fetched(), 2);
        assert_eq!(first.rejected[0].position, 1);

        let second = reader.next_batch().await.unwrap().unwrap();
        assert_eq!(second.offset, 2);
        let ids: Vec<_> = second.records.iter().map(|r| r.id.as_deref()).collect();
        assert_eq!(ids, vec![Some("c"), Some("d")]);

        assert!(reader.next_batch().await.unwrap().is_none());
        assert_eq!(reader.emitted(), 4);
    }
}
