use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity.
#[derive(Default)]
pub struct PipelineMetrics {
    extractions_completed: AtomicU64,
    extractions_failed: AtomicU64,
    documents_indexed: AtomicU64,
    chunks_indexed: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successfully completed extraction job.
    pub fn record_extraction_completed(&self) {
        self.extractions_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an extraction job that terminated in the failed state.
    pub fn record_extraction_failed(&self) {
        self.extractions_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an indexed document and the number of chunks produced for it.
    pub fn record_document_indexed(&self, chunk_count: u64) {
        self.documents_indexed.fetch_add(1, Ordering::Relaxed);
        self.chunks_indexed.fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            extractions_completed: self.extractions_completed.load(Ordering::Relaxed),
            extractions_failed: self.extractions_failed.load(Ordering::Relaxed),
            documents_indexed: self.documents_indexed.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Extraction jobs that reached the completed state since startup.
    pub extractions_completed: u64,
    /// Extraction jobs that reached the failed state since startup.
    pub extractions_failed: u64,
    /// Documents indexed into the vector store since startup.
    pub documents_indexed: u64,
    /// Total chunk count persisted across all indexed documents.
    pub chunks_indexed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_documents_and_chunks() {
        let metrics = PipelineMetrics::new();
        metrics.record_document_indexed(2);
        metrics.record_document_indexed(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_indexed, 2);
        assert_eq!(snapshot.chunks_indexed, 5);
    }

    #[test]
    fn records_extraction_outcomes_independently() {
        let metrics = PipelineMetrics::new();
        metrics.record_extraction_completed();
        metrics.record_extraction_completed();
        metrics.record_extraction_failed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.extractions_completed, 2);
        assert_eq!(snapshot.extractions_failed, 1);
        assert_eq!(snapshot.documents_indexed, 0);
    }
}
