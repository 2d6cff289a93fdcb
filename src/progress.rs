//! Progress-callback trait for analysis events.
//!
//! Inject an [`Arc<dyn AnalysisProgressCallback>`] via
//! [`crate::config::AnalysisConfigBuilder::progress_callback`] to receive
//! events while a batch of analysis requests runs.
//!
//! # Example
//!
//! ```rust
//! use edgequake_doccheck::{AnalysisProgressCallback, AnalysisConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl AnalysisProgressCallback for CountingCallback {
//!     fn on_request_complete(&self, index: usize, total: usize, conflicts: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Request {}/{} done ({} conflicts)", index, total, conflicts);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = AnalysisConfig::builder()
//!     .progress_callback(counter as Arc<dyn AnalysisProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::error::Stage;
use std::sync::Arc;

/// Called by the analyzer as requests move through the pipeline.
///
/// Requests in a batch run concurrently, so every method may be called from
/// several tasks at once. Implementations guard shared mutable state with
/// `Mutex`/atomics. All methods have no-op defaults.
pub trait AnalysisProgressCallback: Send + Sync {
    /// Called once before any request of a batch starts.
    fn on_batch_start(&self, total_requests: usize) {
        let _ = total_requests;
    }

    /// Called when a request enters the pipeline.
    ///
    /// # Arguments
    /// * `index`: 1-indexed position of the request in the batch
    /// * `total`: number of requests in the batch
    fn on_request_start(&self, index: usize, total: usize) {
        let _ = (index, total);
    }

    /// Called when a request reaches a new pipeline stage.
    fn on_stage(&self, index: usize, stage: Stage) {
        let _ = (index, stage);
    }

    /// Called when a request produced a report.
    ///
    /// # Arguments
    /// * `conflicts`: number of conflicts kept in the report
    fn on_request_complete(&self, index: usize, total: usize, conflicts: usize) {
        let _ = (index, total, conflicts);
    }

    /// Called when a request failed.
    fn on_request_error(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// Called once after every request of the batch has finished.
    fn on_batch_complete(&self, total_requests: usize, success_count: usize) {
        let _ = (total_requests, success_count);
    }
}

/// A no-op implementation; the default when no callback is configured.
pub struct NoopProgressCallback;

impl AnalysisProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::AnalysisConfig`].
pub type ProgressCallback = Arc<dyn AnalysisProgressCallback>;
