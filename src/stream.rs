//! Batch analysis: many independent requests over a bounded worker pool.
//!
//! Each request is its own pipeline invocation. [`analyze_stream`] yields
//! results as requests finish (completion order, not submission order);
//! [`analyze_batch`] collects them and restores submission order. A failing
//! request never affects the others: every item carries its own `Result`.

use crate::analyze::Analyzer;
use crate::error::AnalysisError;
use crate::output::AnalysisReport;
use crate::session::{AnalysisRequest, Session};
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of one request in a batch.
#[derive(Debug)]
pub struct BatchItem {
    /// 1-indexed position of the request in the submitted batch.
    pub index: usize,
    pub request_id: Uuid,
    pub result: Result<AnalysisReport, AnalysisError>,
}

/// A boxed stream of batch results.
pub type ReportStream<'a> = Pin<Box<dyn Stream<Item = BatchItem> + Send + 'a>>;

/// Run `requests` concurrently (at most `config.concurrency` at a time),
/// yielding each result as soon as it is ready.
///
/// Cancelling `cancel` makes every unfinished request end with
/// [`AnalysisError::Cancelled`].
pub fn analyze_stream<'a>(
    analyzer: &'a Analyzer,
    session: &'a Session,
    requests: Vec<AnalysisRequest>,
    cancel: CancellationToken,
) -> ReportStream<'a> {
    let total = requests.len();
    let concurrency = analyzer.config().concurrency.max(1);

    let s = stream::iter(requests.into_iter().enumerate().map(move |(i, request)| {
        let cancel = cancel.clone();
        async move {
            let index = i + 1;
            let cb = analyzer.config().progress_callback.clone();
            if let Some(ref cb) = cb {
                cb.on_request_start(index, total);
            }
            let result = analyzer.run(session, &request, &cancel, index).await;
            if let Some(ref cb) = cb {
                match &result {
                    Ok(report) => cb.on_request_complete(index, total, report.conflicts.len()),
                    Err(e) => cb.on_request_error(index, total, &e.to_string()),
                }
            }
            if let Err(ref e) = result {
                warn!("Request {}/{} failed: {}", index, total, e);
            }
            BatchItem {
                index,
                request_id: request.id,
                result,
            }
        }
    }))
    .buffer_unordered(concurrency);

    Box::pin(s)
}

/// Run `requests` and return every result in submission order.
pub async fn analyze_batch(
    analyzer: &Analyzer,
    session: &Session,
    requests: Vec<AnalysisRequest>,
) -> Vec<BatchItem> {
    analyze_batch_with_cancel(analyzer, session, requests, CancellationToken::new()).await
}

/// [`analyze_batch`] with a cancellation token.
pub async fn analyze_batch_with_cancel(
    analyzer: &Analyzer,
    session: &Session,
    requests: Vec<AnalysisRequest>,
    cancel: CancellationToken,
) -> Vec<BatchItem> {
    let total = requests.len();
    let cb = analyzer.config().progress_callback.clone();
    if let Some(ref cb) = cb {
        cb.on_batch_start(total);
    }
    info!("Starting batch of {} request(s)", total);

    let mut items: Vec<BatchItem> = analyze_stream(analyzer, session, requests, cancel)
        .collect()
        .await;
    items.sort_by_key(|item| item.index);

    let succeeded = items.iter().filter(|i| i.result.is_ok()).count();
    info!("Batch complete: {}/{} succeeded", succeeded, total);
    if let Some(ref cb) = cb {
        cb.on_batch_complete(total, succeeded);
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::pipeline::completion::{
        Completion, CompletionFailure, CompletionRequest, CompletionService,
    };
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Sentinel;

    #[async_trait]
    impl CompletionService for Sentinel {
        fn name(&self) -> &str {
            "sentinel"
        }

        async fn complete(&self, _: &CompletionRequest) -> Result<Completion, CompletionFailure> {
            Ok(Completion::text("NO CONFLICTS FOUND"))
        }
    }

    fn setup(n: usize) -> (Analyzer, Session, Vec<AnalysisRequest>) {
        let config = AnalysisConfig::builder().concurrency(2).build().unwrap();
        let mut session = Session::new(&config);
        let mut requests = Vec::new();
        for i in 0..n {
            let id = session
                .add_upload(&format!("{i}.txt"), "", format!("text {i}").into_bytes())
                .unwrap();
            requests.push(session.request(&[id], None).unwrap());
        }
        (Analyzer::with_service(config, Arc::new(Sentinel)), session, requests)
    }

    #[test]
    fn stream_yields_every_request() {
        let (analyzer, session, requests) = setup(5);
        let mut indices: Vec<usize> = tokio_test::block_on(async {
            analyze_stream(&analyzer, &session, requests, CancellationToken::new())
                .map(|item| {
                    assert!(item.result.is_ok());
                    item.index
                })
                .collect()
                .await
        });
        indices.sort_unstable();
        assert_eq!(indices, vec![1, 2, 3, 4, 5]);
        assert_eq!(analyzer.request_count(), 5);
    }

    #[tokio::test]
    async fn cancelled_batch_fails_every_request() {
        let (analyzer, session, requests) = setup(3);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let items = analyze_batch_with_cancel(&analyzer, &session, requests, cancel).await;
        assert_eq!(items.len(), 3);
        assert!(items
            .iter()
            .all(|i| matches!(i.result, Err(AnalysisError::Cancelled { .. }))));
        assert_eq!(analyzer.request_count(), 0);
    }

    #[tokio::test]
    async fn empty_batch_is_empty() {
        let (analyzer, session, _) = setup(0);
        assert!(analyze_batch(&analyzer, &session, Vec::new()).await.is_empty());
    }
}
