//! Innermost service of the job stack: open the document, run the pipeline.
//!
//! The pipeline runs on tokio's blocking pool because operations are
//! synchronous and may block on collaborators. If an outer layer drops the
//! returned future (timeout), the blocking task is detached: it finishes on
//! its own and its document is dropped without being written.

use std::sync::Arc;
use std::task::{Context, Poll};

use tower::Service;
use tracing::debug;

use super::request::{panic_message, JobError, JobFuture, JobRequest, ProcessedJob};
use crate::traits::DocumentStore;

/// Opens documents from a [`DocumentStore`] and runs job pipelines on them.
#[derive(Clone)]
pub struct JobExecutor {
    store: Arc<dyn DocumentStore>,
}

impl JobExecutor {
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

impl Service<JobRequest> for JobExecutor {
    type Response = ProcessedJob;
    type Error = JobError;
    type Future = JobFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: JobRequest) -> Self::Future {
        let store = Arc::clone(&self.store);
        Box::pin(async move {
            let JobRequest {
                id,
                input,
                pipeline,
                ..
            } = request;

            let mut document = store.open(&input).await?;
            debug!(job = %id, input = %input.display(), pages = document.page_count(), "document opened");

            let handle = tokio::task::spawn_blocking(move || {
                let result = pipeline.run(&mut document);
                (document, result)
            });

            match handle.await {
                Ok((document, result)) => Ok(ProcessedJob { document, result }),
                Err(err) if err.is_panic() => Err(JobError::Panicked {
                    message: panic_message(err.into_panic().as_ref()),
                }),
                Err(_) => Err(JobError::Cancelled),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use docpipe_core::{
        ApplyOutcome, Document, DocumentContent, EditOperation, FailurePolicy, Operation,
        Pipeline, PipelineStatus, ValidationOutcome,
    };
    use tower::ServiceExt;

    use super::*;
    use crate::job::JobId;
    use crate::store::{MemoryDocumentStore, StoreError};

    fn request(input: &str, pipeline: Pipeline) -> JobRequest {
        JobRequest {
            id: JobId(0),
            input: PathBuf::from(input),
            pipeline: Arc::new(pipeline),
            timeout: None,
        }
    }

    fn store_with(path: &str, pages: usize) -> Arc<MemoryDocumentStore> {
        let store = Arc::new(MemoryDocumentStore::new());
        store
            .insert(path, &DocumentContent::with_blank_pages(pages, 100.0, 100.0))
            .unwrap();
        store
    }

    #[tokio::test]
    async fn runs_pipeline_on_opened_document() {
        let store = store_with("a.dpdoc", 2);
        let pipeline = Pipeline::from_edits(
            [EditOperation::RotatePage { page: 1, angle: 90 }],
            FailurePolicy::Abort.into(),
        );

        let processed = JobExecutor::new(store)
            .oneshot(request("a.dpdoc", pipeline))
            .await
            .unwrap();

        assert_eq!(processed.result.status, PipelineStatus::Committed);
        assert_eq!(processed.document.content().pages[1].rotation, 90);
        assert_eq!(processed.document.source(), Path::new("a.dpdoc"));
    }

    #[tokio::test]
    async fn missing_input_is_store_error() {
        let store = Arc::new(MemoryDocumentStore::new());
        let err = JobExecutor::new(store)
            .oneshot(request("missing.dpdoc", Pipeline::new(Vec::new(), FailurePolicy::Abort)))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Store(StoreError::NotFound { .. })));
    }

    /// Panics outside the pipeline's own guard: in `name`, which the
    /// pipeline calls while recording the step.
    #[derive(Debug)]
    struct NamelessOp;

    impl Operation for NamelessOp {
        fn name(&self) -> &'static str {
            panic!("no name")
        }

        fn validate(&self, _document: &Document) -> ValidationOutcome {
            Ok(())
        }

        fn apply(&self, _document: &mut Document) -> ApplyOutcome {
            Ok(())
        }
    }

    #[tokio::test]
    async fn panics_in_blocking_task_are_reported() {
        let store = store_with("a.dpdoc", 1);
        let pipeline = Pipeline::new(vec![Box::new(NamelessOp)], FailurePolicy::Abort);
        let err = JobExecutor::new(store)
            .oneshot(request("a.dpdoc", pipeline))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Panicked { ref message } if message == "no name"));
    }
}
