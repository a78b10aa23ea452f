use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::config::TransportMode;
use crate::error::Result;
use crate::request::{JobHandle, JobRequest};
use crate::transport::{Backend, ChunkStream};

/// What the backend gave back for an accepted job.
pub enum Submission {
    /// Polling: the job is queued under this handle.
    Queued(JobHandle),
    /// Streaming: the job runs for as long as this body stays open.
    Streaming(ChunkStream),
}

impl fmt::Debug for Submission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Submission::Queued(handle) => f.debug_tuple("Queued").field(handle).finish(),
            Submission::Streaming(_) => f.write_str("Streaming(..)"),
        }
    }
}

/// Validates a request and issues the single job-creation call.
#[derive(Clone)]
pub struct JobSubmitter {
    backend: Arc<dyn Backend>,
    mode: TransportMode,
}

impl JobSubmitter {
    pub fn new(backend: Arc<dyn Backend>, mode: TransportMode) -> Self {
        Self { backend, mode }
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    /// Fails with a validation error before touching the network; otherwise
    /// makes exactly one call and never retries.
    pub async fn submit(&self, request: &JobRequest) -> Result<Submission> {
        request.validate()?;
        self.send(request).await
    }

    /// Issues the call for an already validated request.
    pub(crate) async fn send(&self, request: &JobRequest) -> Result<Submission> {
        info!(
            file = request.file.name(),
            profile = %request.profile,
            mode = %self.mode,
            "submitting verification job"
        );
        match self.mode {
            TransportMode::Poll => self.backend.start_job(request).await.map(Submission::Queued),
            TransportMode::Stream => self
                .backend
                .open_stream(request)
                .await
                .map(Submission::Streaming),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VerifyError;
    use crate::mapping::ColumnMapping;
    use crate::request::{Credential, TargetProfile, UploadedFile};
    use crate::testing::FakeBackend;

    fn request(mapping: ColumnMapping) -> JobRequest {
        JobRequest::new(
            UploadedFile::new("people.csv", b"fname,lname,admit\nJane,Doe,2001\n".to_vec()),
            Credential::new("key"),
            TargetProfile::Georgia,
            mapping,
        )
    }

    #[tokio::test]
    async fn valid_request_issues_exactly_one_call() {
        let backend = Arc::new(FakeBackend::new());
        let submitter = JobSubmitter::new(backend.clone(), TransportMode::Poll);

        let submission = submitter
            .submit(&request(ColumnMapping::new("fname", "lname", "admit")))
            .await
            .unwrap();

        assert!(matches!(submission, Submission::Queued(ref h) if h.as_str() == "job-1"));
        assert_eq!(backend.start_calls(), 1);
        assert_eq!(backend.total_calls(), 1);
    }

    #[tokio::test]
    async fn incomplete_mapping_never_reaches_the_network() {
        for mapping in [
            ColumnMapping::new("", "lname", "admit"),
            ColumnMapping::new("fname", "", "admit"),
            ColumnMapping::new("fname", "lname", ""),
        ] {
            let backend = Arc::new(FakeBackend::new());
            let submitter = JobSubmitter::new(backend.clone(), TransportMode::Stream);

            let err = submitter.submit(&request(mapping)).await.unwrap_err();

            assert!(matches!(err, VerifyError::Validation(_)));
            assert_eq!(backend.total_calls(), 0);
        }
    }

    #[tokio::test]
    async fn backend_rejection_is_returned_without_retry() {
        let backend = Arc::new(FakeBackend::new().reject_start(400, "Invalid state selected"));
        let submitter = JobSubmitter::new(backend.clone(), TransportMode::Poll);

        let err = submitter
            .submit(&request(ColumnMapping::new("fname", "lname", "admit")))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            VerifyError::BackendRejected {
                status: 400,
                reason: "Invalid state selected".into()
            }
        );
        assert_eq!(backend.start_calls(), 1);
    }

    #[tokio::test]
    async fn stream_mode_opens_the_stream() {
        let backend = Arc::new(FakeBackend::new().with_chunks(&["hello\n"]));
        let submitter = JobSubmitter::new(backend.clone(), TransportMode::Stream);

        let submission = submitter
            .submit(&request(ColumnMapping::new("fname", "lname", "admit")))
            .await
            .unwrap();

        assert!(matches!(submission, Submission::Streaming(_)));
        assert_eq!(backend.stream_calls(), 1);
        assert_eq!(backend.start_calls(), 0);
    }
}
