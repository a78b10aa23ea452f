//! Backend seam: the two job protocols behind one trait, plus the HTTP
//! implementation used outside of tests.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{Result, VerifyError};
use crate::request::{JobHandle, JobRequest};

/// Raw body increments of a verification stream.
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>>>;

/// Lifecycle tag reported by `/status/{job_id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Queued,
    Running,
    Finished,
    Failed,
    /// Anything the backend adds later is treated as still in progress.
    #[serde(other)]
    Unknown,
}

impl RemoteStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RemoteStatus::Finished | RemoteStatus::Failed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StatusMeta {
    /// Serialized result set.
    pub results: Option<String>,
    pub error: Option<String>,
}

/// One answer of the polling protocol. `logs` is the full history so far.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatusReport {
    pub status: RemoteStatus,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub logs: Vec<String>,
    #[serde(default)]
    pub meta: Option<StatusMeta>,
}

impl StatusReport {
    pub fn results_payload(&self) -> Option<&str> {
        self.meta.as_ref()?.results.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.meta.as_ref()?.error.as_deref()
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Deserialize)]
struct JobCreated {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Remote operations a verification job needs. Each call is one request.
#[async_trait]
pub trait Backend: Send + Sync {
    /// `POST /start-scraping`
    async fn start_job(&self, request: &JobRequest) -> Result<JobHandle>;

    /// `GET /status/{job_id}`
    async fn job_status(&self, handle: &JobHandle) -> Result<StatusReport>;

    /// `POST /run-verification`, returning the open response body.
    async fn open_stream(&self, request: &JobRequest) -> Result<ChunkStream>;

    /// `POST /stop`
    async fn stop(&self) -> Result<()>;
}

pub struct HttpBackend {
    client: Client,
    config: ClientConfig,
}

impl HttpBackend {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    fn form(request: &JobRequest) -> Result<Form> {
        let file = Part::bytes(request.file.bytes().to_vec())
            .file_name(request.file.name().to_string())
            .mime_str("text/csv")?;

        Ok(Form::new()
            .part("file", file)
            .text("apiKey", request.credential.expose().to_string())
            .text("state", request.profile.as_str())
            .text("mapping", request.mapping.to_json()))
    }
}

/// Turns a non-success response into `BackendRejected`, preferring the
/// server's `{ "error": ... }` message.
async fn rejection(response: Response) -> VerifyError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let reason = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => parsed.error,
        Err(_) if !body.trim().is_empty() => body.trim().to_string(),
        Err(_) => status
            .canonical_reason()
            .unwrap_or("Backend error")
            .to_string(),
    };
    VerifyError::BackendRejected {
        status: status.as_u16(),
        reason,
    }
}

/// Reads the `{ "job_id": ... }` answer of an accepted submission.
fn job_created(status: u16, body: &str) -> Result<JobHandle> {
    serde_json::from_str::<JobCreated>(body)
        .map(|created| JobHandle::new(created.job_id))
        .map_err(|e| VerifyError::BackendRejected {
            status,
            reason: format!("unexpected job creation response: {}", e),
        })
}

#[async_trait]
impl Backend for HttpBackend {
    async fn start_job(&self, request: &JobRequest) -> Result<JobHandle> {
        let url = self.config.endpoint("start-scraping")?;
        debug!(%url, file = request.file.name(), "submitting job");

        let response = self
            .client
            .post(url)
            .timeout(self.config.request_timeout)
            .multipart(Self::form(request)?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        // The job is accepted from here on; body trouble must not look retryable.
        let status = response.status();
        let body = response.text().await.map_err(|e| VerifyError::BackendRejected {
            status: status.as_u16(),
            reason: format!("unreadable job creation response: {}", e),
        })?;
        job_created(status.as_u16(), &body)
    }

    async fn job_status(&self, handle: &JobHandle) -> Result<StatusReport> {
        let url = self.config.endpoint(&format!("status/{}", handle))?;

        let response = self
            .client
            .get(url)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| VerifyError::StatusCheck(e.to_string()))?;

        if !response.status().is_success() {
            return Err(VerifyError::StatusCheck(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| VerifyError::StatusCheck(e.to_string()))
    }

    async fn open_stream(&self, request: &JobRequest) -> Result<ChunkStream> {
        let url = self.config.endpoint("run-verification")?;
        debug!(%url, file = request.file.name(), "opening verification stream");

        // No request timeout: the body lives as long as the job.
        let response = self
            .client
            .post(url)
            .multipart(Self::form(request)?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(VerifyError::from))
            .boxed())
    }

    async fn stop(&self) -> Result<()> {
        let url = self.config.endpoint("stop")?;
        self.client
            .post(url)
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        Ok(())
    }
}
