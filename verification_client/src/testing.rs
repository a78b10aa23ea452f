//! Scripted in-memory backend for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::Notify;

use crate::error::{Result, VerifyError};
use crate::request::{JobHandle, JobRequest};
use crate::transport::{Backend, ChunkStream, StatusMeta, StatusReport};

pub fn report(status: &str, logs: &[&str], results: Option<&str>) -> StatusReport {
    let body = serde_json::json!({
        "status": status,
        "logs": logs,
        "meta": results.map(|r| serde_json::json!({ "results": r })),
    });
    serde_json::from_value(body).expect("valid status report")
}

#[derive(Default)]
struct Counters {
    start: AtomicUsize,
    status: AtomicUsize,
    stream: AtomicUsize,
    stop: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a Counters);

impl<'a> InFlight<'a> {
    fn enter(counters: &'a Counters) -> Self {
        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeBackend {
    start_error: Option<VerifyError>,
    statuses: Mutex<VecDeque<Result<StatusReport>>>,
    chunks: Vec<String>,
    stream_error: Option<String>,
    keep_open: bool,
    delay: Option<Duration>,
    gate: Option<Arc<Notify>>,
    counters: Counters,
    next_id: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_start(mut self, status: u16, reason: &str) -> Self {
        self.start_error = Some(VerifyError::BackendRejected {
            status,
            reason: reason.to_string(),
        });
        self
    }

    pub fn fail_start_connection(mut self) -> Self {
        self.start_error = Some(VerifyError::Connection("connection refused".into()));
        self
    }

    /// Answers to successive status queries; the last one repeats.
    pub fn with_statuses(self, statuses: Vec<Result<StatusReport>>) -> Self {
        *self.statuses.lock().unwrap() = statuses.into();
        self
    }

    pub fn with_chunks(mut self, chunks: &[&str]) -> Self {
        self.chunks = chunks.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Yields the chunks, then never ends.
    pub fn with_open_stream(mut self, chunks: &[&str]) -> Self {
        self.keep_open = true;
        self.with_chunks(chunks)
    }

    pub fn with_stream_error(mut self, message: &str) -> Self {
        self.stream_error = Some(message.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Status queries block until the returned `Notify` is signalled.
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn start_calls(&self) -> usize {
        self.counters.start.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.counters.status.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.counters.stream.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.counters.stop.load(Ordering::SeqCst)
    }

    /// Job-creation and status calls; stop notifications are not counted.
    pub fn total_calls(&self) -> usize {
        self.start_calls() + self.status_calls() + self.stream_calls()
    }

    pub fn max_concurrent_calls(&self) -> usize {
        self.counters.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_status(&self) -> Result<StatusReport> {
        let mut statuses = self.statuses.lock().unwrap();
        if statuses.len() > 1 {
            return statuses.pop_front().expect("non-empty queue");
        }
        statuses.front().cloned().unwrap_or_else(|| {
            Ok(StatusReport {
                status: crate::transport::RemoteStatus::Running,
                logs: Vec::new(),
                meta: Some(StatusMeta::default()),
            })
        })
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn start_job(&self, _request: &JobRequest) -> Result<JobHandle> {
        let _in_flight = InFlight::enter(&self.counters);
        self.counters.start.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.start_error {
            return Err(err.clone());
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(JobHandle::new(format!("job-{}", id)))
    }

    async fn job_status(&self, _handle: &JobHandle) -> Result<StatusReport> {
        let _in_flight = InFlight::enter(&self.counters);
        self.counters.status.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.next_status()
    }

    async fn open_stream(&self, _request: &JobRequest) -> Result<ChunkStream> {
        self.counters.stream.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.start_error {
            return Err(err.clone());
        }

        let delay = self.delay;
        let mut items: Vec<Result<Vec<u8>>> = self
            .chunks
            .iter()
            .map(|chunk| Ok(chunk.clone().into_bytes()))
            .collect();
        if let Some(message) = &self.stream_error {
            items.push(Err(VerifyError::Connection(message.clone())));
        }

        let body = stream::iter(items).then(move |item| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            item
        });

        if self.keep_open {
            Ok(body.chain(stream::pending()).boxed())
        } else {
            Ok(body.boxed())
        }
    }

    async fn stop(&self) -> Result<()> {
        self.counters.stop.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
