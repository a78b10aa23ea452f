//! Job lifecycle: one `ProgressObserver` per attempt, driven by a background
//! task that either polls the backend or reads the verification stream.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, TransportMode};
use crate::error::{Result, VerifyError};
use crate::request::{JobHandle, JobRequest};
use crate::stream::StreamDecoder;
use crate::submitter::{JobSubmitter, Submission};
use crate::transport::{Backend, ChunkStream, HttpBackend, RemoteStatus, StatusReport};
use crate::{parse_results, ResultSet};

pub const STOP_LOG_LINE: &str = "--- [Module Stop] Process stopped by user. ---";
pub const STATUS_CHECK_FAILED: &str = "status check failed";
const DEFAULT_FAILURE: &str = "Job failed without a specific error message.";
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Submitting,
    Running,
    Finished,
    Failed(String),
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Finished | JobState::Failed(_) | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Idle => write!(f, "Idle"),
            JobState::Submitting => write!(f, "Submitting"),
            JobState::Running => write!(f, "Running"),
            JobState::Finished => write!(f, "Finished"),
            JobState::Failed(reason) => write!(f, "Failed: {}", reason),
            JobState::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Change notifications for a view layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ObserverEvent {
    StateChanged(JobState),
    /// Polling: the backend's full log replaced the local one.
    LogsReplaced(Vec<String>),
    LogAppended(String),
    Warning(String),
}

/// Terminal snapshot of an attempt.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub state: JobState,
    pub logs: Vec<String>,
    pub results: ResultSet,
    /// Set when the job finished but its results could not be read.
    pub warning: Option<VerifyError>,
    pub error: Option<VerifyError>,
    pub job: Option<JobHandle>,
    /// Whether the attempt ever reached `Running`.
    pub started: bool,
}

impl Outcome {
    pub fn is_finished(&self) -> bool {
        self.state == JobState::Finished
    }
}

#[derive(Debug)]
struct Snapshot {
    state: JobState,
    logs: Vec<String>,
    results: ResultSet,
    warning: Option<VerifyError>,
    error: Option<VerifyError>,
    job: Option<JobHandle>,
    started: bool,
}

/// State of one attempt. Every mutation is refused once the state is
/// terminal, which is what drops responses that arrive after `cancel()`.
struct Shared {
    inner: Mutex<Snapshot>,
    events: broadcast::Sender<ObserverEvent>,
    state_tx: watch::Sender<JobState>,
}

impl Shared {
    fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state_tx, _) = watch::channel(JobState::Idle);
        Self {
            inner: Mutex::new(Snapshot {
                state: JobState::Idle,
                logs: Vec::new(),
                results: Vec::new(),
                warning: None,
                error: None,
                job: None,
                started: false,
            }),
            events,
            state_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Snapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ObserverEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn set_state(&self, snapshot: &mut Snapshot, next: JobState) {
        if next == JobState::Running {
            snapshot.started = true;
        }
        snapshot.state = next.clone();
        self.state_tx.send_replace(next.clone());
        self.emit(ObserverEvent::StateChanged(next));
    }

    fn push_log(&self, snapshot: &mut Snapshot, line: String) {
        snapshot.logs.push(line.clone());
        self.emit(ObserverEvent::LogAppended(line));
    }

    fn set_warning(&self, snapshot: &mut Snapshot, warning: Option<VerifyError>) {
        if let Some(warning) = &warning {
            self.emit(ObserverEvent::Warning(warning.to_string()));
        }
        snapshot.warning = warning;
    }

    fn is_terminal(&self) -> bool {
        self.lock().state.is_terminal()
    }

    fn transition(&self, next: JobState) -> bool {
        let mut snapshot = self.lock();
        if snapshot.state.is_terminal() {
            return false;
        }
        info!(from = %snapshot.state, to = %next, "job state changed");
        self.set_state(&mut snapshot, next);
        true
    }

    fn append_log(&self, line: impl Into<String>) -> bool {
        let mut snapshot = self.lock();
        if snapshot.state.is_terminal() {
            return false;
        }
        self.push_log(&mut snapshot, line.into());
        true
    }

    fn set_job(&self, handle: JobHandle) {
        let mut snapshot = self.lock();
        if !snapshot.state.is_terminal() {
            snapshot.job = Some(handle);
        }
    }

    fn fail(&self, reason: impl Into<String>, error: VerifyError) -> bool {
        let mut snapshot = self.lock();
        if snapshot.state.is_terminal() {
            return false;
        }
        let reason = reason.into();
        warn!(%reason, %error, "job failed");
        snapshot.error = Some(error);
        self.set_state(&mut snapshot, JobState::Failed(reason));
        true
    }

    fn cancel(&self) -> bool {
        let mut snapshot = self.lock();
        if snapshot.state.is_terminal() {
            return false;
        }
        info!(from = %snapshot.state, "job cancelled by user");
        self.set_state(&mut snapshot, JobState::Cancelled);
        self.push_log(&mut snapshot, STOP_LOG_LINE.to_string());
        true
    }

    /// Applies one polling answer. Returns whether polling should go on.
    fn apply_status(&self, report: StatusReport) -> bool {
        let mut snapshot = self.lock();
        if snapshot.state.is_terminal() {
            debug!("discarding status response for a terminal job");
            return false;
        }

        snapshot.logs = report.logs.clone();
        self.emit(ObserverEvent::LogsReplaced(report.logs.clone()));

        if !report.status.is_terminal() {
            return true;
        }

        let (results, warning) = match report.results_payload() {
            Some(payload) => match parse_results(payload) {
                Ok(results) => (results, None),
                Err(err) => (Vec::new(), Some(err)),
            },
            None => (Vec::new(), None),
        };
        snapshot.results = results;
        self.set_warning(&mut snapshot, warning);

        if report.status == RemoteStatus::Failed {
            let reason = report.error_message().unwrap_or(DEFAULT_FAILURE).to_string();
            snapshot.error = Some(VerifyError::JobFailed(reason.clone()));
            self.set_state(&mut snapshot, JobState::Failed(reason));
        } else {
            self.set_state(&mut snapshot, JobState::Finished);
        }
        false
    }

    /// Closes a stream that ended cleanly.
    fn finish_stream(&self, tail: Vec<String>, payload: Option<String>) -> bool {
        let mut snapshot = self.lock();
        if snapshot.state.is_terminal() {
            return false;
        }
        for line in tail {
            self.push_log(&mut snapshot, line);
        }
        let (results, warning) = match payload.as_deref().map(parse_results) {
            Some(Ok(results)) => (results, None),
            Some(Err(err)) => (Vec::new(), Some(err)),
            None => (Vec::new(), None),
        };
        snapshot.results = results;
        self.set_warning(&mut snapshot, warning);
        self.set_state(&mut snapshot, JobState::Finished);
        true
    }

    fn outcome(&self) -> Outcome {
        let snapshot = self.lock();
        Outcome {
            state: snapshot.state.clone(),
            logs: snapshot.logs.clone(),
            results: snapshot.results.clone(),
            warning: snapshot.warning.clone(),
            error: snapshot.error.clone(),
            job: snapshot.job.clone(),
            started: snapshot.started,
        }
    }
}

/// Owns the attempt's driver task. The task (and with it any poll timer or
/// open stream) is aborted on cancel and when the last observer is dropped.
#[derive(Default)]
struct DriverGuard {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DriverGuard {
    fn attach(&self, task: JoinHandle<()>) {
        let mut slot = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
    }

    fn release(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl Drop for DriverGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Tells the backend to stop, without waiting and without failing anyone.
fn notify_stop(backend: Arc<dyn Backend>) {
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(async move {
                if let Err(err) = backend.stop().await {
                    warn!(error = %err, "stop notification failed");
                }
            });
        }
        Err(_) => warn!("no async runtime; backend was not told to stop"),
    }
}

/// Live view of one verification attempt.
#[derive(Clone)]
pub struct ProgressObserver {
    shared: Arc<Shared>,
    guard: Arc<DriverGuard>,
    backend: Arc<dyn Backend>,
}

impl fmt::Debug for ProgressObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressObserver")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ProgressObserver {
    fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            shared: Arc::new(Shared::new()),
            guard: Arc::new(DriverGuard::default()),
            backend,
        }
    }

    pub fn state(&self) -> JobState {
        self.shared.lock().state.clone()
    }

    pub fn logs(&self) -> Vec<String> {
        self.shared.lock().logs.clone()
    }

    /// Empty until the job reaches a terminal state.
    pub fn results(&self) -> ResultSet {
        self.shared.lock().results.clone()
    }

    pub fn warning(&self) -> Option<VerifyError> {
        self.shared.lock().warning.clone()
    }

    pub fn error(&self) -> Option<VerifyError> {
        self.shared.lock().error.clone()
    }

    pub fn job_handle(&self) -> Option<JobHandle> {
        self.shared.lock().job.clone()
    }

    /// Events from now on. Use the accessors for what happened before.
    pub fn subscribe(&self) -> broadcast::Receiver<ObserverEvent> {
        self.shared.events.subscribe()
    }

    /// Stops the attempt. Returns immediately; the state is `Cancelled` by
    /// the time this returns unless the job had already ended.
    pub fn cancel(&self) {
        if !self.shared.cancel() {
            return;
        }
        self.guard.release();
        notify_stop(self.backend.clone());
    }

    /// Resolves once the attempt is terminal.
    pub async fn wait(&self) -> Outcome {
        let mut state = self.shared.state_tx.subscribe();
        // The sender lives in `self.shared`, so this cannot close early.
        let _ = state.wait_for(JobState::is_terminal).await;
        self.shared.outcome()
    }

    pub fn outcome(&self) -> Outcome {
        self.shared.outcome()
    }
}

/// Settings a driver task needs for one attempt.
#[derive(Debug, Clone, Copy)]
struct Pacing {
    poll_interval: Duration,
    max_duration: Option<Duration>,
}

/// Entry point for callers: starts attempts and keeps at most one alive.
pub struct VerificationClient {
    backend: Arc<dyn Backend>,
    submitter: JobSubmitter,
    pacing: Pacing,
    active: Mutex<Option<ProgressObserver>>,
}

impl VerificationClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.check()?;
        let backend: Arc<dyn Backend> = Arc::new(HttpBackend::new(config.clone())?);
        Ok(Self::with_backend(backend, &config))
    }

    pub fn with_backend(backend: Arc<dyn Backend>, config: &ClientConfig) -> Self {
        Self {
            submitter: JobSubmitter::new(backend.clone(), config.transport),
            backend,
            pacing: Pacing {
                poll_interval: config.poll_interval,
                max_duration: config.max_duration,
            },
            active: Mutex::new(None),
        }
    }

    pub fn mode(&self) -> TransportMode {
        self.submitter.mode()
    }

    /// Validates the request and starts a new attempt on the current tokio
    /// runtime. Invalid input is returned here, before any network call.
    /// A previous attempt that is still live is cancelled first.
    pub fn start(&self, request: JobRequest) -> Result<ProgressObserver> {
        request.validate()?;

        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = active.take() {
            if !previous.state().is_terminal() {
                warn!("a previous attempt is still running; cancelling it");
                previous.cancel();
            }
            previous.guard.release();
        }

        let observer = ProgressObserver::new(self.backend.clone());
        observer.shared.transition(JobState::Submitting);
        match self.mode() {
            TransportMode::Poll => {
                observer.shared.append_log("Submitting job to the queue...");
            }
            // The stream log holds backend lines only.
            TransportMode::Stream => info!("starting verification stream"),
        }

        let task = tokio::spawn(drive(
            observer.shared.clone(),
            self.submitter.clone(),
            self.backend.clone(),
            request,
            self.pacing,
        ));
        observer.guard.attach(task);

        *active = Some(observer.clone());
        Ok(observer)
    }
}

async fn drive(
    shared: Arc<Shared>,
    submitter: JobSubmitter,
    backend: Arc<dyn Backend>,
    request: JobRequest,
    pacing: Pacing,
) {
    let attempt = run_attempt(&shared, &submitter, backend.as_ref(), &request, pacing.poll_interval);

    let Some(limit) = pacing.max_duration else {
        attempt.await;
        return;
    };

    if time::timeout(limit, attempt).await.is_err() {
        let reason = format!("job exceeded maximum duration of {}s", limit.as_secs());
        if shared.fail(reason.clone(), VerifyError::JobFailed(reason)) {
            notify_stop(backend);
        }
    }
}

async fn run_attempt(
    shared: &Shared,
    submitter: &JobSubmitter,
    backend: &dyn Backend,
    request: &JobRequest,
    poll_interval: Duration,
) {
    let submission = match submitter.send(request).await {
        Ok(submission) => submission,
        Err(err) => {
            shared.fail(format!("Failed to start job: {}", err), err);
            return;
        }
    };

    match submission {
        Submission::Queued(handle) => {
            shared.set_job(handle.clone());
            if !shared.transition(JobState::Running) {
                return;
            }
            shared.append_log(format!("Job successfully submitted with ID: {}", handle));
            shared.append_log("Waiting for worker to start...");
            poll(shared, backend, &handle, poll_interval).await;
        }
        Submission::Streaming(body) => {
            if !shared.transition(JobState::Running) {
                return;
            }
            read_stream(shared, body).await;
        }
    }
}

/// One status query per tick, each awaited before the next tick is taken.
async fn poll(shared: &Shared, backend: &dyn Backend, handle: &JobHandle, period: Duration) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if shared.is_terminal() {
            return;
        }

        let report = match backend.job_status(handle).await {
            Ok(report) => report,
            Err(err) => {
                shared.fail(STATUS_CHECK_FAILED, err);
                return;
            }
        };
        debug!(job = %handle, status = ?report.status, lines = report.logs.len(), "status polled");

        if !shared.apply_status(report) {
            return;
        }
    }
}

async fn read_stream(shared: &Shared, mut body: ChunkStream) {
    let mut decoder = StreamDecoder::new();

    while let Some(chunk) = body.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(err) => {
                shared.fail(format!("stream interrupted: {}", err), err);
                return;
            }
        };
        debug!(len = bytes.len(), "stream chunk received");
        for line in decoder.push(&bytes) {
            if !shared.append_log(line) {
                return;
            }
        }
    }

    let (tail, payload) = decoder.finish();
    shared.finish_stream(tail, payload);
}
