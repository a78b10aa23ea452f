use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use clap::Parser;
use dotenv::dotenv;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use verification_client::logs::LogKind;
use verification_client::summary::summarize;
use verification_client::{
    utils, ClientConfig, ColumnMapping, Credential, JobRequest, JobState, LogicalField,
    ObserverEvent, Outcome, ProgressObserver, TargetProfile, TransportMode, UploadedFile,
    VerificationClient, VerifyError,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Verify a CSV of people against a licensing board", long_about = None)]
struct Args {
    /// CSV file with one person per row
    #[arg(short, long)]
    file: PathBuf,

    /// Licensing board to verify against
    #[arg(short, long, value_enum)]
    state: TargetProfile,

    /// API key forwarded to the backend
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Column holding first names (guessed from headers when omitted)
    #[arg(long)]
    first_name_column: Option<String>,

    /// Column holding last names
    #[arg(long)]
    last_name_column: Option<String>,

    /// Column holding admit dates
    #[arg(long)]
    admit_date_column: Option<String>,

    /// Backend base URL (overrides VERIFY_API_URL)
    #[arg(long)]
    api_url: Option<String>,

    /// How progress is reported (overrides VERIFY_TRANSPORT)
    #[arg(short, long, value_enum)]
    transport: Option<TransportMode>,

    /// Seconds between status queries when polling
    #[arg(long)]
    poll_interval: Option<f64>,

    /// Give up on the job after this many seconds
    #[arg(long)]
    max_duration: Option<f64>,

    /// Keep retrying an unreachable backend for this many seconds
    #[arg(long, default_value_t = 0.0)]
    retry_for: f64,

    /// CSV export path (default: verification_results_<state>.csv)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Also write the raw results and summary as JSON
    #[arg(long)]
    json: Option<PathBuf>,
}

fn secs(flag: &str, value: f64) -> Result<Duration, VerifyError> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| VerifyError::Config(format!("invalid --{} '{}': {}", flag, value, e)))
}

fn build_config(args: &Args) -> Result<ClientConfig, VerifyError> {
    let mut config = ClientConfig::from_env()?;
    if let Some(url) = &args.api_url {
        config = config.with_base_url(url)?;
    }
    if let Some(mode) = args.transport {
        config.transport = mode;
    }
    if let Some(value) = args.poll_interval {
        config.poll_interval = secs("poll-interval", value)?;
    }
    if let Some(value) = args.max_duration {
        config.max_duration = Some(secs("max-duration", value)?);
    }
    config.check()?;
    Ok(config)
}

fn build_mapping(args: &Args, headers: &[String]) -> Result<ColumnMapping, VerifyError> {
    let mut mapping = ColumnMapping::propose(headers);
    let overrides = [
        (LogicalField::FirstName, &args.first_name_column),
        (LogicalField::LastName, &args.last_name_column),
        (LogicalField::AdmitDate, &args.admit_date_column),
    ];
    for (field, column) in overrides {
        if let Some(column) = column {
            mapping.set(field, column.clone());
        }
    }
    mapping.validate(headers)?;
    Ok(mapping)
}

/// Prints new log lines as the observer reports them.
struct LogPrinter {
    printed: usize,
}

impl LogPrinter {
    fn flush(&mut self, logs: &[String]) {
        // A polled log shorter than what we printed means the backend restarted it.
        if logs.len() < self.printed {
            self.printed = 0;
        }
        for line in &logs[self.printed..] {
            println!("{} {}", LogKind::classify(line).marker(), line);
        }
        self.printed = logs.len();
    }
}

async fn print_progress(observer: ProgressObserver) {
    let mut events = observer.subscribe();
    let mut printer = LogPrinter { printed: 0 };
    printer.flush(&observer.logs());
    if observer.state().is_terminal() {
        return;
    }

    loop {
        match events.recv().await {
            Ok(ObserverEvent::LogAppended(_)) | Ok(ObserverEvent::LogsReplaced(_)) => {
                printer.flush(&observer.logs());
            }
            Ok(ObserverEvent::Warning(message)) => eprintln!("⚠️ {}", message),
            Ok(ObserverEvent::StateChanged(state)) if state.is_terminal() => {
                printer.flush(&observer.logs());
                return;
            }
            Ok(ObserverEvent::StateChanged(_)) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "progress printer fell behind");
                printer.flush(&observer.logs());
                if observer.state().is_terminal() {
                    return;
                }
            }
            Err(RecvError::Closed) => return,
        }
    }
}

/// Flips to `true` once Ctrl-C is pressed.
fn interrupt_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tx.send_replace(true);
        }
    });
    rx
}

/// Resolves `true` on interrupt; `false` if interrupts can no longer arrive.
async fn until_interrupted(interrupted: &mut watch::Receiver<bool>) -> bool {
    interrupted.wait_for(|stop| *stop).await.is_ok()
}

/// Runs one attempt to completion, cancelling it on interrupt.
async fn run_attempt(
    client: &VerificationClient,
    request: JobRequest,
    mut interrupted: watch::Receiver<bool>,
) -> Result<Outcome, VerifyError> {
    let observer = client.start(request)?;
    let printer = tokio::spawn(print_progress(observer.clone()));

    let outcome = tokio::select! {
        outcome = observer.wait() => outcome,
        true = until_interrupted(&mut interrupted) => {
            eprintln!("🛑 Stopping...");
            observer.cancel();
            observer.wait().await
        }
    };
    let _ = printer.await;
    Ok(outcome)
}

/// Only a backend that was never reached is worth another attempt; once the
/// job ran, a retry would submit it twice.
fn retryable(outcome: &Outcome) -> bool {
    !outcome.started && outcome.error.as_ref().is_some_and(VerifyError::is_transient)
}

async fn run(
    client: &VerificationClient,
    request: &JobRequest,
    retry_for: Duration,
    mut interrupted: watch::Receiver<bool>,
) -> Result<Outcome, VerifyError> {
    let mut policy = ExponentialBackoff {
        max_elapsed_time: Some(retry_for),
        ..ExponentialBackoff::default()
    };

    loop {
        let outcome = run_attempt(client, request.clone(), interrupted.clone()).await?;
        if retry_for.is_zero() || !retryable(&outcome) {
            return Ok(outcome);
        }
        let Some(wait) = policy.next_backoff() else {
            return Ok(outcome);
        };
        if let Some(err) = &outcome.error {
            eprintln!("❌ {} (retrying in {:.1}s)", err, wait.as_secs_f64());
        }

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            true = until_interrupted(&mut interrupted) => {
                eprintln!("🛑 Retry abandoned.");
                return Ok(outcome);
            }
        }
    }
}

fn write_outputs(args: &Args, outcome: &Outcome) -> Result<(), Box<dyn std::error::Error>> {
    let summary = summarize(&outcome.results);
    println!(
        "📊 Total: {} | Matched: {} | Not found: {} | Mismatch: {}",
        summary.total, summary.matched, summary.not_found, summary.mismatch
    );

    if utils::save_export(&outcome.results, args.state, args.output.as_deref())?.is_none() {
        println!("ℹ️ No results to export.");
    }

    if let Some(path) = &args.json {
        let document = utils::results_document(args.state, &summary, &outcome.results);
        utils::save_json(&document, Path::new(path))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;

    let bytes = tokio::fs::read(&args.file).await?;
    let name = args
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.csv".to_string());
    let file = UploadedFile::new(name, bytes);

    let headers = file.headers()?;
    let mapping = build_mapping(&args, &headers)?;
    println!("🗂️ Mapping: {}", mapping.to_json());

    let request = JobRequest::new(
        file,
        Credential::new(args.api_key.clone().unwrap_or_default()),
        args.state,
        mapping,
    );
    request.validate()?;

    let client = VerificationClient::new(config)?;
    let retry_for = secs("retry-for", args.retry_for)?;
    let outcome = match run(&client, &request, retry_for, interrupt_signal()).await {
        Ok(outcome) => outcome,
        Err(err) => {
            eprintln!("❌ {}", err);
            return Ok(ExitCode::FAILURE);
        }
    };

    match &outcome.state {
        JobState::Finished => println!("✅ Verification finished."),
        JobState::Failed(reason) => eprintln!("❌ {}", reason),
        JobState::Cancelled => eprintln!("🛑 Verification cancelled."),
        other => eprintln!("❌ Job ended in unexpected state {}", other),
    }
    if let Some(warning) = &outcome.warning {
        eprintln!("⚠️ {}", warning);
    }

    write_outputs(&args, &outcome)?;

    Ok(if outcome.is_finished() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
