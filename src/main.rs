//! CLI entry point for imagery-daq
//!
//! Provides a command-line interface for:
//! - Listing the streams a source can connect to
//! - Running one recording session for a subject
//!
//! # Usage
//!
//! Run a session against the built-in mock stream:
//! ```bash
//! imagery-daq run --subject S01 --run 1
//! ```
//!
//! Replay a saved recording without writing anything:
//! ```bash
//! imagery-daq run --subject S01 --source replay --replay-file data/S01_run1_raw.csv --dry-run
//! ```
//!
//! While a session runs, type `p` to pause, `r` to resume and `s` (or `q`) to
//! stop, each followed by Enter.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use imagery_daq::acquisition::mock::{MockSignalSource, MockStreamConfig};
use imagery_daq::acquisition::replay::ReplaySource;
use imagery_daq::acquisition::{connect_stream, SignalSource};
use imagery_daq::classifier::{Classifier, FeedbackPipeline};
use imagery_daq::config::{AppConfig, ClassifierKind};
use imagery_daq::data::storage::{CsvRecordingWriter, MemorySink, RecordingSink};
use imagery_daq::experiment::{RunOutcome, SessionCommand, SessionEvent, TrialScheduler};
use imagery_daq::logging::{self, OutputFormat};
use imagery_daq::processing::SignalPreprocessor;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "imagery-daq")]
#[command(about = "Motor-imagery trial acquisition with event marking", long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/imagery_daq.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format: pretty, compact or json
    #[arg(long, global = true, default_value = "compact")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SourceKind {
    /// Built-in synthetic stream
    Mock,
    /// Saved recording streamed at its original rate
    Replay,
}

#[derive(Subcommand)]
enum Commands {
    /// List the streams visible to a source
    ListStreams {
        #[arg(long, value_enum, default_value = "mock")]
        source: SourceKind,

        /// Recording to replay (with --source replay)
        #[arg(long)]
        replay_file: Option<PathBuf>,
    },

    /// Run one session and save the recording
    Run {
        /// Subject identifier used in the output file name
        #[arg(long)]
        subject: String,

        /// Run label used in the output file name
        #[arg(long, default_value = "1")]
        run: String,

        /// Connect to the stream with this name
        #[arg(long)]
        stream: Option<String>,

        #[arg(long, value_enum, default_value = "mock")]
        source: SourceKind,

        /// Recording to replay (with --source replay)
        #[arg(long)]
        replay_file: Option<PathBuf>,

        /// Skip the feedback phase
        #[arg(long)]
        no_feedback: bool,

        /// Classify with this model file instead of the mock classifier
        #[arg(long)]
        model: Option<PathBuf>,

        /// Override the number of repetitions per task
        #[arg(long)]
        repetitions: Option<usize>,

        /// Keep the recording in memory instead of writing it
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => AppConfig::load().context("loading config/imagery_daq.toml")?,
    };

    let format: OutputFormat = cli.log_format.parse().map_err(anyhow::Error::msg)?;
    logging::init_from_config(&config, format).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::ListStreams {
            source,
            replay_file,
        } => {
            let source = build_source(source, replay_file, &config)?;
            for descriptor in source.discover()? {
                println!("{}", serde_json::to_string(&descriptor)?);
            }
            Ok(())
        }
        Commands::Run {
            subject,
            run,
            stream,
            source,
            replay_file,
            no_feedback,
            model,
            repetitions,
            dry_run,
        } => {
            if no_feedback {
                config.trial.feedback_enabled = false;
            }
            if let Some(path) = model {
                config.classifier.kind = ClassifierKind::Model;
                config.classifier.model_path = Some(path);
            }
            if let Some(repetitions) = repetitions {
                config.trial.repetitions = repetitions;
            }
            config.validate()?;

            let source = build_source(source, replay_file, &config)?;
            let name = stream.or_else(|| config.stream.name.clone());
            run_session(&config, source.as_ref(), name.as_deref(), &subject, &run, dry_run).await
        }
    }
}

fn build_source(
    kind: SourceKind,
    replay_file: Option<PathBuf>,
    config: &AppConfig,
) -> Result<Box<dyn SignalSource>> {
    match kind {
        SourceKind::Mock => Ok(Box::new(MockSignalSource::new(MockStreamConfig {
            seed: config.seed.unwrap_or_default(),
            ..Default::default()
        }))),
        SourceKind::Replay => {
            let Some(path) = replay_file else {
                bail!("--source replay requires --replay-file");
            };
            let source = ReplaySource::open(&path, true)
                .with_context(|| format!("opening recording {}", path.display()))?;
            Ok(Box::new(source))
        }
    }
}

async fn run_session(
    config: &AppConfig,
    source: &dyn SignalSource,
    stream: Option<&str>,
    subject: &str,
    run: &str,
    dry_run: bool,
) -> Result<()> {
    let inlet = connect_stream(source, stream).context("connecting to the signal stream")?;
    let info = inlet.info().clone();

    let pipeline = if config.trial.feedback_enabled {
        let preprocessor = SignalPreprocessor::new(
            config.preprocessing.clone(),
            info.sampling_rate,
            info.channel_count(),
        )?;
        let classifier =
            Classifier::from_config(&config.classifier, preprocessor.output_geometry(), config.seed)?;
        Some(FeedbackPipeline::new(preprocessor, classifier)?)
    } else {
        None
    };

    let sink: Arc<dyn RecordingSink> = if dry_run {
        Arc::new(MemorySink::default())
    } else {
        Arc::new(CsvRecordingWriter::new(&config.storage.output_dir))
    };

    let mut scheduler = TrialScheduler::new(
        config.trial.clone(),
        &config.stream,
        inlet,
        sink,
        pipeline,
        config.seed,
    )?;
    tokio::spawn(report(scheduler.subscribe()));

    let (tx, mut commands) = mpsc::channel(16);
    tx.send(SessionCommand::Start).await?;
    spawn_keyboard(tx)?;

    println!(
        "Session {subject} run {run}: {} trials on '{}'. Keys: p pause, r resume, s stop",
        config.trial.trials_per_run(),
        info.name
    );

    let outcome = scheduler.drive(&mut commands).await?;
    println!("{}", serde_json::to_string(&scheduler.status())?);
    let label = match outcome {
        RunOutcome::Finished => run.to_string(),
        RunOutcome::Stopped => format!("{run}_partial"),
    };
    let saved = scheduler
        .save(subject, &label)
        .with_context(|| format!("saving {subject} run {label}"))?;
    match saved {
        Some(path) => println!("Saved {}", path.display()),
        None => println!("Nothing recorded"),
    }
    Ok(())
}

/// Log session notifications until the scheduler goes away.
async fn report(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::Progress { current, total }) => info!("Trial {current}/{total}"),
            Ok(SessionEvent::TaskChanged { label }) => info!(">> {label}"),
            Ok(SessionEvent::Feedback { predicted, correct }) => {
                info!(%predicted, correct, "Prediction")
            }
            Ok(SessionEvent::Finished) => info!("All trials done"),
            Ok(SessionEvent::StateChanged { .. }) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => warn!("Missed {n} notifications"),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Forward single-letter commands typed on stdin.
fn spawn_keyboard(tx: mpsc::Sender<SessionCommand>) -> Result<()> {
    std::thread::Builder::new()
        .name("keyboard".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                let command = match line.trim() {
                    "p" => SessionCommand::Pause,
                    "r" => SessionCommand::Resume,
                    "s" | "q" => SessionCommand::Stop,
                    "" => continue,
                    other => {
                        eprintln!("Unknown command '{other}' (p, r, s)");
                        continue;
                    }
                };
                if tx.blocking_send(command).is_err() {
                    break;
                }
            }
        })?;
    Ok(())
}
