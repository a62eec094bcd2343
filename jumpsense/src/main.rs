//! jumpsense - jump detection for IMU skating recordings
//!
//! ```bash
//! jumpsense process session.csv --output jumps.jsonl --annotation batch.json
//! jumpsense label batch.json labels.json --output corpus.json
//! jumpsense train corpus.json --model-type type
//! jumpsense artifacts
//! jumpsense init-config
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use jumpsense::annotation::{apply_labels, AnnotationBatch, LabelAssignment, SegmentCorpus};
use jumpsense::classifier::ArtifactError;
use jumpsense::export::{JsonLinesSink, JumpSink};
use jumpsense::recording::{RecordingOptions, RecordingReader};
use jumpsense::{
    train, AppConfig, ArtifactStore, FeatureExtractor, JumpPipeline, JumpSegmenter, JumpTypeClassifier,
    ModelArtifact, ModelType, SensorId, SuccessClassifier, TrainingError,
};

#[derive(Parser, Debug)]
#[command(name = "jumpsense")]
#[command(about = "Detect and classify figure skating jumps from IMU recordings")]
#[command(version)]
struct Cli {
    /// Configuration file (overrides JUMPSENSE_CONFIG and the platform location)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect, classify and export the jumps of one recording
    Process {
        /// CSV or JSON-lines recording
        recording: PathBuf,

        /// Sensor id for rows without a SensorId column
        #[arg(long, default_value_t = 0)]
        sensor_id: u32,

        /// Discard rows recorded before this raw SampleTimeFine value
        #[arg(long)]
        sync_timestamp: Option<u64>,

        /// Jump records as JSON lines (stdout when omitted)
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Also write detected segments for labeling
        #[arg(long, value_name = "FILE")]
        annotation: Option<PathBuf>,

        /// Skip classification even when artifacts exist
        #[arg(long)]
        no_classify: bool,
    },

    /// Merge label assignments into a training corpus
    Label {
        /// Annotation batch written by `process`
        batch: PathBuf,

        /// JSON array of label assignments
        labels: PathBuf,

        /// Corpus file (extended when it already exists)
        #[arg(long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Train and store a new model artifact version
    Train {
        corpus: PathBuf,

        #[arg(long, value_enum)]
        model_type: ModelType,

        /// Override the configured seed
        #[arg(long)]
        seed: Option<u64>,

        /// Stop training after this many seconds
        #[arg(long)]
        timeout_secs: Option<f64>,
    },

    /// List stored artifact versions
    Artifacts {
        #[arg(long, value_enum)]
        model_type: Option<ModelType>,
    },

    /// Write the default configuration file
    InitConfig {
        /// Target file (platform config location when omitted)
        path: Option<PathBuf>,

        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Runs before loading, the target file may not exist yet
    if let Command::InitConfig { path, force } = &cli.command {
        let written = AppConfig::default()
            .write_to(path.as_deref(), *force)
            .context("Failed to write configuration")?;
        println!("Wrote default configuration to {}", written.display());
        return Ok(());
    }

    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    jumpsense_common::logging::init(&config.logging).context("Failed to initialise logging")?;
    info!(version = env!("CARGO_PKG_VERSION"), "jumpsense starting");

    match cli.command {
        Command::Process {
            recording,
            sensor_id,
            sync_timestamp,
            output,
            annotation,
            no_classify,
        } => {
            let options = RecordingOptions {
                sensor_id: SensorId(sensor_id),
                sync_timestamp,
                ..Default::default()
            };
            process(&config, &recording, options, output.as_deref(), annotation.as_deref(), no_classify)
        }
        Command::Label { batch, labels, output } => label(&batch, &labels, &output),
        Command::Train {
            corpus,
            model_type,
            seed,
            timeout_secs,
        } => train_model(&config, &corpus, model_type, seed, timeout_secs).await,
        Command::Artifacts { model_type } => list_artifacts(&config, model_type),
        Command::InitConfig { .. } => Ok(()),
    }
}

fn process(
    config: &AppConfig,
    recording: &Path,
    options: RecordingOptions,
    output: Option<&Path>,
    annotation: Option<&Path>,
    no_classify: bool,
) -> Result<()> {
    let (session, report) = RecordingReader::new(options)
        .read_path(recording)
        .with_context(|| format!("Failed to read recording {}", recording.display()))?;
    info!(
        session_id = %session.id(),
        sensors = session.sensor_count(),
        samples = session.total_samples(),
        malformed = report.rows_malformed,
        before_sync = report.rows_before_sync,
        counter_wraps = report.counter_wraps,
        "Recording loaded"
    );
    if session.sensor_count() > 1 {
        let frames = session.align(config.recording.sample_period());
        let unaligned = frames.iter().filter(|f| f.is_unaligned()).count();
        info!(frames = frames.len(), unaligned, "Sensor streams aligned");
    }

    let segmenter = JumpSegmenter::new(config.segmenter.clone()).context("Invalid segmenter configuration")?;
    let mut pipeline = JumpPipeline::new(segmenter, FeatureExtractor::new(config.features.clone()), config.review.clone());

    if !no_classify {
        let store = ArtifactStore::open(config.artifacts_dir()).context("Failed to open artifact store")?;
        if let Some(artifact) = latest_artifact(&store, ModelType::Type)? {
            pipeline = pipeline.with_type_classifier(JumpTypeClassifier::new(artifact)?);
        }
        if let Some(artifact) = latest_artifact(&store, ModelType::Success)? {
            pipeline = pipeline.with_success_classifier(SuccessClassifier::new(artifact)?);
        }
    }

    let result = pipeline.process_session(&session)?;

    let records_written = match output {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
            let mut sink = JsonLinesSink::new(BufWriter::new(file));
            sink.write_all(&result.records)?;
            sink.written()
        }
        None => {
            let mut sink = JsonLinesSink::new(std::io::stdout().lock());
            sink.write_all(&result.records)?;
            sink.written()
        }
    };

    if let Some(path) = annotation {
        AnnotationBatch::from_segments(&session, &result.segments)
            .save(path)
            .with_context(|| format!("Failed to write annotation batch {}", path.display()))?;
        info!(path = %path.display(), segments = result.segments.len(), "Annotation batch written");
    }

    let needs_review = result.records.iter().filter(|r| r.review.needs_review()).count();
    eprintln!("{} jumps detected, {} need review", records_written, needs_review);
    Ok(())
}

/// Latest artifact of a type, or `None` when none has been trained yet
fn latest_artifact(store: &ArtifactStore, model_type: ModelType) -> Result<Option<Arc<ModelArtifact>>> {
    match store.load_latest(model_type) {
        Ok(artifact) => {
            info!(%model_type, version = artifact.version, "Classifier loaded");
            Ok(Some(Arc::new(artifact)))
        }
        Err(ArtifactError::NotFound { .. }) => {
            warn!(%model_type, "No trained artifact, predictions skipped");
            Ok(None)
        }
        Err(e) => Err(e).context(format!("Failed to load {} artifact", model_type)),
    }
}

fn label(batch: &Path, labels: &Path, output: &Path) -> Result<()> {
    let batch = AnnotationBatch::load(batch).with_context(|| format!("Failed to read batch {}", batch.display()))?;
    let content =
        std::fs::read_to_string(labels).with_context(|| format!("Failed to read labels {}", labels.display()))?;
    let assignments: Vec<LabelAssignment> =
        serde_json::from_str(&content).with_context(|| format!("Invalid label file {}", labels.display()))?;

    let mut segments: Vec<_> = batch.segments().cloned().collect();
    let report = apply_labels(&mut segments, &assignments);

    let mut corpus = if output.exists() {
        SegmentCorpus::load(output).with_context(|| format!("Failed to read corpus {}", output.display()))?
    } else {
        SegmentCorpus::default()
    };
    corpus.merge(segments.into_iter().filter(|s| !s.labels.is_empty()));
    corpus
        .save(output)
        .with_context(|| format!("Failed to write corpus {}", output.display()))?;

    eprintln!(
        "{} labels applied, {} unmatched; corpus holds {} labeled segments",
        report.applied,
        report.unmatched.len(),
        corpus.labeled().count()
    );
    for unmatched in &report.unmatched {
        eprintln!(
            "  unmatched: session {} sensor {} start {}",
            unmatched.session_id, unmatched.sensor_id, unmatched.start_index
        );
    }
    Ok(())
}

async fn train_model(
    config: &AppConfig,
    corpus: &Path,
    model_type: ModelType,
    seed: Option<u64>,
    timeout_secs: Option<f64>,
) -> Result<()> {
    let corpus = SegmentCorpus::load(corpus).with_context(|| format!("Failed to read corpus {}", corpus.display()))?;
    let store = ArtifactStore::open(config.artifacts_dir()).context("Failed to open artifact store")?;

    let mut training = config.training.clone();
    if let Some(seed) = seed {
        training.seed = seed;
    }
    if timeout_secs.is_some() {
        training.max_duration_secs = timeout_secs;
    }

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling training");
                cancel.cancel();
            }
        })
    };

    let worker_cancel = cancel.clone();
    let outcome = tokio::task::spawn_blocking(move || train(&corpus.segments, model_type, &training, &worker_cancel))
        .await
        .context("Training task panicked")?;
    ctrl_c.abort();

    let artifact = match outcome {
        Ok(artifact) => artifact,
        Err(TrainingError::Cancelled {
            reason,
            epochs_completed,
        }) => bail!("Training stopped ({}) after {} epochs; nothing stored", reason, epochs_completed),
        Err(e) => return Err(e).context(format!("Failed to train {} model", model_type)),
    };

    let artifact = store.save(artifact).context("Failed to store artifact")?;
    let path = store.path_for(artifact.model_type, artifact.version);
    eprintln!(
        "Stored {} v{} at {} (validation accuracy {:.3}, log-loss {:.3}, temperature {:.2})",
        artifact.model_type,
        artifact.version,
        path.display(),
        artifact.metrics.validation_accuracy,
        artifact.metrics.validation_log_loss,
        artifact.temperature
    );
    Ok(())
}

fn list_artifacts(config: &AppConfig, model_type: Option<ModelType>) -> Result<()> {
    let store = ArtifactStore::open(config.artifacts_dir()).context("Failed to open artifact store")?;
    let types = match model_type {
        Some(t) => vec![t],
        None => ModelType::ALL.to_vec(),
    };

    let mut out = std::io::stdout().lock();
    writeln!(out, "{:<8} {:>7}  {:<20} {:>9} {:>9} {:>6}", "model", "version", "created", "val_acc", "log_loss", "seed")?;
    for model_type in types {
        for version in store.versions(model_type)? {
            match store.load(model_type, version) {
                Ok(a) => writeln!(
                    out,
                    "{:<8} {:>7}  {:<20} {:>9.3} {:>9.3} {:>6}",
                    model_type,
                    version,
                    a.created_at.format("%Y-%m-%d %H:%M:%S"),
                    a.metrics.validation_accuracy,
                    a.metrics.validation_log_loss,
                    a.seed
                )?,
                Err(e) => warn!(%model_type, version, error = %e, "Unreadable artifact"),
            }
        }
    }
    Ok(())
}
