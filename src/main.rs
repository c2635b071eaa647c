//! sonohealth CLI.
//!
//! Audio files are raw little-endian f32 mono PCM at the configured sample rate.
//!
//! Usage:
//!   sonohealth train --machine pump-a --input healthy.f32
//!   sonohealth train --machine pump-a --input overload.f32 --label Overload --kind faulty
//!   sonohealth diagnose --machine pump-a --input today.f32
//!   sonohealth fleet --input scores.json

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use sonohealth::diagnosis::SessionScorer;
use sonohealth::metrics::{metric_names, MetricsRegistry};
use sonohealth::{
    rank_fleet, AppConfig, CoreError, DiagnosisEngine, FeatureExtractor, FleetEntry,
    MachineStore, ModelHandle, ModelType, SqliteStore, TrainingData,
};

#[derive(Parser)]
#[command(name = "sonohealth", version, about = "Acoustic machine health scoring")]
struct CliArgs {
    /// TOML configuration file.
    #[arg(long, env = "SONOHEALTH_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database holding machines, models and diagnoses.
    #[arg(long, env = "SONOHEALTH_DB", default_value = "sonohealth.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train a model for one operating state from a reference recording.
    Train {
        #[arg(long)]
        machine: String,
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value = "Baseline")]
        label: String,
        #[arg(long, value_enum, default_value_t = Kind::Healthy)]
        kind: Kind,
    },
    /// Score a recording against the machine's models and print the result.
    Diagnose {
        #[arg(long)]
        machine: String,
        #[arg(long)]
        input: PathBuf,
        /// Do not record the result in the database.
        #[arg(long)]
        dry_run: bool,
    },
    /// Rank machines and flag outliers.
    Fleet {
        /// JSON array of `{ "machine_id", "score", "is_gold_standard" }`.
        /// Without it, the latest stored diagnosis of every machine is used.
        #[arg(long)]
        input: Option<PathBuf>,
        /// Machine to treat as the gold standard when reading from the database.
        #[arg(long)]
        gold: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Healthy,
    Faulty,
}

impl From<Kind> for ModelType {
    fn from(k: Kind) -> Self {
        match k {
            Kind::Healthy => ModelType::Healthy,
            Kind::Faulty => ModelType::Faulty,
        }
    }
}

fn main() -> ExitCode {
    sonohealth::init_tracing();
    let args = CliArgs::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: CliArgs) -> sonohealth::Result<()> {
    let config = match &args.config {
        Some(path) => AppConfig::load_from_file(path)?,
        None => AppConfig::load(),
    };
    config.validate()?;

    match args.command {
        Command::Train {
            machine,
            input,
            label,
            kind,
        } => {
            let store = SqliteStore::open(&args.db)?;
            train(&config, &store, &machine, &input, &label, kind.into())
        }
        Command::Diagnose {
            machine,
            input,
            dry_run,
        } => {
            let store = SqliteStore::open(&args.db)?;
            diagnose(&config, &store, &machine, &input, dry_run)
        }
        Command::Fleet { input, gold } => {
            let entries = match input {
                Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
                None => entries_from_store(&SqliteStore::open(&args.db)?, gold.as_deref())?,
            };
            let ranking = rank_fleet(&entries);
            println!("{}", serde_json::to_string_pretty(&ranking)?);
            Ok(())
        }
    }
}

fn train(
    config: &AppConfig,
    store: &dyn MachineStore,
    machine: &str,
    input: &Path,
    label: &str,
    kind: ModelType,
) -> sonohealth::Result<()> {
    let metrics = Arc::new(MetricsRegistry::new());
    let samples = read_pcm_f32(input)?;
    let mut extractor = FeatureExtractor::new(config.dsp.clone())?;
    let features = extractor.extract_buffer(&samples);
    let data = TrainingData::new(machine, config.dsp.clone(), features);

    let span = metrics.span(metric_names::TRAINING);
    let model = sonohealth::gmia::train_model_with_target(
        &data,
        label,
        kind,
        config.scoring.target_score,
    )?;
    let elapsed_us = span.finish();

    if let Some(meta) = model.metadata.as_ref().filter(|m| !m.is_consistent()) {
        warn!(
            mean_cos = meta.mean_cosine_similarity,
            std_cos = meta.std_cosine_similarity,
            "reference recording is not self-consistent; scores may be unreliable"
        );
    }
    let machine = store.add_model(machine, model)?;
    info!(machine_id = %machine.id, models = machine.models.len(), elapsed_us, "model stored");
    println!("{}", serde_json::to_string_pretty(&machine)?);
    Ok(())
}

fn diagnose(
    config: &AppConfig,
    store: &dyn MachineStore,
    machine: &str,
    input: &Path,
    dry_run: bool,
) -> sonohealth::Result<()> {
    let models = ModelHandle::new(machine).get_or_load(store)?;
    if models.is_empty() {
        return Err(CoreError::NoModels);
    }
    let samples = read_pcm_f32(input)?;
    let mut extractor = FeatureExtractor::new(config.dsp.clone())?;
    let features = extractor.extract_buffer(&samples);
    let sample_rate = config.dsp.sample_rate;
    let engine = DiagnosisEngine::new(config.scoring.clone());

    let result = if models.len() == 1 {
        engine.diagnose(machine, &models[0], &features, sample_rate)?
    } else {
        // Offline multiclass runs the same smoothing as a live session.
        let mut scorer = SessionScorer::new(engine, Arc::clone(&models), sample_rate)?;
        for f in &features {
            scorer.score(f)?;
        }
        scorer.finish(machine).ok_or(CoreError::EmptyFeatureSet)?
    };

    if !dry_run {
        store.record_diagnosis(&result)?;
    }
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn entries_from_store(
    store: &dyn MachineStore,
    gold: Option<&str>,
) -> sonohealth::Result<Vec<FleetEntry>> {
    store
        .list_machines()?
        .into_iter()
        .map(|id| {
            let score = store.latest_diagnosis(&id)?.map(|d| d.health_score);
            let mut entry = FleetEntry::new(id, score);
            entry.is_gold_standard = gold == Some(entry.machine_id.as_str());
            Ok(entry)
        })
        .collect()
}

fn read_pcm_f32(path: &Path) -> sonohealth::Result<Vec<f32>> {
    let bytes = std::fs::read(path)?;
    let chunks = bytes.chunks_exact(4);
    if !chunks.remainder().is_empty() {
        warn!(
            path = %path.display(),
            trailing = chunks.remainder().len(),
            "ignoring trailing bytes"
        );
    }
    Ok(chunks
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
