mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use photomark_core::faces::{FULL_TURN, QUARTER_TURNS};
use photomark_core::roster::parse_known_spec;
use photomark_core::{
    resolve_targets, run_batch, BatchOptions, CosineMatcher, DistanceMatcher, FaceVectorExtractor,
    HashRenamer, Matcher, MissingPreview, OnnxFaceAnalyzer, PerceptualHasher, Roster, Rotation,
};
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "photomark", version, about = "Batch tools for photo folders with pre-generated previews")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rename photos after the perceptual hashes of their p512 preview
    HashRename {
        #[command(flatten)]
        input: InputArgs,
        /// Log the renames without touching any file
        #[arg(long)]
        dry_run: bool,
    },
    /// Write face locations and encodings found in each p2000 preview
    FaceVectors {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        faces: FaceArgs,
    },
    /// Like face-vectors, also naming the known faces each photo contains
    FaceMatch {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        faces: FaceArgs,
        /// Known face as NAME=ENV_VAR; the variable holds a base64 face vector payload
        #[arg(long = "known", value_name = "NAME=VAR", value_parser = parse_known_spec)]
        known: Vec<(String, String)>,
        /// TOML roster file with [[person]] entries
        #[arg(long, value_name = "FILE")]
        roster: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = Metric::Cosine)]
        metric: Metric,
        /// Match threshold; overrides PHOTOMARK_MATCH_THRESHOLD
        #[arg(long)]
        threshold: Option<f32>,
    },
}

#[derive(Args)]
struct InputArgs {
    /// Image files or folders (folders are scanned one level deep)
    #[arg(required = true, value_name = "PATH")]
    paths: Vec<PathBuf>,
    /// What to do when a photo has no preview; defaults to skip for
    /// hash-rename and error for the face tools
    #[arg(long, value_enum)]
    on_missing_preview: Option<PreviewPolicy>,
}

#[derive(Args)]
struct FaceArgs {
    /// Rotations to try, in order, as comma-separated degrees
    #[arg(long, value_delimiter = ',', value_name = "DEGREES")]
    rotations: Option<Vec<Rotation>>,
    /// Directory containing det_10g.onnx and w600k_r50.onnx; overrides PHOTOMARK_MODEL_DIR
    #[arg(long, value_name = "DIR")]
    model_dir: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum PreviewPolicy {
    Skip,
    Error,
}

impl From<PreviewPolicy> for MissingPreview {
    fn from(policy: PreviewPolicy) -> Self {
        match policy {
            PreviewPolicy::Skip => MissingPreview::Skip,
            PreviewPolicy::Error => MissingPreview::Error,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Metric {
    /// Cosine similarity at or above the threshold (default 0.40)
    Cosine,
    /// Euclidean distance at or below the threshold (default 0.6)
    Distance,
}

impl Metric {
    fn matcher(self, threshold: Option<f32>) -> Box<dyn Matcher> {
        match (self, threshold) {
            (Metric::Cosine, Some(threshold)) => Box::new(CosineMatcher { threshold }),
            (Metric::Cosine, None) => Box::new(CosineMatcher::default()),
            (Metric::Distance, Some(tolerance)) => Box::new(DistanceMatcher { tolerance }),
            (Metric::Distance, None) => Box::new(DistanceMatcher::default()),
        }
    }
}

impl InputArgs {
    fn policy(&self, default: MissingPreview) -> MissingPreview {
        self.on_missing_preview.map(MissingPreview::from).unwrap_or(default)
    }
}

impl FaceArgs {
    fn rotations(&self, default: &[Rotation]) -> Vec<Rotation> {
        self.rotations.clone().unwrap_or_else(|| default.to_vec())
    }

    fn load_analyzer(&self, config: &Config) -> Result<OnnxFaceAnalyzer> {
        let model_dir = self.model_dir.as_ref().unwrap_or(&config.model_dir);
        OnnxFaceAnalyzer::load(model_dir, config.intra_threads)
            .with_context(|| format!("failed to load face models from {}", model_dir.display()))
    }
}

fn load_roster(known: &[(String, String)], file: Option<&PathBuf>) -> Result<Roster> {
    let mut roster = Roster::from_env(known).context("failed to load known faces")?;
    if let Some(path) = file {
        let from_file = Roster::from_file(path)
            .with_context(|| format!("failed to load roster {}", path.display()))?;
        roster.extend(from_file);
    }
    if roster.is_empty() {
        tracing::warn!("no known faces given, detected_faces will always be empty");
    } else {
        tracing::info!(known = ?roster.names(), "loaded known faces");
    }
    Ok(roster)
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stdout)
        .init();

    let config = Config::from_env();

    let input = match &cli.command {
        Commands::HashRename { input, .. }
        | Commands::FaceVectors { input, .. }
        | Commands::FaceMatch { input, .. } => input,
    };
    let targets: Vec<PathBuf> = resolve_targets(&input.paths).collect();
    if targets.is_empty() {
        tracing::info!("no image files to process");
        return Ok(ExitCode::SUCCESS);
    }

    let summary = match cli.command {
        Commands::HashRename { input, dry_run } => {
            let renamer = HashRenamer::new(PerceptualHasher)
                .with_missing_preview(input.policy(MissingPreview::Skip))
                .with_dry_run(dry_run);
            run_batch(&targets, BatchOptions::default(), |path| renamer.process(path))
        }
        Commands::FaceVectors { input, faces } => {
            let mut extractor = FaceVectorExtractor::new(faces.load_analyzer(&config)?)
                .with_rotations(faces.rotations(&FULL_TURN))
                .with_missing_preview(input.policy(MissingPreview::Error));
            run_batch(&targets, BatchOptions::default(), |path| extractor.process(path))
        }
        Commands::FaceMatch {
            input,
            faces,
            known,
            roster,
            metric,
            threshold,
        } => {
            let roster = load_roster(&known, roster.as_ref())?;
            let matcher = metric.matcher(threshold.or(config.match_threshold));
            let mut extractor = FaceVectorExtractor::new(faces.load_analyzer(&config)?)
                .with_rotations(faces.rotations(&QUARTER_TURNS))
                .with_missing_preview(input.policy(MissingPreview::Error))
                .with_identification(roster, matcher);
            run_batch(&targets, BatchOptions { report_progress: true }, |path| extractor.process(path))
        }
    };

    Ok(ExitCode::from(summary.exit_code()))
}
