use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use likeness_core::{
    descriptor, localizer, ArtifactPaths, Comparison, ComparisonContext, FaceDetector, Pipeline, RawImage,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "likeness", about = "Before/after face comparison CLI")]
struct Cli {
    #[command(flatten)]
    artifacts: ArtifactArgs,
    #[command(subcommand)]
    command: Commands,
}

/// Overrides for the `LIKENESS_*` artifact locations.
#[derive(Args, Debug, Default)]
struct ArtifactArgs {
    /// Directory holding the detector, classifier and scaler
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,
    /// Detector file name inside the model directory
    #[arg(long, global = true)]
    detector: Option<String>,
    /// Classifier file name inside the model directory
    #[arg(long, global = true)]
    classifier: Option<String>,
    /// Scaler file name inside the model directory
    #[arg(long, global = true)]
    scaler: Option<String>,
}

impl ArtifactArgs {
    fn resolve(self, base: ArtifactPaths) -> ArtifactPaths {
        ArtifactPaths {
            model_dir: self.model_dir.unwrap_or(base.model_dir),
            detector_file: self.detector.unwrap_or(base.detector_file),
            classifier_file: self.classifier.unwrap_or(base.classifier_file),
            scaler_file: self.scaler.unwrap_or(base.scaler_file),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Decide whether two photos show the same person
    Compare {
        before: PathBuf,
        after: PathBuf,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
        /// Write the two normalized face crops as PNG into this directory
        #[arg(long)]
        save_crops: Option<PathBuf>,
    },
    /// Localize one face and print its descriptors
    Features {
        image: PathBuf,
        /// Print the full descriptors as JSON
        #[arg(long)]
        json: bool,
    },
    /// Load the artifacts and report what they contain
    Check,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let paths = cli.artifacts.resolve(ArtifactPaths::from_env());

    match cli.command {
        Commands::Compare {
            before,
            after,
            json,
            save_crops,
        } => compare(&paths, &before, &after, json, save_crops.as_deref()),
        Commands::Features { image, json } => features(&paths, &image, json),
        Commands::Check => check(&paths),
    }
}

fn open_image(path: &Path) -> Result<RawImage> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    RawImage::decode(&bytes).with_context(|| format!("failed to decode {}", path.display()))
}

fn load_detector(paths: &ArtifactPaths) -> Result<FaceDetector> {
    let path = paths.detector();
    let detector = FaceDetector::load(&path).with_context(|| format!("failed to load detector {}", path.display()))?;
    tracing::info!(path = %path.display(), "detector loaded");
    Ok(detector)
}

fn load_context(paths: &ArtifactPaths) -> Result<ComparisonContext> {
    let ctx = ComparisonContext::load_from(paths).context("failed to load comparison artifacts")?;
    tracing::info!(
        classifier = %paths.classifier().display(),
        scaler = %paths.scaler().display(),
        kind = ctx.classifier().kind(),
        "comparison artifacts loaded"
    );
    Ok(ctx)
}

fn compare(paths: &ArtifactPaths, before: &Path, after: &Path, json: bool, save_crops: Option<&Path>) -> Result<()> {
    let before_image = open_image(before)?;
    let after_image = open_image(after)?;
    let mut pipeline = Pipeline::new(load_detector(paths)?, Arc::new(load_context(paths)?));

    let comparison = pipeline.compare(&before_image, &after_image)?;

    if let Some(dir) = save_crops {
        write_crops(dir, &comparison)?;
    }

    let decision = comparison.decision;
    if json {
        println!("{}", serde_json::to_string_pretty(&decision)?);
    } else {
        let verdict = if decision.same_person { "same person" } else { "different people" };
        println!("{verdict} (confidence {:.4})", decision.confidence);
    }
    Ok(())
}

/// Write both normalized crops as `before.png` and `after.png` into `dir`.
fn write_crops(dir: &Path, comparison: &Comparison) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    for (name, crop) in [("before.png", &comparison.before), ("after.png", &comparison.after)] {
        let path = dir.join(name);
        crop.as_gray()
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), "face crop written");
    }
    Ok(())
}

fn features(paths: &ArtifactPaths, image: &Path, json: bool) -> Result<()> {
    let raw = open_image(image)?;
    let mut detector = load_detector(paths)?;
    let crop = localizer::localize(&mut detector, &raw).with_context(|| format!("no usable face in {}", image.display()))?;
    let pair = descriptor::extract(&crop);
    tracing::debug!(texture = pair.texture.len(), gradient = pair.gradient.len(), "descriptors extracted");

    if json {
        println!("{}", serde_json::to_string(&pair)?);
        return Ok(());
    }
    println!("texture:  {} bins", pair.texture.len());
    for (bin, value) in pair.texture.iter().enumerate() {
        println!("  [{bin}] {value:.6}");
    }
    let norm = pair.gradient.iter().map(|v| v * v).sum::<f64>().sqrt();
    println!("gradient: {} values (L2 norm {norm:.4})", pair.gradient.len());
    Ok(())
}

fn check(paths: &ArtifactPaths) -> Result<()> {
    println!("model dir:  {}", paths.model_dir.display());

    let detector = paths.detector();
    load_detector(paths)?;
    println!("detector:   {} (ok)", detector.display());

    let ctx = load_context(paths)?;
    let classifier = ctx.classifier();
    println!(
        "classifier: {} ({}, {} features, threshold {})",
        paths.classifier().display(),
        classifier.kind(),
        classifier.n_features(),
        classifier.threshold()
    );
    println!(
        "scaler:     {} ({} features)",
        paths.scaler().display(),
        ctx.scaler().n_features()
    );
    Ok(())
}
