//! bcd-rs CLI: serve the API, classify images, inspect weight archives.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bcd::prelude::*;
use bcd::serve::{server, InferenceService, ServeConfig};

#[derive(Parser)]
#[command(name = "bcd")]
#[command(author, version)]
#[command(about = "Breast ultrasound classification with Grad-CAM and LIME explanations")]
#[command(long_about = "bcd-rs: ResNet-50 classification of breast ultrasound images into
benign, malignant and normal, with Grad-CAM and LIME explanations.

EXAMPLES:
  # Serve the HTTP API
  bcd serve --config bcd.yaml

  # Classify one image and write both explanations
  bcd predict scan.png --weights model.mpk --explain-dir ./out

  # List the layers and parameter shapes of an archive
  bcd weights inspect model.mpk

  # Write a seeded random archive for smoke tests
  bcd weights init random.mpk --seed 7")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// YAML configuration file (defaults to $BCD_CONFIG)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Bind address
        #[arg(long, value_name = "HOST")]
        host: Option<String>,

        /// Bind port
        #[arg(long, value_name = "PORT")]
        port: Option<u16>,

        /// Weight archive to load
        #[arg(long, value_name = "FILE")]
        weights: Option<PathBuf>,
    },
    /// Classify an image file
    Predict {
        /// Image to classify
        image: PathBuf,

        /// Weight archive to load
        #[arg(long, value_name = "FILE")]
        weights: Option<PathBuf>,

        /// Write Grad-CAM and LIME images into this directory
        #[arg(long, value_name = "DIR")]
        explain_dir: Option<PathBuf>,
    },
    /// Work with weight archives
    Weights {
        #[command(subcommand)]
        command: WeightCommands,
    },
}

#[derive(Subcommand)]
enum WeightCommands {
    /// Print layer names and parameter shapes
    Inspect {
        /// Archive path
        archive: PathBuf,

        /// Also compare against the configured architecture
        #[arg(long)]
        check: bool,
    },
    /// Write a randomly initialized archive matching the architecture
    Init {
        /// Output path
        out: PathBuf,

        /// Initialization seed; must differ from the architecture's own
        #[arg(long, default_value = "7", value_name = "SEED")]
        seed: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ServeConfig::resolve(cli.config.as_deref()).context("Failed to load configuration")?;

    // Setup logging; RUST_LOG wins over -v, which wins over logs.level
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let directive = config.logs.directive(cli.verbose);
            EnvFilter::try_new(&directive)
                .with_context(|| format!("Invalid log filter {directive:?}"))?
        }
    };
    let registry = tracing_subscriber::registry().with(filter);
    if config.logs.use_json(cli.log_json) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    match cli.command {
        Commands::Serve { host, port, weights } => handle_serve(config, host, port, weights),
        Commands::Predict {
            image,
            weights,
            explain_dir,
        } => handle_predict(config, &image, weights, explain_dir),
        Commands::Weights { command } => match command {
            WeightCommands::Inspect { archive, check } => handle_inspect(&config, &archive, check),
            WeightCommands::Init { out, seed } => handle_init(&config, &out, seed),
        },
    }
}

fn handle_serve(
    mut config: ServeConfig,
    host: Option<String>,
    port: Option<u16>,
    weights: Option<PathBuf>,
) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if weights.is_some() {
        config.model.weights_path = weights;
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(server::run(config))?;
    Ok(())
}

fn handle_predict(
    mut config: ServeConfig,
    image: &Path,
    weights: Option<PathBuf>,
    explain_dir: Option<PathBuf>,
) -> Result<()> {
    if weights.is_some() {
        config.model.weights_path = weights;
    }
    let device = NdArrayDevice::default();
    let service = InferenceService::<InferenceBackend>::from_config(&config, &device)?;

    let session = service
        .predict_path(image)
        .with_context(|| format!("Failed to classify {}", image.display()))?;
    let prediction = session.prediction;

    println!("Image: {}", image.display());
    println!(
        "Prediction: {} ({:.2}%)",
        prediction.label,
        prediction.confidence_percent()
    );
    for (label, p) in prediction.iter() {
        println!("  {:<10} {:>6.2}%", label.name(), p * 100.0);
    }

    if let Some(dir) = explain_dir {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let explanations = service.explain(&session.id)?;
        for image in [&explanations.saliency, &explanations.surrogate] {
            let path = dir.join(image.file_name());
            std::fs::write(&path, &image.bytes)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}

fn handle_inspect(config: &ServeConfig, path: &Path, check: bool) -> Result<()> {
    let archive = WeightArchive::load(path)
        .with_context(|| format!("Failed to read weight archive {}", path.display()))?;
    let manifest = archive.manifest();

    println!("Archive: {}", path.display());
    println!("Architecture: {}", archive.arch);
    println!(
        "Layers: {}  Parameters: {}  Values: {}",
        manifest.len(),
        manifest.num_params(),
        archive.num_values()
    );
    println!("─────────────────────────────────────────");
    for layer in manifest.layer_names() {
        println!("{layer}");
        if let Some(params) = manifest.params(layer) {
            for (name, shape) in params {
                println!("  {:<40} {:?}", name, shape);
            }
        }
    }

    if check {
        let device = NdArrayDevice::default();
        let classifier = Classifier::<NdArray>::new(config.model.architecture.clone(), &device)?;
        let expected = WeightManifest::from_graph(classifier.graph());
        let missing: Vec<&str> = expected
            .layer_names()
            .into_iter()
            .filter(|layer| !manifest.contains(layer))
            .collect();
        let unexpected: Vec<&str> = manifest
            .layer_names()
            .into_iter()
            .filter(|layer| !expected.contains(layer))
            .collect();
        println!();
        if missing.is_empty() && unexpected.is_empty() {
            println!("All {} architecture layers present.", expected.len());
        } else {
            bail!(
                "Archive does not match the architecture: missing {:?}, unexpected {:?}",
                missing,
                unexpected
            );
        }
    }
    Ok(())
}

fn handle_init(config: &ServeConfig, out: &Path, seed: u64) -> Result<()> {
    let mut architecture = config.model.architecture.clone();
    if architecture.init_seed == Seed::new(seed) {
        bail!("Seed {seed} equals the architecture's init seed; the load checksum guard would reject the archive");
    }
    architecture.init_seed = Seed::new(seed);
    info!(seed, path = %out.display(), "initializing weight archive");

    let device = NdArrayDevice::default();
    let classifier = Classifier::<NdArray>::new(architecture, &device)?;
    let archive = classifier.export_archive()?;
    archive
        .save(out)
        .with_context(|| format!("Failed to write {}", out.display()))?;

    println!(
        "Wrote {} ({} layers, {} values)",
        out.display(),
        archive.layer_names().len(),
        archive.num_values()
    );
    Ok(())
}
