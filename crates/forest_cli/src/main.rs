//! forestgen CLI
//!
//! Imports tree ensembles, generates and builds native inference code, and
//! verifies compiled artifacts against reference fixtures.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use forestgen_core::codegen::{self, PartitionStrategy};
use forestgen_core::import::treelite;
use forestgen_core::pipeline;
use forestgen_core::{ForestConfig, ReferenceFixture, TreeEnsembleIR, VerificationReport};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Failing pairs printed after a verification run
const MAX_LISTED_FAILURES: usize = 20;

#[derive(Parser, Debug)]
#[command(name = "forestgen")]
#[command(author = "forestgen Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compile tree ensembles to native code and verify the result", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Convert a treelite JSON dump into an IR document
    Import {
        /// Treelite JSON file
        input: PathBuf,

        /// IR document to write
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Generate C sources from an IR document
    Generate {
        /// IR document
        ir: PathBuf,

        /// Output directory for sources
        #[arg(short, long)]
        output: PathBuf,

        /// Number of translation units
        #[arg(long)]
        units: Option<usize>,

        /// Assign trees to units round-robin instead of in blocks
        #[arg(long)]
        round_robin: bool,

        /// Also export the batch entry point
        #[arg(long)]
        batch: bool,
    },

    /// Generate and compile a shared library from an IR document
    Build {
        /// IR document
        ir: PathBuf,

        /// Working directory for sources and the library
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Build an IR document and check the artifact against a fixture
    Verify {
        /// IR document
        ir: PathBuf,

        /// Fixture file with `X` and `y_pred`
        #[arg(long)]
        fixture: PathBuf,

        /// Keep build outputs here instead of a temporary directory
        #[arg(long)]
        workdir: Option<PathBuf>,

        /// Number of fixture pairs to check
        #[arg(long)]
        sample: Option<usize>,

        /// Sampling seed
        #[arg(long)]
        seed: Option<u64>,

        /// Relative tolerance
        #[arg(long)]
        rtol: Option<f64>,

        /// Absolute tolerance
        #[arg(long)]
        atol: Option<f64>,
    },
}

fn init_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")
}

fn load_config(path: Option<&Path>) -> Result<ForestConfig> {
    match path {
        Some(path) => ForestConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(ForestConfig::default()),
    }
}

fn load_ir(path: &Path) -> Result<TreeEnsembleIR> {
    TreeEnsembleIR::load(path)
        .with_context(|| format!("Failed to load IR document {}", path.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    info!("forestgen v{}", forestgen_core::VERSION);
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Import { input, output } => {
            let ir = treelite::from_path(&input)
                .with_context(|| format!("Failed to import {}", input.display()))?;
            ir.save(&output)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!(
                "Imported {} trees ({} features) to {}",
                ir.num_trees(),
                ir.num_features,
                output.display()
            );
            println!("Fingerprint: {}", ir.fingerprint()?);
        }

        Commands::Generate {
            ir,
            output,
            units,
            round_robin,
            batch,
        } => {
            if let Some(units) = units {
                config.codegen.parallel_units = units;
            }
            if round_robin {
                config.codegen.partition = PartitionStrategy::RoundRobin;
            }
            config.codegen.emit_batch |= batch;

            let ir = load_ir(&ir)?;
            let sources = codegen::generate(&ir, &output, &config.codegen)
                .context("Code generation failed")?;
            println!(
                "Generated {} translation units in {}",
                sources.translation_units().count(),
                output.display()
            );
        }

        Commands::Build { ir, output } => {
            let ir = load_ir(&ir)?;
            let exported = pipeline::export(&ir, &output, &config).context("Build failed")?;
            println!("Built {}", exported.library.display());
        }

        Commands::Verify {
            ir,
            fixture,
            workdir,
            sample,
            seed,
            rtol,
            atol,
        } => {
            let verification = &mut config.verification;
            verification.sample_size = sample.or(verification.sample_size);
            verification.seed = seed.unwrap_or(verification.seed);
            verification.rtol = rtol.unwrap_or(verification.rtol);
            verification.atol = atol.unwrap_or(verification.atol);
            config.validate().context("Invalid verification settings")?;

            let ir = load_ir(&ir)?;
            let fixture = ReferenceFixture::load(&fixture)
                .with_context(|| format!("Failed to load fixture {}", fixture.display()))?;

            let scratch;
            let workdir = match workdir {
                Some(dir) => dir,
                None => {
                    scratch = tempfile::tempdir().context("Failed to create working directory")?;
                    scratch.path().to_path_buf()
                }
            };

            let report = pipeline::verify_ensemble(&ir, &fixture, &workdir, &config)
                .context("Verification failed")?;
            print_report(&report);

            if !report.passed() {
                bail!(
                    "{} of {} predictions exceeded tolerance",
                    report.violations().count(),
                    report.checked()
                );
            }
        }
    }

    Ok(())
}

fn print_report(report: &VerificationReport) {
    println!("Checked pairs:      {}", report.checked());
    println!("Failed pairs:       {}", report.violations().count());
    println!("Max abs deviation:  {:e}", report.max_abs_deviation);
    println!("Max rel deviation:  {:e}", report.max_rel_deviation);

    for outcome in report.violations().take(MAX_LISTED_FAILURES) {
        println!(
            "  row {}: expected {}, got {} (abs {:e}, rel {:e})",
            outcome.row,
            outcome.expected,
            outcome.actual,
            outcome.abs_deviation,
            outcome.rel_deviation
        );
    }
    let failed = report.violations().count();
    if failed > MAX_LISTED_FAILURES {
        warn!("{} more failing pairs not listed", failed - MAX_LISTED_FAILURES);
    }
}
