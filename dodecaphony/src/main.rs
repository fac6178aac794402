// Dodecaphony: CLI entry point.
//
// Builds a twelve-tone fragment from a JSON config (or the built-in default),
// improves it with variable neighborhood search, and writes the best
// fragments. Each result goes to its own numbered directory under the output
// directory, with a MIDI file and a per-function evaluation report.
//
// Usage:
//   cargo run -p dodecaphony -- [--config run.json] [--n-fragments N]
//     [--seed N] [--output-dir DIR] [--iterations N]

use anyhow::Context;
use clap::Parser;
use dodecaphony::config::Config;
use dodecaphony::evaluation::Evaluator;
use dodecaphony::fragment::initialize_fragment;
use dodecaphony::midi::write_midi;
use dodecaphony::optimization::optimize_with_vns;
use log::LevelFilter;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::PathBuf;
use std::{env, fs, process};

/// Logging is controlled with RUST_LOG; see docs for the env_logger crate.
/// If RUST_LOG is not set, the log level defaults to Info.
#[derive(Parser)]
#[command(version, about, long_about = None, verbatim_doc_comment)]
struct Cli {
    /// JSON run configuration; built-in defaults when omitted
    #[arg(long)]
    config: Option<PathBuf>,
    /// Number of best fragments to write
    #[arg(long)]
    n_fragments: Option<usize>,
    /// Seed for a reproducible run
    #[arg(long)]
    seed: Option<u64>,
    /// Directory for the results
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Number of optimizer iterations
    #[arg(long)]
    iterations: Option<usize>,
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(n_fragments) = self.n_fragments {
            config.rendering.n_fragments = n_fragments;
        }
        if let Some(seed) = self.seed {
            config.optimization.seed = Some(seed);
        }
        if let Some(dir) = &self.output_dir {
            config.rendering.dir = dir.clone();
        }
        if let Some(iterations) = self.iterations {
            config.optimization.n_iterations = iterations;
        }
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut log_builder = env_logger::builder();
    if env::var("RUST_LOG").is_err() {
        log_builder.filter_level(LevelFilter::Info);
    }
    log_builder.init();

    let mut config = match &cli.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    cli.apply_overrides(&mut config);

    let mut rng = match config.optimization.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let fragment = initialize_fragment(&config.fragment, &mut rng).context("building the initial fragment")?;
    let evaluator = Evaluator::new(&config.evaluation)?;
    log::info!(
        "Initial fragment: {} lines, {} measures, score {:.5}",
        fragment.n_lines(),
        fragment.n_measures,
        evaluator.evaluate(&fragment)
    );

    let search_params = config.optimization.reseeded(&mut rng);
    let records = optimize_with_vns(fragment, &search_params, &evaluator)?;

    fs::create_dir_all(&config.rendering.dir)
        .with_context(|| format!("creating {}", config.rendering.dir.display()))?;
    let config_path = config.rendering.dir.join("config.json");
    fs::write(&config_path, serde_json::to_string_pretty(&config)?)
        .with_context(|| format!("writing {}", config_path.display()))?;

    for (rank, record) in records.iter().take(config.rendering.n_fragments).enumerate() {
        let dir = config.rendering.dir.join(rank.to_string());
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        let midi_path = dir.join("music.mid");
        write_midi(&record.fragment, config.rendering.tempo_bpm, &midi_path)
            .with_context(|| format!("writing {}", midi_path.display()))?;
        let report = evaluator.report(&record.fragment);
        fs::write(dir.join("evaluation.txt"), &report)
            .with_context(|| format!("writing report to {}", dir.display()))?;
        println!("Fragment #{rank} ({})", midi_path.display());
        println!("{report}");
    }
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        process::exit(2);
    }
}
