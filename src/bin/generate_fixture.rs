//! Write a small synthetic CIFAR-10 run to disk.
//!
//! ```bash
//! cargo run --bin generate_fixture -- --out fixture
//! cargo run -- evaluate --config fixture/config.json --output accs.csv
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use cifar_cil::config::ExperimentConfig;
use cifar_cil::fixture::{write_fixture, FixtureOptions};

#[derive(Parser, Debug)]
#[command(author, version, about = "Generate a synthetic CIFAR-10 class-incremental run")]
struct Args {
    /// Output directory (archives, class order, checkpoints, config)
    #[arg(long, default_value = "fixture")]
    out: PathBuf,

    #[arg(long, default_value = "synthetic")]
    algo: String,

    #[arg(long, default_value = "42")]
    seed: u64,

    /// Training images per class
    #[arg(long, default_value = "20")]
    train_per_class: usize,

    /// Test images per class
    #[arg(long, default_value = "10")]
    test_per_class: usize,

    /// Classes introduced per session
    #[arg(long, default_value = "2")]
    classes_per_session: usize,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let options = FixtureOptions {
        algo: args.algo.clone(),
        seed: args.seed,
        train_per_class: args.train_per_class,
        test_per_class: args.test_per_class,
        classes_per_session: args.classes_per_session,
        ..FixtureOptions::default()
    };
    let summary = write_fixture(&args.out, &args.out, &options).context("writing fixture")?;

    let config = ExperimentConfig {
        algo: options.algo,
        seed: options.seed,
        sessions: None,
        classes_per_session: options.classes_per_session,
        data_dir: args.out.clone(),
        store_dir: args.out.clone(),
        dataset: options.dataset,
        ..ExperimentConfig::default()
    };
    let config_path = args.out.join("config.json");
    std::fs::write(&config_path, serde_json::to_string_pretty(&config)?)
        .with_context(|| format!("writing {}", config_path.display()))?;

    println!(
        "Wrote {} train / {} test images and {} sessions to {} (config: {})",
        summary.train_images,
        summary.test_images,
        summary.sessions,
        args.out.display(),
        config_path.display()
    );
    Ok(())
}
