use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use cifar_cil::backbone::{LinearProbeFactory, NormLayer};
use cifar_cil::config::ExperimentConfig;
use cifar_cil::data::loader::{ArchiveSplit, CifarBinaryProvider, DatasetProvider};
use cifar_cil::data::model::{ClassSet, DatasetVariant, Split};
use cifar_cil::data::preprocess::{LabelPreprocessing, NormType};
use cifar_cil::experiment::Experiment;
use cifar_cil::export::export_samples;
use cifar_cil::report::write_records;
use cifar_cil::store::{parse_class_order, CheckpointStore, DirectoryStore};

#[derive(Parser, Debug)]
#[command(author, version, about = "Class-incremental evaluation on CIFAR-10/100")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate every configured session and write accuracy records
    Evaluate {
        #[command(flatten)]
        run: RunArgs,

        /// Splits to evaluate (train, valid, test)
        #[arg(long, value_delimiter = ',', default_value = "train,test")]
        splits: Vec<String>,

        /// Output file (.csv, .json or .parquet)
        #[arg(long, default_value = "accs.csv")]
        output: PathBuf,
    },

    /// Print the old/new/all classes of a session
    ClassInfo {
        #[command(flatten)]
        run: RunArgs,

        /// Session index
        #[arg(long)]
        session: usize,
    },

    /// Save raw dataset images as PNG files
    ExportSamples {
        /// Directory holding the extracted CIFAR archives
        #[arg(long, default_value = "cache")]
        data_dir: PathBuf,

        /// 10 or 100
        #[arg(long, default_value = "100")]
        variant: u32,

        /// Read the test archive instead of the training archive
        #[arg(long)]
        test: bool,

        /// Classes to export (default: all)
        #[arg(long, value_delimiter = ',')]
        classes: Vec<usize>,

        /// Maximum number of images
        #[arg(long, default_value = "10")]
        count: usize,

        /// Output directory
        #[arg(long, default_value = "samples")]
        out: PathBuf,
    },
}

/// Config file plus command-line overrides.
#[derive(clap::Args, Debug)]
struct RunArgs {
    /// JSON experiment config
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    algo: Option<String>,

    #[arg(long)]
    seed: Option<u64>,

    /// Sessions to evaluate, in order
    #[arg(long, value_delimiter = ',')]
    sessions: Option<Vec<usize>>,

    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(long)]
    store_dir: Option<PathBuf>,

    #[arg(long)]
    batch_size: Option<usize>,

    /// none, centered, max or minus-one-to-one
    #[arg(long)]
    image_normalization: Option<NormType>,

    /// none or one-hot
    #[arg(long)]
    label_preprocessing: Option<LabelPreprocessing>,

    /// batch-norm or identity
    #[arg(long)]
    norm_layer: Option<NormLayer>,
}

impl RunArgs {
    fn into_config(self) -> Result<ExperimentConfig> {
        let mut config = match &self.config {
            Some(path) => ExperimentConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => ExperimentConfig::default(),
        };
        if let Some(algo) = self.algo {
            config.algo = algo;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(sessions) = self.sessions {
            config.sessions = Some(sessions);
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(dir) = self.store_dir {
            config.store_dir = dir;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(norm) = self.image_normalization {
            config.dataset.image_normalization = norm;
        }
        if let Some(labels) = self.label_preprocessing {
            config.dataset.label_preprocessing = labels;
        }
        if let Some(norm_layer) = self.norm_layer {
            config.norm_layer = norm_layer;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Command::Evaluate {
            run,
            splits,
            output,
        } => {
            let config = run.into_config()?;
            let splits = splits
                .iter()
                .map(|s| s.parse::<Split>())
                .collect::<cifar_cil::Result<Vec<_>>>()?;
            let store = DirectoryStore::new(&config.store_dir);
            let experiment = Experiment::new(
                config,
                &CifarBinaryProvider,
                Box::new(store),
                Arc::new(LinearProbeFactory),
            )
            .context("setting up experiment")?;

            let mut records = Vec::new();
            for split in splits {
                records.extend(
                    experiment
                        .accs(split)
                        .with_context(|| format!("evaluating {split} accuracies"))?,
                );
            }
            write_records(&output, &records)
                .with_context(|| format!("writing {}", output.display()))?;
        }

        Command::ClassInfo { run, session } => {
            let config = run.into_config()?;
            let store = DirectoryStore::new(&config.store_dir);
            let order = store.load_class_order(&config.algo, config.seed)?;
            let info = parse_class_order(&order, session, config.classes_per_session)?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Command::ExportSamples {
            data_dir,
            variant,
            test,
            classes,
            count,
            out,
        } => {
            let variant = DatasetVariant::try_from(variant)?;
            let archive = if test { ArchiveSplit::Test } else { ArchiveSplit::Train };
            let provider = CifarBinaryProvider;
            let images = provider
                .load(&data_dir, variant, archive)
                .context("loading CIFAR archive")?;
            let names = provider.label_names(&data_dir, variant)?;
            let classes = if classes.is_empty() {
                ClassSet::all(variant.num_classes())
            } else {
                ClassSet::new(classes)
            };
            classes.validate(variant.num_classes())?;
            let written = export_samples(&images, names.as_deref(), &classes, count, &out)?;
            println!("Wrote {} images to {}", written.len(), out.display());
        }
    }
    Ok(())
}
