use anyhow::Result;
use clap::{Parser, ValueEnum};
use digit_mlp::{
    metrics::{self, ClassificationReport},
    mnist::{self, CLASSES, IdxDirectory, PIXELS},
    train::{Trainer, TrainingConfig},
};
use env_logger::Env;
use log::info;
use ndarray_rand::rand::thread_rng;
use std::{path::PathBuf, time::Instant};

// The first 60000 examples train the network, the remaining 10000 test it.
const TRAINING_EXAMPLES: usize = 60_000;
// Training column shown by the preview after shuffling.
const PREVIEW_INDEX: usize = 12;

/// Train a 784-64-10 sigmoid/softmax network on MNIST and report how well it classifies the test
/// set.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Which training recipe to run
    #[arg(long, value_enum, default_value_t = Variant::Optimized)]
    variant: Variant,

    /// Folder holding the four MNIST ubyte gzips
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Skip printing a sample training digit before training
    #[arg(long)]
    no_preview: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Variant {
    /// Full-batch gradient descent, unscaled initialization
    Baseline,
    /// Mini-batch momentum descent, fan-in scaled initialization
    Optimized,
}

impl Variant {
    fn config(self) -> TrainingConfig {
        match self {
            Variant::Baseline => TrainingConfig::BASELINE,
            Variant::Optimized => TrainingConfig::OPTIMIZED,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = args.variant.config();
    let mut rng = thread_rng();

    let started = Instant::now();
    let data = mnist::load(&IdxDirectory::new(&args.data_dir), TRAINING_EXAMPLES, &mut rng)?;
    info!(
        "loaded {} training and {} test examples from {} in {:.1?}",
        data.training.examples(),
        data.test.examples(),
        args.data_dir.display(),
        started.elapsed()
    );

    if !args.no_preview && PREVIEW_INDEX < data.training.examples() {
        mnist::visualize(
            data.training.images.column(PREVIEW_INDEX),
            data.training.labels.column(PREVIEW_INDEX),
        );
    }

    info!("training the {:?} variant: {config:?}", args.variant);
    let started = Instant::now();
    let mut trainer = Trainer::new(config, PIXELS, CLASSES, &mut rng);
    trainer.train(&data, &mut rng);
    info!("training finished in {:.1?}", started.elapsed());

    let matrix = metrics::evaluate(trainer.parameters(), &data.test);
    println!("{matrix}");
    println!("{}", ClassificationReport::from(&matrix));

    Ok(())
}
