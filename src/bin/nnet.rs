//! Trains and evaluates models on the MNIST digits.
//!
//! Logging verbosity follows `RUST_LOG` and defaults to `info`.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ndarray::Array2;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nnet::dataset::mnist;
use nnet::eval;
use nnet::mlp::Network;
use nnet::option::TrainingOption;
use nnet::rbm::Rbm;

const NUM_CLASSES: usize = 10;

#[derive(Parser)]
#[command(name = "nnet")]
#[command(author, version, about = "Train neural networks on MNIST", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Multilayer perceptron classifier
    Mlp(MlpArgs),
    /// Restricted Boltzmann machine
    Rbm(RbmArgs),
}

/// Flags shared by every model.
#[derive(Args)]
struct Common {
    /// Evaluate the model given by --model instead of training
    #[arg(long)]
    test: bool,

    /// Parameters to start from, or to evaluate with --test
    #[arg(short, long, value_name = "FILE")]
    model: Option<PathBuf>,

    /// Where to write the trained parameters
    #[arg(short, long, value_name = "FILE", default_value = "nn.json")]
    output: PathBuf,

    /// Training options as JSON; flags below override its fields
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// MNIST image file
    #[arg(long, value_name = "FILE", default_value = "data/train-images-idx3-ubyte")]
    images: PathBuf,

    #[arg(long)]
    learning_rate: Option<f64>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long, default_value_t = 100)]
    hidden_units: usize,

    #[arg(long)]
    mini_batch_size: Option<usize>,

    /// Apply L2 regularization to the weights
    #[arg(long)]
    l2: bool,

    /// Keep every n-th pixel along each image axis
    #[arg(long, default_value_t = 1)]
    down: usize,
}

#[derive(Args)]
struct MlpArgs {
    #[command(flatten)]
    common: Common,

    /// MNIST label file
    #[arg(long, value_name = "FILE", default_value = "data/train-labels-idx1-ubyte")]
    labels: PathBuf,
}

#[derive(Args)]
struct RbmArgs {
    #[command(flatten)]
    common: Common,

    /// Number of Gibbs sampling steps per update
    #[arg(long)]
    order: Option<usize>,

    /// Use persistent contrastive divergence
    #[arg(long)]
    persistent: bool,
}

impl Common {
    fn training_option(&self) -> Result<TrainingOption> {
        let mut option = match &self.config {
            Some(path) => TrainingOption::from_json_file(path)
                .with_context(|| format!("failed to read {}", path.display()))?,
            None => TrainingOption::default().monitoring(true),
        };
        if let Some(rate) = self.learning_rate {
            option.learning_rate = rate;
        }
        if let Some(epochs) = self.epochs {
            option.epochs = epochs;
        }
        if let Some(size) = self.mini_batch_size {
            option.mini_batch_size = size;
        }
        if self.l2 {
            option.l2_regularization = true;
        }
        Ok(option)
    }

    /// Loads the images as normalized, optionally down-sampled rows, along
    /// with the resulting image width and height.
    fn load_inputs(&self) -> Result<(Array2<f64>, usize, usize)> {
        anyhow::ensure!(self.down > 0, "--down must be at least 1");
        let images = mnist::read_images(open(&self.images)?)
            .with_context(|| format!("failed to parse {}", self.images.display()))?;
        info!(
            count = images.len(),
            width = images.width,
            height = images.height,
            "loaded images"
        );
        let data = mnist::down_sample(
            mnist::prepare_inputs(&images).view(),
            images.width,
            images.height,
            self.down,
        );
        let (width, height) = (images.width / self.down, images.height / self.down);
        Ok((mnist::normalize_pixels(data.view()), width, height))
    }
}

fn open(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    Ok(BufReader::new(file))
}

fn run_mlp(args: &MlpArgs) -> Result<()> {
    let common = &args.common;
    let (data, width, height) = common.load_inputs()?;
    let labels = mnist::read_labels(open(&args.labels)?)
        .with_context(|| format!("failed to parse {}", args.labels.display()))?;
    anyhow::ensure!(
        labels.len() == data.nrows(),
        "{} labels for {} images",
        labels.len(),
        data.nrows()
    );

    if common.test {
        let path = common.model.as_ref().context("--test requires --model")?;
        let network = Network::load(path)?;
        let labels: Vec<usize> = labels.iter().map(|&l| l as usize).collect();
        let accuracy = eval::accuracy(&network, data.view(), &labels);
        println!(
            "Acc. {:.6} ({}/{})",
            accuracy,
            (accuracy * labels.len() as f64).round(),
            labels.len()
        );
        return Ok(());
    }

    let mut network = match &common.model {
        Some(path) => Network::load(path)?,
        None => Network::new(&[width * height, common.hidden_units, NUM_CLASSES]),
    };
    let target = mnist::prepare_targets(&labels, NUM_CLASSES)?;
    network.train(data.view(), target.view(), &common.training_option()?)?;
    network.save(&common.output)?;
    info!(path = %common.output.display(), "parameters written");
    Ok(())
}

fn run_rbm(args: &RbmArgs) -> Result<()> {
    let common = &args.common;
    let (data, width, height) = common.load_inputs()?;

    if common.test {
        let path = common.model.as_ref().context("--test requires --model")?;
        let rbm = Rbm::load(path)?;
        let order = args.order.unwrap_or(1);
        anyhow::ensure!(order > 0, "--order must be at least 1");
        let mut rng = rand::thread_rng();
        println!(
            "pseudo log-likelihood {:.6}, reconstruction error {:.6}",
            rbm.pseudo_log_likelihood(data.view(), &mut rng),
            rbm.reconstruction_error(data.view(), order, &mut rng)
        );
        return Ok(());
    }

    let mut rbm = match &common.model {
        Some(path) => Rbm::load(path)?,
        None => Rbm::new(width * height, common.hidden_units),
    };
    let mut option = common.training_option()?;
    if let Some(order) = args.order {
        option.order_of_gibbs_sampling = order;
    }
    if args.persistent {
        option.use_persistent = true;
    }
    rbm.train(data.view(), &option)?;
    rbm.save(&common.output)?;
    info!(path = %common.output.display(), "parameters written");
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Command::Mlp(args) => run_mlp(args),
        Command::Rbm(args) => run_rbm(args),
    }
}
