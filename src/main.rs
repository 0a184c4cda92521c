use anyhow::Result;
use env_logger::Env;
use log::info;
use mnist_mlp_adam::config::{self, Hyperparameters};
use mnist_mlp_adam::data;
use mnist_mlp_adam::mnist::{CLASSES, MnistDataset};
use mnist_mlp_adam::network::Network;
use mnist_mlp_adam::summary::SummaryWriter;
use mnist_mlp_adam::train::Trainer;
use ndarray_rand::rand::{SeedableRng, rngs::StdRng};

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let hyper = Hyperparameters::default();
    let summary = SummaryWriter::create(&config::log_dir())?;
    info!("Scalar summaries go to {}", summary.path().display());

    let dataset = MnistDataset::load(&config::data_dir())?;
    let mut data_rng = StdRng::seed_from_u64(hyper.data_seed);
    let partitions = data::prepare(&dataset, &hyper, &mut data_rng)?;

    let mut model_rng = StdRng::seed_from_u64(hyper.model_seed);
    let network = Network::new(
        partitions.train.input_width(),
        &hyper.hidden_widths,
        CLASSES,
        &mut model_rng,
    )?;

    let mut trainer = Trainer::new(network, hyper, Some(summary), data_rng, model_rng);
    trainer.run(&partitions)?;

    Ok(())
}
