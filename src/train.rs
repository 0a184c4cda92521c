use crate::config::Hyperparameters;
use crate::data::{Partitions, Split};
use crate::loss::cross_entropy;
use crate::metrics::accuracy;
use crate::network::Network;
use crate::optimizer::Adam;
use crate::summary::SummaryWriter;
use anyhow::{Result, ensure};
use log::{debug, info};
use ndarray_rand::rand::rngs::StdRng;

pub const LOSS_TAG: &str = "cross_entropy";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingState {
    NotStarted,
    InEpoch(usize),
    EpochComplete(usize),
    Complete,
}

#[derive(Debug)]
pub struct TrainingReport {
    pub validation_losses: Vec<f32>,
    pub accuracy: f32,
}

pub struct Trainer {
    network: Network,
    optimizer: Adam,
    hyper: Hyperparameters,
    summary: Option<SummaryWriter>,
    // Drives the per-epoch shuffle.
    shuffle_rng: StdRng,
    // Drives the dropout masks.
    dropout_rng: StdRng,
    state: TrainingState,
}

impl Trainer {
    pub fn new(
        network: Network,
        hyper: Hyperparameters,
        summary: Option<SummaryWriter>,
        shuffle_rng: StdRng,
        dropout_rng: StdRng,
    ) -> Trainer {
        Trainer {
            network,
            optimizer: Adam::new(hyper.learning_rate, hyper.beta_1, hyper.beta_2),
            hyper,
            summary,
            shuffle_rng,
            dropout_rng,
            state: TrainingState::NotStarted,
        }
    }

    pub fn state(&self) -> TrainingState {
        self.state
    }

    pub fn optimizer(&self) -> &Adam {
        &self.optimizer
    }

    // Trains for the configured number of epochs, reporting the validation loss after each one,
    // then measures accuracy on the test partition.
    pub fn run(&mut self, partitions: &Partitions) -> Result<TrainingReport> {
        ensure!(
            self.state == TrainingState::NotStarted,
            "trainer has already been run"
        );
        ensure!(
            self.hyper.batch_size > 0 && self.hyper.batch_size <= partitions.train.len(),
            "batch size {} does not fit a training partition of {}",
            self.hyper.batch_size,
            partitions.train.len()
        );
        ensure!(
            !partitions.validation.is_empty() && !partitions.test.is_empty(),
            "validation and test partitions must not be empty"
        );

        let batches = partitions.train.len() / self.hyper.batch_size;
        info!(
            "Training {:?} for {} epochs of {} batches of {}",
            self.network.sizes(),
            self.hyper.epochs,
            batches,
            self.hyper.batch_size
        );

        let mut validation_losses = Vec::with_capacity(self.hyper.epochs);
        for epoch in 0..self.hyper.epochs {
            self.state = TrainingState::InEpoch(epoch);
            self.train_epoch(&partitions.train, batches)?;

            self.state = TrainingState::EpochComplete(epoch);
            let validation_loss = self.validate(epoch, &partitions.validation)?;
            println!("epoch: {epoch} validation loss: {validation_loss}");
            validation_losses.push(validation_loss);
        }

        let accuracy = self.evaluate(&partitions.test)?;
        self.state = TrainingState::Complete;
        println!("accuracy: {accuracy}");

        Ok(TrainingReport {
            validation_losses,
            accuracy,
        })
    }

    // One optimizer step per full batch of a freshly shuffled copy of the training partition.
    // Rows past the last full batch are not used in this epoch.
    fn train_epoch(&mut self, train: &Split, batches: usize) -> Result<()> {
        let shuffled = train.shuffled(&mut self.shuffle_rng);

        for i in 0..batches {
            let start = i * self.hyper.batch_size;
            let end = start + self.hyper.batch_size;
            let (inputs, targets) = shuffled.batch(start, end);

            let pass =
                self.network
                    .feedforward_train(inputs, self.hyper.keep_prob, &mut self.dropout_rng)?;
            let gradients = self.network.backpropagate(&pass, targets)?;
            self.optimizer.step(&mut self.network, &gradients)?;
        }

        debug!("{} optimizer steps taken", self.optimizer.steps());
        Ok(())
    }

    fn validate(&mut self, epoch: usize, validation: &Split) -> Result<f32> {
        let probabilities = self.network.feedforward(validation.inputs.view())?;
        let loss = cross_entropy(probabilities.view(), validation.targets.view())?;

        if let Some(summary) = self.summary.as_mut() {
            summary.add_scalar(LOSS_TAG, epoch, loss)?;
        }
        info!("Epoch {epoch}: validation loss {loss}");
        Ok(loss)
    }

    fn evaluate(&self, test: &Split) -> Result<f32> {
        let probabilities = self.network.feedforward(test.inputs.view())?;
        let accuracy = accuracy(probabilities.view(), test.targets.view())?;
        info!("Test accuracy {accuracy} over {} examples", test.len());
        Ok(accuracy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mnist::CLASSES;
    use ndarray::Array2;
    use ndarray_rand::{
        RandomExt,
        rand::SeedableRng,
        rand_distr::{Normal, StandardNormal},
    };
    use std::fs;
    use tempfile::tempdir;

    const FEATURES: usize = 16;

    // Ten well separated Gaussian clusters, one per class.
    fn clustered(n: usize, rng: &mut StdRng) -> Split {
        let centers: Array2<f32> = Array2::random_using((CLASSES, FEATURES), StandardNormal, rng);
        let noise: Array2<f32> =
            Array2::random_using((n, FEATURES), Normal::new(0.0, 0.1).unwrap(), rng);
        let labels = (0..n).map(|i| i % CLASSES).collect::<Vec<_>>();

        let mut inputs = noise;
        for (mut row, &label) in inputs.rows_mut().into_iter().zip(labels.iter()) {
            row += &centers.row(label);
        }
        let targets = Array2::from_shape_fn((n, CLASSES), |(row, class)| {
            if labels[row] == class { 1.0 } else { 0.0 }
        });

        Split { inputs, targets }
    }

    fn partitions(train: usize, validation: usize, test: usize) -> Partitions {
        let mut rng = StdRng::seed_from_u64(7);
        let examples = clustered(train + validation + test, &mut rng);
        Partitions::split(&examples, train, validation, &mut rng).unwrap()
    }

    fn hyperparameters() -> Hyperparameters {
        Hyperparameters {
            hidden_widths: vec![32, 32],
            epochs: 50,
            batch_size: 50,
            ..Hyperparameters::default()
        }
    }

    fn trainer(hyper: Hyperparameters, summary: Option<SummaryWriter>) -> Trainer {
        let mut model_rng = StdRng::seed_from_u64(hyper.model_seed);
        let network =
            Network::new(FEATURES, &hyper.hidden_widths, CLASSES, &mut model_rng).unwrap();
        let shuffle_rng = StdRng::seed_from_u64(hyper.data_seed);
        Trainer::new(network, hyper, summary, shuffle_rng, model_rng)
    }

    #[test]
    fn learns_separable_classes() {
        let partitions = partitions(500, 100, 200);
        let mut trainer = trainer(hyperparameters(), None);

        let report = trainer.run(&partitions).unwrap();

        assert_eq!(report.validation_losses.len(), 50);
        assert!(report.validation_losses.iter().all(|&loss| loss.is_finite() && loss >= 0.0));
        assert!(report.validation_losses[49] < report.validation_losses[0]);
        assert!(report.accuracy > 0.1, "accuracy {}", report.accuracy);
        assert_eq!(trainer.state(), TrainingState::Complete);
    }

    #[test]
    fn remainder_batch_is_dropped() {
        let partitions = partitions(130, 20, 20);
        let hyper = Hyperparameters {
            epochs: 3,
            ..hyperparameters()
        };
        let mut trainer = trainer(hyper, None);

        trainer.run(&partitions).unwrap();

        assert_eq!(trainer.optimizer().steps(), 3 * 2);
    }

    #[test]
    fn writes_one_summary_per_epoch() {
        let dir = tempdir().unwrap();
        let summary = SummaryWriter::create(&dir.path().join("log")).unwrap();
        let events = summary.path().to_path_buf();
        let partitions = partitions(100, 20, 20);
        let hyper = Hyperparameters {
            epochs: 4,
            ..hyperparameters()
        };
        let mut trainer = trainer(hyper, Some(summary));

        let report = trainer.run(&partitions).unwrap();

        let contents = fs::read_to_string(&events).unwrap();
        assert_eq!(contents.lines().count(), 4);
        assert_eq!(report.validation_losses.len(), 4);
    }

    #[test]
    fn rejects_unusable_batch_sizes() {
        let partitions = partitions(100, 20, 20);

        let empty = Hyperparameters {
            batch_size: 0,
            ..hyperparameters()
        };
        assert!(trainer(empty, None).run(&partitions).is_err());

        let oversized = Hyperparameters {
            batch_size: 101,
            ..hyperparameters()
        };
        assert!(trainer(oversized, None).run(&partitions).is_err());
    }

    #[test]
    fn runs_only_once() {
        let partitions = partitions(100, 20, 20);
        let hyper = Hyperparameters {
            epochs: 1,
            ..hyperparameters()
        };
        let mut trainer = trainer(hyper, None);

        trainer.run(&partitions).unwrap();

        assert!(trainer.run(&partitions).is_err());
    }

    // The full scenario: 30000 MNIST examples, 20000/4000/6000, three hidden layers of 200 units.
    #[test]
    #[ignore = "needs the MNIST files in data/ and several minutes"]
    fn mnist_scenario_beats_chance() {
        let hyper = Hyperparameters::default();
        let dataset = crate::mnist::MnistDataset::load(&crate::config::data_dir()).unwrap();
        let mut data_rng = StdRng::seed_from_u64(hyper.data_seed);
        let partitions = crate::data::prepare(&dataset, &hyper, &mut data_rng).unwrap();
        assert_eq!(partitions.test.len(), 6_000);

        let mut model_rng = StdRng::seed_from_u64(hyper.model_seed);
        let network = Network::new(
            partitions.train.input_width(),
            &hyper.hidden_widths,
            CLASSES,
            &mut model_rng,
        )
        .unwrap();
        let mut trainer = Trainer::new(network, hyper, None, data_rng, model_rng);

        let report = trainer.run(&partitions).unwrap();

        assert_eq!(report.validation_losses.len(), 50);
        assert!(report.accuracy > 0.1);
    }
}
