use std::path::PathBuf;

// Every knob of a run is a constant here. There are no command line flags, so changing the
// behaviour of the program means editing these values.

// Directory holding the gzipped MNIST IDX files.
pub fn data_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data")
}

// Directory the scalar summaries are written to. Created on start if missing.
pub fn log_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("log")
}

#[derive(Debug, Clone)]
pub struct Hyperparameters {
    // Examples drawn at random from the full dataset.
    pub subset_size: usize,
    pub train_size: usize,
    pub validation_size: usize,
    pub hidden_widths: Vec<usize>,
    // Probability of keeping a hidden unit while training.
    pub keep_prob: f32,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub beta_1: f32,
    pub beta_2: f32,
    // Seeds subset sampling, partitioning and per-epoch shuffling.
    pub data_seed: u64,
    // Seeds weight initialization and dropout masks.
    pub model_seed: u64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Hyperparameters {
            subset_size: 30_000,
            train_size: 20_000,
            validation_size: 4_000,
            hidden_widths: vec![200, 200, 200],
            keep_prob: 0.5,
            epochs: 50,
            batch_size: 200,
            learning_rate: 0.001,
            beta_1: 0.9,
            beta_2: 0.999,
            data_seed: 0,
            model_seed: 1234,
        }
    }
}
