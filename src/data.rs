use crate::config::Hyperparameters;
use crate::mnist::{CLASSES, MnistDataset};
use anyhow::{Result, ensure};
use itertools::Itertools;
use log::info;
use ndarray::{Array, Array2, ArrayView2, Axis, s};
use ndarray_rand::rand::{Rng, seq::SliceRandom};

// A set of examples where row i of inputs is one normalized image and row i of targets is its
// one-hot label. Rows always travel together: any reordering is applied to both matrices.
#[derive(Debug, Clone)]
pub struct Split {
    pub inputs: Array2<f32>,
    pub targets: Array2<f32>,
}

impl Split {
    pub fn len(&self) -> usize {
        self.inputs.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn input_width(&self) -> usize {
        self.inputs.ncols()
    }

    pub fn select(&self, indices: &[usize]) -> Split {
        Split {
            inputs: self.inputs.select(Axis(0), indices),
            targets: self.targets.select(Axis(0), indices),
        }
    }

    // Returns a copy with one random permutation applied to inputs and targets alike.
    pub fn shuffled<R: Rng + ?Sized>(&self, rng: &mut R) -> Split {
        let mut indices = (0..self.len()).collect_vec();
        indices.shuffle(rng);
        self.select(&indices)
    }

    // The contiguous window of rows [start, end).
    pub fn batch(&self, start: usize, end: usize) -> (ArrayView2<'_, f32>, ArrayView2<'_, f32>) {
        (
            self.inputs.slice(s![start..end, ..]),
            self.targets.slice(s![start..end, ..]),
        )
    }
}

#[derive(Debug)]
pub struct Partitions {
    pub train: Split,
    pub validation: Split,
    pub test: Split,
}

impl Partitions {
    // Shuffles the examples and cuts a training pool of train_size + validation_size rows, leaving
    // the rest for testing. validation_size rows of the (reshuffled) pool then become the
    // validation partition.
    pub fn split<R: Rng + ?Sized>(
        examples: &Split,
        train_size: usize,
        validation_size: usize,
        rng: &mut R,
    ) -> Result<Partitions> {
        let pool_size = train_size + validation_size;
        ensure!(
            pool_size <= examples.len(),
            "cannot take {train_size} training and {validation_size} validation examples from {}",
            examples.len()
        );

        let mut indices = (0..examples.len()).collect_vec();
        indices.shuffle(rng);
        let (pool, test) = indices.split_at_mut(pool_size);
        pool.shuffle(rng);
        let (train, validation) = pool.split_at(train_size);

        Ok(Partitions {
            train: examples.select(train),
            validation: examples.select(validation),
            test: examples.select(test),
        })
    }
}

// Picks n distinct indices out of 0..len uniformly at random.
pub fn sample_subset<R: Rng + ?Sized>(len: usize, n: usize, rng: &mut R) -> Result<Vec<usize>> {
    ensure!(n <= len, "cannot sample {n} examples from a dataset of {len}");
    let mut indices = (0..len).collect_vec();
    indices.shuffle(rng);
    indices.truncate(n);
    Ok(indices)
}

// Scales raw 0-255 intensities to [0, 1], then subtracts each image's own mean from its pixels.
pub fn normalize(images: ArrayView2<f32>) -> Array2<f32> {
    let scaled = images.mapv(|pixel| pixel / 255.0);
    let means = scaled.sum_axis(Axis(1)) / scaled.ncols().max(1) as f32;
    scaled - &means.insert_axis(Axis(1))
}

pub fn one_hot(labels: &[u8], classes: usize) -> Array2<f32> {
    Array::from_shape_fn((labels.len(), classes), |(row, class)| {
        if class == labels[row] as usize {
            1.0
        } else {
            0.0
        }
    })
}

// Samples the configured subset of the dataset, normalizes it and splits it into the three
// partitions.
pub fn prepare<R: Rng + ?Sized>(
    dataset: &MnistDataset,
    hyper: &Hyperparameters,
    rng: &mut R,
) -> Result<Partitions> {
    let indices = sample_subset(dataset.len(), hyper.subset_size, rng)?;
    let images = dataset.images.select(Axis(0), &indices);
    let labels = indices.iter().map(|&i| dataset.labels[i]).collect_vec();

    let examples = Split {
        inputs: normalize(images.view()),
        targets: one_hot(&labels, CLASSES),
    };
    let partitions =
        Partitions::split(&examples, hyper.train_size, hyper.validation_size, rng)?;

    info!(
        "Partitioned {} examples into {} train / {} validation / {} test",
        examples.len(),
        partitions.train.len(),
        partitions.validation.len(),
        partitions.test.len()
    );

    Ok(partitions)
}
