//! A multilayer perceptron trained on a random subset of MNIST with Adam and dropout.
//!
//! The run is a fixed sequence of steps: load the dataset ([`mnist`]), sample, normalize and
//! partition it ([`data`]), build the network ([`network`]), train it with [`train::Trainer`]
//! while writing validation losses to a scalar log ([`summary`]), and report test accuracy.
//! All hyperparameters live in [`config`].

pub mod config;
pub mod data;
pub mod loss;
pub mod metrics;
pub mod mnist;
pub mod network;
pub mod optimizer;
pub mod summary;
pub mod train;
