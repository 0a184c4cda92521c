use crate::loss::cross_entropy_logit_grad;
use anyhow::{Result, anyhow, ensure};
use ndarray::{Array, Array1, Array2, ArrayView2, Axis};
use ndarray_rand::{
    RandomExt,
    rand::Rng,
    rand_distr::{Bernoulli, Distribution, StandardNormal},
};

// A feed-forward network: every hidden layer is affine -> ReLU -> dropout, and the output layer is
// affine -> softmax. Batches are row-major, so weights[l] has shape [sizes[l] x sizes[l + 1]] and
// biases[l] has length sizes[l + 1].
#[derive(Debug)]
pub struct Network {
    num_layers: usize,
    sizes: Vec<usize>,
    pub(crate) biases: Vec<Array1<f32>>,
    pub(crate) weights: Vec<Array2<f32>>,
}

// Everything the backward pass needs from one training-mode forward pass. layer_inputs[l] is the
// input to layer l, pre_activations and dropout_masks hold one entry per hidden layer.
pub struct ForwardPass {
    layer_inputs: Vec<Array2<f32>>,
    pre_activations: Vec<Array2<f32>>,
    dropout_masks: Vec<Array2<f32>>,
    pub probabilities: Array2<f32>,
}

#[derive(Debug)]
pub struct Gradients {
    pub biases: Vec<Array1<f32>>,
    pub weights: Vec<Array2<f32>>,
}

impl Gradients {
    pub fn zeros_like(network: &Network) -> Gradients {
        Gradients {
            biases: network
                .biases
                .iter()
                .map(|bias| Array::zeros(bias.raw_dim()))
                .collect(),
            weights: network
                .weights
                .iter()
                .map(|weight| Array::zeros(weight.raw_dim()))
                .collect(),
        }
    }
}

impl Network {
    // Builds a network with the given hidden layer widths between n_in inputs and n_out outputs.
    // At least one hidden layer is required.
    pub fn new<R: Rng + ?Sized>(
        n_in: usize,
        hidden_widths: &[usize],
        n_out: usize,
        rng: &mut R,
    ) -> Result<Network> {
        ensure!(
            !hidden_widths.is_empty(),
            "a network needs at least one hidden layer"
        );
        ensure!(
            n_in > 0 && n_out > 0 && hidden_widths.iter().all(|&width| width > 0),
            "layer widths must be positive (input {n_in}, hidden {hidden_widths:?}, output {n_out})"
        );

        let mut sizes = Vec::with_capacity(hidden_widths.len() + 2);
        sizes.push(n_in);
        sizes.extend_from_slice(hidden_widths);
        sizes.push(n_out);

        let weights = sizes
            .iter()
            .zip(sizes.iter().skip(1))
            .map(|(&fan_in, &fan_out)| {
                // Truncated normal scaled for ReLU units.
                let scale = (2.0 / fan_in as f32).sqrt();
                Array::from_shape_simple_fn((fan_in, fan_out), || truncated_normal(rng) * scale)
            })
            .collect();
        let biases = sizes
            .iter()
            .skip(1)
            .map(|&size| Array1::zeros(size))
            .collect();

        Ok(Network {
            num_layers: sizes.len(),
            sizes,
            biases,
            weights,
        })
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    fn check_input(&self, input: &ArrayView2<f32>) -> Result<()> {
        ensure!(
            input.ncols() == self.sizes[0],
            "network expects {} input features, got {}",
            self.sizes[0],
            input.ncols()
        );
        Ok(())
    }

    // Class probabilities for a batch with dropout disabled.
    pub fn feedforward(&self, input: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_input(&input)?;

        let hidden_layers = self.num_layers - 2;
        let mut activation = input.to_owned();
        for (bias, weight) in self.biases.iter().zip(self.weights.iter()).take(hidden_layers) {
            activation = activation.dot(weight) + bias;
            activation.mapv_inplace(relu);
        }

        let logits = activation.dot(&self.weights[hidden_layers]) + &self.biases[hidden_layers];
        Ok(softmax(logits))
    }

    // Forward pass with dropout active, keeping the intermediate values for backpropagate.
    pub fn feedforward_train<R: Rng + ?Sized>(
        &self,
        input: ArrayView2<f32>,
        keep_prob: f32,
        rng: &mut R,
    ) -> Result<ForwardPass> {
        self.check_input(&input)?;
        let keep = Bernoulli::new(f64::from(keep_prob))
            .map_err(|err| anyhow!("invalid keep probability {keep_prob}: {err}"))?;
        ensure!(keep_prob > 0.0, "keep probability must be above zero");

        let hidden_layers = self.num_layers - 2;
        let mut layer_inputs = Vec::with_capacity(self.num_layers - 1);
        let mut pre_activations = Vec::with_capacity(hidden_layers);
        let mut dropout_masks = Vec::with_capacity(hidden_layers);

        // Kept units are scaled by 1 / keep_prob so the expected activation matches inference.
        let mut activation = input.to_owned();
        for (bias, weight) in self.biases.iter().zip(self.weights.iter()).take(hidden_layers) {
            let z = activation.dot(weight) + bias;
            let mask = Array::random_using(z.raw_dim(), keep, rng)
                .mapv(|kept| if kept { 1.0 / keep_prob } else { 0.0 });
            layer_inputs.push(activation);
            activation = z.mapv(relu) * &mask;
            pre_activations.push(z);
            dropout_masks.push(mask);
        }

        let logits = activation.dot(&self.weights[hidden_layers]) + &self.biases[hidden_layers];
        layer_inputs.push(activation);

        Ok(ForwardPass {
            layer_inputs,
            pre_activations,
            dropout_masks,
            probabilities: softmax(logits),
        })
    }

    // Gradients of the mean clipped cross-entropy between the pass's probabilities and targets.
    pub fn backpropagate(&self, pass: &ForwardPass, targets: ArrayView2<f32>) -> Result<Gradients> {
        ensure!(
            pass.probabilities.dim() == targets.dim(),
            "targets {:?} do not match network output {:?}",
            targets.dim(),
            pass.probabilities.dim()
        );

        let mut gradients = Gradients::zeros_like(self);
        let mut delta = cross_entropy_logit_grad(pass.probabilities.view(), targets);

        for l in (0..self.num_layers - 1).rev() {
            gradients.weights[l] = pass.layer_inputs[l].t().dot(&delta);
            gradients.biases[l] = delta.sum_axis(Axis(0));

            if l > 0 {
                // Back through the dropout mask and the ReLU of the layer below.
                let mut upstream = delta.dot(&self.weights[l].t());
                upstream *= &pass.dropout_masks[l - 1];
                upstream.zip_mut_with(&pass.pre_activations[l - 1], |d, &z| {
                    if z <= 0.0 {
                        *d = 0.0
                    }
                });
                delta = upstream;
            }
        }

        Ok(gradients)
    }
}

fn relu(z: f32) -> f32 {
    z.max(0.0)
}

// Row-wise softmax, shifted by each row's maximum to avoid overflow.
fn softmax(mut logits: Array2<f32>) -> Array2<f32> {
    for mut row in logits.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |max, &z| max.max(z));
        row.mapv_inplace(|z| (z - max).exp());
        let sum = row.sum();
        row /= sum;
    }
    logits
}

// Standard normal sample redrawn until it lies within two standard deviations.
fn truncated_normal<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    loop {
        let value: f32 = StandardNormal.sample(rng);
        if value.abs() <= 2.0 {
            return value;
        }
    }
}
