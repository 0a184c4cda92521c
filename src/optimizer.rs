use crate::network::{Gradients, Network};
use anyhow::{Result, ensure};
use ndarray::{Array, Array1, Array2, Dimension, Zip};

// First and second moment estimates for every parameter of a network, laid out like Gradients.
struct Moments {
    bias_first: Vec<Array1<f32>>,
    bias_second: Vec<Array1<f32>>,
    weight_first: Vec<Array2<f32>>,
    weight_second: Vec<Array2<f32>>,
}

impl Moments {
    fn zeros_like(network: &Network) -> Moments {
        let Gradients {
            biases: bias_first,
            weights: weight_first,
        } = Gradients::zeros_like(network);
        Moments {
            bias_second: bias_first.clone(),
            weight_second: weight_first.clone(),
            bias_first,
            weight_first,
        }
    }
}

// Adaptive moment estimation.
pub struct Adam {
    pub learning_rate: f32,
    pub beta_1: f32,
    pub beta_2: f32,
    pub epsilon: f32,
    // Number of updates applied so far.
    time: i32,
    moments: Option<Moments>,
}

impl Adam {
    pub fn new(learning_rate: f32, beta_1: f32, beta_2: f32) -> Adam {
        Adam {
            learning_rate,
            beta_1,
            beta_2,
            epsilon: 1e-8,
            time: 0,
            moments: None,
        }
    }

    pub fn steps(&self) -> usize {
        self.time as usize
    }

    // Applies one update to every parameter of the network. Moment estimates are created on the
    // first call and carried over between calls.
    pub fn step(&mut self, network: &mut Network, gradients: &Gradients) -> Result<()> {
        ensure!(
            gradients.weights.len() == network.weights.len()
                && gradients.biases.len() == network.biases.len(),
            "gradients do not match the network's layers"
        );

        let moments = self
            .moments
            .get_or_insert_with(|| Moments::zeros_like(network));
        self.time += 1;

        let rule = UpdateRule {
            learning_rate: self.learning_rate,
            beta_1: self.beta_1,
            beta_2: self.beta_2,
            epsilon: self.epsilon,
            first_correction: 1.0 - self.beta_1.powi(self.time),
            second_correction: 1.0 - self.beta_2.powi(self.time),
        };

        for (l, weight) in network.weights.iter_mut().enumerate() {
            rule.apply(
                weight,
                &gradients.weights[l],
                &mut moments.weight_first[l],
                &mut moments.weight_second[l],
            )?;
        }
        for (l, bias) in network.biases.iter_mut().enumerate() {
            rule.apply(
                bias,
                &gradients.biases[l],
                &mut moments.bias_first[l],
                &mut moments.bias_second[l],
            )?;
        }

        Ok(())
    }
}

struct UpdateRule {
    learning_rate: f32,
    beta_1: f32,
    beta_2: f32,
    epsilon: f32,
    first_correction: f32,
    second_correction: f32,
}

impl UpdateRule {
    fn apply<D: Dimension>(
        &self,
        param: &mut Array<f32, D>,
        grad: &Array<f32, D>,
        first: &mut Array<f32, D>,
        second: &mut Array<f32, D>,
    ) -> Result<()> {
        ensure!(
            param.shape() == grad.shape(),
            "gradient shape {:?} does not match parameter shape {:?}",
            grad.shape(),
            param.shape()
        );

        Zip::from(param)
            .and(grad)
            .and(first)
            .and(second)
            .for_each(|p, &g, m, v| {
                *m = self.beta_1 * *m + (1.0 - self.beta_1) * g;
                *v = self.beta_2 * *v + (1.0 - self.beta_2) * g * g;
                let m_hat = *m / self.first_correction;
                let v_hat = *v / self.second_correction;
                *p -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_rand::rand::{SeedableRng, rngs::StdRng};

    fn filled(network: &Network, value: f32) -> Gradients {
        let mut gradients = Gradients::zeros_like(network);
        gradients.weights.iter_mut().for_each(|w| w.fill(value));
        gradients.biases.iter_mut().for_each(|b| b.fill(value));
        gradients
    }

    #[test]
    fn first_step_moves_each_parameter_by_the_learning_rate() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut network = Network::new(3, &[4], 2, &mut rng).unwrap();
        let before = network.weights[0].clone();
        let mut adam = Adam::new(0.001, 0.9, 0.999);

        let gradients = filled(&network, 0.5);

        adam.step(&mut network, &gradients).unwrap();

        for (new, old) in network.weights[0].iter().zip(before.iter()) {
            assert!((old - new - 0.001).abs() < 1e-6);
        }
        assert!(network.biases[1].iter().all(|&b| (b + 0.001).abs() < 1e-6));
        assert_eq!(adam.steps(), 1);
    }

    #[test]
    fn negative_gradients_increase_parameters() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut network = Network::new(3, &[4], 2, &mut rng).unwrap();
        let mut adam = Adam::new(0.001, 0.9, 0.999);

        let gradients = filled(&network, -2.0);

        adam.step(&mut network, &gradients).unwrap();
        adam.step(&mut network, &gradients).unwrap();

        assert!(network.biases[0].iter().all(|&b| b > 0.0019 && b < 0.0021));
        assert_eq!(adam.steps(), 2);
    }

    #[test]
    fn rejects_gradients_for_another_network() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut network = Network::new(3, &[4], 2, &mut rng).unwrap();
        let other = Network::new(3, &[4, 4], 2, &mut rng).unwrap();
        let mut adam = Adam::new(0.001, 0.9, 0.999);

        assert!(adam.step(&mut network, &filled(&other, 1.0)).is_err());
    }
}
