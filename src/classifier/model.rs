//! Binary logistic regression for a single label.

use rand::Rng;

pub fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelModel {
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl LabelModel {
    /// Weights drawn uniformly from `[-init_scale / 2, init_scale / 2)`, zero bias.
    pub fn new_random<R: Rng + ?Sized>(dim: usize, init_scale: f64, rng: &mut R) -> Self {
        let weights = (0..dim)
            .map(|_| (rng.random::<f64>() - 0.5) * init_scale)
            .collect();
        Self { weights, bias: 0.0 }
    }

    /// Only the first `min(features.len(), weights.len())` dimensions contribute.
    pub fn logit(&self, features: &[f64]) -> f64 {
        self.bias
            + self
                .weights
                .iter()
                .zip(features)
                .map(|(w, x)| w * x)
                .sum::<f64>()
    }

    pub fn is_finite(&self) -> bool {
        self.bias.is_finite() && self.weights.iter().all(|w| w.is_finite())
    }

    pub fn predict(&self, features: &[f64]) -> f64 {
        sigmoid(self.logit(features))
    }

    /// One SGD step on the logistic loss towards `target`.
    ///
    /// Returns the prediction made before the update.
    pub fn sgd_step(&mut self, features: &[f64], target: f64, learning_rate: f64) -> f64 {
        let prediction = self.predict(features);
        let error = prediction - target;
        for (w, x) in self.weights.iter_mut().zip(features) {
            *w -= learning_rate * error * x;
        }
        self.bias -= learning_rate * error;
        prediction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_sigmoid_bounds() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(800.0) <= 1.0);
        assert!(sigmoid(-800.0) >= 0.0);
        assert!(!sigmoid(-800.0).is_nan());
    }

    #[test]
    fn test_random_init_stays_within_scale() {
        let mut rng = StdRng::seed_from_u64(3);
        let model = LabelModel::new_random(512, 0.01, &mut rng);
        assert_eq!(model.weights.len(), 512);
        assert_eq!(model.bias, 0.0);
        assert!(model.weights.iter().all(|w| (-0.005..0.005).contains(w)));
    }

    #[test]
    fn test_logit_ignores_extra_dimensions() {
        let model = LabelModel {
            weights: vec![1.0, 2.0],
            bias: 0.5,
        };
        assert_eq!(model.logit(&[1.0, 1.0, 100.0]), 3.5);
        assert_eq!(model.logit(&[1.0]), 1.5);
    }

    #[test]
    fn test_sgd_step_moves_towards_target() {
        let mut model = LabelModel {
            weights: vec![0.0; 4],
            bias: 0.0,
        };
        let features = [1.0, 0.5, 0.0, 2.0];

        let before = model.sgd_step(&features, 1.0, 0.1);
        assert_eq!(before, 0.5);
        // error = -0.5, so each weight grows by 0.05 * x
        assert_eq!(model.weights, vec![0.05, 0.025, 0.0, 0.1]);
        assert_eq!(model.bias, 0.05);
        assert!(model.predict(&features) > 0.5);
    }
}
