//! Multi-layer perceptron regressor
//!
//! Feed-forward network trained by mini-batch SGD with momentum and L2 weight
//! decay. The output layer is linear. Each sample's error term is scaled by its
//! weight before backpropagation.

use super::{check_n_features, ensure, unknown_param, validate_fit_input, Regressor};
use crate::config::HyperParams;
use crate::error::{Result, RunnerError};
use ndarray::{Array1, Array2, Axis};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Hidden layer activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Activation {
    #[default]
    ReLU,
    Tanh,
    /// Sigmoid
    Logistic,
    Identity,
}

impl Activation {
    fn apply(self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::ReLU => z.mapv(|v| v.max(0.0)),
            Activation::Tanh => z.mapv(f64::tanh),
            Activation::Logistic => z.mapv(|v| 1.0 / (1.0 + (-v).exp())),
            Activation::Identity => z.clone(),
        }
    }

    /// Derivative expressed in terms of the activation output `a`
    fn derivative(self, a: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::ReLU => a.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
            Activation::Tanh => a.mapv(|v| 1.0 - v * v),
            Activation::Logistic => a.mapv(|v| v * (1.0 - v)),
            Activation::Identity => Array2::ones(a.raw_dim()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MLPConfig {
    pub hidden_layer_sizes: Vec<usize>,
    pub activation: Activation,
    pub learning_rate_init: f64,
    /// Epochs
    pub max_iter: usize,
    pub batch_size: usize,
    /// L2 penalty
    pub alpha: f64,
    pub momentum: f64,
    /// Minimum loss improvement counted as progress
    pub tol: f64,
    /// Epochs without progress before stopping
    pub n_iter_no_change: usize,
    /// Monitor a held-out tail of the training rows instead of training loss
    pub early_stopping: bool,
    pub validation_fraction: f64,
    pub random_state: Option<u64>,
}

impl Default for MLPConfig {
    fn default() -> Self {
        Self {
            hidden_layer_sizes: vec![100],
            activation: Activation::ReLU,
            learning_rate_init: 0.001,
            max_iter: 200,
            batch_size: 32,
            alpha: 0.0001,
            momentum: 0.9,
            tol: 1e-4,
            n_iter_no_change: 10,
            early_stopping: false,
            validation_fraction: 0.1,
            random_state: Some(0),
        }
    }
}

impl MLPConfig {
    pub fn from_params(params: &HyperParams) -> Result<Self> {
        let mut config = Self::default();
        for (name, value) in params.iter() {
            match name.as_str() {
                "hidden_layer_sizes" => config.hidden_layer_sizes = value.to_usize_list(name)?,
                "activation" => {
                    config.activation = match value.to_str(name)? {
                        "relu" => Activation::ReLU,
                        "tanh" => Activation::Tanh,
                        "logistic" => Activation::Logistic,
                        "identity" => Activation::Identity,
                        _ => {
                            return Err(RunnerError::invalid_param(
                                name,
                                value,
                                "expected relu, tanh, logistic or identity",
                            ))
                        }
                    }
                }
                "learning_rate_init" => config.learning_rate_init = value.to_f64(name)?,
                "max_iter" => config.max_iter = value.to_usize(name)?,
                "batch_size" => config.batch_size = value.to_usize(name)?,
                "alpha" => config.alpha = value.to_f64(name)?,
                "momentum" => config.momentum = value.to_f64(name)?,
                "tol" => config.tol = value.to_f64(name)?,
                "n_iter_no_change" => config.n_iter_no_change = value.to_usize(name)?,
                "early_stopping" => config.early_stopping = value.to_bool(name)?,
                "validation_fraction" => config.validation_fraction = value.to_f64(name)?,
                "random_state" => config.random_state = value.to_seed(name)?,
                "solver" | "learning_rate" | "nesterovs_momentum" | "shuffle" => {
                    debug!(param = name.as_str(), "SGD with momentum only, ignoring")
                }
                other => unknown_param("mlp", other, value)?,
            }
        }
        ensure(
            config.hidden_layer_sizes.iter().all(|&s| s > 0),
            "hidden_layer_sizes",
            format!("{:?}", config.hidden_layer_sizes),
            "layer sizes must be positive",
        )?;
        ensure(config.learning_rate_init > 0.0, "learning_rate_init", config.learning_rate_init, "must be positive")?;
        ensure(config.batch_size > 0, "batch_size", config.batch_size, "must be positive")?;
        ensure((0.0..1.0).contains(&config.momentum), "momentum", config.momentum, "must be in [0, 1)")?;
        ensure(
            config.validation_fraction > 0.0 && config.validation_fraction < 1.0,
            "validation_fraction",
            config.validation_fraction,
            "must be in (0, 1)",
        )?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MLPRegressor {
    pub config: MLPConfig,
    weights: Vec<Array2<f64>>,
    biases: Vec<Array1<f64>>,
    n_features: usize,
    n_iter: usize,
    loss_curve: Vec<f64>,
}

impl MLPRegressor {
    pub fn new(config: MLPConfig) -> Self {
        Self {
            config,
            weights: Vec::new(),
            biases: Vec::new(),
            n_features: 0,
            n_iter: 0,
            loss_curve: Vec::new(),
        }
    }

    pub fn from_params(params: &HyperParams) -> Result<Self> {
        Ok(Self::new(MLPConfig::from_params(params)?))
    }

    /// Epochs run by the last fit
    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    /// Weighted training loss per epoch
    pub fn loss_curve(&self) -> &[f64] {
        &self.loss_curve
    }

    fn initialize_weights(&mut self, rng: &mut Xoshiro256PlusPlus) {
        self.weights.clear();
        self.biases.clear();

        let mut layer_sizes = vec![self.n_features];
        layer_sizes.extend(&self.config.hidden_layer_sizes);
        layer_sizes.push(1);

        for pair in layer_sizes.windows(2) {
            let (n_in, n_out) = (pair[0], pair[1]);
            // Glorot uniform
            let bound = (6.0 / (n_in + n_out) as f64).sqrt();
            let w = Array2::from_shape_fn((n_in, n_out), |_| rng.gen_range(-bound..bound));
            self.weights.push(w);
            self.biases.push(Array1::zeros(n_out));
        }
    }

    /// Layer activations, input first and linear output last
    fn forward(&self, x: &Array2<f64>) -> Vec<Array2<f64>> {
        let n_layers = self.weights.len();
        let mut activations = Vec::with_capacity(n_layers + 1);
        activations.push(x.clone());
        for (i, (w, b)) in self.weights.iter().zip(self.biases.iter()).enumerate() {
            let z = activations[i].dot(w) + b;
            let a = if i + 1 < n_layers { self.config.activation.apply(&z) } else { z };
            activations.push(a);
        }
        activations
    }

    fn output(&self, x: &Array2<f64>) -> Array1<f64> {
        self.forward(x)
            .pop()
            .map(|out| out.column(0).to_owned())
            .unwrap_or_else(|| Array1::zeros(x.nrows()))
    }

    /// Gradients of the weighted squared error for one batch
    fn backward(
        &self,
        activations: &[Array2<f64>],
        y: &Array1<f64>,
        w: &Array1<f64>,
    ) -> Vec<(Array2<f64>, Array1<f64>)> {
        let n = y.len() as f64;
        let mut gradients = Vec::with_capacity(self.weights.len());

        let output = &activations[activations.len() - 1];
        let residual = (&output.column(0) - y) * w;
        let mut delta = residual.insert_axis(Axis(1)) / n;

        for i in (0..self.weights.len()).rev() {
            let a_prev = &activations[i];
            let grad_w = a_prev.t().dot(&delta) + &self.weights[i] * (self.config.alpha / n);
            let grad_b = delta.sum_axis(Axis(0));
            gradients.push((grad_w, grad_b));

            if i > 0 {
                delta = delta.dot(&self.weights[i].t()) * self.config.activation.derivative(&activations[i]);
            }
        }

        gradients.reverse();
        gradients
    }

    fn weighted_loss(&self, x: &Array2<f64>, y: &Array1<f64>, w: &Array1<f64>) -> f64 {
        let pred = self.output(x);
        let w_sum = w.sum();
        let sse: f64 = pred
            .iter()
            .zip(y.iter())
            .zip(w.iter())
            .map(|((p, t), wi)| wi * (p - t).powi(2))
            .sum();
        if w_sum > 0.0 {
            0.5 * sse / w_sum
        } else {
            0.0
        }
    }
}

impl Regressor for MLPRegressor {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, sample_weight: Option<&Array1<f64>>) -> Result<()> {
        let weights = validate_fit_input(x, y, sample_weight)?;
        let n_samples = x.nrows();
        self.n_features = x.ncols();

        let mut rng = match self.config.random_state {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };
        self.initialize_weights(&mut rng);

        // Scale weights to mean one so the learning rate keeps its meaning
        let w_mean = weights.iter().sum::<f64>() / n_samples as f64;
        let sw = Array1::from_iter(weights.iter().map(|w| w / w_mean));

        let val_size = if self.config.early_stopping {
            ((n_samples as f64 * self.config.validation_fraction) as usize).min(n_samples - 1)
        } else {
            0
        };
        let train_size = n_samples - val_size;

        let mut velocities_w: Vec<Array2<f64>> = self.weights.iter().map(|w| Array2::zeros(w.raw_dim())).collect();
        let mut velocities_b: Vec<Array1<f64>> = self.biases.iter().map(|b| Array1::zeros(b.len())).collect();

        let mut indices: Vec<usize> = (0..train_size).collect();
        let mut best_loss = f64::INFINITY;
        let mut no_improvement = 0usize;
        let lr = self.config.learning_rate_init;
        self.loss_curve.clear();
        self.n_iter = 0;

        for _epoch in 0..self.config.max_iter {
            indices.shuffle(&mut rng);

            for batch in indices.chunks(self.config.batch_size) {
                let x_batch = x.select(Axis(0), batch);
                let y_batch = y.select(Axis(0), batch);
                let w_batch = sw.select(Axis(0), batch);

                let activations = self.forward(&x_batch);
                let gradients = self.backward(&activations, &y_batch, &w_batch);

                for (i, (grad_w, grad_b)) in gradients.into_iter().enumerate() {
                    velocities_w[i] = &velocities_w[i] * self.config.momentum - &grad_w * lr;
                    velocities_b[i] = &velocities_b[i] * self.config.momentum - &grad_b * lr;
                    self.weights[i] += &velocities_w[i];
                    self.biases[i] += &velocities_b[i];
                }
            }

            self.n_iter += 1;
            let train_rows: Vec<usize> = (0..train_size).collect();
            let train_loss = self.weighted_loss(
                &x.select(Axis(0), &train_rows),
                &y.select(Axis(0), &train_rows),
                &sw.select(Axis(0), &train_rows),
            );
            if !train_loss.is_finite() {
                return Err(RunnerError::TrainingError(
                    "MLP loss diverged, try a smaller learning_rate_init".to_string(),
                ));
            }
            self.loss_curve.push(train_loss);

            let monitored = if val_size > 0 {
                let val_rows: Vec<usize> = (train_size..n_samples).collect();
                self.weighted_loss(
                    &x.select(Axis(0), &val_rows),
                    &y.select(Axis(0), &val_rows),
                    &sw.select(Axis(0), &val_rows),
                )
            } else {
                train_loss
            };

            if monitored > best_loss - self.config.tol {
                no_improvement += 1;
                if no_improvement >= self.config.n_iter_no_change {
                    debug!(epoch = self.n_iter, "MLP stopped, no improvement");
                    break;
                }
            } else {
                no_improvement = 0;
            }
            best_loss = best_loss.min(monitored);
        }

        debug!(epochs = self.n_iter, loss = best_loss, "MLP fitted");
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.weights.is_empty() {
            return Err(RunnerError::ModelNotFitted);
        }
        check_n_features(self.n_features, x)?;
        Ok(self.output(x))
    }

    fn name(&self) -> &'static str {
        "mlp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn make_regression_data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((100, 2), |(i, j)| ((i * (j + 3)) % 13) as f64 / 13.0);
        let y: Array1<f64> = x.rows().into_iter().map(|r| 2.0 * r[0] - r[1] + 0.5).collect();
        (x, y)
    }

    fn mae(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
        (a - b).mapv(f64::abs).mean().unwrap()
    }

    #[test]
    fn test_mlp_regressor() {
        let (x, y) = make_regression_data();
        let config = MLPConfig {
            hidden_layer_sizes: vec![16],
            learning_rate_init: 0.01,
            max_iter: 300,
            ..Default::default()
        };
        let mut model = MLPRegressor::new(config);
        model.fit(&x, &y, None).unwrap();
        let preds = model.predict(&x).unwrap();
        assert_eq!(preds.len(), 100);
        assert!(mae(&preds, &y) < 0.5, "MAE too high: {}", mae(&preds, &y));
        assert!(model.loss_curve().len() == model.n_iter());
    }

    #[test]
    fn test_identity_network_is_linear() {
        let (x, y) = make_regression_data();
        let params = HyperParams::new()
            .with("activation", "identity")
            .with("learning_rate_init", 0.01)
            .with("max_iter", 300i64);
        let mut model = MLPRegressor::from_params(&params).unwrap();
        model.fit(&x, &y, None).unwrap();
        assert!(mae(&model.predict(&x).unwrap(), &y) < 0.2);
    }

    #[test]
    fn test_activation_derivatives() {
        let a = array![[0.0, 2.0]];
        assert_eq!(Activation::ReLU.derivative(&a), array![[0.0, 1.0]]);
        assert_eq!(Activation::Identity.derivative(&a), array![[1.0, 1.0]]);
        let half = array![[0.5]];
        assert_eq!(Activation::Logistic.derivative(&half), array![[0.25]]);
    }

    #[test]
    fn test_hidden_layer_param() {
        let params = HyperParams::new().with("hidden_layer_sizes", crate::config::ParamValue::List(vec![
            crate::config::ParamValue::Int(8),
            crate::config::ParamValue::Int(4),
        ]));
        let mut model = MLPRegressor::from_params(&params).unwrap();
        assert_eq!(model.config.hidden_layer_sizes, vec![8, 4]);

        let (x, y) = make_regression_data();
        model.fit(&x, &y, None).unwrap();
        assert_eq!(model.weights.len(), 3);
        assert_eq!(model.weights[1].dim(), (8, 4));
    }

    #[test]
    fn test_predict_before_fit() {
        let model = MLPRegressor::new(MLPConfig::default());
        assert!(matches!(model.predict(&array![[1.0, 2.0]]), Err(RunnerError::ModelNotFitted)));
    }
}
