//! Dense feed-forward network with ReLU hidden layers and a linear output.
//!
//! Weights are stored one matrix per layer with shape `(inputs, outputs)`
//! and consumed column-major from the flat parameter vector, i.e. all
//! input weights of output neuron 0 first. Evaluation is `Wᵀ · x` per layer.

use nalgebra::{DMatrix, DVector};

use super::config::NetworkConfig;
use super::{ColorNetwork, DensityNetwork, Features16, Features32, Vec3};

#[derive(Debug, Clone)]
pub struct Mlp {
    input_size: usize,
    output_size: usize,
    layers: Vec<DMatrix<f32>>,
}

impl Mlp {
    /// Network with `hidden_layers` hidden layers of `width` neurons, zero weights.
    pub fn new(input_size: usize, output_size: usize, hidden_layers: usize, width: usize) -> Self {
        let mut layers = Vec::with_capacity(hidden_layers + 1);
        layers.push(DMatrix::zeros(input_size, width));
        for _ in 1..hidden_layers {
            layers.push(DMatrix::zeros(width, width));
        }
        layers.push(DMatrix::zeros(width, output_size));
        Self {
            input_size,
            output_size,
            layers,
        }
    }

    /// 32-in / 16-out network as used for both density and color.
    pub fn from_config(config: &NetworkConfig) -> Self {
        Self::new(32, 16, config.n_hidden_layers as usize, config.n_neurons as usize)
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    /// Total weight count.
    pub fn num_params(&self) -> usize {
        self.layers.iter().map(|l| l.len()).sum()
    }

    /// Load weights from a flat column-major vector of `num_params()` values.
    pub fn load_parameters(&mut self, params: &[f32]) {
        debug_assert_eq!(params.len(), self.num_params());
        let mut idx = 0;
        for layer in &mut self.layers {
            let n = layer.len();
            layer.copy_from_slice(&params[idx..idx + n]);
            idx += n;
        }
    }

    /// Evaluate on an input of `input_size` values.
    pub fn forward(&self, input: &[f32]) -> DVector<f32> {
        let mut v = DVector::from_column_slice(input);
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            v = layer.tr_mul(&v);
            if i != last {
                v.apply(|x| *x = x.max(0.0));
            }
        }
        v
    }
}

impl DensityNetwork for Mlp {
    fn infer(&self, features: &Features32) -> Features16 {
        let out = self.forward(features.as_slice());
        Features16::from_fn(|i, _| out.get(i).copied().unwrap_or(0.0))
    }

    fn num_params(&self) -> usize {
        Mlp::num_params(self)
    }
}

impl ColorNetwork for Mlp {
    fn infer(&self, features: &Features32) -> Vec3 {
        let out = self.forward(features.as_slice());
        Vec3::from_fn(|i, _| out.get(i).copied().unwrap_or(0.0))
    }

    fn num_params(&self) -> usize {
        Mlp::num_params(self)
    }
}
