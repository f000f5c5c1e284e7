use itertools::multizip;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use rand::Rng;
use rand_distr::Uniform;
use serde_derive::{Deserialize, Serialize};

use crate::math::{random_matrix, sigmoid, sigmoid_prime};
use crate::option::TrainingOption;

/// Bias every unit starts with. Keeps initial activations away from zero
/// while the random weights break symmetry.
const INITIAL_BIAS: f64 = 1.0;

/// A fully connected sigmoid layer of a neural network.
///
/// Computes `sigmoid(W^T x + b)`, storing the weights for every hidden unit
/// as a column of a single `inputs x outputs` matrix.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    weights: Array2<f64>,
    bias: Array1<f64>,
    num_input_units: usize,
    num_hidden_units: usize,
}

/// Accumulated parameter gradients for one mini-batch.
#[derive(Clone, Debug)]
pub struct Gradient {
    pub weights: Array2<f64>,
    pub bias: Array1<f64>,
}

impl Layer {
    /// Initializes a new, untrained layer.
    ///
    /// Arguments:
    ///
    ///  * `inputs` - the number of inputs to this layer.
    ///  * `outputs` - the number of hidden units in this layer.
    pub fn new(inputs: usize, outputs: usize) -> Self {
        Self::with_rng(inputs, outputs, &mut rand::thread_rng())
    }

    /// Like `new`, drawing initial weights from `rng`.
    pub fn with_rng<R: Rng + ?Sized>(
        inputs: usize,
        outputs: usize,
        rng: &mut R,
    ) -> Self {
        Self::from_parameters(
            random_matrix(Uniform::new(-0.5, 0.5), inputs, outputs, rng),
            Array1::from_elem(outputs, INITIAL_BIAS),
        )
    }

    /// Builds a layer from an `inputs x outputs` weight matrix and an
    /// `outputs`-long bias.
    pub fn from_parameters(weights: Array2<f64>, bias: Array1<f64>) -> Self {
        assert_eq!(weights.ncols(), bias.len());
        Layer {
            num_input_units: weights.nrows(),
            num_hidden_units: weights.ncols(),
            weights,
            bias,
        }
    }

    /// Returns the number of inputs to this layer.
    pub fn input_len(&self) -> usize {
        self.num_input_units
    }

    /// Returns the number of outputs from this layer.
    pub fn output_len(&self) -> usize {
        self.num_hidden_units
    }

    pub fn weights(&self) -> ArrayView2<f64> {
        self.weights.view()
    }

    pub fn bias(&self) -> ArrayView1<f64> {
        self.bias.view()
    }

    /// Feeds the provided `input` forward through the layer.
    pub fn forward(&self, input: ArrayView1<f64>) -> Array1<f64> {
        assert_eq!(input.len(), self.input_len());
        let mut output = self.weights.t().dot(&input) + &self.bias;
        output.mapv_inplace(sigmoid);
        output
    }

    /// Feeds every row of `input` forward through the layer.
    pub fn forward_batch(&self, input: ArrayView2<f64>) -> Array2<f64> {
        assert_eq!(input.ncols(), self.input_len());
        let mut output = input.dot(&self.weights) + &self.bias;
        output.mapv_inplace(sigmoid);
        output
    }

    /// Returns the delta of this layer given its own forward `output` and an
    /// `error` signal in its output space.
    ///
    /// For the final layer the error is `predicted - target`; for any other
    /// layer it is the accumulated delta of the layer above.
    pub fn backward(
        &self,
        output: ArrayView1<f64>,
        error: ArrayView1<f64>,
    ) -> Array1<f64> {
        assert_eq!(output.len(), self.output_len());
        assert_eq!(error.len(), self.output_len());
        multizip((output.iter(), error.iter()))
            .map(|(&y, &e)| e * sigmoid_prime(y))
            .collect()
    }

    /// Row-wise `backward` over a mini-batch.
    pub fn backward_batch(
        &self,
        outputs: ArrayView2<f64>,
        errors: ArrayView2<f64>,
    ) -> Array2<f64> {
        assert_eq!(outputs.dim(), errors.dim());
        assert_eq!(outputs.ncols(), self.output_len());
        Zip::from(&outputs)
            .and(&errors)
            .map_collect(|&y, &e| e * sigmoid_prime(y))
    }

    /// Projects `delta` back through the weights, producing the error signal
    /// for the layer below.
    pub fn accumulate_delta(&self, delta: ArrayView1<f64>) -> Array1<f64> {
        assert_eq!(delta.len(), self.output_len());
        self.weights.dot(&delta)
    }

    /// Row-wise `accumulate_delta` over a mini-batch.
    pub fn accumulate_delta_batch(&self, deltas: ArrayView2<f64>) -> Array2<f64> {
        assert_eq!(deltas.ncols(), self.output_len());
        deltas.dot(&self.weights.t())
    }

    /// Sums the negated error gradient over a mini-batch of `input` rows and
    /// their matching `deltas`.
    pub fn gradient(
        &self,
        input: ArrayView2<f64>,
        deltas: ArrayView2<f64>,
    ) -> Gradient {
        assert_eq!(input.nrows(), deltas.nrows());
        assert_eq!(input.ncols(), self.input_len());
        assert_eq!(deltas.ncols(), self.output_len());
        Gradient {
            weights: -input.t().dot(&deltas),
            bias: -deltas.sum_axis(Axis(0)),
        }
    }

    /// Takes one gradient step using a mini-batch of `input` rows and the
    /// `deltas` they produced. An empty mini-batch leaves the layer as is.
    pub fn turn(
        &mut self,
        input: ArrayView2<f64>,
        deltas: ArrayView2<f64>,
        option: &TrainingOption,
    ) {
        if input.nrows() == 0 {
            return;
        }
        let gradient = self.gradient(input, deltas);
        let rate = option.learning_rate / input.nrows() as f64;
        self.weights.scaled_add(rate, &gradient.weights);
        if option.l2_regularization {
            self.weights *= 1.0 - option.regularization_rate;
        }
        self.bias.scaled_add(rate, &gradient.bias);
    }
}
