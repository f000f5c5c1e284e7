//! A [Feedforward neural network]
//! (https://en.wikipedia.org/wiki/Feedforward_neural_network) of sigmoid
//! layers trained by backpropagation.
//!
//! # Example
//!
//! Let's train a simple neural network to compute the XOR function:
//!
//! ```
//! # use nnet::mlp::Network;
//! # use nnet::option::TrainingOption;
//! # use ndarray::arr2;
//! let input = arr2(&[[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]]);
//! let target = arr2(&[[0.0], [1.0], [1.0], [0.0]]);
//!
//! let mut network = Network::new(&[2, 10, 10, 1]);
//! let option = TrainingOption::default()
//!     .learning_rate(0.1)
//!     .epochs(30000)
//!     .mini_batch_size(1);
//! network.train(input.view(), target.view(), &option).unwrap();
//!
//! // And verify the network correctly computes XOR!
//! for (x, t) in input.outer_iter().zip(target.outer_iter()) {
//!     let y = network.forward(x);
//!     assert_eq!(y[0] > 0.5, t[0] > 0.5);
//! }
//! ```

use std::path::Path;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use serde_derive::{Deserialize, Serialize};

use crate::error::Result;
use crate::layer::Layer;
use crate::math::squared_distance;
use crate::option::TrainingOption;
use crate::persist;
use crate::trainer::{
    SupervisedMiniBatchUpdate, SupervisedObjective, SupervisedOnlineUpdate,
    Trainer, TrainingReport,
};

/// A multilayer perceptron.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Network {
    layers: Vec<Layer>,
}

impl Network {
    /// Creates a new, untrained neural network.
    ///
    /// Arguments:
    ///  * `layer_sizes` - the number of units in each layer, starting with
    ///                    the input layer. Must contain at least 2 elements.
    pub fn new(layer_sizes: &[usize]) -> Self {
        Self::with_rng(layer_sizes, &mut rand::thread_rng())
    }

    /// Like `new`, drawing initial weights from `rng`.
    pub fn with_rng<R: Rng + ?Sized>(layer_sizes: &[usize], rng: &mut R) -> Self {
        assert!(layer_sizes.len() >= 2, "a network needs at least 2 layers");
        let mut network = Network::default();
        for sizes in layer_sizes.windows(2) {
            network.push(Layer::with_rng(sizes[0], sizes[1], rng));
        }
        network
    }

    /// Appends a freshly initialized layer.
    ///
    /// Panics if `inputs` differs from the output size of the current last
    /// layer.
    pub fn add_layer(&mut self, inputs: usize, outputs: usize) {
        self.push(Layer::new(inputs, outputs));
    }

    /// Appends an existing layer, with the same checks as `add_layer`.
    pub fn push(&mut self, layer: Layer) {
        if let Some(last) = self.layers.last() {
            assert_eq!(
                last.output_len(),
                layer.input_len(),
                "layer {} expects {} inputs but the previous layer has {} outputs",
                self.layers.len(),
                layer.input_len(),
                last.output_len()
            );
        }
        self.layers.push(layer);
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Returns the size of the input layer to the network.
    pub fn input_len(&self) -> usize {
        self.front().input_len()
    }

    /// Returns the size of the output layer from the network.
    pub fn output_len(&self) -> usize {
        self.back().output_len()
    }

    /// Feeds the provided `input` through the network, returning the output
    /// layer.
    pub fn forward(&self, input: ArrayView1<f64>) -> Array1<f64> {
        let mut predicted = self.front().forward(input);
        for layer in &self.layers[1..] {
            predicted = layer.forward(predicted.view());
        }
        predicted
    }

    /// Feeds every row of `input` through the network.
    pub fn forward_batch(&self, input: ArrayView2<f64>) -> Array2<f64> {
        let mut predicted = self.front().forward_batch(input);
        for layer in &self.layers[1..] {
            predicted = layer.forward_batch(predicted.view());
        }
        predicted
    }

    /// Mean over the dataset of half the squared error between the network
    /// output and the target.
    pub fn supervised_objective(
        &self,
        input: ArrayView2<f64>,
        target: ArrayView2<f64>,
    ) -> f64 {
        assert_eq!(input.nrows(), target.nrows());
        let predicted = self.forward_batch(input);
        let total: f64 = predicted
            .outer_iter()
            .zip(target.outer_iter())
            .map(|(y, t)| 0.5 * squared_distance(y, t))
            .sum();
        total / input.nrows() as f64
    }

    /// Performs one backpropagation step over a mini-batch.
    ///
    /// Every layer is updated from activations and deltas computed before any
    /// layer in this batch changed. An empty mini-batch changes nothing.
    pub fn supervised_mini_batch_update(
        &mut self,
        input: ArrayView2<f64>,
        target: ArrayView2<f64>,
        option: &TrainingOption,
    ) {
        assert_eq!(input.nrows(), target.nrows());
        assert_eq!(target.ncols(), self.output_len());
        if input.nrows() == 0 {
            return;
        }

        // 1. Forward, keeping every layer's activations.
        let mut activations: Vec<Array2<f64>> =
            Vec::with_capacity(self.layers.len());
        for (i, layer) in self.layers.iter().enumerate() {
            let layer_input = match i {
                0 => input.reborrow(),
                _ => activations[i - 1].view(),
            };
            let output = layer.forward_batch(layer_input);
            activations.push(output);
        }

        // 2. Backward, starting from the output error.
        let mut deltas: Vec<Array2<f64>> =
            vec![Array2::zeros((0, 0)); self.layers.len()];
        let last = self.layers.len() - 1;
        let mut error = &activations[last] - &target;
        for (i, layer) in self.layers.iter().enumerate().rev() {
            deltas[i] = layer.backward_batch(activations[i].view(), error.view());
            if i > 0 {
                error = layer.accumulate_delta_batch(deltas[i].view());
            }
        }

        // 3. Update every layer from its own input and delta.
        for (i, layer) in self.layers.iter_mut().enumerate() {
            let layer_input = match i {
                0 => input.reborrow(),
                _ => activations[i - 1].view(),
            };
            layer.turn(layer_input, deltas[i].view(), option);
        }
    }

    /// Backpropagation on a single example.
    pub fn supervised_online_update(
        &mut self,
        input: ArrayView1<f64>,
        target: ArrayView1<f64>,
        option: &TrainingOption,
    ) {
        self.supervised_mini_batch_update(
            input.insert_axis(Axis(0)),
            target.insert_axis(Axis(0)),
            option,
        );
    }

    /// Trains the network with mini-batch gradient descent on the rows of
    /// `input` and `target`.
    ///
    /// Returns an error if `option` is invalid, before any update happens.
    pub fn train(
        &mut self,
        input: ArrayView2<f64>,
        target: ArrayView2<f64>,
        option: &TrainingOption,
    ) -> Result<TrainingReport> {
        option.validate()?;
        let trainer = Trainer::new(option.base())?;
        let mut session = Session {
            network: self,
            option,
        };
        if option.mini_batch_size == 1 {
            trainer.supervised_online_train(&mut session, input, target)
        } else {
            trainer.supervised_mini_batch_train(&mut session, input, target)
        }
    }

    /// Writes the network parameters to `path` as JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        persist::save(path, self)
    }

    /// Reads a network written by `save`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        persist::load(path)
    }

    fn front(&self) -> &Layer {
        self.layers.first().expect("network has no layers")
    }

    fn back(&self) -> &Layer {
        self.layers.last().expect("network has no layers")
    }
}

/// Binds a network to the options of one `train` call.
struct Session<'a> {
    network: &'a mut Network,
    option: &'a TrainingOption,
}

impl<'a> SupervisedObjective for Session<'a> {
    fn supervised_objective(
        &mut self,
        input: ArrayView2<f64>,
        target: ArrayView2<f64>,
    ) -> f64 {
        self.network.supervised_objective(input, target)
    }
}

impl<'a> SupervisedOnlineUpdate for Session<'a> {
    fn supervised_online_update(
        &mut self,
        input: ArrayView1<f64>,
        target: ArrayView1<f64>,
    ) {
        self.network
            .supervised_online_update(input, target, self.option)
    }
}

impl<'a> SupervisedMiniBatchUpdate for Session<'a> {
    fn supervised_mini_batch_update(
        &mut self,
        input: ArrayView2<f64>,
        target: ArrayView2<f64>,
    ) {
        self.network
            .supervised_mini_batch_update(input, target, self.option)
    }
}
