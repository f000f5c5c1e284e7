//! [Restricted Boltzmann machines]
//! (https://en.wikipedia.org/wiki/Restricted_Boltzmann_machine) trained by
//! contrastive divergence.
//!
//! ```text
//!     o o .... o   h (hidden units), c (hidden bias)
//!     /\ /\ /  /\
//!    o o o ... o   v (visible units), b (visible bias)
//! ```
//!
//! The weights `W` are stored as a `hidden x visible` matrix. Gradient
//! estimates use k rounds of Gibbs sampling, optionally continuing a
//! persistent Markov chain per training example across mini-batches.

use std::path::Path;

use itertools::multizip;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use rand_distr::StandardNormal;
use serde_derive::{Deserialize, Serialize};
use tracing::trace;

use crate::error::Result;
use crate::math::{
    flip, random_matrix, random_subset, sigmoid, squared_distance,
};
use crate::option::TrainingOption;
use crate::persist;
use crate::trainer::{
    Trainer, TrainingReport, UnsupervisedMiniBatchUpdate,
    UnsupervisedObjective, UnsupervisedOnlineUpdate,
};

/// Maximum number of examples used to estimate the pseudo-log-likelihood
/// while monitoring.
const OBJECTIVE_SAMPLES: usize = 3000;

/// Standard deviation of the initial weights.
const INITIAL_WEIGHT_SCALE: f64 = 0.01;

/// A restricted Boltzmann machine with binary visible and hidden units.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Rbm {
    weights: Array2<f64>,
    visible_bias: Array1<f64>,
    hidden_bias: Array1<f64>,
    num_hidden_units: usize,
    num_visible_units: usize,
    /// One visible vector per training example, only while training with
    /// persistent contrastive divergence.
    #[serde(skip)]
    persistent_chains: Option<Array2<f64>>,
    /// The previous parameter step, carried for momentum.
    #[serde(skip)]
    velocity: Option<Gradient>,
}

/// Parameter gradients, or steps, for an `Rbm`.
#[derive(Clone, Debug, PartialEq)]
pub struct Gradient {
    pub weights: Array2<f64>,
    pub visible_bias: Array1<f64>,
    pub hidden_bias: Array1<f64>,
}

impl Gradient {
    fn zeros(num_hidden_units: usize, num_visible_units: usize) -> Self {
        Gradient {
            weights: Array2::zeros((num_hidden_units, num_visible_units)),
            visible_bias: Array1::zeros(num_visible_units),
            hidden_bias: Array1::zeros(num_hidden_units),
        }
    }

    fn scale(&mut self, factor: f64) {
        self.weights *= factor;
        self.visible_bias *= factor;
        self.hidden_bias *= factor;
    }
}

impl Rbm {
    /// Creates an untrained machine with small random weights and zero
    /// biases.
    pub fn new(num_visible_units: usize, num_hidden_units: usize) -> Self {
        Self::with_rng(
            num_visible_units,
            num_hidden_units,
            &mut rand::thread_rng(),
        )
    }

    /// Like `new`, drawing initial weights from `rng`.
    pub fn with_rng<R: Rng + ?Sized>(
        num_visible_units: usize,
        num_hidden_units: usize,
        rng: &mut R,
    ) -> Self {
        let mut weights = random_matrix(
            StandardNormal,
            num_hidden_units,
            num_visible_units,
            rng,
        );
        weights *= INITIAL_WEIGHT_SCALE;
        Self::from_parameters(
            weights,
            Array1::zeros(num_visible_units),
            Array1::zeros(num_hidden_units),
        )
    }

    /// Builds a machine from a `hidden x visible` weight matrix and the two
    /// bias vectors.
    pub fn from_parameters(
        weights: Array2<f64>,
        visible_bias: Array1<f64>,
        hidden_bias: Array1<f64>,
    ) -> Self {
        assert_eq!(weights.nrows(), hidden_bias.len());
        assert_eq!(weights.ncols(), visible_bias.len());
        Rbm {
            num_hidden_units: weights.nrows(),
            num_visible_units: weights.ncols(),
            weights,
            visible_bias,
            hidden_bias,
            persistent_chains: None,
            velocity: None,
        }
    }

    pub fn num_visible_units(&self) -> usize {
        self.num_visible_units
    }

    pub fn num_hidden_units(&self) -> usize {
        self.num_hidden_units
    }

    pub fn weights(&self) -> ArrayView2<f64> {
        self.weights.view()
    }

    pub fn visible_bias(&self) -> ArrayView1<f64> {
        self.visible_bias.view()
    }

    pub fn hidden_bias(&self) -> ArrayView1<f64> {
        self.hidden_bias.view()
    }

    /// The persistent chain state, present only during and after a `train`
    /// call with `use_persistent` set.
    pub fn persistent_chains(&self) -> Option<ArrayView2<f64>> {
        self.persistent_chains.as_ref().map(|chains| chains.view())
    }

    /// Drops the persistent chain state. It is scratch space for training,
    /// not part of the model.
    pub fn discard_persistent_chains(&mut self) {
        self.persistent_chains = None;
    }

    /// Returns `p(h_i = 1 | v)`.
    pub fn p_h_given_v(&self, hidden_index: usize, v: ArrayView1<f64>) -> f64 {
        assert_eq!(v.len(), self.num_visible_units);
        sigmoid(
            self.weights.row(hidden_index).dot(&v)
                + self.hidden_bias[hidden_index],
        )
    }

    /// Returns `p(v_j = 1 | h)`.
    pub fn p_v_given_h(&self, visible_index: usize, h: ArrayView1<f64>) -> f64 {
        assert_eq!(h.len(), self.num_hidden_units);
        sigmoid(
            self.weights.column(visible_index).dot(&h)
                + self.visible_bias[visible_index],
        )
    }

    /// Returns `p(h = 1 | v)` for every hidden unit.
    ///
    /// These probabilities, not sampled states, are what a stacked machine
    /// is trained on.
    pub fn forward(&self, v: ArrayView1<f64>) -> Array1<f64> {
        assert_eq!(v.len(), self.num_visible_units);
        let mut hidden = self.weights.dot(&v) + &self.hidden_bias;
        hidden.mapv_inplace(sigmoid);
        hidden
    }

    /// Row-wise `forward`.
    pub fn forward_batch(&self, data: ArrayView2<f64>) -> Array2<f64> {
        assert_eq!(data.ncols(), self.num_visible_units);
        let mut hidden = data.dot(&self.weights.t()) + &self.hidden_bias;
        hidden.mapv_inplace(sigmoid);
        hidden
    }

    /// Returns `p(v = 1 | h)` for every visible unit.
    pub fn backward(&self, h: ArrayView1<f64>) -> Array1<f64> {
        assert_eq!(h.len(), self.num_hidden_units);
        let mut visible = self.weights.t().dot(&h) + &self.visible_bias;
        visible.mapv_inplace(sigmoid);
        visible
    }

    /// Runs `num_steps` rounds of Gibbs sampling starting from `v`.
    ///
    /// Returns the final binary visible sample and the visible activation
    /// probabilities it was drawn from.
    pub fn reconstruct<R: Rng + ?Sized>(
        &self,
        v: ArrayView1<f64>,
        num_steps: usize,
        rng: &mut R,
    ) -> (Array1<f64>, Array1<f64>) {
        assert!(num_steps >= 1, "Gibbs sampling needs at least one step");
        let mut sample = v.to_owned();
        let mut probabilities = Array1::zeros(self.num_visible_units);
        for _ in 0..num_steps {
            let hidden = bernoulli(self.forward(sample.view()), rng);
            probabilities = self.backward(hidden.view());
            sample = bernoulli(probabilities.clone(), rng);
        }
        (sample, probabilities)
    }

    /// Mean of `0.5 * |v - p(v | h)|^2` over `data` after `num_steps` rounds
    /// of Gibbs sampling.
    pub fn reconstruction_error<R: Rng + ?Sized>(
        &self,
        data: ArrayView2<f64>,
        num_steps: usize,
        rng: &mut R,
    ) -> f64 {
        let total: f64 = data
            .outer_iter()
            .map(|v| {
                let (_, reconstructed) = self.reconstruct(v, num_steps, rng);
                0.5 * squared_distance(v, reconstructed.view())
            })
            .sum();
        total / data.nrows() as f64
    }

    /// Returns the free energy
    /// `F(v) = -b.v - sum_i log(1 + exp(c_i + W_i.v))`.
    pub fn free_energy(&self, v: ArrayView1<f64>) -> f64 {
        assert_eq!(v.len(), self.num_visible_units);
        let visible_term = self.visible_bias.dot(&v);
        let hidden_term: f64 = (self.weights.dot(&v) + &self.hidden_bias)
            .iter()
            .map(|&x| softplus(x))
            .sum();
        -visible_term - hidden_term
    }

    /// Estimates the pseudo-log-likelihood of `v` by flipping one random
    /// bit.
    pub fn pseudo_log_likelihood_for_one_sample<R: Rng + ?Sized>(
        &self,
        v: ArrayView1<f64>,
        rng: &mut R,
    ) -> f64 {
        let bit = rng.gen_range(0..v.len());
        let energy = self.free_energy(v);
        let flipped = self.free_energy(flip(v, bit).view());
        self.num_visible_units as f64 * log_sigmoid(flipped - energy)
    }

    /// Mean pseudo-log-likelihood over the rows of `data`.
    pub fn pseudo_log_likelihood<R: Rng + ?Sized>(
        &self,
        data: ArrayView2<f64>,
        rng: &mut R,
    ) -> f64 {
        let total: f64 = data
            .outer_iter()
            .map(|v| self.pseudo_log_likelihood_for_one_sample(v, rng))
            .sum();
        total / data.nrows() as f64
    }

    /// The training objective: pseudo-log-likelihood over a random subset
    /// of at most 3000 rows of `data`.
    pub fn unsupervised_objective<R: Rng + ?Sized>(
        &self,
        data: ArrayView2<f64>,
        rng: &mut R,
    ) -> f64 {
        let subset = random_subset(data, OBJECTIVE_SAMPLES, rng);
        self.pseudo_log_likelihood(subset.view(), rng)
    }

    /// Estimates the log-likelihood gradient over a mini-batch with
    /// contrastive divergence.
    ///
    /// With `use_persistent`, example `n` of the batch continues the chain in
    /// slot `n + mini_batch_index * mini_batch_size`, and the slot is then
    /// overwritten with the new sample. That slot only refers to the same
    /// example every time if mini-batches are always the same contiguous,
    /// unshuffled windows of the training set, which is what `Trainer`
    /// produces.
    ///
    /// Panics if `use_persistent` is set and no chains were allocated by
    /// `train`.
    pub fn gradient<R: Rng + ?Sized>(
        &mut self,
        batch: ArrayView2<f64>,
        mini_batch_index: usize,
        option: &TrainingOption,
        rng: &mut R,
    ) -> Gradient {
        assert_eq!(batch.ncols(), self.num_visible_units);
        let mut gradient =
            Gradient::zeros(self.num_hidden_units, self.num_visible_units);
        for (n, v) in batch.outer_iter().enumerate() {
            if option.use_persistent {
                let slot = n + mini_batch_index * option.mini_batch_size;
                let seed = self
                    .persistent_chains
                    .as_ref()
                    .expect("persistent chains are allocated by train")
                    .row(slot)
                    .to_owned();
                let sample = self.accumulate(
                    v,
                    seed.view(),
                    option.order_of_gibbs_sampling,
                    rng,
                    &mut gradient,
                );
                if let Some(chains) = self.persistent_chains.as_mut() {
                    chains.row_mut(slot).assign(&sample);
                }
            } else {
                self.accumulate(
                    v,
                    v,
                    option.order_of_gibbs_sampling,
                    rng,
                    &mut gradient,
                );
            }
        }
        if batch.nrows() > 0 {
            gradient.scale(1.0 / batch.nrows() as f64);
        }
        gradient
    }

    /// Adds one example's contribution to `gradient`, returning the binary
    /// sample the chain ended on.
    fn accumulate<R: Rng + ?Sized>(
        &self,
        v: ArrayView1<f64>,
        seed: ArrayView1<f64>,
        num_steps: usize,
        rng: &mut R,
        gradient: &mut Gradient,
    ) -> Array1<f64> {
        let (sample, reconstructed) = self.reconstruct(seed, num_steps, rng);
        let positive = self.forward(v);
        let negative = self.forward(reconstructed.view());

        for (mut row, &p, &q) in multizip((
            gradient.weights.outer_iter_mut(),
            positive.iter(),
            negative.iter(),
        )) {
            row.scaled_add(p, &v);
            row.scaled_add(-q, &reconstructed);
        }
        gradient.visible_bias += &v;
        gradient.visible_bias -= &reconstructed;
        gradient.hidden_bias += &positive;
        gradient.hidden_bias -= &negative;
        sample
    }

    /// Takes one gradient ascent step.
    ///
    /// The step is `momentum * previous step + learning_rate * gradient`.
    /// With L2 regularization the weights, but not the biases, are then
    /// shrunk by `1 - regularization_rate`.
    pub fn update(&mut self, gradient: &Gradient, option: &TrainingOption) {
        let mut step = match self.velocity.take() {
            Some(mut velocity)
                if velocity.weights.dim() == self.weights.dim() =>
            {
                velocity.scale(option.momentum);
                velocity
            }
            _ => Gradient::zeros(self.num_hidden_units, self.num_visible_units),
        };
        step.weights.scaled_add(option.learning_rate, &gradient.weights);
        step.visible_bias
            .scaled_add(option.learning_rate, &gradient.visible_bias);
        step.hidden_bias
            .scaled_add(option.learning_rate, &gradient.hidden_bias);

        self.weights += &step.weights;
        if option.l2_regularization {
            self.weights *= 1.0 - option.regularization_rate;
        }
        self.visible_bias += &step.visible_bias;
        self.hidden_bias += &step.hidden_bias;
        self.velocity = Some(step);
    }

    /// Estimates the gradient on `batch` and applies it. An empty batch
    /// changes nothing.
    pub fn unsupervised_mini_batch_update<R: Rng + ?Sized>(
        &mut self,
        batch: ArrayView2<f64>,
        epoch: usize,
        mini_batch_index: usize,
        option: &TrainingOption,
        rng: &mut R,
    ) {
        trace!(epoch, mini_batch_index, "rbm update");
        if batch.nrows() == 0 {
            return;
        }
        let gradient = self.gradient(batch, mini_batch_index, option, rng);
        self.update(&gradient, option);
    }

    /// Standard contrastive divergence on a single example. The chain always
    /// starts at `v`, since there is no mini-batch position to key a
    /// persistent chain on.
    pub fn unsupervised_online_update<R: Rng + ?Sized>(
        &mut self,
        v: ArrayView1<f64>,
        option: &TrainingOption,
        rng: &mut R,
    ) {
        let option = TrainingOption {
            use_persistent: false,
            ..option.clone()
        };
        let batch = v.insert_axis(Axis(0));
        let gradient = self.gradient(batch, 0, &option, rng);
        self.update(&gradient, &option);
    }

    /// Trains the machine on the rows of `data` with mini-batch contrastive
    /// divergence.
    pub fn train(
        &mut self,
        data: ArrayView2<f64>,
        option: &TrainingOption,
    ) -> Result<TrainingReport> {
        self.train_with_rng(data, option, &mut rand::thread_rng())
    }

    /// Like `train`, sampling from `rng`.
    ///
    /// Returns an error if `option` is invalid, before any update happens.
    /// Panics if the rows of `data` do not have one value per visible unit.
    pub fn train_with_rng<R: Rng + ?Sized>(
        &mut self,
        data: ArrayView2<f64>,
        option: &TrainingOption,
        rng: &mut R,
    ) -> Result<TrainingReport> {
        option.validate()?;
        let trainer = Trainer::new(option.base())?;
        assert_eq!(data.ncols(), self.num_visible_units);

        self.persistent_chains = if option.use_persistent {
            Some(data.to_owned())
        } else {
            None
        };
        self.velocity = None;

        let mut session = Session {
            rbm: self,
            option,
            rng,
        };
        trainer.unsupervised_mini_batch_train(&mut session, data)
    }

    /// Writes the parameters to `path` as JSON, discarding any persistent
    /// chain state first.
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.discard_persistent_chains();
        persist::save(path, self)
    }

    /// Reads a machine written by `save`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        persist::load(path)
    }
}

/// Replaces every probability with a 0/1 draw.
fn bernoulli<R: Rng + ?Sized>(mut p: Array1<f64>, rng: &mut R) -> Array1<f64> {
    p.mapv_inplace(|p| if p > rng.gen::<f64>() { 1.0 } else { 0.0 });
    p
}

/// `log(1 + e^x)`, without overflowing for large `x`.
fn softplus(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

/// `log(sigmoid(x))`, without underflowing for very negative `x`.
fn log_sigmoid(x: f64) -> f64 {
    -softplus(-x)
}

/// Binds a machine to the options and randomness of one `train` call.
struct Session<'a, R: ?Sized> {
    rbm: &'a mut Rbm,
    option: &'a TrainingOption,
    rng: &'a mut R,
}

impl<'a, R: Rng + ?Sized> UnsupervisedObjective for Session<'a, R> {
    fn unsupervised_objective(&mut self, input: ArrayView2<f64>) -> f64 {
        self.rbm.unsupervised_objective(input, self.rng)
    }
}

impl<'a, R: Rng + ?Sized> UnsupervisedMiniBatchUpdate for Session<'a, R> {
    fn unsupervised_mini_batch_update(
        &mut self,
        batch: ArrayView2<f64>,
        epoch: usize,
        mini_batch_index: usize,
    ) {
        self.rbm.unsupervised_mini_batch_update(
            batch,
            epoch,
            mini_batch_index,
            self.option,
            self.rng,
        )
    }
}

impl<'a, R: Rng + ?Sized> UnsupervisedOnlineUpdate for Session<'a, R> {
    fn unsupervised_online_update(&mut self, input: ArrayView1<f64>) {
        self.rbm
            .unsupervised_online_update(input, self.option, self.rng)
    }
}
