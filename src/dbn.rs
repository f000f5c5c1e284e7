//! Deep belief networks: stacks of restricted Boltzmann machines trained
//! greedily, one layer at a time.

use std::path::Path;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::Rng;
use serde_derive::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::layer::Layer;
use crate::mlp::Network;
use crate::option::TrainingOption;
use crate::persist;
use crate::rbm::Rbm;
use crate::trainer::TrainingReport;

/// A stack of RBMs where each machine's hidden layer is the visible layer of
/// the next.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Dbn {
    rbms: Vec<Rbm>,
}

impl Dbn {
    pub fn new() -> Self {
        Dbn::default()
    }

    /// Appends a new, untrained machine.
    ///
    /// Panics if `num_visible_units` differs from the hidden size of the
    /// current top machine.
    pub fn add_layer(&mut self, num_visible_units: usize, num_hidden_units: usize) {
        self.add_layer_with_rng(
            num_visible_units,
            num_hidden_units,
            &mut rand::thread_rng(),
        );
    }

    /// Like `add_layer`, drawing initial weights from `rng`.
    pub fn add_layer_with_rng<R: Rng + ?Sized>(
        &mut self,
        num_visible_units: usize,
        num_hidden_units: usize,
        rng: &mut R,
    ) {
        if let Some(top) = self.rbms.last() {
            assert_eq!(
                top.num_hidden_units(),
                num_visible_units,
                "layer {} has {} visible units but the layer below has {} hidden units",
                self.rbms.len(),
                num_visible_units,
                top.num_hidden_units()
            );
        }
        self.rbms
            .push(Rbm::with_rng(num_visible_units, num_hidden_units, rng));
    }

    pub fn num_layers(&self) -> usize {
        self.rbms.len()
    }

    pub fn rbms(&self) -> &[Rbm] {
        &self.rbms
    }

    /// Trains every machine in turn on the hidden activation probabilities of
    /// the machine below it, starting from `data`.
    pub fn pretrain(
        &mut self,
        data: ArrayView2<f64>,
        option: &TrainingOption,
    ) -> Result<Vec<TrainingReport>> {
        self.pretrain_with_rng(data, option, &mut rand::thread_rng())
    }

    /// Like `pretrain`, sampling from `rng`.
    pub fn pretrain_with_rng<R: Rng + ?Sized>(
        &mut self,
        data: ArrayView2<f64>,
        option: &TrainingOption,
        rng: &mut R,
    ) -> Result<Vec<TrainingReport>> {
        option.validate()?;
        let mut reports = Vec::with_capacity(self.rbms.len());
        let mut layer_data: Option<Array2<f64>> = None;
        for (i, rbm) in self.rbms.iter_mut().enumerate() {
            debug!(
                layer = i + 1,
                visible = rbm.num_visible_units(),
                hidden = rbm.num_hidden_units(),
                "pretraining layer"
            );
            let input = match &layer_data {
                Some(transformed) => transformed.view(),
                None => data.reborrow(),
            };
            reports.push(rbm.train_with_rng(input, option, rng)?);
            let next = rbm.forward_batch(input);
            rbm.discard_persistent_chains();
            layer_data = Some(next);
        }
        Ok(reports)
    }

    /// Feeds `v` up through the stack, returning the top layer's hidden
    /// activation probabilities.
    pub fn forward(&self, v: ArrayView1<f64>) -> Array1<f64> {
        let mut activation = v.to_owned();
        for rbm in &self.rbms {
            activation = rbm.forward(activation.view());
        }
        activation
    }

    /// Unrolls the stack into a feed-forward network with the same upward
    /// activations, ready for supervised fine-tuning.
    ///
    /// Panics if the stack is empty.
    pub fn to_network(&self) -> Network {
        assert!(!self.rbms.is_empty(), "cannot unroll an empty stack");
        let mut network = Network::default();
        for rbm in &self.rbms {
            network.push(Layer::from_parameters(
                rbm.weights().t().to_owned(),
                rbm.hidden_bias().to_owned(),
            ));
        }
        network
    }

    /// Writes every machine's parameters to `path` as JSON.
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        for rbm in &mut self.rbms {
            rbm.discard_persistent_chains();
        }
        persist::save(path, self)
    }

    /// Reads a network written by `save`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        persist::load(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    #[should_panic]
    fn mismatched_layers() {
        let mut dbn = Dbn::new();
        dbn.add_layer(4, 3);
        dbn.add_layer(2, 2);
    }

    #[test]
    fn forward_through_stack() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut dbn = Dbn::new();
        dbn.add_layer_with_rng(4, 3, &mut rng);
        dbn.add_layer_with_rng(3, 2, &mut rng);
        assert_eq!(dbn.num_layers(), 2);

        let v = arr1(&[1.0, 0.0, 1.0, 1.0]);
        let expected = dbn.rbms()[1].forward(dbn.rbms()[0].forward(v.view()).view());
        assert_eq!(dbn.forward(v.view()), expected);
    }

    #[test]
    fn unrolled_network_matches_stack() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut dbn = Dbn::new();
        dbn.add_layer_with_rng(5, 4, &mut rng);
        dbn.add_layer_with_rng(4, 2, &mut rng);
        let network = dbn.to_network();
        assert_eq!(network.input_len(), 5);
        assert_eq!(network.output_len(), 2);

        let v = arr1(&[0.2, 0.4, 0.0, 1.0, 0.7]);
        let a = dbn.forward(v.view());
        let b = network.forward(v.view());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-12);
        }
    }

    #[test]
    fn pretraining_touches_every_layer() {
        let mut rng = StdRng::seed_from_u64(2);
        let data = Array2::from_shape_fn((40, 6), |(i, j)| {
            if (i + j) % 3 == 0 { 0.9 } else { 0.1 }
        });
        let mut dbn = Dbn::new();
        dbn.add_layer_with_rng(6, 4, &mut rng);
        dbn.add_layer_with_rng(4, 3, &mut rng);
        let before = dbn.clone();

        let option = TrainingOption::default()
            .epochs(3)
            .mini_batch_size(10)
            .use_persistent(true);
        let reports = dbn.pretrain_with_rng(data.view(), &option, &mut rng).unwrap();
        assert_eq!(reports.len(), 2);
        for (trained, initial) in dbn.rbms().iter().zip(before.rbms()) {
            assert_ne!(trained.weights(), initial.weights());
            assert!(trained.persistent_chains().is_none());
        }
    }

    #[test]
    fn invalid_option() {
        let mut dbn = Dbn::new();
        dbn.add_layer(2, 2);
        let data = Array2::zeros((4, 2));
        let option = TrainingOption::default().mini_batch_size(0);
        assert!(dbn.pretrain(data.view(), &option).is_err());
    }

    #[test]
    fn save_and_load() {
        let mut dbn = Dbn::new();
        dbn.add_layer(3, 2);
        dbn.add_layer(2, 2);
        let file = tempfile::NamedTempFile::new().unwrap();
        dbn.save(file.path()).unwrap();
        let loaded = Dbn::load(file.path()).unwrap();
        assert_eq!(loaded.num_layers(), 2);
        for (a, b) in loaded.rbms().iter().zip(dbn.rbms()) {
            assert_eq!(a.weights(), b.weights());
            assert_eq!(a.hidden_bias(), b.hidden_bias());
        }
    }
}
