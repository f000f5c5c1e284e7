//! Inference helpers shared by every model.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::dbn::Dbn;
use crate::layer::Layer;
use crate::math::argmax;
use crate::mlp::Network;
use crate::rbm::Rbm;

/// A model that maps an input vector to an output vector.
pub trait Forward {
    fn forward(&self, input: ArrayView1<f64>) -> Array1<f64>;

    /// Applies `forward` to every row of `input`.
    fn forward_batch(&self, input: ArrayView2<f64>) -> Array2<f64> {
        let rows: Vec<Array1<f64>> =
            input.outer_iter().map(|row| self.forward(row)).collect();
        let cols = rows.first().map_or(0, |row| row.len());
        let mut output = Array2::zeros((rows.len(), cols));
        for (mut out, row) in output.outer_iter_mut().zip(rows) {
            out.assign(&row);
        }
        output
    }
}

impl Forward for Layer {
    fn forward(&self, input: ArrayView1<f64>) -> Array1<f64> {
        Layer::forward(self, input)
    }

    fn forward_batch(&self, input: ArrayView2<f64>) -> Array2<f64> {
        Layer::forward_batch(self, input)
    }
}

impl Forward for Network {
    fn forward(&self, input: ArrayView1<f64>) -> Array1<f64> {
        Network::forward(self, input)
    }

    fn forward_batch(&self, input: ArrayView2<f64>) -> Array2<f64> {
        Network::forward_batch(self, input)
    }
}

impl Forward for Rbm {
    fn forward(&self, input: ArrayView1<f64>) -> Array1<f64> {
        Rbm::forward(self, input)
    }

    fn forward_batch(&self, input: ArrayView2<f64>) -> Array2<f64> {
        Rbm::forward_batch(self, input)
    }
}

impl Forward for Dbn {
    fn forward(&self, input: ArrayView1<f64>) -> Array1<f64> {
        Dbn::forward(self, input)
    }
}

/// Predicts a class for every row of `inputs`: the index of the largest
/// output unit.
pub fn classify<M: Forward + ?Sized>(model: &M, inputs: ArrayView2<f64>) -> Vec<usize> {
    model
        .forward_batch(inputs)
        .outer_iter()
        .map(argmax)
        .collect()
}

/// Fraction of rows of `inputs` whose predicted class equals the matching
/// label. Returns 0 for an empty dataset.
pub fn accuracy<M: Forward + ?Sized>(
    model: &M,
    inputs: ArrayView2<f64>,
    labels: &[usize],
) -> f64 {
    assert_eq!(inputs.nrows(), labels.len());
    if labels.is_empty() {
        return 0.0;
    }
    let correct = classify(model, inputs)
        .iter()
        .zip(labels)
        .filter(|(predicted, label)| predicted == label)
        .count();
    correct as f64 / labels.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    /// Layer whose first output tracks the first input and whose second
    /// output tracks the second.
    fn selector() -> Layer {
        Layer::from_parameters(
            arr2(&[[10.0, -10.0], [-10.0, 10.0]]),
            arr1(&[0.0, 0.0]),
        )
    }

    #[test]
    fn classify_picks_largest_output() {
        let inputs = arr2(&[[1.0, 0.0], [0.0, 1.0], [0.2, 0.9]]);
        assert_eq!(classify(&selector(), inputs.view()), vec![0, 1, 1]);
    }

    #[test]
    fn accuracy_counts_matches() {
        let inputs = arr2(&[[1.0, 0.0], [0.0, 1.0], [0.2, 0.9], [0.7, 0.1]]);
        let labels = [0, 1, 0, 0];
        assert_eq!(accuracy(&selector(), inputs.view(), &labels), 0.75);
    }

    #[test]
    fn empty_dataset() {
        let inputs = Array2::<f64>::zeros((0, 2));
        assert_eq!(accuracy(&selector(), inputs.view(), &[]), 0.0);
    }

    #[test]
    fn default_batch_agrees_with_dbn() {
        let mut dbn = Dbn::new();
        dbn.add_layer(3, 2);
        let inputs = arr2(&[[1.0, 0.0, 1.0], [0.0, 0.5, 0.5]]);
        let batch = Forward::forward_batch(&dbn, inputs.view());
        assert_eq!(batch.dim(), (2, 2));
        for (row, out) in inputs.outer_iter().zip(batch.outer_iter()) {
            assert_eq!(dbn.forward(row), out);
        }
    }

    #[test]
    fn trait_objects() {
        let network = Network::new(&[2, 3, 2]);
        let models: Vec<Box<dyn Forward>> =
            vec![Box::new(selector()), Box::new(network)];
        let inputs = arr2(&[[1.0, 0.0]]);
        for model in &models {
            assert_eq!(classify(model.as_ref(), inputs.view()).len(), 1);
        }
    }
}
