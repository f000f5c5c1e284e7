//! Training parameters.

use std::fs;
use std::path::Path;

use serde_derive::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The loop-shape parameters consumed by the generic `Trainer`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BaseTrainingOption {
    pub epochs: usize,
    pub mini_batch_size: usize,
    pub monitoring: bool,
}

/// Parameters for a single `train` call on a network or RBM.
///
/// Options that a model does not use are ignored; the feed-forward network
/// never looks at the Gibbs sampling or persistence settings, for example.
///
/// Defaults can be overridden with the builder methods:
///
/// ```
/// # use nnet::option::TrainingOption;
/// let option = TrainingOption::default()
///     .learning_rate(0.05)
///     .epochs(10)
///     .mini_batch_size(20)
///     .use_persistent(true);
/// assert!(option.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingOption {
    pub learning_rate: f64,
    pub epochs: usize,
    pub mini_batch_size: usize,
    pub l2_regularization: bool,
    /// Weights are multiplied by `1 - regularization_rate` after each update
    /// when `l2_regularization` is set.
    pub regularization_rate: f64,
    /// Number of Gibbs sampling rounds per gradient estimate. 1 is enough for
    /// many cases.
    pub order_of_gibbs_sampling: usize,
    /// Seeds each negative-phase chain from the previous visit of the same
    /// example instead of from the example itself.
    pub use_persistent: bool,
    pub momentum: f64,
    /// Computes and logs the model objective over the full dataset after
    /// every epoch.
    pub monitoring: bool,
}

impl Default for TrainingOption {
    fn default() -> Self {
        TrainingOption {
            learning_rate: 0.1,
            epochs: 1,
            mini_batch_size: 1,
            l2_regularization: false,
            regularization_rate: 1.0e-4,
            order_of_gibbs_sampling: 1,
            use_persistent: false,
            momentum: 0.0,
            monitoring: false,
        }
    }
}

impl TrainingOption {
    /// Reads options from a JSON file. Missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Sets the learning rate to use during gradient descent.
    pub fn learning_rate(mut self, rate: f64) -> Self {
        self.learning_rate = rate;
        self
    }

    /// Sets the number of passes over the training data.
    pub fn epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Sets the number of examples per parameter update.
    pub fn mini_batch_size(mut self, size: usize) -> Self {
        self.mini_batch_size = size;
        self
    }

    /// Enables multiplicative L2 weight shrinkage at the given rate.
    pub fn l2_regularization(mut self, rate: f64) -> Self {
        self.l2_regularization = true;
        self.regularization_rate = rate;
        self
    }

    pub fn order_of_gibbs_sampling(mut self, order: usize) -> Self {
        self.order_of_gibbs_sampling = order;
        self
    }

    pub fn use_persistent(mut self, persistent: bool) -> Self {
        self.use_persistent = persistent;
        self
    }

    pub fn momentum(mut self, momentum: f64) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn monitoring(mut self, monitoring: bool) -> Self {
        self.monitoring = monitoring;
        self
    }

    /// Projects these options onto the parameters of the training loop.
    pub fn base(&self) -> BaseTrainingOption {
        BaseTrainingOption {
            epochs: self.epochs,
            mini_batch_size: self.mini_batch_size,
            monitoring: self.monitoring,
        }
    }

    /// Verifies that the model-level options are usable, returning an error
    /// if something is wrong.
    pub fn validate(&self) -> Result<()> {
        if self.learning_rate == 0.0 || !self.learning_rate.is_finite() {
            return Err(Error::config(
                "learning rate must be specified and finite",
            ));
        }
        if self.epochs == 0 {
            return Err(Error::config("epochs must be larger than zero"));
        }
        if self.mini_batch_size == 0 {
            return Err(Error::config(
                "mini-batch size must be larger than zero",
            ));
        }
        if self.order_of_gibbs_sampling == 0 {
            return Err(Error::config(
                "order of Gibbs sampling must be at least one",
            ));
        }
        if !(0.0..1.0).contains(&self.regularization_rate) {
            return Err(Error::config(
                "regularization rate must lie in [0, 1)",
            ));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(Error::config("momentum must lie in [0, 1)"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        assert!(TrainingOption::default().validate().is_ok());
    }

    #[test]
    fn zero_learning_rate() {
        let option = TrainingOption::default().learning_rate(0.0);
        assert!(matches!(option.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn zero_epochs() {
        let option = TrainingOption::default().epochs(0);
        assert!(matches!(option.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn zero_gibbs_order() {
        let option = TrainingOption::default().order_of_gibbs_sampling(0);
        assert!(option.validate().is_err());
    }

    #[test]
    fn momentum_out_of_range() {
        assert!(TrainingOption::default().momentum(1.0).validate().is_err());
        assert!(TrainingOption::default().momentum(0.5).validate().is_ok());
    }

    #[test]
    fn base_projection() {
        let option = TrainingOption::default()
            .epochs(3)
            .mini_batch_size(7)
            .monitoring(true);
        assert_eq!(
            option.base(),
            BaseTrainingOption {
                epochs: 3,
                mini_batch_size: 7,
                monitoring: true,
            }
        );
    }

    #[test]
    fn partial_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"learning_rate": 0.01, "use_persistent": true}}"#)
            .unwrap();
        let option = TrainingOption::from_json_file(file.path()).unwrap();
        assert_eq!(option.learning_rate, 0.01);
        assert!(option.use_persistent);
        assert_eq!(option.mini_batch_size, 1);
    }

    #[test]
    fn malformed_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            TrainingOption::from_json_file(file.path()),
            Err(Error::Serialization(_))
        ));
    }
}
