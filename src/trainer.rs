//! Utilities for training models with mini-batch gradient methods.
//!
//! A model opts into a training mode by implementing the matching update
//! trait. The `Trainer` only drives the epoch and mini-batch loops; it never
//! looks at what the model computes.

use std::ops::Range;
use std::time::Instant;

use ndarray::{ArrayView1, ArrayView2};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::option::BaseTrainingOption;

/// A scalar objective over a full labelled dataset.
pub trait SupervisedObjective {
    fn supervised_objective(
        &mut self,
        input: ArrayView2<f64>,
        target: ArrayView2<f64>,
    ) -> f64;
}

/// A model updated after every labelled example.
pub trait SupervisedOnlineUpdate: SupervisedObjective {
    fn supervised_online_update(
        &mut self,
        input: ArrayView1<f64>,
        target: ArrayView1<f64>,
    );
}

/// A model updated once per labelled mini-batch.
pub trait SupervisedMiniBatchUpdate: SupervisedObjective {
    fn supervised_mini_batch_update(
        &mut self,
        input: ArrayView2<f64>,
        target: ArrayView2<f64>,
    );
}

/// A scalar objective over a full unlabelled dataset.
pub trait UnsupervisedObjective {
    fn unsupervised_objective(&mut self, input: ArrayView2<f64>) -> f64;
}

/// A model updated after every unlabelled example.
pub trait UnsupervisedOnlineUpdate: UnsupervisedObjective {
    fn unsupervised_online_update(&mut self, input: ArrayView1<f64>);
}

/// A model updated once per unlabelled mini-batch.
///
/// `mini_batch_index` counts windows from the start of the dataset, so
/// `example + mini_batch_index * mini_batch_size` identifies the same
/// training example in every epoch.
pub trait UnsupervisedMiniBatchUpdate: UnsupervisedObjective {
    fn unsupervised_mini_batch_update(
        &mut self,
        batch: ArrayView2<f64>,
        epoch: usize,
        mini_batch_index: usize,
    );
}

/// What happened during a training run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrainingReport {
    pub epochs: usize,
    pub mini_batches_per_epoch: usize,
    /// The objective after each epoch. Empty unless monitoring was enabled.
    pub objectives: Vec<f64>,
}

/// Drives epochs of mini-batch updates against a model.
///
/// The dataset is cut into contiguous windows of `mini_batch_size` rows in
/// their original order; a trailing remainder shorter than a full window is
/// not trained on. Windows are visited in the same order every epoch.
#[derive(Debug)]
pub struct Trainer {
    option: BaseTrainingOption,
}

impl Trainer {
    /// Creates a new Trainer instance, or an error if `epochs` or
    /// `mini_batch_size` is zero.
    pub fn new(option: BaseTrainingOption) -> Result<Self> {
        if option.mini_batch_size == 0 {
            return Err(Error::config(
                "mini-batch size must be larger than zero",
            ));
        }
        if option.epochs == 0 {
            return Err(Error::config("epochs must be larger than zero"));
        }
        Ok(Trainer { option })
    }

    pub fn option(&self) -> &BaseTrainingOption {
        &self.option
    }

    /// Trains `model` one labelled example at a time.
    pub fn supervised_online_train<M>(
        &self,
        model: &mut M,
        input: ArrayView2<f64>,
        target: ArrayView2<f64>,
    ) -> Result<TrainingReport>
    where
        M: SupervisedOnlineUpdate + ?Sized,
    {
        check_labelled(input, target)?;
        Ok(self.run(
            model,
            input.nrows(),
            1,
            |model, _, _, rows| {
                model.supervised_online_update(
                    input.row(rows.start),
                    target.row(rows.start),
                )
            },
            |model| model.supervised_objective(input, target),
        ))
    }

    /// Trains `model` on consecutive labelled mini-batches.
    pub fn supervised_mini_batch_train<M>(
        &self,
        model: &mut M,
        input: ArrayView2<f64>,
        target: ArrayView2<f64>,
    ) -> Result<TrainingReport>
    where
        M: SupervisedMiniBatchUpdate + ?Sized,
    {
        check_labelled(input, target)?;
        Ok(self.run(
            model,
            input.nrows(),
            self.option.mini_batch_size,
            |model, _, _, rows| {
                model.supervised_mini_batch_update(
                    input.slice(ndarray::s![rows.clone(), ..]),
                    target.slice(ndarray::s![rows, ..]),
                )
            },
            |model| model.supervised_objective(input, target),
        ))
    }

    /// Trains `model` one unlabelled example at a time.
    pub fn unsupervised_online_train<M>(
        &self,
        model: &mut M,
        input: ArrayView2<f64>,
    ) -> Result<TrainingReport>
    where
        M: UnsupervisedOnlineUpdate + ?Sized,
    {
        check_unlabelled(input)?;
        Ok(self.run(
            model,
            input.nrows(),
            1,
            |model, _, _, rows| {
                model.unsupervised_online_update(input.row(rows.start))
            },
            |model| model.unsupervised_objective(input),
        ))
    }

    /// Trains `model` on consecutive unlabelled mini-batches, passing along
    /// the epoch and the position of each window.
    pub fn unsupervised_mini_batch_train<M>(
        &self,
        model: &mut M,
        input: ArrayView2<f64>,
    ) -> Result<TrainingReport>
    where
        M: UnsupervisedMiniBatchUpdate + ?Sized,
    {
        check_unlabelled(input)?;
        Ok(self.run(
            model,
            input.nrows(),
            self.option.mini_batch_size,
            |model, epoch, m, rows| {
                model.unsupervised_mini_batch_update(
                    input.slice(ndarray::s![rows, ..]),
                    epoch,
                    m,
                )
            },
            |model| model.unsupervised_objective(input),
        ))
    }

    fn run<M, U, O>(
        &self,
        model: &mut M,
        num_examples: usize,
        batch_size: usize,
        mut update: U,
        mut objective: O,
    ) -> TrainingReport
    where
        M: ?Sized,
        U: FnMut(&mut M, usize, usize, Range<usize>),
        O: FnMut(&mut M) -> f64,
    {
        let num_mini_batches = num_examples / batch_size;
        let mut report = TrainingReport {
            epochs: self.option.epochs,
            mini_batches_per_epoch: num_mini_batches,
            objectives: Vec::new(),
        };
        debug!(
            epochs = self.option.epochs,
            batch_size,
            num_mini_batches,
            "starting training"
        );

        let start_time = Instant::now();
        for epoch in 0..self.option.epochs {
            for m in 0..num_mini_batches {
                update(model, epoch, m, m * batch_size..(m + 1) * batch_size);
            }
            if self.option.monitoring {
                let value = objective(model);
                info!(epoch, objective = value, "finished epoch");
                report.objectives.push(value);
            }
        }
        info!(
            epochs = self.option.epochs,
            seconds = start_time.elapsed().as_secs_f64(),
            "training completed"
        );
        report
    }
}

fn check_unlabelled(input: ArrayView2<f64>) -> Result<()> {
    if input.nrows() == 0 {
        return Err(Error::config("training data must not be empty"));
    }
    Ok(())
}

fn check_labelled(
    input: ArrayView2<f64>,
    target: ArrayView2<f64>,
) -> Result<()> {
    check_unlabelled(input)?;
    if input.nrows() != target.nrows() {
        return Err(Error::config(format!(
            "{} inputs but {} targets",
            input.nrows(),
            target.nrows()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// Records every call made by the trainer.
    #[derive(Default)]
    struct Recorder {
        batches: Vec<(usize, usize, Vec<f64>)>,
        objective_calls: usize,
    }

    impl SupervisedObjective for Recorder {
        fn supervised_objective(
            &mut self,
            _: ArrayView2<f64>,
            _: ArrayView2<f64>,
        ) -> f64 {
            self.objective_calls += 1;
            self.objective_calls as f64
        }
    }

    impl SupervisedOnlineUpdate for Recorder {
        fn supervised_online_update(
            &mut self,
            input: ArrayView1<f64>,
            target: ArrayView1<f64>,
        ) {
            assert_eq!(input[0], target[0]);
            self.batches.push((0, 0, input.to_vec()));
        }
    }

    impl SupervisedMiniBatchUpdate for Recorder {
        fn supervised_mini_batch_update(
            &mut self,
            input: ArrayView2<f64>,
            target: ArrayView2<f64>,
        ) {
            assert_eq!(input, target);
            self.batches.push((0, 0, input.column(0).to_vec()));
        }
    }

    impl UnsupervisedObjective for Recorder {
        fn unsupervised_objective(&mut self, _: ArrayView2<f64>) -> f64 {
            self.objective_calls += 1;
            0.0
        }
    }

    impl UnsupervisedOnlineUpdate for Recorder {
        fn unsupervised_online_update(&mut self, input: ArrayView1<f64>) {
            self.batches.push((0, 0, input.to_vec()));
        }
    }

    impl UnsupervisedMiniBatchUpdate for Recorder {
        fn unsupervised_mini_batch_update(
            &mut self,
            batch: ArrayView2<f64>,
            epoch: usize,
            mini_batch_index: usize,
        ) {
            self.batches
                .push((epoch, mini_batch_index, batch.column(0).to_vec()));
        }
    }

    /// A single-column dataset whose values are the row indices.
    fn indexed(rows: usize) -> Array2<f64> {
        Array2::from_shape_fn((rows, 1), |(i, _)| i as f64)
    }

    fn base(epochs: usize, mini_batch_size: usize) -> BaseTrainingOption {
        BaseTrainingOption {
            epochs,
            mini_batch_size,
            monitoring: false,
        }
    }

    #[test]
    fn zero_epochs() {
        assert!(matches!(Trainer::new(base(0, 1)), Err(Error::Config(_))));
    }

    #[test]
    fn zero_mini_batch_size() {
        assert!(matches!(Trainer::new(base(1, 0)), Err(Error::Config(_))));
    }

    #[test]
    fn drops_trailing_remainder() {
        let data = indexed(10);
        let mut model = Recorder::default();
        let report = Trainer::new(base(2, 3))
            .unwrap()
            .unsupervised_mini_batch_train(&mut model, data.view())
            .unwrap();

        assert_eq!(report.mini_batches_per_epoch, 3);
        assert!(report.objectives.is_empty());
        let expected: Vec<(usize, usize, Vec<f64>)> = (0..2)
            .flat_map(|epoch| {
                (0..3).map(move |m| {
                    let start = (m * 3) as f64;
                    (epoch, m, vec![start, start + 1.0, start + 2.0])
                })
            })
            .collect();
        assert_eq!(model.batches, expected);
        assert_eq!(model.objective_calls, 0);
    }

    #[test]
    fn batch_larger_than_dataset_trains_nothing() {
        let data = indexed(4);
        let mut model = Recorder::default();
        let report = Trainer::new(base(3, 5))
            .unwrap()
            .supervised_mini_batch_train(&mut model, data.view(), data.view())
            .unwrap();
        assert_eq!(report.mini_batches_per_epoch, 0);
        assert!(model.batches.is_empty());
    }

    #[test]
    fn supervised_mini_batches_keep_rows_aligned() {
        let data = indexed(6);
        let mut model = Recorder::default();
        Trainer::new(base(1, 2))
            .unwrap()
            .supervised_mini_batch_train(&mut model, data.view(), data.view())
            .unwrap();
        let firsts: Vec<f64> = model.batches.iter().map(|b| b.2[0]).collect();
        assert_eq!(firsts, vec![0.0, 2.0, 4.0]);
    }

    #[test]
    fn online_modes_visit_every_example() {
        let data = indexed(5);
        let mut model = Recorder::default();
        let trainer = Trainer::new(base(2, 4)).unwrap();
        trainer
            .supervised_online_train(&mut model, data.view(), data.view())
            .unwrap();
        trainer
            .unsupervised_online_train(&mut model, data.view())
            .unwrap();
        assert_eq!(model.batches.len(), 20);
        let order: Vec<f64> =
            model.batches[..5].iter().map(|b| b.2[0]).collect();
        assert_eq!(order, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn monitoring_evaluates_once_per_epoch() {
        let data = indexed(4);
        let mut model = Recorder::default();
        let option = BaseTrainingOption {
            epochs: 3,
            mini_batch_size: 2,
            monitoring: true,
        };
        let report = Trainer::new(option)
            .unwrap()
            .supervised_mini_batch_train(&mut model, data.view(), data.view())
            .unwrap();
        assert_eq!(model.objective_calls, 3);
        assert_eq!(report.objectives, vec![1.0, 2.0, 3.0]);
        assert_eq!(model.batches.len(), 6);
    }

    #[test]
    fn mismatched_targets() {
        let mut model = Recorder::default();
        let result = Trainer::new(base(1, 1)).unwrap().supervised_online_train(
            &mut model,
            indexed(3).view(),
            indexed(2).view(),
        );
        assert!(matches!(result, Err(Error::Config(_))));
        assert!(model.batches.is_empty());
    }

    #[test]
    fn empty_dataset() {
        let mut model = Recorder::default();
        let result = Trainer::new(base(1, 1))
            .unwrap()
            .unsupervised_online_train(&mut model, indexed(0).view());
        assert!(result.is_err());
    }
}
