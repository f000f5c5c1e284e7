//! Loaders for benchmark datasets.

pub mod mnist;
