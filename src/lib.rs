//! Sigmoid feed-forward networks trained by backpropagation, restricted
//! Boltzmann machines trained by contrastive divergence, and deep belief
//! networks stacked from them.

pub mod dataset;
pub mod dbn;
pub mod error;
pub mod eval;
pub mod layer;
pub mod math;
pub mod mlp;
pub mod option;
pub mod persist;
pub mod rbm;
pub mod trainer;

pub use crate::error::{Error, Result};
