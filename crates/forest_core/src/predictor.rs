//! Inference seam shared by the reference evaluator and native artifacts

use crate::errors::Result;

/// Anything that maps one feature vector to one regression output
pub trait Predictor {
    /// Width every feature vector must have
    fn num_features(&self) -> usize;

    /// Predict a single row
    fn predict(&self, features: &[f64]) -> Result<f64>;
}

impl<P: Predictor + ?Sized> Predictor for &P {
    fn num_features(&self) -> usize {
        (**self).num_features()
    }

    fn predict(&self, features: &[f64]) -> Result<f64> {
        (**self).predict(features)
    }
}
