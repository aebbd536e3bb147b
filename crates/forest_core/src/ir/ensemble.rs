//! Tree ensemble with metadata and reference inference
//!
//! The reference evaluator here is the ground truth the generated native code
//! is checked against: same comparisons, same summation order within a tree
//! walk, same aggregation arithmetic.

use super::tree::Tree;
use crate::errors::{ForestError, Result};
use crate::predictor::Predictor;
use serde::{Deserialize, Serialize};

/// How per-tree outputs are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Sum,
    Mean,
}

impl Aggregation {
    /// Combine the sum of tree outputs into the ensemble output (before base score)
    #[inline]
    pub fn finish(self, sum: f64, num_trees: usize) -> f64 {
        match self {
            Aggregation::Sum => sum,
            Aggregation::Mean => sum / num_trees as f64,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Aggregation::Sum => "sum",
            Aggregation::Mean => "mean",
        }
    }
}

/// Learning task of the ensemble; only regression is represented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    #[default]
    Regression,
}

/// Semantic type of one input feature slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeatureType {
    Numerical,
    /// Slot holds an integer code in `[0, cardinality)`
    Categorical { cardinality: u32 },
}

/// A forest of decision trees plus the metadata needed to evaluate it
#[derive(Debug, Clone, PartialEq)]
pub struct TreeEnsembleIR {
    /// Length of every feature vector
    pub num_features: u32,

    /// Combination of per-tree outputs
    pub aggregation: Aggregation,

    pub task: TaskType,

    /// Constant added after aggregation
    pub base_score: f64,

    /// One entry per feature slot
    pub feature_types: Vec<FeatureType>,

    /// Trees in evaluation order
    pub trees: Vec<Tree>,
}

impl TreeEnsembleIR {
    /// Create a regression ensemble over numerical features
    pub fn new(num_features: u32, aggregation: Aggregation, trees: Vec<Tree>) -> Self {
        Self {
            num_features,
            aggregation,
            task: TaskType::Regression,
            base_score: 0.0,
            feature_types: vec![FeatureType::Numerical; num_features as usize],
            trees,
        }
    }

    pub fn with_feature_types(mut self, feature_types: Vec<FeatureType>) -> Self {
        self.feature_types = feature_types;
        self
    }

    pub fn with_base_score(mut self, base_score: f64) -> Self {
        self.base_score = base_score;
        self
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Validate metadata and every tree
    pub fn validate(&self) -> Result<()> {
        if self.feature_types.len() != self.num_features as usize {
            return Err(ForestError::malformed(
                "feature_types",
                format!(
                    "{} feature types declared for {} features",
                    self.feature_types.len(),
                    self.num_features
                ),
            ));
        }

        if self.trees.is_empty() {
            return Err(ForestError::malformed("trees", "ensemble has no trees"));
        }

        if !self.base_score.is_finite() {
            return Err(ForestError::malformed("base_score", "base score is not finite"));
        }

        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(i, &self.feature_types)?;
        }

        Ok(())
    }

    /// Reference inference: walk every tree and aggregate
    pub fn evaluate(&self, features: &[f64]) -> f64 {
        let sum: f64 = self
            .trees
            .iter()
            .fold(0.0, |acc, tree| acc + tree.evaluate(features));
        self.aggregation.finish(sum, self.trees.len()) + self.base_score
    }
}

impl Predictor for TreeEnsembleIR {
    fn num_features(&self) -> usize {
        self.num_features as usize
    }

    fn predict(&self, features: &[f64]) -> Result<f64> {
        if features.len() != self.num_features as usize {
            return Err(ForestError::FeatureWidth {
                row: 0,
                expected: self.num_features as usize,
                found: features.len(),
            });
        }
        Ok(self.evaluate(features))
    }
}
