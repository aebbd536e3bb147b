//! Reference fixtures: held-out feature vectors with the trained model's
//! predictions, used only to verify generated artifacts.
//!
//! File format: `{ "X": [[f1, .., fn], ..], "y_pred": [v1, ..] }`.

use crate::errors::{ForestError, Result};
use crate::predictor::Predictor;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct FixtureDocument {
    #[serde(rename = "X")]
    x: Vec<Vec<f64>>,
    y_pred: Vec<f64>,
}

#[derive(Serialize)]
struct FixtureDocumentRef<'a> {
    #[serde(rename = "X")]
    x: &'a [Vec<f64>],
    y_pred: &'a [f64],
}

/// Immutable set of `(features, expected prediction)` pairs
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceFixture {
    features: Vec<Vec<f64>>,
    predictions: Vec<f64>,
}

impl ReferenceFixture {
    /// Build a fixture, rejecting unpaired or ragged data.
    ///
    /// `FixtureMismatch` is returned exactly when the two lengths differ.
    pub fn new(features: Vec<Vec<f64>>, predictions: Vec<f64>) -> Result<Self> {
        if features.len() != predictions.len() {
            return Err(ForestError::FixtureMismatch {
                features: features.len(),
                predictions: predictions.len(),
            });
        }

        if let Some(first) = features.first() {
            let width = first.len();
            if let Some((row, found)) = features
                .iter()
                .map(Vec::len)
                .enumerate()
                .find(|&(_, len)| len != width)
            {
                return Err(ForestError::FeatureWidth {
                    row,
                    expected: width,
                    found,
                });
            }
        }

        Ok(Self {
            features,
            predictions,
        })
    }

    /// Record a fixture by running `predictor` over `rows`
    pub fn capture<P: Predictor + ?Sized>(predictor: &P, rows: Vec<Vec<f64>>) -> Result<Self> {
        let predictions = rows
            .iter()
            .map(|row| predictor.predict(row))
            .collect::<Result<Vec<_>>>()?;
        Self::new(rows, predictions)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let doc: FixtureDocument = serde_json::from_str(json)?;
        Self::new(doc.x, doc.y_pred)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&FixtureDocumentRef {
            x: &self.features,
            y_pred: &self.predictions,
        })?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let fixture = Self::from_json(&fs::read_to_string(path)?)?;
        debug!(
            "Loaded fixture {} with {} pairs of width {}",
            path.display(),
            fixture.len(),
            fixture.width().unwrap_or(0)
        );
        Ok(fixture)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }

    /// Feature vector width, `None` for an empty fixture
    pub fn width(&self) -> Option<usize> {
        self.features.first().map(Vec::len)
    }

    pub fn features(&self, index: usize) -> &[f64] {
        &self.features[index]
    }

    pub fn expected(&self, index: usize) -> f64 {
        self.predictions[index]
    }

    /// Positional pairs
    pub fn pairs(&self) -> impl Iterator<Item = (&[f64], f64)> {
        self.features
            .iter()
            .map(Vec::as_slice)
            .zip(self.predictions.iter().copied())
    }

    /// Indices of a uniform random sample without replacement, ascending.
    ///
    /// The whole fixture is returned when `size` is `None` or not smaller than
    /// the fixture. The same `seed` always selects the same rows.
    pub fn sample_indices(&self, size: Option<usize>, seed: u64) -> Vec<usize> {
        let len = self.len();
        match size {
            Some(size) if size < len => {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut indices = rand::seq::index::sample(&mut rng, len, size).into_vec();
                indices.sort_unstable();
                indices
            }
            _ => (0..len).collect(),
        }
    }
}
