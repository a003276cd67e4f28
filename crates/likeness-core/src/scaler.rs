//! Pre-fitted per-feature standardization.

use crate::artifacts::{self, ArtifactError};
use crate::comparator::LengthMismatch;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// `(x - mean) / scale`, fitted at training time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    /// Validate and build a scaler. Zero scale entries (constant features
    /// during fitting) are replaced by 1.
    pub fn new(mean: Vec<f64>, scale: Vec<f64>) -> Result<Self, ArtifactError> {
        if mean.is_empty() {
            return Err(ArtifactError::invalid("scaler", "no features"));
        }
        if mean.len() != scale.len() {
            return Err(ArtifactError::invalid(
                "scaler",
                format!("mean has {} entries, scale has {}", mean.len(), scale.len()),
            ));
        }
        if let Some(i) = mean.iter().chain(&scale).position(|v| !v.is_finite()) {
            return Err(ArtifactError::invalid("scaler", format!("non-finite parameter at index {i}")));
        }
        let scale = scale.into_iter().map(|s| if s == 0.0 { 1.0 } else { s }).collect();
        Ok(Self { mean, scale })
    }

    /// Load a scaler from its JSON artifact: `{ "mean": [...], "scale": [...] }`.
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let raw: StandardScaler = artifacts::read_json(path)?;
        let scaler = Self::new(raw.mean, raw.scale)?;
        tracing::info!(path = %path.display(), features = scaler.n_features(), "loaded scaler");
        Ok(scaler)
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn scale(&self) -> &[f64] {
        &self.scale
    }

    pub fn transform(&self, x: &[f64]) -> Result<Vec<f64>, LengthMismatch> {
        if x.len() != self.n_features() {
            return Err(LengthMismatch {
                what: "scaler input",
                expected: self.n_features(),
                actual: x.len(),
            });
        }
        Ok(x.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| (v - m) / s)
            .collect())
    }
}
