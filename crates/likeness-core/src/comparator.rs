//! Pairwise descriptor difference.

use crate::types::DescriptorPair;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{what} length mismatch: expected {expected}, got {actual}")]
pub struct LengthMismatch {
    pub what: &'static str,
    pub expected: usize,
    pub actual: usize,
}

/// `|before - after|` of the texture histograms followed by `|before - after|`
/// of the gradient vectors.
pub fn difference(before: &DescriptorPair, after: &DescriptorPair) -> Result<Vec<f64>, LengthMismatch> {
    check("texture descriptor", before.texture.len(), after.texture.len())?;
    check("gradient descriptor", before.gradient.len(), after.gradient.len())?;

    let texture = before.texture.iter().zip(&after.texture);
    let gradient = before.gradient.iter().zip(&after.gradient);
    Ok(texture.chain(gradient).map(|(a, b)| (a - b).abs()).collect())
}

fn check(what: &'static str, expected: usize, actual: usize) -> Result<(), LengthMismatch> {
    if expected == actual {
        Ok(())
    } else {
        Err(LengthMismatch { what, expected, actual })
    }
}
