//! Before/after comparison pipeline.
//!
//! `Idle → FacesLocalized → FeaturesExtracted → Scaled → Classified → Done`.
//! Any step can fail; the failure records the last stage that completed and
//! nothing after it runs. There are no retries.

use crate::artifacts::ComparisonContext;
use crate::comparator::{self, LengthMismatch};
use crate::descriptor;
use crate::detector::{DetectorError, FaceDetect};
use crate::localizer::{self, LocalizeError};
use crate::types::{Decision, FaceCrop, RasterError, RawImage, Side};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Progress markers of one comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    FacesLocalized,
    FeaturesExtracted,
    Scaled,
    Classified,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::FacesLocalized => "faces-localized",
            Stage::FeaturesExtracted => "features-extracted",
            Stage::Scaled => "scaled",
            Stage::Classified => "classified",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Coarse failure category, stable across error variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ModelsUnavailable,
    NoFaceDetected,
    MalformedImage,
    FeatureLengthMismatch,
    /// The detector itself failed (inference error), not a user input problem.
    DetectionFailed,
}

#[derive(Error, Debug)]
pub enum CompareError {
    #[error("models unavailable: {0}")]
    ModelsUnavailable(String),
    #[error("no face detected in {side} image")]
    NoFaceDetected { side: Side },
    #[error("malformed {side} image: {reason}")]
    MalformedImage { side: Side, reason: String },
    #[error("feature length mismatch: {0}")]
    FeatureLengthMismatch(#[from] LengthMismatch),
    #[error("face detection failed on {side} image: {source}")]
    Detection {
        side: Side,
        #[source]
        source: DetectorError,
    },
}

impl CompareError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompareError::ModelsUnavailable(_) => ErrorKind::ModelsUnavailable,
            CompareError::NoFaceDetected { .. } => ErrorKind::NoFaceDetected,
            CompareError::MalformedImage { .. } => ErrorKind::MalformedImage,
            CompareError::FeatureLengthMismatch(_) => ErrorKind::FeatureLengthMismatch,
            CompareError::Detection { .. } => ErrorKind::DetectionFailed,
        }
    }

    /// Which image caused the failure, when it is specific to one.
    pub fn side(&self) -> Option<Side> {
        match self {
            CompareError::NoFaceDetected { side }
            | CompareError::MalformedImage { side, .. }
            | CompareError::Detection { side, .. } => Some(*side),
            _ => None,
        }
    }

    /// Tag a side-less raster failure with the image it came from.
    pub fn malformed(side: Side, err: RasterError) -> Self {
        CompareError::MalformedImage { side, reason: err.to_string() }
    }

    fn localize(side: Side, err: LocalizeError) -> Self {
        match err {
            LocalizeError::NoFaceDetected => CompareError::NoFaceDetected { side },
            LocalizeError::Detector(source) => CompareError::Detection { side, source },
            LocalizeError::Raster(e) => CompareError::malformed(side, e),
        }
    }
}

/// Terminal failure of one comparison.
#[derive(Error, Debug)]
#[error("comparison failed after stage {completed}: {error}")]
pub struct Failed {
    /// Last stage that completed before the failure.
    pub completed: Stage,
    #[source]
    pub error: CompareError,
}

impl Failed {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

/// Successful comparison: the decision plus both normalized crops.
#[derive(Debug, Clone)]
pub struct Comparison {
    pub decision: Decision,
    pub before: FaceCrop,
    pub after: FaceCrop,
}

/// One detector plus the shared artifacts.
///
/// The detector is owned (inference needs `&mut`); the context is shared
/// read-only with every other pipeline in the process.
pub struct Pipeline<D: FaceDetect> {
    detector: D,
    context: Option<Arc<ComparisonContext>>,
}

impl<D: FaceDetect> Pipeline<D> {
    pub fn new(detector: D, context: Arc<ComparisonContext>) -> Self {
        Self { detector, context: Some(context) }
    }

    /// A pipeline whose artifacts failed to load. Every comparison fails
    /// with `ModelsUnavailable` before touching the images.
    pub fn without_models(detector: D) -> Self {
        Self { detector, context: None }
    }

    pub fn context(&self) -> Option<&Arc<ComparisonContext>> {
        self.context.as_ref()
    }

    /// Localize a single image, for diagnostics.
    pub fn localize(&mut self, side: Side, image: &RawImage) -> Result<FaceCrop, CompareError> {
        localizer::localize(&mut self.detector, image).map_err(|e| CompareError::localize(side, e))
    }

    /// Decide whether `before` and `after` show the same person.
    pub fn compare(&mut self, before: &RawImage, after: &RawImage) -> Result<Comparison, Failed> {
        let mut stage = Stage::Idle;
        let fail = |completed: Stage, error: CompareError| {
            tracing::warn!(stage = %completed, kind = ?error.kind(), error = %error, "comparison failed");
            Failed { completed, error }
        };

        let context = match &self.context {
            Some(ctx) => Arc::clone(ctx),
            None => {
                return Err(fail(
                    stage,
                    CompareError::ModelsUnavailable("classifier and scaler are not loaded".into()),
                ))
            }
        };

        let before_face = self.localize(Side::Before, before).map_err(|e| fail(stage, e))?;
        let after_face = self.localize(Side::After, after).map_err(|e| fail(stage, e))?;
        stage = Stage::FacesLocalized;
        tracing::debug!(%stage, "both faces localized");

        let before_desc = descriptor::extract(&before_face);
        let after_desc = descriptor::extract(&after_face);
        let diff = comparator::difference(&before_desc, &after_desc).map_err(|e| fail(stage, e.into()))?;
        stage = Stage::FeaturesExtracted;
        tracing::debug!(%stage, features = diff.len(), "difference vector built");

        let scaled = context.scaler().transform(&diff).map_err(|e| fail(stage, e.into()))?;
        stage = Stage::Scaled;
        tracing::debug!(%stage, "features scaled");

        let decision = context.classifier().predict(&scaled).map_err(|e| fail(stage, e.into()))?;
        stage = Stage::Classified;
        tracing::debug!(%stage, "classifier evaluated");

        stage = Stage::Done;
        tracing::info!(
            %stage,
            same_person = decision.same_person,
            confidence = decision.confidence,
            "comparison complete"
        );

        Ok(Comparison {
            decision,
            before: before_face,
            after: after_face,
        })
    }
}
