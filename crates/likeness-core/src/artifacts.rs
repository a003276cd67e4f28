//! Loading of the pre-trained artifacts and the shared comparison context.

use crate::classifier::{Classifier, ClassifierModel};
use crate::descriptor::FEATURE_LEN;
use crate::scaler::StandardScaler;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_DETECTOR_FILE: &str = "det_10g.onnx";
pub const DEFAULT_CLASSIFIER_FILE: &str = "model.json";
pub const DEFAULT_SCALER_FILE: &str = "scaler.json";

/// Where the detector, classifier and scaler live on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactPaths {
    pub model_dir: PathBuf,
    pub detector_file: String,
    pub classifier_file: String,
    pub scaler_file: String,
}

impl Default for ArtifactPaths {
    fn default() -> Self {
        Self {
            model_dir: crate::default_model_dir(),
            detector_file: DEFAULT_DETECTOR_FILE.to_string(),
            classifier_file: DEFAULT_CLASSIFIER_FILE.to_string(),
            scaler_file: DEFAULT_SCALER_FILE.to_string(),
        }
    }
}

impl ArtifactPaths {
    /// Defaults overridden by `LIKENESS_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Apply `LIKENESS_MODEL_DIR`, `LIKENESS_DETECTOR_FILE`,
    /// `LIKENESS_CLASSIFIER_FILE` and `LIKENESS_SCALER_FILE` on top of `self`.
    pub fn with_env(mut self) -> Self {
        if let Ok(dir) = std::env::var("LIKENESS_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Ok(file) = std::env::var("LIKENESS_DETECTOR_FILE") {
            self.detector_file = file;
        }
        if let Ok(file) = std::env::var("LIKENESS_CLASSIFIER_FILE") {
            self.classifier_file = file;
        }
        if let Ok(file) = std::env::var("LIKENESS_SCALER_FILE") {
            self.scaler_file = file;
        }
        self
    }

    /// Path to the SCRFD detection model.
    pub fn detector(&self) -> PathBuf {
        self.model_dir.join(&self.detector_file)
    }

    /// Path to the classifier artifact.
    pub fn classifier(&self) -> PathBuf {
        self.model_dir.join(&self.classifier_file)
    }

    /// Path to the scaler artifact.
    pub fn scaler(&self) -> PathBuf {
        self.model_dir.join(&self.scaler_file)
    }
}

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("artifact not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid {what}: {reason}")]
    Invalid { what: &'static str, reason: String },
}

impl ArtifactError {
    pub(crate) fn invalid(what: &'static str, reason: impl Into<String>) -> Self {
        ArtifactError::Invalid { what, reason: reason.into() }
    }
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ArtifactError> {
    if !path.exists() {
        return Err(ArtifactError::NotFound(path.to_path_buf()));
    }
    let bytes = std::fs::read(path).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| ArtifactError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Read-only scaler + classifier pair shared by every comparison.
///
/// Built once at startup and handed out behind an `Arc`; nothing mutates
/// it afterwards.
pub struct ComparisonContext {
    scaler: StandardScaler,
    classifier: Box<dyn Classifier>,
}

impl std::fmt::Debug for ComparisonContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComparisonContext")
            .field("scaler_features", &self.scaler.n_features())
            .field("classifier", &self.classifier.kind())
            .finish()
    }
}

impl ComparisonContext {
    /// Pair a scaler with a classifier, checking that their shapes agree with
    /// the descriptor layout.
    pub fn new(scaler: StandardScaler, classifier: Box<dyn Classifier>) -> Result<Self, ArtifactError> {
        if scaler.n_features() != classifier.n_features() {
            return Err(ArtifactError::invalid(
                "artifact pair",
                format!(
                    "scaler expects {} features, classifier expects {}",
                    scaler.n_features(),
                    classifier.n_features()
                ),
            ));
        }
        Ok(Self { scaler, classifier })
    }

    /// Like [`new`](Self::new), additionally requiring the face-pair feature length.
    pub fn for_face_pairs(scaler: StandardScaler, classifier: Box<dyn Classifier>) -> Result<Self, ArtifactError> {
        if scaler.n_features() != FEATURE_LEN {
            return Err(ArtifactError::invalid(
                "artifact pair",
                format!("expected {FEATURE_LEN} features, artifacts have {}", scaler.n_features()),
            ));
        }
        Self::new(scaler, classifier)
    }

    /// Load `model_path` and `scaler_path` from disk.
    pub fn load(model_path: &Path, scaler_path: &Path) -> Result<Self, ArtifactError> {
        let scaler = StandardScaler::load(scaler_path)?;
        let classifier = ClassifierModel::load(model_path)?;
        Self::for_face_pairs(scaler, Box::new(classifier))
    }

    pub fn load_from(paths: &ArtifactPaths) -> Result<Self, ArtifactError> {
        Self::load(&paths.classifier(), &paths.scaler())
    }

    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    pub fn classifier(&self) -> &dyn Classifier {
        self.classifier.as_ref()
    }
}
