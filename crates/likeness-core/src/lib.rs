//! likeness-core: same-person decision for a pair of face photographs.
//!
//! SCRFD (via ONNX Runtime) localizes one face per image; each face is
//! described by a uniform-LBP histogram and a HOG vector, the two
//! descriptors are differenced, standardized and handed to a pre-trained
//! classifier.

pub mod artifacts;
pub mod classifier;
pub mod comparator;
pub mod descriptor;
pub mod detector;
pub mod localizer;
pub mod pipeline;
pub mod resize;
pub mod scaler;
pub mod types;

use std::path::PathBuf;

pub use artifacts::{ArtifactError, ArtifactPaths, ComparisonContext};
pub use classifier::{Classifier, ClassifierModel};
pub use detector::{FaceDetect, FaceDetector};
pub use pipeline::{CompareError, Comparison, ErrorKind, Failed, Pipeline, Stage};
pub use scaler::StandardScaler;
pub use types::{BoundingBox, Decision, DescriptorPair, FaceCrop, RawImage, Side};

/// Default artifact directory: `$XDG_DATA_HOME/likeness/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("likeness")
        .join("models")
}
