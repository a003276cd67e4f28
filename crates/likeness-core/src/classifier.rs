//! Pre-trained same-person classifiers.
//!
//! Models arrive as JSON artifacts tagged by `"kind"`. Only inference is
//! implemented; fitting happens elsewhere.

use crate::artifacts::{self, ArtifactError};
use crate::comparator::LengthMismatch;
use crate::types::Decision;
use serde::{Deserialize, Serialize};
use std::path::Path;

const DEFAULT_THRESHOLD: f64 = 0.5;
/// Child index marking a leaf node.
const TREE_LEAF: i64 = -1;

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

/// Binary same-person model over a scaled difference vector.
pub trait Classifier: Send + Sync {
    /// Short model identifier, e.g. `"random_forest"`.
    fn kind(&self) -> &'static str;

    fn n_features(&self) -> usize;

    /// Decision threshold on the same-person probability, fixed by training.
    fn threshold(&self) -> f64;

    /// Probability of the same-person class. `x` has `n_features()` entries.
    fn predict_proba(&self, x: &[f64]) -> f64;

    fn predict(&self, x: &[f64]) -> Result<Decision, LengthMismatch> {
        if x.len() != self.n_features() {
            return Err(LengthMismatch {
                what: "classifier input",
                expected: self.n_features(),
                actual: x.len(),
            });
        }
        let confidence = self.predict_proba(x).clamp(0.0, 1.0);
        Ok(Decision {
            same_person: confidence >= self.threshold(),
            confidence,
        })
    }
}

/// One fitted decision tree in flat node-array form.
///
/// Node `i` is a leaf when `children_left[i] == -1`; otherwise samples with
/// `x[feature[i]] <= threshold[i]` go left. `value[i]` holds the class
/// weights `[different, same]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    pub children_left: Vec<i64>,
    pub children_right: Vec<i64>,
    pub feature: Vec<i64>,
    pub threshold: Vec<f64>,
    pub value: Vec<[f64; 2]>,
}

impl DecisionTree {
    fn validate(&self, n_features: usize) -> Result<(), String> {
        let n = self.children_left.len();
        if n == 0 {
            return Err("tree has no nodes".into());
        }
        if [self.children_right.len(), self.feature.len(), self.threshold.len(), self.value.len()]
            .iter()
            .any(|&len| len != n)
        {
            return Err("node arrays differ in length".into());
        }

        for node in 0..n {
            let (left, right) = (self.children_left[node], self.children_right[node]);
            if left == TREE_LEAF {
                if right != TREE_LEAF {
                    return Err(format!("node {node} has only one child"));
                }
                let [different, same] = self.value[node];
                if !(different >= 0.0 && same >= 0.0 && different + same > 0.0) {
                    return Err(format!("leaf {node} has no class weight"));
                }
                continue;
            }
            // Children always follow their parent, which also rules out cycles.
            for child in [left, right] {
                if child <= node as i64 || child >= n as i64 {
                    return Err(format!("node {node} points at invalid child {child}"));
                }
            }
            let feature = self.feature[node];
            if feature < 0 || feature as usize >= n_features {
                return Err(format!("node {node} splits on feature {feature} of {n_features}"));
            }
            if !self.threshold[node].is_finite() {
                return Err(format!("node {node} has a non-finite threshold"));
            }
        }
        Ok(())
    }

    /// Same-person fraction of the leaf `x` falls into.
    fn leaf_proba(&self, x: &[f64]) -> f64 {
        let mut node = 0usize;
        while self.children_left[node] != TREE_LEAF {
            let feature = self.feature[node] as usize;
            // Trees are fitted on single-precision inputs.
            let v = x[feature] as f32 as f64;
            node = if v <= self.threshold[node] {
                self.children_left[node] as usize
            } else {
                self.children_right[node] as usize
            };
        }
        let [different, same] = self.value[node];
        same / (different + same)
    }
}

/// Bagged decision trees; probability is the mean of the trees' leaf fractions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    pub n_features: usize,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    pub trees: Vec<DecisionTree>,
}

impl Classifier for RandomForest {
    fn kind(&self) -> &'static str {
        "random_forest"
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }

    fn predict_proba(&self, x: &[f64]) -> f64 {
        let total: f64 = self.trees.iter().map(|tree| tree.leaf_proba(x)).sum();
        total / self.trees.len() as f64
    }
}

/// Linear model with a logistic link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub coef: Vec<f64>,
    pub intercept: f64,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl Classifier for LogisticRegression {
    fn kind(&self) -> &'static str {
        "logistic_regression"
    }

    fn n_features(&self) -> usize {
        self.coef.len()
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }

    fn predict_proba(&self, x: &[f64]) -> f64 {
        let z: f64 = self.coef.iter().zip(x).map(|(w, v)| w * v).sum::<f64>() + self.intercept;
        1.0 / (1.0 + (-z).exp())
    }
}

/// Classifier artifact as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifierModel {
    RandomForest(RandomForest),
    LogisticRegression(LogisticRegression),
}

impl ClassifierModel {
    /// Load and validate a classifier artifact.
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let model: ClassifierModel = artifacts::read_json(path)?;
        model.validate()?;
        tracing::info!(
            path = %path.display(),
            kind = model.kind(),
            features = model.n_features(),
            threshold = model.threshold(),
            "loaded classifier"
        );
        Ok(model)
    }

    pub fn validate(&self) -> Result<(), ArtifactError> {
        let threshold = self.threshold();
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ArtifactError::invalid("classifier", format!("threshold {threshold} outside [0, 1]")));
        }
        match self {
            ClassifierModel::RandomForest(forest) => {
                if forest.n_features == 0 {
                    return Err(ArtifactError::invalid("classifier", "no features"));
                }
                if forest.trees.is_empty() {
                    return Err(ArtifactError::invalid("classifier", "forest has no trees"));
                }
                for (i, tree) in forest.trees.iter().enumerate() {
                    tree.validate(forest.n_features)
                        .map_err(|reason| ArtifactError::invalid("classifier", format!("tree {i}: {reason}")))?;
                }
            }
            ClassifierModel::LogisticRegression(linear) => {
                if linear.coef.is_empty() {
                    return Err(ArtifactError::invalid("classifier", "no features"));
                }
                if !linear.intercept.is_finite() || linear.coef.iter().any(|w| !w.is_finite()) {
                    return Err(ArtifactError::invalid("classifier", "non-finite coefficient"));
                }
            }
        }
        Ok(())
    }

    fn inner(&self) -> &dyn Classifier {
        match self {
            ClassifierModel::RandomForest(m) => m,
            ClassifierModel::LogisticRegression(m) => m,
        }
    }
}

impl Classifier for ClassifierModel {
    fn kind(&self) -> &'static str {
        self.inner().kind()
    }

    fn n_features(&self) -> usize {
        self.inner().n_features()
    }

    fn threshold(&self) -> f64 {
        self.inner().threshold()
    }

    fn predict_proba(&self, x: &[f64]) -> f64 {
        self.inner().predict_proba(x)
    }
}
