use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use crate::ml::dump::{DumpError, DumpParser, NodeId, ParseOptions};
use crate::ml::evaluator::evaluate_tree;
use crate::ml::features::{FeatureMap, FeatureMapError};
use crate::ml::tree::{BuildError, Tree, TreeBuilder, TreeNode};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported output transform '{0}'")]
pub struct UnsupportedTransform(pub String);

#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Features(#[from] FeatureMapError),
    #[error("tree {tree}: {source}")]
    Dump {
        tree: usize,
        #[source]
        source: DumpError,
    },
    #[error("tree {tree}: {source}")]
    Build {
        tree: usize,
        #[source]
        source: BuildError,
    },
    #[error("base_score {0} must lie strictly between 0 and 1 for a logistic model")]
    InvalidBaseScore(f64),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("expected {expected} features, got {actual}")]
    FeatureCount { expected: usize, actual: usize },
}

/// Maps the summed margin to the model output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    Identity,
    #[default]
    Logistic,
}

impl Transform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transform::Identity => "identity",
            Transform::Logistic => "logistic",
        }
    }

    pub fn apply(&self, margin: f64) -> f64 {
        match self {
            Transform::Identity => margin,
            Transform::Logistic => sigmoid(margin),
        }
    }

    /// Converts a probability-space base score to a margin-space bias
    pub fn base_score_to_bias(&self, base_score: f64) -> Result<f64, ModelError> {
        match self {
            Transform::Identity => Ok(base_score),
            Transform::Logistic => {
                if !(base_score > 0.0 && base_score < 1.0) {
                    return Err(ModelError::InvalidBaseScore(base_score));
                }
                Ok((base_score / (1.0 - base_score)).ln())
            }
        }
    }
}

impl FromStr for Transform {
    type Err = UnsupportedTransform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "identity" | "binary:logitraw" | "reg:squarederror" | "reg:linear" => Ok(Transform::Identity),
            "logistic" | "binary:logistic" | "reg:logistic" => Ok(Transform::Logistic),
            other => Err(UnsupportedTransform(other.to_string())),
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How to turn dumps into an [`Ensemble`]
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub parse: ParseOptions,
    pub bias: f64,
    pub transform: Transform,
}

/// An ensemble plus the raw nodes each tree dropped as unreachable
#[derive(Debug, Clone)]
pub struct LoadedEnsemble {
    pub ensemble: Ensemble,
    pub unreachable: Vec<(usize, Vec<NodeId>)>,
}

/// Ordered trees, their feature map, bias and output transform.
/// Read-only after construction and safe to share across threads.
#[derive(Debug, Clone)]
pub struct Ensemble {
    trees: Vec<Tree>,
    feature_map: FeatureMap,
    bias: f64,
    transform: Transform,
}

impl Ensemble {
    /// Parse and build every tree dump in order.
    pub fn from_dumps<S: AsRef<str>>(
        dumps: &[S],
        feature_map: FeatureMap,
        options: &LoadOptions,
    ) -> Result<Self, ModelError> {
        Self::load(dumps, feature_map, options).map(|loaded| loaded.ensemble)
    }

    pub fn load<S: AsRef<str>>(
        dumps: &[S],
        feature_map: FeatureMap,
        options: &LoadOptions,
    ) -> Result<LoadedEnsemble, ModelError> {
        let parser = DumpParser::new(&feature_map, options.parse.clone());
        let mut trees = Vec::with_capacity(dumps.len());
        let mut unreachable = Vec::new();

        for (tree, dump) in dumps.iter().enumerate() {
            let graph = parser
                .parse(dump.as_ref())
                .map_err(|source| ModelError::Dump { tree, source })?;
            let outcome =
                TreeBuilder::build(&graph, tree).map_err(|source| ModelError::Build { tree, source })?;
            debug!(
                "Tree {}: {} nodes, depth {}",
                tree,
                outcome.tree.len(),
                outcome.tree.depth()
            );
            if !outcome.unreachable.is_empty() {
                unreachable.push((tree, outcome.unreachable));
            }
            trees.push(outcome.tree);
        }

        info!(
            "Ensemble built: {} trees, {} features, bias={}, transform={}",
            trees.len(),
            feature_map.len(),
            options.bias,
            options.transform
        );

        Ok(LoadedEnsemble {
            ensemble: Self {
                trees,
                feature_map,
                bias: options.bias,
                transform: options.transform,
            },
            unreachable,
        })
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    pub fn feature_map(&self) -> &FeatureMap {
        &self.feature_map
    }

    pub fn bias(&self) -> f64 {
        self.bias
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    fn check_len(&self, actual: usize) -> Result<(), EvalError> {
        let expected = self.feature_map.len();
        if actual != expected {
            return Err(EvalError::FeatureCount { expected, actual });
        }
        Ok(())
    }

    /// Sum of tree outputs in ensemble order, then the bias
    pub fn predict_margin(&self, features: &[f64]) -> Result<f64, EvalError> {
        self.check_len(features.len())?;
        let mut sum = 0.0;
        for tree in &self.trees {
            sum += evaluate_tree(tree, features);
        }
        sum += self.bias;
        Ok(sum)
    }

    /// Margin mapped through the output transform
    pub fn predict(&self, features: &[f64]) -> Result<f64, EvalError> {
        Ok(self.transform.apply(self.predict_margin(features)?))
    }

    /// One output per row; columns follow the feature map
    pub fn predict_batch(&self, rows: &Array2<f64>) -> Result<Array1<f64>, EvalError> {
        self.check_len(rows.ncols())?;
        let mut out = Array1::zeros(rows.nrows());
        for (i, row) in rows.outer_iter().enumerate() {
            let features: Vec<f64> = row.iter().copied().collect();
            out[i] = self.predict(&features)?;
        }
        Ok(out)
    }

    /// SHA-256 over the built structure: feature names, bias, transform and
    /// every node in pre-order with exact float bits.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"xgb-signal/ensemble/v1");
        hasher.update((self.feature_map.len() as u64).to_le_bytes());
        for name in self.feature_map.names() {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(self.bias.to_bits().to_le_bytes());
        hasher.update(self.transform.as_str().as_bytes());
        hasher.update((self.trees.len() as u64).to_le_bytes());

        for tree in &self.trees {
            hasher.update((tree.len() as u64).to_le_bytes());
            for node in tree.nodes() {
                match node {
                    TreeNode::Split(split) => {
                        hasher.update([b'S', split.comparator as u8, split.missing_goes_left as u8]);
                        hasher.update((split.feature_index as u64).to_le_bytes());
                        hasher.update(split.threshold.to_bits().to_le_bytes());
                        hasher.update(split.left.to_le_bytes());
                        hasher.update(split.right.to_le_bytes());
                    }
                    TreeNode::Leaf(leaf) => {
                        hasher.update([b'L']);
                        hasher.update(leaf.value.to_bits().to_le_bytes());
                    }
                }
            }
        }

        hex::encode(hasher.finalize())
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}
