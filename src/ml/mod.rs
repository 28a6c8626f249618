pub mod features;
pub mod dump;
pub mod tree;
pub mod evaluator;
pub mod ensemble;
pub mod loader;

#[cfg(test)]
pub(crate) mod test_support;

pub use features::{FeatureMap, FeatureMapError};
pub use dump::{split_model_dump, Comparator, DumpError, DumpParser, MissingDefault, NodeGraph, NodeId, ParseOptions, RawKind, RawNode, RawSplit};
pub use tree::{BuildError, BuildOutcome, LeafNode, NodeIndex, SplitNode, Tree, TreeBuilder, TreeNode};
pub use evaluator::evaluate_tree;
pub use ensemble::{Ensemble, EvalError, LoadOptions, LoadedEnsemble, ModelError, Prediction, SignalPredictor, Transform, UnsupportedTransform};
