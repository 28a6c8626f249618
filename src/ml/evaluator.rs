use super::tree::{Tree, TreeNode};

/// Walk one tree for an ordered feature buffer and return the leaf value.
///
/// NaN (or a slot past the end of the buffer) counts as a missing value and
/// follows the split's missing direction. Children always sit after their
/// parent in the arena, so the walk terminates.
pub fn evaluate_tree(tree: &Tree, features: &[f64]) -> f64 {
    let mut index = 0;
    loop {
        match tree.node(index) {
            TreeNode::Leaf(leaf) => return leaf.value,
            TreeNode::Split(split) => {
                let value = features.get(split.feature_index).copied().unwrap_or(f64::NAN);
                index = split.next(value);
            }
        }
    }
}
