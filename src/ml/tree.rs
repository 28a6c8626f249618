use std::collections::HashSet;

use thiserror::Error;
use tracing::warn;

use super::dump::{Comparator, NodeGraph, NodeId, RawKind};

/// Index of a node inside [`Tree::nodes`]
pub type NodeIndex = u32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("node {from} references undeclared node {target}")]
    DanglingReference { from: NodeId, target: NodeId },
    #[error("tree has no root node 0")]
    MissingRoot,
    #[error("node {node_id} is reached again from its own subtree")]
    CyclicTree { node_id: NodeId },
    #[error("node {node_id} is referenced again by node {parent} after it was already placed")]
    SharedNode { node_id: NodeId, parent: NodeId },
    #[error("node {node_id} routes missing values to {missing}, which is neither yes={yes} nor no={no}")]
    MissingTargetMismatch {
        node_id: NodeId,
        missing: NodeId,
        yes: NodeId,
        no: NodeId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitNode {
    pub feature_index: usize,
    pub threshold: f64,
    pub comparator: Comparator,
    /// Taken when the comparison holds ("yes")
    pub left: NodeIndex,
    /// Taken when it does not ("no")
    pub right: NodeIndex,
    pub missing_goes_left: bool,
}

impl SplitNode {
    /// Child for a feature value; NaN is a missing value
    pub fn next(&self, value: f64) -> NodeIndex {
        let go_left = if value.is_nan() {
            self.missing_goes_left
        } else {
            self.comparator.holds(value, self.threshold)
        };
        if go_left {
            self.left
        } else {
            self.right
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeafNode {
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TreeNode {
    Split(SplitNode),
    Leaf(LeafNode),
}

/// A built tree. Nodes live in pre-order (root at 0, left subtree before
/// right subtree) and every non-root node has exactly one parent.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    id: usize,
    nodes: Vec<TreeNode>,
}

impl Tree {
    /// Ordinal position in the ensemble
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn root(&self) -> &TreeNode {
        &self.nodes[0]
    }

    pub fn node(&self, index: NodeIndex) -> &TreeNode {
        &self.nodes[index as usize]
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, TreeNode::Leaf(_)))
            .count()
    }

    pub fn split_count(&self) -> usize {
        self.len() - self.leaf_count()
    }

    /// Number of splits on the longest root-to-leaf path
    pub fn depth(&self) -> usize {
        let mut max_depth = 0;
        let mut stack = vec![(0 as NodeIndex, 0usize)];
        while let Some((index, depth)) = stack.pop() {
            match self.node(index) {
                TreeNode::Leaf(_) => max_depth = max_depth.max(depth),
                TreeNode::Split(split) => {
                    stack.push((split.right, depth + 1));
                    stack.push((split.left, depth + 1));
                }
            }
        }
        max_depth
    }
}

/// A built tree plus the raw nodes that were never reached from the root
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub tree: Tree,
    pub unreachable: Vec<NodeId>,
}

enum Step {
    Enter {
        id: NodeId,
        parent: Option<(NodeIndex, bool)>,
        from: NodeId,
    },
    Exit(NodeId),
}

/// Resolves a [`NodeGraph`] into a [`Tree`] rooted at node 0.
///
/// Resolution walks an explicit stack, so tree depth is limited only by
/// memory. Nodes are pushed right before left, which keeps the arena in
/// pre-order. Every node is placed at most once, so the arena never holds
/// more nodes than the graph.
pub struct TreeBuilder;

impl TreeBuilder {
    pub fn build(graph: &NodeGraph, tree_id: usize) -> Result<BuildOutcome, BuildError> {
        if graph.get(0).is_none() {
            return Err(BuildError::MissingRoot);
        }

        let mut nodes: Vec<TreeNode> = Vec::with_capacity(graph.len());
        let mut on_path: HashSet<NodeId> = HashSet::new();
        let mut reached: HashSet<NodeId> = HashSet::new();
        let mut stack = vec![Step::Enter {
            id: 0,
            parent: None,
            from: 0,
        }];

        while let Some(step) = stack.pop() {
            let (id, parent, from) = match step {
                Step::Exit(id) => {
                    on_path.remove(&id);
                    continue;
                }
                Step::Enter { id, parent, from } => (id, parent, from),
            };

            if on_path.contains(&id) {
                return Err(BuildError::CyclicTree { node_id: id });
            }
            if !reached.insert(id) {
                return Err(BuildError::SharedNode {
                    node_id: id,
                    parent: from,
                });
            }
            let raw = graph
                .get(id)
                .ok_or(BuildError::DanglingReference { from, target: id })?;

            let index = nodes.len() as NodeIndex;
            if let Some((parent_index, is_left)) = parent {
                if let TreeNode::Split(split) = &mut nodes[parent_index as usize] {
                    if is_left {
                        split.left = index;
                    } else {
                        split.right = index;
                    }
                }
            }

            match &raw.kind {
                RawKind::Leaf { value } => nodes.push(TreeNode::Leaf(LeafNode { value: *value })),
                RawKind::Split(split) => {
                    if split.missing != split.yes && split.missing != split.no {
                        return Err(BuildError::MissingTargetMismatch {
                            node_id: id,
                            missing: split.missing,
                            yes: split.yes,
                            no: split.no,
                        });
                    }
                    nodes.push(TreeNode::Split(SplitNode {
                        feature_index: split.feature_index,
                        threshold: split.threshold,
                        comparator: split.comparator,
                        left: index,
                        right: index,
                        missing_goes_left: split.missing == split.yes,
                    }));
                    on_path.insert(id);
                    stack.push(Step::Exit(id));
                    stack.push(Step::Enter {
                        id: split.no,
                        parent: Some((index, false)),
                        from: id,
                    });
                    stack.push(Step::Enter {
                        id: split.yes,
                        parent: Some((index, true)),
                        from: id,
                    });
                }
            }
        }

        let unreachable: Vec<NodeId> = graph.ids().filter(|id| !reached.contains(id)).collect();
        if !unreachable.is_empty() {
            warn!(
                "Tree {}: dropping {} unreachable node(s): {:?}",
                tree_id,
                unreachable.len(),
                unreachable
            );
        }

        Ok(BuildOutcome {
            tree: Tree { id: tree_id, nodes },
            unreachable,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::dump::{DumpParser, ParseOptions};
    use crate::ml::test_support::{random_features, random_tree_dump, TreeShape};
    use crate::ml::FeatureMap;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn feature_map() -> FeatureMap {
        FeatureMap::new(["price_change", "rsi", "ma_5", "hour"]).unwrap()
    }

    fn graph(text: &str) -> NodeGraph {
        let map = feature_map();
        DumpParser::new(&map, ParseOptions::default()).parse(text).unwrap()
    }

    fn build(text: &str) -> Result<BuildOutcome, BuildError> {
        TreeBuilder::build(&graph(text), 0)
    }

    #[test]
    fn test_builds_nested_tree_in_preorder() {
        let outcome = build(
            "0:[rsi<50] yes=1,no=2,missing=1\n\
             1:[price_change<0] yes=3,no=4,missing=4\n\
             2:leaf=-0.2\n\
             3:leaf=0.1\n\
             4:leaf=0.4",
        )
        .unwrap();
        let tree = outcome.tree;
        assert!(outcome.unreachable.is_empty());
        assert_eq!(tree.len(), 5);
        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.leaf_count(), 3);
        assert_eq!(tree.split_count(), 2);

        match tree.root() {
            TreeNode::Split(root) => {
                assert_eq!(root.left, 1);
                assert_eq!(root.right, 4);
                assert!(root.missing_goes_left);
            }
            other => panic!("expected split root, got {:?}", other),
        }
        match tree.node(1) {
            TreeNode::Split(inner) => {
                assert_eq!((inner.left, inner.right), (2, 3));
                assert!(!inner.missing_goes_left);
            }
            other => panic!("expected split, got {:?}", other),
        }
        assert_eq!(tree.node(2), &TreeNode::Leaf(LeafNode { value: 0.1 }));
        assert_eq!(tree.node(3), &TreeNode::Leaf(LeafNode { value: 0.4 }));
        assert_eq!(tree.node(4), &TreeNode::Leaf(LeafNode { value: -0.2 }));
    }

    #[test]
    fn test_dangling_reference() {
        let err = build("0:[rsi<50] yes=7,no=2,missing=7\n2:leaf=0.1").unwrap_err();
        assert_eq!(err, BuildError::DanglingReference { from: 0, target: 7 });
    }

    #[test]
    fn test_missing_root() {
        let err = build("1:leaf=0.1").unwrap_err();
        assert_eq!(err, BuildError::MissingRoot);
    }

    #[test]
    fn test_cycle_detected() {
        let err = build(
            "0:[rsi<50] yes=1,no=2,missing=1\n\
             1:[hour<12] yes=0,no=2,missing=2\n\
             2:leaf=0.1",
        )
        .unwrap_err();
        assert_eq!(err, BuildError::CyclicTree { node_id: 0 });

        let err = build("0:[rsi<50] yes=0,no=1,missing=1\n1:leaf=0.1").unwrap_err();
        assert_eq!(err, BuildError::CyclicTree { node_id: 0 });
    }

    #[test]
    fn test_missing_target_must_be_a_child() {
        let err = build(
            "0:[rsi<50] yes=1,no=2,missing=3\n1:leaf=0.1\n2:leaf=0.2\n3:leaf=0.3",
        )
        .unwrap_err();
        assert_eq!(
            err,
            BuildError::MissingTargetMismatch {
                node_id: 0,
                missing: 3,
                yes: 1,
                no: 2,
            }
        );
    }

    #[test]
    fn test_unreachable_nodes_are_dropped() {
        let outcome = build(
            "0:[rsi<50] yes=1,no=2,missing=1\n\
             1:leaf=0.3\n\
             2:leaf=-0.2\n\
             9:[hour<3] yes=10,no=11,missing=10\n\
             10:leaf=5",
        )
        .unwrap();
        assert_eq!(outcome.unreachable, vec![9, 10]);
        assert_eq!(outcome.tree.len(), 3);
    }

    #[test]
    fn test_shared_child_is_rejected() {
        let err = build(
            "0:[rsi<50] yes=1,no=2,missing=1\n\
             1:[hour<12] yes=3,no=4,missing=3\n\
             2:[hour<18] yes=3,no=4,missing=4\n\
             3:leaf=1\n\
             4:leaf=2",
        )
        .unwrap_err();
        assert_eq!(err, BuildError::SharedNode { node_id: 3, parent: 2 });

        let err = build("0:[rsi<50] yes=1,no=1,missing=1\n1:leaf=0.5").unwrap_err();
        assert_eq!(err, BuildError::SharedNode { node_id: 1, parent: 0 });
    }

    #[test]
    fn test_diamond_chain_fails_fast() {
        // each split points both branches at the next line; expanding per
        // parent would need 2^40 nodes
        let mut text = String::new();
        for i in 0..40 {
            text.push_str(&format!("{}:[rsi<{}] yes={},no={},missing={}\n", i, i, i + 1, i + 1, i + 1));
        }
        text.push_str("40:leaf=0.1");
        let err = build(&text).unwrap_err();
        assert!(matches!(err, BuildError::SharedNode { .. }), "{:?}", err);
    }

    #[test]
    fn test_built_tree_matches_raw_graph() {
        let mut rng = StdRng::seed_from_u64(17);
        let names = ["price_change", "rsi", "ma_5", "hour"];
        for (depth, shape) in [
            (2, TreeShape::Balanced),
            (6, TreeShape::Balanced),
            (12, TreeShape::Random),
            (50, TreeShape::Skewed),
            (50, TreeShape::Random),
        ] {
            let text = random_tree_dump(&mut rng, &names, depth, shape);
            let graph = graph(&text);
            let tree = TreeBuilder::build(&graph, 0).unwrap().tree;
            assert_eq!(tree.depth(), depth, "shape {:?}", shape);

            for _ in 0..200 {
                let features = random_features(&mut rng, names.len());
                let expected = graph.walk_raw(&features).unwrap();
                assert_eq!(crate::ml::evaluate_tree(&tree, &features), expected);
            }
        }
    }

    #[test]
    fn test_very_deep_skewed_tree() {
        let mut rng = StdRng::seed_from_u64(3);
        let text = random_tree_dump(&mut rng, &["rsi"], 5_000, TreeShape::Skewed);
        let tree = TreeBuilder::build(&graph(&text), 0).unwrap().tree;
        assert_eq!(tree.depth(), 5_000);
        assert_eq!(tree.leaf_count(), 5_001);
    }
}
