//! Random dump generators for structural tests.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::{Ensemble, FeatureMap, LoadOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeShape {
    /// Every node above the last level splits
    Balanced,
    /// A single spine of splits, every other child is a leaf
    Skewed,
    /// A full-depth spine with random side branches
    Random,
}

/// Dump text for a tree of exactly `depth` splits on its longest path.
///
/// Node ids are sparse, lines are shuffled and indentation is random, so the
/// text layout carries no structural information.
pub fn random_tree_dump(rng: &mut StdRng, features: &[&str], depth: usize, shape: TreeShape) -> String {
    let mut lines = Vec::new();
    let mut next_id: u32 = 1;
    let mut alloc = |rng: &mut StdRng| {
        next_id += rng.random_range(1..4);
        next_id
    };

    // (node id, level, on the guaranteed full-depth path)
    let mut stack = vec![(0u32, 0usize, true)];
    while let Some((id, level, spine)) = stack.pop() {
        let indent = "\t".repeat(rng.random_range(0..4));
        let splits = level < depth
            && match shape {
                TreeShape::Balanced => true,
                TreeShape::Skewed => spine,
                TreeShape::Random => spine || rng.random_bool(0.3),
            };

        if !splits {
            let value: f64 = rng.random_range(-1.0..1.0);
            lines.push(format!("{}{}:leaf={}", indent, id, value));
            continue;
        }

        let yes = alloc(rng);
        let no = alloc(rng);
        let missing = if rng.random_bool(0.5) { yes } else { no };
        let feature = features[rng.random_range(0..features.len())];
        let threshold: f64 = rng.random_range(-1.0..1.0);
        lines.push(format!(
            "{}{}:[{}<{}] yes={},no={},missing={},gain={},cover={}",
            indent,
            id,
            feature,
            threshold,
            yes,
            no,
            missing,
            rng.random_range(0.0..10.0),
            rng.random_range(1..500)
        ));

        let spine_goes_yes = rng.random_bool(0.5);
        stack.push((yes, level + 1, spine && spine_goes_yes));
        stack.push((no, level + 1, spine && !spine_goes_yes));
    }

    lines.shuffle(rng);
    lines.join("\n")
}

/// Feature buffer with values around the generated thresholds, about 15%
/// of them missing
pub fn random_features(rng: &mut StdRng, len: usize) -> Vec<f64> {
    (0..len)
        .map(|_| {
            if rng.random_bool(0.15) {
                f64::NAN
            } else {
                rng.random_range(-1.5..1.5)
            }
        })
        .collect()
}

/// Eight features, `trees` random trees of depth 1..8, one depth-50 skewed
/// tree and one single-leaf tree, with a non-zero bias
pub fn mixed_ensemble(seed: u64, trees: usize) -> Ensemble {
    let names: Vec<String> = (0..8).map(|i| format!("f{}", i)).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let mut rng = StdRng::seed_from_u64(seed);

    let mut dumps: Vec<String> = (0..trees)
        .map(|_| {
            let depth = rng.random_range(1..8);
            random_tree_dump(&mut rng, &refs, depth, TreeShape::Random)
        })
        .collect();
    dumps.push(random_tree_dump(&mut rng, &refs, 50, TreeShape::Skewed));
    dumps.push("0:leaf=0.25".to_string());

    let options = LoadOptions {
        bias: -0.3,
        ..LoadOptions::default()
    };
    let map = FeatureMap::new(names).expect("generated names are unique");
    Ensemble::from_dumps(&dumps, map, &options).expect("generated dumps are valid")
}
