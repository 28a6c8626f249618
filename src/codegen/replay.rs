//! Executes generated evaluator text line by line, so emitted branching can
//! be checked against the in-memory evaluator without a target toolchain.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

static TREE_FN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:double [A-Za-z_][A-Za-z0-9_]*Tree(\d+)\(const double &f\[\]\)|pub fn [a-z_][a-z0-9_]*_tree_(\d+)\(f: .*\) -> f64 \{)$")
        .expect("tree fn regex must compile")
});

static CONDITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^if \(?(!?)(?:[A-Za-z_][A-Za-z0-9_]*IsMissing\(f\[(\d+)\]\)|f\[(\d+)\]\.is_nan\(\)) (\|\||&&) f\[(\d+)\] (<=|<) (\S+?)\)? \{$",
    )
    .expect("condition regex must compile")
});

static TREE_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^sum \+= [A-Za-z_][A-Za-z0-9_]*?_?[Tt]ree_?(\d+)\(f\);$").expect("tree call regex must compile")
});

static BIAS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^sum \+= ([^(]+);$").expect("bias regex must compile")
});

#[derive(Debug, Clone, Copy)]
enum Node {
    Leaf(f64),
    Split {
        slot: usize,
        or_equal: bool,
        threshold: f64,
        missing_left: bool,
        left: usize,
        right: usize,
    },
}

#[derive(Debug)]
pub struct Replay {
    trees: HashMap<usize, Vec<Node>>,
    /// Tree ids in the order the margin function adds them
    order: Vec<usize>,
    bias: f64,
    logistic: bool,
}

impl Replay {
    pub fn parse(source: &str) -> Replay {
        let lines: Vec<&str> = source.lines().collect();
        let mut trees = HashMap::new();
        let mut order = Vec::new();
        let mut bias = None;
        let mut logistic = None;

        let mut i = 0;
        while i < lines.len() {
            let line = lines[i];
            if let Some(caps) = TREE_FN.captures(line) {
                let id: usize = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .unwrap()
                    .as_str()
                    .parse()
                    .unwrap();
                if line.starts_with("double") {
                    i += 1;
                    assert_eq!(lines[i], "{");
                }
                let mut body = Vec::new();
                i += 1;
                while lines[i] != "}" {
                    body.push(lines[i].trim());
                    i += 1;
                }
                trees.insert(id, parse_body(&body));
            } else if line.contains("Margin(const") || line.contains("_margin(f:") {
                i += 1;
                while lines[i] != "}" {
                    let stmt = lines[i].trim();
                    if let Some(caps) = TREE_CALL.captures(stmt) {
                        order.push(caps[1].parse().unwrap());
                    } else if let Some(caps) = BIAS.captures(stmt) {
                        bias = Some(caps[1].parse::<f64>().unwrap());
                    }
                    i += 1;
                }
            } else if line.contains("Predict(const") || line.contains("_predict(f:") {
                let mut j = i + 1;
                while lines[j] != "}" {
                    j += 1;
                }
                logistic = Some(lines[i..j].iter().any(|l| l.to_ascii_lowercase().contains("exp")));
                i = j;
            }
            i += 1;
        }

        Replay {
            trees,
            order,
            bias: bias.expect("margin function adds a bias"),
            logistic: logistic.expect("predict function present"),
        }
    }

    pub fn tree_count(&self) -> usize {
        self.order.len()
    }

    pub fn predict(&self, f: &[f64]) -> f64 {
        let mut sum = 0.0;
        for id in &self.order {
            sum += eval(&self.trees[id], f);
        }
        sum += self.bias;
        if self.logistic {
            1.0 / (1.0 + (-sum).exp())
        } else {
            sum
        }
    }
}

fn parse_leaf(line: &str) -> f64 {
    line.trim_start_matches("return ")
        .trim_end_matches(';')
        .parse()
        .unwrap_or_else(|_| panic!("not a leaf line: {}", line))
}

/// Builds the node arena for one function body with an explicit stack of
/// open `if` nodes.
fn parse_body(body: &[&str]) -> Vec<Node> {
    let mut nodes = Vec::new();
    // (split index, else seen)
    let mut open: Vec<(usize, bool)> = Vec::new();

    for line in body {
        let child = if let Some(caps) = CONDITION.captures(line) {
            let check_slot = caps.get(2).or_else(|| caps.get(3)).unwrap().as_str();
            assert_eq!(check_slot, &caps[5], "missing check and comparison use one slot");
            let missing_left = &caps[1] != "!";
            assert_eq!(missing_left, &caps[4] == "||");
            nodes.push(Node::Split {
                slot: caps[5].parse().unwrap(),
                or_equal: &caps[6] == "<=",
                threshold: caps[7].parse().unwrap(),
                missing_left,
                left: usize::MAX,
                right: usize::MAX,
            });
            Some(nodes.len() - 1)
        } else if *line == "} else {" {
            let top = open.last_mut().expect("else without if");
            assert!(!top.1);
            top.1 = true;
            None
        } else if *line == "}" {
            let (_, else_seen) = open.pop().expect("close without if");
            assert!(else_seen);
            None
        } else {
            nodes.push(Node::Leaf(parse_leaf(line)));
            Some(nodes.len() - 1)
        };

        if let Some(index) = child {
            if let Some(&(parent, else_seen)) = open.last() {
                if let Node::Split { left, right, .. } = &mut nodes[parent] {
                    let slot = if else_seen { right } else { left };
                    assert_eq!(*slot, usize::MAX, "branch holds one statement");
                    *slot = index;
                }
            }
            if matches!(nodes[index], Node::Split { .. }) {
                open.push((index, false));
            }
        }
    }

    assert!(open.is_empty());
    nodes
}

fn eval(nodes: &[Node], f: &[f64]) -> f64 {
    let mut index = 0;
    loop {
        match nodes[index] {
            Node::Leaf(value) => return value,
            Node::Split {
                slot,
                or_equal,
                threshold,
                missing_left,
                left,
                right,
            } => {
                let value = f[slot];
                let go_left = if value.is_nan() {
                    missing_left
                } else if or_equal {
                    value <= threshold
                } else {
                    value < threshold
                };
                index = if go_left { left } else { right };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{emit, EmitOptions, TargetKind};
    use crate::ml::test_support::{mixed_ensemble, random_features};
    use crate::ml::{Ensemble, FeatureMap, LoadOptions, Transform};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn assert_replay_matches(ensemble: &Ensemble, seed: u64) {
        for target in [TargetKind::Mql5, TargetKind::Rust] {
            let options = EmitOptions {
                target,
                ..EmitOptions::default()
            };
            let replay = Replay::parse(&emit(ensemble, &options).unwrap());
            assert_eq!(replay.tree_count(), ensemble.len());

            let mut rng = StdRng::seed_from_u64(seed);
            for row in 0..500 {
                let f = random_features(&mut rng, ensemble.feature_map().len());
                let expected = ensemble.predict(&f).unwrap();
                assert_eq!(
                    replay.predict(&f).to_bits(),
                    expected.to_bits(),
                    "{} row {} diverged: {:?}",
                    target,
                    row,
                    f
                );
            }
        }
    }

    #[test]
    fn test_emitted_source_matches_evaluator() {
        for seed in [3, 17, 99] {
            assert_replay_matches(&mixed_ensemble(seed, 25), seed);
        }
    }

    #[test]
    fn test_emitted_identity_and_le_match_evaluator() {
        let map = FeatureMap::new(["a", "b"]).unwrap();
        let options = LoadOptions {
            transform: Transform::Identity,
            bias: 1.5,
            ..LoadOptions::default()
        };
        let dumps = [
            "0:[a<=0.25] yes=1,no=2,missing=2\n1:leaf=0.5\n2:[b<-1e-5] yes=3,no=4\n3:leaf=-0.125\n4:leaf=2",
            "0:leaf=-0.75",
        ];
        let ensemble = Ensemble::from_dumps(&dumps, map, &options).unwrap();
        assert_replay_matches(&ensemble, 5);

        let replay = Replay::parse(&emit(&ensemble, &EmitOptions::default()).unwrap());
        // a == 0.25 takes the `<=` branch
        assert_eq!(replay.predict(&[0.25, 0.0]), 0.5 - 0.75 + 1.5);
        assert_eq!(replay.predict(&[f64::NAN, f64::NAN]), -0.125 - 0.75 + 1.5);
    }
}
