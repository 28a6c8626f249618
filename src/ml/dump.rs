use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::FeatureMap;

/// Node id as written in the dump (`<id>:...`)
pub type NodeId = u32;

static SPLIT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+):\[([^\]<]+?)(<=|<)([^\]]+)\]\s+(\S.*)$").expect("split line regex must compile")
});

static LEAF_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+):leaf=([^,\s]+)(?:,(\S.*))?$").expect("leaf line regex must compile")
});

static BOOSTER_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^booster\[(\d+)\]:$").expect("booster header regex must compile")
});

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DumpError {
    #[error("line {line}: malformed dump line '{text}'")]
    MalformedLine { line: usize, text: String },
    #[error("line {line}: node {node_id} splits on unknown feature '{feature}'")]
    UnknownFeature {
        line: usize,
        node_id: NodeId,
        feature: String,
    },
    #[error("line {line}: node {node_id} already declared on line {first_line}")]
    DuplicateNodeId {
        line: usize,
        node_id: NodeId,
        first_line: usize,
    },
}

/// Split comparison. The "yes" branch is taken when the comparison holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    /// `value < threshold` (XGBoost)
    #[default]
    LessThan,
    /// `value <= threshold` (scikit-learn style exporters)
    LessOrEqual,
}

impl Comparator {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "<" => Some(Comparator::LessThan),
            "<=" => Some(Comparator::LessOrEqual),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Comparator::LessThan => "<",
            Comparator::LessOrEqual => "<=",
        }
    }

    /// True when a present value takes the "yes" branch
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::LessThan => value < threshold,
            Comparator::LessOrEqual => value <= threshold,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Branch used for a missing value when a split line has no `missing=` entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingDefault {
    #[default]
    Yes,
    No,
}

#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    pub default_missing: MissingDefault,
    /// Forces one comparator for every split regardless of the dump token
    pub comparator: Option<Comparator>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawSplit {
    pub feature: String,
    pub feature_index: usize,
    pub comparator: Comparator,
    pub threshold: f64,
    pub yes: NodeId,
    pub no: NodeId,
    pub missing: NodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawKind {
    Split(RawSplit),
    Leaf { value: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawNode {
    pub id: NodeId,
    /// 1-based line number inside the tree block
    pub line: usize,
    pub kind: RawKind,
}

/// Id-keyed nodes of one tree, exactly as the dump declares them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeGraph {
    nodes: BTreeMap<NodeId, RawNode>,
}

impl NodeGraph {
    pub fn get(&self, id: NodeId) -> Option<&RawNode> {
        self.nodes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node ids in ascending order
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Walks the raw `yes=/no=/missing=` references directly.
    #[cfg(test)]
    pub(crate) fn walk_raw(&self, features: &[f64]) -> Option<f64> {
        let mut id = 0;
        for _ in 0..=self.nodes.len() {
            match &self.nodes.get(&id)?.kind {
                RawKind::Leaf { value } => return Some(*value),
                RawKind::Split(split) => {
                    let value = features.get(split.feature_index).copied().unwrap_or(f64::NAN);
                    id = if value.is_nan() {
                        split.missing
                    } else if split.comparator.holds(value, split.threshold) {
                        split.yes
                    } else {
                        split.no
                    };
                }
            }
        }
        None
    }
}

/// Parses the text dump of a single tree into a [`NodeGraph`].
///
/// Structure comes only from the id references on each line. Leading
/// whitespace is accepted and ignored, so dumps whose indentation does not
/// track depth still parse into the right graph.
pub struct DumpParser<'a> {
    features: &'a FeatureMap,
    options: ParseOptions,
}

impl<'a> DumpParser<'a> {
    pub fn new(features: &'a FeatureMap, options: ParseOptions) -> Self {
        Self { features, options }
    }

    pub fn parse(&self, text: &str) -> Result<NodeGraph, DumpError> {
        let mut graph = NodeGraph::default();

        for (idx, raw_line) in text.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw_line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let node = self.parse_line(line, trimmed)?;
            if let Some(existing) = graph.nodes.get(&node.id) {
                return Err(DumpError::DuplicateNodeId {
                    line,
                    node_id: node.id,
                    first_line: existing.line,
                });
            }
            graph.nodes.insert(node.id, node);
        }

        debug!("Parsed tree dump: {} nodes", graph.len());
        Ok(graph)
    }

    fn parse_line(&self, line: usize, text: &str) -> Result<RawNode, DumpError> {
        let malformed = || DumpError::MalformedLine {
            line,
            text: text.to_string(),
        };

        if let Some(caps) = LEAF_LINE.captures(text) {
            let id = caps[1].parse::<NodeId>().map_err(|_| malformed())?;
            let value = parse_finite(&caps[2]).ok_or_else(malformed)?;
            return Ok(RawNode {
                id,
                line,
                kind: RawKind::Leaf { value },
            });
        }

        let caps = SPLIT_LINE.captures(text).ok_or_else(malformed)?;
        let id = caps[1].parse::<NodeId>().map_err(|_| malformed())?;
        let feature = caps[2].trim().to_string();
        let parsed_cmp = Comparator::from_token(&caps[3]).ok_or_else(malformed)?;
        let threshold = parse_finite(&caps[4]).ok_or_else(malformed)?;

        let mut yes = None;
        let mut no = None;
        let mut missing = None;
        for attr in caps[5].split(',') {
            let (key, value) = attr.trim().split_once('=').ok_or_else(malformed)?;
            let target = match key.trim() {
                "yes" => &mut yes,
                "no" => &mut no,
                "missing" => &mut missing,
                // gain=, cover= and other statistics
                _ => continue,
            };
            if target.is_some() {
                return Err(malformed());
            }
            *target = Some(value.trim().parse::<NodeId>().map_err(|_| malformed())?);
        }

        let (yes, no) = match (yes, no) {
            (Some(yes), Some(no)) => (yes, no),
            _ => return Err(malformed()),
        };
        let missing = missing.unwrap_or(match self.options.default_missing {
            MissingDefault::Yes => yes,
            MissingDefault::No => no,
        });

        let feature_index = self
            .features
            .slot(&feature)
            .ok_or_else(|| DumpError::UnknownFeature {
                line,
                node_id: id,
                feature: feature.clone(),
            })?;

        Ok(RawNode {
            id,
            line,
            kind: RawKind::Split(RawSplit {
                feature,
                feature_index,
                comparator: self.options.comparator.unwrap_or(parsed_cmp),
                threshold,
                yes,
                no,
                missing,
            }),
        })
    }
}

fn parse_finite(token: &str) -> Option<f64> {
    token.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Splits a whole-model dump (`booster[0]:`, `booster[1]:`, ...) into one
/// block per tree. Text without any header is a single tree.
pub fn split_model_dump(text: &str) -> Result<Vec<String>, DumpError> {
    if !text.lines().any(|l| BOOSTER_HEADER.is_match(l.trim())) {
        return Ok(vec![text.to_string()]);
    }

    let mut blocks: Vec<Vec<&str>> = Vec::new();
    for (idx, raw_line) in text.lines().enumerate() {
        let trimmed = raw_line.trim();
        if let Some(caps) = BOOSTER_HEADER.captures(trimmed) {
            let expected = blocks.len();
            if caps[1].parse::<usize>().ok() != Some(expected) {
                return Err(DumpError::MalformedLine {
                    line: idx + 1,
                    text: trimmed.to_string(),
                });
            }
            blocks.push(Vec::new());
            continue;
        }
        match blocks.last_mut() {
            Some(block) => block.push(raw_line),
            None if trimmed.is_empty() => {}
            None => {
                return Err(DumpError::MalformedLine {
                    line: idx + 1,
                    text: trimmed.to_string(),
                })
            }
        }
    }

    Ok(blocks.into_iter().map(|lines| lines.join("\n")).collect())
}
