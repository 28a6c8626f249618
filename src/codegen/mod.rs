//! Source generation for deployed evaluators.
//!
//! An [`Ensemble`] is written out as one function per tree (nested
//! conditionals in left-before-right pre-order) plus margin, prediction and
//! signal entry points. Output is a pure function of the ensemble and the
//! options: no timestamps, no hash-map iteration.

pub mod mql5;
#[cfg(test)]
mod replay;
pub mod rust;
pub mod writer;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::ml::{Ensemble, NodeIndex, SplitNode, Transform, Tree, TreeNode, UnsupportedTransform};
use crate::types::SignalThresholds;

pub use mql5::Mql5Target;
pub use rust::RustTarget;
pub use writer::SourceWriter;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmitError {
    #[error(transparent)]
    UnsupportedTransform(#[from] UnsupportedTransform),
    #[error("ensemble has no trees")]
    EmptyEnsemble,
    #[error("unknown target '{0}' (expected mql5 or rust)")]
    UnknownTarget(String),
    #[error("'{0}' is not a valid identifier prefix")]
    InvalidPrefix(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    #[default]
    Mql5,
    Rust,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Mql5 => "mql5",
            TargetKind::Rust => "rust",
        }
    }

    pub fn backend(&self) -> Box<dyn Target> {
        match self {
            TargetKind::Mql5 => Box::new(Mql5Target),
            TargetKind::Rust => Box::new(RustTarget),
        }
    }
}

impl FromStr for TargetKind {
    type Err = EmitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mql5" | "mq5" | "mqh" => Ok(TargetKind::Mql5),
            "rust" | "rs" => Ok(TargetKind::Rust),
            _ => Err(EmitError::UnknownTarget(s.to_string())),
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmitOptions {
    pub target: TargetKind,
    /// Prepended to every generated identifier
    pub prefix: String,
    pub include_signal: bool,
    /// Defaults baked into the signal entry point
    pub thresholds: SignalThresholds,
    /// Output transform for the emitted entry point, by name.
    /// `None` keeps the ensemble's own transform.
    pub transform: Option<String>,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self {
            target: TargetKind::Mql5,
            prefix: "Xgb".to_string(),
            include_signal: true,
            thresholds: SignalThresholds::default(),
            transform: None,
        }
    }
}

/// Everything a target needs while writing one ensemble
pub struct EmitContext<'a> {
    pub ensemble: &'a Ensemble,
    pub transform: Transform,
    pub prefix: &'a str,
    pub include_signal: bool,
    pub thresholds: SignalThresholds,
}

impl EmitContext<'_> {
    pub fn snake_prefix(&self) -> String {
        snake_case(self.prefix)
    }

    pub fn upper_prefix(&self) -> String {
        snake_case(self.prefix).to_ascii_uppercase()
    }
}

/// Syntax hooks for one runtime. The tree walk, header and ordering live in
/// [`CodeEmitter`]; targets only decide how each piece is spelled.
pub trait Target {
    fn name(&self) -> &'static str;

    fn file_extension(&self) -> &'static str;

    fn indent_unit(&self) -> &'static str {
        "    "
    }

    /// Constants and helpers that precede the tree functions
    fn prelude(&self, w: &mut SourceWriter, ctx: &EmitContext<'_>);

    fn tree_fn_name(&self, ctx: &EmitContext<'_>, tree_id: usize) -> String;

    fn open_tree_fn(&self, w: &mut SourceWriter, ctx: &EmitContext<'_>, tree: &Tree);

    /// Test that selects the left ("yes") branch, including missing routing
    fn condition(&self, ctx: &EmitContext<'_>, split: &SplitNode) -> String;

    fn open_if(&self, w: &mut SourceWriter, condition: &str);

    fn open_else(&self, w: &mut SourceWriter) {
        w.line("} else {");
    }

    fn close_if(&self, w: &mut SourceWriter) {
        w.line("}");
    }

    fn leaf(&self, w: &mut SourceWriter, value: f64);

    fn close_fn(&self, w: &mut SourceWriter) {
        w.line("}");
    }

    /// Margin, prediction and (optionally) signal functions
    fn entry_points(&self, w: &mut SourceWriter, ctx: &EmitContext<'_>);

    fn epilogue(&self, _w: &mut SourceWriter, _ctx: &EmitContext<'_>) {}
}

/// Shortest literal that parses back to the same `f64`
pub fn float_literal(value: f64) -> String {
    format!("{:?}", value)
}

fn snake_case(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 4);
    let mut prev_lower = false;
    for c in prefix.chars() {
        if c.is_ascii_uppercase() && prev_lower {
            out.push('_');
        }
        prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        out.push(c.to_ascii_lowercase());
    }
    out
}

/// True for a C-style identifier usable as a generated name prefix
pub fn is_identifier(prefix: &str) -> bool {
    let mut chars = prefix.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

enum Frame {
    Node(NodeIndex),
    Else(NodeIndex),
    Close,
}

pub struct CodeEmitter {
    options: EmitOptions,
}

impl CodeEmitter {
    pub fn new(options: EmitOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &EmitOptions {
        &self.options
    }

    /// Conventional file name for the generated source, e.g. `xgb_model.mqh`
    pub fn file_name(&self) -> String {
        format!(
            "{}_model.{}",
            snake_case(&self.options.prefix),
            self.options.target.backend().file_extension()
        )
    }

    pub fn emit(&self, ensemble: &Ensemble) -> Result<String, EmitError> {
        if ensemble.is_empty() {
            return Err(EmitError::EmptyEnsemble);
        }
        let transform = match &self.options.transform {
            Some(name) => name.parse::<Transform>()?,
            None => ensemble.transform(),
        };
        if !is_identifier(&self.options.prefix) {
            return Err(EmitError::InvalidPrefix(self.options.prefix.clone()));
        }

        let target = self.options.target.backend();
        let ctx = EmitContext {
            ensemble,
            transform,
            prefix: &self.options.prefix,
            include_signal: self.options.include_signal,
            thresholds: self.options.thresholds,
        };

        let mut w = SourceWriter::new(target.indent_unit());
        write_header(&mut w, &ctx);
        target.prelude(&mut w, &ctx);

        for tree in ensemble.trees() {
            w.blank();
            emit_tree(&mut w, target.as_ref(), &ctx, tree);
            debug!("Emitted tree {} ({} splits)", tree.id(), tree.split_count());
        }

        w.blank();
        target.entry_points(&mut w, &ctx);
        target.epilogue(&mut w, &ctx);

        let source = w.finish();
        info!(
            "Generated {} source: {} trees, {} bytes",
            target.name(),
            ensemble.len(),
            source.len()
        );
        Ok(source)
    }
}

fn write_header(w: &mut SourceWriter, ctx: &EmitContext<'_>) {
    let ensemble = ctx.ensemble;
    w.line("// Generated by xgb-signal. Do not edit.");
    w.line(format!("// Model digest: {}", ensemble.digest()));
    w.line(format!(
        "// Trees: {}, features: {}, transform: {}, bias: {}",
        ensemble.len(),
        ensemble.feature_map().len(),
        ctx.transform,
        float_literal(ensemble.bias())
    ));
}

fn emit_tree(w: &mut SourceWriter, target: &dyn Target, ctx: &EmitContext<'_>, tree: &Tree) {
    target.open_tree_fn(w, ctx, tree);
    w.indent();

    let mut stack = vec![Frame::Node(0)];
    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Node(index) => match tree.node(index) {
                TreeNode::Leaf(leaf) => target.leaf(w, leaf.value),
                TreeNode::Split(split) => {
                    target.open_if(w, &target.condition(ctx, split));
                    w.indent();
                    stack.push(Frame::Close);
                    stack.push(Frame::Else(split.right));
                    stack.push(Frame::Node(split.left));
                }
            },
            Frame::Else(right) => {
                w.dedent();
                target.open_else(w);
                w.indent();
                stack.push(Frame::Node(right));
            }
            Frame::Close => {
                w.dedent();
                target.close_if(w);
            }
        }
    }

    w.dedent();
    target.close_fn(w);
}

/// Emits with the given options
pub fn emit(ensemble: &Ensemble, options: &EmitOptions) -> Result<String, EmitError> {
    CodeEmitter::new(options.clone()).emit(ensemble)
}
