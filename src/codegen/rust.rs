use super::writer::SourceWriter;
use super::{float_literal, EmitContext, Target};
use crate::ml::{SplitNode, Transform, Tree, TreeNode};

/// Self-contained Rust module taking a fixed-size `[f64; N]` buffer
/// (NaN = missing)
#[derive(Debug, Clone, Copy, Default)]
pub struct RustTarget;

impl RustTarget {
    fn buffer_type(ctx: &EmitContext<'_>) -> String {
        format!("&[f64; {}_FEATURE_COUNT]", ctx.upper_prefix())
    }
}

impl Target for RustTarget {
    fn name(&self) -> &'static str {
        "rust"
    }

    fn file_extension(&self) -> &'static str {
        "rs"
    }

    fn prelude(&self, w: &mut SourceWriter, ctx: &EmitContext<'_>) {
        let map = ctx.ensemble.feature_map();
        w.blank();
        w.line(format!("pub const {}_FEATURE_COUNT: usize = {};", ctx.upper_prefix(), map.len()));
        for (slot, name) in map.iter() {
            w.line(format!("// f[{}] = {}", slot, name.escape_debug()));
        }
    }

    fn tree_fn_name(&self, ctx: &EmitContext<'_>, tree_id: usize) -> String {
        format!("{}_tree_{}", ctx.snake_prefix(), tree_id)
    }

    fn open_tree_fn(&self, w: &mut SourceWriter, ctx: &EmitContext<'_>, tree: &Tree) {
        if matches!(tree.root(), TreeNode::Leaf(_)) {
            w.line("#[allow(unused_variables)]");
        }
        w.line(format!(
            "pub fn {}(f: {}) -> f64 {{",
            self.tree_fn_name(ctx, tree.id()),
            Self::buffer_type(ctx)
        ));
    }

    fn condition(&self, _ctx: &EmitContext<'_>, split: &SplitNode) -> String {
        let slot = split.feature_index;
        let compare = format!(
            "f[{}] {} {}",
            slot,
            split.comparator.as_str(),
            float_literal(split.threshold)
        );
        if split.missing_goes_left {
            format!("f[{}].is_nan() || {}", slot, compare)
        } else {
            format!("!f[{}].is_nan() && {}", slot, compare)
        }
    }

    fn open_if(&self, w: &mut SourceWriter, condition: &str) {
        w.line(format!("if {} {{", condition));
    }

    fn leaf(&self, w: &mut SourceWriter, value: f64) {
        w.line(float_literal(value));
    }

    fn entry_points(&self, w: &mut SourceWriter, ctx: &EmitContext<'_>) {
        let p = ctx.snake_prefix();
        let buffer = Self::buffer_type(ctx);

        w.line(format!("pub fn {}_margin(f: {}) -> f64 {{", p, buffer));
        w.indent();
        w.line("let mut sum = 0.0;");
        for tree in ctx.ensemble.trees() {
            w.line(format!("sum += {}(f);", self.tree_fn_name(ctx, tree.id())));
        }
        w.line(format!("sum += {};", float_literal(ctx.ensemble.bias())));
        w.line("sum");
        w.dedent();
        w.line("}");
        w.blank();

        w.line(format!("pub fn {}_predict(f: {}) -> f64 {{", p, buffer));
        w.indent();
        match ctx.transform {
            Transform::Logistic => w.line(format!("1.0 / (1.0 + (-{}_margin(f)).exp())", p)),
            Transform::Identity => w.line(format!("{}_margin(f)", p)),
        }
        w.dedent();
        w.line("}");

        if !ctx.include_signal {
            return;
        }

        let upper = ctx.upper_prefix();
        w.blank();
        w.line(format!("pub const {}_SIGNAL_UPPER: f64 = {};", upper, float_literal(ctx.thresholds.upper)));
        w.line(format!("pub const {}_SIGNAL_LOWER: f64 = {};", upper, float_literal(ctx.thresholds.lower)));
        w.blank();
        w.line(format!(
            "pub fn {}_signal(f: {}, upper: f64, lower: f64) -> i32 {{",
            p, buffer
        ));
        w.indent();
        w.line(format!("let p = {}_predict(f);", p));
        w.line("if p > upper {");
        w.indent();
        w.line("1");
        w.dedent();
        w.line("} else if p < lower {");
        w.indent();
        w.line("2");
        w.dedent();
        w.line("} else {");
        w.indent();
        w.line("0");
        w.dedent();
        w.line("}");
        w.dedent();
        w.line("}");
    }
}
