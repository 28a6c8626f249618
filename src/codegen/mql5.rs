use super::writer::SourceWriter;
use super::{float_literal, EmitContext, Target};
use crate::ml::{SplitNode, Transform, Tree};

/// MetaTrader 5 include library (`.mqh`).
///
/// The caller fills a `double` array in feature-map order and marks missing
/// values with NaN (for example `MathSqrt(-1)`).
#[derive(Debug, Clone, Copy, Default)]
pub struct Mql5Target;

impl Mql5Target {
    fn is_missing(ctx: &EmitContext<'_>) -> String {
        format!("{}IsMissing", ctx.prefix)
    }

    fn guard(ctx: &EmitContext<'_>) -> String {
        format!("{}_MODEL_MQH", ctx.upper_prefix())
    }
}

impl Target for Mql5Target {
    fn name(&self) -> &'static str {
        "mql5"
    }

    fn file_extension(&self) -> &'static str {
        "mqh"
    }

    fn prelude(&self, w: &mut SourceWriter, ctx: &EmitContext<'_>) {
        let guard = Self::guard(ctx);
        w.line(format!("#ifndef {}", guard));
        w.line(format!("#define {}", guard));
        w.blank();

        let map = ctx.ensemble.feature_map();
        w.line(format!("#define {}_FEATURE_COUNT {}", ctx.upper_prefix(), map.len()));
        for (slot, name) in map.iter() {
            w.line(format!("// f[{}] = {}", slot, name.escape_debug()));
        }
        w.blank();

        w.line(format!("bool {}(double v)", Self::is_missing(ctx)));
        w.line("{");
        w.indent();
        w.line("return v != v;");
        w.dedent();
        w.line("}");
    }

    fn tree_fn_name(&self, ctx: &EmitContext<'_>, tree_id: usize) -> String {
        format!("{}Tree{}", ctx.prefix, tree_id)
    }

    fn open_tree_fn(&self, w: &mut SourceWriter, ctx: &EmitContext<'_>, tree: &Tree) {
        w.line(format!("double {}(const double &f[])", self.tree_fn_name(ctx, tree.id())));
        w.line("{");
    }

    fn condition(&self, ctx: &EmitContext<'_>, split: &SplitNode) -> String {
        let slot = split.feature_index;
        let compare = format!(
            "f[{}] {} {}",
            slot,
            split.comparator.as_str(),
            float_literal(split.threshold)
        );
        if split.missing_goes_left {
            format!("{}(f[{}]) || {}", Self::is_missing(ctx), slot, compare)
        } else {
            format!("!{}(f[{}]) && {}", Self::is_missing(ctx), slot, compare)
        }
    }

    fn open_if(&self, w: &mut SourceWriter, condition: &str) {
        w.line(format!("if ({}) {{", condition));
    }

    fn leaf(&self, w: &mut SourceWriter, value: f64) {
        w.line(format!("return {};", float_literal(value)));
    }

    fn entry_points(&self, w: &mut SourceWriter, ctx: &EmitContext<'_>) {
        let p = ctx.prefix;

        w.line(format!("double {}Margin(const double &f[])", p));
        w.line("{");
        w.indent();
        w.line("double sum = 0.0;");
        for tree in ctx.ensemble.trees() {
            w.line(format!("sum += {}(f);", self.tree_fn_name(ctx, tree.id())));
        }
        w.line(format!("sum += {};", float_literal(ctx.ensemble.bias())));
        w.line("return sum;");
        w.dedent();
        w.line("}");
        w.blank();

        w.line(format!("double {}Predict(const double &f[])", p));
        w.line("{");
        w.indent();
        match ctx.transform {
            Transform::Logistic => w.line(format!("return 1.0 / (1.0 + MathExp(-{}Margin(f)));", p)),
            Transform::Identity => w.line(format!("return {}Margin(f);", p)),
        }
        w.dedent();
        w.line("}");

        if ctx.include_signal {
            w.blank();
            w.line(format!(
                "int {}Signal(const double &f[], double upper = {}, double lower = {})",
                p,
                float_literal(ctx.thresholds.upper),
                float_literal(ctx.thresholds.lower)
            ));
            w.line("{");
            w.indent();
            w.line(format!("double p = {}Predict(f);", p));
            w.line("if (p > upper) return 1;");
            w.line("if (p < lower) return 2;");
            w.line("return 0;");
            w.dedent();
            w.line("}");
        }
    }

    fn epilogue(&self, w: &mut SourceWriter, ctx: &EmitContext<'_>) {
        w.blank();
        w.line(format!("#endif // {}", Self::guard(ctx)));
    }
}
