use crate::value::{DafType, DtypeSpec};

/// Element-wise operations, each carrying its validated parameters.
///
/// The closed set mirrors the registry in `catalog.rs`; parameters are
/// rendered in their canonical order by `render`.
#[derive(Debug, Clone, PartialEq)]
pub enum EltwiseOp {
    Abs { dtype: DtypeSpec },
    Clamp { min: f64, max: f64, dtype: DtypeSpec },
    Convert { dtype: DafType },
    Fraction { dtype: DtypeSpec },
    Log { base: f64, eps: f64, dtype: DtypeSpec },
    Round { dtype: DtypeSpec },
}

impl EltwiseOp {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Abs { .. } => "Abs",
            Self::Clamp { .. } => "Clamp",
            Self::Convert { .. } => "Convert",
            Self::Fraction { .. } => "Fraction",
            Self::Log { .. } => "Log",
            Self::Round { .. } => "Round",
        }
    }

    pub(crate) fn render(&self, out: &mut String) {
        out.push_str(self.name());
        match self {
            Self::Abs { dtype } | Self::Fraction { dtype } | Self::Round { dtype } => {
                push_dtype(out, *dtype);
            }
            Self::Clamp { min, max, dtype } => {
                push_float(out, "min", *min);
                push_float(out, "max", *max);
                push_dtype(out, *dtype);
            }
            Self::Convert { dtype } => {
                out.push_str(" dtype ");
                out.push_str(dtype.name());
            }
            Self::Log { base, eps, dtype } => {
                if (*base - std::f64::consts::E).abs() < f64::EPSILON {
                    out.push_str(" base e");
                } else {
                    push_float(out, "base", *base);
                }
                push_float(out, "eps", *eps);
                push_dtype(out, *dtype);
            }
        }
    }
}

/// Reductions, collapsing one dimension; numeric-only at evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum ReduceOp {
    Sum { dtype: DtypeSpec },
    Mean { dtype: DtypeSpec },
    Median { dtype: DtypeSpec },
    Quantile { p: f64, dtype: DtypeSpec },
    Min { dtype: DtypeSpec },
    Max { dtype: DtypeSpec },
    Std { dtype: DtypeSpec },
    StdN { dtype: DtypeSpec },
    Var { dtype: DtypeSpec },
    VarN { dtype: DtypeSpec },
    Count { dtype: DtypeSpec },
}

impl ReduceOp {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sum { .. } => "Sum",
            Self::Mean { .. } => "Mean",
            Self::Median { .. } => "Median",
            Self::Quantile { .. } => "Quantile",
            Self::Min { .. } => "Min",
            Self::Max { .. } => "Max",
            Self::Std { .. } => "Std",
            Self::StdN { .. } => "StdN",
            Self::Var { .. } => "Var",
            Self::VarN { .. } => "VarN",
            Self::Count { .. } => "Count",
        }
    }

    pub(crate) fn render(&self, out: &mut String) {
        out.push_str(self.name());
        match self {
            Self::Quantile { p, dtype } => {
                push_float(out, "p", *p);
                push_dtype(out, *dtype);
            }
            Self::Sum { dtype }
            | Self::Mean { dtype }
            | Self::Median { dtype }
            | Self::Min { dtype }
            | Self::Max { dtype }
            | Self::Std { dtype }
            | Self::StdN { dtype }
            | Self::Var { dtype }
            | Self::VarN { dtype }
            | Self::Count { dtype } => push_dtype(out, *dtype),
        }
    }
}

fn push_float(out: &mut String, name: &str, value: f64) {
    out.push(' ');
    out.push_str(name);
    out.push(' ');
    out.push_str(&format_float(value));
}

fn push_dtype(out: &mut String, dtype: DtypeSpec) {
    out.push_str(" dtype ");
    out.push_str(dtype.name());
}

/// Shortest round-trip rendering; `Display` for `f64` is stable and
/// re-parses to the same value.
pub(crate) fn format_float(value: f64) -> String {
    format!("{value}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_renders_euler_base_symbolically() {
        let mut out = String::new();
        EltwiseOp::Log {
            base: std::f64::consts::E,
            eps: 0.0,
            dtype: DtypeSpec::Auto,
        }
        .render(&mut out);
        assert_eq!(out, "Log base e eps 0 dtype Auto");

        let mut out = String::new();
        EltwiseOp::Log {
            base: 2.0,
            eps: 1.0,
            dtype: DtypeSpec::Fixed(DafType::F32),
        }
        .render(&mut out);
        assert_eq!(out, "Log base 2 eps 1 dtype F32");
    }

    #[test]
    fn quantile_renders_p_before_dtype() {
        let mut out = String::new();
        ReduceOp::Quantile {
            p: 0.5,
            dtype: DtypeSpec::Auto,
        }
        .render(&mut out);
        assert_eq!(out, "Quantile p 0.5 dtype Auto");
    }
}
