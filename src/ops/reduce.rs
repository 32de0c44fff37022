use crate::ops::spec::ReduceOp;
use crate::value::DafType;

/// Output element type of a reduction.
///
/// `Auto` rules: `Sum` widens integers to their 64-bit counterpart to
/// avoid overflow, the moment-style reductions produce a float matching
/// the input width, `Min`/`Max` keep the input type, `Count` is `U32`.
pub fn output_dtype(op: &ReduceOp, input: DafType) -> DafType {
    match op {
        ReduceOp::Sum { dtype } => dtype.resolve(input.widen_to_64()),
        ReduceOp::Mean { dtype }
        | ReduceOp::Median { dtype }
        | ReduceOp::Quantile { dtype, .. }
        | ReduceOp::Std { dtype }
        | ReduceOp::StdN { dtype }
        | ReduceOp::Var { dtype }
        | ReduceOp::VarN { dtype } => dtype.resolve(input.float_counterpart()),
        ReduceOp::Min { dtype } | ReduceOp::Max { dtype } => dtype.resolve(input),
        ReduceOp::Count { dtype } => dtype.resolve(DafType::U32),
    }
}

/// Reduce a slice to one value; `None` for an empty slice (the caller
/// substitutes the `||` default or raises).
///
/// `Count` is the exception: it is well-defined on empty input.
pub fn reduce_slice(op: &ReduceOp, values: &[f64]) -> Option<f64> {
    if let ReduceOp::Count { .. } = op {
        return Some(values.len() as f64);
    }
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let result = match op {
        ReduceOp::Sum { .. } => values.iter().sum::<f64>(),
        ReduceOp::Mean { .. } => values.iter().sum::<f64>() / n,
        ReduceOp::Median { .. } => quantile(values, 0.5),
        ReduceOp::Quantile { p, .. } => quantile(values, *p),
        ReduceOp::Min { .. } => values.iter().copied().fold(f64::INFINITY, f64::min),
        ReduceOp::Max { .. } => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        ReduceOp::Std { .. } => variance(values).sqrt(),
        ReduceOp::StdN { .. } => {
            let mean = values.iter().sum::<f64>() / n;
            variance(values).sqrt() / mean
        }
        ReduceOp::Var { .. } => variance(values),
        ReduceOp::VarN { .. } => {
            let mean = values.iter().sum::<f64>() / n;
            variance(values) / mean
        }
        ReduceOp::Count { .. } => values.len() as f64,
    };
    Some(result)
}

/// Population variance.
fn variance(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n
}

/// Linear-interpolation quantile over a sorted scratch copy.
fn quantile(values: &[f64], p: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let position = p * (sorted.len() - 1) as f64;
    let low = position.floor() as usize;
    let high = position.ceil() as usize;
    if low == high {
        sorted[low]
    } else {
        let fraction = position - low as f64;
        sorted[low] * (1.0 - fraction) + sorted[high] * fraction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::DtypeSpec;

    fn auto(op: fn(DtypeSpec) -> ReduceOp) -> ReduceOp {
        op(DtypeSpec::Auto)
    }

    #[test]
    fn sum_widens_integer_dtypes() {
        let op = auto(|dtype| ReduceOp::Sum { dtype });
        assert_eq!(output_dtype(&op, DafType::U8), DafType::U64);
        assert_eq!(output_dtype(&op, DafType::I16), DafType::I64);
        assert_eq!(output_dtype(&op, DafType::F32), DafType::F32);
    }

    #[test]
    fn count_is_defined_on_empty_input() {
        let op = auto(|dtype| ReduceOp::Count { dtype });
        assert_eq!(reduce_slice(&op, &[]), Some(0.0));
        let sum = auto(|dtype| ReduceOp::Sum { dtype });
        assert_eq!(reduce_slice(&sum, &[]), None);
    }

    #[test]
    fn median_interpolates_even_lengths() {
        let op = auto(|dtype| ReduceOp::Median { dtype });
        assert_eq!(reduce_slice(&op, &[4.0, 1.0, 3.0, 2.0]), Some(2.5));
    }

    #[test]
    fn quantile_matches_linear_interpolation() {
        let op = ReduceOp::Quantile {
            p: 0.25,
            dtype: DtypeSpec::Auto,
        };
        assert_eq!(reduce_slice(&op, &[0.0, 1.0, 2.0, 3.0]), Some(0.75));
    }

    #[test]
    fn population_variance_and_std() {
        let var = auto(|dtype| ReduceOp::Var { dtype });
        assert_eq!(reduce_slice(&var, &[1.0, 3.0]), Some(1.0));
        let std = auto(|dtype| ReduceOp::Std { dtype });
        assert_eq!(reduce_slice(&std, &[1.0, 3.0]), Some(1.0));
    }
}
