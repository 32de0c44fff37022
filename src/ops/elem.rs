use crate::ops::spec::EltwiseOp;
use crate::value::DafType;

/// Output element type of an element-wise operation.
///
/// `Auto` infers the narrowest type that losslessly represents every
/// possible output for the given input type: `Abs` of a signed integer
/// promotes to its unsigned counterpart, `Log` and `Fraction` yield a
/// float matching the input width, `Round` turns floats into `I64`.
pub fn output_dtype(op: &EltwiseOp, input: DafType) -> DafType {
    match op {
        EltwiseOp::Abs { dtype } => dtype.resolve(if input.is_signed_int() {
            input.unsigned_counterpart()
        } else {
            input
        }),
        EltwiseOp::Clamp { dtype, .. } => dtype.resolve(input),
        EltwiseOp::Convert { dtype } => *dtype,
        EltwiseOp::Fraction { dtype } | EltwiseOp::Log { dtype, .. } => {
            dtype.resolve(input.float_counterpart())
        }
        EltwiseOp::Round { dtype } => dtype.resolve(if input.is_float() {
            DafType::I64
        } else {
            input
        }),
    }
}

/// Apply an element-wise operation to a scalar value.
pub fn apply_scalar(op: &EltwiseOp, value: f64) -> f64 {
    apply_one(op, value, 1.0)
}

/// Apply an element-wise operation in place over a vector.
pub fn apply_vector(op: &EltwiseOp, values: &mut [f64]) {
    let total = match op {
        EltwiseOp::Fraction { .. } => values.iter().sum::<f64>(),
        _ => 1.0,
    };
    for value in values.iter_mut() {
        *value = apply_one(op, *value, total);
    }
}

/// Apply an element-wise operation in place over a row-major matrix;
/// `Fraction` normalizes each row by its own total.
pub fn apply_matrix(op: &EltwiseOp, values: &mut [f64], cols: usize) {
    if cols == 0 {
        return;
    }
    match op {
        EltwiseOp::Fraction { .. } => {
            for row in values.chunks_mut(cols) {
                let total = row.iter().sum::<f64>();
                for value in row.iter_mut() {
                    *value = apply_one(op, *value, total);
                }
            }
        }
        _ => apply_vector(op, values),
    }
}

fn apply_one(op: &EltwiseOp, value: f64, total: f64) -> f64 {
    match op {
        EltwiseOp::Abs { .. } => value.abs(),
        EltwiseOp::Clamp { min, max, .. } => value.clamp(*min, *max),
        EltwiseOp::Convert { dtype } => {
            if dtype.is_float() {
                value
            } else {
                value.trunc()
            }
        }
        EltwiseOp::Fraction { .. } => {
            if total == 0.0 {
                0.0
            } else {
                value / total
            }
        }
        EltwiseOp::Log { base, eps, .. } => (value + eps).log(*base),
        EltwiseOp::Round { .. } => value.round(),
    }
}
